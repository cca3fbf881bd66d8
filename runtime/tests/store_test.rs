//! Store behaviour: serialization, effect feedback, shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;
use walkin_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
use walkin_runtime::{HealthStatus, Store, StoreConfig, StoreError};

#[derive(Debug, Default)]
struct CounterState {
    value: i64,
    log: Vec<&'static str>,
    rejected: u32,
}

#[derive(Debug, Clone, PartialEq)]
enum CounterAction {
    Increment,
    IncrementLater,
    Acknowledged,
    Chain,
    Step(&'static str),
    AddIfBelow { amount: i64, limit: i64 },
}

#[derive(Clone)]
struct CounterReducer;

impl Reducer for CounterReducer {
    type State = CounterState;
    type Action = CounterAction;
    type Environment = ();

    fn reduce(
        &self,
        state: &mut CounterState,
        action: CounterAction,
        _env: &(),
    ) -> SmallVec<[Effect<CounterAction>; 4]> {
        match action {
            CounterAction::Increment => {
                state.value += 1;
                smallvec![Effect::None]
            },
            CounterAction::IncrementLater => smallvec![Effect::future(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some(CounterAction::Acknowledged)
            })],
            CounterAction::Acknowledged => {
                state.value += 10;
                state.log.push("ack");
                smallvec![Effect::None]
            },
            CounterAction::Chain => smallvec![Effect::chain(vec![
                Effect::future(async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Some(CounterAction::Step("first"))
                }),
                Effect::future(async { Some(CounterAction::Step("second")) }),
            ])],
            CounterAction::Step(name) => {
                state.log.push(name);
                smallvec![Effect::None]
            },
            CounterAction::AddIfBelow { amount, limit } => {
                if state.value + amount <= limit {
                    state.value += amount;
                } else {
                    state.rejected += 1;
                }
                smallvec![Effect::None]
            },
        }
    }
}

type CounterStore = Store<CounterState, CounterAction, (), CounterReducer>;

fn store() -> CounterStore {
    Store::with_config(
        CounterState::default(),
        CounterReducer,
        (),
        StoreConfig::named("counter"),
    )
}

#[tokio::test]
async fn send_with_reads_outcome_under_the_same_lock() {
    let store = store();
    let (value, mut handle) = store
        .send_with(CounterAction::Increment, |s| s.value)
        .await
        .unwrap();
    handle.wait().await;
    assert_eq!(value, 1);
}

#[tokio::test]
async fn feedback_action_is_reduced_before_handle_completes() {
    let store = store();
    let mut handle = store.send(CounterAction::IncrementLater).await.unwrap();
    handle
        .wait_with_timeout(Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(store.state(|s| s.value).await, 10);
}

#[tokio::test]
async fn sequential_effects_run_in_order() {
    let store = store();
    let mut handle = store.send(CounterAction::Chain).await.unwrap();
    handle
        .wait_with_timeout(Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(store.state(|s| s.log.clone()).await, vec!["first", "second"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_are_serialized() {
    let store = Arc::new(store());

    let tasks = (0..50).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store
                .send(CounterAction::AddIfBelow {
                    amount: 1,
                    limit: 30,
                })
                .await
                .unwrap();
        })
    });
    futures::future::join_all(tasks).await;

    let (value, rejected) = store.state(|s| (s.value, s.rejected)).await;
    assert_eq!(value, 30);
    assert_eq!(rejected, 20);
}

#[tokio::test]
async fn shutdown_rejects_new_actions() {
    let store = store();
    store.send(CounterAction::IncrementLater).await.unwrap();

    store.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(store.pending_effects(), 0);
    assert_eq!(store.health().status, HealthStatus::Unhealthy);

    let result = store.send(CounterAction::Increment).await;
    assert!(matches!(result, Err(StoreError::ShutdownInProgress)));
}

#[tokio::test]
async fn shutdown_reports_effects_still_running() {
    let store = Store::with_config(
        CounterState::default(),
        CounterReducer,
        (),
        StoreConfig::named("counter").with_shutdown_timeout(Duration::ZERO),
    );
    store.send(CounterAction::IncrementLater).await.unwrap();

    assert_eq!(
        store.shutdown_default().await,
        Err(StoreError::ShutdownTimeout(1))
    );
    assert!(store.is_shutting_down());
}
