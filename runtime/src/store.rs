//! Store runtime for coordinating reducer execution and effect handling.

use crate::{
    AtomicCounterGuard, DecrementGuard, EffectHandle, EffectTracking, HealthCheck, StoreError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use walkin_core::effect::Effect;
use walkin_core::reducer::Reducer;

/// Configuration for Store instances
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Component name used in logs and health checks
    pub name: String,
    /// Default timeout for graceful shutdown
    pub default_shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Create a configuration with the given component name and defaults
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.default_shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            default_shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// The Store - runtime coordinator for a reducer
///
/// The Store manages:
/// 1. State (behind a `RwLock`; the write lock is the single-writer section)
/// 2. Reducer (business logic)
/// 3. Environment (injected dependencies)
/// 4. Effect execution (with feedback loop)
///
/// Clones share the same state and shutdown flag.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: R,
    environment: E,
    config: Arc<StoreConfig>,
    shutdown: Arc<AtomicBool>,
    pending_effects: Arc<AtomicUsize>,
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
    A: Send + Clone + std::fmt::Debug + 'static,
    S: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a store over its initial state
    #[must_use]
    pub fn with_config(initial_state: S, reducer: R, environment: E, config: StoreConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer,
            environment,
            config: Arc::new(config),
            shutdown: Arc::new(AtomicBool::new(false)),
            pending_effects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Send an action to the store
    ///
    /// 1. Acquires the write lock on state
    /// 2. Calls the reducer with (state, action, environment)
    /// 3. Releases the lock and starts executing the returned effects
    ///
    /// `send()` returns after starting effect execution, not completion. Use
    /// the returned [`EffectHandle`] to wait for the effects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
    #[tracing::instrument(skip(self, action), fields(store = %self.config.name), name = "store_send")]
    pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
        self.send_with(action, |_| ()).await.map(|((), handle)| handle)
    }

    /// Send an action and read the resulting state before the lock is released
    ///
    /// `read` runs under the same write lock as the reducer, so the value it
    /// returns reflects exactly this action's outcome and no concurrent action
    /// can interleave between the two.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
    pub async fn send_with<F, T>(&self, action: A, read: F) -> Result<(T, EffectHandle), StoreError>
    where
        F: FnOnce(&S) -> T,
    {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::warn!(store = %self.config.name, "Rejected action: store is shutting down");
            metrics::counter!("store.shutdown.rejected_actions").increment(1);
            return Err(StoreError::ShutdownInProgress);
        }

        metrics::counter!("store.commands.total").increment(1);

        let (handle, tracking) = EffectHandle::new();

        let (effects, value) = {
            let mut state = self.state.write().await;
            tracing::trace!("Acquired write lock on state");

            let span = tracing::debug_span!("reducer_execution");
            let _enter = span.enter();

            let start = std::time::Instant::now();
            let effects = self.reducer.reduce(&mut *state, action, &self.environment);
            metrics::histogram!("store.reducer.duration_seconds")
                .record(start.elapsed().as_secs_f64());

            tracing::trace!("Reducer completed, returned {} effects", effects.len());
            (effects, read(&*state))
        };

        for effect in effects {
            self.execute_effect(effect, tracking.clone());
        }

        Ok((value, handle))
    }

    /// Read current state via a closure
    ///
    /// ```ignore
    /// let waiting = store.state(|s| s.waiting_count()).await;
    /// ```
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&*state)
    }

    /// Number of effects currently running across all actions
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.pending_effects.load(Ordering::Acquire)
    }

    /// Whether shutdown has been initiated
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Health of the store: unhealthy once shutting down
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let check = if self.is_shutting_down() {
            HealthCheck::unhealthy(self.config.name.clone(), "Store is shutting down")
        } else {
            HealthCheck::healthy(self.config.name.clone())
        };
        check.with_metadata("pending_effects", self.pending_effects().to_string())
    }

    /// Initiate graceful shutdown using the configured default timeout
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if effects are still running
    /// when the timeout expires.
    pub async fn shutdown_default(&self) -> Result<(), StoreError> {
        self.shutdown(self.config.default_shutdown_timeout).await
    }

    /// Initiate graceful shutdown of the store
    ///
    /// Sets the shutdown flag (rejecting new actions), then waits for pending
    /// effects to complete.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before all
    /// pending effects complete.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!(store = %self.config.name, "Initiating graceful shutdown");
        metrics::counter!("store.shutdown.initiated").increment(1);

        self.shutdown.store(true, Ordering::Release);

        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(20);

        loop {
            let pending = self.pending_effects.load(Ordering::Acquire);

            if pending == 0 {
                tracing::info!(store = %self.config.name, "All effects completed, shutdown successful");
                metrics::counter!("store.shutdown.completed").increment(1);
                return Ok(());
            }

            if start.elapsed() >= timeout {
                tracing::error!(
                    store = %self.config.name,
                    pending_effects = pending,
                    "Shutdown timeout with effects still running"
                );
                metrics::counter!("store.shutdown.timeout").increment(1);
                return Err(StoreError::ShutdownTimeout(pending));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Spawn a tracked task for one leaf effect
    fn spawn_tracked<F>(&self, tracking: &EffectTracking, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracking.increment();
        self.pending_effects.fetch_add(1, Ordering::SeqCst);
        let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));
        let guard = DecrementGuard(tracking.clone());

        tokio::spawn(async move {
            let _guard = guard;
            let _pending_guard = pending_guard;
            task.await;
        });
    }

    /// Feed an effect-produced action back into the store
    async fn feed_back(&self, action: A) {
        if let Err(error) = self.send(action).await {
            tracing::debug!(store = %self.config.name, %error, "Feedback action dropped");
        }
    }

    /// Execute an effect
    ///
    /// Leaf effects run in spawned tasks; `Parallel` fans out with shared
    /// tracking, `Sequential` waits for each child before starting the next.
    #[allow(clippy::needless_pass_by_value)]
    fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking) {
        match effect {
            Effect::None => {
                metrics::counter!("store.effects.executed", "type" => "none").increment(1);
            },
            Effect::Future(fut) => {
                tracing::trace!("Executing Effect::Future");
                metrics::counter!("store.effects.executed", "type" => "future").increment(1);

                let store = self.clone();
                self.spawn_tracked(&tracking, async move {
                    if let Some(action) = fut.await {
                        tracing::trace!("Effect::Future produced an action, sending to store");
                        store.feed_back(action).await;
                    }
                });
            },
            Effect::Parallel(effects) => {
                metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                for effect in effects {
                    self.execute_effect(effect, tracking.clone());
                }
            },
            Effect::Sequential(effects) => {
                metrics::counter!("store.effects.executed", "type" => "sequential").increment(1);

                let store = self.clone();
                self.spawn_tracked(&tracking, async move {
                    for effect in effects {
                        let (sub_tracking, mut sub_rx) = EffectTracking::detached();
                        store.execute_effect(effect, sub_tracking.clone());

                        while sub_tracking.counter.load(Ordering::SeqCst) > 0 {
                            if sub_rx.changed().await.is_err() {
                                break;
                            }
                        }
                    }
                    tracing::trace!("Effect::Sequential completed");
                });
            },
        }
    }
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: self.reducer.clone(),
            environment: self.environment.clone(),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            pending_effects: Arc::clone(&self.pending_effects),
        }
    }
}

impl<S, A, E, R> std::fmt::Debug for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.config.name)
            .field("pending_effects", &self.pending_effects.load(Ordering::Relaxed))
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
