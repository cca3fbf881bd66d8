//! # Walkin Core
//!
//! The reducer abstraction every queue component is written against.
//!
//! A reducer receives the current state, one action and its environment. It
//! validates the action, mutates the state in place and returns descriptions
//! of the side effects it wants performed (persist a ticket, publish a
//! transition). It never performs I/O itself, so the whole admission and
//! serving logic can be tested by feeding actions and inspecting state.
//!
//! - **State**: owned by exactly one store, mutated only inside `reduce`
//! - **Action**: commands from callers, events the reducer derives, feedback from effects
//! - **Effect**: a value describing work for the runtime, never the work itself
//! - **Environment**: injected collaborators such as the [`environment::Clock`]
//!
//! ## Example
//!
//! ```ignore
//! use walkin_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
//!
//! impl Reducer for CounterReducer {
//!     type State = CounterState;
//!     type Action = CounterAction;
//!     type Environment = CounterEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut CounterState,
//!         action: CounterAction,
//!         env: &CounterEnvironment,
//!     ) -> SmallVec<[Effect<CounterAction>; 4]> {
//!         state.served += 1;
//!         let repo = env.repository.clone();
//!         let snapshot = state.clone();
//!         smallvec![Effect::future(async move {
//!             repo.save(snapshot).await.ok();
//!             None
//!         })]
//!     }
//! }
//! ```

pub use smallvec::{smallvec, SmallVec};

/// The [`Reducer`](reducer::Reducer) trait
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// Business logic for one piece of state
    ///
    /// Implementations must be deterministic given the environment: the same
    /// state, action and clock reading always produce the same mutation and
    /// the same effects. Most actions produce a persist and a publish at
    /// most, so up to 4 effects stay on the stack.
    pub trait Reducer {
        /// State this reducer owns
        type State;

        /// Inputs, including actions fed back by effects
        type Action;

        /// Injected collaborators
        type Environment;

        /// Apply `action` to `state` and describe the resulting side effects
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Side effect descriptions
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Boxed future carried by [`Effect::Future`]
    pub type EffectFuture<Action> = Pin<Box<dyn Future<Output = Option<Action>> + Send>>;

    /// Work the runtime performs after a reducer returns
    pub enum Effect<Action> {
        /// Nothing to do
        None,

        /// Run all children concurrently
        Parallel(Vec<Effect<Action>>),

        /// Run children one after another, each finishing before the next starts
        Sequential(Vec<Effect<Action>>),

        /// Async work; a returned action is fed back into the reducer
        Future(EffectFuture<Action>),
    }

    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::None => f.write_str("Effect::None"),
                Self::Parallel(effects) => f.debug_tuple("Effect::Parallel").field(effects).finish(),
                Self::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Self::Future(_) => f.write_str("Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Run `effects` concurrently
        #[must_use]
        pub const fn merge(effects: Vec<Self>) -> Self {
            Self::Parallel(effects)
        }

        /// Run `effects` in order, e.g. persist before publish
        #[must_use]
        pub const fn chain(effects: Vec<Self>) -> Self {
            Self::Sequential(effects)
        }

        /// Wrap an async block
        pub fn future<F>(fut: F) -> Self
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Self::Future(Box::pin(fut))
        }
    }
}

/// Injected collaborators shared by every reducer
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of the current time
    ///
    /// Office-days, same-day expiry and lockout windows are all computed from
    /// this, never from the system clock directly.
    pub trait Clock: Send + Sync {
        /// Current instant
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
