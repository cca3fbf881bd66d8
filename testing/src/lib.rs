//! # Walkin Testing
//!
//! Testing utilities and helpers for the walkin queue architecture.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - A Given/When/Then harness for reducers ([`ReducerTest`])
//! - Assertion helpers for effects
//!
//! ## Example
//!
//! ```ignore
//! use walkin_testing::{test_clock, ManualClock};
//!
//! #[tokio::test]
//! async fn ticket_expires_after_midnight() {
//!     let clock = ManualClock::new(test_clock().now());
//!     let service = QueueService::in_memory(Arc::new(clock.clone()), Config::default());
//!     // issue a ticket, then
//!     clock.advance(chrono::Duration::days(1));
//!     walkin_queue::maintenance::run_expiry_sweep(&service).await?;
//! }
//! ```

use chrono::{DateTime, Utc};
use walkin_core::environment::Clock;

/// Deterministic clock implementations
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use walkin_testing::mocks::FixedClock;
    /// use walkin_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it
    ///
    /// Clones share the same instant, so a test can keep one handle and give
    /// another to the code under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at `start`
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(start)),
            }
        }

        /// Move the clock forward (or backward, for a negative duration)
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute instant
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 09:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_instant())
    }

    /// The instant [`test_clock`] is frozen at
    #[must_use]
    pub fn test_instant() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_722_000, 0).unwrap_or_default()
    }
}


pub use mocks::{test_clock, test_instant, FixedClock, ManualClock};
pub use reducer_test::{assertions, ReducerTest};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T09:00:00+00:00");
    }

    #[test]
    fn manual_clock_advances_for_every_clone() {
        let clock = ManualClock::new(test_instant());
        let shared = clock.clone();

        clock.advance(chrono::Duration::minutes(15));
        assert_eq!(shared.now() - test_instant(), chrono::Duration::minutes(15));

        shared.set(test_instant());
        assert_eq!(clock.now(), test_instant());
    }
}
