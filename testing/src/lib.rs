//! # Blood Bank Testing
//!
//! Testing utilities for the blood bank engine:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - A Given/When/Then harness for reducers ([`ReducerTest`])
//!
//! ## Example
//!
//! ```ignore
//! use bloodbank_testing::{test_clock, ManualClock};
//!
//! let clock = ManualClock::new(test_clock().now());
//! let sweeper = ExpirySweeper::new(store.clone(), Arc::new(clock.clone()));
//!
//! clock.advance(chrono::Duration::days(2));
//! let report = sweeper.sweep().await?;
//! ```

use bloodbank_core::environment::Clock;
use chrono::{DateTime, Utc};


/// Deterministic clocks for tests.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use bloodbank_testing::mocks::FixedClock;
    /// use bloodbank_core::environment::Clock;
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

    /// A clock that only moves when the test moves it.
    ///
    /// Clones share the same underlying instant, so a test can hand one clone
    /// to the code under test and keep another to advance time (for example
    /// to walk a unit past its expiry date before sweeping).
    ///
    /// # Example
    ///
    /// ```
    /// use bloodbank_testing::mocks::ManualClock;
    /// use bloodbank_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = ManualClock::new(start);
    /// clock.advance(Duration::days(2));
    /// assert_eq!(clock.now(), start + Duration::days(2));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward (or backward, for a negative duration).
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.write() {
                *time += by;
            }
        }

        /// Jump to an absolute instant.
        pub fn set(&self, to: DateTime<Utc>) {
            if let Ok(mut time) = self.time.write() {
                *time = to;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            // A poisoned lock still holds the last written instant.
            match self.time.read() {
                Ok(time) => *time,
                Err(poisoned) => *poisoned.into_inner(),
            }
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{test_clock, FixedClock, ManualClock};
pub use reducer_test::{assertions, ReducerTest};
