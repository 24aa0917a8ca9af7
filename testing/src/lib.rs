//! # Tessera Testing
//!
//! Testing utilities for the Tessera ticketing crates.
//!
//! This crate provides:
//! - `FixedClock`: deterministic time that never moves
//! - `MockClock`: deterministic time that tests can advance, used to cross
//!   reservation and token expiry boundaries without sleeping
//!
//! ## Example
//!
//! ```
//! use tessera_testing::MockClock;
//! use tessera_core::environment::Clock;
//! use chrono::Duration;
//!
//! let clock = MockClock::at_test_epoch();
//! let start = clock.now();
//! clock.advance(Duration::minutes(15));
//! assert_eq!(clock.now() - start, Duration::minutes(15));
//! ```

use chrono::{DateTime, Utc};
use tessera_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::RwLock;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use tessera_testing::mocks::FixedClock;
    /// use tessera_core::environment::Clock;
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

    /// Clock that only moves when a test tells it to.
    ///
    /// Shared behind an `Arc` between the test and the services under test.
    #[derive(Debug)]
    pub struct MockClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl MockClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Create a clock frozen at [`test_epoch`].
        #[must_use]
        pub fn at_test_epoch() -> Self {
            Self::new(test_epoch())
        }

        /// Move the clock forward (or backward, for a negative duration).
        pub fn advance(&self, by: Duration) {
            let mut guard = match self.time.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard += by;
        }

        /// Jump to an absolute instant.
        pub fn set(&self, time: DateTime<Utc>) {
            let mut guard = match self.time.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = time;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            match self.time.read() {
                Ok(guard) => *guard,
                Err(poisoned) => *poisoned.into_inner(),
            }
        }
    }

    /// The instant every test clock starts from: Wednesday 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, MockClock, test_clock, test_epoch};
