//! # Tessera Core
//!
//! Environment abstractions shared by the Tessera ticketing crates.
//!
//! Every service in the workspace receives its dependencies through an
//! injected environment rather than reaching for globals. Time is the one
//! dependency every component needs (reservation holds, token expiry, batch
//! ids), so it lives here where both the domain crate and the test doubles
//! can see it.
//!
//! ## Example
//!
//! ```
//! use tessera_core::environment::{Clock, SystemClock};
//!
//! let clock = SystemClock;
//! let before = clock.now();
//! assert!(clock.now() >= before);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// into services at construction time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    ///
    /// // Test - time can be advanced to cross expiry boundaries
    /// let clock = Arc::new(MockClock::new(start));
    /// clock.advance(Duration::minutes(5));
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock implementation backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
