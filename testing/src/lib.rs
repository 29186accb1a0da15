//! # Admission Testing
//!
//! Testing utilities for admission ticketing.
//!
//! This crate provides:
//! - Deterministic implementations of the environment traits (clock, entropy)
//! - An in-memory [`TicketStore`](admission_core::ticket_store::TicketStore)
//!   with the same compare-and-set semantics as the durable store
//! - Fault-injecting stores for the `StoreUnavailable` paths
//! - Fixtures that seed signed tickets without going through issuance
//! - proptest strategies for keys and credentials
//!
//! ## Example
//!
//! ```ignore
//! use admission_testing::{InMemoryTicketStore, test_clock, fixtures};
//!
//! #[tokio::test]
//! async fn admits_once() {
//!     let store = InMemoryTicketStore::new();
//!     let seeded = fixtures::seed_ticket(&store, &test_clock(), 42, 3).await;
//!     // validate seeded.qr_payload twice...
//! }
//! ```

use admission_core::environment::{Clock, EntropyError, EntropySource};
use chrono::{DateTime, Utc};

pub mod fixtures;
pub mod stores;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, EntropyError, EntropySource, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use admission_testing::mocks::FixedClock;
    /// use admission_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
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

    /// Entropy source that always fails.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FailingEntropy;

    impl EntropySource for FailingEntropy {
        fn fill(&self, _dest: &mut [u8]) -> Result<(), EntropyError> {
            Err(EntropyError::Unavailable("entropy source offline".to_string()))
        }
    }

    /// Entropy source that replays a script of fill bytes.
    ///
    /// Each `fill` call takes the next byte from the script and repeats it
    /// across the whole buffer; once the script runs out the last byte is
    /// reused. Key generation draws twice per key pair (primary, then
    /// secondary), so the script `[1, 2, 1, 3]` produces a second pair whose
    /// primary key collides with the first.
    #[derive(Debug)]
    pub struct ScriptedEntropy {
        script: Mutex<(Vec<u8>, usize)>,
    }

    impl ScriptedEntropy {
        /// Create a source replaying `script`.
        #[must_use]
        pub const fn new(script: Vec<u8>) -> Self {
            Self {
                script: Mutex::new((script, 0)),
            }
        }

        /// Source whose every draw is identical: all primary keys collide.
        #[must_use]
        pub fn constant(byte: u8) -> Self {
            Self::new(vec![byte])
        }
    }

    impl EntropySource for ScriptedEntropy {
        fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
            let mut guard = self
                .script
                .lock()
                .map_err(|_| EntropyError::Unavailable("script lock poisoned".to_string()))?;
            let (script, cursor) = &mut *guard;
            let Some(&byte) = script.get(*cursor).or_else(|| script.last()) else {
                return Err(EntropyError::Unavailable("empty entropy script".to_string()));
            };
            *cursor += 1;
            dest.fill(byte);
            Ok(())
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Strings drawn from the key alphabet, at generated-key length.
    pub fn key_string() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_-]{24}"
    }

    /// Arbitrary printable payloads, most of which are malformed credentials.
    pub fn arbitrary_payload() -> impl Strategy<Value = String> {
        "[ -~]{0,80}"
    }
}

// Re-export commonly used items
pub use mocks::{FailingEntropy, FixedClock, ScriptedEntropy, test_clock};
pub use stores::{
    FlakyTicketStore, InMemoryTicketStore, StalledTicketStore, UnavailableTicketStore,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn scripted_entropy_replays_then_repeats_last() {
        let entropy = ScriptedEntropy::new(vec![1, 2]);
        let mut buf = [0u8; 4];

        assert!(entropy.fill(&mut buf).is_ok());
        assert_eq!(buf, [1; 4]);
        assert!(entropy.fill(&mut buf).is_ok());
        assert_eq!(buf, [2; 4]);
        assert!(entropy.fill(&mut buf).is_ok());
        assert_eq!(buf, [2; 4]);
    }

    #[test]
    fn failing_entropy_fails() {
        let mut buf = [0u8; 4];
        assert!(FailingEntropy.fill(&mut buf).is_err());
    }
}
