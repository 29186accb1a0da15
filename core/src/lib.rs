//! # Admission Core
//!
//! Core types and contracts for secure ticket issuance and gate validation.
//!
//! A paid order line becomes one or more single-use admission credentials. This
//! crate holds the pieces of that protocol that do no I/O:
//!
//! - **Key material**: unpredictable public and secret keys per ticket ([`keys`])
//! - **Signer**: HMAC binding a ticket's identity to its issued attributes ([`signer`])
//! - **Credentials**: the QR payload and the manual-entry triple ([`credential`])
//! - **Ticket store contract**: the durable record and its compare-and-set
//!   transitions ([`ticket_store`])
//! - **Environment**: injected clock and entropy source ([`environment`])
//!
//! Storage adapters live in `admission-postgres`, test doubles in
//! `admission-testing`, and the issuer, validator and HTTP surface in
//! `admission-gate`.
//!
//! ## Flow
//!
//! ```text
//! order confirmed ──► KeyMaterialGenerator ──► Signer ──► credential ──► TicketStore (ISSUED)
//!
//! gate scan ──► decode ──► TicketStore lookup ──► Signer::verify ──► compare-and-set (USED)
//! ```

pub use chrono::{DateTime, Utc};

pub mod credential;
pub mod keys;
pub mod signer;
pub mod ticket_store;
pub mod types;

/// Environment module - injected dependencies
///
/// All sources of non-determinism (time, randomness) are abstracted behind
/// traits so that issuance and validation can be driven deterministically in
/// tests.
pub mod environment {
    use chrono::{DateTime, Utc};
    use thiserror::Error;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use admission_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time from the operating system.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// The entropy source could not produce random bytes.
    ///
    /// Issuance treats this as fatal: there is no fallback to a weaker source.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum EntropyError {
        /// The underlying source reported a failure.
        #[error("Entropy source unavailable: {0}")]
        Unavailable(String),
    }

    /// Source of cryptographically secure random bytes.
    pub trait EntropySource: Send + Sync {
        /// Fill `dest` entirely with random bytes.
        ///
        /// # Errors
        ///
        /// Returns [`EntropyError::Unavailable`] if the source cannot be read.
        fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError>;
    }

    /// The operating system CSPRNG (`getrandom` under the hood).
    #[derive(Debug, Clone, Copy, Default)]
    pub struct OsEntropy;

    impl EntropySource for OsEntropy {
        fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
            use rand::RngCore;

            rand::rngs::OsRng
                .try_fill_bytes(dest)
                .map_err(|e| EntropyError::Unavailable(e.to_string()))
        }
    }
}
