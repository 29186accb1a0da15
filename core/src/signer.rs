//! Ticket signatures.
//!
//! A signature is HMAC-SHA256 keyed by the ticket's secondary key over a
//! canonical, versioned encoding of the signed fields:
//!
//! ```text
//! "admission-ticket-v1" 0x1F primary_key 0x1F event_id 0x1F offer_type_id 0x1F issued_at_micros
//! ```
//!
//! Integers are ASCII decimal; `issued_at` is Unix time in microseconds. The
//! encoding is byte-exact and frozen for version 1: already-issued tickets must
//! keep verifying, so any change needs a new version tag.
//!
//! Signatures are rendered as unpadded base64url (43 characters), the same
//! alphabet as the keys.

use crate::types::{EventId, OfferTypeId, PrimaryKey, SecondaryKey, Signature};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Domain separation tag and canonicalization version.
pub const SIGNATURE_VERSION_TAG: &str = "admission-ticket-v1";

/// Separator between canonical fields (ASCII unit separator).
const FIELD_SEPARATOR: u8 = 0x1F;

/// Encoded length of every signature.
pub const SIGNATURE_LENGTH: usize = 43;

/// Signing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The secondary key is empty or otherwise unusable as a MAC key.
    #[error("invalid signing key")]
    InvalidKey,
}

/// The ticket attributes bound by a signature.
#[derive(Clone, Copy, Debug)]
pub struct SignedFields<'a> {
    /// Public identifier
    pub primary_key: &'a PrimaryKey,
    /// Catalog event
    pub event_id: EventId,
    /// Catalog offer type
    pub offer_type_id: OfferTypeId,
    /// Issuance timestamp
    pub issued_at: DateTime<Utc>,
}

impl SignedFields<'_> {
    /// Canonical version-1 message bytes.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(96);
        message.extend_from_slice(SIGNATURE_VERSION_TAG.as_bytes());
        message.push(FIELD_SEPARATOR);
        message.extend_from_slice(self.primary_key.as_str().as_bytes());
        message.push(FIELD_SEPARATOR);
        message.extend_from_slice(self.event_id.get().to_string().as_bytes());
        message.push(FIELD_SEPARATOR);
        message.extend_from_slice(self.offer_type_id.get().to_string().as_bytes());
        message.push(FIELD_SEPARATOR);
        message.extend_from_slice(self.issued_at.timestamp_micros().to_string().as_bytes());
        message
    }
}

/// Computes and verifies ticket signatures. Stateless.
#[derive(Clone, Copy, Debug, Default)]
pub struct Signer;

impl Signer {
    /// Create a signer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Sign the given fields with the ticket's secondary key.
    ///
    /// Deterministic: the same inputs always yield the same signature.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::InvalidKey`] if the secondary key is empty.
    pub fn sign(
        &self,
        fields: &SignedFields<'_>,
        secondary_key: &SecondaryKey,
    ) -> Result<Signature, SignerError> {
        let tag = Self::mac(fields, secondary_key)?;
        Ok(Signature::new(URL_SAFE_NO_PAD.encode(tag)))
    }

    /// Check a candidate signature against the given fields.
    ///
    /// The tag comparison runs in constant time with respect to its content.
    /// Any malformed candidate (bad base64, wrong length) or unusable key
    /// yields `false`.
    #[must_use]
    pub fn verify(
        &self,
        candidate: &Signature,
        fields: &SignedFields<'_>,
        secondary_key: &SecondaryKey,
    ) -> bool {
        let Ok(candidate_tag) = URL_SAFE_NO_PAD.decode(candidate.as_str()) else {
            return false;
        };
        let Ok(expected_tag) = Self::mac(fields, secondary_key) else {
            return false;
        };

        constant_time_eq::constant_time_eq(&expected_tag, &candidate_tag)
    }

    fn mac(fields: &SignedFields<'_>, secondary_key: &SecondaryKey) -> Result<Vec<u8>, SignerError> {
        let key = secondary_key.expose().as_bytes();
        if key.is_empty() {
            return Err(SignerError::InvalidKey);
        }

        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SignerError::InvalidKey)?;
        mac.update(&fields.canonical_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
