//! Key material generation.
//!
//! Each ticket gets two independently drawn keys of equal strength:
//!
//! - **Primary key**: public, travels in every credential
//! - **Secondary key**: secret, keys the signature, never in the QR payload
//!
//! Keys are [`KEY_BYTES`] bytes from the injected [`EntropySource`], rendered as
//! unpadded base64url. The alphabet (`A-Z a-z 0-9 - _`) never contains the QR
//! delimiter `|`.
//!
//! The generator does not check uniqueness. The ticket store rejects a
//! colliding primary key and the issuer regenerates.

use crate::environment::{EntropyError, EntropySource};
use crate::types::{PrimaryKey, SecondaryKey};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::sync::Arc;

/// Random bytes per key (144 bits).
pub const KEY_BYTES: usize = 18;

/// Encoded length of every generated key.
pub const KEY_LENGTH: usize = 24;

/// A freshly drawn pair of ticket keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Public identifier
    pub primary_key: PrimaryKey,
    /// Signing secret
    pub secondary_key: SecondaryKey,
}

/// Generates ticket key material from a secure entropy source.
///
/// # Example
///
/// ```
/// use admission_core::environment::OsEntropy;
/// use admission_core::keys::{KeyMaterialGenerator, KEY_LENGTH};
/// use std::sync::Arc;
///
/// let generator = KeyMaterialGenerator::new(Arc::new(OsEntropy));
/// let keys = generator.generate()?;
/// assert_eq!(keys.primary_key.as_str().len(), KEY_LENGTH);
/// # Ok::<(), admission_core::environment::EntropyError>(())
/// ```
#[derive(Clone)]
pub struct KeyMaterialGenerator {
    entropy: Arc<dyn EntropySource>,
}

impl KeyMaterialGenerator {
    /// Create a generator over the given entropy source.
    #[must_use]
    pub fn new(entropy: Arc<dyn EntropySource>) -> Self {
        Self { entropy }
    }

    /// Draw a new primary/secondary key pair.
    ///
    /// # Errors
    ///
    /// Returns [`EntropyError`] if the entropy source fails. This is a hard
    /// issuance failure; callers must not substitute weaker randomness.
    pub fn generate(&self) -> Result<KeyMaterial, EntropyError> {
        let primary_key = PrimaryKey::new(self.draw()?);
        let secondary_key = SecondaryKey::new(self.draw()?);

        Ok(KeyMaterial {
            primary_key,
            secondary_key,
        })
    }

    fn draw(&self) -> Result<String, EntropyError> {
        let mut bytes = [0u8; KEY_BYTES];
        self.entropy.fill(&mut bytes)?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }
}

impl std::fmt::Debug for KeyMaterialGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterialGenerator").finish_non_exhaustive()
    }
}

/// Whether `s` is non-empty and drawn entirely from the key alphabet.
///
/// Signatures share this alphabet, so the same check guards both QR segments.
#[must_use]
pub fn is_key_alphabet(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
