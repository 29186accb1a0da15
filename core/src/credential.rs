//! Credential encoding.
//!
//! One ticket, two presentations:
//!
//! - **QR form**: `primary_key|signature`. The only artifact handed to the
//!   holder. It never contains the secondary key.
//! - **Manual form**: the triple `(primary_key, secondary_key, signature)`
//!   typed in by an operator when no scanner is available.
//!
//! Decoding is strict: exactly one delimiter, both segments non-empty and
//! entirely within the key alphabet. Anything else is a
//! [`CredentialError`], never a best-effort guess.

use crate::keys::is_key_alphabet;
use crate::types::{PrimaryKey, SecondaryKey, Signature};
use thiserror::Error;

/// Separator between the QR payload segments. Outside the key alphabet.
pub const QR_DELIMITER: char = '|';

/// Which part of a credential failed to parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialField {
    /// The public identifier
    PrimaryKey,
    /// The signing secret (manual form only)
    SecondaryKey,
    /// The signature
    Signature,
}

impl std::fmt::Display for CredentialField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::PrimaryKey => "primary key",
            Self::SecondaryKey => "secondary key",
            Self::Signature => "signature",
        })
    }
}

/// A credential that cannot be decoded (`MalformedCredential`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The QR payload has no delimiter.
    #[error("credential delimiter missing")]
    MissingDelimiter,

    /// The QR payload has more than one delimiter.
    #[error("credential delimiter repeated")]
    DuplicateDelimiter,

    /// A segment is empty.
    #[error("credential {0} is empty")]
    EmptyField(CredentialField),

    /// A segment contains characters outside the key alphabet.
    #[error("credential {0} contains invalid characters")]
    InvalidCharacters(CredentialField),
}

/// The public, holder-facing credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QrCredential {
    /// Public identifier
    pub primary_key: PrimaryKey,
    /// Signature to verify
    pub signature: Signature,
}

impl QrCredential {
    /// Render as a QR payload string.
    #[must_use]
    pub fn encode(&self) -> String {
        encode_qr(&self.primary_key, &self.signature)
    }
}

/// The operator-entered credential.
///
/// Carries the ticket secret in a human-readable channel, so anyone who reads
/// the triple can present it. The QR form has no such exposure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManualCredential {
    /// Public identifier
    pub primary_key: PrimaryKey,
    /// Signing secret as typed by the operator
    pub secondary_key: SecondaryKey,
    /// Signature to verify
    pub signature: Signature,
}

impl ManualCredential {
    /// Build a manual credential from raw operator input, enforcing the same
    /// alphabet rules as the QR form.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if any field is empty or contains
    /// characters outside the key alphabet.
    pub fn parse(
        primary_key: &str,
        secondary_key: &str,
        signature: &str,
    ) -> Result<Self, CredentialError> {
        check_segment(primary_key, CredentialField::PrimaryKey)?;
        check_segment(secondary_key, CredentialField::SecondaryKey)?;
        check_segment(signature, CredentialField::Signature)?;

        Ok(Self {
            primary_key: PrimaryKey::new(primary_key.to_string()),
            secondary_key: SecondaryKey::new(secondary_key.to_string()),
            signature: Signature::new(signature.to_string()),
        })
    }
}

/// Encode the QR payload `primary_key|signature`.
#[must_use]
pub fn encode_qr(primary_key: &PrimaryKey, signature: &Signature) -> String {
    format!("{}{QR_DELIMITER}{}", primary_key.as_str(), signature.as_str())
}

/// Build the manual-entry triple for a ticket.
#[must_use]
pub fn manual_form(
    primary_key: &PrimaryKey,
    secondary_key: &SecondaryKey,
    signature: &Signature,
) -> ManualCredential {
    ManualCredential {
        primary_key: primary_key.clone(),
        secondary_key: secondary_key.clone(),
        signature: signature.clone(),
    }
}

/// Decode a QR payload into its primary key and signature.
///
/// # Errors
///
/// Returns [`CredentialError`] if the delimiter is missing or repeated, or
/// either segment is empty or outside the key alphabet.
///
/// # Example
///
/// ```
/// use admission_core::credential::decode_qr;
///
/// let credential = decode_qr("abc123|sig")?;
/// assert_eq!(credential.primary_key.as_str(), "abc123");
/// assert_eq!(credential.signature.as_str(), "sig");
/// assert!(decode_qr("nodelimiter").is_err());
/// # Ok::<(), admission_core::credential::CredentialError>(())
/// ```
pub fn decode_qr(payload: &str) -> Result<QrCredential, CredentialError> {
    let mut segments = payload.split(QR_DELIMITER);
    let (Some(primary_key), Some(signature)) = (segments.next(), segments.next()) else {
        return Err(CredentialError::MissingDelimiter);
    };
    if segments.next().is_some() {
        return Err(CredentialError::DuplicateDelimiter);
    }

    check_segment(primary_key, CredentialField::PrimaryKey)?;
    check_segment(signature, CredentialField::Signature)?;

    Ok(QrCredential {
        primary_key: PrimaryKey::new(primary_key.to_string()),
        signature: Signature::new(signature.to_string()),
    })
}

fn check_segment(segment: &str, field: CredentialField) -> Result<(), CredentialError> {
    if segment.is_empty() {
        return Err(CredentialError::EmptyField(field));
    }
    if !is_key_alphabet(segment) {
        return Err(CredentialError::InvalidCharacters(field));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn decode_splits_on_delimiter() {
        let credential = decode_qr("abc123|sig").unwrap();
        assert_eq!(credential.primary_key.as_str(), "abc123");
        assert_eq!(credential.signature.as_str(), "sig");
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let credential = QrCredential {
            primary_key: PrimaryKey::new("Zk3_-9aQ".to_string()),
            signature: Signature::new("A-b_C".to_string()),
        };
        assert_eq!(credential.encode(), "Zk3_-9aQ|A-b_C");
        assert_eq!(decode_qr(&credential.encode()).unwrap(), credential);
    }

    #[test]
    fn missing_delimiter_is_malformed() {
        assert_eq!(
            decode_qr("nodelimiter"),
            Err(CredentialError::MissingDelimiter)
        );
        assert_eq!(decode_qr(""), Err(CredentialError::MissingDelimiter));
    }

    #[test]
    fn duplicate_delimiter_is_malformed() {
        assert_eq!(
            decode_qr("a|b|c"),
            Err(CredentialError::DuplicateDelimiter)
        );
        assert_eq!(decode_qr("a||"), Err(CredentialError::DuplicateDelimiter));
    }

    #[test]
    fn empty_segments_are_malformed() {
        assert_eq!(
            decode_qr("|sig"),
            Err(CredentialError::EmptyField(CredentialField::PrimaryKey))
        );
        assert_eq!(
            decode_qr("abc|"),
            Err(CredentialError::EmptyField(CredentialField::Signature))
        );
    }

    #[test]
    fn foreign_characters_are_malformed() {
        assert_eq!(
            decode_qr("abc 123|sig"),
            Err(CredentialError::InvalidCharacters(CredentialField::PrimaryKey))
        );
        assert_eq!(
            decode_qr("abc123|si=g"),
            Err(CredentialError::InvalidCharacters(CredentialField::Signature))
        );
        assert_eq!(
            decode_qr("abc123|sig\n"),
            Err(CredentialError::InvalidCharacters(CredentialField::Signature))
        );
    }

    #[test]
    fn manual_parse_checks_every_field() {
        assert!(ManualCredential::parse("abc", "def", "ghi").is_ok());
        assert_eq!(
            ManualCredential::parse("abc", "", "ghi"),
            Err(CredentialError::EmptyField(CredentialField::SecondaryKey))
        );
        assert_eq!(
            ManualCredential::parse("abc", "def", "g|i"),
            Err(CredentialError::InvalidCharacters(CredentialField::Signature))
        );
    }

    #[test]
    fn qr_form_never_carries_the_secret() {
        let manual = manual_form(
            &PrimaryKey::new("pub".to_string()),
            &SecondaryKey::new("secret".to_string()),
            &Signature::new("sig".to_string()),
        );
        let qr = encode_qr(&manual.primary_key, &manual.signature);
        assert!(!qr.contains("secret"));
    }
}
