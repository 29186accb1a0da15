//! Gate validation.
//!
//! Each attempt walks a fixed sequence of stages:
//!
//! ```text
//! Received -> Decoded -> LookedUp -> SignatureChecked -> Transitioned -> {Accepted | Rejected}
//! ```
//!
//! The [`Validator`] holds no mutable state. The only synchronization is the
//! store's compare-and-set transition, so any number of validators may run
//! against one shared store. A lost race on that transition is reported as
//! [`RejectionReason::AlreadyUsed`], never as an internal error.
//!
//! Rejections are values, not errors: every terminal state is a
//! [`ValidationOutcome`]. Only [`RejectionReason::StoreUnavailable`] may be
//! retried by the caller.

use admission_core::credential::{CredentialError, ManualCredential, decode_qr};
use admission_core::environment::Clock;
use admission_core::signer::{SignedFields, Signer};
use admission_core::ticket_store::{StoreFuture, TicketStore, TicketStoreError, Transition};
use admission_core::types::{
    EventId, OfferTypeId, OperatorId, PrimaryKey, SecondaryKey, Signature, Ticket, TicketId,
    TicketStatus,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Operator-entered triple, unparsed.
#[derive(Clone, PartialEq, Eq)]
pub struct ManualEntry {
    /// Public identifier as typed
    pub primary_key: String,
    /// Ticket secret as typed
    pub secondary_key: String,
    /// Signature as typed
    pub signature: String,
}

impl std::fmt::Debug for ManualEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualEntry")
            .field("primary_key", &self.primary_key)
            .field("secondary_key", &"<redacted>")
            .field("signature", &self.signature)
            .finish()
    }
}

/// A credential presented at the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Scanned `primary_key|signature` payload
    Qr(String),
    /// Typed-in triple
    Manual(ManualEntry),
}

impl Credential {
    /// Which entry path this credential came through.
    #[must_use]
    pub const fn path(&self) -> CredentialPath {
        match self {
            Self::Qr(_) => CredentialPath::Qr,
            Self::Manual(_) => CredentialPath::Manual,
        }
    }
}

/// Entry path of a credential, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPath {
    /// Scanner
    Qr,
    /// Operator keyboard
    Manual,
}

impl CredentialPath {
    /// Label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Qr => "qr",
            Self::Manual => "manual",
        }
    }
}

/// Stages of one validation attempt.
///
/// A rejection records the last stage the attempt completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStage {
    /// Credential accepted for processing
    Received,
    /// Credential parsed into its fields
    Decoded,
    /// Ticket record loaded
    LookedUp,
    /// Signature verified against the stored secret
    SignatureChecked,
    /// Compare-and-set applied
    Transitioned,
}

impl ValidationStage {
    /// Label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Decoded => "decoded",
            Self::LookedUp => "looked_up",
            Self::SignatureChecked => "signature_checked",
            Self::Transitioned => "transitioned",
        }
    }
}

/// Why a credential was not admitted.
///
/// Each reason calls for a different operator response, so they are never
/// collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The credential could not be decoded.
    MalformedCredential,
    /// No ticket carries this primary key.
    UnknownTicket,
    /// The signature or secret does not match the stored ticket.
    InvalidSignature,
    /// The ticket was already admitted (including a lost race).
    AlreadyUsed,
    /// The ticket was refunded or cancelled.
    TicketVoided,
    /// The store failed or timed out.
    StoreUnavailable,
}

impl RejectionReason {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MalformedCredential => "MALFORMED_CREDENTIAL",
            Self::UnknownTicket => "UNKNOWN_TICKET",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::AlreadyUsed => "ALREADY_USED",
            Self::TicketVoided => "TICKET_VOIDED",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    /// Operator-facing message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::MalformedCredential => "Credential could not be read. Rescan or re-enter it.",
            Self::UnknownTicket => "No such ticket. Deny entry.",
            Self::InvalidSignature => "Ticket failed verification. Escalate to security.",
            Self::AlreadyUsed => "Ticket already admitted. Check for a duplicate scan.",
            Self::TicketVoided => "Ticket was cancelled. Deny entry.",
            Self::StoreUnavailable => "Ticket service unavailable. Retry.",
        }
    }

    /// Whether the caller may retry the same credential.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable)
    }
}

/// What the gate display needs about an admitted ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionSummary {
    /// Store-assigned id, shown as the ticket number
    pub ticket_id: TicketId,
    /// Catalog event
    pub event_id: EventId,
    /// Catalog offer type
    pub offer_type_id: OfferTypeId,
    /// Event title copied at issuance
    pub event_title: Option<String>,
}

impl From<&Ticket> for AdmissionSummary {
    fn from(ticket: &Ticket) -> Self {
        Self {
            ticket_id: ticket.ticket_id,
            event_id: ticket.event_id,
            offer_type_id: ticket.offer_type_id,
            event_title: ticket.event_title.clone(),
        }
    }
}

/// Record of an earlier admission, shown with `AlreadyUsed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorUse {
    /// When the ticket was admitted
    pub used_at: Option<DateTime<Utc>>,
    /// Who admitted it
    pub validated_by: Option<OperatorId>,
}

/// A rejected attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Why
    pub reason: RejectionReason,
    /// Last stage completed
    pub stage: ValidationStage,
    /// The ticket, once looked up
    pub ticket_id: Option<TicketId>,
    /// Earlier admission, for `AlreadyUsed`
    pub prior_use: Option<PriorUse>,
}

/// Terminal state of one validation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Admit the holder.
    Accepted {
        /// Gate display data
        summary: AdmissionSummary,
        /// When the admission was recorded
        used_at: DateTime<Utc>,
    },
    /// Do not admit.
    Rejected(Rejection),
}

impl ValidationOutcome {
    /// Whether the holder is admitted.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// The rejection reason, if rejected.
    #[must_use]
    pub const fn reason(&self) -> Option<RejectionReason> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected(rejection) => Some(rejection.reason),
        }
    }

    const fn reject(reason: RejectionReason, stage: ValidationStage) -> Self {
        Self::Rejected(Rejection {
            reason,
            stage,
            ticket_id: None,
            prior_use: None,
        })
    }

    fn reject_ticket(reason: RejectionReason, stage: ValidationStage, ticket: &Ticket) -> Self {
        let prior_use = (reason == RejectionReason::AlreadyUsed).then(|| PriorUse {
            used_at: ticket.used_at,
            validated_by: ticket.validated_by.clone(),
        });

        Self::Rejected(Rejection {
            reason,
            stage,
            ticket_id: Some(ticket.ticket_id),
            prior_use,
        })
    }
}

/// Fields recovered from a credential.
struct Decoded {
    primary_key: PrimaryKey,
    signature: Signature,
    submitted_secret: Option<SecondaryKey>,
}

/// Stateless credential validator.
#[derive(Clone)]
pub struct Validator {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    signer: Signer,
    store_timeout: Duration,
}

impl Validator {
    /// Create a validator. Every store call is bounded by `store_timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>, store_timeout: Duration) -> Self {
        Self {
            store,
            clock,
            signer: Signer::new(),
            store_timeout,
        }
    }

    /// Validate a credential on behalf of `operator` and, if it is good,
    /// admit the ticket.
    pub async fn validate(&self, credential: Credential, operator: &OperatorId) -> ValidationOutcome {
        let started = Instant::now();
        let path = credential.path();

        let outcome = self.run(credential, operator).await;

        metrics::histogram!("admission_validation_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        record(&outcome, path, operator);
        outcome
    }

    async fn run(&self, credential: Credential, operator: &OperatorId) -> ValidationOutcome {
        // Received -> Decoded
        let decoded = match decode(credential) {
            Ok(decoded) => decoded,
            Err(error) => {
                tracing::debug!(error = %error, "Credential rejected at decode");
                return ValidationOutcome::reject(
                    RejectionReason::MalformedCredential,
                    ValidationStage::Received,
                );
            }
        };

        // Decoded -> LookedUp
        let lookup = self.call(self.store.get_by_primary_key(&decoded.primary_key)).await;
        let ticket = match lookup {
            Ok(ticket) => ticket,
            Err(TicketStoreError::NotFound) => {
                return ValidationOutcome::reject(
                    RejectionReason::UnknownTicket,
                    ValidationStage::Decoded,
                );
            }
            Err(error) => {
                return ValidationOutcome::reject(
                    store_failure(&error, None),
                    ValidationStage::Decoded,
                );
            }
        };

        // LookedUp -> SignatureChecked
        if !self.signature_matches(&decoded, &ticket) {
            return ValidationOutcome::reject_ticket(
                RejectionReason::InvalidSignature,
                ValidationStage::LookedUp,
                &ticket,
            );
        }

        // SignatureChecked -> Transitioned
        match ticket.status {
            TicketStatus::Void => {
                return ValidationOutcome::reject_ticket(
                    RejectionReason::TicketVoided,
                    ValidationStage::SignatureChecked,
                    &ticket,
                );
            }
            TicketStatus::Used => {
                return ValidationOutcome::reject_ticket(
                    RejectionReason::AlreadyUsed,
                    ValidationStage::SignatureChecked,
                    &ticket,
                );
            }
            TicketStatus::Issued => {}
        }

        let used_at = self.clock.now();
        let transition = self
            .call(self.store.transition_to_used(ticket.ticket_id, operator, used_at))
            .await;

        match transition {
            Ok(Transition::Applied(used)) => ValidationOutcome::Accepted {
                summary: AdmissionSummary::from(&used),
                used_at: used.used_at.unwrap_or(used_at),
            },
            Ok(Transition::Conflict(current)) => {
                let reason = if current.status == TicketStatus::Void {
                    RejectionReason::TicketVoided
                } else {
                    RejectionReason::AlreadyUsed
                };
                ValidationOutcome::reject_ticket(reason, ValidationStage::SignatureChecked, &current)
            }
            Err(error) => ValidationOutcome::Rejected(Rejection {
                reason: store_failure(&error, Some(ticket.ticket_id)),
                stage: ValidationStage::SignatureChecked,
                ticket_id: Some(ticket.ticket_id),
                prior_use: None,
            }),
        }
    }

    /// QR path: verify with the stored secret. Manual path: the submitted
    /// secret must equal the stored one, then verify.
    fn signature_matches(&self, decoded: &Decoded, ticket: &Ticket) -> bool {
        if let Some(submitted) = &decoded.submitted_secret {
            if !constant_time_eq::constant_time_eq(
                submitted.expose().as_bytes(),
                ticket.secondary_key.expose().as_bytes(),
            ) {
                return false;
            }
        }

        let fields = SignedFields {
            primary_key: &ticket.primary_key,
            event_id: ticket.event_id,
            offer_type_id: ticket.offer_type_id,
            issued_at: ticket.issued_at,
        };
        self.signer
            .verify(&decoded.signature, &fields, &ticket.secondary_key)
    }

    async fn call<T>(&self, operation: StoreFuture<'_, T>) -> Result<T, TicketStoreError> {
        match tokio::time::timeout(self.store_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(TicketStoreError::Unavailable(format!(
                "store call exceeded {}ms",
                self.store_timeout.as_millis()
            ))),
        }
    }
}

fn decode(credential: Credential) -> Result<Decoded, CredentialError> {
    match credential {
        Credential::Qr(payload) => {
            let qr = decode_qr(&payload)?;
            Ok(Decoded {
                primary_key: qr.primary_key,
                signature: qr.signature,
                submitted_secret: None,
            })
        }
        Credential::Manual(entry) => {
            let manual =
                ManualCredential::parse(&entry.primary_key, &entry.secondary_key, &entry.signature)?;
            Ok(Decoded {
                primary_key: manual.primary_key,
                signature: manual.signature,
                submitted_secret: Some(manual.secondary_key),
            })
        }
    }
}

/// Classify a store failure during validation.
///
/// A corrupt record cannot be trusted to verify, so it is reported like a
/// failed signature. Everything else is an outage.
fn store_failure(error: &TicketStoreError, ticket_id: Option<TicketId>) -> RejectionReason {
    let ticket_id = ticket_id.map(TicketId::get);
    if let TicketStoreError::Corrupt(detail) = error {
        tracing::error!(
            ticket_id,
            security_event = "record_corrupt",
            error = %detail,
            "Corrupt ticket record during validation"
        );
        return RejectionReason::InvalidSignature;
    }

    tracing::error!(ticket_id, error = %error, "Ticket store failed during validation");
    RejectionReason::StoreUnavailable
}

fn record(outcome: &ValidationOutcome, path: CredentialPath, operator: &OperatorId) {
    match outcome {
        ValidationOutcome::Accepted { summary, .. } => {
            metrics::counter!(
                "admission_validations_total",
                "outcome" => "accepted",
                "reason" => "ADMITTED"
            )
            .increment(1);
            tracing::info!(
                ticket_id = summary.ticket_id.get(),
                event_id = summary.event_id.get(),
                operator_id = %operator,
                path = path.as_str(),
                "Ticket admitted"
            );
        }
        ValidationOutcome::Rejected(rejection) => {
            metrics::counter!(
                "admission_validations_total",
                "outcome" => "rejected",
                "reason" => rejection.reason.code()
            )
            .increment(1);

            let ticket_id = rejection.ticket_id.map(TicketId::get);
            let reason = rejection.reason.code();
            let stage = rejection.stage.as_str();
            if rejection.reason == RejectionReason::InvalidSignature {
                tracing::warn!(
                    ticket_id,
                    operator_id = %operator,
                    path = path.as_str(),
                    reason,
                    stage,
                    security_event = "tamper_suspected",
                    "Ticket rejected"
                );
            } else {
                tracing::info!(
                    ticket_id,
                    operator_id = %operator,
                    path = path.as_str(),
                    reason,
                    stage,
                    "Ticket rejected"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use admission_testing::fixtures::seed_ticket;
    use admission_testing::{InMemoryTicketStore, StalledTicketStore, UnavailableTicketStore, test_clock};

    fn operator() -> OperatorId {
        OperatorId::parse("gate-north-1").unwrap()
    }

    fn validator(store: Arc<dyn TicketStore>) -> Validator {
        Validator::new(store, Arc::new(test_clock()), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn admits_then_reports_prior_use() {
        let store = InMemoryTicketStore::new();
        let seeded = seed_ticket(&store, &test_clock(), 42, 3).await;
        let validator = validator(Arc::new(store));

        let first = validator
            .validate(Credential::Qr(seeded.qr_payload.clone()), &operator())
            .await;
        let ValidationOutcome::Accepted { summary, .. } = first else {
            unreachable!("first scan must admit");
        };
        assert_eq!(summary.event_id, EventId::new(42));
        assert_eq!(summary.ticket_id, seeded.ticket_id);

        let second = validator
            .validate(Credential::Qr(seeded.qr_payload), &operator())
            .await;
        let ValidationOutcome::Rejected(rejection) = second else {
            unreachable!("second scan must reject");
        };
        assert_eq!(rejection.reason, RejectionReason::AlreadyUsed);
        let prior = rejection.prior_use.unwrap();
        assert_eq!(prior.validated_by, Some(operator()));
        assert_eq!(prior.used_at, Some(test_clock().now()));
    }

    #[tokio::test]
    async fn malformed_payload_never_reaches_store() {
        let validator = validator(Arc::new(UnavailableTicketStore));

        let outcome = validator
            .validate(Credential::Qr("nodelimiter".to_string()), &operator())
            .await;

        assert_eq!(outcome.reason(), Some(RejectionReason::MalformedCredential));
    }

    #[tokio::test]
    async fn unknown_key_is_unknown_ticket() {
        let validator = validator(Arc::new(InMemoryTicketStore::new()));

        let outcome = validator
            .validate(Credential::Qr("abc123|sig".to_string()), &operator())
            .await;

        assert_eq!(outcome.reason(), Some(RejectionReason::UnknownTicket));
    }

    #[tokio::test]
    async fn tampered_signature_is_invalid() {
        let store = InMemoryTicketStore::new();
        let seeded = seed_ticket(&store, &test_clock(), 42, 3).await;
        let validator = validator(Arc::new(store.clone()));

        let forged = format!("{}|{}", seeded.primary_key, "A".repeat(43));
        let outcome = validator.validate(Credential::Qr(forged), &operator()).await;

        assert_eq!(outcome.reason(), Some(RejectionReason::InvalidSignature));
        assert_eq!(
            store.snapshot(seeded.ticket_id).unwrap().status,
            TicketStatus::Issued
        );
    }

    #[tokio::test]
    async fn manual_entry_admits_with_matching_secret() {
        let store = InMemoryTicketStore::new();
        let seeded = seed_ticket(&store, &test_clock(), 42, 3).await;
        let validator = validator(Arc::new(store));

        let outcome = validator
            .validate(
                Credential::Manual(ManualEntry {
                    primary_key: seeded.primary_key.to_string(),
                    secondary_key: seeded.secondary_key.expose().to_string(),
                    signature: seeded.signature.to_string(),
                }),
                &operator(),
            )
            .await;

        assert!(outcome.is_accepted());
    }

    #[tokio::test]
    async fn manual_entry_with_wrong_secret_is_invalid() {
        let store = InMemoryTicketStore::new();
        let seeded = seed_ticket(&store, &test_clock(), 42, 3).await;
        let validator = validator(Arc::new(store.clone()));

        let outcome = validator
            .validate(
                Credential::Manual(ManualEntry {
                    primary_key: seeded.primary_key.to_string(),
                    secondary_key: "not-the-secret".to_string(),
                    signature: seeded.signature.to_string(),
                }),
                &operator(),
            )
            .await;

        assert_eq!(outcome.reason(), Some(RejectionReason::InvalidSignature));
        assert_eq!(
            store.snapshot(seeded.ticket_id).unwrap().status,
            TicketStatus::Issued
        );
    }

    #[tokio::test]
    async fn voided_ticket_is_rejected() {
        let store = InMemoryTicketStore::new();
        let seeded = seed_ticket(&store, &test_clock(), 42, 3).await;
        store.void(seeded.ticket_id, test_clock().now()).await.unwrap();
        let validator = validator(Arc::new(store));

        let outcome = validator
            .validate(Credential::Qr(seeded.qr_payload), &operator())
            .await;

        assert_eq!(outcome.reason(), Some(RejectionReason::TicketVoided));
    }

    #[tokio::test]
    async fn altered_stored_attributes_fail_verification() {
        let store = InMemoryTicketStore::new();
        let seeded = seed_ticket(&store, &test_clock(), 42, 3).await;
        let mut record = store.snapshot(seeded.ticket_id).unwrap();
        record.event_id = EventId::new(43);
        store.overwrite(record);
        let validator = validator(Arc::new(store));

        let outcome = validator
            .validate(Credential::Qr(seeded.qr_payload), &operator())
            .await;

        assert_eq!(outcome.reason(), Some(RejectionReason::InvalidSignature));
    }

    #[tokio::test]
    async fn outage_is_retryable_store_unavailable() {
        let validator = validator(Arc::new(UnavailableTicketStore));

        let outcome = validator
            .validate(Credential::Qr("abc123|sig".to_string()), &operator())
            .await;

        let reason = outcome.reason().unwrap();
        assert_eq!(reason, RejectionReason::StoreUnavailable);
        assert!(reason.is_retryable());
    }

    #[tokio::test]
    async fn stalled_transition_times_out() {
        let store = InMemoryTicketStore::new();
        let seeded = seed_ticket(&store, &test_clock(), 42, 3).await;
        let validator = validator(Arc::new(StalledTicketStore::new(store.clone())));

        let outcome = validator
            .validate(Credential::Qr(seeded.qr_payload), &operator())
            .await;

        assert_eq!(outcome.reason(), Some(RejectionReason::StoreUnavailable));
        assert_eq!(
            store.snapshot(seeded.ticket_id).unwrap().status,
            TicketStatus::Issued
        );
    }

    #[test]
    fn only_store_unavailable_is_retryable() {
        let reasons = [
            RejectionReason::MalformedCredential,
            RejectionReason::UnknownTicket,
            RejectionReason::InvalidSignature,
            RejectionReason::AlreadyUsed,
            RejectionReason::TicketVoided,
        ];
        assert!(reasons.iter().all(|r| !r.is_retryable()));
        assert!(RejectionReason::StoreUnavailable.is_retryable());
    }

    #[test]
    fn manual_entry_debug_hides_secret() {
        let entry = ManualEntry {
            primary_key: "pk".to_string(),
            secondary_key: "hunter2".to_string(),
            signature: "sig".to_string(),
        };
        assert!(!format!("{entry:?}").contains("hunter2"));
    }
}
