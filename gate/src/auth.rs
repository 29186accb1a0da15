//! Caller authorization.
//!
//! Two kinds of caller reach the API:
//!
//! - **Admission operators** (gate devices), resolved through an
//!   [`OperatorDirectory`] to the [`OperatorId`] recorded on every admission
//! - **The issuer**: the order/payment subsystem, holding one shared token
//!
//! Provides Axum extractors for both. A missing or malformed header is a 401;
//! a token that resolves to nobody is a 403 `FORBIDDEN`. Neither can be
//! confused with a validation reason, which always comes back in a
//! validation body.
//!
//! # Usage
//!
//! ```rust,ignore
//! async fn validate(operator: AuthenticatedOperator) -> ... {
//!     validator.validate(credential, &operator.0).await
//! }
//! ```

use crate::api::error::ApiError;
use crate::server::state::AppState;
use admission_core::types::OperatorId;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Resolves bearer tokens to admission operators.
///
/// The identity system itself lives outside this service; implementations
/// adapt whatever it exposes.
pub trait OperatorDirectory: Send + Sync {
    /// The operator holding `token`, if any.
    fn resolve(&self, token: &str) -> Option<OperatorId>;
}

/// Operator directory backed by a fixed token table.
pub struct StaticOperatorDirectory {
    tokens: Vec<(String, OperatorId)>,
}

impl StaticOperatorDirectory {
    /// Create a directory from `(token, operator)` pairs.
    #[must_use]
    pub const fn new(tokens: Vec<(String, OperatorId)>) -> Self {
        Self { tokens }
    }
}

impl std::fmt::Debug for StaticOperatorDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticOperatorDirectory")
            .field("operators", &self.tokens.len())
            .finish()
    }
}

impl OperatorDirectory for StaticOperatorDirectory {
    fn resolve(&self, token: &str) -> Option<OperatorId> {
        // Compare against every entry so the scan time does not reveal which
        // entry matched.
        let mut found = None;
        for (candidate, operator) in &self.tokens {
            if constant_time_eq::constant_time_eq(candidate.as_bytes(), token.as_bytes()) {
                found = Some(operator.clone());
            }
        }
        found
    }
}

/// Bearer token extracted from `Authorization: Bearer <token>` header.
#[derive(Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::unauthorized("Invalid authorization format. Expected 'Bearer <token>'")
        })?;

        if token.is_empty() {
            return Err(ApiError::unauthorized("Empty bearer token"));
        }

        Ok(Self(token.to_string()))
    }
}

/// Authenticated admission operator.
///
/// Use as a handler parameter to require an operator token.
#[derive(Debug, Clone)]
pub struct AuthenticatedOperator(pub OperatorId);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedOperator {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = BearerToken::from_request_parts(parts, state).await?;

        state.operators.resolve(&bearer.0).map(Self).ok_or_else(|| {
            tracing::warn!(path = %parts.uri.path(), "Unknown operator token");
            ApiError::forbidden("Caller is not an admission operator")
        })
    }
}

/// Authenticated order/payment subsystem.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedIssuer;

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedIssuer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = BearerToken::from_request_parts(parts, state).await?;

        let authorized = state.issuer_token.as_deref().is_some_and(|expected| {
            constant_time_eq::constant_time_eq(expected.as_bytes(), bearer.0.as_bytes())
        });

        if authorized {
            Ok(Self)
        } else {
            tracing::warn!(path = %parts.uri.path(), "Unknown issuer token");
            Err(ApiError::forbidden("Caller is not the ticket issuer"))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn directory() -> StaticOperatorDirectory {
        StaticOperatorDirectory::new(vec![
            ("tok-a".to_string(), OperatorId::parse("gate-1").unwrap()),
            ("tok-b".to_string(), OperatorId::parse("gate-2").unwrap()),
        ])
    }

    #[test]
    fn resolves_known_tokens() {
        let directory = directory();
        assert_eq!(directory.resolve("tok-b").unwrap().as_str(), "gate-2");
        assert_eq!(directory.resolve("tok-a").unwrap().as_str(), "gate-1");
    }

    #[test]
    fn unknown_and_prefix_tokens_resolve_to_nobody() {
        let directory = directory();
        assert!(directory.resolve("tok").is_none());
        assert!(directory.resolve("tok-a-extra").is_none());
        assert!(directory.resolve("").is_none());
    }

    #[test]
    fn debug_hides_tokens() {
        assert!(!format!("{:?}", directory()).contains("tok-a"));
    }
}
