//! Claim records and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use aperture_core::{ClaimId, LedgerError, LedgerResult};

use crate::hash::RequestHash;

/// Claim lifecycle state.
///
/// `Processing → Completed` or `Processing → Failed`, exactly once. Both
/// terminal states replay their stored payload on repeated calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Processing,
    Completed,
    Failed,
}

impl ClaimStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from an untyped boundary (storage row).
    pub fn parse(s: &str) -> LedgerResult<Self> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(LedgerError::invalid_argument(format!(
                "unknown claim status: {other}"
            ))),
        }
    }
}

/// Unique identity of a claim: one guarded operation, one actor, one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimKey {
    /// Name of the guarded operation, e.g. `subscription.checkout.create`.
    pub operation_scope: String,
    pub actor_id: String,
    pub idempotency_key: String,
}

impl ClaimKey {
    pub fn new(
        operation_scope: impl Into<String>,
        actor_id: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            operation_scope: operation_scope.into(),
            actor_id: actor_id.into(),
            idempotency_key: idempotency_key.into(),
        }
    }

    /// All three components are required; a blank component would collapse
    /// distinct operations onto one claim row.
    pub fn validate(&self) -> LedgerResult<()> {
        for (field, value) in [
            ("operation_scope", &self.operation_scope),
            ("actor_id", &self.actor_id),
            ("idempotency_key", &self.idempotency_key),
        ] {
            if value.trim().is_empty() {
                return Err(LedgerError::invalid_argument(format!(
                    "{field} must be non-empty"
                )));
            }
        }
        Ok(())
    }
}

/// A stored claim row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyClaim {
    pub id: ClaimId,
    pub key: ClaimKey,
    pub request_hash: RequestHash,
    pub status: ClaimStatus,
    pub response_code: Option<u16>,
    pub response_payload: Option<JsonValue>,
    pub error_payload: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl IdempotencyClaim {
    /// Fresh claim in `Processing`, as inserted by a successful acquire.
    pub fn processing(key: ClaimKey, request_hash: RequestHash, now: DateTime<Utc>) -> Self {
        Self {
            id: ClaimId::new(),
            key,
            request_hash,
            status: ClaimStatus::Processing,
            response_code: None,
            response_payload: None,
            error_payload: None,
            created_at: now,
            last_seen_at: now,
        }
    }

    /// The payload a repeated call replays: the stored response for
    /// completed claims, the stored error for failed ones.
    pub fn replay_payload(&self) -> Option<&JsonValue> {
        match self.status {
            ClaimStatus::Completed => self.response_payload.as_ref(),
            ClaimStatus::Failed => self.error_payload.as_ref(),
            ClaimStatus::Processing => None,
        }
    }
}

/// Outcome of a `claim` call. Exactly one caller per key ever sees
/// `Acquired`; everyone else is told what to do instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimDecision {
    /// This caller owns the operation and must eventually finalize.
    Acquired { claim_id: ClaimId },
    /// Same key, different request hash: the key was reused for a
    /// semantically different request. Never executed.
    Conflict,
    /// Another attempt with this key is mid-flight. Retry with backoff.
    InProgress,
    /// The operation already reached a terminal state; return the stored
    /// result verbatim, re-executing nothing.
    Replay {
        status: ClaimStatus,
        response_code: Option<u16>,
        payload: Option<JsonValue>,
    },
}

impl ClaimDecision {
    /// Fold a non-acquired decision into the error taxonomy, for callers
    /// that treat anything but a fresh acquire as a request-level failure.
    pub fn into_acquired(self) -> LedgerResult<ClaimId> {
        match self {
            Self::Acquired { claim_id } => Ok(claim_id),
            Self::Conflict => Err(LedgerError::IdempotencyConflict),
            Self::InProgress => Err(LedgerError::IdempotencyInProgress),
            Self::Replay { .. } => Err(LedgerError::IdempotencyConflict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> ClaimKey {
        ClaimKey::new("subscription.checkout.create", "user1", "idem-1")
    }

    #[test]
    fn processing_is_the_only_non_terminal_status() {
        assert!(!ClaimStatus::Processing.is_terminal());
        assert!(ClaimStatus::Completed.is_terminal());
        assert!(ClaimStatus::Failed.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ClaimStatus::Processing,
            ClaimStatus::Completed,
            ClaimStatus::Failed,
        ] {
            assert_eq!(ClaimStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ClaimStatus::parse("done").is_err());
    }

    #[test]
    fn blank_key_components_are_rejected() {
        let mut k = key();
        k.actor_id = "".to_string();
        assert_eq!(k.validate().unwrap_err().code(), "invalid_argument");
        key().validate().unwrap();
    }

    #[test]
    fn replay_payload_follows_terminal_state() {
        let now = Utc::now();
        let mut claim =
            IdempotencyClaim::processing(key(), RequestHash::of(&json!({"a": 1})), now);
        assert_eq!(claim.replay_payload(), None);

        claim.status = ClaimStatus::Completed;
        claim.response_payload = Some(json!({"checkoutUrl": "https://pay.example/s1"}));
        claim.error_payload = Some(json!({"unused": true}));
        assert_eq!(
            claim.replay_payload(),
            Some(&json!({"checkoutUrl": "https://pay.example/s1"}))
        );

        claim.status = ClaimStatus::Failed;
        assert_eq!(claim.replay_payload(), Some(&json!({"unused": true})));
    }

    #[test]
    fn into_acquired_maps_to_error_taxonomy() {
        assert_eq!(
            ClaimDecision::Conflict.into_acquired().unwrap_err().code(),
            "idempotency_conflict"
        );
        assert_eq!(
            ClaimDecision::InProgress.into_acquired().unwrap_err().code(),
            "idempotency_in_progress"
        );
        let id = ClaimId::new();
        assert_eq!(
            ClaimDecision::Acquired { claim_id: id }.into_acquired().unwrap(),
            id
        );
    }
}
