use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;

use aperture_core::{ClaimId, LedgerError};
use aperture_idempotency::{ClaimDecision, ClaimKey, ClaimStatus, IdempotencyClaim, RequestHash};

use super::ClaimStore;

#[derive(Debug, Default)]
struct Inner {
    claims: HashMap<ClaimKey, IdempotencyClaim>,
    by_id: HashMap<ClaimId, ClaimKey>,
}

/// In-memory claim store.
///
/// Intended for tests/dev. The write lock stands in for the database's
/// uniqueness constraint: acquire and finalize are atomic under it.
#[derive(Debug)]
pub struct InMemoryClaimStore {
    expiry: Option<chrono::Duration>,
    inner: RwLock<Inner>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self {
            expiry: None,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Allow a `Processing` claim older than `expiry` to be re-acquired.
    ///
    /// Without this the store fails closed forever on a crashed holder,
    /// which is the correct default for financial operations.
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            expiry: chrono::Duration::from_std(expiry).ok(),
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryClaimStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn claim(
        &self,
        key: ClaimKey,
        request_hash: RequestHash,
    ) -> Result<ClaimDecision, LedgerError> {
        key.validate()?;

        let now = Utc::now();
        let mut inner = self
            .inner
            .write()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        let inner = &mut *inner;
        let existing = match inner.claims.entry(key) {
            Entry::Vacant(slot) => {
                let claim =
                    IdempotencyClaim::processing(slot.key().clone(), request_hash, now);
                let claim_id = claim.id;
                inner.by_id.insert(claim_id, slot.key().clone());
                slot.insert(claim);
                return Ok(ClaimDecision::Acquired { claim_id });
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        existing.last_seen_at = now;

        if existing.request_hash != request_hash {
            return Ok(ClaimDecision::Conflict);
        }

        match existing.status {
            ClaimStatus::Processing => {
                let expired = self
                    .expiry
                    .map(|ttl| now - existing.created_at >= ttl)
                    .unwrap_or(false);
                if expired {
                    // Take over the abandoned attempt under the same id.
                    existing.created_at = now;
                    existing.response_code = None;
                    existing.response_payload = None;
                    existing.error_payload = None;
                    Ok(ClaimDecision::Acquired {
                        claim_id: existing.id,
                    })
                } else {
                    Ok(ClaimDecision::InProgress)
                }
            }
            status => Ok(ClaimDecision::Replay {
                status,
                response_code: existing.response_code,
                payload: existing.replay_payload().cloned(),
            }),
        }
    }

    async fn finalize(
        &self,
        claim_id: ClaimId,
        status: ClaimStatus,
        response_code: Option<u16>,
        payload: Option<JsonValue>,
    ) -> Result<(), LedgerError> {
        if !status.is_terminal() {
            return Err(LedgerError::invalid_argument(
                "finalize requires a terminal status",
            ));
        }

        let mut inner = self
            .inner
            .write()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        let key = inner
            .by_id
            .get(&claim_id)
            .cloned()
            .ok_or(LedgerError::NotFound)?;
        let claim = inner.claims.get_mut(&key).ok_or(LedgerError::NotFound)?;

        match claim.status {
            ClaimStatus::Processing => {
                claim.status = status;
                claim.response_code = response_code;
                match status {
                    ClaimStatus::Completed => claim.response_payload = payload,
                    ClaimStatus::Failed => claim.error_payload = payload,
                    ClaimStatus::Processing => unreachable!("terminal checked above"),
                }
                claim.last_seen_at = Utc::now();
                Ok(())
            }
            current if current == status => Ok(()),
            _ => Err(LedgerError::IdempotencyConflict),
        }
    }

    async fn get(&self, key: &ClaimKey) -> Result<Option<IdempotencyClaim>, LedgerError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;
        Ok(inner.claims.get(key).cloned())
    }
}
