//! Idempotency claim storage.
//!
//! Claim-acquire is a single atomic insert; finalize is a single atomic
//! update keyed by claim id. Under N concurrent callers with the same key,
//! exactly one acquires; the rest are told `InProgress`, `Conflict`, or get
//! the stored result replayed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use aperture_core::{ClaimId, LedgerError};
use aperture_idempotency::{ClaimDecision, ClaimKey, ClaimStatus, IdempotencyClaim, RequestHash};

mod in_memory;
mod postgres;

pub use in_memory::InMemoryClaimStore;
pub use postgres::PostgresClaimStore;

/// Claim storage contract.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Try to claim the guarded operation.
    ///
    /// `Acquired` means this caller owns the operation, must execute it
    /// exactly once, and must eventually call `finalize`, including with
    /// `Failed` when abandoning the operation.
    async fn claim(
        &self,
        key: ClaimKey,
        request_hash: RequestHash,
    ) -> Result<ClaimDecision, LedgerError>;

    /// Record the terminal outcome of an acquired claim.
    ///
    /// `status` must be `Completed` or `Failed`. Writing the same terminal
    /// state twice is a no-op; writing a different terminal state is an
    /// `IdempotencyConflict`.
    async fn finalize(
        &self,
        claim_id: ClaimId,
        status: ClaimStatus,
        response_code: Option<u16>,
        payload: Option<JsonValue>,
    ) -> Result<(), LedgerError>;

    /// Fetch a claim row for observability/reconciliation.
    async fn get(&self, key: &ClaimKey) -> Result<Option<IdempotencyClaim>, LedgerError>;
}

#[async_trait]
impl<S> ClaimStore for Arc<S>
where
    S: ClaimStore + ?Sized,
{
    async fn claim(
        &self,
        key: ClaimKey,
        request_hash: RequestHash,
    ) -> Result<ClaimDecision, LedgerError> {
        (**self).claim(key, request_hash).await
    }

    async fn finalize(
        &self,
        claim_id: ClaimId,
        status: ClaimStatus,
        response_code: Option<u16>,
        payload: Option<JsonValue>,
    ) -> Result<(), LedgerError> {
        (**self).finalize(claim_id, status, response_code, payload).await
    }

    async fn get(&self, key: &ClaimKey) -> Result<Option<IdempotencyClaim>, LedgerError> {
        (**self).get(key).await
    }
}
