//! Postgres-backed claim store.
//!
//! Acquire is a single `INSERT .. ON CONFLICT DO NOTHING`: the unique
//! constraint on `(operation_scope, actor_id, idempotency_key)` guarantees
//! that exactly one of N concurrent callers gets a row back. Expiry takeover
//! and finalize are conditional `UPDATE .. WHERE status = 'processing'`
//! statements, so a lost race is observed as zero affected rows and never
//! as a double execution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use aperture_core::{ClaimId, LedgerError};
use aperture_idempotency::{
    ClaimDecision, ClaimKey, ClaimStatus, IdempotencyClaim, RequestHash,
};

use super::ClaimStore;
use crate::ledger_store::postgres::map_sqlx_error;

/// Claim store over a shared Postgres pool.
///
/// Safe to share across tasks and process instances: every decision is made
/// by a single atomic statement against the claims table.
#[derive(Debug, Clone)]
pub struct PostgresClaimStore {
    pool: Arc<PgPool>,
    expiry: Option<chrono::Duration>,
}

impl PostgresClaimStore {
    /// Store without expiry: an abandoned `processing` claim blocks its key
    /// until an operator intervenes.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            expiry: None,
        }
    }

    /// Store that lets a new caller take over a `processing` claim older
    /// than `expiry`. Only safe when the guarded operation is itself
    /// idempotent downstream.
    pub fn with_expiry(pool: PgPool, expiry: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            expiry: chrono::Duration::from_std(expiry).ok(),
        }
    }

    async fn fetch_by_key(&self, key: &ClaimKey) -> Result<Option<ClaimRow>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, operation_scope, actor_id, idempotency_key, request_hash,
                   status, response_code, response_payload, error_payload,
                   created_at, last_seen_at
            FROM idempotency_claims
            WHERE operation_scope = $1 AND actor_id = $2 AND idempotency_key = $3
            "#,
        )
        .bind(&key.operation_scope)
        .bind(&key.actor_id)
        .bind(&key.idempotency_key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_claim", e))?;

        match row {
            Some(r) => Ok(Some(ClaimRow::from_row(&r).map_err(row_decode_error)?)),
            None => Ok(None),
        }
    }

    /// Take over an expired `processing` claim. The status guard in the
    /// WHERE clause makes concurrent takeover attempts race safely: only
    /// one caller sees an affected row.
    async fn try_take_over(
        &self,
        claim_id: ClaimId,
        request_hash: &RequestHash,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_claims
            SET request_hash = $2,
                response_code = NULL,
                response_payload = NULL,
                error_payload = NULL,
                created_at = $3,
                last_seen_at = $3
            WHERE id = $1 AND status = 'processing' AND created_at <= $4
            "#,
        )
        .bind(claim_id.as_uuid())
        .bind(request_hash.as_str())
        .bind(now)
        .bind(cutoff)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("take_over_claim", e))?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ClaimStore for PostgresClaimStore {
    #[instrument(
        skip(self, key, request_hash),
        fields(
            operation_scope = %key.operation_scope,
            actor_id = %key.actor_id,
        ),
        err
    )]
    async fn claim(
        &self,
        key: ClaimKey,
        request_hash: RequestHash,
    ) -> Result<ClaimDecision, LedgerError> {
        key.validate()?;
        let now = Utc::now();

        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_claims (
                id, operation_scope, actor_id, idempotency_key, request_hash,
                status, created_at, last_seen_at
            )
            VALUES ($1, $2, $3, $4, $5, 'processing', $6, $6)
            ON CONFLICT (operation_scope, actor_id, idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(ClaimId::new().as_uuid())
        .bind(&key.operation_scope)
        .bind(&key.actor_id)
        .bind(&key.idempotency_key)
        .bind(request_hash.as_str())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_claim", e))?;

        if let Some(row) = inserted {
            let id: uuid::Uuid = row.try_get("id").map_err(row_decode_error)?;
            return Ok(ClaimDecision::Acquired {
                claim_id: ClaimId::from_uuid(id),
            });
        }

        // The key already has a row. Refresh last_seen_at, then decide from
        // the stored state.
        sqlx::query(
            r#"
            UPDATE idempotency_claims
            SET last_seen_at = $4
            WHERE operation_scope = $1 AND actor_id = $2 AND idempotency_key = $3
            "#,
        )
        .bind(&key.operation_scope)
        .bind(&key.actor_id)
        .bind(&key.idempotency_key)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("touch_claim", e))?;

        let existing = self.fetch_by_key(&key).await?.ok_or_else(|| {
            LedgerError::storage("claim missing after uniqueness conflict")
        })?;

        if existing.request_hash != request_hash.as_str() {
            return Ok(ClaimDecision::Conflict);
        }

        let status = ClaimStatus::parse(&existing.status)?;
        match status {
            ClaimStatus::Processing => {
                if let Some(ttl) = self.expiry {
                    let cutoff = now - ttl;
                    if existing.created_at <= cutoff
                        && self
                            .try_take_over(
                                ClaimId::from_uuid(existing.id),
                                &request_hash,
                                cutoff,
                                now,
                            )
                            .await?
                    {
                        return Ok(ClaimDecision::Acquired {
                            claim_id: ClaimId::from_uuid(existing.id),
                        });
                    }
                }
                Ok(ClaimDecision::InProgress)
            }
            terminal => {
                let claim: IdempotencyClaim = existing.try_into()?;
                Ok(ClaimDecision::Replay {
                    status: terminal,
                    response_code: claim.response_code,
                    payload: claim.replay_payload().cloned(),
                })
            }
        }
    }

    #[instrument(skip(self, payload), fields(claim_id = %claim_id, status = status.as_str()), err)]
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

        let (response_payload, error_payload) = match status {
            ClaimStatus::Completed => (payload, None),
            ClaimStatus::Failed => (None, payload),
            ClaimStatus::Processing => unreachable!("rejected above"),
        };

        let result = sqlx::query(
            r#"
            UPDATE idempotency_claims
            SET status = $2,
                response_code = $3,
                response_payload = $4,
                error_payload = $5,
                last_seen_at = $6
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(claim_id.as_uuid())
        .bind(status.as_str())
        .bind(response_code.map(i32::from))
        .bind(response_payload)
        .bind(error_payload)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("finalize_claim", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Zero rows: the claim is unknown or already terminal. Re-fetch to
        // tell idempotent repetition apart from a genuine conflict.
        let row = sqlx::query(
            r#"
            SELECT status FROM idempotency_claims WHERE id = $1
            "#,
        )
        .bind(claim_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("refetch_claim", e))?;

        let stored = match row {
            Some(r) => {
                let s: String = r.try_get("status").map_err(row_decode_error)?;
                ClaimStatus::parse(&s)?
            }
            None => return Err(LedgerError::NotFound),
        };

        if stored == status {
            return Ok(());
        }
        Err(LedgerError::IdempotencyConflict)
    }

    #[instrument(skip(self, key), fields(operation_scope = %key.operation_scope), err)]
    async fn get(&self, key: &ClaimKey) -> Result<Option<IdempotencyClaim>, LedgerError> {
        match self.fetch_by_key(key).await? {
            Some(row) => Ok(Some(row.try_into()?)),
            None => Ok(None),
        }
    }
}

fn row_decode_error(err: sqlx::Error) -> LedgerError {
    LedgerError::storage(format!("failed to decode claim row: {err}"))
}

#[derive(Debug)]
struct ClaimRow {
    id: uuid::Uuid,
    operation_scope: String,
    actor_id: String,
    idempotency_key: String,
    request_hash: String,
    status: String,
    response_code: Option<i32>,
    response_payload: Option<JsonValue>,
    error_payload: Option<JsonValue>,
    created_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for ClaimRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ClaimRow {
            id: row.try_get("id")?,
            operation_scope: row.try_get("operation_scope")?,
            actor_id: row.try_get("actor_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            request_hash: row.try_get("request_hash")?,
            status: row.try_get("status")?,
            response_code: row.try_get("response_code")?,
            response_payload: row.try_get("response_payload")?,
            error_payload: row.try_get("error_payload")?,
            created_at: row.try_get("created_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
        })
    }
}

impl TryFrom<ClaimRow> for IdempotencyClaim {
    type Error = LedgerError;

    fn try_from(row: ClaimRow) -> Result<Self, Self::Error> {
        let response_code = match row.response_code {
            Some(code) => Some(u16::try_from(code).map_err(|_| {
                LedgerError::storage(format!("stored response code out of range: {code}"))
            })?),
            None => None,
        };
        Ok(IdempotencyClaim {
            id: ClaimId::from_uuid(row.id),
            key: ClaimKey::new(row.operation_scope, row.actor_id, row.idempotency_key),
            request_hash: RequestHash::from_stored(row.request_hash),
            status: ClaimStatus::parse(&row.status)?,
            response_code,
            response_payload: row.response_payload,
            error_payload: row.error_payload,
            created_at: row.created_at,
            last_seen_at: row.last_seen_at,
        })
    }
}
