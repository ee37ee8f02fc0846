//! Postgres-backed ledger store.
//!
//! Journal + postings are written in one transaction. The idempotency race
//! between the initial lookup and the insert is closed by the unique
//! constraint on `journals.idempotency_key`: a 23505 during insert means a
//! concurrent caller won, and the stored journal is re-fetched and replayed.
//!
//! All other database errors map to `StorageUnavailable`: when the
//! datastore cannot uphold the ledger guarantees, the operation is refused
//! rather than degraded, and no error is ever interpreted as success.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use aperture_core::{Currency, JournalId, LedgerError, Metadata, PostingId};
use aperture_ledger::{
    AccountRegistry, Counterparty, Direction, Journal, JournalDraft, Posting,
};

use super::{LedgerStore, RecordedJournal};
use crate::projections::{AccountBalance, BalanceReader, CounterpartySettlement};

/// Append-only ledger store over a shared Postgres pool.
///
/// Safe to share across tasks and process instances: correctness relies on
/// the database's transaction and uniqueness machinery, not on in-process
/// state.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    registry: AccountRegistry,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, registry: AccountRegistry) -> Self {
        Self {
            pool: Arc::new(pool),
            registry,
        }
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, draft),
        fields(
            idempotency_key = %draft.idempotency_key,
            flow_type = %draft.flow_type,
            posting_count = draft.postings.len(),
        ),
        err
    )]
    async fn record_journal(&self, draft: JournalDraft) -> Result<RecordedJournal, LedgerError> {
        // Idempotent fast path: side-effect free, no validation.
        if let Some(existing) = self.find_journal_by_key(&draft.idempotency_key).await? {
            return Ok(RecordedJournal {
                journal_id: existing.id,
                replayed: true,
            });
        }

        draft.validate(&self.registry)?;

        let key = draft.idempotency_key.clone();
        let (journal, postings) = draft.materialize(Utc::now());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO journals (
                id, idempotency_key, source_kind, source_id, flow_type,
                provider, currency, description, metadata, occurred_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(journal.id.as_uuid())
        .bind(&journal.idempotency_key)
        .bind(&journal.source_kind)
        .bind(&journal.source_id)
        .bind(&journal.flow_type)
        .bind(&journal.provider)
        .bind(journal.currency.as_str())
        .bind(&journal.description)
        .bind(journal.metadata.to_json())
        .bind(journal.occurred_at)
        .bind(journal.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                // A concurrent caller won the race between the lookup and
                // this insert. Their committed journal is the result.
                drop(tx);
                let existing = self.find_journal_by_key(&key).await?.ok_or_else(|| {
                    LedgerError::storage("journal missing after uniqueness conflict")
                })?;
                return Ok(RecordedJournal {
                    journal_id: existing.id,
                    replayed: true,
                });
            }
            return Err(map_sqlx_error("insert_journal", e));
        }

        for posting in &postings {
            sqlx::query(
                r#"
                INSERT INTO postings (
                    id, journal_id, account_code, direction, amount_minor,
                    currency, counterparty_type, counterparty_id, metadata
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(posting.id.as_uuid())
            .bind(posting.journal_id.as_uuid())
            .bind(&posting.account_code)
            .bind(posting.direction.as_str())
            .bind(posting.amount_minor)
            .bind(posting.currency.as_str())
            .bind(posting.counterparty.as_ref().map(|c| c.kind.as_str()))
            .bind(posting.counterparty.as_ref().map(|c| c.id.as_str()))
            .bind(posting.metadata.to_json())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_posting", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(RecordedJournal {
            journal_id: journal.id,
            replayed: false,
        })
    }

    #[instrument(skip(self), err)]
    async fn find_journal_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Journal>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, source_kind, source_id, flow_type,
                   provider, currency, description, metadata, occurred_at, created_at
            FROM journals
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_journal_by_key", e))?;

        match row {
            Some(r) => {
                let journal: Journal =
                    JournalRow::from_row(&r).map_err(row_decode_error)?.try_into()?;
                Ok(Some(journal))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(journal_id = %id), err)]
    async fn get_journal(&self, id: JournalId) -> Result<Option<Journal>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, source_kind, source_id, flow_type,
                   provider, currency, description, metadata, occurred_at, created_at
            FROM journals
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_journal", e))?;

        match row {
            Some(r) => {
                let journal: Journal =
                    JournalRow::from_row(&r).map_err(row_decode_error)?.try_into()?;
                Ok(Some(journal))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(journal_id = %id), err)]
    async fn postings_for_journal(&self, id: JournalId) -> Result<Vec<Posting>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, journal_id, account_code, direction, amount_minor,
                   currency, counterparty_type, counterparty_id, metadata
            FROM postings
            WHERE journal_id = $1
            ORDER BY id
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("postings_for_journal", e))?;

        let mut postings = Vec::with_capacity(rows.len());
        for row in rows {
            let posting: Posting = PostingRow::from_row(&row)
                .map_err(row_decode_error)?
                .try_into()?;
            postings.push(posting);
        }
        Ok(postings)
    }
}

#[async_trait]
impl BalanceReader for PostgresLedgerStore {
    #[instrument(skip(self), err)]
    async fn account_balances(&self) -> Result<Vec<AccountBalance>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT
                p.account_code,
                p.currency,
                COALESCE(SUM(p.amount_minor) FILTER (WHERE p.direction = 'debit'), 0)::BIGINT
                    AS debit_minor,
                COALESCE(SUM(p.amount_minor) FILTER (WHERE p.direction = 'credit'), 0)::BIGINT
                    AS credit_minor,
                COUNT(DISTINCT p.journal_id) AS journal_count,
                MAX(j.occurred_at) AS last_activity_at
            FROM postings p
            JOIN journals j ON j.id = p.journal_id
            GROUP BY p.account_code, p.currency
            ORDER BY p.account_code, p.currency
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("account_balances", e))?;

        let mut balances = Vec::with_capacity(rows.len());
        for row in rows {
            balances.push(AccountBalance {
                account_code: row.try_get("account_code").map_err(row_decode_error)?,
                currency: parse_currency(row.try_get("currency").map_err(row_decode_error)?)?,
                debit_minor: row.try_get("debit_minor").map_err(row_decode_error)?,
                credit_minor: row.try_get("credit_minor").map_err(row_decode_error)?,
                journal_count: row
                    .try_get::<i64, _>("journal_count")
                    .map_err(row_decode_error)? as u64,
                last_activity_at: row.try_get("last_activity_at").map_err(row_decode_error)?,
            });
        }
        Ok(balances)
    }

    #[instrument(skip(self), err)]
    async fn counterparty_settlements(
        &self,
        counterparty_kind: &str,
    ) -> Result<Vec<CounterpartySettlement>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT
                p.counterparty_id,
                p.currency,
                COALESCE(SUM(p.amount_minor) FILTER (WHERE p.direction = 'credit'), 0)::BIGINT
                    AS accrued_minor,
                COALESCE(SUM(p.amount_minor) FILTER (WHERE p.direction = 'debit'), 0)::BIGINT
                    AS released_minor,
                COALESCE(SUM(p.amount_minor)
                    FILTER (WHERE p.direction = 'debit' AND j.flow_type = 'payout'), 0)::BIGINT
                    AS paid_out_minor,
                COUNT(DISTINCT p.journal_id) AS journal_count,
                MAX(j.occurred_at) AS last_activity_at
            FROM postings p
            JOIN journals j ON j.id = p.journal_id
            WHERE p.counterparty_type = $1 AND p.counterparty_id IS NOT NULL
            GROUP BY p.counterparty_id, p.currency
            ORDER BY p.counterparty_id, p.currency
            "#,
        )
        .bind(counterparty_kind)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("counterparty_settlements", e))?;

        let mut settlements = Vec::with_capacity(rows.len());
        for row in rows {
            settlements.push(CounterpartySettlement {
                counterparty_kind: counterparty_kind.to_string(),
                counterparty_id: row.try_get("counterparty_id").map_err(row_decode_error)?,
                currency: parse_currency(row.try_get("currency").map_err(row_decode_error)?)?,
                accrued_minor: row.try_get("accrued_minor").map_err(row_decode_error)?,
                released_minor: row.try_get("released_minor").map_err(row_decode_error)?,
                paid_out_minor: row.try_get("paid_out_minor").map_err(row_decode_error)?,
                journal_count: row
                    .try_get::<i64, _>("journal_count")
                    .map_err(row_decode_error)? as u64,
                last_activity_at: row.try_get("last_activity_at").map_err(row_decode_error)?,
            });
        }
        Ok(settlements)
    }
}

fn parse_currency(code: String) -> Result<Currency, LedgerError> {
    Currency::new(&code)
        .map_err(|_| LedgerError::storage(format!("stored currency is malformed: {code:?}")))
}

fn row_decode_error(err: sqlx::Error) -> LedgerError {
    LedgerError::storage(format!("failed to decode row: {err}"))
}

/// Map sqlx errors into the core taxonomy. Uniqueness conflicts are handled
/// at the call sites that expect them; everything else fails closed.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => LedgerError::storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            LedgerError::storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            LedgerError::storage(format!("connection pool timed out in {operation}"))
        }
        other => LedgerError::storage(format!("sqlx error in {operation}: {other}")),
    }
}

/// Postgres unique violation (error code 23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// sqlx row types

#[derive(Debug)]
struct JournalRow {
    id: uuid::Uuid,
    idempotency_key: String,
    source_kind: String,
    source_id: String,
    flow_type: String,
    provider: Option<String>,
    currency: String,
    description: Option<String>,
    metadata: JsonValue,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for JournalRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JournalRow {
            id: row.try_get("id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            source_kind: row.try_get("source_kind")?,
            source_id: row.try_get("source_id")?,
            flow_type: row.try_get("flow_type")?,
            provider: row.try_get("provider")?,
            currency: row.try_get("currency")?,
            description: row.try_get("description")?,
            metadata: row.try_get("metadata")?,
            occurred_at: row.try_get("occurred_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<JournalRow> for Journal {
    type Error = LedgerError;

    fn try_from(row: JournalRow) -> Result<Self, Self::Error> {
        Ok(Journal {
            id: JournalId::from_uuid(row.id),
            idempotency_key: row.idempotency_key,
            source_kind: row.source_kind,
            source_id: row.source_id,
            flow_type: row.flow_type,
            provider: row.provider,
            currency: parse_currency(row.currency)?,
            description: row.description,
            metadata: Metadata::from_json(&row.metadata)
                .map_err(|e| LedgerError::storage(format!("stored metadata is malformed: {e}")))?,
            occurred_at: row.occurred_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug)]
struct PostingRow {
    id: uuid::Uuid,
    journal_id: uuid::Uuid,
    account_code: String,
    direction: String,
    amount_minor: i64,
    currency: String,
    counterparty_type: Option<String>,
    counterparty_id: Option<String>,
    metadata: JsonValue,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for PostingRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(PostingRow {
            id: row.try_get("id")?,
            journal_id: row.try_get("journal_id")?,
            account_code: row.try_get("account_code")?,
            direction: row.try_get("direction")?,
            amount_minor: row.try_get("amount_minor")?,
            currency: row.try_get("currency")?,
            counterparty_type: row.try_get("counterparty_type")?,
            counterparty_id: row.try_get("counterparty_id")?,
            metadata: row.try_get("metadata")?,
        })
    }
}

impl TryFrom<PostingRow> for Posting {
    type Error = LedgerError;

    fn try_from(row: PostingRow) -> Result<Self, Self::Error> {
        let counterparty = match (row.counterparty_type, row.counterparty_id) {
            (Some(kind), Some(id)) => Some(Counterparty { kind, id }),
            (None, None) => None,
            _ => {
                return Err(LedgerError::storage(
                    "posting row has a partial counterparty",
                ))
            }
        };
        Ok(Posting {
            id: PostingId::from_uuid(row.id),
            journal_id: JournalId::from_uuid(row.journal_id),
            account_code: row.account_code,
            direction: Direction::parse(&row.direction)?,
            amount_minor: row.amount_minor,
            currency: parse_currency(row.currency)?,
            counterparty,
            metadata: Metadata::from_json(&row.metadata)
                .map_err(|e| LedgerError::storage(format!("stored metadata is malformed: {e}")))?,
        })
    }
}
