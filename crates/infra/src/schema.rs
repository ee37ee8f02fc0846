//! Postgres schema for the ledger core.
//!
//! Statement groups are executed in dependency order by `ensure_schema`.
//! The journals/postings tables carry `BEFORE UPDATE OR DELETE` triggers
//! that raise unconditionally: append-only is enforced at the datastore
//! boundary, not merely by application discipline. The claims table is the
//! one mutable table (status transitions and `last_seen_at` refreshes).

use sqlx::PgPool;

use aperture_core::LedgerError;
use aperture_ledger::AccountRegistry;

const ACCOUNTS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    code        TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL
        CHECK (kind IN ('asset', 'liability', 'equity', 'revenue', 'expense')),
    is_active   BOOLEAN NOT NULL DEFAULT TRUE
);
"#;

const JOURNALS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS journals (
    id              UUID PRIMARY KEY,
    idempotency_key TEXT NOT NULL UNIQUE,
    source_kind     TEXT NOT NULL,
    source_id       TEXT NOT NULL,
    flow_type       TEXT NOT NULL,
    provider        TEXT,
    currency        TEXT NOT NULL,
    description     TEXT,
    metadata        JSONB NOT NULL DEFAULT '{}'::jsonb,
    occurred_at     TIMESTAMPTZ NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS journals_source_idx ON journals (source_kind, source_id);
"#;

const POSTINGS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS postings (
    id                UUID PRIMARY KEY,
    journal_id        UUID NOT NULL REFERENCES journals (id),
    account_code      TEXT NOT NULL REFERENCES accounts (code),
    direction         TEXT NOT NULL CHECK (direction IN ('debit', 'credit')),
    amount_minor      BIGINT NOT NULL CHECK (amount_minor > 0),
    currency          TEXT NOT NULL,
    counterparty_type TEXT,
    counterparty_id   TEXT,
    metadata          JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE INDEX IF NOT EXISTS postings_journal_idx ON postings (journal_id);
CREATE INDEX IF NOT EXISTS postings_account_currency_idx ON postings (account_code, currency);
CREATE INDEX IF NOT EXISTS postings_counterparty_idx
    ON postings (counterparty_type, counterparty_id, currency);
"#;

const CLAIMS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS idempotency_claims (
    id               UUID PRIMARY KEY,
    operation_scope  TEXT NOT NULL,
    actor_id         TEXT NOT NULL,
    idempotency_key  TEXT NOT NULL,
    request_hash     TEXT NOT NULL,
    status           TEXT NOT NULL
        CHECK (status IN ('processing', 'completed', 'failed')),
    response_code    INTEGER,
    response_payload JSONB,
    error_payload    JSONB,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_seen_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (operation_scope, actor_id, idempotency_key)
);
"#;

const APPEND_ONLY_SQL: &str = r#"
CREATE OR REPLACE FUNCTION aperture_forbid_mutation() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'table % is append-only', TG_TABLE_NAME;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS journals_append_only ON journals;
CREATE TRIGGER journals_append_only
    BEFORE UPDATE OR DELETE ON journals
    FOR EACH ROW EXECUTE FUNCTION aperture_forbid_mutation();

DROP TRIGGER IF EXISTS postings_append_only ON postings;
CREATE TRIGGER postings_append_only
    BEFORE UPDATE OR DELETE ON postings
    FOR EACH ROW EXECUTE FUNCTION aperture_forbid_mutation();
"#;

/// Create the ledger schema if it does not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), LedgerError> {
    for sql in [
        ACCOUNTS_SQL,
        JOURNALS_SQL,
        POSTINGS_SQL,
        CLAIMS_SQL,
        APPEND_ONLY_SQL,
    ] {
        sqlx::raw_sql(sql)
            .execute(pool)
            .await
            .map_err(|e| LedgerError::storage(format!("schema setup failed: {e}")))?;
    }
    tracing::info!("ledger schema ensured");
    Ok(())
}

/// Provision (or refresh) the chart of accounts from the registry.
///
/// Out-of-band account management: codes are inserted once and only `name`
/// and `is_active` may change afterwards. Codes are never deleted.
pub async fn sync_accounts(pool: &PgPool, registry: &AccountRegistry) -> Result<(), LedgerError> {
    for account in registry.iter() {
        let kind = match account.kind {
            aperture_ledger::AccountKind::Asset => "asset",
            aperture_ledger::AccountKind::Liability => "liability",
            aperture_ledger::AccountKind::Equity => "equity",
            aperture_ledger::AccountKind::Revenue => "revenue",
            aperture_ledger::AccountKind::Expense => "expense",
        };
        sqlx::query(
            r#"
            INSERT INTO accounts (code, name, kind, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (code)
            DO UPDATE SET name = EXCLUDED.name, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(&account.code)
        .bind(&account.name)
        .bind(kind)
        .bind(account.is_active)
        .execute(pool)
        .await
        .map_err(|e| LedgerError::storage(format!("account sync failed: {e}")))?;
    }
    Ok(())
}
