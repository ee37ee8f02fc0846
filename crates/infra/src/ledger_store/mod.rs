//! Append-only journal storage.
//!
//! The trait surface is deliberately insert/select only: no update or delete
//! method exists for journals or postings anywhere in the type system. The
//! Postgres schema additionally installs append-only triggers that reject
//! UPDATE and DELETE at the datastore level (see `schema`).

use std::sync::Arc;

use async_trait::async_trait;

use aperture_core::{JournalId, LedgerError};
use aperture_ledger::{Journal, JournalDraft, Posting};

mod in_memory;
pub(crate) mod postgres;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

/// Result of `record_journal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedJournal {
    pub journal_id: JournalId,
    /// True when a journal for this idempotency key already existed and the
    /// stored result was returned without any validation or write.
    pub replayed: bool,
}

/// Ledger storage contract.
///
/// `record_journal` guarantees exactly one committed journal per distinct
/// idempotency key, ever, under any interleaving of concurrent callers:
///
/// 1. An existing journal for the key short-circuits to a side-effect-free
///    replay (no validation runs on the replay path).
/// 2. Otherwise the draft is validated in full and the journal plus all its
///    postings are written in one atomic transaction.
/// 3. A uniqueness conflict on the key during the write means a concurrent
///    caller won the race; the implementation re-fetches and replays.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn record_journal(&self, draft: JournalDraft) -> Result<RecordedJournal, LedgerError>;

    async fn find_journal_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Journal>, LedgerError>;

    async fn get_journal(&self, id: JournalId) -> Result<Option<Journal>, LedgerError>;

    async fn postings_for_journal(&self, id: JournalId) -> Result<Vec<Posting>, LedgerError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn record_journal(&self, draft: JournalDraft) -> Result<RecordedJournal, LedgerError> {
        (**self).record_journal(draft).await
    }

    async fn find_journal_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Journal>, LedgerError> {
        (**self).find_journal_by_key(idempotency_key).await
    }

    async fn get_journal(&self, id: JournalId) -> Result<Option<Journal>, LedgerError> {
        (**self).get_journal(id).await
    }

    async fn postings_for_journal(&self, id: JournalId) -> Result<Vec<Posting>, LedgerError> {
        (**self).postings_for_journal(id).await
    }
}
