use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use aperture_core::{JournalId, LedgerError};
use aperture_ledger::{AccountRegistry, Journal, JournalDraft, Posting};

use super::{LedgerStore, RecordedJournal};
use crate::projections::balances::{project_account_balances, project_settlements};
use crate::projections::{AccountBalance, BalanceReader, CounterpartySettlement};

#[derive(Debug, Default)]
struct Inner {
    journals: HashMap<JournalId, Journal>,
    by_key: HashMap<String, JournalId>,
    postings: HashMap<JournalId, Vec<Posting>>,
}

/// In-memory append-only ledger store.
///
/// Intended for tests/dev. The single write lock stands in for the
/// datastore transaction: lookup-validate-insert happens under it, so the
/// idempotency race of the Postgres implementation cannot occur here.
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    registry: AccountRegistry,
    inner: RwLock<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new(registry: AccountRegistry) -> Self {
        Self {
            registry,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    /// Total number of posting rows across all journals. Test support for
    /// the "no rows persisted after a rejection" checks.
    pub fn posting_count(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.postings.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn journal_count(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.journals.len())
            .unwrap_or(0)
    }

    fn snapshot(&self) -> Result<Vec<(Journal, Vec<Posting>)>, LedgerError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;
        Ok(inner
            .journals
            .values()
            .map(|j| {
                let postings = inner.postings.get(&j.id).cloned().unwrap_or_default();
                (j.clone(), postings)
            })
            .collect())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn record_journal(&self, draft: JournalDraft) -> Result<RecordedJournal, LedgerError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;

        // Idempotent fast path: side-effect free, no validation.
        if let Some(existing) = inner.by_key.get(&draft.idempotency_key) {
            return Ok(RecordedJournal {
                journal_id: *existing,
                replayed: true,
            });
        }

        draft.validate(&self.registry)?;

        let (journal, postings) = draft.materialize(Utc::now());
        let id = journal.id;
        inner.by_key.insert(journal.idempotency_key.clone(), id);
        inner.journals.insert(id, journal);
        inner.postings.insert(id, postings);

        Ok(RecordedJournal {
            journal_id: id,
            replayed: false,
        })
    }

    async fn find_journal_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Journal>, LedgerError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;
        Ok(inner
            .by_key
            .get(idempotency_key)
            .and_then(|id| inner.journals.get(id))
            .cloned())
    }

    async fn get_journal(&self, id: JournalId) -> Result<Option<Journal>, LedgerError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;
        Ok(inner.journals.get(&id).cloned())
    }

    async fn postings_for_journal(&self, id: JournalId) -> Result<Vec<Posting>, LedgerError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| LedgerError::storage("lock poisoned"))?;
        Ok(inner.postings.get(&id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl BalanceReader for InMemoryLedgerStore {
    async fn account_balances(&self) -> Result<Vec<AccountBalance>, LedgerError> {
        Ok(project_account_balances(&self.snapshot()?))
    }

    async fn counterparty_settlements(
        &self,
        counterparty_kind: &str,
    ) -> Result<Vec<CounterpartySettlement>, LedgerError> {
        Ok(project_settlements(&self.snapshot()?, counterparty_kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aperture_core::{Currency, Metadata};
    use aperture_ledger::{flow, Direction, PostingDraft};

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn purchase_draft(key: &str) -> JournalDraft {
        JournalDraft {
            idempotency_key: key.to_string(),
            source_kind: "checkout".to_string(),
            source_id: "sess_1".to_string(),
            flow_type: flow::PURCHASE.to_string(),
            provider: Some("stripe".to_string()),
            currency: usd(),
            description: None,
            metadata: Metadata::new(),
            occurred_at: None,
            postings: vec![
                PostingDraft::new("platform_cash_clearing", Direction::Debit, 1000, usd()),
                PostingDraft::new("platform_revenue", Direction::Credit, 1000, usd()),
            ],
        }
    }

    fn store() -> InMemoryLedgerStore {
        InMemoryLedgerStore::new(AccountRegistry::platform_chart())
    }

    #[tokio::test]
    async fn records_then_replays_same_key() {
        let store = store();
        let first = store.record_journal(purchase_draft("k1")).await.unwrap();
        assert!(!first.replayed);

        let second = store.record_journal(purchase_draft("k1")).await.unwrap();
        assert!(second.replayed);
        assert_eq!(first.journal_id, second.journal_id);
        assert_eq!(store.journal_count(), 1);
        assert_eq!(store.posting_count(), 2);
    }

    #[tokio::test]
    async fn replay_path_skips_validation() {
        let store = store();
        store.record_journal(purchase_draft("k1")).await.unwrap();

        // Same key, now-invalid body: the fast path must not even look.
        let mut broken = purchase_draft("k1");
        broken.postings[1].amount_minor = 999;
        let result = store.record_journal(broken).await.unwrap();
        assert!(result.replayed);
    }

    #[tokio::test]
    async fn rejection_persists_nothing() {
        let store = store();
        let mut unbalanced = purchase_draft("k2");
        unbalanced.postings[1].amount_minor = 900;

        let err = store.record_journal(unbalanced).await.unwrap_err();
        assert_eq!(err.code(), "unbalanced_journal");
        assert_eq!(store.journal_count(), 0);
        assert_eq!(store.posting_count(), 0);
    }

    #[tokio::test]
    async fn lookup_by_key_and_id() {
        let store = store();
        let recorded = store.record_journal(purchase_draft("k3")).await.unwrap();

        let by_key = store.find_journal_by_key("k3").await.unwrap().unwrap();
        assert_eq!(by_key.id, recorded.journal_id);

        let by_id = store.get_journal(recorded.journal_id).await.unwrap().unwrap();
        assert_eq!(by_id.idempotency_key, "k3");

        assert!(store.find_journal_by_key("missing").await.unwrap().is_none());
    }
}
