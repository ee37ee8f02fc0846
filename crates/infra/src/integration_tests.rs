//! End-to-end tests over the in-memory adapters: full recording flows,
//! projections, claim lifecycles, and the concurrency properties the
//! Postgres adapters delegate to the database.

use std::sync::Arc;

use serde_json::json;

use aperture_core::{Currency, LedgerError};
use aperture_idempotency::{ClaimDecision, ClaimKey, ClaimStatus, RequestHash};
use aperture_ledger::{flow, AccountRegistry, Direction, JournalDraft, PostingDraft};

use crate::claim_store::{ClaimStore, InMemoryClaimStore};
use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};
use crate::projections::BalanceReader;

fn init_tracing() {
    aperture_observability::init_with_format(aperture_observability::LogFormat::Plain);
}

fn usd() -> Currency {
    Currency::new("USD").unwrap()
}

fn checkout_draft(idempotency_key: &str) -> JournalDraft {
    JournalDraft {
        idempotency_key: idempotency_key.to_string(),
        source_kind: "checkout".to_string(),
        source_id: "sess_1".to_string(),
        flow_type: flow::PURCHASE.to_string(),
        provider: Some("stripe".to_string()),
        currency: usd(),
        description: Some("gallery purchase".to_string()),
        metadata: Default::default(),
        occurred_at: None,
        postings: vec![
            PostingDraft::new("platform_cash_clearing", Direction::Debit, 1000, usd()),
            PostingDraft::new("platform_revenue", Direction::Credit, 800, usd()),
            PostingDraft::new("creator_payable", Direction::Credit, 400, usd()),
            PostingDraft::new("provider_fee_expense", Direction::Debit, 200, usd()),
        ],
    }
}

fn store() -> InMemoryLedgerStore {
    InMemoryLedgerStore::new(AccountRegistry::platform_chart())
}

#[tokio::test]
async fn checkout_journal_is_recorded_and_projected() {
    let store = store();

    let recorded = store.record_journal(checkout_draft("k1")).await.unwrap();
    assert!(!recorded.replayed);

    let journal = store.get_journal(recorded.journal_id).await.unwrap().unwrap();
    assert_eq!(journal.idempotency_key, "k1");

    let balances = store.account_balances().await.unwrap();
    let revenue = balances
        .iter()
        .find(|b| b.account_code == "platform_revenue")
        .unwrap();
    assert_eq!(revenue.credit_minor, 800);
    assert_eq!(revenue.debit_minor, 0);
    assert_eq!(revenue.journal_count, 1);
}

#[tokio::test]
async fn repeating_a_key_replays_and_leaves_balances_unchanged() {
    let store = store();

    let first = store.record_journal(checkout_draft("k1")).await.unwrap();
    let before = store.account_balances().await.unwrap();

    let second = store.record_journal(checkout_draft("k1")).await.unwrap();
    assert!(second.replayed);
    assert_eq!(second.journal_id, first.journal_id);

    assert_eq!(store.account_balances().await.unwrap(), before);
    assert_eq!(store.journal_count(), 1);
    assert_eq!(store.posting_count(), 4);
}

#[tokio::test]
async fn unbalanced_journal_is_rejected_with_nothing_persisted() {
    let store = store();

    let mut draft = checkout_draft("k-unbalanced");
    draft.postings = vec![
        PostingDraft::new("platform_cash_clearing", Direction::Debit, 1000, usd()),
        PostingDraft::new("platform_revenue", Direction::Credit, 900, usd()),
    ];

    let err = store.record_journal(draft).await.unwrap_err();
    assert_eq!(err.code(), "unbalanced_journal");
    assert_eq!(store.journal_count(), 0);
    assert_eq!(store.posting_count(), 0);
}

#[tokio::test]
async fn unknown_account_is_rejected_with_nothing_persisted() {
    let store = store();

    let mut draft = checkout_draft("k-unknown");
    draft.postings[0].account_code = "nonexistent_account".to_string();

    let err = store.record_journal(draft).await.unwrap_err();
    assert_eq!(err.code(), "unknown_account");
    assert_eq!(store.journal_count(), 0);
    assert_eq!(store.posting_count(), 0);
}

#[tokio::test]
async fn completed_claim_replays_the_stored_response() {
    let claims = InMemoryClaimStore::new();
    let key = ClaimKey::new("checkout", "user1", "idem-1");
    let hash = RequestHash::of(&json!({"gallery": "g1", "amount": 1000}));
    let payload = json!({"checkoutUrl": "https://pay.example/cs_123"});

    let claim_id = claims
        .claim(key.clone(), hash.clone())
        .await
        .unwrap()
        .into_acquired()
        .unwrap();
    claims
        .finalize(claim_id, ClaimStatus::Completed, Some(200), Some(payload.clone()))
        .await
        .unwrap();

    let decision = claims.claim(key, hash).await.unwrap();
    assert_eq!(
        decision,
        ClaimDecision::Replay {
            status: ClaimStatus::Completed,
            response_code: Some(200),
            payload: Some(payload),
        }
    );
}

#[tokio::test]
async fn reused_key_with_different_hash_conflicts_in_any_state() {
    let claims = InMemoryClaimStore::new();
    let key = ClaimKey::new("checkout", "user1", "idem-1");
    let hash_a = RequestHash::of(&json!({"amount": 1000}));
    let hash_b = RequestHash::of(&json!({"amount": 2000}));

    let claim_id = claims
        .claim(key.clone(), hash_a.clone())
        .await
        .unwrap()
        .into_acquired()
        .unwrap();
    assert_eq!(
        claims.claim(key.clone(), hash_b.clone()).await.unwrap(),
        ClaimDecision::Conflict
    );

    claims
        .finalize(claim_id, ClaimStatus::Completed, Some(200), None)
        .await
        .unwrap();
    assert_eq!(
        claims.claim(key, hash_b).await.unwrap(),
        ClaimDecision::Conflict
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_recording_with_one_key_commits_one_journal() {
    init_tracing();
    let store = Arc::new(store());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.record_journal(checkout_draft("k-race")).await
        }));
    }

    let mut fresh = 0;
    let mut journal_ids = Vec::new();
    for handle in handles {
        let recorded = handle.await.unwrap().unwrap();
        if !recorded.replayed {
            fresh += 1;
        }
        journal_ids.push(recorded.journal_id);
    }

    assert_eq!(fresh, 1);
    assert!(journal_ids.iter().all(|id| *id == journal_ids[0]));
    assert_eq!(store.journal_count(), 1);
    assert_eq!(store.posting_count(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_claims_acquire_exactly_once() {
    init_tracing();
    let claims = Arc::new(InMemoryClaimStore::new());
    let hash = RequestHash::of(&json!({"amount": 1000}));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let claims = Arc::clone(&claims);
        let hash = hash.clone();
        handles.push(tokio::spawn(async move {
            claims
                .claim(ClaimKey::new("checkout", "user1", "idem-race"), hash)
                .await
        }));
    }

    let mut acquired = 0;
    let mut in_progress = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ClaimDecision::Acquired { .. } => acquired += 1,
            ClaimDecision::InProgress => in_progress += 1,
            other => panic!("unexpected decision: {other:?}"),
        }
    }
    assert_eq!(acquired, 1);
    assert_eq!(in_progress, 15);
}

#[tokio::test]
async fn storage_errors_are_typed_not_ambiguous() {
    let err = LedgerError::storage("connection refused");
    assert_eq!(err.code(), "storage_unavailable");
    assert!(err.is_retryable());
}
