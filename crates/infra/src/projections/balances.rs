//! Pure balance folds over (journal, postings) rows.
//!
//! These are the reference computation for both views: the in-memory store
//! serves reads straight from them, and `reconcile_account_balances` uses
//! them to check any other reader against a fresh recomputation.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aperture_core::Currency;
use aperture_ledger::{flow, Direction, Journal, Posting};

/// Running balance of one account in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_code: String,
    pub currency: Currency,
    pub debit_minor: i64,
    pub credit_minor: i64,
    pub journal_count: u64,
    pub last_activity_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Net under the debit-positive convention. Whether positive net means
    /// "asset grew" or "liability shrank" is a property of how callers
    /// construct postings, not of this view.
    pub fn net_minor(&self) -> i64 {
        self.debit_minor - self.credit_minor
    }
}

/// Settlement position of one counterparty in one currency.
///
/// Credit legs accrue, debit legs release, and debit legs on `payout`
/// journals additionally count as paid out. "How much do we owe them right
/// now" is `outstanding_minor()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartySettlement {
    pub counterparty_kind: String,
    pub counterparty_id: String,
    pub currency: Currency,
    pub accrued_minor: i64,
    pub released_minor: i64,
    pub paid_out_minor: i64,
    pub journal_count: u64,
    pub last_activity_at: DateTime<Utc>,
}

impl CounterpartySettlement {
    pub fn outstanding_minor(&self) -> i64 {
        self.accrued_minor - self.released_minor
    }
}

/// A mismatch found by `reconcile_account_balances`.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceDrift {
    pub account_code: String,
    pub currency: Currency,
    pub reported: Option<AccountBalance>,
    pub recomputed: Option<AccountBalance>,
}

/// Recompute per-account balances from raw rows.
pub fn project_account_balances(rows: &[(Journal, Vec<Posting>)]) -> Vec<AccountBalance> {
    let mut balances: BTreeMap<(String, Currency), AccountBalance> = BTreeMap::new();
    let mut journals: BTreeMap<(String, Currency), HashSet<aperture_core::JournalId>> =
        BTreeMap::new();

    for (journal, postings) in rows {
        for posting in postings {
            let key = (posting.account_code.clone(), posting.currency.clone());
            let entry = balances.entry(key.clone()).or_insert_with(|| AccountBalance {
                account_code: posting.account_code.clone(),
                currency: posting.currency.clone(),
                debit_minor: 0,
                credit_minor: 0,
                journal_count: 0,
                last_activity_at: journal.occurred_at,
            });
            match posting.direction {
                Direction::Debit => entry.debit_minor += posting.amount_minor,
                Direction::Credit => entry.credit_minor += posting.amount_minor,
            }
            if journal.occurred_at > entry.last_activity_at {
                entry.last_activity_at = journal.occurred_at;
            }
            journals.entry(key).or_default().insert(journal.id);
        }
    }

    let mut out: Vec<AccountBalance> = balances.into_values().collect();
    for balance in &mut out {
        balance.journal_count = journals
            .get(&(balance.account_code.clone(), balance.currency.clone()))
            .map(|set| set.len() as u64)
            .unwrap_or(0);
    }
    out
}

/// Recompute settlement totals for one counterparty kind from raw rows.
pub fn project_settlements(
    rows: &[(Journal, Vec<Posting>)],
    counterparty_kind: &str,
) -> Vec<CounterpartySettlement> {
    let mut settlements: BTreeMap<(String, Currency), CounterpartySettlement> = BTreeMap::new();
    let mut seen_journals: BTreeMap<(String, Currency), HashSet<aperture_core::JournalId>> =
        BTreeMap::new();

    for (journal, postings) in rows {
        for posting in postings {
            let Some(counterparty) = &posting.counterparty else {
                continue;
            };
            if counterparty.kind != counterparty_kind {
                continue;
            }

            let key = (counterparty.id.clone(), posting.currency.clone());
            let entry = settlements
                .entry(key.clone())
                .or_insert_with(|| CounterpartySettlement {
                    counterparty_kind: counterparty_kind.to_string(),
                    counterparty_id: counterparty.id.clone(),
                    currency: posting.currency.clone(),
                    accrued_minor: 0,
                    released_minor: 0,
                    paid_out_minor: 0,
                    journal_count: 0,
                    last_activity_at: journal.occurred_at,
                });

            match posting.direction {
                Direction::Credit => entry.accrued_minor += posting.amount_minor,
                Direction::Debit => {
                    entry.released_minor += posting.amount_minor;
                    if journal.flow_type == flow::PAYOUT {
                        entry.paid_out_minor += posting.amount_minor;
                    }
                }
            }
            if journal.occurred_at > entry.last_activity_at {
                entry.last_activity_at = journal.occurred_at;
            }

            seen_journals.entry(key).or_default().insert(journal.id);
        }
    }

    let mut out: Vec<CounterpartySettlement> = settlements.into_values().collect();
    for settlement in &mut out {
        settlement.journal_count = seen_journals
            .get(&(settlement.counterparty_id.clone(), settlement.currency.clone()))
            .map(|v| v.len() as u64)
            .unwrap_or(0);
    }
    out
}

/// Diff a reader's reported balances against a fresh recomputation.
///
/// An empty result means the reported view is exactly derivable from the
/// rows. Any drift is a bug or cache-staleness signal, never acceptable in
/// an authoritative view.
pub fn reconcile_account_balances(
    reported: &[AccountBalance],
    rows: &[(Journal, Vec<Posting>)],
) -> Vec<BalanceDrift> {
    let recomputed = project_account_balances(rows);
    let mut drifts = Vec::new();

    let key_of = |b: &AccountBalance| (b.account_code.clone(), b.currency.clone());
    let reported_map: BTreeMap<_, _> = reported.iter().map(|b| (key_of(b), b.clone())).collect();
    let recomputed_map: BTreeMap<_, _> =
        recomputed.iter().map(|b| (key_of(b), b.clone())).collect();

    for (key, fresh) in &recomputed_map {
        match reported_map.get(key) {
            Some(have) if have == fresh => {}
            have => drifts.push(BalanceDrift {
                account_code: key.0.clone(),
                currency: key.1.clone(),
                reported: have.cloned(),
                recomputed: Some(fresh.clone()),
            }),
        }
    }
    for (key, have) in &reported_map {
        if !recomputed_map.contains_key(key) {
            drifts.push(BalanceDrift {
                account_code: key.0.clone(),
                currency: key.1.clone(),
                reported: Some(have.clone()),
                recomputed: None,
            });
        }
    }
    drifts
}

#[cfg(test)]
mod tests {
    use super::*;
    use aperture_core::Metadata;
    use aperture_ledger::{Counterparty, JournalDraft, PostingDraft};
    use chrono::Utc;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn rows() -> Vec<(Journal, Vec<Posting>)> {
        let purchase = JournalDraft {
            idempotency_key: "k1".into(),
            source_kind: "checkout".into(),
            source_id: "sess_1".into(),
            flow_type: flow::PURCHASE.into(),
            provider: Some("stripe".into()),
            currency: usd(),
            description: None,
            metadata: Metadata::new(),
            occurred_at: None,
            postings: vec![
                PostingDraft::new("platform_cash_clearing", Direction::Debit, 1000, usd()),
                PostingDraft::new("platform_revenue", Direction::Credit, 700, usd()),
                PostingDraft::new("creator_payable", Direction::Credit, 300, usd())
                    .with_counterparty(Counterparty::new("creator", "cr_1")),
            ],
        };
        let payout = JournalDraft {
            idempotency_key: "k2".into(),
            source_kind: "payout".into(),
            source_id: "po_1".into(),
            flow_type: flow::PAYOUT.into(),
            provider: Some("stripe".into()),
            currency: usd(),
            description: None,
            metadata: Metadata::new(),
            occurred_at: None,
            postings: vec![
                PostingDraft::new("creator_payable", Direction::Debit, 120, usd())
                    .with_counterparty(Counterparty::new("creator", "cr_1")),
                PostingDraft::new("payout_clearing", Direction::Credit, 120, usd()),
            ],
        };
        let now = Utc::now();
        vec![purchase.materialize(now), payout.materialize(now)]
    }

    #[test]
    fn account_balances_sum_by_direction() {
        let balances = project_account_balances(&rows());
        let revenue = balances
            .iter()
            .find(|b| b.account_code == "platform_revenue")
            .unwrap();
        assert_eq!(revenue.credit_minor, 700);
        assert_eq!(revenue.debit_minor, 0);
        assert_eq!(revenue.net_minor(), -700);
        assert_eq!(revenue.journal_count, 1);

        let payable = balances
            .iter()
            .find(|b| b.account_code == "creator_payable")
            .unwrap();
        assert_eq!(payable.credit_minor, 300);
        assert_eq!(payable.debit_minor, 120);
        assert_eq!(payable.journal_count, 2);
    }

    #[test]
    fn every_journal_nets_to_zero_across_accounts() {
        let balances = project_account_balances(&rows());
        let net: i64 = balances.iter().map(|b| b.net_minor()).sum();
        assert_eq!(net, 0);
    }

    #[test]
    fn settlement_tracks_accrued_released_and_paid_out() {
        let settlements = project_settlements(&rows(), "creator");
        assert_eq!(settlements.len(), 1);
        let s = &settlements[0];
        assert_eq!(s.counterparty_id, "cr_1");
        assert_eq!(s.accrued_minor, 300);
        assert_eq!(s.released_minor, 120);
        assert_eq!(s.paid_out_minor, 120);
        assert_eq!(s.outstanding_minor(), 180);
        assert_eq!(s.journal_count, 2);
    }

    #[test]
    fn other_counterparty_kinds_are_excluded() {
        assert!(project_settlements(&rows(), "attendee").is_empty());
    }

    #[test]
    fn reconcile_is_clean_for_derived_views_and_flags_drift() {
        let rows = rows();
        let reported = project_account_balances(&rows);
        assert!(reconcile_account_balances(&reported, &rows).is_empty());

        let mut stale = reported.clone();
        stale[0].debit_minor += 1;
        let drifts = reconcile_account_balances(&stale, &rows);
        assert_eq!(drifts.len(), 1);
        assert_eq!(drifts[0].account_code, stale[0].account_code);
    }
}
