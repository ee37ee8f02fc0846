//! Journals and postings.
//!
//! A `Journal` is one atomic financial event composed of at least two
//! balanced `Posting` legs. Both are immutable once recorded; a reversing
//! event (refund) is a new journal referencing the original, never a
//! mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aperture_core::{Currency, JournalId, LedgerError, LedgerResult, Metadata, PostingId};

use crate::account::AccountRegistry;

/// Well-known flow types. The field is an open string; these constants keep
/// callers and the settlement view in agreement where it matters.
pub mod flow {
    pub const PURCHASE: &str = "purchase";
    pub const PAYOUT: &str = "payout";
    pub const REFUND: &str = "refund";
}

/// Side of a posting. Reversals use the opposite direction, never negative
/// amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    /// Parse from an untyped boundary (wire or storage row).
    pub fn parse(s: &str) -> LedgerResult<Self> {
        match s {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            other => Err(LedgerError::InvalidDirection(other.to_string())),
        }
    }
}

/// External party a posting's liability/payable is tracked against,
/// e.g. kind `creator` + the creator's id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counterparty {
    pub kind: String,
    pub id: String,
}

impl Counterparty {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// One leg of a journal as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingDraft {
    pub account_code: String,
    pub direction: Direction,
    /// Amount in the currency's smallest unit, strictly positive.
    pub amount_minor: i64,
    pub currency: Currency,
    pub counterparty: Option<Counterparty>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl PostingDraft {
    pub fn new(
        account_code: impl Into<String>,
        direction: Direction,
        amount_minor: i64,
        currency: Currency,
    ) -> Self {
        Self {
            account_code: account_code.into(),
            direction,
            amount_minor,
            currency,
            counterparty: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_counterparty(mut self, counterparty: Counterparty) -> Self {
        self.counterparty = Some(counterparty);
        self
    }
}

/// A journal as submitted by a caller, before recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalDraft {
    /// Caller-supplied key; exactly one journal ever exists per distinct key.
    pub idempotency_key: String,
    /// What triggered the journal, e.g. `subscription_checkout` / session id.
    pub source_kind: String,
    pub source_id: String,
    /// Business category, e.g. `purchase`, `payout`, `refund`.
    pub flow_type: String,
    pub provider: Option<String>,
    pub currency: Currency,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Caller-supplied business time. Not a sequencing primitive; defaults
    /// to the recording time when absent.
    pub occurred_at: Option<DateTime<Utc>>,
    pub postings: Vec<PostingDraft>,
}

impl JournalDraft {
    /// Validate this draft against the registry.
    ///
    /// Implements the full pre-write check: required scalars, minimum leg
    /// count, account resolution, positive amounts, per-leg currency
    /// equality, and the balance invariant. The first failing check wins;
    /// nothing is ever partially accepted.
    pub fn validate(&self, registry: &AccountRegistry) -> LedgerResult<()> {
        for (field, value) in [
            ("idempotency_key", &self.idempotency_key),
            ("source_kind", &self.source_kind),
            ("source_id", &self.source_id),
            ("flow_type", &self.flow_type),
        ] {
            if value.trim().is_empty() {
                return Err(LedgerError::invalid_argument(format!(
                    "{field} must be non-empty"
                )));
            }
        }

        if self.postings.len() < 2 {
            return Err(LedgerError::invalid_argument(
                "a journal requires at least 2 postings",
            ));
        }

        // Totals widen to i128 so pathological i64 amounts cannot overflow
        // the balance check.
        let mut debit_total: i128 = 0;
        let mut credit_total: i128 = 0;

        for posting in &self.postings {
            if !registry.is_active(&posting.account_code) {
                return Err(LedgerError::unknown_account(&posting.account_code));
            }
            if posting.amount_minor <= 0 {
                return Err(LedgerError::InvalidAmount(posting.amount_minor));
            }
            if posting.currency != self.currency {
                return Err(LedgerError::CurrencyMismatch {
                    journal: self.currency.to_string(),
                    posting: posting.currency.to_string(),
                });
            }
            match posting.direction {
                Direction::Debit => debit_total += posting.amount_minor as i128,
                Direction::Credit => credit_total += posting.amount_minor as i128,
            }
        }

        if debit_total != credit_total {
            return Err(LedgerError::UnbalancedJournal {
                debit_minor: debit_total,
                credit_minor: credit_total,
            });
        }

        Ok(())
    }

    /// Turn a validated draft into persistable records.
    ///
    /// Callers must have run `validate` first; this only assigns identities
    /// and timestamps.
    pub fn materialize(self, now: DateTime<Utc>) -> (Journal, Vec<Posting>) {
        let journal_id = JournalId::new();
        let journal = Journal {
            id: journal_id,
            idempotency_key: self.idempotency_key,
            source_kind: self.source_kind,
            source_id: self.source_id,
            flow_type: self.flow_type,
            provider: self.provider,
            currency: self.currency,
            description: self.description,
            metadata: self.metadata,
            occurred_at: self.occurred_at.unwrap_or(now),
            created_at: now,
        };
        let postings = self
            .postings
            .into_iter()
            .map(|p| Posting {
                id: PostingId::new(),
                journal_id,
                account_code: p.account_code,
                direction: p.direction,
                amount_minor: p.amount_minor,
                currency: p.currency,
                counterparty: p.counterparty,
                metadata: p.metadata,
            })
            .collect();
        (journal, postings)
    }
}

/// A recorded journal. Append-only: no code path updates or deletes one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    pub id: JournalId,
    pub idempotency_key: String,
    pub source_kind: String,
    pub source_id: String,
    pub flow_type: String,
    pub provider: Option<String>,
    pub currency: Currency,
    pub description: Option<String>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A recorded posting leg, owned exclusively by its journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: PostingId,
    pub journal_id: JournalId,
    pub account_code: String,
    pub direction: Direction,
    pub amount_minor: i64,
    pub currency: Currency,
    pub counterparty: Option<Counterparty>,
    pub metadata: Metadata,
}
