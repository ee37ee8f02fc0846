//! Ledger error model.
//!
//! One taxonomy for the whole core: callers branch on the variant (or the
//! stable `code()` string when crossing a serialization boundary), never on
//! message text. HTTP status mapping is a caller-layer concern.

use thiserror::Error;

/// Result type used across the ledger core.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Core error taxonomy.
///
/// Validation and idempotency failures are deterministic and safe to surface
/// to callers as-is. `StorageUnavailable` is the fail-closed variant: when the
/// datastore cannot uphold the ledger guarantees, the operation is refused
/// rather than degraded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A required field was missing or malformed; rejected before any write.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A posting referenced an account code not present (or inactive) in the
    /// registry.
    #[error("unknown or inactive account: {0}")]
    UnknownAccount(String),

    /// A posting direction outside {debit, credit} arrived from an untyped
    /// boundary (wire or storage row).
    #[error("invalid posting direction: {0}")]
    InvalidDirection(String),

    /// A posting amount was zero or negative. Reversals use the opposite
    /// direction, never negative amounts.
    #[error("invalid posting amount: {0}")]
    InvalidAmount(i64),

    /// A posting's currency differed from its journal's currency.
    #[error("currency mismatch: journal is {journal}, posting is {posting}")]
    CurrencyMismatch { journal: String, posting: String },

    /// Debit and credit totals differ. Never coerced; the whole journal is
    /// rejected with no partial write.
    #[error("unbalanced journal: debits {debit_minor} != credits {credit_minor}")]
    UnbalancedJournal { debit_minor: i128, credit_minor: i128 },

    /// An idempotency key was reused with semantically different content.
    #[error("idempotency key reused with different request content")]
    IdempotencyConflict,

    /// A concurrent attempt with the same idempotency key is mid-flight;
    /// retry with backoff.
    #[error("operation with this idempotency key is still in progress")]
    IdempotencyInProgress,

    /// A requested record does not exist.
    #[error("not found")]
    NotFound,

    /// The datastore is unreachable or missing required schema.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl LedgerError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unknown_account(code: impl Into<String>) -> Self {
        Self::UnknownAccount(code.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    /// Stable machine-readable code for this error.
    ///
    /// These strings are part of the caller contract and never change.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::UnknownAccount(_) => "unknown_account",
            Self::InvalidDirection(_) => "invalid_direction",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::CurrencyMismatch { .. } => "currency_mismatch",
            Self::UnbalancedJournal { .. } => "unbalanced_journal",
            Self::IdempotencyConflict => "idempotency_conflict",
            Self::IdempotencyInProgress => "idempotency_in_progress",
            Self::NotFound => "not_found",
            Self::StorageUnavailable(_) => "storage_unavailable",
        }
    }

    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IdempotencyInProgress | Self::StorageUnavailable(_)
        )
    }
}
