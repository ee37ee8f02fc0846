//! Ledger module (double-entry, append-only).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. The
//! storage adapters in `aperture-infra` consume these types.

pub mod account;
pub mod journal;

pub use account::{Account, AccountKind, AccountRegistry};
pub use journal::{
    flow, Counterparty, Direction, Journal, JournalDraft, Posting, PostingDraft,
};
