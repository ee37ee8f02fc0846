//! Infrastructure layer: storage adapters, projections, config.
//!
//! Concurrency correctness lives in the datastore's transaction and
//! uniqueness machinery, never in application locks: every adapter here must
//! behave correctly when many process instances run it at once.

pub mod claim_store;
pub mod config;
pub mod ledger_store;
pub mod projections;
pub mod schema;

#[cfg(test)]
mod integration_tests;

pub use claim_store::{ClaimStore, InMemoryClaimStore, PostgresClaimStore};
pub use config::StorageConfig;
pub use ledger_store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, RecordedJournal};
pub use projections::{AccountBalance, BalanceReader, CounterpartySettlement};
