//! Read-only balance views derived from postings.
//!
//! Never a source of truth: both views must be recomputable at any time from
//! the journals and postings alone, and `reconcile` verifies that a store's
//! reported balances match a fresh recomputation.

pub mod balances;
mod reader;

pub use balances::{
    project_account_balances, project_settlements, reconcile_account_balances, AccountBalance,
    BalanceDrift, CounterpartySettlement,
};
pub use reader::BalanceReader;
