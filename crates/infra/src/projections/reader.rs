use std::sync::Arc;

use async_trait::async_trait;

use aperture_core::{Currency, LedgerError};

use super::{AccountBalance, CounterpartySettlement};

/// Read surface for the balance projection.
///
/// Implemented by every ledger store. Strictly read-only: implementations
/// derive results from postings and journals on each call.
#[async_trait]
pub trait BalanceReader: Send + Sync {
    /// Running balance per (account_code, currency).
    async fn account_balances(&self) -> Result<Vec<AccountBalance>, LedgerError>;

    /// Settlement totals per (counterparty_id, currency), filtered to one
    /// counterparty kind (e.g. `creator`).
    async fn counterparty_settlements(
        &self,
        counterparty_kind: &str,
    ) -> Result<Vec<CounterpartySettlement>, LedgerError>;

    /// Balance for a single account and currency.
    async fn account_balance(
        &self,
        account_code: &str,
        currency: &Currency,
    ) -> Result<Option<AccountBalance>, LedgerError> {
        Ok(self
            .account_balances()
            .await?
            .into_iter()
            .find(|b| b.account_code == account_code && &b.currency == currency))
    }
}

#[async_trait]
impl<S> BalanceReader for Arc<S>
where
    S: BalanceReader + ?Sized,
{
    async fn account_balances(&self) -> Result<Vec<AccountBalance>, LedgerError> {
        (**self).account_balances().await
    }

    async fn counterparty_settlements(
        &self,
        counterparty_kind: &str,
    ) -> Result<Vec<CounterpartySettlement>, LedgerError> {
        (**self).counterparty_settlements(counterparty_kind).await
    }

    async fn account_balance(
        &self,
        account_code: &str,
        currency: &Currency,
    ) -> Result<Option<AccountBalance>, LedgerError> {
        (**self).account_balance(account_code, currency).await
    }
}
