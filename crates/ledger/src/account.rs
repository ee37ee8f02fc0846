//! Chart of accounts.
//!
//! Accounts are provisioned out-of-band (configuration/migration) and the
//! ledger-writing path only ever reads them. Codes are stable identifiers:
//! never deleted, never reused with different semantics. Deactivation is the
//! only lifecycle transition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use aperture_core::{LedgerError, LedgerResult};

/// High-level account class.
///
/// Informational: the ledger does not enforce a normal balance side per
/// class. The sign convention is a property of how callers construct
/// postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

/// A single ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable code, e.g. `platform_revenue`.
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    pub is_active: bool,
}

impl Account {
    pub fn active(code: impl Into<String>, name: impl Into<String>, kind: AccountKind) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            kind,
            is_active: true,
        }
    }
}

/// Fixed, read-only set of ledger accounts.
///
/// Postings can only reference codes present and active here, which prevents
/// typos or malicious input from silently creating new ledger accounts.
#[derive(Debug, Clone)]
pub struct AccountRegistry {
    accounts: BTreeMap<String, Account>,
}

impl AccountRegistry {
    /// Build a registry from a provisioned account list.
    ///
    /// Duplicate or empty codes are a provisioning bug and rejected outright.
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> LedgerResult<Self> {
        let mut map = BTreeMap::new();
        for account in accounts {
            if account.code.trim().is_empty() {
                return Err(LedgerError::invalid_argument("account code must be non-empty"));
            }
            if map.insert(account.code.clone(), account.clone()).is_some() {
                return Err(LedgerError::invalid_argument(format!(
                    "duplicate account code: {}",
                    account.code
                )));
            }
        }
        Ok(Self { accounts: map })
    }

    pub fn get(&self, code: &str) -> Option<&Account> {
        self.accounts.get(code)
    }

    pub fn is_active(&self, code: &str) -> bool {
        self.accounts.get(code).map(|a| a.is_active).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    /// The platform's default chart of accounts.
    ///
    /// One shared set of codes for checkout, payout, and refund flows so
    /// callers and reconciliation views agree on spelling.
    pub fn platform_chart() -> Self {
        let accounts = [
            Account::active("platform_cash_clearing", "Provider cash clearing", AccountKind::Asset),
            Account::active("platform_revenue", "Platform revenue", AccountKind::Revenue),
            Account::active("provider_fee_expense", "Payment provider fees", AccountKind::Expense),
            Account::active("creator_payable", "Creator payable", AccountKind::Liability),
            Account::active(
                "attendee_credit_liability",
                "Attendee credit liability",
                AccountKind::Liability,
            ),
            Account::active("payout_clearing", "Payout clearing", AccountKind::Asset),
            Account::active("refund_clearing", "Refund clearing", AccountKind::Asset),
        ];
        // Codes are distinct literals, so the map can be built directly
        // without going through the fallible constructor.
        Self {
            accounts: accounts
                .into_iter()
                .map(|account| (account.code.clone(), account))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_chart_carries_every_flow_account() {
        let registry = AccountRegistry::platform_chart();
        let codes = [
            "platform_cash_clearing",
            "platform_revenue",
            "provider_fee_expense",
            "creator_payable",
            "attendee_credit_liability",
            "payout_clearing",
            "refund_clearing",
        ];
        assert_eq!(registry.iter().count(), codes.len());
        for code in codes {
            assert!(registry.is_active(code), "missing account {code}");
        }
    }

    #[test]
    fn lookup_and_activity() {
        let registry = AccountRegistry::platform_chart();
        assert!(registry.is_active("platform_revenue"));
        assert_eq!(
            registry.get("creator_payable").map(|a| a.kind),
            Some(AccountKind::Liability)
        );
        assert!(!registry.is_active("nonexistent_account"));
    }

    #[test]
    fn inactive_account_resolves_but_is_not_active() {
        let mut account = Account::active("legacy_escrow", "Legacy escrow", AccountKind::Asset);
        account.is_active = false;
        let registry = AccountRegistry::new(vec![account]).unwrap();
        assert!(registry.get("legacy_escrow").is_some());
        assert!(!registry.is_active("legacy_escrow"));
    }

    #[test]
    fn duplicate_codes_are_rejected() {
        let err = AccountRegistry::new(vec![
            Account::active("platform_revenue", "Revenue", AccountKind::Revenue),
            Account::active("platform_revenue", "Revenue again", AccountKind::Revenue),
        ])
        .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }
}
