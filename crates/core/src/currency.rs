//! Currency code value object.
//!
//! The ledger treats currency as an opaque validated string: conversion
//! policy lives with callers, but a posting's currency must always equal its
//! journal's currency, so the code itself needs a stable, comparable form.

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// ISO-like currency code: 3 to 8 ASCII uppercase letters.
///
/// Compared by value. Lowercase input is accepted and normalized on parse so
/// `"usd"` and `"USD"` cannot drift into two distinct ledger currencies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Result<Self, LedgerError> {
        let code = code.as_ref().trim();
        if code.len() < 3 || code.len() > 8 {
            return Err(LedgerError::invalid_argument(format!(
                "currency code must be 3..=8 letters, got {:?}",
                code
            )));
        }
        if !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(LedgerError::invalid_argument(format!(
                "currency code must be ASCII letters only, got {:?}",
                code
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_iso_codes_and_normalizes_case() {
        assert_eq!(Currency::new("USD").unwrap().as_str(), "USD");
        assert_eq!(Currency::new("ngn").unwrap().as_str(), "NGN");
        assert_eq!(Currency::new(" EUR ").unwrap().as_str(), "EUR");
    }

    #[test]
    fn rejects_malformed_codes() {
        for bad in ["", "US", "US1", "TOOLONGCODE", "U$D"] {
            let err = Currency::new(bad).unwrap_err();
            assert_eq!(err.code(), "invalid_argument", "case {bad:?}");
        }
    }
}
