//! Token accounts and ledger errors
//!
//! Two token kinds circulate:
//! - Utility tokens: paid as task rewards and performance bonuses
//! - Governance tokens: granted on rank-tier promotion
//!
//! Accounts are either the shared treasury or a worker's own account.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::WorkerId;
use crate::TOKEN_DECIMALS;

/// Token kind held in a ledger account
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Utility,
    Governance,
}

impl TokenKind {
    pub const ALL: [TokenKind; 2] = [TokenKind::Utility, TokenKind::Governance];
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Utility => write!(f, "UTIL"),
            TokenKind::Governance => write!(f, "GOV"),
        }
    }
}

/// Ledger account address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Account {
    /// Pooled account funding rewards and receiving forfeits
    Treasury,
    /// A worker's own balance
    Worker(WorkerId),
}

impl Account {
    pub fn worker(id: &WorkerId) -> Self {
        Account::Worker(id.clone())
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Account::Treasury => write!(f, "treasury"),
            Account::Worker(id) => write!(f, "worker:{}", id),
        }
    }
}

/// Ledger operation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient {kind} balance on {account}: required {required}, available {available}")]
    InsufficientBalance {
        account: Account,
        kind: TokenKind,
        required: Decimal,
        available: Decimal,
    },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Source and destination are the same account: {0}")]
    SameAccount(Account),

    #[error("Idempotency key reused with a different request: {0}")]
    IdempotencyConflict(uuid::Uuid),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Round a token amount to ledger precision
#[inline]
pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp(TOKEN_DECIMALS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_display() {
        assert_eq!(Account::Treasury.to_string(), "treasury");
        assert_eq!(Account::worker(&WorkerId::from("w-1")).to_string(), "worker:w-1");
    }

    #[test]
    fn test_round_amount() {
        assert_eq!(round_amount(dec!(1.123456789)), dec!(1.12345679));
    }

    #[test]
    fn test_insufficient_balance_message() {
        let err = LedgerError::InsufficientBalance {
            account: Account::Treasury,
            kind: TokenKind::Utility,
            required: dec!(100),
            available: dec!(5),
        };
        assert!(err.to_string().contains("UTIL"));
        assert!(err.to_string().contains("treasury"));
    }
}
