//! Ledger boundary
//!
//! The durable settlement ledger is external; the engine only sees the
//! [`Ledger`] trait. Every transfer carries an idempotency key: replaying a
//! key returns the original receipt instead of moving funds twice, which is
//! what makes a failed call safe to retry.
//!
//! [`InMemoryLedger`] is the reference implementation used standalone and in
//! tests. Balances sit behind one mutex per (account, token) entry; a transfer
//! locks its two entries in key order so concurrent transfers never deadlock
//! and never break conservation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agora_common::types::token::round_amount;
use agora_common::{Account, LedgerError, TokenKind};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

/// Why funds moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferReason {
    TaskReward,
    PerformanceBonus,
    PromotionGrant,
    Forfeit,
    Redistribution,
    Compensation,
}

impl std::fmt::Display for TransferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransferReason::TaskReward => "task_reward",
            TransferReason::PerformanceBonus => "performance_bonus",
            TransferReason::PromotionGrant => "promotion_grant",
            TransferReason::Forfeit => "forfeit",
            TransferReason::Redistribution => "redistribution",
            TransferReason::Compensation => "compensation",
        };
        write!(f, "{}", s)
    }
}

/// Transfer instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub idempotency_key: Uuid,
    pub from: Account,
    pub to: Account,
    pub amount: Decimal,
    pub kind: TokenKind,
    pub reason: TransferReason,
}

impl TransferRequest {
    /// New request with a fresh idempotency key; amount rounded to ledger precision
    pub fn new(from: Account, to: Account, amount: Decimal, kind: TokenKind, reason: TransferReason) -> Self {
        Self {
            idempotency_key: Uuid::now_v7(),
            from,
            to,
            amount: round_amount(amount),
            kind,
            reason,
        }
    }

    pub fn with_key(mut self, idempotency_key: Uuid) -> Self {
        self.idempotency_key = idempotency_key;
        self
    }

    /// Same movement of funds (reason is informational)
    fn same_movement(&self, other: &TransferRequest) -> bool {
        self.from == other.from && self.to == other.to && self.amount == other.amount && self.kind == other.kind
    }
}

/// Proof of an applied transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub idempotency_key: Uuid,
    /// Ledger-assigned position
    pub sequence: u64,
    pub from: Account,
    pub to: Account,
    pub amount: Decimal,
    pub kind: TokenKind,
    pub reason: TransferReason,
    pub timestamp: i64,
}

/// External settlement ledger
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Move `amount` atomically; fully applied or fully rejected
    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, LedgerError>;

    /// Current balance (zero for unknown accounts)
    async fn balance(&self, account: &Account, kind: TokenKind) -> Result<Decimal, LedgerError>;

    /// Emission: create new tokens on `account`
    async fn mint(&self, account: &Account, amount: Decimal, kind: TokenKind) -> Result<(), LedgerError>;

    /// Tokens in existence
    async fn total_supply(&self, kind: TokenKind) -> Result<Decimal, LedgerError>;
}

type BalanceKey = (Account, TokenKind);

/// In-memory reference ledger
pub struct InMemoryLedger {
    balances: DashMap<BalanceKey, Arc<Mutex<Decimal>>>,
    supply: DashMap<TokenKind, Decimal>,
    receipts: DashMap<Uuid, (TransferRequest, TransferReceipt)>,
    sequence: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            supply: DashMap::new(),
            receipts: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Sum of every account balance of `kind` (equals supply when conserved)
    pub fn sum_balances(&self, kind: TokenKind) -> Decimal {
        self.balances
            .iter()
            .filter(|entry| entry.key().1 == kind)
            .map(|entry| *entry.value().lock())
            .sum()
    }

    /// Number of transfers applied
    pub fn transfer_count(&self) -> usize {
        self.receipts.len()
    }

    fn slot(&self, account: &Account, kind: TokenKind) -> Arc<Mutex<Decimal>> {
        self.balances
            .entry((account.clone(), kind))
            .or_insert_with(|| Arc::new(Mutex::new(Decimal::ZERO)))
            .clone()
    }

    fn apply(&self, request: &TransferRequest) -> Result<TransferReceipt, LedgerError> {
        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if request.from == request.to {
            return Err(LedgerError::SameAccount(request.from.clone()));
        }

        let from_key = (request.from.clone(), request.kind);
        let to_key = (request.to.clone(), request.kind);
        let from_slot = self.slot(&request.from, request.kind);
        let to_slot = self.slot(&request.to, request.kind);

        // Lock in key order
        let (mut from_balance, mut to_balance) = if from_key < to_key {
            let f = from_slot.lock();
            let t = to_slot.lock();
            (f, t)
        } else {
            let t = to_slot.lock();
            let f = from_slot.lock();
            (f, t)
        };

        if *from_balance < request.amount {
            return Err(LedgerError::InsufficientBalance {
                account: request.from.clone(),
                kind: request.kind,
                required: request.amount,
                available: *from_balance,
            });
        }

        *from_balance -= request.amount;
        *to_balance += request.amount;

        Ok(TransferReceipt {
            idempotency_key: request.idempotency_key,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            from: request.from.clone(),
            to: request.to.clone(),
            amount: request.amount,
            kind: request.kind,
            reason: request.reason,
            timestamp: agora_common::now_millis(),
        })
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, LedgerError> {
        match self.receipts.entry(request.idempotency_key) {
            Entry::Occupied(existing) => {
                let (original, receipt) = existing.get();
                if original.same_movement(&request) {
                    trace!(key = %request.idempotency_key, "Idempotent transfer replay");
                    Ok(receipt.clone())
                } else {
                    Err(LedgerError::IdempotencyConflict(request.idempotency_key))
                }
            }
            Entry::Vacant(slot) => {
                let receipt = self.apply(&request)?;
                debug!(
                    from = %receipt.from,
                    to = %receipt.to,
                    amount = %receipt.amount,
                    kind = %receipt.kind,
                    reason = %receipt.reason,
                    "Transfer applied"
                );
                slot.insert((request, receipt.clone()));
                Ok(receipt)
            }
        }
    }

    async fn balance(&self, account: &Account, kind: TokenKind) -> Result<Decimal, LedgerError> {
        Ok(self
            .balances
            .get(&(account.clone(), kind))
            .map(|slot| *slot.lock())
            .unwrap_or(Decimal::ZERO))
    }

    async fn mint(&self, account: &Account, amount: Decimal, kind: TokenKind) -> Result<(), LedgerError> {
        let amount = round_amount(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let slot = self.slot(account, kind);
        *slot.lock() += amount;
        *self.supply.entry(kind).or_insert(Decimal::ZERO) += amount;
        debug!(account = %account, amount = %amount, kind = %kind, "Tokens minted");
        Ok(())
    }

    async fn total_supply(&self, kind: TokenKind) -> Result<Decimal, LedgerError> {
        Ok(self.supply.get(&kind).map(|s| *s).unwrap_or(Decimal::ZERO))
    }
}
