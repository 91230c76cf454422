//! Economic governor
//!
//! Turns performance into token transfers against the [`Ledger`]. A task
//! reward the treasury cannot cover is never dropped: it goes to a backlog,
//! raises an alert (error log and a `RewardDeferred` audit entry), and is
//! reissued by [`EconomicGovernor::retry_backlog`] under its original
//! idempotency key.
//!
//! Transactional callers (the ranking cycle) move funds through a
//! [`TransferJournal`] and undo them with [`EconomicGovernor::compensate`].

use std::collections::VecDeque;
use std::sync::Arc;

use agora_common::audit::{AuditKind, AuditLog, AuditRecord};
use agora_common::{Account, LedgerError, TaskId, TokenKind, WorkerId};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::ledger::{Ledger, TransferReason, TransferReceipt, TransferRequest};
use crate::reward::RewardCalculator;
use crate::utility::UtilityFunction;
use crate::GovernorConfig;

/// Reward waiting for the treasury to be refilled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredReward {
    pub worker_id: WorkerId,
    pub task_id: Option<TaskId>,
    pub request: TransferRequest,
    pub attempts: u32,
    pub last_error: String,
    pub deferred_at: i64,
}

/// Result of a reward issuance
#[derive(Debug, Clone, PartialEq)]
pub enum RewardOutcome {
    Issued(TransferReceipt),
    Deferred(DeferredReward),
}

impl RewardOutcome {
    pub fn amount(&self) -> Decimal {
        match self {
            RewardOutcome::Issued(receipt) => receipt.amount,
            RewardOutcome::Deferred(deferred) => deferred.request.amount,
        }
    }

    pub fn is_issued(&self) -> bool {
        matches!(self, RewardOutcome::Issued(_))
    }
}

/// Backlog retry summary
#[derive(Debug, Clone, Default)]
pub struct BacklogReport {
    pub issued: Vec<(DeferredReward, TransferReceipt)>,
    pub still_deferred: usize,
}

/// Valuation of a set of rewards paid to one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardBatch {
    pub worker_id: WorkerId,
    pub nominal_total: Decimal,
    pub balance_before: Decimal,
    /// U(balance_before + nominal_total) − U(balance_before)
    pub utility_gain: f64,
}

/// Transfers made inside one transactional scope
#[derive(Debug, Clone, Default)]
pub struct TransferJournal {
    receipts: Vec<TransferReceipt>,
}

impl TransferJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipts(&self) -> &[TransferReceipt] {
        &self.receipts
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }
}

pub struct EconomicGovernor {
    ledger: Arc<dyn Ledger>,
    rewards: RewardCalculator,
    utility: UtilityFunction,
    audit: Arc<AuditLog>,
    backlog: Mutex<VecDeque<DeferredReward>>,
}

impl EconomicGovernor {
    pub fn new(config: &GovernorConfig, ledger: Arc<dyn Ledger>, audit: Arc<AuditLog>) -> Self {
        Self {
            ledger,
            rewards: RewardCalculator::new(config.reward.clone()),
            utility: UtilityFunction::new(config.utility.clone()),
            audit,
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn utility(&self) -> &UtilityFunction {
        &self.utility
    }

    /// Reward amount for a performance score
    pub fn reward_for(&self, performance_score: f64) -> Decimal {
        self.rewards.reward_for(performance_score)
    }

    /// Pay a task reward from the treasury, deferring it when the ledger
    /// cannot apply it now
    #[instrument(skip(self, worker_id), fields(worker = %worker_id))]
    pub async fn issue_reward(
        &self,
        worker_id: &WorkerId,
        task_id: Option<TaskId>,
        performance_score: f64,
    ) -> Result<RewardOutcome, LedgerError> {
        let amount = self.reward_for(performance_score);
        let request = TransferRequest::new(
            Account::Treasury,
            Account::worker(worker_id),
            amount,
            TokenKind::Utility,
            TransferReason::TaskReward,
        );

        match self.ledger.transfer(request.clone()).await {
            Ok(receipt) => {
                info!(amount = %receipt.amount, "Reward issued");
                Ok(RewardOutcome::Issued(receipt))
            }
            Err(e) if is_retriable(&e) => {
                let deferred = DeferredReward {
                    worker_id: worker_id.clone(),
                    task_id,
                    request,
                    attempts: 1,
                    last_error: e.to_string(),
                    deferred_at: agora_common::now_millis(),
                };
                self.defer(deferred.clone());
                Ok(RewardOutcome::Deferred(deferred))
            }
            Err(e) => Err(e),
        }
    }

    /// Reissue every backlogged reward with its original idempotency key
    pub async fn retry_backlog(&self) -> BacklogReport {
        let pending: Vec<DeferredReward> = self.backlog.lock().drain(..).collect();
        let mut report = BacklogReport::default();

        for mut deferred in pending {
            match self.ledger.transfer(deferred.request.clone()).await {
                Ok(receipt) => {
                    info!(worker = %deferred.worker_id, amount = %receipt.amount, attempts = deferred.attempts + 1, "Deferred reward issued");
                    report.issued.push((deferred, receipt));
                }
                Err(e) if is_retriable(&e) => {
                    deferred.attempts += 1;
                    deferred.last_error = e.to_string();
                    self.backlog.lock().push_back(deferred);
                    report.still_deferred += 1;
                }
                Err(e) => {
                    error!(worker = %deferred.worker_id, error = %e, "Deferred reward rejected permanently");
                }
            }
        }
        report
    }

    /// Drop backlogged rewards of a removed worker; returns the count dropped
    pub fn cancel_deferred(&self, worker_id: &WorkerId) -> usize {
        let mut backlog = self.backlog.lock();
        let before = backlog.len();
        backlog.retain(|d| &d.worker_id != worker_id);
        let dropped = before - backlog.len();
        if dropped > 0 {
            warn!(worker = %worker_id, dropped, "Deferred rewards cancelled");
        }
        dropped
    }

    pub fn backlog(&self) -> Vec<DeferredReward> {
        self.backlog.lock().iter().cloned().collect()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    /// Apply a transfer and record it for compensation
    pub async fn transfer_journaled(
        &self,
        journal: &mut TransferJournal,
        request: TransferRequest,
    ) -> Result<TransferReceipt, LedgerError> {
        let receipt = self.ledger.transfer(request).await?;
        journal.receipts.push(receipt.clone());
        Ok(receipt)
    }

    /// Reverse every journaled transfer, newest first
    pub async fn compensate(&self, journal: TransferJournal) -> Result<usize, LedgerError> {
        let count = journal.receipts.len();
        for receipt in journal.receipts.into_iter().rev() {
            let reverse = TransferRequest::new(
                receipt.to.clone(),
                receipt.from.clone(),
                receipt.amount,
                receipt.kind,
                TransferReason::Compensation,
            );
            if let Err(e) = self.ledger.transfer(reverse).await {
                error!(sequence = receipt.sequence, error = %e, "Compensating transfer failed");
                return Err(e);
            }
        }
        if count > 0 {
            warn!(transfers = count, "Journal compensated");
        }
        Ok(count)
    }

    /// Current balances for a worker (utility, governance)
    pub async fn balances(&self, worker_id: &WorkerId) -> Result<(Decimal, Decimal), LedgerError> {
        let account = Account::worker(worker_id);
        let utility = self.ledger.balance(&account, TokenKind::Utility).await?;
        let governance = self.ledger.balance(&account, TokenKind::Governance).await?;
        Ok((utility, governance))
    }

    /// U(utility balance)
    pub async fn utility_of(&self, worker_id: &WorkerId) -> Result<f64, LedgerError> {
        let balance = self
            .ledger
            .balance(&Account::worker(worker_id), TokenKind::Utility)
            .await?;
        Ok(self.utility.value_of(balance))
    }

    /// Value rewards already paid to a worker against the balance they started from
    pub async fn value_batch(&self, worker_id: &WorkerId, amounts: &[Decimal]) -> Result<RewardBatch, LedgerError> {
        let nominal_total: Decimal = amounts.iter().sum();
        let current = self
            .ledger
            .balance(&Account::worker(worker_id), TokenKind::Utility)
            .await?;
        let balance_before = (current - nominal_total).max(Decimal::ZERO);

        Ok(RewardBatch {
            worker_id: worker_id.clone(),
            nominal_total,
            balance_before,
            utility_gain: self.utility.gain(balance_before, nominal_total),
        })
    }

    fn defer(&self, deferred: DeferredReward) {
        error!(
            worker = %deferred.worker_id,
            amount = %deferred.request.amount,
            error = %deferred.last_error,
            "Reward deferred: treasury cannot cover transfer"
        );
        let mut record = AuditRecord::new(AuditKind::RewardDeferred)
            .with_worker(&deferred.worker_id)
            .with_amount(deferred.request.amount)
            .with_detail("reason", &deferred.last_error)
            .with_detail("idempotency_key", deferred.request.idempotency_key);
        if let Some(task_id) = deferred.task_id {
            record = record.with_detail("task_id", task_id);
        }
        self.audit.append(record);
        self.backlog.lock().push_back(deferred);
    }
}

fn is_retriable(err: &LedgerError) -> bool {
    matches!(
        err,
        LedgerError::InsufficientBalance { .. } | LedgerError::Unavailable(_)
    )
}
