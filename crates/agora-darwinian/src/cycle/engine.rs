//! Tournament cycle engine
//!
//! One cycle, all or nothing:
//! 1. Snapshot population scores and compute percentiles
//! 2. Remove the bottom band and forfeit its balances to the treasury
//! 3. Pay performance bonuses to the top band
//! 4. Promote eligible top-band workers where the tier above has room
//! 5. Redistribute the forfeited utility pool to the top band, pro-rata by score
//!
//! Registry changes are undone from a snapshot and ledger transfers through
//! compensating reversals. Audit records are staged and only appended once
//! the cycle commits; a rollback appends a single `CycleRolledBack` entry.
//! Completed cycles are cached by id, so re-running an id is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use agora_common::audit::{AuditKind, AuditLog, AuditRecord};
use agora_common::{Account, CycleId, RankingError, TokenKind, WorkerId};
use agora_dispatch::{PerformanceTracker, WorkerRegistry};
use agora_governor::{EconomicGovernor, TransferJournal, TransferReason, TransferRequest};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::culling::policy::{BandPolicy, Bands};
use crate::culling::redistribution::pro_rata_shares;
use crate::percentile::calculator::PercentileCalculator;
use crate::promotion::allocator::{Promotion, PromotionAllocator, PromotionCandidate};
use crate::RankingConfig;

/// Committed outcome of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankCycleResult {
    pub cycle_id: CycleId,
    pub promoted: Vec<WorkerId>,
    /// Ranked workers neither promoted nor removed
    pub retained: Vec<WorkerId>,
    pub removed: Vec<WorkerId>,
    /// Forfeited utility paid out to the top band
    pub redistributed_amount: Decimal,
    /// Performance bonus per top-band worker
    pub bonuses: BTreeMap<WorkerId, Decimal>,
    pub promotions: Vec<Promotion>,
    pub percentiles: BTreeMap<WorkerId, f64>,
    pub completed_at: i64,
}

/// Undo state for an in-flight cycle
struct CycleTransaction {
    journal: TransferJournal,
    staged: Vec<AuditRecord>,
}

pub struct TournamentEngine {
    config: RankingConfig,
    policy: BandPolicy,
    registry: Arc<WorkerRegistry>,
    performance: Arc<PerformanceTracker>,
    governor: Arc<EconomicGovernor>,
    audit: Arc<AuditLog>,
    completed: DashMap<CycleId, RankCycleResult>,
    running: Mutex<()>,
}

impl TournamentEngine {
    pub fn new(
        config: RankingConfig,
        registry: Arc<WorkerRegistry>,
        performance: Arc<PerformanceTracker>,
        governor: Arc<EconomicGovernor>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            policy: BandPolicy::new(config.top_band_floor, config.bottom_band_ceiling),
            config,
            registry,
            performance,
            governor,
            audit,
            completed: DashMap::new(),
            running: Mutex::new(()),
        }
    }

    /// Result of a completed cycle, if any
    pub fn cached(&self, cycle_id: &CycleId) -> Option<RankCycleResult> {
        self.completed.get(cycle_id).map(|r| r.clone())
    }

    /// Run one cycle; a completed cycle id returns its cached result
    #[instrument(skip(self), fields(cycle = %cycle_id))]
    pub async fn run_cycle(&self, cycle_id: &CycleId) -> Result<RankCycleResult, RankingError> {
        if let Some(result) = self.cached(cycle_id) {
            info!("Ranking cycle already completed, returning cached result");
            return Ok(result);
        }

        let _running = self.running.lock().await;
        if let Some(result) = self.cached(cycle_id) {
            return Ok(result);
        }

        let snapshot = self.registry.snapshot();
        let mut tx = CycleTransaction {
            journal: TransferJournal::new(),
            staged: Vec::new(),
        };

        match self.execute(cycle_id, &mut tx).await {
            Ok(result) => {
                let mut staged = tx.staged;
                staged.push(
                    AuditRecord::new(AuditKind::CycleCommitted)
                        .with_cycle(cycle_id)
                        .with_amount(result.redistributed_amount)
                        .with_detail("promoted", result.promoted.len())
                        .with_detail("retained", result.retained.len())
                        .with_detail("removed", result.removed.len())
                        .with_detail("transfers", tx.journal.len()),
                );
                self.audit.append_all(staged);
                self.completed.insert(cycle_id.clone(), result.clone());

                info!(
                    promoted = result.promoted.len(),
                    retained = result.retained.len(),
                    removed = result.removed.len(),
                    redistributed = %result.redistributed_amount,
                    "Ranking cycle committed"
                );
                Ok(result)
            }
            Err(reason) => {
                self.registry.restore(snapshot);
                let transfers = tx.journal.len();
                let compensated = match self.governor.compensate(tx.journal).await {
                    Ok(_) => true,
                    Err(e) => {
                        error!(error = %e, "Ledger compensation incomplete; manual reconciliation required");
                        false
                    }
                };

                self.audit.append(
                    AuditRecord::new(AuditKind::CycleRolledBack)
                        .with_cycle(cycle_id)
                        .with_detail("reason", &reason)
                        .with_detail("transfers_reversed", transfers)
                        .with_detail("compensated", compensated),
                );
                error!(reason = %reason, "Ranking cycle rolled back");

                Err(RankingError::CycleAborted {
                    cycle_id: cycle_id.clone(),
                    reason,
                })
            }
        }
    }

    /// Run a cycle, retrying aborted attempts with a fixed backoff
    pub async fn run_cycle_with_retry(&self, cycle_id: &CycleId) -> Result<RankCycleResult, RankingError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            match self.run_cycle(cycle_id).await {
                Ok(result) => return Ok(result),
                Err(RankingError::CycleAborted { reason, .. }) => {
                    warn!(cycle = %cycle_id, attempt, reason = %reason, "Ranking attempt aborted");
                    last_reason = reason;
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(RankingError::RetriesExhausted {
            cycle_id: cycle_id.clone(),
            attempts,
            reason: last_reason,
        })
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    async fn execute(&self, cycle_id: &CycleId, tx: &mut CycleTransaction) -> Result<RankCycleResult, String> {
        let scores: BTreeMap<WorkerId, f64> = self
            .performance
            .get_population_scores()
            .into_iter()
            .filter(|(id, _)| self.registry.contains(id))
            .collect();
        let percentiles = PercentileCalculator::fractional(&scores);
        let bands = self.policy.partition(&percentiles);
        info!(
            population = scores.len(),
            top = bands.top.len(),
            middle = bands.middle.len(),
            bottom = bands.bottom.len(),
            "Ranking population partitioned"
        );

        let pool = self.remove_bottom(cycle_id, &bands, &percentiles, tx).await?;
        let bonuses = self.pay_bonuses(cycle_id, &bands, &scores, tx).await?;
        let promotions = self.promote(cycle_id, &bands, &percentiles, tx).await?;
        let redistributed_amount = self.redistribute(cycle_id, pool, &bands, &scores, tx).await?;

        for id in &bands.top {
            let (utility, governance) = self.governor.balances(id).await.map_err(|e| e.to_string())?;
            self.registry
                .set_balances(id, utility, governance)
                .map_err(|e| e.to_string())?;
        }

        let promoted: Vec<WorkerId> = promotions.iter().map(|p| p.worker_id.clone()).collect();
        let retained: Vec<WorkerId> = bands
            .top
            .iter()
            .chain(&bands.middle)
            .filter(|id| !promoted.contains(id))
            .cloned()
            .collect();

        Ok(RankCycleResult {
            cycle_id: cycle_id.clone(),
            promoted,
            retained,
            removed: bands.bottom,
            redistributed_amount,
            bonuses,
            promotions,
            percentiles,
            completed_at: agora_common::now_millis(),
        })
    }

    /// Forfeit and remove the bottom band; returns the forfeited utility pool
    async fn remove_bottom(
        &self,
        cycle_id: &CycleId,
        bands: &Bands,
        percentiles: &BTreeMap<WorkerId, f64>,
        tx: &mut CycleTransaction,
    ) -> Result<Decimal, String> {
        let mut pool = Decimal::ZERO;

        for id in &bands.bottom {
            let (utility, governance) = self.governor.balances(id).await.map_err(|e| e.to_string())?;

            for (kind, amount) in [(TokenKind::Utility, utility), (TokenKind::Governance, governance)] {
                if amount <= Decimal::ZERO {
                    continue;
                }
                let request = TransferRequest::new(
                    Account::worker(id),
                    Account::Treasury,
                    amount,
                    kind,
                    TransferReason::Forfeit,
                );
                self.governor
                    .transfer_journaled(&mut tx.journal, request)
                    .await
                    .map_err(|e| e.to_string())?;
                tx.staged.push(
                    AuditRecord::new(AuditKind::Forfeit)
                        .with_cycle(cycle_id)
                        .with_worker(id)
                        .with_amount(amount)
                        .with_detail("token", kind),
                );
            }
            pool += utility;

            let removed = self.registry.remove(id).map_err(|e| e.to_string())?;
            tx.staged.push(
                AuditRecord::new(AuditKind::Removal)
                    .with_cycle(cycle_id)
                    .with_worker(id)
                    .with_detail("tier", removed.rank_tier)
                    .with_detail("percentile", format!("{:.2}", percentiles.get(id).copied().unwrap_or(0.0))),
            );
        }
        Ok(pool)
    }

    async fn pay_bonuses(
        &self,
        cycle_id: &CycleId,
        bands: &Bands,
        scores: &BTreeMap<WorkerId, f64>,
        tx: &mut CycleTransaction,
    ) -> Result<BTreeMap<WorkerId, Decimal>, String> {
        let mut bonuses = BTreeMap::new();

        for id in &bands.top {
            let score = scores.get(id).copied().unwrap_or(0.0);
            let amount = self.governor.reward_for(score);
            if amount <= Decimal::ZERO {
                continue;
            }
            let request = TransferRequest::new(
                Account::Treasury,
                Account::worker(id),
                amount,
                TokenKind::Utility,
                TransferReason::PerformanceBonus,
            );
            self.governor
                .transfer_journaled(&mut tx.journal, request)
                .await
                .map_err(|e| e.to_string())?;
            tx.staged.push(
                AuditRecord::new(AuditKind::PerformanceBonus)
                    .with_cycle(cycle_id)
                    .with_worker(id)
                    .with_amount(amount)
                    .with_detail("score", format!("{score:.4}")),
            );
            bonuses.insert(id.clone(), amount);
        }
        Ok(bonuses)
    }

    async fn promote(
        &self,
        cycle_id: &CycleId,
        bands: &Bands,
        percentiles: &BTreeMap<WorkerId, f64>,
        tx: &mut CycleTransaction,
    ) -> Result<Vec<Promotion>, String> {
        let candidates: Vec<PromotionCandidate> = bands
            .top
            .iter()
            .filter_map(|id| {
                self.registry.get(id).map(|w| PromotionCandidate {
                    worker_id: id.clone(),
                    tier: w.rank_tier,
                    percentile: percentiles.get(id).copied().unwrap_or(0.0),
                })
            })
            .collect();
        let population: BTreeMap<u8, usize> = self
            .config
            .tiers
            .iter()
            .map(|t| (t.level, self.registry.tier_population(t.level)))
            .collect();

        let plan = PromotionAllocator::new(&self.config.tiers).plan(candidates, population);

        for promotion in &plan {
            if promotion.grant > Decimal::ZERO {
                let request = TransferRequest::new(
                    Account::Treasury,
                    Account::worker(&promotion.worker_id),
                    promotion.grant,
                    TokenKind::Governance,
                    TransferReason::PromotionGrant,
                );
                self.governor
                    .transfer_journaled(&mut tx.journal, request)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            self.registry
                .set_rank_tier(&promotion.worker_id, promotion.to_tier)
                .map_err(|e| e.to_string())?;
            tx.staged.push(
                AuditRecord::new(AuditKind::Promotion)
                    .with_cycle(cycle_id)
                    .with_worker(&promotion.worker_id)
                    .with_amount(promotion.grant)
                    .with_detail("from_tier", promotion.from_tier)
                    .with_detail("to_tier", promotion.to_tier)
                    .with_detail("percentile", format!("{:.2}", promotion.percentile)),
            );
        }
        Ok(plan)
    }

    /// Pay the forfeited pool out to the top band; returns the amount paid
    async fn redistribute(
        &self,
        cycle_id: &CycleId,
        pool: Decimal,
        bands: &Bands,
        scores: &BTreeMap<WorkerId, f64>,
        tx: &mut CycleTransaction,
    ) -> Result<Decimal, String> {
        if pool <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        if bands.top.is_empty() {
            warn!(pool = %pool, "No top band to receive forfeited pool; kept in treasury");
            return Ok(Decimal::ZERO);
        }

        let recipients: Vec<(WorkerId, f64)> = bands
            .top
            .iter()
            .map(|id| (id.clone(), scores.get(id).copied().unwrap_or(0.0)))
            .collect();

        let mut paid = Decimal::ZERO;
        for (id, share) in pro_rata_shares(pool, &recipients) {
            if share <= Decimal::ZERO {
                continue;
            }
            let request = TransferRequest::new(
                Account::Treasury,
                Account::worker(&id),
                share,
                TokenKind::Utility,
                TransferReason::Redistribution,
            );
            self.governor
                .transfer_journaled(&mut tx.journal, request)
                .await
                .map_err(|e| e.to_string())?;
            tx.staged.push(
                AuditRecord::new(AuditKind::Redistribution)
                    .with_cycle(cycle_id)
                    .with_worker(&id)
                    .with_amount(share),
            );
            paid += share;
        }
        Ok(paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agora_common::{LedgerError, PerformanceRecord, SkillProfile, TaskId, WorkerRegistration};
    use agora_governor::{GovernorConfig, InMemoryLedger, Ledger, TransferReceipt};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    /// Ledger that rejects exactly one transfer, the `fail_at`-th (0-based)
    struct FlakyLedger {
        inner: InMemoryLedger,
        calls: AtomicUsize,
        fail_at: usize,
    }

    #[async_trait]
    impl Ledger for FlakyLedger {
        async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, LedgerError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                return Err(LedgerError::Unavailable("injected failure".into()));
            }
            self.inner.transfer(request).await
        }

        async fn balance(&self, account: &Account, kind: TokenKind) -> Result<Decimal, LedgerError> {
            self.inner.balance(account, kind).await
        }

        async fn mint(&self, account: &Account, amount: Decimal, kind: TokenKind) -> Result<(), LedgerError> {
            self.inner.mint(account, amount, kind).await
        }

        async fn total_supply(&self, kind: TokenKind) -> Result<Decimal, LedgerError> {
            self.inner.total_supply(kind).await
        }
    }

    struct Fixture {
        registry: Arc<WorkerRegistry>,
        governor: Arc<EconomicGovernor>,
        audit: Arc<AuditLog>,
        engine: TournamentEngine,
    }

    /// Ten workers w-0..w-9 with scores 0.05, 0.15, ..., 0.95
    async fn fixture(ledger: Arc<dyn Ledger>) -> Fixture {
        ledger.mint(&Account::Treasury, dec!(100000), TokenKind::Utility).await.unwrap();
        ledger.mint(&Account::Treasury, dec!(10000), TokenKind::Governance).await.unwrap();

        let registry = Arc::new(WorkerRegistry::default());
        let performance = Arc::new(PerformanceTracker::default());
        let audit = Arc::new(AuditLog::silent());
        let governor = Arc::new(EconomicGovernor::new(&GovernorConfig::default(), ledger, audit.clone()));

        for i in 0..10 {
            let id = format!("w-{i}");
            let skills = SkillProfile::from_pairs([("python", 0.9)]).unwrap();
            registry.register(WorkerRegistration::new(id.as_str(), skills)).unwrap();
            let quality = i as f64 / 10.0 + 0.05;
            performance.record(PerformanceRecord::completed(WorkerId::new(id), TaskId::new(), quality).unwrap());
        }
        // Balance for the bottom worker to forfeit
        governor.issue_reward(&WorkerId::from("w-0"), None, 0.05).await.unwrap();

        let engine = TournamentEngine::new(
            RankingConfig {
                retry_backoff_ms: 1,
                ..Default::default()
            },
            registry.clone(),
            performance,
            governor.clone(),
            audit.clone(),
        );
        Fixture {
            registry,
            governor,
            audit,
            engine,
        }
    }

    async fn utility(governor: &EconomicGovernor, account: &Account) -> Decimal {
        governor.ledger().balance(account, TokenKind::Utility).await.unwrap()
    }

    #[tokio::test]
    async fn test_cycle_partitions_and_pays() {
        let ledger = Arc::new(InMemoryLedger::new());
        let f = fixture(ledger.clone()).await;

        let result = f.engine.run_cycle(&CycleId::from("c-1")).await.unwrap();

        assert_eq!(result.removed, vec![WorkerId::from("w-0")]);
        assert_eq!(result.promoted, vec![WorkerId::from("w-9")]);
        assert_eq!(result.retained.len(), 8);
        assert_eq!(result.bonuses.len(), 2);
        assert_eq!(result.redistributed_amount, dec!(80.02));

        assert!(!f.registry.contains(&WorkerId::from("w-0")));
        let top = f.registry.get(&WorkerId::from("w-9")).unwrap();
        assert_eq!(top.rank_tier, 4);
        assert_eq!(top.governance_balance, dec!(100));

        // Supply conserved across forfeits, bonuses and redistribution
        assert_eq!(ledger.sum_balances(TokenKind::Utility), dec!(100000));
        assert_eq!(ledger.sum_balances(TokenKind::Governance), dec!(10000));
        assert!(f.audit.verify_chain());
        assert_eq!(
            f.audit.for_cycle(&CycleId::from("c-1")).last().unwrap().record.kind,
            AuditKind::CycleCommitted
        );
    }

    #[tokio::test]
    async fn test_cycle_idempotent_per_id() {
        let ledger = Arc::new(InMemoryLedger::new());
        let f = fixture(ledger.clone()).await;
        let cycle = CycleId::from("c-1");

        let first = f.engine.run_cycle(&cycle).await.unwrap();
        let transfers = ledger.transfer_count();
        let audit_len = f.audit.len();

        let second = f.engine.run_cycle(&cycle).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.transfer_count(), transfers);
        assert_eq!(f.audit.len(), audit_len);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_everything() {
        // call 0 is the fixture's reward; fail a transfer mid-cycle
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryLedger::new(),
            calls: AtomicUsize::new(0),
            fail_at: 3,
        });
        let f = fixture(ledger.clone()).await;
        let before = f.registry.snapshot();
        let treasury_before = utility(&f.governor, &Account::Treasury).await;

        let err = f.engine.run_cycle(&CycleId::from("c-1")).await.unwrap_err();
        assert!(matches!(err, RankingError::CycleAborted { .. }));

        assert_eq!(f.registry.snapshot(), before);
        assert_eq!(utility(&f.governor, &Account::Treasury).await, treasury_before);
        assert_eq!(ledger.inner.sum_balances(TokenKind::Utility), dec!(100000));
        assert!(f.engine.cached(&CycleId::from("c-1")).is_none());

        let entries = f.audit.for_cycle(&CycleId::from("c-1"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.kind, AuditKind::CycleRolledBack);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryLedger::new(),
            calls: AtomicUsize::new(0),
            fail_at: 2,
        });
        let f = fixture(ledger.clone()).await;

        let result = f.engine.run_cycle_with_retry(&CycleId::from("c-1")).await.unwrap();
        assert_eq!(result.removed.len(), 1);
        assert_eq!(ledger.inner.sum_balances(TokenKind::Utility), dec!(100000));

        let kinds: Vec<AuditKind> = f
            .audit
            .for_cycle(&CycleId::from("c-1"))
            .into_iter()
            .map(|e| e.record.kind)
            .collect();
        assert_eq!(kinds.first(), Some(&AuditKind::CycleRolledBack));
        assert_eq!(kinds.last(), Some(&AuditKind::CycleCommitted));
    }

    #[tokio::test]
    async fn test_empty_treasury_aborts_and_exhausts_retries() {
        let ledger = Arc::new(InMemoryLedger::new());
        let f = fixture(ledger.clone()).await;
        let treasury = utility(&f.governor, &Account::Treasury).await;
        // Drain the treasury so bonuses cannot be paid
        ledger
            .transfer(TransferRequest::new(
                Account::Treasury,
                Account::worker(&WorkerId::from("w-5")),
                treasury,
                TokenKind::Utility,
                TransferReason::TaskReward,
            ))
            .await
            .unwrap();

        let err = f.engine.run_cycle_with_retry(&CycleId::from("c-1")).await.unwrap_err();
        assert!(matches!(err, RankingError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(f.registry.len(), 10);
    }

    #[tokio::test]
    async fn test_unscored_workers_not_ranked() {
        let ledger = Arc::new(InMemoryLedger::new());
        let f = fixture(ledger).await;
        let skills = SkillProfile::from_pairs([("python", 0.9)]).unwrap();
        f.registry.register(WorkerRegistration::new("fresh", skills)).unwrap();

        let result = f.engine.run_cycle(&CycleId::from("c-1")).await.unwrap();
        assert!(!result.percentiles.contains_key(&WorkerId::from("fresh")));
        assert!(f.registry.contains(&WorkerId::from("fresh")));
    }
}
