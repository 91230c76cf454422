//! Orchestrator facade
//!
//! Owns every engine component and is the single entry point for the node's
//! operations. Task operations hold the quiesce gate shared; a ranking cycle
//! holds it exclusively so it sees a population no task is mutating.

use std::sync::Arc;
use std::time::Instant;

use agora_common::audit::{AuditEntry, AuditLog, JsonLinesAuditSink};
use agora_common::events::{AgoraEvent, EventBus};
use agora_common::{
    Account, AgoraError, CycleId, IdentityError, PerformanceRecord, RegistryError, Result, Task, TaskId,
    TaskSpec, TaskStatus, TokenKind, VentureId, Worker, WorkerId, WorkerRegistration,
};
use agora_darwinian::{RankCycleResult, TournamentEngine};
use agora_dispatch::{AssignmentOutcome, FailureOutcome, PerformanceTracker, TaskAssignmentEngine, WorkerRegistry};
use agora_governor::{EconomicGovernor, InMemoryLedger, Ledger, RewardOutcome};
use agora_venture::{PhaseTemplate, Venture, VentureManager, VentureStatusReport, VentureTransition};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::config::AgoraConfig;
use crate::identity::{AllowAll, IdentityVerifier, StaticTokenVerifier};
use crate::metrics::OrchestratorMetrics;

/// What happened to a completed task's reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RewardStatus {
    Issued { amount: Decimal },
    Deferred { amount: Decimal, reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub quality: f64,
    pub performance_score: f64,
    pub reward: RewardStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub requeued: bool,
    pub status: TaskStatus,
    pub attempts: u32,
}

/// Work done by one `tick`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub timed_out: usize,
    pub assigned: usize,
    pub unmatched: usize,
    pub rewards_reissued: usize,
    pub rewards_still_deferred: usize,
    pub venture_transitions: usize,
}

/// Serializable export of the engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSnapshot {
    pub taken_at: i64,
    pub workers: Vec<Worker>,
    pub tasks: Vec<Task>,
    pub performance_records: Vec<PerformanceRecord>,
    pub ventures: Vec<Venture>,
    pub audit: Vec<AuditEntry>,
    pub audit_chain_valid: bool,
}

pub struct Orchestrator {
    config: AgoraConfig,
    registry: Arc<WorkerRegistry>,
    performance: Arc<PerformanceTracker>,
    dispatch: Arc<TaskAssignmentEngine>,
    governor: Arc<EconomicGovernor>,
    tournament: TournamentEngine,
    ventures: VentureManager,
    identity: Arc<dyn IdentityVerifier>,
    events: Arc<EventBus>,
    audit: Arc<AuditLog>,
    metrics: Arc<OrchestratorMetrics>,
    gate: RwLock<()>,
}

impl Orchestrator {
    /// Standalone node: in-memory ledger with a freshly minted treasury,
    /// identity and audit sinks from the configuration
    pub async fn new(config: AgoraConfig) -> Result<Self> {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger
            .mint(&Account::Treasury, config.governor.treasury_utility_supply, TokenKind::Utility)
            .await?;
        ledger
            .mint(&Account::Treasury, config.governor.treasury_governance_supply, TokenKind::Governance)
            .await?;

        let identity: Arc<dyn IdentityVerifier> = if config.identity.tokens.is_empty() {
            Arc::new(AllowAll)
        } else {
            Arc::new(StaticTokenVerifier::new(config.identity.tokens.clone()))
        };

        let mut audit = if config.audit.console {
            AuditLog::new()
        } else {
            AuditLog::silent()
        };
        if let Some(path) = &config.audit.log_path {
            audit.add_sink(Box::new(JsonLinesAuditSink::open(path)?));
            info!(path = %path, "Audit log file sink enabled");
        }

        Self::with_components(config, ledger, identity, audit)
    }

    /// Wire the engine around caller-supplied boundaries
    pub fn with_components(
        config: AgoraConfig,
        ledger: Arc<dyn Ledger>,
        identity: Arc<dyn IdentityVerifier>,
        audit: AuditLog,
    ) -> Result<Self> {
        config.validate()?;

        let audit = Arc::new(audit);
        let registry = Arc::new(WorkerRegistry::new(config.performance.neutral_score));
        let performance = Arc::new(PerformanceTracker::new(config.performance.clone()));
        let dispatch = Arc::new(TaskAssignmentEngine::new(
            config.dispatch.clone(),
            registry.clone(),
            performance.clone(),
        ));
        let governor = Arc::new(EconomicGovernor::new(&config.governor, ledger, audit.clone()));
        let tournament = TournamentEngine::new(
            config.ranking.clone(),
            registry.clone(),
            performance.clone(),
            governor.clone(),
            audit.clone(),
        );
        let ventures = VentureManager::new(dispatch.clone());
        let metrics = OrchestratorMetrics::new().map_err(|e| AgoraError::Internal(e.to_string()))?;

        info!(version = agora_common::VERSION, "Orchestrator initialized");

        Ok(Self {
            events: Arc::new(EventBus::new(config.server.event_capacity)),
            config,
            registry,
            performance,
            dispatch,
            governor,
            tournament,
            ventures,
            identity,
            audit,
            metrics: Arc::new(metrics),
            gate: RwLock::new(()),
        })
    }

    // ---- Workers ----

    /// Verify and register a worker; it enters the lowest tier and may pick
    /// up pending work immediately
    #[instrument(skip(self, registration), fields(worker = %registration.id))]
    pub async fn register_worker(&self, registration: WorkerRegistration) -> Result<WorkerId> {
        let _gate = self.gate.read().await;

        let verified = self
            .identity
            .verify(&registration.id, registration.credential.as_deref())
            .await?;
        if !verified {
            warn!("Worker credential rejected");
            return Err(IdentityError::Unauthorized(registration.id).into());
        }

        let worker_id = self.registry.register(registration)?;
        self.metrics.workers_registered.set(self.registry.len() as i64);
        self.assign_pending();
        Ok(worker_id)
    }

    pub fn get_worker(&self, worker_id: &WorkerId) -> Result<Worker> {
        self.registry
            .get(worker_id)
            .ok_or_else(|| RegistryError::NotFound(worker_id.clone()).into())
    }

    pub fn list_workers(&self) -> Vec<Worker> {
        self.registry.all()
    }

    /// Take a worker out of matching and requeue its bound tasks
    #[instrument(skip(self), fields(worker = %worker_id))]
    pub async fn set_worker_offline(&self, worker_id: &WorkerId) -> Result<Worker> {
        let _gate = self.gate.read().await;
        self.registry.set_offline(worker_id, true)?;
        let released = self.dispatch.release_worker(worker_id);
        if !released.is_empty() {
            self.assign_pending();
        }
        info!(requeued = released.len(), "Worker offline");
        self.get_worker(worker_id)
    }

    #[instrument(skip(self), fields(worker = %worker_id))]
    pub async fn set_worker_online(&self, worker_id: &WorkerId) -> Result<Worker> {
        let _gate = self.gate.read().await;
        let worker = self.registry.set_offline(worker_id, false)?;
        self.assign_pending();
        info!("Worker online");
        Ok(worker)
    }

    /// Utility value of a worker's utility-token balance
    pub async fn utility_of(&self, worker_id: &WorkerId) -> Result<f64> {
        Ok(self.governor.utility_of(worker_id).await?)
    }

    // ---- Tasks ----

    /// Accept a task and try to bind it right away
    #[instrument(skip(self, spec), fields(description = %spec.description))]
    pub async fn submit_task(&self, spec: TaskSpec) -> Result<TaskId> {
        let _gate = self.gate.read().await;
        let task_id = self.dispatch.submit(spec)?;
        self.metrics.tasks_submitted.inc();
        self.try_assign(task_id);
        Ok(task_id)
    }

    pub fn get_task_status(&self, task_id: TaskId) -> Result<TaskStatus> {
        self.dispatch.status(task_id)
    }

    pub fn get_task(&self, task_id: TaskId) -> Result<Task> {
        self.dispatch
            .get(task_id)
            .ok_or_else(|| agora_common::TaskError::NotFound(task_id).into())
    }

    pub async fn start_task(&self, task_id: TaskId, worker_id: &WorkerId) -> Result<Task> {
        let _gate = self.gate.read().await;
        self.dispatch.start(task_id, worker_id)
    }

    /// Record a successful completion and pay the worker's reward
    #[instrument(skip(self), fields(task = %task_id, worker = %worker_id))]
    pub async fn complete_task(&self, task_id: TaskId, worker_id: &WorkerId, quality: f64) -> Result<CompletionReport> {
        let _gate = self.gate.read().await;

        let outcome = self.dispatch.complete(task_id, worker_id, quality)?;
        self.metrics.tasks_completed.inc();
        self.events.publish(AgoraEvent::TaskCompleted {
            task_id,
            worker_id: worker_id.clone(),
            quality,
        });

        let reward = match self
            .governor
            .issue_reward(worker_id, Some(task_id), outcome.performance_score)
            .await
        {
            Ok(RewardOutcome::Issued(receipt)) => {
                self.record_reward_issued(worker_id, Some(task_id), receipt.amount);
                RewardStatus::Issued { amount: receipt.amount }
            }
            Ok(RewardOutcome::Deferred(deferred)) => {
                self.metrics.rewards_deferred.inc();
                self.events.publish(AgoraEvent::RewardDeferred {
                    worker_id: worker_id.clone(),
                    amount: deferred.request.amount,
                    reason: deferred.last_error.clone(),
                });
                RewardStatus::Deferred {
                    amount: deferred.request.amount,
                    reason: deferred.last_error,
                }
            }
            Err(e) => {
                error!(error = %e, "Reward rejected by ledger");
                RewardStatus::Failed { reason: e.to_string() }
            }
        };
        self.metrics.reward_backlog.set(self.governor.backlog_len() as i64);
        self.mirror_balances(worker_id).await;

        if let Some(origin) = outcome.task.origin {
            self.refresh_venture(origin.venture_id);
        }
        self.assign_pending();

        Ok(CompletionReport {
            task_id,
            worker_id: worker_id.clone(),
            quality,
            performance_score: outcome.performance_score,
            reward,
        })
    }

    /// Record a failure; the task requeues while retries remain
    #[instrument(skip(self, reason), fields(task = %task_id, worker = %worker_id))]
    pub async fn fail_task(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        reason: impl Into<String>,
    ) -> Result<FailureReport> {
        let _gate = self.gate.read().await;
        let reason = reason.into();
        let outcome = self.dispatch.fail(task_id, worker_id, reason.clone())?;
        self.handle_failure(&outcome, reason);
        self.assign_pending();

        Ok(FailureReport {
            task_id,
            worker_id: outcome.worker_id,
            requeued: outcome.requeued,
            status: outcome.task.status,
            attempts: outcome.task.attempts,
        })
    }

    /// One pass of background work: timeouts, reward backlog, assignment,
    /// venture progress
    pub async fn tick(&self) -> TickReport {
        self.tick_at(agora_common::now_millis()).await
    }

    pub async fn tick_at(&self, now: i64) -> TickReport {
        let _gate = self.gate.read().await;
        let mut report = TickReport::default();

        let timed_out = self.dispatch.sweep_timeouts(now);
        report.timed_out = timed_out.len();
        for outcome in &timed_out {
            self.handle_failure(outcome, "timed out".to_string());
        }

        let backlog = self.governor.retry_backlog().await;
        report.rewards_reissued = backlog.issued.len();
        report.rewards_still_deferred = backlog.still_deferred;
        for (deferred, receipt) in &backlog.issued {
            self.record_reward_issued(&deferred.worker_id, deferred.task_id, receipt.amount);
            self.mirror_balances(&deferred.worker_id).await;
        }
        self.metrics.reward_backlog.set(self.governor.backlog_len() as i64);

        for outcome in self.assign_pending() {
            match outcome {
                AssignmentOutcome::Assigned { .. } => report.assigned += 1,
                AssignmentOutcome::Unmatched { .. } => report.unmatched += 1,
                AssignmentOutcome::Skipped { .. } => {}
            }
        }

        let transitions = self.ventures.refresh_all();
        report.venture_transitions = transitions.len();
        self.publish_transitions(transitions);

        report
    }

    // ---- Ranking ----

    /// Run a ranking cycle; an id that already committed returns its result
    /// without side effects
    #[instrument(skip(self), fields(cycle = %cycle_id))]
    pub async fn run_ranking_cycle(&self, cycle_id: &CycleId) -> Result<RankCycleResult> {
        if let Some(result) = self.tournament.cached(cycle_id) {
            return Ok(result);
        }

        let _gate = self.gate.write().await;
        let started = Instant::now();

        let result = match self.tournament.run_cycle_with_retry(cycle_id).await {
            Ok(result) => result,
            Err(e) => {
                self.metrics.ranking_rollbacks.inc();
                error!(error = %e, "Ranking cycle failed");
                return Err(e.into());
            }
        };
        self.metrics.ranking_cycle_seconds.observe(started.elapsed().as_secs_f64());

        for worker_id in &result.removed {
            let requeued = self.dispatch.release_worker(worker_id);
            self.performance.forget(worker_id);
            let cancelled = self.governor.cancel_deferred(worker_id);
            info!(worker = %worker_id, requeued = requeued.len(), cancelled_rewards = cancelled, "Removed worker detached");
        }
        self.metrics.ranking_cycles.inc();
        self.metrics.workers_removed.inc_by(result.removed.len() as u64);
        self.metrics.workers_registered.set(self.registry.len() as i64);
        self.metrics.reward_backlog.set(self.governor.backlog_len() as i64);

        self.events.publish(AgoraEvent::RankCycleResult {
            cycle_id: cycle_id.clone(),
            promoted: result.promoted.clone(),
            retained: result.retained.clone(),
            removed: result.removed.clone(),
            redistributed_amount: result.redistributed_amount,
        });

        self.assign_pending();
        Ok(result)
    }

    // ---- Ventures ----

    #[instrument(skip(self, phases), fields(budget = %budget))]
    pub async fn create_venture(
        &self,
        name: &str,
        budget: Decimal,
        phases: Vec<PhaseTemplate>,
    ) -> Result<VentureId> {
        let _gate = self.gate.read().await;
        let (venture_id, transitions) = self.ventures.create(name, budget, phases)?;
        self.publish_transitions(transitions);
        self.assign_pending();
        Ok(venture_id)
    }

    pub fn get_venture_status(&self, venture_id: VentureId) -> Result<VentureStatusReport> {
        self.ventures.status(venture_id)
    }

    pub fn list_ventures(&self) -> Vec<Venture> {
        self.ventures.list()
    }

    /// Replace a blocked venture task with a fresh attempt
    pub async fn resubmit_venture_task(&self, venture_id: VentureId, task_id: TaskId) -> Result<TaskId> {
        let _gate = self.gate.read().await;
        let replacement = self.ventures.resubmit_task(venture_id, task_id)?;
        self.metrics.tasks_submitted.inc();
        self.try_assign(replacement);
        Ok(replacement)
    }

    // ---- State ----

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            taken_at: agora_common::now_millis(),
            workers: self.registry.all(),
            tasks: self.dispatch.all_tasks(),
            performance_records: self.performance.all_records(),
            ventures: self.ventures.list(),
            audit: self.audit.entries(),
            audit_chain_valid: self.audit.verify_chain(),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn metrics(&self) -> &Arc<OrchestratorMetrics> {
        &self.metrics
    }

    pub fn governor(&self) -> &Arc<EconomicGovernor> {
        &self.governor
    }

    pub fn config(&self) -> &AgoraConfig {
        &self.config
    }

    // ---- Internals ----

    fn try_assign(&self, task_id: TaskId) {
        match self.dispatch.try_assign(task_id) {
            Ok(outcome) => self.publish_assignment(&outcome),
            Err(e) => warn!(task = %task_id, error = %e, "Assignment attempt failed"),
        }
        self.metrics.tasks_pending.set(self.dispatch.stats().pending as i64);
    }

    fn assign_pending(&self) -> Vec<AssignmentOutcome> {
        let outcomes = self.dispatch.assign_pending();
        for outcome in &outcomes {
            self.publish_assignment(outcome);
        }
        self.metrics.tasks_pending.set(self.dispatch.stats().pending as i64);
        outcomes
    }

    fn publish_assignment(&self, outcome: &AssignmentOutcome) {
        match outcome {
            AssignmentOutcome::Assigned {
                task_id,
                worker_id,
                score,
            } => {
                self.metrics.tasks_assigned.inc();
                self.events.publish(AgoraEvent::TaskAssigned {
                    task_id: *task_id,
                    worker_id: worker_id.clone(),
                    score: *score,
                });
            }
            AssignmentOutcome::Unmatched { task_id, best_score } => {
                self.metrics.tasks_unmatched.inc();
                self.events.publish(AgoraEvent::TaskUnmatched {
                    task_id: *task_id,
                    best_score: *best_score,
                });
            }
            AssignmentOutcome::Skipped { .. } => {}
        }
    }

    fn handle_failure(&self, outcome: &FailureOutcome, reason: String) {
        self.metrics.tasks_failed.inc();
        self.events.publish(AgoraEvent::TaskFailed {
            task_id: outcome.task.id,
            worker_id: Some(outcome.worker_id.clone()),
            requeued: outcome.requeued,
            reason,
        });
        if !outcome.requeued {
            if let Some(origin) = outcome.task.origin {
                self.refresh_venture(origin.venture_id);
            }
        }
    }

    fn record_reward_issued(&self, worker_id: &WorkerId, task_id: Option<TaskId>, amount: Decimal) {
        self.metrics.rewards_issued.inc();
        self.metrics
            .tokens_rewarded
            .inc_by(rust_decimal::prelude::ToPrimitive::to_f64(&amount).unwrap_or(0.0));
        self.events.publish(AgoraEvent::RewardIssued {
            worker_id: worker_id.clone(),
            task_id,
            amount,
        });
    }

    /// Copy ledger balances onto the registry record
    async fn mirror_balances(&self, worker_id: &WorkerId) {
        match self.governor.balances(worker_id).await {
            Ok((utility, governance)) => {
                if let Err(e) = self.registry.set_balances(worker_id, utility, governance) {
                    warn!(worker = %worker_id, error = %e, "Balances not mirrored");
                }
            }
            Err(e) => warn!(worker = %worker_id, error = %e, "Balance lookup failed"),
        }
    }

    fn refresh_venture(&self, venture_id: VentureId) {
        match self.ventures.refresh(venture_id) {
            Ok(transitions) => self.publish_transitions(transitions),
            Err(AgoraError::Venture(agora_common::VentureError::PhaseBlocked { .. })) => {}
            Err(e) => warn!(venture = %venture_id, error = %e, "Venture refresh failed"),
        }
    }

    fn publish_transitions(&self, transitions: Vec<VentureTransition>) {
        for transition in transitions {
            let event = match transition {
                VentureTransition::Advanced {
                    venture_id,
                    from_phase,
                    to_phase,
                } => AgoraEvent::VenturePhaseAdvanced {
                    venture_id,
                    from_phase,
                    to_phase,
                },
                VentureTransition::Blocked {
                    venture_id,
                    phase,
                    tasks,
                } => AgoraEvent::VentureBlocked {
                    venture_id,
                    phase,
                    tasks,
                },
            };
            self.events.publish(event);
        }
    }
}
