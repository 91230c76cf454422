//! Prometheus metrics for the orchestrator

use prometheus::{Counter, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

pub struct OrchestratorMetrics {
    registry: Registry,
    pub workers_registered: IntGauge,
    pub tasks_submitted: IntCounter,
    pub tasks_assigned: IntCounter,
    pub tasks_unmatched: IntCounter,
    pub tasks_completed: IntCounter,
    pub tasks_failed: IntCounter,
    pub tasks_pending: IntGauge,
    pub rewards_issued: IntCounter,
    pub rewards_deferred: IntCounter,
    pub reward_backlog: IntGauge,
    pub tokens_rewarded: Counter,
    pub ranking_cycles: IntCounter,
    pub ranking_rollbacks: IntCounter,
    pub ranking_cycle_seconds: Histogram,
    pub workers_removed: IntCounter,
}

impl OrchestratorMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let metrics = Self {
            registry: Registry::new(),
            workers_registered: IntGauge::new("agora_workers_registered", "Workers in the registry")?,
            tasks_submitted: IntCounter::new("agora_tasks_submitted_total", "Tasks accepted")?,
            tasks_assigned: IntCounter::new("agora_tasks_assigned_total", "Tasks bound to a worker")?,
            tasks_unmatched: IntCounter::new(
                "agora_tasks_unmatched_total",
                "Assignment attempts with no qualified idle worker",
            )?,
            tasks_completed: IntCounter::new("agora_tasks_completed_total", "Tasks completed")?,
            tasks_failed: IntCounter::new("agora_tasks_failed_total", "Task failures and timeouts")?,
            tasks_pending: IntGauge::new("agora_tasks_pending", "Tasks waiting for a worker")?,
            rewards_issued: IntCounter::new("agora_rewards_issued_total", "Rewards paid")?,
            rewards_deferred: IntCounter::new("agora_rewards_deferred_total", "Rewards moved to the backlog")?,
            reward_backlog: IntGauge::new("agora_reward_backlog", "Rewards waiting in the backlog")?,
            tokens_rewarded: Counter::new("agora_tokens_rewarded_total", "Utility tokens paid as task rewards")?,
            ranking_cycles: IntCounter::new("agora_ranking_cycles_total", "Committed ranking cycles")?,
            ranking_rollbacks: IntCounter::new(
                "agora_ranking_rollbacks_total",
                "Ranking cycles that exhausted their retries",
            )?,
            ranking_cycle_seconds: Histogram::with_opts(
                HistogramOpts::new("agora_ranking_cycle_seconds", "Ranking cycle duration")
                    .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            )?,
            workers_removed: IntCounter::new("agora_workers_removed_total", "Workers removed by ranking")?,
        };
        metrics.register()?;
        Ok(metrics)
    }

    fn register(&self) -> prometheus::Result<()> {
        self.registry.register(Box::new(self.workers_registered.clone()))?;
        self.registry.register(Box::new(self.tasks_submitted.clone()))?;
        self.registry.register(Box::new(self.tasks_assigned.clone()))?;
        self.registry.register(Box::new(self.tasks_unmatched.clone()))?;
        self.registry.register(Box::new(self.tasks_completed.clone()))?;
        self.registry.register(Box::new(self.tasks_failed.clone()))?;
        self.registry.register(Box::new(self.tasks_pending.clone()))?;
        self.registry.register(Box::new(self.rewards_issued.clone()))?;
        self.registry.register(Box::new(self.rewards_deferred.clone()))?;
        self.registry.register(Box::new(self.reward_backlog.clone()))?;
        self.registry.register(Box::new(self.tokens_rewarded.clone()))?;
        self.registry.register(Box::new(self.ranking_cycles.clone()))?;
        self.registry.register(Box::new(self.ranking_rollbacks.clone()))?;
        self.registry.register(Box::new(self.ranking_cycle_seconds.clone()))?;
        self.registry.register(Box::new(self.workers_removed.clone()))?;
        Ok(())
    }

    /// Text exposition format
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
