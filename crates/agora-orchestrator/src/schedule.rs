//! Periodic ranking schedule
//!
//! Cycle ids are derived from the period, so a restart inside a period does
//! not rank twice. A cycle that fails stays queued and runs again before any
//! later period's cycle.

use std::collections::VecDeque;

use agora_common::{CycleId, Result};
use agora_darwinian::RankCycleResult;
use async_trait::async_trait;
use tracing::{error, info};

use crate::orchestrator::Orchestrator;

#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self, cycle_id: &CycleId) -> Result<RankCycleResult>;
}

#[async_trait]
impl CycleRunner for Orchestrator {
    async fn run_cycle(&self, cycle_id: &CycleId) -> Result<RankCycleResult> {
        self.run_ranking_cycle(cycle_id).await
    }
}

/// Outcome of one scheduler wake-up
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleReport {
    pub committed: Vec<CycleId>,
    /// Cycle left at the head of the queue
    pub failed: Option<CycleId>,
}

pub struct RankingSchedule {
    interval_secs: u64,
    queue: VecDeque<CycleId>,
}

impl RankingSchedule {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs: interval_secs.max(1),
            queue: VecDeque::new(),
        }
    }

    pub fn cycle_for(&self, now_millis: i64) -> CycleId {
        let period = now_millis / 1000 / self.interval_secs as i64;
        CycleId::new(format!("cycle-{period}"))
    }

    /// Cycles waiting to commit, oldest first
    pub fn pending(&self) -> Vec<CycleId> {
        self.queue.iter().cloned().collect()
    }

    /// Queue the current period's cycle, then run the queue in order until
    /// one fails
    pub async fn run_due<R>(&mut self, runner: &R, now_millis: i64) -> ScheduleReport
    where
        R: CycleRunner + ?Sized,
    {
        let due = self.cycle_for(now_millis);
        if !self.queue.contains(&due) {
            self.queue.push_back(due);
        }

        let mut report = ScheduleReport::default();
        while let Some(cycle_id) = self.queue.front().cloned() {
            match runner.run_cycle(&cycle_id).await {
                Ok(result) => {
                    info!(
                        cycle = %cycle_id,
                        promoted = result.promoted.len(),
                        removed = result.removed.len(),
                        "Scheduled ranking cycle committed"
                    );
                    self.queue.pop_front();
                    report.committed.push(cycle_id);
                }
                Err(e) => {
                    error!(cycle = %cycle_id, queued = self.queue.len(), error = %e, "Scheduled ranking cycle failed; will retry");
                    report.failed = Some(cycle_id);
                    break;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use agora_common::RankingError;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    /// Fails while `down` is set, recording every attempt
    #[derive(Default)]
    struct ScriptedRunner {
        down: Mutex<bool>,
        attempts: Mutex<Vec<CycleId>>,
    }

    #[async_trait]
    impl CycleRunner for ScriptedRunner {
        async fn run_cycle(&self, cycle_id: &CycleId) -> Result<RankCycleResult> {
            self.attempts.lock().push(cycle_id.clone());
            if *self.down.lock() {
                return Err(RankingError::CycleAborted {
                    cycle_id: cycle_id.clone(),
                    reason: "ledger unavailable".into(),
                }
                .into());
            }
            Ok(RankCycleResult {
                cycle_id: cycle_id.clone(),
                promoted: Vec::new(),
                retained: Vec::new(),
                removed: Vec::new(),
                redistributed_amount: Decimal::ZERO,
                bonuses: BTreeMap::new(),
                promotions: Vec::new(),
                percentiles: BTreeMap::new(),
                completed_at: 0,
            })
        }
    }

    #[test]
    fn test_cycle_id_follows_period() {
        let schedule = RankingSchedule::new(60);
        assert_eq!(schedule.cycle_for(119_999), CycleId::new("cycle-1"));
        assert_eq!(schedule.cycle_for(120_000), CycleId::new("cycle-2"));
    }

    #[tokio::test]
    async fn test_failed_cycle_retried_before_next_period() {
        let runner = ScriptedRunner::default();
        let mut schedule = RankingSchedule::new(60);

        *runner.down.lock() = true;
        let report = schedule.run_due(&runner, 60_000).await;
        assert_eq!(report.failed, Some(CycleId::new("cycle-1")));
        assert!(report.committed.is_empty());

        // Still down a period later: the old cycle is tried first and the new one waits
        let report = schedule.run_due(&runner, 120_000).await;
        assert_eq!(report.failed, Some(CycleId::new("cycle-1")));
        assert_eq!(schedule.pending(), vec![CycleId::new("cycle-1"), CycleId::new("cycle-2")]);

        *runner.down.lock() = false;
        let report = schedule.run_due(&runner, 121_000).await;
        assert_eq!(report.committed, vec![CycleId::new("cycle-1"), CycleId::new("cycle-2")]);
        assert_eq!(report.failed, None);
        assert!(schedule.pending().is_empty());

        assert_eq!(
            *runner.attempts.lock(),
            vec![
                CycleId::new("cycle-1"),
                CycleId::new("cycle-1"),
                CycleId::new("cycle-1"),
                CycleId::new("cycle-2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_same_period_not_queued_twice() {
        let runner = ScriptedRunner::default();
        let mut schedule = RankingSchedule::new(60);
        schedule.run_due(&runner, 60_000).await;
        let report = schedule.run_due(&runner, 61_000).await;
        assert_eq!(report.committed, vec![CycleId::new("cycle-1")]);
        assert!(schedule.pending().is_empty());
    }
}
