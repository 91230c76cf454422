//! Performance tracking
//!
//! Keeps every worker's append-only record history (bounded) and a rolling
//! window of the most recent qualities. The rolling score is the arithmetic
//! mean of that window; failures enter it as quality 0.

use std::collections::{BTreeMap, VecDeque};

use agora_common::{PerformanceRecord, WorkerId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Performance tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Records in the rolling window (N)
    pub window_size: usize,
    /// Score reported for workers with no records yet
    pub neutral_score: f64,
    /// Records retained per worker for history queries
    pub history_limit: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            window_size: agora_common::DEFAULT_PERFORMANCE_WINDOW,
            neutral_score: crate::DEFAULT_NEUTRAL_SCORE,
            history_limit: 1000,
        }
    }
}

/// Per-worker summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPerformance {
    pub worker_id: WorkerId,
    pub score: f64,
    pub samples: usize,
    pub completed: u64,
    pub failed: u64,
    pub last_record_at: Option<i64>,
}

#[derive(Debug, Default)]
struct WorkerWindow {
    recent: VecDeque<f64>,
    history: VecDeque<PerformanceRecord>,
    completed: u64,
    failed: u64,
}

impl WorkerWindow {
    fn mean(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return None;
        }
        Some(self.recent.iter().sum::<f64>() / self.recent.len() as f64)
    }
}

pub struct PerformanceTracker {
    config: PerformanceConfig,
    windows: DashMap<WorkerId, WorkerWindow>,
}

impl PerformanceTracker {
    pub fn new(config: PerformanceConfig) -> Self {
        Self {
            config: PerformanceConfig {
                window_size: config.window_size.max(1),
                ..config
            },
            windows: DashMap::new(),
        }
    }

    /// Append a record; returns the worker's new rolling score
    pub fn record(&self, record: PerformanceRecord) -> f64 {
        let worker_id = record.worker_id.clone();
        let mut window = self.windows.entry(worker_id.clone()).or_default();

        if record.completed {
            window.completed += 1;
        } else {
            window.failed += 1;
        }

        window.recent.push_back(record.quality());
        while window.recent.len() > self.config.window_size {
            window.recent.pop_front();
        }

        window.history.push_back(record);
        while window.history.len() > self.config.history_limit {
            window.history.pop_front();
        }

        let score = window.mean().unwrap_or(self.config.neutral_score);
        debug!(worker = %worker_id, score, samples = window.recent.len(), "Performance recorded");
        score
    }

    /// Rolling score, or the neutral score when the worker has no records
    pub fn get_score(&self, worker_id: &WorkerId) -> f64 {
        self.windows
            .get(worker_id)
            .and_then(|w| w.mean())
            .unwrap_or(self.config.neutral_score)
    }

    pub fn has_records(&self, worker_id: &WorkerId) -> bool {
        self.windows
            .get(worker_id)
            .is_some_and(|w| !w.recent.is_empty())
    }

    /// Rolling score of every worker with at least one record
    pub fn get_population_scores(&self) -> BTreeMap<WorkerId, f64> {
        self.windows
            .iter()
            .filter_map(|entry| entry.value().mean().map(|s| (entry.key().clone(), s)))
            .collect()
    }

    pub fn summary(&self, worker_id: &WorkerId) -> Option<WorkerPerformance> {
        self.windows.get(worker_id).map(|w| WorkerPerformance {
            worker_id: worker_id.clone(),
            score: w.mean().unwrap_or(self.config.neutral_score),
            samples: w.recent.len(),
            completed: w.completed,
            failed: w.failed,
            last_record_at: w.history.back().map(|r| r.timestamp),
        })
    }

    /// Retained records for one worker, oldest first
    pub fn history(&self, worker_id: &WorkerId) -> Vec<PerformanceRecord> {
        self.windows
            .get(worker_id)
            .map(|w| w.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every retained record
    pub fn all_records(&self) -> Vec<PerformanceRecord> {
        let mut records: Vec<PerformanceRecord> = self
            .windows
            .iter()
            .flat_map(|entry| entry.value().history.iter().cloned().collect::<Vec<_>>())
            .collect();
        records.sort_by_key(|r| r.timestamp);
        records
    }

    /// Drop a worker's data (after removal)
    pub fn forget(&self, worker_id: &WorkerId) -> bool {
        self.windows.remove(worker_id).is_some()
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(PerformanceConfig::default())
    }
}
