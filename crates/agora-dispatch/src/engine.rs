//! Task assignment engine
//!
//! Owns every live task and binds pending tasks to idle workers. Binding is
//! two compare-and-swaps: the worker slot is claimed in the registry, then
//! the task moves `pending → assigned`. Whichever loses is undone, so a task
//! never ends up with two workers and a worker never exceeds its capacity.

use std::sync::Arc;

use agora_common::{
    AgoraError, PerformanceRecord, Result, Task, TaskError, TaskId, TaskSpec, TaskStatus, WorkerId,
    MATCH_THRESHOLD,
};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::matcher::CapabilityMatcher;
use crate::performance::PerformanceTracker;
use crate::registry::WorkerRegistry;

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Score a worker must strictly exceed to be bound
    pub match_threshold: f64,
    /// Failed attempts that may still requeue a task
    pub max_retries: u32,
    /// Time a bound task may run before it counts as failed
    pub task_timeout_ms: i64,
    /// System-wide ceiling on a task's max cost
    pub max_task_cost: Decimal,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            match_threshold: MATCH_THRESHOLD,
            max_retries: 3,
            task_timeout_ms: 5 * 60 * 1000,
            max_task_cost: Decimal::from(1_000_000),
        }
    }
}

/// Result of one assignment attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned {
        task_id: TaskId,
        worker_id: WorkerId,
        score: f64,
    },
    /// No idle worker cleared the threshold; the task stays pending
    Unmatched {
        task_id: TaskId,
        best_score: Option<f64>,
    },
    /// Task was not pending when the attempt ran
    Skipped { task_id: TaskId, status: TaskStatus },
}

impl AssignmentOutcome {
    pub fn task_id(&self) -> TaskId {
        match self {
            AssignmentOutcome::Assigned { task_id, .. }
            | AssignmentOutcome::Unmatched { task_id, .. }
            | AssignmentOutcome::Skipped { task_id, .. } => *task_id,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, AssignmentOutcome::Assigned { .. })
    }
}

/// Result of a completion report
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub task: Task,
    pub worker_id: WorkerId,
    pub quality: f64,
    /// Worker's rolling score after this record
    pub performance_score: f64,
}

/// Result of a failure report or timeout
#[derive(Debug, Clone)]
pub struct FailureOutcome {
    pub task: Task,
    pub worker_id: WorkerId,
    /// Back to pending (attempts left) or terminally failed
    pub requeued: bool,
    pub performance_score: f64,
}

/// Live task counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub pending: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct TaskAssignmentEngine {
    config: DispatchConfig,
    registry: Arc<WorkerRegistry>,
    performance: Arc<PerformanceTracker>,
    /// Pending and bound tasks
    tasks: DashMap<TaskId, Task>,
    /// Completed and terminally failed tasks
    archive: DashMap<TaskId, Task>,
}

impl TaskAssignmentEngine {
    pub fn new(
        config: DispatchConfig,
        registry: Arc<WorkerRegistry>,
        performance: Arc<PerformanceTracker>,
    ) -> Self {
        Self {
            config,
            registry,
            performance,
            tasks: DashMap::new(),
            archive: DashMap::new(),
        }
    }

    /// Accept a task in `pending`
    #[instrument(skip(self, spec), fields(description = %spec.description))]
    pub fn submit(&self, spec: TaskSpec) -> Result<TaskId> {
        spec.validate(self.config.max_task_cost)?;
        let task = Task::new(spec);
        let id = task.id;
        debug!(task = %id, skills = task.requirements.len(), "Task submitted");
        self.tasks.insert(id, task);
        Ok(id)
    }

    /// Try to bind one pending task to the best idle worker above threshold
    #[instrument(skip(self), fields(task = %task_id))]
    pub fn try_assign(&self, task_id: TaskId) -> Result<AssignmentOutcome> {
        let (requirements, max_cost) = {
            let task = self
                .tasks
                .get(&task_id)
                .ok_or(TaskError::NotFound(task_id))?;
            if task.status != TaskStatus::Pending {
                return Ok(AssignmentOutcome::Skipped {
                    task_id,
                    status: task.status,
                });
            }
            (task.requirements.clone(), task.max_cost)
        };

        let idle: Vec<_> = self
            .registry
            .idle_workers()
            .into_iter()
            .filter(|w| w.cost_per_task <= max_cost)
            .collect();
        let ranked = CapabilityMatcher::rank(&requirements, &idle);
        let best_score = ranked.first().map(|c| c.score);

        for candidate in ranked
            .into_iter()
            .take_while(|c| c.score > self.config.match_threshold)
        {
            // Lost the slot to a concurrent binding; try the next candidate
            if self.registry.claim(&candidate.worker_id).is_err() {
                debug!(worker = %candidate.worker_id, "Candidate no longer idle");
                continue;
            }

            let bound = match self.tasks.get_mut(&task_id) {
                Some(mut task) => match task.transition_from(TaskStatus::Pending, TaskStatus::Assigned) {
                    Ok(()) => {
                        task.assigned_worker = Some(candidate.worker_id.clone());
                        task.match_score = Some(candidate.score);
                        task.deadline = Some(agora_common::now_millis() + self.config.task_timeout_ms);
                        Ok(())
                    }
                    Err(_) => Err(task.status),
                },
                None => return Err(TaskError::NotFound(task_id).into()),
            };

            if let Err(status) = bound {
                // Task moved under us; give the slot back
                self.release_slot(&candidate.worker_id);
                return Ok(AssignmentOutcome::Skipped { task_id, status });
            }

            info!(worker = %candidate.worker_id, score = candidate.score, "Task assigned");
            return Ok(AssignmentOutcome::Assigned {
                task_id,
                worker_id: candidate.worker_id,
                score: candidate.score,
            });
        }

        info!(best_score = ?best_score, threshold = self.config.match_threshold, "Task unmatched");
        Ok(AssignmentOutcome::Unmatched {
            task_id,
            best_score,
        })
    }

    /// Attempt assignment for every pending task, oldest first
    pub fn assign_pending(&self) -> Vec<AssignmentOutcome> {
        self.pending_tasks()
            .into_iter()
            .filter_map(|task| match self.try_assign(task.id) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(task = %task.id, error = %e, "Assignment attempt failed");
                    None
                }
            })
            .collect()
    }

    /// Worker acknowledges and starts work (`assigned → in_progress`)
    #[instrument(skip(self), fields(task = %task_id, worker = %worker_id))]
    pub fn start(&self, task_id: TaskId, worker_id: &WorkerId) -> Result<Task> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound(task_id))?;
        task.ensure_bound_to(worker_id)?;
        task.transition_from(TaskStatus::Assigned, TaskStatus::InProgress)?;
        debug!("Task started");
        Ok(task.clone())
    }

    /// Worker reports success with a quality in [0,1]
    #[instrument(skip(self), fields(task = %task_id, worker = %worker_id))]
    pub fn complete(&self, task_id: TaskId, worker_id: &WorkerId, quality: f64) -> Result<CompletionOutcome> {
        let record = PerformanceRecord::completed(worker_id.clone(), task_id, quality)
            .map_err(|_| TaskError::InvalidQuality(quality))?;

        let task = {
            let mut task = self
                .tasks
                .get_mut(&task_id)
                .ok_or_else(|| self.not_live(task_id))?;
            task.ensure_bound_to(worker_id)?;
            if task.status == TaskStatus::Assigned {
                task.transition(TaskStatus::InProgress)?;
            }
            task.transition(TaskStatus::Completed)?;
            task.deadline = None;
            task.clone()
        };

        self.tasks.remove(&task_id);
        self.archive.insert(task_id, task.clone());
        self.release_slot(worker_id);

        let performance_score = self.record_performance(record);
        info!(quality, performance_score, "Task completed");

        Ok(CompletionOutcome {
            task,
            worker_id: worker_id.clone(),
            quality,
            performance_score,
        })
    }

    /// Worker reports failure; requeues while attempts remain
    #[instrument(skip(self, reason), fields(task = %task_id, worker = %worker_id))]
    pub fn fail(&self, task_id: TaskId, worker_id: &WorkerId, reason: impl Into<String>) -> Result<FailureOutcome> {
        let reason = reason.into();

        let (task, requeued) = {
            let mut task = self
                .tasks
                .get_mut(&task_id)
                .ok_or_else(|| self.not_live(task_id))?;
            task.ensure_bound_to(worker_id)?;
            task.transition(TaskStatus::Failed)?;
            task.attempts += 1;
            task.last_error = Some(reason.clone());
            task.deadline = None;

            let requeued = task.attempts <= self.config.max_retries;
            if requeued {
                task.transition(TaskStatus::Pending)?;
                task.assigned_worker = None;
                task.match_score = None;
            }
            (task.clone(), requeued)
        };

        if !requeued {
            self.tasks.remove(&task_id);
            self.archive.insert(task_id, task.clone());
        }
        self.release_slot(worker_id);

        let performance_score = self.record_performance(PerformanceRecord::failed(worker_id.clone(), task_id));
        if requeued {
            info!(attempts = task.attempts, reason = %reason, "Task failed, requeued");
        } else {
            warn!(attempts = task.attempts, reason = %reason, "Task failed permanently");
        }

        Ok(FailureOutcome {
            task,
            worker_id: worker_id.clone(),
            requeued,
            performance_score,
        })
    }

    /// Fail every bound task whose deadline passed before `now`
    pub fn sweep_timeouts(&self, now: i64) -> Vec<FailureOutcome> {
        let overdue: Vec<(TaskId, WorkerId)> = self
            .tasks
            .iter()
            .filter(|entry| entry.is_overdue(now))
            .filter_map(|entry| entry.assigned_worker.clone().map(|w| (entry.id, w)))
            .collect();

        overdue
            .into_iter()
            .filter_map(|(task_id, worker_id)| match self.fail(task_id, &worker_id, "timed out") {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    // Completed concurrently
                    debug!(task = %task_id, error = %e, "Timeout sweep skipped task");
                    None
                }
            })
            .collect()
    }

    /// Return every task bound to `worker_id` to `pending` without charging
    /// an attempt (worker removed or taken offline)
    #[instrument(skip(self), fields(worker = %worker_id))]
    pub fn release_worker(&self, worker_id: &WorkerId) -> Vec<TaskId> {
        let mut released = Vec::new();
        for mut entry in self.tasks.iter_mut() {
            if entry.assigned_worker.as_ref() != Some(worker_id) || !entry.status.is_bound() {
                continue;
            }
            if entry.transition(TaskStatus::Pending).is_ok() {
                entry.assigned_worker = None;
                entry.match_score = None;
                entry.deadline = None;
                released.push(entry.id);
            }
        }

        for _ in &released {
            self.release_slot(worker_id);
        }
        if !released.is_empty() {
            info!(tasks = released.len(), "Worker tasks requeued");
        }
        released
    }

    /// Live or archived task
    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        self.tasks
            .get(&task_id)
            .map(|t| t.clone())
            .or_else(|| self.archive.get(&task_id).map(|t| t.clone()))
    }

    pub fn status(&self, task_id: TaskId) -> Result<TaskStatus> {
        self.get(task_id)
            .map(|t| t.status)
            .ok_or_else(|| TaskError::NotFound(task_id).into())
    }

    /// Pending tasks, oldest first
    pub fn pending_tasks(&self) -> Vec<Task> {
        let mut pending: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.clone())
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        pending
    }

    /// Tasks currently bound to `worker_id`
    pub fn tasks_for_worker(&self, worker_id: &WorkerId) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|t| t.assigned_worker.as_ref() == Some(worker_id))
            .map(|t| t.clone())
            .collect()
    }

    /// Every live and archived task
    pub fn all_tasks(&self) -> Vec<Task> {
        let mut all: Vec<Task> = self
            .tasks
            .iter()
            .chain(self.archive.iter())
            .map(|t| t.clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn stats(&self) -> DispatchStats {
        let mut stats = DispatchStats::default();
        for task in self.tasks.iter().chain(self.archive.iter()) {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Assigned => stats.assigned += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn record_performance(&self, record: PerformanceRecord) -> f64 {
        let worker_id = record.worker_id.clone();
        let score = self.performance.record(record);
        if let Err(e) = self.registry.set_performance_score(&worker_id, score) {
            debug!(worker = %worker_id, error = %e, "Score not mirrored to registry");
        }
        score
    }

    fn release_slot(&self, worker_id: &WorkerId) {
        if let Err(e) = self.registry.release(worker_id) {
            debug!(worker = %worker_id, error = %e, "Slot release skipped");
        }
    }

    /// Error for reports against a task that is archived or unknown
    fn not_live(&self, task_id: TaskId) -> AgoraError {
        match self.archive.get(&task_id) {
            Some(task) => TaskError::InvalidTransition {
                task_id,
                from: task.status,
                to: TaskStatus::Completed,
            }
            .into(),
            None => TaskError::NotFound(task_id).into(),
        }
    }
}
