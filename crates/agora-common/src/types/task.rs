//! Task - unit of work moving through the assignment state machine
//!
//! ```text
//! pending → assigned → in_progress → completed
//!    ↑         │            │
//!    │         └────────────┴──→ failed ──(retries left)──┘
//! ```
//!
//! A failed task returns to `pending` while it has attempts left; otherwise it
//! stays `failed` and is archived. Bindings can also be released back to
//! `pending` without charging an attempt (worker removed or taken offline).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{TaskId, VentureId, WorkerId};
use super::skill::SkillProfile;
use crate::error::TaskError;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed or failed
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Bound to a worker
    #[inline]
    pub fn is_bound(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }

    fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Assigned)
                | (Assigned, InProgress)
                | (Assigned, Failed)
                | (Assigned, Pending)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Pending)
                | (Failed, Pending)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Where a task came from, when generated by a venture phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOrigin {
    pub venture_id: VentureId,
    pub phase_index: usize,
}

/// Submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,
    /// Skill → required proficiency
    pub requirements: SkillProfile,
    /// Maximum acceptable per-task cost
    pub max_cost: Decimal,
    #[serde(default)]
    pub origin: Option<TaskOrigin>,
}

impl TaskSpec {
    pub fn new(description: impl Into<String>, requirements: SkillProfile, max_cost: Decimal) -> Self {
        Self {
            description: description.into(),
            requirements,
            max_cost,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: TaskOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Reject empty requirement mappings and costs outside `[0, max_task_cost]`
    pub fn validate(&self, max_task_cost: Decimal) -> Result<(), TaskError> {
        if self.requirements.is_empty() {
            return Err(TaskError::InvalidSpec(
                "required-skill mapping is empty".into(),
            ));
        }
        if self.max_cost < Decimal::ZERO {
            return Err(TaskError::InvalidSpec(format!(
                "max cost {} is negative",
                self.max_cost
            )));
        }
        if self.max_cost > max_task_cost {
            return Err(TaskError::InvalidSpec(format!(
                "max cost {} exceeds system maximum {}",
                self.max_cost, max_task_cost
            )));
        }
        Ok(())
    }
}

/// Task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub requirements: SkillProfile,
    pub max_cost: Decimal,
    pub status: TaskStatus,
    pub assigned_worker: Option<WorkerId>,
    /// Failed attempts so far
    pub attempts: u32,
    /// Matcher score of the current binding
    pub match_score: Option<f64>,
    /// Deadline of the current binding (Unix millis)
    pub deadline: Option<i64>,
    pub last_error: Option<String>,
    pub origin: Option<TaskOrigin>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        let now = crate::now_millis();
        Self {
            id: TaskId::new(),
            description: spec.description,
            requirements: spec.requirements,
            max_cost: spec.max_cost,
            status: TaskStatus::Pending,
            assigned_worker: None,
            attempts: 0,
            match_score: None,
            deadline: None,
            last_error: None,
            origin: spec.origin,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, rejecting edges the state machine does not allow
    pub fn transition(&mut self, to: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(to) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = crate::now_millis();
        Ok(())
    }

    /// Compare-and-swap transition: only applies when current status is `expected`
    pub fn transition_from(&mut self, expected: TaskStatus, to: TaskStatus) -> Result<(), TaskError> {
        if self.status != expected {
            return Err(TaskError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to,
            });
        }
        self.transition(to)
    }

    /// Check the binding belongs to `worker_id`
    pub fn ensure_bound_to(&self, worker_id: &WorkerId) -> Result<(), TaskError> {
        match &self.assigned_worker {
            Some(bound) if bound == worker_id => Ok(()),
            _ => Err(TaskError::NotBoundTo {
                task_id: self.id,
                worker_id: worker_id.clone(),
            }),
        }
    }

    /// Binding deadline has passed
    pub fn is_overdue(&self, now: i64) -> bool {
        self.status.is_bound() && self.deadline.is_some_and(|d| now > d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec() -> TaskSpec {
        let req = SkillProfile::from_pairs([("python", 0.8)]).unwrap();
        TaskSpec::new("parse logs", req, dec!(50))
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = Task::new(spec());
        task.transition(TaskStatus::Assigned).unwrap();
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.status.is_terminal());
    }

    #[test]
    fn test_illegal_transition() {
        let mut task = Task::new(spec());
        let err = task.transition(TaskStatus::Completed).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_completed_is_final() {
        let mut task = Task::new(spec());
        task.transition(TaskStatus::Assigned).unwrap();
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.transition(TaskStatus::Pending).is_err());
    }

    #[test]
    fn test_cas_transition() {
        let mut task = Task::new(spec());
        assert!(task
            .transition_from(TaskStatus::Assigned, TaskStatus::InProgress)
            .is_err());
        task.transition_from(TaskStatus::Pending, TaskStatus::Assigned)
            .unwrap();
    }

    #[test]
    fn test_spec_validation() {
        assert!(spec().validate(dec!(1000)).is_ok());
        assert!(spec().validate(dec!(10)).is_err());

        let empty = TaskSpec::new("nothing", SkillProfile::new(), dec!(1));
        assert!(matches!(empty.validate(dec!(1000)), Err(TaskError::InvalidSpec(_))));
    }
}
