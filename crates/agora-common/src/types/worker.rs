//! Worker - capability-bearing unit of execution
//!
//! Workers are owned by the registry. Status is derived from capacity:
//! - `Idle`: online with at least one free task slot
//! - `Busy`: online with every slot taken
//! - `Offline`: excluded from matching regardless of capacity
//!
//! Token balances on the record mirror the ledger, which stays the source
//! of truth; the orchestrator refreshes them after each ledger mutation.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::WorkerId;
use super::skill::SkillProfile;
use crate::error::RegistryError;

/// Worker availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

fn default_capacity() -> u32 {
    1
}

/// Registration request for a new worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    /// Caller-chosen unique id
    pub id: WorkerId,
    /// Free-form specialization tags
    #[serde(default)]
    pub specializations: BTreeSet<String>,
    /// Skill → proficiency
    pub skills: SkillProfile,
    /// Maximum concurrent tasks (≥ 1)
    #[serde(default = "default_capacity")]
    pub max_concurrent_tasks: u32,
    /// Cost charged per task
    #[serde(default)]
    pub cost_per_task: Decimal,
    /// Credential checked against the identity service
    #[serde(default, skip_serializing)]
    pub credential: Option<String>,
}

impl WorkerRegistration {
    pub fn new(id: impl Into<WorkerId>, skills: SkillProfile) -> Self {
        Self {
            id: id.into(),
            specializations: BTreeSet::new(),
            skills,
            max_concurrent_tasks: 1,
            cost_per_task: Decimal::ZERO,
            credential: None,
        }
    }

    pub fn with_specialization(mut self, tag: impl Into<String>) -> Self {
        self.specializations.insert(tag.into());
        self
    }

    pub fn with_capacity(mut self, max_concurrent_tasks: u32) -> Self {
        self.max_concurrent_tasks = max_concurrent_tasks;
        self
    }

    pub fn with_cost(mut self, cost_per_task: Decimal) -> Self {
        self.cost_per_task = cost_per_task;
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Structural validation (proficiency ranges are enforced by `SkillProfile`)
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.id.as_str().trim().is_empty() {
            return Err(RegistryError::InvalidRegistration(
                "worker id must not be empty".into(),
            ));
        }
        if self.skills.is_empty() {
            return Err(RegistryError::InvalidRegistration(format!(
                "worker {} declares no skills",
                self.id
            )));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(RegistryError::InvalidRegistration(format!(
                "worker {} must accept at least one concurrent task",
                self.id
            )));
        }
        if self.cost_per_task < Decimal::ZERO {
            return Err(RegistryError::InvalidRegistration(format!(
                "worker {} has negative cost {}",
                self.id, self.cost_per_task
            )));
        }
        Ok(())
    }
}

/// Worker record held by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub specializations: BTreeSet<String>,
    pub skills: SkillProfile,
    pub max_concurrent_tasks: u32,
    pub cost_per_task: Decimal,
    pub status: WorkerStatus,
    /// 1 = highest, 5 = lowest
    pub rank_tier: u8,
    pub utility_balance: Decimal,
    pub governance_balance: Decimal,
    /// Rolling performance score mirrored from the tracker
    pub performance_score: f64,
    /// Tasks currently bound to this worker
    pub active_tasks: u32,
    pub registered_at: i64,
    pub updated_at: i64,
    /// Version for optimistic concurrency
    pub version: u64,
}

impl Worker {
    /// Build the registry record for an accepted registration
    pub fn from_registration(registration: WorkerRegistration, rank_tier: u8, score: f64) -> Self {
        let now = crate::now_millis();
        Self {
            id: registration.id,
            specializations: registration.specializations,
            skills: registration.skills,
            max_concurrent_tasks: registration.max_concurrent_tasks,
            cost_per_task: registration.cost_per_task,
            status: WorkerStatus::Idle,
            rank_tier,
            utility_balance: Decimal::ZERO,
            governance_balance: Decimal::ZERO,
            performance_score: score,
            active_tasks: 0,
            registered_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Online with a free slot
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.status == WorkerStatus::Idle
    }

    /// Take one task slot; fails if offline or full
    pub fn claim_slot(&mut self) -> Result<(), RegistryError> {
        match self.status {
            WorkerStatus::Offline => Err(RegistryError::Offline(self.id.clone())),
            WorkerStatus::Busy => Err(RegistryError::CapacityExhausted(self.id.clone())),
            WorkerStatus::Idle => {
                self.active_tasks += 1;
                self.refresh_status();
                self.touch();
                Ok(())
            }
        }
    }

    /// Return one task slot
    pub fn release_slot(&mut self) {
        self.active_tasks = self.active_tasks.saturating_sub(1);
        self.refresh_status();
        self.touch();
    }

    /// Take the worker offline or bring it back
    pub fn set_offline(&mut self, offline: bool) {
        if offline {
            self.status = WorkerStatus::Offline;
        } else {
            self.status = WorkerStatus::Idle;
            self.refresh_status();
        }
        self.touch();
    }

    fn refresh_status(&mut self) {
        if self.status == WorkerStatus::Offline {
            return;
        }
        self.status = if self.active_tasks < self.max_concurrent_tasks {
            WorkerStatus::Idle
        } else {
            WorkerStatus::Busy
        };
    }

    /// Update version and timestamp
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = crate::now_millis();
    }
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Worker({}, {}, tier={}, load={}/{}, score={:.3})",
            self.id,
            self.status,
            self.rank_tier,
            self.active_tasks,
            self.max_concurrent_tasks,
            self.performance_score
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(capacity: u32) -> Worker {
        let skills = SkillProfile::from_pairs([("python", 0.9)]).unwrap();
        let reg = WorkerRegistration::new("w-1", skills).with_capacity(capacity);
        Worker::from_registration(reg, 5, 0.5)
    }

    #[test]
    fn test_single_slot_flips_busy() {
        let mut w = worker(1);
        assert!(w.is_idle());

        w.claim_slot().unwrap();
        assert_eq!(w.status, WorkerStatus::Busy);
        assert!(matches!(w.claim_slot(), Err(RegistryError::CapacityExhausted(_))));

        w.release_slot();
        assert_eq!(w.status, WorkerStatus::Idle);
        assert_eq!(w.active_tasks, 0);
    }

    #[test]
    fn test_multi_slot_capacity() {
        let mut w = worker(2);
        w.claim_slot().unwrap();
        assert!(w.is_idle());
        w.claim_slot().unwrap();
        assert_eq!(w.status, WorkerStatus::Busy);
        assert_eq!(w.active_tasks, 2);
    }

    #[test]
    fn test_offline_rejects_claims() {
        let mut w = worker(1);
        w.set_offline(true);
        assert!(matches!(w.claim_slot(), Err(RegistryError::Offline(_))));

        w.set_offline(false);
        assert!(w.is_idle());
    }

    #[test]
    fn test_registration_validation() {
        let reg = WorkerRegistration::new("w-1", SkillProfile::new());
        assert!(reg.validate().is_err());

        let skills = SkillProfile::from_pairs([("rust", 0.5)]).unwrap();
        let reg = WorkerRegistration::new("w-1", skills).with_capacity(0);
        assert!(reg.validate().is_err());
    }
}
