//! PerformanceRecord - append-only outcome of one task attempt

use serde::{Deserialize, Serialize};

use super::ids::{TaskId, WorkerId};
use super::skill::{Proficiency, SkillError};

/// One completion or failure, aggregated into rolling scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub worker_id: WorkerId,
    pub task_id: TaskId,
    pub completed: bool,
    /// Quality in [0,1]; always 0 for failures
    pub quality: Proficiency,
    /// Unix millis
    pub timestamp: i64,
}

impl PerformanceRecord {
    /// Record a completed task with a quality in [0,1]
    pub fn completed(worker_id: WorkerId, task_id: TaskId, quality: f64) -> Result<Self, SkillError> {
        Ok(Self {
            worker_id,
            task_id,
            completed: true,
            quality: Proficiency::new(quality)?,
            timestamp: crate::now_millis(),
        })
    }

    /// Record a failed attempt
    pub fn failed(worker_id: WorkerId, task_id: TaskId) -> Self {
        Self {
            worker_id,
            task_id,
            completed: false,
            quality: Proficiency::ZERO,
            timestamp: crate::now_millis(),
        }
    }

    #[inline]
    pub fn quality(&self) -> f64 {
        self.quality.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_validated() {
        let w = WorkerId::from("w-1");
        assert!(PerformanceRecord::completed(w.clone(), TaskId::new(), 0.9).is_ok());
        assert!(PerformanceRecord::completed(w, TaskId::new(), 1.2).is_err());
    }

    #[test]
    fn test_failure_scores_zero() {
        let rec = PerformanceRecord::failed(WorkerId::from("w-1"), TaskId::new());
        assert!(!rec.completed);
        assert_eq!(rec.quality(), 0.0);
    }
}
