//! Venture lifecycle manager
//!
//! A venture walks its phases strictly in order. Entering a phase submits
//! that phase's template tasks; the phase is left only when every one of its
//! tasks is completed. A task that fails with no retries left blocks the
//! venture until it is resubmitted. A template the dispatcher refuses also
//! blocks it; the missing templates are resubmitted on every refresh.

use std::collections::BTreeMap;
use std::sync::Arc;

use agora_common::types::token::round_amount;
use agora_common::{
    Result, TaskId, TaskOrigin, TaskSpec, TaskStatus, VentureError, VentureId, TOKEN_DECIMALS,
};
use agora_dispatch::TaskAssignmentEngine;
use parking_lot::RwLock;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::phase::{validate_plan, PhaseTemplate, TaskTemplate};

/// Where venture tasks go
pub trait TaskSubmitter: Send + Sync {
    fn submit_task(&self, spec: TaskSpec) -> Result<TaskId>;

    fn task_status(&self, task_id: TaskId) -> Option<TaskStatus>;
}

impl TaskSubmitter for TaskAssignmentEngine {
    fn submit_task(&self, spec: TaskSpec) -> Result<TaskId> {
        self.submit(spec)
    }

    fn task_status(&self, task_id: TaskId) -> Option<TaskStatus> {
        self.get(task_id).map(|t| t.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VentureStatus {
    Active,
    Blocked,
    Completed,
}

/// Task generated for a phase, with the template it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTask {
    pub task_id: TaskId,
    pub template_index: usize,
    pub max_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub name: String,
    pub budget_fraction: Decimal,
    pub budget: Decimal,
    pub templates: Vec<TaskTemplate>,
    pub tasks: Vec<PhaseTask>,
    pub entered_at: Option<i64>,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venture {
    pub id: VentureId,
    pub name: String,
    pub budget: Decimal,
    pub phases: Vec<PhaseState>,
    /// Never decreases, never skips
    pub current_phase: usize,
    pub status: VentureStatus,
    pub blocked_tasks: Vec<TaskId>,
    /// Last rejection of the current phase's templates
    #[serde(default)]
    pub submission_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Venture {
    pub fn phase_name(&self) -> &str {
        self.phases
            .get(self.current_phase)
            .map(|p| p.name.as_str())
            .unwrap_or("")
    }
}

/// Phase change reported by `refresh`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum VentureTransition {
    Advanced {
        venture_id: VentureId,
        from_phase: String,
        /// None once the final phase is done
        to_phase: Option<String>,
    },
    Blocked {
        venture_id: VentureId,
        phase: String,
        tasks: Vec<TaskId>,
    },
}

/// Progress summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VentureStatusReport {
    pub venture_id: VentureId,
    pub name: String,
    pub phase: String,
    pub phase_index: usize,
    pub phase_count: usize,
    /// Completed phases plus the completed share of the current one, in [0,1]
    pub progress: f64,
    pub status: VentureStatus,
    pub blocked_tasks: Vec<TaskId>,
    pub submission_error: Option<String>,
    pub phase_budget: Decimal,
}

pub struct VentureManager {
    submitter: Arc<dyn TaskSubmitter>,
    ventures: RwLock<BTreeMap<VentureId, Venture>>,
}

impl VentureManager {
    pub fn new(submitter: Arc<dyn TaskSubmitter>) -> Self {
        Self {
            submitter,
            ventures: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a venture and enter its first phase
    #[instrument(skip_all, fields(budget = %budget))]
    pub fn create(
        &self,
        name: impl AsRef<str>,
        budget: Decimal,
        phases: Vec<PhaseTemplate>,
    ) -> Result<(VentureId, Vec<VentureTransition>)> {
        if budget <= Decimal::ZERO {
            return Err(VentureError::InvalidBudget.into());
        }
        validate_plan(&phases)?;

        let now = agora_common::now_millis();
        let mut venture = Venture {
            id: VentureId::new(),
            name: name.as_ref().to_string(),
            budget,
            phases: phases
                .into_iter()
                .map(|p| PhaseState {
                    budget: round_amount(budget * p.budget_fraction),
                    name: p.name,
                    budget_fraction: p.budget_fraction,
                    templates: p.tasks,
                    tasks: Vec::new(),
                    entered_at: None,
                    completed_at: None,
                })
                .collect(),
            current_phase: 0,
            status: VentureStatus::Active,
            blocked_tasks: Vec::new(),
            submission_error: None,
            created_at: now,
            updated_at: now,
        };

        self.submit_phase_tasks(&mut venture)?;
        let transitions = self.evaluate(&mut venture);
        let id = venture.id;
        info!(venture = %id, phases = venture.phases.len(), "Venture created");
        self.ventures.write().insert(id, venture);
        Ok((id, transitions))
    }

    /// Re-evaluate a venture's current phase; advances as far as completed
    /// work allows, one phase at a time
    pub fn refresh(&self, venture_id: VentureId) -> Result<Vec<VentureTransition>> {
        let mut ventures = self.ventures.write();
        let venture = ventures
            .get_mut(&venture_id)
            .ok_or(VentureError::NotFound(venture_id))?;

        match venture.status {
            VentureStatus::Completed => Ok(Vec::new()),
            VentureStatus::Blocked if venture.submission_error.is_some() => {
                match self.retry_submission(venture) {
                    Some(transitions) => Ok(transitions),
                    None => Err(VentureError::PhaseBlocked {
                        venture_id,
                        phase: venture.phase_name().to_string(),
                        tasks: Vec::new(),
                    }
                    .into()),
                }
            }
            VentureStatus::Blocked => Err(VentureError::PhaseBlocked {
                venture_id,
                phase: venture.phase_name().to_string(),
                tasks: venture.blocked_tasks.clone(),
            }
            .into()),
            VentureStatus::Active => Ok(self.evaluate(venture)),
        }
    }

    /// Refresh every active venture and retry refused phase templates
    pub fn refresh_all(&self) -> Vec<VentureTransition> {
        let mut ventures = self.ventures.write();
        let mut transitions = Vec::new();
        for venture in ventures.values_mut() {
            match venture.status {
                VentureStatus::Active => transitions.extend(self.evaluate(venture)),
                VentureStatus::Blocked if venture.submission_error.is_some() => {
                    transitions.extend(self.retry_submission(venture).unwrap_or_default())
                }
                _ => {}
            }
        }
        transitions
    }

    /// Replace a task that exhausted its retries with a fresh one from the
    /// same template
    #[instrument(skip_all, fields(venture = %venture_id, task = %task_id))]
    pub fn resubmit_task(&self, venture_id: VentureId, task_id: TaskId) -> Result<TaskId> {
        let mut ventures = self.ventures.write();
        let venture = ventures
            .get_mut(&venture_id)
            .ok_or(VentureError::NotFound(venture_id))?;

        if venture.status == VentureStatus::Completed {
            return Err(VentureError::AlreadyCompleted(venture_id).into());
        }
        if !venture.blocked_tasks.contains(&task_id) {
            return Err(VentureError::TaskNotBlocked {
                venture_id,
                task_id,
            }
            .into());
        }

        let phase_index = venture.current_phase;
        let phase = &mut venture.phases[phase_index];
        let slot = phase
            .tasks
            .iter()
            .position(|t| t.task_id == task_id)
            .ok_or(VentureError::TaskNotBlocked {
                venture_id,
                task_id,
            })?;
        let template_index = phase.tasks[slot].template_index;
        let max_cost = phase.tasks[slot].max_cost;
        let template = phase.templates[template_index].clone();

        let new_id = self.submitter.submit_task(
            TaskSpec::new(template.description, template.requirements, max_cost).with_origin(TaskOrigin {
                venture_id,
                phase_index,
            }),
        )?;
        phase.tasks[slot] = PhaseTask {
            task_id: new_id,
            template_index,
            max_cost,
        };

        venture.blocked_tasks.retain(|t| *t != task_id);
        if venture.blocked_tasks.is_empty() {
            venture.status = VentureStatus::Active;
        }
        venture.updated_at = agora_common::now_millis();
        info!(replacement = %new_id, "Venture task resubmitted");
        Ok(new_id)
    }

    pub fn get(&self, venture_id: VentureId) -> Option<Venture> {
        self.ventures.read().get(&venture_id).cloned()
    }

    pub fn list(&self) -> Vec<Venture> {
        self.ventures.read().values().cloned().collect()
    }

    pub fn status(&self, venture_id: VentureId) -> Result<VentureStatusReport> {
        let ventures = self.ventures.read();
        let venture = ventures
            .get(&venture_id)
            .ok_or(VentureError::NotFound(venture_id))?;

        let phase_count = venture.phases.len();
        let phase_progress = match venture.phases.get(venture.current_phase) {
            Some(phase) if venture.status != VentureStatus::Completed && !phase.templates.is_empty() => {
                let done = phase
                    .tasks
                    .iter()
                    .filter(|t| self.submitter.task_status(t.task_id) == Some(TaskStatus::Completed))
                    .count();
                done as f64 / phase.templates.len() as f64
            }
            _ => 0.0,
        };
        let progress = if venture.status == VentureStatus::Completed {
            1.0
        } else {
            (venture.current_phase as f64 + phase_progress) / phase_count as f64
        };

        Ok(VentureStatusReport {
            venture_id,
            name: venture.name.clone(),
            phase: venture.phase_name().to_string(),
            phase_index: venture.current_phase,
            phase_count,
            progress,
            status: venture.status,
            blocked_tasks: venture.blocked_tasks.clone(),
            submission_error: venture.submission_error.clone(),
            phase_budget: venture
                .phases
                .get(venture.current_phase)
                .map(|p| p.budget)
                .unwrap_or(Decimal::ZERO),
        })
    }

    pub fn len(&self) -> usize {
        self.ventures.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ventures.read().is_empty()
    }

    /// Submit every template of the current phase that has no task yet.
    /// Tasks submitted before a rejection are kept.
    fn submit_phase_tasks(&self, venture: &mut Venture) -> Result<()> {
        let phase_index = venture.current_phase;
        let venture_id = venture.id;
        let phase = &mut venture.phases[phase_index];
        if phase.entered_at.is_none() {
            phase.entered_at = Some(agora_common::now_millis());
        }
        if phase.tasks.len() == phase.templates.len() {
            return Ok(());
        }

        let share = (phase.budget / Decimal::from(phase.templates.len()))
            .round_dp_with_strategy(TOKEN_DECIMALS, RoundingStrategy::ToZero);

        for (template_index, template) in phase.templates.iter().enumerate() {
            if phase.tasks.iter().any(|t| t.template_index == template_index) {
                continue;
            }
            let max_cost = template.max_cost.map_or(share, |cap| cap.min(share));
            let task_id = self.submitter.submit_task(
                TaskSpec::new(template.description.clone(), template.requirements.clone(), max_cost)
                    .with_origin(TaskOrigin {
                        venture_id,
                        phase_index,
                    }),
            )?;
            phase.tasks.push(PhaseTask {
                task_id,
                template_index,
                max_cost,
            });
        }
        info!(venture = %venture_id, phase = %phase.name, tasks = phase.tasks.len(), budget = %phase.budget, "Venture phase entered");
        Ok(())
    }

    /// Resubmit refused templates of a submission-blocked venture. Returns
    /// the transitions once it is active again.
    fn retry_submission(&self, venture: &mut Venture) -> Option<Vec<VentureTransition>> {
        match self.submit_phase_tasks(venture) {
            Ok(()) => {
                info!(venture = %venture.id, phase = %venture.phase_name(), "Venture phase tasks submitted");
                venture.status = VentureStatus::Active;
                venture.submission_error = None;
                venture.updated_at = agora_common::now_millis();
                Some(self.evaluate(venture))
            }
            Err(e) => {
                venture.submission_error = Some(e.to_string());
                None
            }
        }
    }

    /// Advance through completed phases; flag exhausted failures
    fn evaluate(&self, venture: &mut Venture) -> Vec<VentureTransition> {
        let mut transitions = Vec::new();

        while venture.status == VentureStatus::Active {
            if let Err(e) = self.submit_phase_tasks(venture) {
                error!(venture = %venture.id, phase = %venture.phase_name(), error = %e, "Venture phase tasks refused");
                venture.status = VentureStatus::Blocked;
                venture.blocked_tasks.clear();
                venture.submission_error = Some(e.to_string());
                venture.updated_at = agora_common::now_millis();
                transitions.push(VentureTransition::Blocked {
                    venture_id: venture.id,
                    phase: venture.phase_name().to_string(),
                    tasks: Vec::new(),
                });
                break;
            }

            let phase = &venture.phases[venture.current_phase];
            let statuses: Vec<(TaskId, Option<TaskStatus>)> = phase
                .tasks
                .iter()
                .map(|t| (t.task_id, self.submitter.task_status(t.task_id)))
                .collect();

            let failed: Vec<TaskId> = statuses
                .iter()
                .filter(|(_, s)| *s == Some(TaskStatus::Failed))
                .map(|(id, _)| *id)
                .collect();
            if !failed.is_empty() {
                warn!(venture = %venture.id, phase = %phase.name, tasks = failed.len(), "Venture blocked by exhausted tasks");
                venture.status = VentureStatus::Blocked;
                venture.blocked_tasks = failed.clone();
                venture.updated_at = agora_common::now_millis();
                transitions.push(VentureTransition::Blocked {
                    venture_id: venture.id,
                    phase: phase.name.clone(),
                    tasks: failed,
                });
                break;
            }

            let all_submitted = phase.tasks.len() == phase.templates.len();
            if !all_submitted || !statuses.iter().all(|(_, s)| *s == Some(TaskStatus::Completed)) {
                break;
            }

            let from_phase = phase.name.clone();
            let now = agora_common::now_millis();
            venture.phases[venture.current_phase].completed_at = Some(now);
            venture.updated_at = now;

            if venture.current_phase + 1 >= venture.phases.len() {
                venture.status = VentureStatus::Completed;
                info!(venture = %venture.id, "Venture completed");
                transitions.push(VentureTransition::Advanced {
                    venture_id: venture.id,
                    from_phase,
                    to_phase: None,
                });
                break;
            }

            venture.current_phase += 1;
            let to_phase = venture.phase_name().to_string();
            info!(venture = %venture.id, from = %from_phase, to = %to_phase, "Venture phase advanced");
            transitions.push(VentureTransition::Advanced {
                venture_id: venture.id,
                from_phase,
                to_phase: Some(to_phase),
            });
        }
        transitions
    }
}
