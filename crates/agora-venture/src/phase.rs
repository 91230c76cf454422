//! Venture phases and their task templates
//!
//! Standard ladder: ideation → validation → design → development → launch →
//! scale, funded 10/15/20/40/15/0 percent of the venture budget.

use agora_common::{SkillProfile, VentureError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Standard venture phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenturePhase {
    Ideation,
    Validation,
    Design,
    Development,
    Launch,
    Scale,
}

impl VenturePhase {
    pub const ALL: [VenturePhase; 6] = [
        VenturePhase::Ideation,
        VenturePhase::Validation,
        VenturePhase::Design,
        VenturePhase::Development,
        VenturePhase::Launch,
        VenturePhase::Scale,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VenturePhase::Ideation => "ideation",
            VenturePhase::Validation => "validation",
            VenturePhase::Design => "design",
            VenturePhase::Development => "development",
            VenturePhase::Launch => "launch",
            VenturePhase::Scale => "scale",
        }
    }

    /// Default share of the venture budget
    pub fn default_fraction(self) -> Decimal {
        match self {
            VenturePhase::Ideation => Decimal::new(10, 2),
            VenturePhase::Validation => Decimal::new(15, 2),
            VenturePhase::Design => Decimal::new(20, 2),
            VenturePhase::Development => Decimal::new(40, 2),
            VenturePhase::Launch => Decimal::new(15, 2),
            VenturePhase::Scale => Decimal::ZERO,
        }
    }

    fn default_tasks(self) -> Vec<TaskTemplate> {
        let t = |description: &str, skills: &[(&str, f64)]| TaskTemplate {
            description: description.to_string(),
            requirements: SkillProfile::from_pairs(skills.iter().copied())
                .unwrap_or_default(),
            max_cost: None,
        };
        match self {
            VenturePhase::Ideation => vec![
                t("Market opportunity research", &[("research", 0.8), ("analysis", 0.75)]),
                t("Concept brief", &[("writing", 0.75), ("strategy", 0.8)]),
            ],
            VenturePhase::Validation => vec![
                t("Customer interview synthesis", &[("research", 0.8), ("communication", 0.75)]),
                t("Demand test analysis", &[("analysis", 0.8)]),
            ],
            VenturePhase::Design => vec![
                t("Product architecture", &[("architecture", 0.8), ("engineering", 0.75)]),
                t("UX prototype", &[("design", 0.8)]),
            ],
            VenturePhase::Development => vec![
                t("Core implementation", &[("engineering", 0.8)]),
                t("Test suite", &[("engineering", 0.75), ("qa", 0.8)]),
            ],
            VenturePhase::Launch => vec![t("Launch campaign", &[("marketing", 0.8), ("writing", 0.75)])],
            VenturePhase::Scale => Vec::new(),
        }
    }
}

impl std::fmt::Display for VenturePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task generated when a phase is entered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub description: String,
    pub requirements: SkillProfile,
    /// Cap below the phase's even per-task share
    #[serde(default)]
    pub max_cost: Option<Decimal>,
}

impl TaskTemplate {
    pub fn new(description: impl Into<String>, requirements: SkillProfile) -> Self {
        Self {
            description: description.into(),
            requirements,
            max_cost: None,
        }
    }

    pub fn with_max_cost(mut self, max_cost: Decimal) -> Self {
        self.max_cost = Some(max_cost);
        self
    }
}

/// One phase of a venture plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTemplate {
    pub name: String,
    pub budget_fraction: Decimal,
    #[serde(default)]
    pub tasks: Vec<TaskTemplate>,
}

impl PhaseTemplate {
    pub fn new(name: impl Into<String>, budget_fraction: Decimal) -> Self {
        Self {
            name: name.into(),
            budget_fraction,
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: TaskTemplate) -> Self {
        self.tasks.push(task);
        self
    }

    /// Standard six-phase plan with default fractions and task sets
    pub fn standard() -> Vec<PhaseTemplate> {
        VenturePhase::ALL
            .iter()
            .map(|phase| PhaseTemplate {
                name: phase.as_str().to_string(),
                budget_fraction: phase.default_fraction(),
                tasks: phase.default_tasks(),
            })
            .collect()
    }
}

/// Fractions must be non-negative and sum to exactly 1
pub fn validate_plan(phases: &[PhaseTemplate]) -> Result<(), VentureError> {
    if phases.is_empty() {
        return Err(VentureError::NoPhases);
    }
    let sum: Decimal = phases.iter().map(|p| p.budget_fraction).sum();
    if sum != Decimal::ONE || phases.iter().any(|p| p.budget_fraction < Decimal::ZERO) {
        return Err(VentureError::InvalidBudgetFractions { sum: sum.to_string() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_common::MATCH_THRESHOLD;
    use agora_dispatch::CapabilityMatcher;
    use rust_decimal_macros::dec;

    #[test]
    fn test_standard_plan_valid() {
        let plan = PhaseTemplate::standard();
        assert_eq!(plan.len(), 6);
        assert!(validate_plan(&plan).is_ok());
        assert_eq!(plan[3].name, "development");
        assert_eq!(plan[3].budget_fraction, dec!(0.40));
        assert!(plan.iter().take(5).all(|p| !p.tasks.is_empty()));
    }

    #[test]
    fn test_standard_templates_matchable_by_expert() {
        // Proficiency is capped at the requirement, so only the weights decide this
        for phase in PhaseTemplate::standard() {
            for template in &phase.tasks {
                let expert = SkillProfile::from_pairs(template.requirements.iter().map(|(skill, _)| (skill, 1.0)))
                    .unwrap();
                let score = CapabilityMatcher::score(&template.requirements, &expert);
                assert!(
                    score > MATCH_THRESHOLD,
                    "{} / {} tops out at {score}",
                    phase.name,
                    template.description
                );
            }
        }
    }

    #[test]
    fn test_fractions_must_sum_to_one() {
        let plan = vec![PhaseTemplate::new("a", dec!(0.5)), PhaseTemplate::new("b", dec!(0.4))];
        assert!(matches!(
            validate_plan(&plan),
            Err(VentureError::InvalidBudgetFractions { .. })
        ));
    }

    #[test]
    fn test_negative_fraction_rejected() {
        let plan = vec![PhaseTemplate::new("a", dec!(1.5)), PhaseTemplate::new("b", dec!(-0.5))];
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn test_plan_from_json() {
        let plan: Vec<PhaseTemplate> = serde_json::from_str(
            r#"[
                {"name": "build", "budget_fraction": "0.7",
                 "tasks": [{"description": "core", "requirements": {"rust": 0.9}}]},
                {"name": "ship", "budget_fraction": "0.3"}
            ]"#,
        )
        .unwrap();
        assert!(validate_plan(&plan).is_ok());
        assert_eq!(plan[0].tasks[0].max_cost, None);
        assert!(plan[1].tasks.is_empty());
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert_eq!(validate_plan(&[]), Err(VentureError::NoPhases));
    }
}
