use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ReferenceCategory, UserId};

/// The specialized sub-workflows that hang off an approved workstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationKind {
    /// Hazard and risk inspection
    Inspection,
    /// Incident diagnosis
    Diagnosis,
    /// Remediation suggestion
    Remediation,
    /// Craft-process tracking
    CraftProcess,
}

impl InvestigationKind {
    pub fn type_tag(&self) -> u8 {
        match self {
            InvestigationKind::Inspection => 1,
            InvestigationKind::Diagnosis => 2,
            InvestigationKind::Remediation => 3,
            InvestigationKind::CraftProcess => 4,
        }
    }

    pub fn plan(&self) -> StepPlan {
        use ReferenceCategory::*;
        use StepKind::*;

        let steps: &'static [StepKind] = match self {
            InvestigationKind::Inspection => &[
                Observe,
                Select(Hazard),
                Select(Risk),
                Note,
                Complete,
            ],
            InvestigationKind::Diagnosis => &[Observe, Select(Hazard), Note, Complete],
            InvestigationKind::Remediation => &[Select(Remedy), Note, Complete],
            InvestigationKind::CraftProcess => &[Observe, Note, Observe, Complete],
        };
        StepPlan { kind: *self, steps }
    }
}

impl std::fmt::Display for InvestigationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvestigationKind::Inspection => write!(f, "inspection"),
            InvestigationKind::Diagnosis => write!(f, "diagnosis"),
            InvestigationKind::Remediation => write!(f, "remediation"),
            InvestigationKind::CraftProcess => write!(f, "craft_process"),
        }
    }
}

impl std::str::FromStr for InvestigationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "inspection" => Ok(InvestigationKind::Inspection),
            "diagnosis" => Ok(InvestigationKind::Diagnosis),
            "remediation" => Ok(InvestigationKind::Remediation),
            "craft_process" | "craft" => Ok(InvestigationKind::CraftProcess),
            _ => Err(format!("Invalid investigation kind: {}", s)),
        }
    }
}

/// Shape of the payload a step accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Per-sense observations
    Observe,
    /// A set of catalog references
    Select(ReferenceCategory),
    /// Free-form note
    Note,
    /// Terminal step; needs a completion time
    Complete,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Observe => write!(f, "observation"),
            StepKind::Select(category) => write!(f, "{} selection", category),
            StepKind::Note => write!(f, "note"),
            StepKind::Complete => write!(f, "completion"),
        }
    }
}

/// Ordered step table for one investigation kind (steps are 1-based)
#[derive(Debug, Clone, Copy)]
pub struct StepPlan {
    pub kind: InvestigationKind,
    steps: &'static [StepKind],
}

impl StepPlan {
    pub fn total(&self) -> u8 {
        self.steps.len() as u8
    }

    pub fn step(&self, number: u8) -> Option<StepKind> {
        if number == 0 {
            return None;
        }
        self.steps.get(number as usize - 1).copied()
    }

    /// Highest step a record at `saved` may write next
    pub fn next_allowed(&self, saved: u8) -> u8 {
        (saved + 1).min(self.total())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl StepStatus {
    pub fn code(&self) -> u8 {
        match self {
            StepStatus::NotStarted => 0,
            StepStatus::InProgress => 1,
            StepStatus::Completed => 2,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::NotStarted => write!(f, "not_started"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "not_started" => Ok(StepStatus::NotStarted),
            "in_progress" => Ok(StepStatus::InProgress),
            "completed" => Ok(StepStatus::Completed),
            _ => Err(format!("Invalid step status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sense {
    Visual,
    Auditory,
    Olfactory,
    Tactile,
}

impl Sense {
    pub const ALL: [Sense; 4] = [Sense::Visual, Sense::Auditory, Sense::Olfactory, Sense::Tactile];
}

impl std::fmt::Display for Sense {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sense::Visual => write!(f, "visual"),
            Sense::Auditory => write!(f, "auditory"),
            Sense::Olfactory => write!(f, "olfactory"),
            Sense::Tactile => write!(f, "tactile"),
        }
    }
}

impl std::str::FromStr for Sense {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "visual" => Ok(Sense::Visual),
            "auditory" => Ok(Sense::Auditory),
            "olfactory" => Ok(Sense::Olfactory),
            "tactile" => Ok(Sense::Tactile),
            _ => Err(format!("Invalid sense: {}", s)),
        }
    }
}

/// One sensory observation row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub sense: Sense,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationRecord {
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    #[serde(skip)]
    pub workstream_id: i64,
    pub kind: InvestigationKind,
    /// Highest step saved at least once (0 = none)
    pub step: u8,
    pub status: StepStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InvestigationRecord {
    pub fn plan(&self) -> StepPlan {
        self.kind.plan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspection_plan_has_five_steps() {
        let plan = InvestigationKind::Inspection.plan();
        assert_eq!(plan.total(), 5);
        assert_eq!(plan.step(2), Some(StepKind::Select(ReferenceCategory::Hazard)));
        assert_eq!(plan.step(5), Some(StepKind::Complete));
        assert_eq!(plan.step(0), None);
        assert_eq!(plan.step(6), None);
        assert_eq!(plan.next_allowed(5), 5);
    }

    #[test]
    fn test_every_plan_ends_with_completion() {
        for kind in [
            InvestigationKind::Inspection,
            InvestigationKind::Diagnosis,
            InvestigationKind::Remediation,
            InvestigationKind::CraftProcess,
        ] {
            let plan = kind.plan();
            assert_eq!(plan.step(plan.total()), Some(StepKind::Complete));
            let completes = (1..=plan.total())
                .filter(|n| plan.step(*n) == Some(StepKind::Complete))
                .count();
            assert_eq!(completes, 1, "{kind}");
        }
    }

    #[test]
    fn test_next_allowed_is_capped() {
        let plan = InvestigationKind::Remediation.plan();
        assert_eq!(plan.next_allowed(0), 1);
        assert_eq!(plan.next_allowed(2), 3);
        assert_eq!(plan.next_allowed(3), 3);
    }
}
