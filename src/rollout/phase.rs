use serde::{Deserialize, Serialize};
use std::fmt;

/// Phases of the deploy state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    Draft,
    Scheduled,
    Validating,
    BackingUp,
    Staging,
    Testing,
    Swapping,
    Reloading,
    Applied,
    Failed,
}

impl DeployPhase {
    /// Whether the serving path may already have been modified
    pub fn touches_serving_path(&self) -> bool {
        matches!(self, DeployPhase::Swapping | DeployPhase::Reloading)
    }
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeployPhase::Draft => "draft",
            DeployPhase::Scheduled => "scheduled",
            DeployPhase::Validating => "validating",
            DeployPhase::BackingUp => "backing_up",
            DeployPhase::Staging => "staging",
            DeployPhase::Testing => "testing",
            DeployPhase::Swapping => "swapping",
            DeployPhase::Reloading => "reloading",
            DeployPhase::Applied => "applied",
            DeployPhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}
