//! Capsule lifecycle state machine.
//!
//! States form a fixed directed graph; the registry rejects any patch whose
//! state change is not an edge of this graph. `Archived` is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a capsule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleState {
    /// Draft record, not yet visible to deployment tooling
    Created,
    /// Accepted into the registry
    Registered,
    /// Placed onto infrastructure but not serving
    Deployed,
    /// Actively serving
    Running,
    /// Temporarily suspended, resumable
    Paused,
    /// Halted, redeployable
    Stopped,
    /// Entered a fault condition
    Failed,
    /// Retired. Terminal state
    Archived,
}

impl CapsuleState {
    /// All states, in lifecycle order.
    pub const ALL: [CapsuleState; 8] = [
        CapsuleState::Created,
        CapsuleState::Registered,
        CapsuleState::Deployed,
        CapsuleState::Running,
        CapsuleState::Paused,
        CapsuleState::Stopped,
        CapsuleState::Failed,
        CapsuleState::Archived,
    ];

    /// States reachable from this state in a single transition.
    pub fn allowed_transitions(&self) -> &'static [CapsuleState] {
        match self {
            CapsuleState::Created => &[CapsuleState::Registered, CapsuleState::Archived],
            CapsuleState::Registered => &[CapsuleState::Deployed, CapsuleState::Archived],
            CapsuleState::Deployed => &[
                CapsuleState::Running,
                CapsuleState::Failed,
                CapsuleState::Archived,
            ],
            CapsuleState::Running => &[
                CapsuleState::Paused,
                CapsuleState::Stopped,
                CapsuleState::Failed,
                CapsuleState::Archived,
            ],
            CapsuleState::Paused => &[
                CapsuleState::Running,
                CapsuleState::Stopped,
                CapsuleState::Archived,
            ],
            CapsuleState::Stopped => &[CapsuleState::Deployed, CapsuleState::Archived],
            CapsuleState::Failed => &[CapsuleState::Deployed, CapsuleState::Archived],
            CapsuleState::Archived => &[],
        }
    }

    /// Whether a direct transition to `target` is allowed.
    pub fn can_transition_to(&self, target: CapsuleState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CapsuleState::Archived)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CapsuleState::Created => "created",
            CapsuleState::Registered => "registered",
            CapsuleState::Deployed => "deployed",
            CapsuleState::Running => "running",
            CapsuleState::Paused => "paused",
            CapsuleState::Stopped => "stopped",
            CapsuleState::Failed => "failed",
            CapsuleState::Archived => "archived",
        }
    }
}

impl fmt::Display for CapsuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
