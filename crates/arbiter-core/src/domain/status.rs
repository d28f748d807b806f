//! Decision status state machine.

use serde::{Deserialize, Serialize};

/// Resolution status of a decision.
///
/// State transitions:
/// - Open -> Done (value accepted by the setter)
/// - Open -> Skipped (only when skipping is allowed)
/// - Open -> LoadedDone (a persisted answer matched at construction)
/// - Done -> SavedDone (answer written to the registry's answer store)
/// - any -> Open (explicit reset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Waiting for an answer.
    Open,

    /// Answered in this run.
    Done,

    /// Pre-resolved from a persisted answer.
    LoadedDone,

    /// Answered in this run and recorded in the answer store.
    SavedDone,

    /// Resolved without a value.
    Skipped,
}

impl DecisionStatus {
    /// `Open` is the only unresolved state.
    pub fn is_open(self) -> bool {
        matches!(self, DecisionStatus::Open)
    }

    pub fn is_resolved(self) -> bool {
        !self.is_open()
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DecisionStatus::Open => "open",
            DecisionStatus::Done => "done",
            DecisionStatus::LoadedDone => "loaded_done",
            DecisionStatus::SavedDone => "saved_done",
            DecisionStatus::Skipped => "skipped",
        };
        f.write_str(name)
    }
}
