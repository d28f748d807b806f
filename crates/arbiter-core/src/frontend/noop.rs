use tracing::warn;

use crate::domain::decision::Decision;
use crate::domain::errors::DecisionError;
use crate::ports::frontend::{Frontend, PromptContext, Resolution};

/// Frontend for unattended runs: skips what may be skipped, cancels otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFrontend;

impl Frontend for NoopFrontend {
    fn solve_at(
        &mut self,
        decision: &Decision,
        _context: &PromptContext,
    ) -> Result<Resolution, DecisionError> {
        if decision.allow_skip() {
            return Ok(Resolution::Skip);
        }
        warn!(decision = %decision, "no frontend to answer an unskippable decision");
        Ok(Resolution::Cancel)
    }
}
