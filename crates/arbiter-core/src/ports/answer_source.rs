//! AnswerSource port - handler にバッチの回答を供給する
//!
//! Frontend 経由（対話）、固定リスト（scripted）、保存済み回答（replay）の
//! いずれも同じ trait で扱います。実装は `handler` モジュールにあります。

use crate::domain::errors::DecisionError;
use crate::domain::ids::DecisionId;
use crate::ports::frontend::BatchAnswer;
use crate::registry::DecisionRegistry;

pub trait AnswerSource {
    /// Answers for `batch`, in batch order.
    ///
    /// Decisions missing from the result stay open.
    fn answers(
        &mut self,
        registry: &DecisionRegistry,
        batch: &[DecisionId],
    ) -> Result<Vec<(DecisionId, BatchAnswer)>, DecisionError>;

    /// Called once after the pipeline finished.
    fn finish(&mut self) {}
}
