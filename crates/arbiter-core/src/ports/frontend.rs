//! Frontend port - decision を誰かに答えてもらうための抽象化
//!
//! Frontend は 1 件（`solve_at`）またはバッチ（`solve_batch`）を解決し、
//! 結果を [`Resolution`] で返します。skip / skip all / cancel は例外ではなく
//! 値として表現し、バッチ側がパターンマッチで処理します。
//!
//! # 実装
//! - **ConsoleFrontend**: 端末で 1 行ずつ入力
//! - **RemoteFrontend**: TCP サービス経由で外部クライアントが回答
//! - **NoopFrontend**: skip できるものは skip、それ以外は cancel

use std::fmt;

use serde_json::Value;
use tracing::{info, warn};

use crate::domain::answer::Answer;
use crate::domain::decision::Decision;
use crate::domain::errors::{DecisionError, ParseError};
use crate::domain::ids::DecisionId;
use crate::domain::kind::BodyRow;
use crate::registry::DecisionRegistry;

/// Raw input before kind-specific coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAnswer {
    /// One line typed into a terminal.
    Text(String),
    /// A JSON primitive sent by a client or a script.
    Json(Value),
}

/// Outcome of asking about one decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A validated answer in canonical form.
    Answered(Answer),
    Skip,
    /// Skip this and every remaining skippable decision of the batch.
    SkipAll,
    /// Abort the whole answering process.
    Cancel,
}

/// Per-decision result of a batch, ready to be applied to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchAnswer {
    Answered(Answer),
    Skipped,
}

/// Control words a user may type instead of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCommand {
    Skip,
    SkipAll,
    Cancel,
}

impl MetaCommand {
    pub fn keyword(self) -> &'static str {
        match self {
            MetaCommand::Skip => "skip",
            MetaCommand::SkipAll => "skip all",
            MetaCommand::Cancel => "cancel",
        }
    }

    /// Case-insensitive match restricted to the offered commands.
    pub fn recognize(input: &str, offered: &[MetaCommand]) -> Option<MetaCommand> {
        let normalized = input.trim().to_lowercase();
        offered
            .iter()
            .copied()
            .find(|command| command.keyword() == normalized)
    }

    pub fn resolution(self) -> Resolution {
        match self {
            MetaCommand::Skip => Resolution::Skip,
            MetaCommand::SkipAll => Resolution::SkipAll,
            MetaCommand::Cancel => Resolution::Cancel,
        }
    }
}

impl fmt::Display for MetaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Where a single prompt sits inside its batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptContext {
    /// `(index, total)`, 1-based.
    pub position: Option<(usize, usize)>,
    /// Every decision of the batch allows skipping.
    pub skip_all_available: bool,
}

impl PromptContext {
    pub fn in_batch(index: usize, total: usize, skip_all_available: bool) -> Self {
        Self {
            position: Some((index, total)),
            skip_all_available,
        }
    }
}

/// Display artifacts shared by all frontends.
#[derive(Debug, Clone, PartialEq)]
pub struct Presentation {
    pub question: String,
    pub options: Vec<MetaCommand>,
    pub body: Option<Vec<BodyRow>>,
}

pub trait Frontend {
    /// Resolve one decision.
    ///
    /// An `Answered` resolution must already have passed
    /// [`Decision::validate`].
    fn solve_at(
        &mut self,
        decision: &Decision,
        context: &PromptContext,
    ) -> Result<Resolution, DecisionError>;

    fn solve(&mut self, decision: &Decision) -> Result<Resolution, DecisionError> {
        self.solve_at(decision, &PromptContext::default())
    }

    /// Resolve a batch in order.
    ///
    /// Decisions that are no longer open are left out of the result. Once
    /// skip-all was requested every remaining skippable decision is skipped
    /// without asking. `Cancel` aborts the batch with
    /// [`DecisionError::Cancelled`].
    fn solve_batch(
        &mut self,
        registry: &DecisionRegistry,
        ids: &[DecisionId],
    ) -> Result<Vec<(DecisionId, BatchAnswer)>, DecisionError> {
        let decisions = ids
            .iter()
            .map(|id| registry.decision(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let total = decisions.len();
        let skip_all_available = decisions.iter().all(|d| d.allow_skip());

        let mut skip_all = false;
        let mut answers = Vec::with_capacity(total);
        for (index, decision) in decisions.into_iter().enumerate() {
            if !decision.is_open() {
                continue;
            }
            if skip_all {
                if decision.allow_skip() {
                    answers.push((decision.id(), BatchAnswer::Skipped));
                    continue;
                }
                warn!(decision = %decision, "skip all requested but this decision can not be skipped");
            }

            let context = PromptContext::in_batch(index + 1, total, skip_all_available);
            match self.solve_at(decision, &context)? {
                Resolution::Answered(answer) => {
                    answers.push((decision.id(), BatchAnswer::Answered(answer)));
                }
                Resolution::Skip => answers.push((decision.id(), BatchAnswer::Skipped)),
                Resolution::SkipAll => {
                    info!(remaining = total - index, "skipping all remaining decisions");
                    skip_all = true;
                    answers.push((decision.id(), BatchAnswer::Skipped));
                }
                Resolution::Cancel => return Err(DecisionError::Cancelled),
            }
        }
        Ok(answers)
    }

    fn present(&self, decision: &Decision, context: &PromptContext) -> Presentation {
        let mut options = Vec::new();
        if decision.allow_skip() {
            options.push(MetaCommand::Skip);
            if context.skip_all_available {
                options.push(MetaCommand::SkipAll);
            }
        }
        options.push(MetaCommand::Cancel);
        Presentation {
            question: decision.rendered_question(),
            options,
            body: decision.kind().body(),
        }
    }

    /// Kind-specific coercion. `ParseError::Unsupported` means this
    /// frontend cannot interpret the input for that kind.
    fn parse(&self, decision: &Decision, raw: &RawAnswer) -> Result<Answer, ParseError> {
        match raw {
            RawAnswer::Text(text) => decision.kind().parse_text(text),
            RawAnswer::Json(value) => decision.kind().parse_json(value),
        }
    }

    /// Release frontend-owned resources and tell a peer how the run ended.
    fn shutdown(&mut self, _success: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::DecisionSpec;
    use std::collections::VecDeque;

    /// Replays canned resolutions and records what it was shown.
    struct Canned {
        replies: VecDeque<Resolution>,
        seen: Vec<(String, PromptContext)>,
    }

    impl Canned {
        fn new(replies: impl IntoIterator<Item = Resolution>) -> Self {
            Self {
                replies: replies.into_iter().collect(),
                seen: Vec::new(),
            }
        }
    }

    impl Frontend for Canned {
        fn solve_at(
            &mut self,
            decision: &Decision,
            context: &PromptContext,
        ) -> Result<Resolution, DecisionError> {
            self.seen.push((decision.question().to_string(), *context));
            Ok(self.replies.pop_front().unwrap_or(Resolution::Cancel))
        }
    }

    fn skippable(registry: &mut DecisionRegistry, question: &str) -> DecisionId {
        registry
            .create(DecisionSpec::boolean(question).allow_skip(true))
            .unwrap()
    }

    #[test]
    fn meta_commands_match_case_insensitively() {
        let offered = [MetaCommand::Skip, MetaCommand::SkipAll, MetaCommand::Cancel];
        assert_eq!(MetaCommand::recognize("SKIP", &offered), Some(MetaCommand::Skip));
        assert_eq!(MetaCommand::recognize(" Skip All ", &offered), Some(MetaCommand::SkipAll));
        assert_eq!(MetaCommand::recognize("skip", &[MetaCommand::Cancel]), None);
        assert_eq!(MetaCommand::recognize("yes", &offered), None);
    }

    #[test]
    fn skip_all_skips_the_rest_of_the_batch() {
        let mut registry = DecisionRegistry::new();
        let ids = vec![
            skippable(&mut registry, "first"),
            skippable(&mut registry, "second"),
            skippable(&mut registry, "third"),
        ];
        let mut frontend = Canned::new([Resolution::Answered(Answer::Bool(true)), Resolution::SkipAll]);

        let answers = frontend.solve_batch(&registry, &ids).unwrap();

        assert_eq!(
            answers,
            vec![
                (ids[0], BatchAnswer::Answered(Answer::Bool(true))),
                (ids[1], BatchAnswer::Skipped),
                (ids[2], BatchAnswer::Skipped),
            ]
        );
        assert_eq!(frontend.seen.len(), 2);
        assert_eq!(frontend.seen[1].1, PromptContext::in_batch(2, 3, true));
    }

    #[test]
    fn unskippable_decision_is_still_asked_after_skip_all() {
        let mut registry = DecisionRegistry::new();
        let first = skippable(&mut registry, "first");
        let second = registry.create(DecisionSpec::boolean("second")).unwrap();
        let mut frontend = Canned::new([Resolution::SkipAll, Resolution::Answered(Answer::Bool(false))]);

        let answers = frontend.solve_batch(&registry, &[first, second]).unwrap();

        assert_eq!(answers[1], (second, BatchAnswer::Answered(Answer::Bool(false))));
        assert!(!frontend.seen[0].1.skip_all_available);
    }

    #[test]
    fn cancel_aborts_the_batch() {
        let mut registry = DecisionRegistry::new();
        let ids = vec![skippable(&mut registry, "a"), skippable(&mut registry, "b")];
        let mut frontend = Canned::new([Resolution::Cancel]);

        let err = frontend.solve_batch(&registry, &ids).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(frontend.seen.len(), 1);
    }

    #[test]
    fn present_offers_only_available_commands() {
        let mut registry = DecisionRegistry::new();
        let strict = registry.create(DecisionSpec::boolean("strict")).unwrap();
        let loose = skippable(&mut registry, "loose");
        let frontend = Canned::new([]);

        let strict = frontend.present(registry.decision(strict).unwrap(), &PromptContext::default());
        assert_eq!(strict.options, vec![MetaCommand::Cancel]);

        let loose = frontend.present(
            registry.decision(loose).unwrap(),
            &PromptContext::in_batch(1, 2, true),
        );
        assert_eq!(
            loose.options,
            vec![MetaCommand::Skip, MetaCommand::SkipAll, MetaCommand::Cancel]
        );
    }
}
