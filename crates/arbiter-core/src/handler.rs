//! DecisionHandler - pipeline を batch 単位で駆動する
//!
//! pipeline は状態機械として表現します。`resume` を呼ぶたびに、回答待ちの
//! batch（[`Step::Pending`]）か最終結果（[`Step::Done`]）を返します。
//! handler は batch の回答を [`AnswerSource`] から取得して registry に適用し、
//! 再び `resume` します。
//!
//! # 回答元
//! - [`FrontendSource`]: Frontend（console / remote / noop）に聞く
//! - [`ScriptedAnswers`]: 事前に与えた回答リストを順に消費する（テスト・バッチ用）
//! - [`SavedAnswers`]: global key で記録済みの回答を適用する（fail-closed）

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::answer::Answer;
use crate::domain::decision::Decision;
use crate::domain::errors::DecisionError;
use crate::domain::ids::DecisionId;
use crate::ports::frontend::{BatchAnswer, Frontend};
use crate::ports::AnswerSource;
use crate::registry::DecisionRegistry;
use crate::store::{AnswerFile, StoreError};

/// One suspension point of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T> {
    /// Resume once these decisions are resolved.
    Pending(Vec<DecisionId>),
    Done(T),
}

/// A resumable pipeline.
///
/// Between two `resume` calls the only thing that changes is the state of
/// the decisions it handed out.
pub trait Pipeline {
    type Output;

    fn resume(&mut self, registry: &mut DecisionRegistry)
    -> Result<Step<Self::Output>, DecisionError>;
}

impl<T, F> Pipeline for F
where
    F: FnMut(&mut DecisionRegistry) -> Result<Step<T>, DecisionError>,
{
    type Output = T;

    fn resume(&mut self, registry: &mut DecisionRegistry) -> Result<Step<T>, DecisionError> {
        self(registry)
    }
}

pub struct DecisionHandler<S> {
    source: S,
}

impl<S: AnswerSource> DecisionHandler<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Run `pipeline` to completion and return its result.
    ///
    /// Errors from the answer source (cancel included) abort the run
    /// without resuming the pipeline.
    pub fn drive<P: Pipeline>(
        &mut self,
        registry: &mut DecisionRegistry,
        pipeline: &mut P,
    ) -> Result<P::Output, DecisionError> {
        let mut batches = 0usize;
        loop {
            let batch = match pipeline.resume(registry)? {
                Step::Done(output) => {
                    self.source.finish();
                    debug!(batches, "pipeline finished");
                    return Ok(output);
                }
                Step::Pending(batch) => batch,
            };

            let open: Vec<DecisionId> = batch
                .into_iter()
                .filter(|id| registry.get(*id).is_some_and(Decision::is_open))
                .collect();
            if open.is_empty() {
                continue;
            }
            batches += 1;
            debug!(batch = batches, size = open.len(), "answering batch");

            for (id, answer) in self.source.answers(registry, &open)? {
                match answer {
                    BatchAnswer::Answered(value) => registry.set_value(id, value)?,
                    BatchAnswer::Skipped => registry.skip(id)?,
                }
            }
        }
    }
}

/// Ask a [`Frontend`].
pub struct FrontendSource<F> {
    frontend: F,
}

impl<F: Frontend> FrontendSource<F> {
    pub fn new(frontend: F) -> Self {
        Self { frontend }
    }

    pub fn frontend_mut(&mut self) -> &mut F {
        &mut self.frontend
    }

    pub fn into_inner(self) -> F {
        self.frontend
    }
}

impl<F: Frontend> AnswerSource for FrontendSource<F> {
    fn answers(
        &mut self,
        registry: &DecisionRegistry,
        batch: &[DecisionId],
    ) -> Result<Vec<(DecisionId, BatchAnswer)>, DecisionError> {
        self.frontend.solve_batch(registry, batch)
    }
}

/// Pre-supplied answers, consumed one per decision in order.
///
/// `null` skips a skippable decision.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAnswers {
    answers: VecDeque<Value>,
}

impl ScriptedAnswers {
    pub fn new(answers: impl IntoIterator<Item = Value>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
        }
    }

    /// Answers not consumed (yet).
    pub fn unused(&self) -> usize {
        self.answers.len()
    }
}

impl AnswerSource for ScriptedAnswers {
    fn answers(
        &mut self,
        registry: &DecisionRegistry,
        batch: &[DecisionId],
    ) -> Result<Vec<(DecisionId, BatchAnswer)>, DecisionError> {
        if let Some(&first_missing) = batch.get(self.answers.len()) {
            return Err(DecisionError::NotEnoughAnswers {
                question: registry.decision(first_missing)?.question().to_string(),
            });
        }

        let mut resolved = Vec::with_capacity(batch.len());
        for &id in batch {
            let decision = registry.decision(id)?;
            let raw = self
                .answers
                .pop_front()
                .ok_or_else(|| DecisionError::NotEnoughAnswers {
                    question: decision.question().to_string(),
                })?;
            resolved.push((id, to_batch_answer(decision.read_json_answer(&raw)?)));
        }
        Ok(resolved)
    }

    fn finish(&mut self) {
        if !self.answers.is_empty() {
            warn!(
                unused = self.answers.len(),
                answers = ?self.answers,
                "scripted answers were not used"
            );
        }
    }
}

/// Replay of recorded answers, keyed by global key or representative key.
///
/// A decision without a recorded answer is an error; nothing falls
/// through to interactive prompting.
#[derive(Debug, Clone, Default)]
pub struct SavedAnswers {
    answers: BTreeMap<String, Value>,
}

impl SavedAnswers {
    pub fn new(answers: BTreeMap<String, Value>) -> Self {
        Self { answers }
    }

    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let file = AnswerFile::read(path)?;
        info!(count = file.len(), path = %path.display(), "replaying saved decisions");
        Ok(Self::new(
            file.decisions
                .into_iter()
                .map(|(key, record)| (key, record.value))
                .collect(),
        ))
    }

    fn lookup(&self, decision: &Decision) -> Option<&Value> {
        decision
            .global_key()
            .into_iter()
            .chain(decision.representative_keys().iter().map(String::as_str))
            .find_map(|key| self.answers.get(key))
    }
}

impl AnswerSource for SavedAnswers {
    fn answers(
        &mut self,
        registry: &DecisionRegistry,
        batch: &[DecisionId],
    ) -> Result<Vec<(DecisionId, BatchAnswer)>, DecisionError> {
        batch
            .iter()
            .map(|&id| {
                let decision = registry.decision(id)?;
                let raw = self
                    .lookup(decision)
                    .ok_or_else(|| DecisionError::MissingSavedAnswer {
                        question: decision.question().to_string(),
                    })?;
                Ok((id, to_batch_answer(decision.read_json_answer(raw)?)))
            })
            .collect()
    }
}

fn to_batch_answer(answer: Option<Answer>) -> BatchAnswer {
    match answer {
        Some(answer) => BatchAnswer::Answered(answer),
        None => BatchAnswer::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::DecisionSpec;
    use crate::domain::status::DecisionStatus;
    use crate::frontend::NoopFrontend;
    use serde_json::json;

    /// Two stages: a flag, then (only if set) a class choice.
    #[derive(Default)]
    struct TwoStage {
        flag: Option<DecisionId>,
        class: Option<DecisionId>,
    }

    impl Pipeline for TwoStage {
        type Output = (bool, Option<String>);

        fn resume(
            &mut self,
            registry: &mut DecisionRegistry,
        ) -> Result<Step<Self::Output>, DecisionError> {
            let Some(flag) = self.flag else {
                let id = registry.create(DecisionSpec::boolean("Use distributor?"))?;
                self.flag = Some(id);
                return Ok(Step::Pending(vec![id]));
            };
            let use_it = registry.value(flag)?.and_then(Answer::as_bool).unwrap_or(false);
            if !use_it {
                return Ok(Step::Done((false, None)));
            }
            let Some(class) = self.class else {
                let id = registry.create(DecisionSpec::choice(
                    "Which class?",
                    ["IfcPipe", "HVAC-Distributor"],
                ))?;
                self.class = Some(id);
                return Ok(Step::Pending(vec![id]));
            };
            let chosen = registry.value(class)?.and_then(Answer::as_str).map(str::to_string);
            Ok(Step::Done((true, chosen)))
        }
    }

    #[test]
    fn scripted_answers_drive_every_batch() {
        let mut registry = DecisionRegistry::new();
        let mut handler =
            DecisionHandler::new(ScriptedAnswers::new([json!(true), json!("HVAC-Distributor")]));

        let output = handler.drive(&mut registry, &mut TwoStage::default()).unwrap();

        assert_eq!(output, (true, Some("HVAC-Distributor".to_string())));
        assert_eq!(handler.source().unused(), 0);
    }

    #[test]
    fn too_few_answers_fail_before_the_decision_is_resolved() {
        let mut registry = DecisionRegistry::new();
        let mut handler = DecisionHandler::new(ScriptedAnswers::new([json!(true)]));

        let err = handler
            .drive(&mut registry, &mut TwoStage::default())
            .unwrap_err();

        assert!(
            matches!(err, DecisionError::NotEnoughAnswers { ref question } if question == "Which class?")
        );
        assert_eq!(registry.filtered(true).count(), 1);
    }

    #[test]
    fn batch_needing_more_answers_than_left_fails_upfront() {
        let mut registry = DecisionRegistry::new();
        let a = registry.create(DecisionSpec::boolean("a")).unwrap();
        let b = registry.create(DecisionSpec::boolean("b")).unwrap();
        let mut scripted = ScriptedAnswers::new([json!(true)]);

        let err = scripted.answers(&registry, &[a, b]).unwrap_err();
        assert!(matches!(err, DecisionError::NotEnoughAnswers { ref question } if question == "b"));
        assert_eq!(scripted.unused(), 1);
    }

    #[test]
    fn closures_are_pipelines() {
        let mut registry = DecisionRegistry::new();
        let mut asked = None;
        let mut pipeline = |registry: &mut DecisionRegistry| -> Result<Step<bool>, DecisionError> {
            match asked {
                None => {
                    let id = registry.create(DecisionSpec::boolean("Optional?").allow_skip(true))?;
                    asked = Some(id);
                    Ok(Step::Pending(vec![id]))
                }
                Some(id) => Ok(Step::Done(registry.decision(id)?.status() == DecisionStatus::Skipped)),
            }
        };

        let mut handler = DecisionHandler::new(ScriptedAnswers::new([json!(null), json!(1)]));
        assert!(handler.drive(&mut registry, &mut pipeline).unwrap());
        assert_eq!(handler.source().unused(), 1);
    }

    #[test]
    fn cancel_stops_the_pipeline() {
        let mut registry = DecisionRegistry::new();
        let mut handler = DecisionHandler::new(FrontendSource::new(NoopFrontend));

        let err = handler
            .drive(&mut registry, &mut TwoStage::default())
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn saved_answers_use_representative_keys() {
        let mut registry = DecisionRegistry::new();
        let flag = registry
            .create(DecisionSpec::boolean("Merge?").global_key("merge.v2").representative_key("merge"))
            .unwrap();
        let mut saved = SavedAnswers::new(BTreeMap::from([("merge".to_string(), json!(true))]));

        let answers = saved.answers(&registry, &[flag]).unwrap();
        assert_eq!(answers, vec![(flag, BatchAnswer::Answered(Answer::Bool(true)))]);
    }

    #[test]
    fn saved_answers_fail_closed() {
        let mut registry = DecisionRegistry::new();
        let mut handler = DecisionHandler::new(SavedAnswers::default());

        let err = handler
            .drive(&mut registry, &mut TwoStage::default())
            .unwrap_err();
        assert!(matches!(err, DecisionError::MissingSavedAnswer { .. }));
    }

    #[test]
    fn auto_resolved_choice_needs_no_answers() {
        let mut registry = DecisionRegistry::new();
        let mut pipeline = |registry: &mut DecisionRegistry| -> Result<Step<usize>, DecisionError> {
            let id = registry.create(DecisionSpec::choice("Only?", ["only"]))?;
            if registry.decision(id)?.is_open() {
                return Ok(Step::Pending(vec![id]));
            }
            Ok(Step::Done(registry.len()))
        };
        let mut handler = DecisionHandler::new(ScriptedAnswers::default());
        assert_eq!(handler.drive(&mut registry, &mut pipeline).unwrap(), 1);
    }
}
