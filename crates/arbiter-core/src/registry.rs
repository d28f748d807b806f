//! DecisionRegistry - decision の追跡・解決・永続化
//!
//! すべての decision はこの registry が所有し、pipeline 側は [`DecisionId`]
//! だけを持ちます。状態変更（set / skip / reset）は必ず registry を通すので、
//! 解決後の副作用（answer store への保存、output target への書き込み）が
//! 漏れなく実行されます。
//!
//! # 使用例
//! ```ignore
//! let mut registry = DecisionRegistry::new();
//! let id = registry.create(DecisionSpec::choice("Pick one", ["a", "b", "c"]))?;
//! registry.set_value(id, Answer::Choice("b".into()))?;
//! assert_eq!(registry.decision(id)?.status(), DecisionStatus::Done);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::domain::answer::Answer;
use crate::domain::decision::{Decision, DecisionSpec};
use crate::domain::errors::DecisionError;
use crate::domain::ids::DecisionId;
use crate::domain::status::DecisionStatus;
use crate::ports::frontend::{Frontend, Resolution};
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
use crate::store::{AnswerFile, StoredAnswer};

pub struct DecisionRegistry {
    /// 生成順
    all: Vec<Decision>,
    index: HashMap<DecisionId, usize>,
    /// global_key -> 保存済み回答（answer store）
    stored: BTreeMap<String, StoredAnswer>,
    /// Some の間は frontend を通さずにここから回答する
    debug_answers: Option<VecDeque<Value>>,
    ids: Box<dyn IdGenerator>,
}

impl Default for DecisionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionRegistry {
    pub fn new() -> Self {
        Self::with_id_generator(UlidGenerator::new(SystemClock))
    }

    pub fn with_id_generator(ids: impl IdGenerator + 'static) -> Self {
        Self {
            all: Vec::new(),
            index: HashMap::new(),
            stored: BTreeMap::new(),
            debug_answers: None,
            ids: Box::new(ids),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // 構築
    // ────────────────────────────────────────────────────────────────────

    /// Construct and track a decision.
    ///
    /// A loadable decision whose global key has a stored answer is
    /// pre-resolved (`LoadedDone`); a choice with a single item resolves
    /// itself right away.
    pub fn create(&mut self, spec: DecisionSpec) -> Result<DecisionId, DecisionError> {
        spec.check()?;
        if let Some(key) = spec.global_key.as_deref().filter(|k| !k.is_empty())
            && self.global_keys().any(|existing| existing == key)
        {
            return Err(DecisionError::DuplicateGlobalKey(key.to_string()));
        }

        let id = self.ids.generate_decision_id();
        let mut decision = Decision::from_spec(id, spec);
        if decision.allow_load()
            && let Some(record) = decision.global_key().and_then(|key| self.stored.get(key))
        {
            let record = record.clone();
            decision.reset_from_deserialized(&record);
        }
        if decision.is_open()
            && let Some(only) = decision.kind().single_choice()
        {
            // rejected here, the decision is never tracked
            decision.value = Some(decision.validate(only)?);
            decision.status = DecisionStatus::Done;
        }
        let resolved = !decision.is_open();

        debug!(decision = %decision, %id, "tracking decision");
        self.index.insert(id, self.all.len());
        self.all.push(decision);

        if resolved {
            self.post(id);
        }
        Ok(id)
    }

    fn untrack(&mut self, id: DecisionId) {
        let Some(i) = self.index.remove(&id) else {
            return;
        };
        self.all.remove(i);
        for position in self.index.values_mut() {
            if *position > i {
                *position -= 1;
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // 参照
    // ────────────────────────────────────────────────────────────────────

    pub fn get(&self, id: DecisionId) -> Option<&Decision> {
        self.index.get(&id).map(|&i| &self.all[i])
    }

    pub fn decision(&self, id: DecisionId) -> Result<&Decision, DecisionError> {
        self.get(id).ok_or(DecisionError::UnknownDecision(id))
    }

    fn decision_mut(&mut self, id: DecisionId) -> Result<&mut Decision, DecisionError> {
        let i = *self
            .index
            .get(&id)
            .ok_or(DecisionError::UnknownDecision(id))?;
        Ok(&mut self.all[i])
    }

    /// Current value, `None` while open or when skipped.
    pub fn value(&self, id: DecisionId) -> Result<Option<&Answer>, DecisionError> {
        Ok(self.decision(id)?.value())
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// All tracked decisions in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Decision> {
        self.all.iter()
    }

    /// Non-empty global keys of every tracked decision.
    pub fn global_keys(&self) -> impl Iterator<Item = &str> {
        self.all.iter().filter_map(Decision::global_key)
    }

    /// Open decisions (`active`) or resolved ones.
    pub fn filtered(&self, active: bool) -> impl Iterator<Item = &Decision> {
        self.all.iter().filter(move |d| d.is_open() == active)
    }

    /// Open decisions marked `collect`: the default batch when a pipeline
    /// does not build its own.
    pub fn collection(&self) -> Vec<DecisionId> {
        self.filtered(true)
            .filter(|d| d.collect())
            .map(Decision::id)
            .collect()
    }

    pub fn summary(&self) -> String {
        match self.filtered(true).count() {
            1 => "1 open decision".to_string(),
            n => format!("{n} open decisions"),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // 状態遷移
    // ────────────────────────────────────────────────────────────────────

    /// Validate and accept a value (`Open -> Done`, then the post hook).
    pub fn set_value(&mut self, id: DecisionId, answer: Answer) -> Result<(), DecisionError> {
        let decision = self.decision_mut(id)?;
        ensure_open(decision)?;
        let accepted = decision.validate(answer)?;
        decision.value = Some(accepted);
        decision.status = DecisionStatus::Done;
        self.post(id);
        Ok(())
    }

    pub fn skip(&mut self, id: DecisionId) -> Result<(), DecisionError> {
        let decision = self.decision_mut(id)?;
        ensure_open(decision)?;
        if !decision.allow_skip() {
            return Err(DecisionError::SkipNotAllowed(decision.question().to_string()));
        }
        decision.value = None;
        decision.status = DecisionStatus::Skipped;
        self.post(id);
        Ok(())
    }

    /// Back to `Open`: clears the value, the output entry and the stored
    /// answer under the decision's global key.
    pub fn reset(&mut self, id: DecisionId) -> Result<(), DecisionError> {
        let decision = self.decision_mut(id)?;
        decision.value = None;
        decision.status = DecisionStatus::Open;
        if let (Some(target), Some(key)) = (&decision.output, &decision.output_key) {
            target.remove(key);
        }
        let key = decision.global_key().map(str::to_string);
        if let Some(key) = key {
            self.stored.remove(&key);
        }
        Ok(())
    }

    /// Forget every decision and every stored answer.
    pub fn reset_all(&mut self) {
        self.all.clear();
        self.index.clear();
        self.stored.clear();
    }

    /// Side effects after a resolution: answer store and output target.
    fn post(&mut self, id: DecisionId) {
        let Some(&i) = self.index.get(&id) else {
            return;
        };
        let decision = &mut self.all[i];
        if decision.is_open() {
            return;
        }

        if decision.status() == DecisionStatus::Done
            && decision.allow_save()
            && let Some(key) = decision.global_key().map(str::to_string)
            && let Some(record) = decision.get_serializable()
        {
            self.stored.insert(key.clone(), record);
            decision.status = DecisionStatus::SavedDone;
            info!(global_key = %key, value = ?decision.value(), "decision saved");
        }

        if decision.collect()
            && let (Some(target), Some(key)) = (&decision.output, &decision.output_key)
        {
            target.insert(key, decision.value.clone());
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // 対話的な解決
    // ────────────────────────────────────────────────────────────────────

    /// Resolve one decision interactively.
    ///
    /// A loaded decision returns its value without asking. With debug
    /// answers enabled the next one is consumed instead of the frontend
    /// (`null` = skip).
    pub fn decide(
        &mut self,
        id: DecisionId,
        frontend: &mut dyn Frontend,
    ) -> Result<Option<Answer>, DecisionError> {
        let decision = self.decision(id)?;
        match decision.status() {
            DecisionStatus::LoadedDone => return Ok(decision.value().cloned()),
            DecisionStatus::Open => {}
            _ => ensure_open(decision)?,
        }
        let question = decision.question().to_string();

        if let Some(queue) = self.debug_answers.as_mut() {
            let raw = queue
                .pop_front()
                .ok_or(DecisionError::NotEnoughAnswers { question })?;
            self.apply_raw(id, &raw)?;
        } else {
            let decision = self.decision(id)?;
            match frontend.solve(decision)? {
                Resolution::Answered(answer) => self.set_value(id, answer)?,
                Resolution::Skip | Resolution::SkipAll => self.skip(id)?,
                Resolution::Cancel => return Err(DecisionError::Cancelled),
            }
        }
        Ok(self.decision(id)?.value().cloned())
    }

    /// Apply a JSON answer as a script would give it (`null` = skip).
    pub fn apply_raw(&mut self, id: DecisionId, raw: &Value) -> Result<(), DecisionError> {
        match self.decision(id)?.read_json_answer(raw)? {
            Some(answer) => self.set_value(id, answer),
            None => self.skip(id),
        }
    }

    /// Answer every following `decide` from `answers`, bypassing frontends.
    pub fn enable_debug(&mut self, answers: impl IntoIterator<Item = Value>) {
        self.debug_answers = Some(answers.into_iter().collect());
    }

    pub fn disable_debug(&mut self) {
        self.debug_answers = None;
    }

    /// Remaining debug answers, `None` when debug mode is off.
    pub fn debug_remaining(&self) -> Option<usize> {
        self.debug_answers.as_ref().map(VecDeque::len)
    }

    // ────────────────────────────────────────────────────────────────────
    // 永続化
    // ────────────────────────────────────────────────────────────────────

    pub fn stored(&self) -> &BTreeMap<String, StoredAnswer> {
        &self.stored
    }

    /// Offer the answers recorded in `path` for reuse.
    ///
    /// Unreadable or unconvertible files are logged and yield nothing.
    /// Otherwise the user is asked whether to reuse the answers; only a
    /// confirmation imports them. Returns the number of imported answers.
    pub fn load(&mut self, path: &Path, frontend: &mut dyn Frontend) -> Result<usize, DecisionError> {
        let file = match AnswerFile::read(path) {
            Ok(file) => file,
            Err(e) => {
                error!(path = %path.display(), error = %e, "could not load previous decisions");
                return Ok(0);
            }
        };
        if file.is_empty() {
            return Ok(0);
        }

        let count = file.len();
        let confirm = self.create(DecisionSpec::boolean(format!(
            "Found {count} previous decisions, reuse them?"
        )))?;
        let reuse = match self.decide(confirm, frontend) {
            Ok(reuse) => reuse,
            Err(e) => {
                self.untrack(confirm);
                return Err(e);
            }
        };
        if reuse != Some(Answer::Bool(true)) {
            info!(count, "previous decisions not reused");
            return Ok(0);
        }

        self.stored.extend(file.decisions);
        info!(count, path = %path.display(), "loaded previous decisions");
        Ok(count)
    }

    /// Write the answer store to `path`, replacing the file.
    pub fn save(&self, path: &Path) -> Result<(), DecisionError> {
        AnswerFile::new(self.stored.clone()).write(path)?;
        info!(count = self.stored.len(), path = %path.display(), "saved decisions");
        Ok(())
    }
}

fn ensure_open(decision: &Decision) -> Result<(), DecisionError> {
    if decision.is_open() {
        Ok(())
    } else {
        Err(DecisionError::NotOpen {
            question: decision.question().to_string(),
            status: decision.status(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::OutputTarget;
    use crate::domain::units::{Quantity, Unit};
    use crate::frontend::NoopFrontend;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn choice_answer_is_accepted() {
        let mut registry = DecisionRegistry::new();
        let id = registry
            .create(DecisionSpec::choice("Pick", ["a", "b", "c"]))
            .unwrap();

        registry.set_value(id, Answer::Choice("b".into())).unwrap();

        let d = registry.decision(id).unwrap();
        assert_eq!(d.status(), DecisionStatus::Done);
        assert_eq!(d.value(), Some(&Answer::Choice("b".into())));
    }

    #[test]
    fn single_choice_resolves_itself() {
        let mut registry = DecisionRegistry::new();
        let id = registry.create(DecisionSpec::choice("Pick", ["only"])).unwrap();

        let d = registry.decision(id).unwrap();
        assert!(!d.is_open());
        assert_eq!(d.value(), Some(&Answer::Choice("only".into())));
    }

    #[test]
    fn rejected_single_choice_is_not_tracked() {
        let mut registry = DecisionRegistry::new();
        let target = OutputTarget::new();
        let err = registry
            .create(
                DecisionSpec::choice("Pick", ["only"])
                    .global_key("k")
                    .validator(|_| false)
                    .output(&target, "pick")
                    .collect(true),
            )
            .unwrap_err();
        assert!(matches!(err, DecisionError::Invalid { .. }));

        assert!(registry.is_empty());
        assert_eq!(registry.summary(), "0 open decisions");
        assert!(registry.collection().is_empty());
        assert!(target.is_empty());
        registry
            .create(DecisionSpec::boolean("again").global_key("k"))
            .unwrap();
    }

    #[test]
    fn duplicate_global_key_fails_at_construction() {
        let mut registry = DecisionRegistry::new();
        registry.create(DecisionSpec::boolean("a").global_key("k")).unwrap();

        let err = registry
            .create(DecisionSpec::boolean("b").global_key("k"))
            .unwrap_err();
        assert!(matches!(err, DecisionError::DuplicateGlobalKey(ref key) if key == "k"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn value_is_immutable_until_reset() {
        let mut registry = DecisionRegistry::new();
        let id = registry.create(DecisionSpec::boolean("q")).unwrap();
        registry.set_value(id, Answer::Bool(true)).unwrap();

        let err = registry.set_value(id, Answer::Bool(false)).unwrap_err();
        assert!(matches!(err, DecisionError::NotOpen { .. }));

        registry.reset(id).unwrap();
        registry.set_value(id, Answer::Bool(true)).unwrap();
        assert_eq!(registry.value(id).unwrap(), Some(&Answer::Bool(true)));
        assert_eq!(registry.decision(id).unwrap().status(), DecisionStatus::Done);
    }

    #[test]
    fn invalid_value_leaves_decision_open() {
        let mut registry = DecisionRegistry::new();
        let id = registry
            .create(DecisionSpec::choice("Pick", ["a", "b"]))
            .unwrap();

        let err = registry.set_value(id, Answer::Choice("z".into())).unwrap_err();
        assert!(matches!(err, DecisionError::Invalid { .. }));
        assert!(registry.decision(id).unwrap().is_open());
    }

    #[test]
    fn skip_requires_permission() {
        let mut registry = DecisionRegistry::new();
        let strict = registry.create(DecisionSpec::boolean("strict")).unwrap();
        let loose = registry
            .create(DecisionSpec::boolean("loose").allow_skip(true))
            .unwrap();

        assert!(matches!(
            registry.skip(strict).unwrap_err(),
            DecisionError::SkipNotAllowed(_)
        ));
        registry.skip(loose).unwrap();
        let d = registry.decision(loose).unwrap();
        assert_eq!(d.status(), DecisionStatus::Skipped);
        assert_eq!(d.value(), None);
    }

    #[test]
    fn collected_values_land_in_output_target() {
        let mut registry = DecisionRegistry::new();
        let target = OutputTarget::new();
        let answered = registry
            .create(DecisionSpec::boolean("a").output(&target, "a").collect(true))
            .unwrap();
        let skipped = registry
            .create(
                DecisionSpec::boolean("b")
                    .output(&target, "b")
                    .collect(true)
                    .allow_skip(true),
            )
            .unwrap();

        assert_eq!(registry.collection(), vec![answered, skipped]);

        registry.set_value(answered, Answer::Bool(true)).unwrap();
        registry.skip(skipped).unwrap();

        assert_eq!(target.get("a"), Some(Some(Answer::Bool(true))));
        assert_eq!(target.get("b"), Some(None));
        assert!(registry.collection().is_empty());

        registry.reset(answered).unwrap();
        assert!(!target.contains_key("a"));
    }

    #[test]
    fn saving_moves_to_saved_done() {
        let mut registry = DecisionRegistry::new();
        let id = registry
            .create(
                DecisionSpec::numeric("Year", Unit::dimensionless())
                    .global_key("year")
                    .allow_save(true),
            )
            .unwrap();
        registry
            .set_value(id, Answer::Quantity(Quantity::new(2015.0, Unit::dimensionless())))
            .unwrap();

        assert_eq!(registry.decision(id).unwrap().status(), DecisionStatus::SavedDone);
        assert!(registry.stored().contains_key("year"));

        registry.reset(id).unwrap();
        assert!(!registry.stored().contains_key("year"));
    }

    #[test]
    fn filtered_and_summary_count_open_decisions() {
        let mut registry = DecisionRegistry::new();
        let a = registry.create(DecisionSpec::boolean("a")).unwrap();
        registry.create(DecisionSpec::boolean("b")).unwrap();
        registry.create(DecisionSpec::boolean("c")).unwrap();
        registry.set_value(a, Answer::Bool(true)).unwrap();

        assert_eq!(registry.filtered(true).count(), 2);
        assert_eq!(registry.filtered(false).count(), 1);
        assert_eq!(registry.summary(), "2 open decisions");

        registry.reset_all();
        assert!(registry.is_empty());
        assert_eq!(registry.summary(), "0 open decisions");
    }

    #[test]
    fn debug_answers_bypass_the_frontend() {
        let mut registry = DecisionRegistry::new();
        registry.enable_debug([json!(293.15), json!(null)]);
        let temperature = registry
            .create(DecisionSpec::numeric("Temperature", Unit::kelvin()))
            .unwrap();
        let optional = registry
            .create(DecisionSpec::boolean("Optional?").allow_skip(true))
            .unwrap();

        let value = registry.decide(temperature, &mut NoopFrontend).unwrap();
        assert_eq!(value, Some(Answer::Quantity(Quantity::new(293.15, Unit::kelvin()))));
        assert_eq!(
            registry.decision(temperature).unwrap().serialize_value(),
            Some(json!({"value": 293.15, "unit": "kelvin"}))
        );

        assert_eq!(registry.decide(optional, &mut NoopFrontend).unwrap(), None);
        assert_eq!(registry.decision(optional).unwrap().status(), DecisionStatus::Skipped);
        assert_eq!(registry.debug_remaining(), Some(0));
    }

    #[test]
    fn decide_on_resolved_decision_is_a_usage_error() {
        let mut registry = DecisionRegistry::new();
        let id = registry.create(DecisionSpec::boolean("q")).unwrap();
        registry.set_value(id, Answer::Bool(true)).unwrap();

        let err = registry.decide(id, &mut NoopFrontend).unwrap_err();
        assert!(matches!(err, DecisionError::NotOpen { .. }));
    }

    #[test]
    fn save_then_load_preresolves_matching_decision() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decisions.json");

        let mut first = DecisionRegistry::new();
        let year = first
            .create(
                DecisionSpec::numeric("Year", Unit::dimensionless())
                    .global_key("year")
                    .allow_save(true),
            )
            .unwrap();
        first.apply_raw(year, &json!(2015)).unwrap();
        first.save(&path).unwrap();

        let mut second = DecisionRegistry::new();
        second.enable_debug([json!(true)]);
        assert_eq!(second.load(&path, &mut NoopFrontend).unwrap(), 1);
        second.disable_debug();

        let again = second
            .create(
                DecisionSpec::numeric("Year", Unit::dimensionless())
                    .global_key("year")
                    .allow_load(true),
            )
            .unwrap();
        let d = second.decision(again).unwrap();
        assert_eq!(d.status(), DecisionStatus::LoadedDone);
        assert_eq!(
            d.value(),
            Some(&Answer::Quantity(Quantity::new(2015.0, Unit::dimensionless())))
        );
        assert_eq!(
            second.decide(again, &mut NoopFrontend).unwrap(),
            Some(Answer::Quantity(Quantity::new(2015.0, Unit::dimensionless())))
        );
    }

    #[test]
    fn declined_reuse_imports_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decisions.json");
        std::fs::write(&path, r#"{"year": 2015}"#).unwrap();

        let mut registry = DecisionRegistry::new();
        registry.enable_debug([json!(false)]);
        assert_eq!(registry.load(&path, &mut NoopFrontend).unwrap(), 0);
        assert!(registry.stored().is_empty());
    }

    #[test]
    fn cancelled_reuse_prompt_leaves_no_open_decision() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decisions.json");
        std::fs::write(&path, r#"{"year": 2015}"#).unwrap();

        let mut registry = DecisionRegistry::new();
        let keep = registry.create(DecisionSpec::boolean("kept")).unwrap();
        let err = registry.load(&path, &mut NoopFrontend).unwrap_err();
        assert!(err.is_cancelled());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.summary(), "1 open decision");
        assert!(registry.stored().is_empty());
        registry.set_value(keep, Answer::Bool(true)).unwrap();
    }

    #[test]
    fn unreadable_file_fails_closed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decisions.json");
        std::fs::write(&path, r#"{"version": "7", "decisions": {}}"#).unwrap();

        let mut registry = DecisionRegistry::new();
        assert_eq!(registry.load(&path, &mut NoopFrontend).unwrap(), 0);
        assert_eq!(
            registry.load(&dir.path().join("missing.json"), &mut NoopFrontend).unwrap(),
            0
        );
        assert!(registry.stored().is_empty());
        assert!(registry.is_empty());
    }
}
