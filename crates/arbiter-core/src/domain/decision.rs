//! Decision entity: one pending or resolved question.
//!
//! A `Decision` is created through [`DecisionSpec`] by the registry, which
//! enforces the construction rules (global key uniqueness, collect target).
//! State changes go through the registry as well so that the post-resolution
//! side effects (answer store, output target) always run.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::answer::Answer;
use super::errors::DecisionError;
use super::ids::DecisionId;
use super::kind::{ChoiceItem, DecisionKind};
use super::status::DecisionStatus;
use super::units::Unit;
use crate::store::StoredAnswer;

/// External predicate composed with the kind's own validation.
///
/// A panicking validator counts as "invalid".
pub type Validator = Arc<dyn Fn(&Answer) -> bool + Send + Sync>;

/// Shared mapping a collected decision writes its value into.
///
/// Skipped decisions write `None`.
#[derive(Clone, Default)]
pub struct OutputTarget(Rc<RefCell<BTreeMap<String, Option<Answer>>>>);

impl OutputTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Option<Answer>> {
        self.0.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Option<Answer>> {
        self.0.borrow().clone()
    }

    pub(crate) fn insert(&self, key: &str, value: Option<Answer>) {
        self.0.borrow_mut().insert(key.to_string(), value);
    }

    pub(crate) fn remove(&self, key: &str) {
        self.0.borrow_mut().remove(key);
    }
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.borrow().iter()).finish()
    }
}

/// Construction parameters for a decision.
///
/// # 使用例
/// ```ignore
/// let spec = DecisionSpec::boolean("Merge the distributors?")
///     .global_key("hvac.merge")
///     .allow_skip(true);
/// let id = registry.create(spec)?;
/// ```
#[derive(Clone)]
pub struct DecisionSpec {
    pub(crate) question: String,
    pub(crate) kind: DecisionKind,
    pub(crate) validator: Option<Validator>,
    pub(crate) output: Option<OutputTarget>,
    pub(crate) output_key: Option<String>,
    pub(crate) global_key: Option<String>,
    pub(crate) representative_keys: Vec<String>,
    pub(crate) allow_skip: bool,
    pub(crate) allow_save: bool,
    pub(crate) allow_load: Option<bool>,
    pub(crate) collect: bool,
    pub(crate) validate_checksum: Option<String>,
    pub(crate) related: Vec<String>,
    pub(crate) context: Vec<String>,
}

impl DecisionSpec {
    pub fn new(question: impl Into<String>, kind: DecisionKind) -> Self {
        Self {
            question: question.into(),
            kind,
            validator: None,
            output: None,
            output_key: None,
            global_key: None,
            representative_keys: Vec::new(),
            allow_skip: false,
            allow_save: false,
            allow_load: None,
            collect: false,
            validate_checksum: None,
            related: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn boolean(question: impl Into<String>) -> Self {
        Self::new(question, DecisionKind::Bool)
    }

    pub fn numeric(question: impl Into<String>, unit: Unit) -> Self {
        Self::new(question, DecisionKind::Numeric { unit })
    }

    pub fn choice<I, S>(question: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(question, DecisionKind::choice(items))
    }

    pub fn labeled_choice(question: impl Into<String>, items: Vec<ChoiceItem>) -> Self {
        Self::new(question, DecisionKind::Choice { items })
    }

    pub fn text(question: impl Into<String>) -> Self {
        Self::new(question, DecisionKind::Text { min_length: 1 })
    }

    pub fn identifiers(question: impl Into<String>) -> Self {
        Self::new(question, DecisionKind::Identifiers)
    }

    pub fn min_length(mut self, min_length: usize) -> Self {
        if let DecisionKind::Text { min_length: current } = &mut self.kind {
            *current = min_length;
        }
        self
    }

    pub fn validator(mut self, validator: impl Fn(&Answer) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn output(mut self, target: &OutputTarget, key: impl Into<String>) -> Self {
        self.output = Some(target.clone());
        self.output_key = Some(key.into());
        self
    }

    pub fn collect(mut self, collect: bool) -> Self {
        self.collect = collect;
        self
    }

    pub fn global_key(mut self, key: impl Into<String>) -> Self {
        self.global_key = Some(key.into());
        self
    }

    /// Alternate key a saved answer may be recorded under.
    pub fn representative_key(mut self, key: impl Into<String>) -> Self {
        self.representative_keys.push(key.into());
        self
    }

    pub fn allow_skip(mut self, allow: bool) -> Self {
        self.allow_skip = allow;
        self
    }

    /// Enables saving, and loading unless `allow_load` overrides it.
    pub fn allow_save(mut self, allow: bool) -> Self {
        self.allow_save = allow;
        self
    }

    pub fn allow_load(mut self, allow: bool) -> Self {
        self.allow_load = Some(allow);
        self
    }

    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.validate_checksum = Some(checksum.into());
        self
    }

    pub fn related<I, S>(mut self, related: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.related.extend(related.into_iter().map(Into::into));
        self
    }

    pub fn context<I, S>(mut self, context: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.extend(context.into_iter().map(Into::into));
        self
    }

    /// Check the construction rules that do not need the registry.
    pub(crate) fn check(&self) -> Result<(), DecisionError> {
        let wants_persistence = self.allow_save || self.allow_load.unwrap_or(false);
        let has_key = self.global_key.as_deref().is_some_and(|k| !k.is_empty());
        if wants_persistence && !has_key {
            return Err(DecisionError::MissingGlobalKey(self.question.clone()));
        }
        if self.collect {
            let has_output_key = self.output_key.as_deref().is_some_and(|k| !k.is_empty());
            if self.output.is_none() || !has_output_key {
                return Err(DecisionError::InvalidCollectTarget(self.question.clone()));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DecisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionSpec")
            .field("question", &self.question)
            .field("kind", &self.kind)
            .field("global_key", &self.global_key)
            .finish_non_exhaustive()
    }
}

/// One question in the pipeline's interaction protocol.
pub struct Decision {
    id: DecisionId,
    question: String,
    kind: DecisionKind,
    pub(crate) status: DecisionStatus,
    pub(crate) value: Option<Answer>,
    validator: Option<Validator>,
    pub(crate) output: Option<OutputTarget>,
    pub(crate) output_key: Option<String>,
    global_key: Option<String>,
    representative_keys: Vec<String>,
    allow_skip: bool,
    allow_load: bool,
    allow_save: bool,
    collect: bool,
    validate_checksum: Option<String>,
    related: Vec<String>,
    context: Vec<String>,
}

impl Decision {
    pub(crate) fn from_spec(id: DecisionId, spec: DecisionSpec) -> Self {
        Self {
            id,
            question: spec.question,
            kind: spec.kind,
            status: DecisionStatus::Open,
            value: None,
            validator: spec.validator,
            output: spec.output,
            output_key: spec.output_key,
            global_key: spec.global_key.filter(|k| !k.is_empty()),
            representative_keys: spec.representative_keys,
            allow_skip: spec.allow_skip,
            allow_load: spec.allow_load.unwrap_or(spec.allow_save),
            allow_save: spec.allow_save,
            collect: spec.collect,
            validate_checksum: spec.validate_checksum,
            related: spec.related,
            context: spec.context,
        }
    }

    pub fn id(&self) -> DecisionId {
        self.id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    /// Question text as shown to a user (numeric kinds append the unit).
    pub fn rendered_question(&self) -> String {
        self.kind.render_question(&self.question)
    }

    pub fn kind(&self) -> &DecisionKind {
        &self.kind
    }

    pub fn status(&self) -> DecisionStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn value(&self) -> Option<&Answer> {
        self.value.as_ref()
    }

    pub fn global_key(&self) -> Option<&str> {
        self.global_key.as_deref()
    }

    pub fn representative_keys(&self) -> &[String] {
        &self.representative_keys
    }

    pub fn allow_skip(&self) -> bool {
        self.allow_skip
    }

    pub fn allow_load(&self) -> bool {
        self.allow_load
    }

    pub fn allow_save(&self) -> bool {
        self.allow_save
    }

    pub fn collect(&self) -> bool {
        self.collect
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    pub fn validate_checksum(&self) -> Option<&str> {
        self.validate_checksum.as_deref()
    }

    pub fn related(&self) -> &[String] {
        &self.related
    }

    pub fn context(&self) -> &[String] {
        &self.context
    }

    /// Full validation: kind rules first, then the external validator.
    ///
    /// Returns the canonical answer that would be stored.
    pub fn validate(&self, answer: Answer) -> Result<Answer, DecisionError> {
        validate_with(&self.question, &self.kind, self.validator.as_ref(), answer)
    }

    /// Copy of the validation rules that can cross threads.
    pub fn answer_check(&self) -> AnswerCheck {
        AnswerCheck {
            question: self.question.clone(),
            kind: self.kind.clone(),
            validator: self.validator.clone(),
            allow_skip: self.allow_skip,
        }
    }

    /// Read a scripted or saved JSON answer; `Ok(None)` means skip.
    ///
    /// The returned answer has passed full validation.
    pub fn read_json_answer(&self, raw: &Value) -> Result<Option<Answer>, DecisionError> {
        let invalid = |reason: String| DecisionError::Invalid {
            question: self.question.clone(),
            reason,
        };
        if raw.is_null() {
            return if self.allow_skip {
                Ok(None)
            } else {
                Err(invalid("null answer but the decision can not be skipped".to_string()))
            };
        }
        let answer = self.kind.parse_json(raw).map_err(|e| invalid(e.to_string()))?;
        self.validate(answer).map(Some)
    }

    /// Value projection used by the answer store.
    pub fn serialize_value(&self) -> Option<Value> {
        self.value.as_ref().map(|v| self.kind.serialize_answer(v))
    }

    /// Answer-store record, with the checksum when one is configured.
    pub fn get_serializable(&self) -> Option<StoredAnswer> {
        self.serialize_value().map(|value| StoredAnswer {
            value,
            checksum: self.validate_checksum.clone(),
        })
    }

    /// Try to pre-resolve from a stored record.
    ///
    /// On success the decision becomes `LoadedDone`; otherwise a warning is
    /// logged and the decision stays `Open`.
    pub(crate) fn reset_from_deserialized(&mut self, record: &StoredAnswer) -> bool {
        if let Some(expected) = &self.validate_checksum
            && record.checksum.as_ref() != Some(expected)
        {
            warn!(
                global_key = ?self.global_key,
                "stored answer has a different checksum, asking again"
            );
            return false;
        }

        let restored = self
            .kind
            .deserialize_answer(&record.value)
            .map_err(|e| e.to_string())
            .and_then(|answer| self.validate(answer).map_err(|e| e.to_string()));

        match restored {
            Ok(answer) => {
                self.value = Some(answer);
                self.status = DecisionStatus::LoadedDone;
                true
            }
            Err(reason) => {
                warn!(
                    global_key = ?self.global_key,
                    %reason,
                    "stored answer failed validation, asking again"
                );
                false
            }
        }
    }
}

/// Validation rules of one decision, detached from the registry.
#[derive(Clone)]
pub struct AnswerCheck {
    question: String,
    kind: DecisionKind,
    validator: Option<Validator>,
    allow_skip: bool,
}

impl AnswerCheck {
    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn kind(&self) -> &DecisionKind {
        &self.kind
    }

    pub fn allow_skip(&self) -> bool {
        self.allow_skip
    }

    pub fn validate(&self, answer: Answer) -> Result<Answer, DecisionError> {
        validate_with(&self.question, &self.kind, self.validator.as_ref(), answer)
    }
}

impl fmt::Debug for AnswerCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnswerCheck")
            .field("question", &self.question)
            .field("kind", &self.kind)
            .field("allow_skip", &self.allow_skip)
            .finish_non_exhaustive()
    }
}

fn validate_with(
    question: &str,
    kind: &DecisionKind,
    validator: Option<&Validator>,
    answer: Answer,
) -> Result<Answer, DecisionError> {
    let invalid = |reason: String| DecisionError::Invalid {
        question: question.to_string(),
        reason,
    };
    let normalized = kind.normalize(answer).map_err(invalid)?;
    if let Some(validator) = validator {
        let accepted =
            catch_unwind(AssertUnwindSafe(|| (validator.as_ref())(&normalized))).unwrap_or(false);
        if !accepted {
            return Err(invalid("rejected by validator".to_string()));
        }
    }
    Ok(normalized)
}

impl fmt::Debug for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decision")
            .field("id", &self.id)
            .field("question", &self.question)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("value", &self.value)
            .field("global_key", &self.global_key)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.global_key {
            Some(key) => write!(f, "<{}({}) [{}]>", self.kind.name(), key, self.status),
            None => write!(f, "<{} '{}' [{}]>", self.kind.name(), self.question, self.status),
        }
    }
}
