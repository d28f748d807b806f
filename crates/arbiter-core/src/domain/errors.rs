//! Errors - エラー型と分類
//!
//! DecisionError は decision の構築・操作・制御信号を一つの enum で表現し、
//! `kind()` で運用上の分類（ErrorKind）を返します。

use thiserror::Error;

use super::ids::DecisionId;
use super::status::DecisionStatus;

/// ErrorKind は DecisionError の分類
///
/// - Construction: 構築時の致命的エラー（即時）
/// - Usage: 呼び出し側のバグ（即時）
/// - Validation: 値が不正（frontend が再入力を促す）
/// - Control: skip/cancel などの制御信号
/// - Persistence: answer file 関連（fail-closed）
/// - Fatal: scripted answer 不足・remote の再試行上限など
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Construction,
    Usage,
    Validation,
    Control,
    Persistence,
    Fatal,
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("global key '{0}' is already used by another decision")]
    DuplicateGlobalKey(String),

    #[error("loading or saving requires a global key (question: {0})")]
    MissingGlobalKey(String),

    #[error("collect requires an output target and an output key (question: {0})")]
    InvalidCollectTarget(String),

    #[error("decision {0} is not tracked by this registry")]
    UnknownDecision(DecisionId),

    #[error("decision '{question}' is not open (status: {status})")]
    NotOpen {
        question: String,
        status: DecisionStatus,
    },

    #[error("decision '{0}' can not be skipped")]
    SkipNotAllowed(String),

    #[error("invalid value for '{question}': {reason}")]
    Invalid { question: String, reason: String },

    #[error("decision answering was cancelled")]
    Cancelled,

    #[error("not enough answers: nothing left for '{question}'")]
    NotEnoughAnswers { question: String },

    #[error("no saved answer for '{question}'")]
    MissingSavedAnswer { question: String },

    #[error("a previous batch is still outstanding ({outstanding} decisions)")]
    OverlappingBatch { outstanding: usize },

    #[error("{unresolved} decisions still unresolved after {rounds} rounds")]
    RetriesExhausted { unresolved: usize, rounds: usize },

    #[error("answer store: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("remote service: {0}")]
    Remote(String),

    #[error("pipeline failed: {0}")]
    Pipeline(String),
}

impl DecisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DecisionError::DuplicateGlobalKey(_)
            | DecisionError::MissingGlobalKey(_)
            | DecisionError::InvalidCollectTarget(_) => ErrorKind::Construction,
            DecisionError::UnknownDecision(_)
            | DecisionError::NotOpen { .. }
            | DecisionError::SkipNotAllowed(_)
            | DecisionError::OverlappingBatch { .. } => ErrorKind::Usage,
            DecisionError::Invalid { .. } => ErrorKind::Validation,
            DecisionError::Cancelled => ErrorKind::Control,
            DecisionError::Store(_) => ErrorKind::Persistence,
            DecisionError::NotEnoughAnswers { .. }
            | DecisionError::MissingSavedAnswer { .. }
            | DecisionError::RetriesExhausted { .. }
            | DecisionError::Remote(_)
            | DecisionError::Pipeline(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DecisionError::Cancelled)
    }
}

/// Raw input could not be turned into an answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("could not interpret '{raw}': {reason}")]
    Invalid { raw: String, reason: String },

    /// The input has a shape this kind does not understand at all.
    #[error("input of this shape is not supported for {kind} decisions")]
    Unsupported { kind: &'static str },
}

impl ParseError {
    pub fn invalid(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        ParseError::Invalid {
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}
