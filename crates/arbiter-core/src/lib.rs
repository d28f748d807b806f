//! arbiter-core
//!
//! Decision engine for batch pipelines that need human input.
//!
//! # モジュール構成
//! - **domain**: 値型（ids, status, units, answer, kind, decision, errors）
//! - **ports**: 境界 trait（Clock, IdGenerator, Frontend, AnswerSource）
//! - **registry**: decision の追跡、検索、回答ストア、load / save
//! - **store**: 回答ファイルのフォーマットとバージョン変換
//! - **frontend**: Console / Remote / Noop の各 frontend
//! - **handler**: Pipeline trait とバッチ駆動
//! - **config**, **logging**: 実行時設定と tracing 初期化

pub mod config;
pub mod domain;
pub mod frontend;
pub mod handler;
pub mod logging;
pub mod ports;
pub mod registry;
pub mod store;

pub use config::{ArbiterConfig, ConfigError, FrontendKind};
pub use domain::{
    Answer, Decision, DecisionError, DecisionId, DecisionKind, DecisionSpec, DecisionStatus,
    Unit,
};
pub use handler::{DecisionHandler, Pipeline, Step};
pub use registry::DecisionRegistry;
