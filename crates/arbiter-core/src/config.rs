//! 実行時設定
//!
//! 既定値 → TOML ファイル → `ARBITER_*` 環境変数 の順に上書きする。

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_FRONTEND: &str = "ARBITER_FRONTEND";
pub const ENV_ANSWER_FILE: &str = "ARBITER_ANSWER_FILE";
pub const ENV_REMOTE_BIND: &str = "ARBITER_REMOTE_BIND";
pub const ENV_LOG: &str = "ARBITER_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Process-wide frontend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontendKind {
    #[default]
    Console,
    Remote,
    Debug,
}

impl FromStr for FrontendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "remote" => Ok(Self::Remote),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown frontend '{other}' (console, remote, debug)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub bind: String,
    pub poll_interval_ms: u64,
    pub max_rounds: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:50051".to_string(),
            poll_interval_ms: 100,
            max_rounds: 10,
        }
    }
}

impl RemoteConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub max_attempts: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::frontend::console::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// # 使用例
/// ```ignore
/// let config = ArbiterConfig::load(Some(Path::new("arbiter.toml")))?;
/// logging::init(&config.log_level);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    pub frontend: FrontendKind,
    pub answer_file: Option<PathBuf>,
    pub remote: RemoteConfig,
    pub console: ConsoleConfig,
    pub log_level: String,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            frontend: FrontendKind::default(),
            answer_file: None,
            remote: RemoteConfig::default(),
            console: ConsoleConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ArbiterConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// 環境変数による上書き。`lookup` はテストから差し替えられる。
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_FRONTEND) {
            self.frontend = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_FRONTEND,
                value,
            })?;
        }
        if let Some(value) = lookup(ENV_ANSWER_FILE) {
            self.answer_file = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        if let Some(value) = lookup(ENV_REMOTE_BIND) {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidEnv {
                    var: ENV_REMOTE_BIND,
                    value,
                });
            }
            self.remote.bind = value;
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.log_level = value;
        }
        Ok(())
    }
}
