//! Persisted answer file.
//!
//! On-disk shape (current version):
//! ```text
//! {
//!   "version": "0.1",
//!   "checksum_ifc": null,
//!   "decisions": { "<global_key>": {"value": ..., "checksum": "..."} }
//! }
//! ```
//! Version `"0"` files are a bare `{global_key: value}` map and are upgraded
//! on read. Any other version mismatch is rejected.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::info;

/// Version written by [`AnswerFile::write`].
pub const ANSWER_FILE_VERSION: &str = "0.1";

/// Version assumed for files without a `version` field.
pub const LEGACY_VERSION: &str = "0";

type Conversion = fn(Value) -> Result<Value, StoreError>;

/// Known upgrade paths, keyed by `(from, to)`.
const CONVERSIONS: &[(&str, &str, Conversion)] = &[(LEGACY_VERSION, "0.1", convert_0_to_0_1)];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed answer file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no conversion from answer file version '{from}' to '{to}'")]
    UnsupportedVersion { from: String, to: String },

    #[error("answer file version '{0}' has an unexpected layout")]
    Layout(String),
}

/// One recorded answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnswer {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerFile {
    pub version: String,
    #[serde(default)]
    pub checksum_ifc: Option<String>,
    #[serde(default)]
    pub decisions: BTreeMap<String, StoredAnswer>,
}

impl AnswerFile {
    pub fn new(decisions: BTreeMap<String, StoredAnswer>) -> Self {
        Self {
            version: ANSWER_FILE_VERSION.to_string(),
            checksum_ifc: None,
            decisions,
        }
    }

    /// Read and, if needed, upgrade an answer file.
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: Value = serde_json::from_str(&text)?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> Result<Self, StoreError> {
        let version = match raw.get("version") {
            Some(Value::String(v)) => v.clone(),
            _ => LEGACY_VERSION.to_string(),
        };
        let current = if version == ANSWER_FILE_VERSION {
            raw
        } else {
            let convert = find_conversion(&version, ANSWER_FILE_VERSION).ok_or_else(|| {
                StoreError::UnsupportedVersion {
                    from: version.clone(),
                    to: ANSWER_FILE_VERSION.to_string(),
                }
            })?;
            info!(from = %version, to = ANSWER_FILE_VERSION, "converting answer file");
            convert(raw)?
        };
        Ok(serde_json::from_value(current)?)
    }

    /// Serialize to `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

fn find_conversion(from: &str, to: &str) -> Option<Conversion> {
    CONVERSIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, convert)| *convert)
}

/// `{key: value}` -> `{version, checksum_ifc, decisions: {key: {value}}}`
fn convert_0_to_0_1(raw: Value) -> Result<Value, StoreError> {
    let Value::Object(flat) = raw else {
        return Err(StoreError::Layout(LEGACY_VERSION.to_string()));
    };
    let decisions: Map<String, Value> = flat
        .into_iter()
        .map(|(key, value)| (key, json!({ "value": value })))
        .collect();
    Ok(json!({
        "version": "0.1",
        "checksum_ifc": null,
        "decisions": decisions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decisions.json");

        let mut decisions = BTreeMap::new();
        decisions.insert(
            "year".to_string(),
            StoredAnswer { value: json!(2015), checksum: Some("abc".into()) },
        );
        let file = AnswerFile::new(decisions);
        file.write(&path).unwrap();

        let back = AnswerFile::read(&path).unwrap();
        assert_eq!(back, file);
        assert_eq!(back.version, ANSWER_FILE_VERSION);
    }

    #[test]
    fn written_file_has_versioned_envelope() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("decisions.json");
        AnswerFile::new(BTreeMap::new()).write(&path).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], "0.1");
        assert!(raw["checksum_ifc"].is_null());
        assert!(raw["decisions"].is_object());
    }

    #[test]
    fn legacy_flat_map_is_upgraded() {
        let file = AnswerFile::from_value(json!({"year": 2015, "merge": true})).unwrap();
        assert_eq!(file.version, "0.1");
        assert_eq!(file.decisions["year"].value, json!(2015));
        assert_eq!(file.decisions["merge"].checksum, None);
    }

    #[test]
    fn unknown_version_fails_closed() {
        let err = AnswerFile::from_value(json!({"version": "9.9", "decisions": {}})).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion { ref from, .. } if from == "9.9"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let err = AnswerFile::read(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
