//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID
//! Decision ごとに ULID を割り当てます。remote protocol の key として
//! 文字列（`decision-<ulid>`）でやり取りされるため、`Display` と `FromStr`
//! が往復できることが前提です。
//!
//! ## Phantom Type パターン
//! `Id<T>` は共通実装を持ち、`T` はコンパイル時だけ使うマーカー型です。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"decision-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// wire 上は常に `Display` 形式の文字列として表現します。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// ID 文字列のパースエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{0}'")]
pub struct IdParseError(pub String);

impl<T: IdMarker> FromStr for Id<T> {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(T::prefix())
            .ok_or_else(|| IdParseError(s.to_string()))?;
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| IdParseError(s.to_string()))
    }
}

impl<T: IdMarker> TryFrom<String> for Id<T> {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl<T: IdMarker> From<Id<T>> for String {
    fn from(id: Id<T>) -> Self {
        id.to_string()
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Decision のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DecisionTag {}

impl IdMarker for DecisionTag {
    fn prefix() -> &'static str {
        "decision-"
    }
}

/// Identifier of one Decision instance (unique within a process run).
pub type DecisionId = Id<DecisionTag>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_prefix_and_parses_back() {
        let ulid = Ulid::new();
        let id = DecisionId::from_ulid(ulid);

        let text = id.to_string();
        assert!(text.starts_with("decision-"));

        let back: DecisionId = text.parse().unwrap();
        assert_eq!(back, id);
        assert_eq!(back.as_ulid(), ulid);
    }

    #[test]
    fn parse_rejects_foreign_prefix() {
        let ulid = Ulid::new();
        let err = format!("task-{ulid}").parse::<DecisionId>().unwrap_err();
        assert!(err.to_string().contains("task-"));

        assert!("decision-not-a-ulid".parse::<DecisionId>().is_err());
    }

    #[test]
    fn ulid_ids_are_sortable() {
        // ULID は時刻ベースなので、生成順序でソート可能
        let id1 = DecisionId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = DecisionId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }

    #[test]
    fn serializes_as_display_string() {
        let id = DecisionId::from_ulid(Ulid::new());

        let serialized = serde_json::to_string(&id).unwrap();
        assert_eq!(serialized, format!("\"{id}\""));

        let deserialized: DecisionId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<DecisionId>(), size_of::<Ulid>());
    }
}
