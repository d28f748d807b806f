//! Wire format of the decision service.
//!
//! One JSON object per line in each direction. Requests carry a `method`
//! tag and optional `params`; every request gets exactly one response,
//! `{"result": ...}` or `{"error": "..."}`. A connection that sent
//! `subscribe` afterwards receives notifications such as
//! `{"event": "finished"}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::decision::Decision;
use crate::domain::ids::DecisionId;
use crate::domain::kind::KindTag;

/// `get_decisions` result while no batch is published.
pub const STILL_WORKING: &str = "still working";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    GetDecisions,
    /// `value: null` asks to skip the decision.
    Answer { key: String, value: Value },
    AnswersDone,
    Cancel,
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Result(Value),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Finished,
    Error,
}

impl Notification {
    pub fn for_outcome(success: bool) -> Self {
        if success {
            Notification::Finished
        } else {
            Notification::Error
        }
    }
}

/// JSON projection of one pending decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionView {
    pub id: DecisionId,
    /// Position inside the published batch.
    pub index: usize,
    pub question: String,
    pub options: Vec<String>,
    /// JSON-encoded body rows (`"null"` for kinds without a body).
    pub body: String,
    pub kind: KindTag,
    pub related: Vec<String>,
    pub context: Vec<String>,
}

impl DecisionView {
    pub fn new(
        decision: &Decision,
        index: usize,
        options: Vec<String>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: decision.id(),
            index,
            question: decision.rendered_question(),
            options,
            body: serde_json::to_string(&decision.kind().body())?,
            kind: decision.kind().tag(),
            related: decision.related().to_vec(),
            context: decision.context().to_vec(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("service error: {0}")]
    Service(String),

    #[error("connection closed by the service")]
    Closed,
}

/// `None` (no batch) travels as the [`STILL_WORKING`] sentinel.
pub fn pending_to_wire(pending: Option<Vec<DecisionView>>) -> Result<Value, serde_json::Error> {
    match pending {
        None => Ok(Value::String(STILL_WORKING.to_string())),
        Some(views) => {
            let by_id: BTreeMap<String, DecisionView> = views
                .into_iter()
                .map(|view| (view.id.to_string(), view))
                .collect();
            serde_json::to_value(by_id)
        }
    }
}

/// Inverse of [`pending_to_wire`], views sorted by batch position.
pub fn pending_from_wire(value: Value) -> Result<Option<Vec<DecisionView>>, ProtocolError> {
    match value {
        Value::String(s) if s == STILL_WORKING => Ok(None),
        other => {
            let by_id: BTreeMap<String, DecisionView> = serde_json::from_value(other)?;
            let mut views: Vec<DecisionView> = by_id.into_values().collect();
            views.sort_by_key(|view| view.index);
            Ok(Some(views))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::DecisionSpec;
    use crate::registry::DecisionRegistry;
    use serde_json::json;

    #[test]
    fn requests_are_method_tagged() {
        let get = serde_json::to_value(Request::GetDecisions).unwrap();
        assert_eq!(get, json!({"method": "get_decisions"}));

        let answer: Request = serde_json::from_value(json!({
            "method": "answer",
            "params": {"key": "decision-x", "value": true}
        }))
        .unwrap();
        assert_eq!(
            answer,
            Request::Answer {
                key: "decision-x".into(),
                value: json!(true)
            }
        );
    }

    #[test]
    fn notifications_and_responses() {
        assert_eq!(
            serde_json::to_value(Notification::for_outcome(false)).unwrap(),
            json!({"event": "error"})
        );
        assert_eq!(
            serde_json::to_value(Response::Result(json!(null))).unwrap(),
            json!({"result": null})
        );
    }

    #[test]
    fn pending_views_travel_keyed_by_id() {
        let mut registry = DecisionRegistry::new();
        let a = registry
            .create(DecisionSpec::choice("Class?", ["IfcPipe", "IfcDuct"]).related(["guid-1"]))
            .unwrap();
        let b = registry.create(DecisionSpec::boolean("Merge?")).unwrap();
        let views = vec![
            DecisionView::new(registry.decision(a).unwrap(), 0, vec!["cancel".into()]).unwrap(),
            DecisionView::new(registry.decision(b).unwrap(), 1, vec!["cancel".into()]).unwrap(),
        ];

        let wire = pending_to_wire(Some(views.clone())).unwrap();
        let entry = &wire[a.to_string()];
        assert_eq!(entry["kind"], "list");
        assert_eq!(entry["related"], json!(["guid-1"]));
        let body: Value = serde_json::from_str(entry["body"].as_str().unwrap()).unwrap();
        assert_eq!(body[1]["value"], "IfcDuct");
        assert_eq!(wire[b.to_string()]["body"], "null");

        assert_eq!(pending_from_wire(wire).unwrap(), Some(views));
        assert_eq!(pending_from_wire(pending_to_wire(None).unwrap()).unwrap(), None);
    }
}
