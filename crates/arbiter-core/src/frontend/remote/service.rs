//! DecisionService trait - remote client から見た操作
//!
//! 同じ trait をプロセス内の [`ServiceState`] と TCP 越しの
//! [`RemoteClient`](super::client::RemoteClient) が実装します。
//! サーバは受け取った [`Request`] を [`dispatch`] でこの trait に振り分けます。

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use super::protocol::{DecisionView, ProtocolError, Request, Response, pending_to_wire};
use super::state::ServiceState;

/// # Object Safety
/// - `&dyn DecisionService` として server / client のどちらにも使える
#[async_trait]
pub trait DecisionService: Send + Sync {
    /// Pending decisions in batch order, `None` while the pipeline works.
    async fn get_decisions(&self) -> Result<Option<Vec<DecisionView>>, ProtocolError>;

    /// `None` = unknown key or unreadable value, otherwise accepted or not.
    async fn answer(&self, key: &str, value: Value) -> Result<Option<bool>, ProtocolError>;

    async fn answers_done(&self) -> Result<bool, ProtocolError>;

    async fn cancel(&self) -> Result<bool, ProtocolError>;
}

#[async_trait]
impl DecisionService for ServiceState {
    async fn get_decisions(&self) -> Result<Option<Vec<DecisionView>>, ProtocolError> {
        Ok(ServiceState::get_decisions(self))
    }

    async fn answer(&self, key: &str, value: Value) -> Result<Option<bool>, ProtocolError> {
        Ok(ServiceState::answer(self, key, &value))
    }

    async fn answers_done(&self) -> Result<bool, ProtocolError> {
        Ok(ServiceState::answers_done(self))
    }

    async fn cancel(&self) -> Result<bool, ProtocolError> {
        Ok(ServiceState::cancel(self))
    }
}

/// Answer one request. `subscribe` is connection-level and handled by the
/// server loop.
pub async fn dispatch(service: &dyn DecisionService, request: Request) -> Response {
    let result = match request {
        Request::GetDecisions => match service.get_decisions().await {
            Ok(pending) => pending_to_wire(pending).map_err(ProtocolError::from),
            Err(e) => Err(e),
        },
        Request::Answer { key, value } => service.answer(&key, value).await.map(|r| json!(r)),
        Request::AnswersDone => service.answers_done().await.map(Value::Bool),
        Request::Cancel => service.cancel().await.map(Value::Bool),
        Request::Subscribe => Ok(Value::Bool(true)),
    };
    match result {
        Ok(value) => Response::Result(value),
        Err(e) => {
            warn!(error = %e, "request failed");
            Response::Error(e.to_string())
        }
    }
}
