//! Async TCP client of the decision service.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::debug;

use super::protocol::{
    DecisionView, Notification, ProtocolError, Request, Response, pending_from_wire,
};
use super::service::DecisionService;

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open(addr: impl ToSocketAddrs) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    async fn send(&mut self, request: &Request) -> Result<(), ProtocolError> {
        let mut json = serde_json::to_string(request)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        let line = self.lines.next_line().await?.ok_or(ProtocolError::Closed)?;
        Ok(serde_json::from_str(&line)?)
    }

    async fn call(&mut self, request: &Request) -> Result<Value, ProtocolError> {
        self.send(request).await?;
        match self.receive::<Response>().await? {
            Response::Result(value) => Ok(value),
            Response::Error(message) => Err(ProtocolError::Service(message)),
        }
    }
}

/// Client side of the decision service.
///
/// # 使用例
/// ```ignore
/// let client = RemoteClient::connect("127.0.0.1:50051").await?;
/// if let Some(pending) = client.get_decisions().await? {
///     for view in pending {
///         client.answer(&view.id.to_string(), json!(true)).await?;
///     }
///     client.answers_done().await?;
/// }
/// ```
pub struct RemoteClient {
    connection: Mutex<Connection>,
}

impl RemoteClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ProtocolError> {
        let connection = Connection::open(addr).await?;
        debug!("connected to decision service");
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    async fn call(&self, request: Request) -> Result<Value, ProtocolError> {
        self.connection.lock().await.call(&request).await
    }
}

#[async_trait]
impl DecisionService for RemoteClient {
    async fn get_decisions(&self) -> Result<Option<Vec<DecisionView>>, ProtocolError> {
        pending_from_wire(self.call(Request::GetDecisions).await?)
    }

    async fn answer(&self, key: &str, value: Value) -> Result<Option<bool>, ProtocolError> {
        let result = self
            .call(Request::Answer {
                key: key.to_string(),
                value,
            })
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn answers_done(&self) -> Result<bool, ProtocolError> {
        Ok(serde_json::from_value(self.call(Request::AnswersDone).await?)?)
    }

    async fn cancel(&self) -> Result<bool, ProtocolError> {
        Ok(serde_json::from_value(self.call(Request::Cancel).await?)?)
    }
}

/// Dedicated connection receiving run-end notifications.
pub struct Subscription {
    connection: Connection,
}

impl Subscription {
    pub async fn open(addr: impl ToSocketAddrs) -> Result<Self, ProtocolError> {
        let mut connection = Connection::open(addr).await?;
        connection.call(&Request::Subscribe).await?;
        Ok(Self { connection })
    }

    /// Next notification, `None` once the service closed the connection.
    pub async fn next(&mut self) -> Result<Option<Notification>, ProtocolError> {
        match self.connection.receive::<Notification>().await {
            Ok(notification) => Ok(Some(notification)),
            Err(ProtocolError::Closed) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
