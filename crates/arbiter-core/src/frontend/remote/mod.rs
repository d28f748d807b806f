//! Remote frontend: a TCP decision service on a worker thread.
//!
//! ```text
//! pipeline thread                      worker thread (tokio)
//! RemoteFrontend --publish--> ServiceState <--answer-- server <--TCP-- RemoteClient
//!                <--poll----
//! ```

pub mod client;
pub mod frontend;
pub mod protocol;
pub mod server;
pub mod service;
pub mod state;

pub use self::client::{RemoteClient, Subscription};
pub use self::frontend::RemoteFrontend;
pub use self::protocol::{DecisionView, Notification, ProtocolError, STILL_WORKING};
pub use self::server::ServerHandle;
pub use self::service::DecisionService;
pub use self::state::{PendingEntry, Poll, ServiceState};
