//! Frontend implementations.
//!
//! - [`ConsoleFrontend`]: terminal prompts
//! - [`RemoteFrontend`]: answers come from an out-of-process client over TCP
//! - [`NoopFrontend`]: unattended runs

pub mod console;
pub mod noop;
pub mod remote;

pub use self::console::ConsoleFrontend;
pub use self::noop::NoopFrontend;
pub use self::remote::{RemoteClient, RemoteFrontend};
