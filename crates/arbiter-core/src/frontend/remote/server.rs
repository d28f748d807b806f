//! TCP service worker.
//!
//! Runs on its own OS thread with a single-threaded tokio runtime so the
//! pipeline thread can keep its blocking, synchronous flow. The pipeline
//! side only talks to the worker through [`ServiceState`].

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::thread::{self, JoinHandle};

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::protocol::{Notification, Request, Response};
use super::service::dispatch;
use super::state::ServiceState;

/// Handle to a running service worker.
pub struct ServerHandle {
    addr: SocketAddr,
    state: ServiceState,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bind `bind` and start serving `state` on a worker thread.
    pub fn spawn(bind: &str, state: ServiceState) -> std::io::Result<Self> {
        let listener = StdTcpListener::bind(bind)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker_state = state.clone();
        let thread = thread::Builder::new()
            .name("decision-service".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "could not start the decision service runtime");
                        return;
                    }
                };
                runtime.block_on(async move {
                    match TcpListener::from_std(listener) {
                        Ok(listener) => serve(listener, worker_state, shutdown_rx).await,
                        Err(e) => error!(error = %e, "could not register the listener"),
                    }
                });
            })?;

        info!(address = %addr, "decision service listening");
        Ok(Self {
            addr,
            state,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The worker thread has not exited.
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Tell subscribers how the run ended, then close the listener and wait
    /// for the worker.
    pub fn stop(&mut self, success: bool) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.state.notify(Notification::for_outcome(success));
        let _ = self.shutdown.send(true);
        if thread.join().is_err() {
            error!("decision service worker panicked");
        }
        info!(address = %self.addr, success, "decision service stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.shutdown.send(true);
        }
    }
}

async fn serve(listener: TcpListener, state: ServiceState, mut shutdown: watch::Receiver<bool>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(client = %peer, "accepted connection");
                    connections.spawn(handle_connection(stream, state.clone(), shutdown.clone()));
                }
                Err(e) => warn!(error = %e, "failed to accept connection"),
            },
        }
    }
    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn handle_connection(
    stream: TcpStream,
    state: ServiceState,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);
    let mut notifications: Option<mpsc::UnboundedReceiver<Notification>> = None;
    let mut subscriber: Option<u64> = None;

    loop {
        let next_notification = async {
            match notifications.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            notification = next_notification => match notification {
                Some(notification) => {
                    if let Err(e) = write_line(&mut writer, &notification).await {
                        warn!(client = ?peer, error = %e, "failed to send notification");
                        break;
                    }
                }
                None => notifications = None,
            },
            _ = shutdown.changed() => break,
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!(client = ?peer, "connection closed by client");
                        break;
                    }
                    Err(e) => {
                        warn!(client = ?peer, error = %e, "failed to read request");
                        break;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<Request>(trimmed) {
                    Ok(Request::Subscribe) => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        let id = state.add_callback(move |n| tx.send(n).is_ok());
                        if let Some(previous) = subscriber.replace(id) {
                            state.remove_callback(previous);
                        }
                        notifications = Some(rx);
                        dispatch(&state, Request::Subscribe).await
                    }
                    Ok(request) => dispatch(&state, request).await,
                    Err(e) => {
                        warn!(error = %e, "failed to parse request");
                        Response::Error(format!("failed to parse request: {e}"))
                    }
                };
                if let Err(e) = write_line(&mut writer, &response).await {
                    warn!(client = ?peer, error = %e, "failed to send response");
                    break;
                }
            }
        }
    }
    if let Some(id) = subscriber {
        state.remove_callback(id);
    }
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await
}
