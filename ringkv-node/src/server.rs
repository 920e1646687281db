//! Node state and the TCP listener.
//!
//! [`NodeState`] is the explicit handle that owns everything long-lived:
//! configuration, the overlay, the store, the console event channel, and
//! the shutdown signal. It is shared as an `Arc` by the accept loop, the
//! per-connection tasks, the maintenance loop, and the console; there are
//! no module-level globals.
//!
//! The listener accepts one message per connection: each accepted stream is
//! handed to its own task, which reads a single bounded frame, decodes it,
//! and dispatches.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use ringkv_proto::id::PeerRef;
use ringkv_proto::message::{self, Envelope, Payload, Role};
use ringkv_proto::net;

use crate::config::{NodeConfig, discover_local_ip};
use crate::dispatch;
use crate::overlay::Overlay;
use crate::store::LocalStore;

/// The answer to a prior local `GET`, delivered asynchronously.
///
/// Correlation with the originating lookup is by key equality only;
/// concurrent lookups for the same key are indistinguishable in their
/// replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEvent {
    pub key: String,
    pub value: String,
}

/// Shared state of a running peer.
pub struct NodeState {
    pub config: NodeConfig,
    pub overlay: Mutex<Overlay>,
    pub store: LocalStore,
    pub results: mpsc::UnboundedSender<ResultEvent>,
    shutdown: watch::Sender<bool>,
}

impl NodeState {
    /// This peer's own reference.
    pub fn local(&self) -> PeerRef {
        self.overlay.lock().local().clone()
    }

    /// Ask the listener, maintenance loop, and console to wind down.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Request ring membership through a known member. Fire-and-forget: the
    /// admitting peer answers with `UPDATE`s on our inbound path.
    pub async fn join(&self, bootstrap_ip: &str, bootstrap_port: u16) {
        let local = self.local();
        info!(bootstrap = %format!("{bootstrap_ip}:{bootstrap_port}"), "requesting ring membership");
        let msg = Envelope::new(
            local.id.clone(),
            Payload::Join { ip: local.ip.clone(), port: local.port },
        );
        if let Err(e) = net::send_envelope(bootstrap_ip, bootstrap_port, &msg).await {
            warn!("join request failed: {e}");
        }
    }

    /// Best-effort graceful exit: point the successor at our predecessor
    /// and the predecessor at our successor. If either send fails the ring
    /// self-repairs through heartbeats and later joins.
    pub async fn leave(&self) {
        let (local, successor, predecessor) = {
            let overlay = self.overlay.lock();
            (
                overlay.local().clone(),
                overlay.successor().clone(),
                overlay.predecessor().cloned(),
            )
        };
        if successor.id == local.id {
            return;
        }
        let Some(predecessor) = predecessor else {
            return;
        };

        let to_successor = Envelope::new(
            local.id.clone(),
            Payload::Update {
                role: Role::Predecessor,
                ip: predecessor.ip.clone(),
                port: predecessor.port,
            },
        );
        if let Err(e) = net::send_envelope(&successor.ip, successor.port, &to_successor).await {
            warn!(peer = %successor, "leave notice to successor failed: {e}");
        }

        let to_predecessor = Envelope::new(
            local.id.clone(),
            Payload::Update {
                role: Role::Successor,
                ip: successor.ip.clone(),
                port: successor.port,
            },
        );
        if let Err(e) = net::send_envelope(&predecessor.ip, predecessor.port, &to_predecessor).await
        {
            warn!(peer = %predecessor, "leave notice to predecessor failed: {e}");
        }
    }
}

/// Owns the listening socket and the shared state behind it.
pub struct Server {
    state: Arc<NodeState>,
    listener: TcpListener,
}

impl Server {
    /// Bind the listener and assemble the node state. The advertised
    /// identity uses the OS-assigned port, so `port = 0` works for tests.
    pub async fn bind(config: NodeConfig) -> Result<(Server, mpsc::UnboundedReceiver<ResultEvent>)> {
        let host = config.host.clone().unwrap_or_else(discover_local_ip);
        let listener = TcpListener::bind((host.as_str(), config.port))
            .await
            .with_context(|| format!("failed to bind {host}:{}", config.port))?;
        let port = listener.local_addr()?.port();
        let local = PeerRef::new(host, port);
        info!(addr = %local, "network service listening");

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let state = Arc::new(NodeState {
            config,
            overlay: Mutex::new(Overlay::new(local)),
            store: LocalStore::new(),
            results: results_tx,
            shutdown: shutdown_tx,
        });
        Ok((Server { state, listener }, results_rx))
    }

    pub fn state(&self) -> Arc<NodeState> {
        Arc::clone(&self.state)
    }

    /// Accept until shutdown. Each connection is handled on its own task;
    /// loop exit on shutdown is a normal event, not an error.
    pub async fn run(self) {
        let mut shutdown = self.state.shutdown_signal();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(handle_connection(state, stream, remote));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("listener stopped");
    }
}

/// Read one bounded frame, decode it, dispatch it, done. Oversized frames
/// are truncated at [`net::MAX_FRAME_BYTES`] and rejected by the codec. Any
/// per-connection failure is logged and dropped; it never takes the peer
/// down.
async fn handle_connection(state: Arc<NodeState>, mut stream: TcpStream, remote: SocketAddr) {
    let mut buf = Vec::new();
    match (&mut stream).take(net::MAX_FRAME_BYTES).read_to_end(&mut buf).await {
        Ok(0) => return,
        Ok(_) => {}
        Err(e) => {
            warn!(%remote, "connection read failed: {e}");
            return;
        }
    }
    match message::deserialize(&buf) {
        Ok(envelope) => dispatch::dispatch(&state, envelope, remote).await,
        Err(e) => warn!(%remote, "dropping invalid frame: {e}"),
    }
}
