//! Periodic ring maintenance.
//!
//! One task per peer. Every heartbeat interval it (1) heartbeats the
//! successor, treating a failed send as successor death, and (2) ages out a
//! predecessor that has been silent past the timeout. There is no
//! stabilize-style probe: the ring converges through these heartbeats and
//! through join processing.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

use ringkv_proto::message::{Envelope, Payload};
use ringkv_proto::net;

use crate::server::NodeState;

pub fn spawn(state: Arc<NodeState>) -> JoinHandle<()> {
    tokio::spawn(run(state))
}

async fn run(state: Arc<NodeState>) {
    let timeout = state.config.predecessor_timeout();
    let mut shutdown = state.shutdown_signal();
    let mut ticker = tokio::time::interval(state.config.heartbeat_interval());
    ticker.tick().await; // skip first immediate tick
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        heartbeat_successor(&state).await;
        expire_predecessor(&state, timeout);
    }
}

async fn heartbeat_successor(state: &Arc<NodeState>) {
    let (local, successor) = {
        let overlay = state.overlay.lock();
        (overlay.local().clone(), overlay.successor().clone())
    };
    if successor.id == local.id {
        return;
    }
    let hb = Envelope::new(
        local.id.clone(),
        Payload::Heartbeat { ip: local.ip.clone(), port: local.port },
    );
    if let Err(e) = net::send_envelope(&successor.ip, successor.port, &hb).await {
        warn!(peer = %successor, "heartbeat failed: {e}");
        state.overlay.lock().handle_successor_failure();
    }
}

fn expire_predecessor(state: &Arc<NodeState>, timeout: Duration) {
    let mut overlay = state.overlay.lock();
    if overlay.predecessor_silent_for(timeout) {
        warn!("predecessor heartbeat timeout, clearing");
        overlay.clear_predecessor();
    }
}
