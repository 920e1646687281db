//! Per-message-type request handlers.
//!
//! Each handler is short and non-blocking: topology reads take a snapshot
//! under the overlay lock and release it before any network I/O, and every
//! outbound message is fire-and-forget through [`ringkv_proto::net`].
//!
//! Forwarded messages (`GET` relays and `JOIN` relays) consume one unit of
//! the envelope's hop budget per hop and are dropped when it runs out, so a
//! ring with a broken successor cycle cannot relay forever.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use ringkv_proto::id::{NodeId, PeerRef, in_arc};
use ringkv_proto::message::{Envelope, Payload, Role};
use ringkv_proto::net;

use crate::server::{NodeState, ResultEvent};

/// Route one decoded envelope to its handler.
pub async fn dispatch(state: &Arc<NodeState>, envelope: Envelope, remote: SocketAddr) {
    debug!(%remote, kind = envelope.payload.kind(), "dispatching message");
    match envelope.payload.clone() {
        Payload::Join { ip, port } => handle_join(state, &envelope, ip, port).await,
        Payload::Put { key, value, is_replica } => {
            handle_put(state, key, value, is_replica).await
        }
        Payload::Get { .. } => handle_get(state, envelope).await,
        Payload::Heartbeat { ip, port } => handle_heartbeat(state, ip, port),
        Payload::Update { role, ip, port } => handle_update(state, role, ip, port),
        Payload::Result { key, value } => handle_result(state, key, value),
    }
}

/// The envelope with one hop spent, or `None` when the budget is gone.
fn next_hop(envelope: &Envelope) -> Option<Envelope> {
    if envelope.ttl == 0 {
        return None;
    }
    let mut forwarded = envelope.clone();
    forwarded.ttl -= 1;
    Some(forwarded)
}

enum JoinAction {
    /// We were a ring of one; the joiner becomes both neighbors.
    Welcome,
    /// The joiner lands between us and our old successor.
    Splice { old_successor: PeerRef },
    /// The joiner belongs elsewhere on the ring; relay toward it.
    Forward { successor: PeerRef },
}

/// Admit a peer into the ring, or relay its request toward the arc it
/// belongs in. On admission, hand off the keys the joiner now owns and
/// tell it who its neighbors are.
async fn handle_join(state: &Arc<NodeState>, envelope: &Envelope, ip: String, port: u16) {
    let joiner = PeerRef::new(ip, port);
    info!(peer = %joiner, "processing join");

    let (local, action) = {
        let mut overlay = state.overlay.lock();
        let local = overlay.local().clone();
        if joiner.id == local.id {
            return;
        }
        if overlay.successor().id == local.id {
            overlay.set_successor(joiner.clone());
            overlay.set_predecessor(joiner.clone());
            (local, JoinAction::Welcome)
        } else if in_arc(&joiner.id, &local.id, &overlay.successor().id) {
            let old_successor = overlay.successor().clone();
            overlay.set_successor(joiner.clone());
            (local, JoinAction::Splice { old_successor })
        } else {
            (local, JoinAction::Forward { successor: overlay.successor().clone() })
        }
    };

    match action {
        JoinAction::Forward { successor } => {
            match next_hop(envelope) {
                Some(forwarded) => {
                    debug!(peer = %joiner, via = %successor, "relaying join around the ring");
                    if let Err(e) =
                        net::send_envelope(&successor.ip, successor.port, &forwarded).await
                    {
                        warn!(peer = %successor, "join relay failed: {e}");
                    }
                }
                None => warn!(peer = %joiner, "join relay hop budget exhausted, dropping"),
            }
            return;
        }
        JoinAction::Welcome => {}
        JoinAction::Splice { ref old_successor } => {
            // The joiner sits between us and the old successor; it learns
            // its own successor here, and the old successor learns its new
            // predecessor from the joiner's first heartbeat.
            let succ_update = Envelope::new(
                local.id.clone(),
                Payload::Update {
                    role: Role::Successor,
                    ip: old_successor.ip.clone(),
                    port: old_successor.port,
                },
            );
            if let Err(e) = net::send_envelope(&joiner.ip, joiner.port, &succ_update).await {
                warn!(peer = %joiner, "successor notice to joiner failed: {e}");
            }
        }
    }

    hand_off_keys(state, &local, &joiner).await;

    let pred_update = Envelope::new(
        local.id.clone(),
        Payload::Update {
            role: Role::Predecessor,
            ip: local.ip.clone(),
            port: local.port,
        },
    );
    if let Err(e) = net::send_envelope(&joiner.ip, joiner.port, &pred_update).await {
        warn!(peer = %joiner, "predecessor notice to joiner failed: {e}");
    }
}

/// Transfer every key the joiner is now responsible for, i.e. the keys in
/// `(local.id, joiner.id]` under the topology where the joiner is our
/// successor. Entries are not removed here; the copy we keep serves as the
/// replica. Handoff messages are plain writes, not replicas.
async fn hand_off_keys(state: &Arc<NodeState>, local: &PeerRef, joiner: &PeerRef) {
    for (key, value) in state.store.snapshot() {
        let key_hash = NodeId::hash(&key);
        if in_arc(&key_hash, &local.id, &joiner.id) {
            info!(%key, peer = %joiner, "handing off key to new successor");
            let msg = Envelope::new(
                local.id.clone(),
                Payload::Put { key, value, is_replica: false },
            );
            if let Err(e) = net::send_envelope(&joiner.ip, joiner.port, &msg).await {
                warn!(peer = %joiner, "key handoff failed: {e}");
            }
        }
    }
}

/// Store unconditionally; primaries replicate once onto the successor.
async fn handle_put(state: &Arc<NodeState>, key: String, value: String, is_replica: bool) {
    state.store.put(key.clone(), value.clone());
    info!(%key, replica = is_replica, "stored value");
    if is_replica {
        return;
    }

    let (local, successor) = {
        let overlay = state.overlay.lock();
        (overlay.local().clone(), overlay.successor().clone())
    };
    if successor.id == local.id {
        return;
    }
    let msg = Envelope::new(
        local.id.clone(),
        Payload::Put { key, value, is_replica: true },
    );
    if let Err(e) = net::send_envelope(&successor.ip, successor.port, &msg).await {
        // Tolerated until the next write to this key; there is no
        // anti-entropy sweep.
        warn!(peer = %successor, "replica write failed: {e}");
    }
}

/// Answer from the local store, or relay the lookup one hop along the
/// ring. A lookup that comes back to its requester unanswered is dropped;
/// the requester's caller times out.
async fn handle_get(state: &Arc<NodeState>, envelope: Envelope) {
    let Payload::Get { ref key, ref requester_ip, requester_port } = envelope.payload else {
        return;
    };

    if let Some(value) = state.store.get(key) {
        let local_id = state.overlay.lock().local().id.clone();
        let reply = Envelope::new(local_id, Payload::Result { key: key.clone(), value });
        if let Err(e) = net::send_envelope(requester_ip, requester_port, &reply).await {
            warn!(requester = %format!("{requester_ip}:{requester_port}"), "result delivery failed: {e}");
        }
        return;
    }

    let (local, successor) = {
        let overlay = state.overlay.lock();
        (overlay.local().clone(), overlay.successor().clone())
    };
    if *requester_ip == local.ip && requester_port == local.port {
        debug!(%key, "lookup walked the full ring without a hit, dropping");
        return;
    }
    if successor.id == local.id {
        warn!(%key, "no successor to relay lookup to, dropping");
        return;
    }
    match next_hop(&envelope) {
        Some(forwarded) => {
            if let Err(e) = net::send_envelope(&successor.ip, successor.port, &forwarded).await {
                warn!(peer = %successor, "lookup relay failed: {e}");
            }
        }
        None => warn!(%key, "lookup hop budget exhausted, dropping"),
    }
}

/// A heartbeat doubles as a predecessor notification; a lone peer also
/// adopts the sender as its successor so a two-peer ring can close.
fn handle_heartbeat(state: &Arc<NodeState>, ip: String, port: u16) {
    let peer = PeerRef::new(ip, port);
    let mut overlay = state.overlay.lock();
    overlay.notify(peer.clone());
    if overlay.successor().id == overlay.local().id {
        overlay.set_successor(peer);
    }
}

/// Rewrite the named neighbor pointer. The peer id is derived from the
/// carried endpoint, never from the envelope's sender.
fn handle_update(state: &Arc<NodeState>, role: Role, ip: String, port: u16) {
    let peer = PeerRef::new(ip, port);
    let mut overlay = state.overlay.lock();
    match role {
        Role::Predecessor => overlay.set_predecessor(peer),
        Role::Successor => overlay.set_successor(peer),
    }
}

/// Hand the answer to whoever is watching lookups (console or test).
fn handle_result(state: &Arc<NodeState>, key: String, value: String) {
    debug!(%key, "lookup result received");
    let _ = state.results.send(ResultEvent { key, value });
}
