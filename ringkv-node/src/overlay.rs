//! Ring topology state.
//!
//! A pure state machine over the peer's identity and its two neighbor
//! pointers. It performs no I/O: handlers lock it, read or mutate, and
//! release the lock before any network send. The ring invariants it
//! maintains:
//!
//! - `successor` is never null; a lone peer is its own successor.
//! - with a predecessor `p`, this peer owns exactly the arc `(p.id, self.id]`;
//!   with none, it owns the whole ring.

use std::time::{Duration, Instant};

use ringkv_proto::id::{NodeId, PeerRef, in_arc};

pub struct Overlay {
    local: PeerRef,
    successor: PeerRef,
    predecessor: Option<PeerRef>,
    last_predecessor_heartbeat: Option<Instant>,
}

impl Overlay {
    /// A ring of one: the peer is its own successor, no predecessor.
    pub fn new(local: PeerRef) -> Self {
        tracing::info!(id = %local.id, addr = %local, "ring position configured");
        Overlay {
            successor: local.clone(),
            local,
            predecessor: None,
            last_predecessor_heartbeat: None,
        }
    }

    pub fn local(&self) -> &PeerRef {
        &self.local
    }

    pub fn successor(&self) -> &PeerRef {
        &self.successor
    }

    pub fn predecessor(&self) -> Option<&PeerRef> {
        self.predecessor.as_ref()
    }

    pub fn set_successor(&mut self, peer: PeerRef) {
        tracing::info!(peer = %peer, "successor updated");
        self.successor = peer;
    }

    /// Update the predecessor pointer and reset its liveness watchdog.
    pub fn set_predecessor(&mut self, peer: PeerRef) {
        tracing::info!(peer = %peer, "predecessor updated");
        self.predecessor = Some(peer);
        self.last_predecessor_heartbeat = Some(Instant::now());
    }

    pub fn clear_predecessor(&mut self) {
        self.predecessor = None;
        self.last_predecessor_heartbeat = None;
    }

    /// Accept whoever heartbeats us as our predecessor.
    ///
    /// A single-successor ring has no "closer predecessor?" probe to check
    /// the candidate against, so the rule is unconditional; a stale peer
    /// that notifies causes only a brief transient until the live
    /// predecessor's next heartbeat lands.
    pub fn notify(&mut self, peer: PeerRef) {
        self.set_predecessor(peer);
    }

    /// Does this peer own `key_hash`?
    pub fn is_responsible(&self, key_hash: &NodeId) -> bool {
        match &self.predecessor {
            None => true,
            Some(p) if p.id == self.local.id => true,
            Some(p) => in_arc(key_hash, &p.id, &self.local.id),
        }
    }

    /// The successor stopped answering: collapse the ring to self and wait
    /// for joins to re-grow it.
    pub fn handle_successor_failure(&mut self) {
        if self.successor.id != self.local.id {
            tracing::warn!(lost = %self.successor, "successor unreachable, ring collapses to self");
            self.successor = self.local.clone();
        }
    }

    /// Has the predecessor been silent for longer than `timeout`?
    pub fn predecessor_silent_for(&self, timeout: Duration) -> bool {
        match (&self.predecessor, self.last_predecessor_heartbeat) {
            (Some(_), Some(at)) => at.elapsed() > timeout,
            _ => false,
        }
    }
}
