//! Shared protocol for ringkv peers.
//!
//! Everything a process needs in order to speak to the ring, whether or not
//! it is a ring member itself: 160-bit identifiers and arc arithmetic
//! ([`id`]), the JSON wire envelope with its validating codec ([`message`]),
//! and the fire-and-forget TCP client ([`net`]).
//!
//! Replies never travel back over the connection that carried the request:
//! a peer answers by opening a fresh connection to the requester. Consumers
//! that expect a `RESULT` must therefore be listening on their own port.

pub mod id;
pub mod message;
pub mod net;

pub use id::{NodeId, PeerRef, in_arc};
pub use message::{Envelope, Payload, ProtocolError, Role, deserialize, serialize};
pub use net::{SendError, send_bytes, send_envelope};
