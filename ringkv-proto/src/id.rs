//! Ring identifiers and arc arithmetic.
//!
//! Every peer and every key is mapped onto the same cyclic identifier space
//! `[0, 2^160)` by hashing a string with SHA-1. Peers hash their canonical
//! `"ip:port"` endpoint; keys hash their raw bytes. Ownership questions then
//! reduce to arc membership tests on the ring.

use std::fmt;

use num_bigint::BigUint;
use sha1::{Digest, Sha1};

/// A position on the 160-bit identifier ring.
///
/// Ordered as an unsigned big-endian integer. The wire representation is the
/// decimal string (see [`NodeId::from_decimal`] / [`fmt::Display`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(BigUint);

impl NodeId {
    /// Hash an arbitrary UTF-8 string onto the ring: SHA-1, big-endian.
    pub fn hash(s: &str) -> Self {
        let digest = Sha1::digest(s.as_bytes());
        NodeId(BigUint::from_bytes_be(&digest))
    }

    /// Identity of the peer listening on `ip:port`.
    pub fn for_endpoint(ip: &str, port: u16) -> Self {
        Self::hash(&format!("{ip}:{port}"))
    }

    /// Parse the decimal wire form. Returns `None` for anything that is not
    /// a plain unsigned decimal integer.
    pub fn from_decimal(s: &str) -> Option<Self> {
        s.parse::<BigUint>().ok().map(NodeId)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for NodeId {
    fn from(v: u64) -> Self {
        NodeId(BigUint::from(v))
    }
}

/// Is `x` in the cyclic half-open arc `(a, b]`?
///
/// `a == b` denotes the full ring (a peer that is its own successor owns
/// every identifier).
pub fn in_arc(x: &NodeId, a: &NodeId, b: &NodeId) -> bool {
    if a < b { a < x && x <= b } else { x > a || x <= b }
}

/// A triple sufficient to address a peer.
///
/// The `id` is always `hash("ip:port")`. Code that learns a peer from a wire
/// `(ip, port)` pair derives the id rather than trusting a carried integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRef {
    pub id: NodeId,
    pub ip: String,
    pub port: u16,
}

impl PeerRef {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        let ip = ip.into();
        let id = NodeId::for_endpoint(&ip, port);
        PeerRef { id, ip, port }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_pure() {
        assert_eq!(NodeId::hash("hello"), NodeId::hash("hello"));
        assert_ne!(NodeId::hash("hello"), NodeId::hash("hellp"));
    }

    #[test]
    fn node_id_is_endpoint_hash() {
        let peer = PeerRef::new("127.0.0.1", 5000);
        assert_eq!(peer.id, NodeId::hash("127.0.0.1:5000"));
        assert_eq!(peer.id, NodeId::for_endpoint("127.0.0.1", 5000));
    }

    #[test]
    fn decimal_round_trip() {
        let id = NodeId::hash("127.0.0.1:8001");
        let parsed = NodeId::from_decimal(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn from_decimal_rejects_garbage() {
        assert!(NodeId::from_decimal("").is_none());
        assert!(NodeId::from_decimal("not a number").is_none());
        assert!(NodeId::from_decimal("-5").is_none());
        assert!(NodeId::from_decimal("1.5").is_none());
    }

    #[test]
    fn arc_without_wrap() {
        let (a, b) = (NodeId::from(50), NodeId::from(100));
        assert!(in_arc(&NodeId::from(75), &a, &b));
        assert!(in_arc(&NodeId::from(100), &a, &b));
        assert!(!in_arc(&NodeId::from(50), &a, &b));
        assert!(!in_arc(&NodeId::from(101), &a, &b));
    }

    #[test]
    fn arc_with_wrap() {
        // (900, 100] wraps through zero
        let (a, b) = (NodeId::from(900), NodeId::from(100));
        assert!(in_arc(&NodeId::from(950), &a, &b));
        assert!(in_arc(&NodeId::from(50), &a, &b));
        assert!(in_arc(&NodeId::from(100), &a, &b));
        assert!(!in_arc(&NodeId::from(150), &a, &b));
        assert!(!in_arc(&NodeId::from(900), &a, &b));
    }

    #[test]
    fn degenerate_arc_is_full_ring() {
        let a = NodeId::from(42);
        assert!(in_arc(&NodeId::from(0), &a, &a));
        assert!(in_arc(&NodeId::from(42), &a, &a));
        assert!(in_arc(&NodeId::from(9999), &a, &a));
    }
}
