//! The wire envelope and its validating codec.
//!
//! One message per TCP connection, UTF-8 JSON, no framing header; the
//! connection close delimits the frame:
//!
//! ```json
//! {"type":"PUT","sender_id":"1415932...","data":{"key":"k","value":"v"},"timestamp":1753910000.5}
//! ```
//!
//! The payload is a tagged variant with one case per message type. All
//! validation happens here, at the boundary: a successfully decoded
//! [`Envelope`] carries a well-typed [`Payload`] and downstream handlers
//! never re-check fields.
//!
//! Envelopes also carry a `ttl` hop budget used by the forwarding paths
//! (`GET` and relayed `JOIN`). It is optional on the wire and defaulted on
//! decode, so peers that never learned the field interoperate.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::id::NodeId;

/// Hop budget for forwarded messages. Generous relative to any ring this
/// system is deployed at; its job is to stop a broken successor cycle from
/// relaying a lookup forever.
pub const DEFAULT_TTL: u32 = 32;

const MESSAGE_TYPES: [&str; 6] = ["JOIN", "UPDATE", "PUT", "GET", "RESULT", "HEARTBEAT"];

/// Which neighbor pointer an `UPDATE` rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Predecessor,
    Successor,
}

/// Per-type message payload. Serializes as the `type` + `data` halves of the
/// envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// A new peer asks to be admitted; carries its own endpoint.
    #[serde(rename = "JOIN")]
    Join { ip: String, port: u16 },

    /// Rewrite one neighbor pointer to the carried endpoint.
    #[serde(rename = "UPDATE")]
    Update { role: Role, ip: String, port: u16 },

    /// Store a value. `is_replica` marks the copy sent to the successor;
    /// replicas are stored but never re-replicated.
    #[serde(rename = "PUT")]
    Put {
        key: String,
        value: String,
        #[serde(default)]
        is_replica: bool,
    },

    /// Look up a key. The answer goes to the requester's own listener as a
    /// fresh `RESULT` connection, not back over this one.
    #[serde(rename = "GET")]
    Get {
        key: String,
        requester_ip: String,
        requester_port: u16,
    },

    /// Answer to a prior `GET`.
    #[serde(rename = "RESULT")]
    Result { key: String, value: String },

    /// Periodic liveness signal from a predecessor to its successor.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat { ip: String, port: u16 },
}

impl Payload {
    /// Wire name of the message type, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Join { .. } => "JOIN",
            Payload::Update { .. } => "UPDATE",
            Payload::Put { .. } => "PUT",
            Payload::Get { .. } => "GET",
            Payload::Result { .. } => "RESULT",
            Payload::Heartbeat { .. } => "HEARTBEAT",
        }
    }
}

/// A complete wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender_id: NodeId,
    pub payload: Payload,
    /// Seconds since the Unix epoch, set by the sender.
    pub timestamp: f64,
    /// Remaining forward hops.
    pub ttl: u32,
}

impl Envelope {
    /// Stamp a new envelope with the current time and a full hop budget.
    pub fn new(sender_id: NodeId, payload: Payload) -> Self {
        Envelope {
            sender_id,
            payload,
            timestamp: unix_now(),
            ttl: DEFAULT_TTL,
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Codec failures, one variant per way a frame can be rejected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: not a JSON object")]
    MalformedFrame,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("bad payload: {0}")]
    BadPayload(String),

    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Encode an envelope as canonical UTF-8 JSON.
pub fn serialize(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let Value::Object(mut obj) = serde_json::to_value(&envelope.payload)? else {
        return Err(ProtocolError::BadPayload(
            "payload did not serialize to an object".to_string(),
        ));
    };
    obj.insert("sender_id".to_string(), Value::String(envelope.sender_id.to_string()));
    obj.insert("timestamp".to_string(), json!(envelope.timestamp));
    obj.insert("ttl".to_string(), json!(envelope.ttl));
    Ok(serde_json::to_vec(&Value::Object(obj))?)
}

/// Decode and validate one frame.
///
/// Fails with [`ProtocolError::MalformedFrame`] on syntactically invalid
/// JSON, [`ProtocolError::MissingField`] when one of the four envelope
/// fields is absent, [`ProtocolError::UnknownType`] for a type outside the
/// enum, and [`ProtocolError::BadPayload`] when the per-type required fields
/// are missing or mistyped.
pub fn deserialize(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|_| ProtocolError::MalformedFrame)?;
    let Value::Object(obj) = value else {
        return Err(ProtocolError::MalformedFrame);
    };

    for field in ["type", "sender_id", "data", "timestamp"] {
        if !obj.contains_key(field) {
            return Err(ProtocolError::MissingField(field));
        }
    }

    let ty = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::UnknownType("<non-string>".to_string()))?;
    if !MESSAGE_TYPES.contains(&ty) {
        return Err(ProtocolError::UnknownType(ty.to_string()));
    }

    // The sender's id travels as a decimal string; tolerate peers that emit
    // it as a bare JSON number, but never trust the numeric typing.
    let sender_raw = match obj.get("sender_id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(ProtocolError::BadPayload(
                "sender_id must be a decimal string".to_string(),
            ));
        }
    };
    let sender_id = NodeId::from_decimal(&sender_raw).ok_or_else(|| {
        ProtocolError::BadPayload(format!("sender_id is not a decimal id: {sender_raw:?}"))
    })?;

    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_f64)
        .ok_or_else(|| ProtocolError::BadPayload("timestamp must be numeric".to_string()))?;

    let data = obj.get("data").cloned().unwrap_or(Value::Null);
    if !data.is_object() {
        return Err(ProtocolError::BadPayload("data must be an object".to_string()));
    }

    let payload: Payload = serde_json::from_value(json!({ "type": ty, "data": data }))
        .map_err(|e| ProtocolError::BadPayload(e.to_string()))?;

    let ttl = obj
        .get("ttl")
        .and_then(Value::as_u64)
        .unwrap_or(u64::from(DEFAULT_TTL)) as u32;

    Ok(Envelope { sender_id, payload, timestamp, ttl })
}
