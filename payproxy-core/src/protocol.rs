//! Stratum message model.
//!
//! Frames are decoded into the loosely typed [`StratumMessage`] wire shape
//! first and then classified into a [`MessageKind`] covering the four
//! methods the proxy interprets plus responses. Anything else is relayed
//! untouched and only ever seen here as [`MessageKind::Other`].

use crate::{Error, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const METHOD_SUBMIT: &str = "mining.submit";
pub const METHOD_AUTHORIZE: &str = "mining.authorize";
pub const METHOD_SET_TARGET: &str = "mining.set_target";
pub const METHOD_NOTIFY: &str = "mining.notify";

/// Direction a frame travelled through the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Miner to pool
    ClientToUpstream,
    /// Pool to miner
    UpstreamToClient,
}

impl Direction {
    /// Arrow used when logging frames
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "->",
            Direction::UpstreamToClient => "<-",
        }
    }

    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "client_to_upstream",
            Direction::UpstreamToClient => "upstream_to_client",
        }
    }
}

/// Correlation identifier of a request/response pair.
///
/// Stored as the canonical JSON text of the `id` field, so `2` and `"2"`
/// are distinct identifiers. Integral floats are written as integers, so
/// `2.0` and `2` are the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    /// Build an id from a raw JSON value; `null` carries no correlation
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            None
        } else {
            Some(Self(canonical_text(value)))
        }
    }
}

fn canonical_text(value: &Value) -> String {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            // Below 2^53 the integral value is exact
            Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stratum V1 message structure as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumMessage {
    pub method: Option<String>,
    pub params: Option<Value>,
    pub id: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<Value>,
}

impl StratumMessage {
    /// Parse a Stratum message from one frame of text
    pub fn parse(frame: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| Error::Framing(format!("Invalid JSON: {}", e)))?;

        if !value.is_object() {
            return Err(Error::Framing(format!("Expected a JSON object, got: {}", frame)));
        }

        serde_json::from_value(value)
            .map_err(|e| Error::Framing(format!("Failed to parse Stratum message: {}", e)))
    }

    /// Correlation id, if present and not `null`
    pub fn message_id(&self) -> Option<MessageId> {
        self.id.as_ref().and_then(MessageId::from_value)
    }

    /// Error payload, treating `null` as absent
    pub fn error_payload(&self) -> Option<&Value> {
        self.error.as_ref().filter(|e| !e.is_null())
    }

    /// Positional parameter at `index`
    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.as_ref().and_then(|p| p.as_array()).and_then(|p| p.get(index))
    }

    /// Classify the message for interception
    pub fn kind(&self) -> Result<MessageKind> {
        let Some(method) = self.method.as_deref() else {
            return Ok(match self.message_id() {
                Some(id) => MessageKind::Response {
                    id,
                    error: self.error_payload().cloned(),
                },
                None => MessageKind::Other { method: None },
            });
        };

        let kind = match method {
            METHOD_SUBMIT => MessageKind::Submit { id: self.message_id() },
            METHOD_AUTHORIZE => {
                let login = self.param(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Framing("mining.authorize without a login parameter".to_string()))?;
                MessageKind::Authorize { login: login.to_string() }
            }
            METHOD_SET_TARGET => {
                let hex = self.param(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Framing("mining.set_target without a target parameter".to_string()))?;
                MessageKind::SetTarget { target: parse_target(hex)? }
            }
            METHOD_NOTIFY => MessageKind::Notify,
            other => MessageKind::Other { method: Some(other.to_string()) },
        };

        Ok(kind)
    }
}

/// Messages the interceptor distinguishes
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// `mining.submit`; the id correlates the pool's verdict
    Submit { id: Option<MessageId> },
    /// `mining.authorize` with its `<account>.<address>` login
    Authorize { login: String },
    /// `mining.set_target` staging a new share target
    SetTarget { target: BigUint },
    /// `mining.notify` announcing a new job
    Notify,
    /// A response to an earlier request
    Response { id: MessageId, error: Option<Value> },
    /// Relayed without interpretation
    Other { method: Option<String> },
}

/// Decode a hexadecimal share target of arbitrary width
pub fn parse_target(hex: &str) -> Result<BigUint> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    if digits.is_empty() {
        return Err(Error::Framing("Empty target".to_string()));
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| Error::Framing(format!("Invalid target hex: {}", hex)))
}
