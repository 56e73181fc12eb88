//! JSON-RPC 1.0 envelopes as spoken by bitcoind and btcd.
//!
//! Outbound: `{"jsonrpc":"1.0","id":7,"method":"getblockcount","params":[]}`.
//! Inbound responses echo the id; btcd websocket notifications carry
//! `"id": null` (or no id at all) and a `method`.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{codes, RemoteError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version string placed in every request
pub const JSONRPC_VERSION: &str = "1.0";

/// Outbound call envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub jsonrpc: String,
    pub id: CorrelationId,
    pub method: String,
    pub params: Vec<Value>,
}

impl RequestEnvelope {
    pub fn new(id: CorrelationId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Correlated reply for one call
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: CorrelationId,
    pub outcome: Result<Value, RemoteError>,
}

/// Message carrying no correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification name (`blockconnected`, `txaccepted`, ...), if present
    pub method: Option<String>,
    /// Notification payload; `Null` when absent
    pub params: Value,
}

/// Result of classifying one inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Response(ResponseEnvelope),
    Notification(Notification),
}

/// Inbound payload that is not a valid envelope
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("unusable id field: {0}")]
    BadId(String),
}

/// Classify an inbound payload.
///
/// Identifier presence is the discriminator: a non-null `id` makes the
/// payload a response, anything else is an unsolicited notification. Once
/// the id parses the payload always decodes, so its caller hears about it.
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundMessage, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let mut object = match value {
        Value::Object(object) => object,
        other => return Err(DecodeError::NotAnObject(json_kind(&other))),
    };

    let id = match object.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(parse_id(&raw)?),
    };

    let Some(id) = id else {
        let method = match object.remove("method") {
            Some(Value::String(m)) => Some(m),
            _ => None,
        };
        let params = object.remove("params").unwrap_or(Value::Null);
        return Ok(InboundMessage::Notification(Notification { method, params }));
    };

    let outcome = match object.remove("error") {
        None | Some(Value::Null) => Ok(object.remove("result").unwrap_or(Value::Null)),
        Some(raw) => Err(remote_error_from(raw)),
    };

    Ok(InboundMessage::Response(ResponseEnvelope { id, outcome }))
}

/// Structured error, or a `MISC_ERROR` carrying whatever the node sent
fn remote_error_from(raw: Value) -> RemoteError {
    if let Ok(error) = serde_json::from_value::<RemoteError>(raw.clone()) {
        return error;
    }
    let message = match &raw {
        Value::String(s) => s.clone(),
        Value::Object(fields) => match fields.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => raw.to_string(),
        },
        other => other.to_string(),
    };
    RemoteError {
        code: codes::MISC_ERROR,
        message,
        data: Some(raw),
    }
}

fn parse_id(raw: &Value) -> Result<CorrelationId, DecodeError> {
    match raw {
        Value::Number(n) => n
            .as_u64()
            .map(CorrelationId::from_raw)
            .ok_or_else(|| DecodeError::BadId(n.to_string())),
        // Some proxies stringify ids
        Value::String(s) => s
            .parse::<u64>()
            .map(CorrelationId::from_raw)
            .map_err(|_| DecodeError::BadId(format!("\"{s}\""))),
        other => Err(DecodeError::BadId(json_kind(other).to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
