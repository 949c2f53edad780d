//! Classification of decoded frames into requests, notifications and
//! invalid messages.
//!
//! Each frame is classified exactly once; everything downstream matches on
//! [`IncomingMessage`] and never looks at the raw JSON again.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::{
    error::{JsonRpcError, JsonRpcErrorObject},
    notification::JsonRpcNotification,
    request::{JsonRpcRequest, RequestParams},
    types::RequestId,
};

/// A single inbound JSON-RPC message after validation
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    /// Unusable input; carries the error response to send back
    Invalid(JsonRpcError),
}

impl IncomingMessage {
    /// Get the method name, if the message has one
    pub fn method(&self) -> Option<&str> {
        match self {
            IncomingMessage::Request(req) => Some(&req.method),
            IncomingMessage::Notification(notif) => Some(&notif.method),
            IncomingMessage::Invalid(_) => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, IncomingMessage::Request(_))
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, IncomingMessage::Notification(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, IncomingMessage::Invalid(_))
    }

    /// Get the request ID if this is a request, or the recovered ID of an invalid message
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            IncomingMessage::Request(req) => Some(&req.id),
            IncomingMessage::Notification(_) => None,
            IncomingMessage::Invalid(err) => err.id.as_ref(),
        }
    }
}

/// Decode one frame's bytes and classify every message it contains.
///
/// Unparsable bytes (including invalid UTF-8) yield a single parse error with
/// a null id. A JSON array is treated as a batch and each element is
/// classified on its own; an empty batch is one invalid request.
pub fn parse_frame(bytes: &[u8]) -> Vec<IncomingMessage> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => classify_value(value),
        Err(err) => vec![IncomingMessage::Invalid(JsonRpcError::new(
            None,
            JsonRpcErrorObject::parse_error(Some(Value::String(err.to_string()))),
        ))],
    }
}

/// Parse a JSON string into its messages
pub fn parse_json_rpc_messages(json_str: &str) -> Vec<IncomingMessage> {
    parse_frame(json_str.as_bytes())
}

/// Pull only the `id` out of a frame that will not be dispatched.
///
/// Used to answer rejected frames (e.g. oversized ones). Returns `None` when
/// the bytes are not a single JSON object with a usable `id`; an absent `id`
/// means a notification, which is never answered.
pub fn recover_request_id(bytes: &[u8]) -> Option<RequestId> {
    #[derive(Deserialize)]
    struct IdMember {
        #[serde(default, deserialize_with = "present")]
        id: Option<Value>,
    }

    // Distinguishes `"id": null` from a missing `id`.
    fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
        Value::deserialize(deserializer).map(Some)
    }

    if bytes.iter().find(|b| !b.is_ascii_whitespace()) != Some(&b'{') {
        return None;
    }
    let member: IdMember = serde_json::from_slice(bytes).ok()?;
    member.id.as_ref().and_then(RequestId::from_value)
}

/// Classify an already-decoded JSON value, unwrapping batches.
pub fn classify_value(value: Value) -> Vec<IncomingMessage> {
    match value {
        Value::Array(items) if items.is_empty() => {
            vec![IncomingMessage::Invalid(JsonRpcError::invalid_request(None))]
        }
        Value::Array(items) => items.into_iter().map(classify_single).collect(),
        other => vec![classify_single(other)],
    }
}

/// Classify one non-batch value.
pub fn classify_single(value: Value) -> IncomingMessage {
    let Value::Object(mut obj) = value else {
        return IncomingMessage::Invalid(JsonRpcError::invalid_request(None));
    };

    let id_member = obj.remove("id");
    let method = match take_method(&mut obj) {
        Some(method) => method,
        None => return invalid_with_id(id_member.as_ref()),
    };
    let params = obj.remove("params").and_then(RequestParams::from_value);

    match id_member {
        None => IncomingMessage::Notification(JsonRpcNotification::new(method, params)),
        Some(raw_id) => match RequestId::from_value(&raw_id) {
            Some(id) => IncomingMessage::Request(JsonRpcRequest::new(id, method, params)),
            None => IncomingMessage::Invalid(JsonRpcError::invalid_request(None)),
        },
    }
}

fn take_method(obj: &mut Map<String, Value>) -> Option<String> {
    match obj.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => Some(method),
        _ => None,
    }
}

fn invalid_with_id(raw_id: Option<&Value>) -> IncomingMessage {
    let id = raw_id.and_then(RequestId::from_value);
    IncomingMessage::Invalid(JsonRpcError::invalid_request(id))
}
