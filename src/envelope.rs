//! Envelope decoding.
//!
//! Requests arrive either as a bare JSON object (the payload itself) or
//! wrapped MassTransit-style:
//!
//! ```json
//! { "messageId": "...", "messageType": ["urn:message:...:TalkingHeadRequest"], "message": { ... } }
//! ```

use crate::error::DecodeError;
use crate::model::Payload;
use serde_json::{Map, Value};

/// Wrapper key holding the inner payload.
pub const MESSAGE_KEY: &str = "message";
/// Key holding the optional array of type-identifier strings.
pub const MESSAGE_TYPE_KEY: &str = "messageType";
const MESSAGE_ID_KEY: &str = "messageId";

/// A decoded message body.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload: Payload,
    /// Type identifiers in the order the sender listed them.
    pub type_hints: Vec<String>,
    /// Transport-level message id, when the sender enveloped the payload.
    pub message_id: Option<String>,
}

/// Decode raw bytes into a payload plus type hints.
///
/// Non-string entries in `messageType` are skipped, and a `messageType` that
/// is not an array yields no hints.
pub fn decode(body: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_slice(body)?;
    let Value::Object(mut outer) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let type_hints = type_hints(&outer);

    if !outer.contains_key(MESSAGE_KEY) {
        return Ok(Envelope {
            payload: Payload::new(outer),
            type_hints,
            message_id: None,
        });
    }

    let message_id = outer
        .get(MESSAGE_ID_KEY)
        .and_then(Value::as_str)
        .map(str::to_owned);

    match outer.remove(MESSAGE_KEY) {
        Some(Value::Object(inner)) if !inner.is_empty() => Ok(Envelope {
            payload: Payload::new(inner),
            type_hints,
            message_id,
        }),
        _ => Err(DecodeError::EmptyEnvelope),
    }
}

fn type_hints(outer: &Map<String, Value>) -> Vec<String> {
    match outer.get(MESSAGE_TYPE_KEY) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}
