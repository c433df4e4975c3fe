//! Two-stage decoding of device replies.
//!
//! The firmware wraps every reply twice: the outer frame is
//! `{"results": [...]}` and each element of `results` is itself a
//! JSON-encoded *string*.  Depending on firmware age that inner document is
//!
//! - `{"result": <payload>, "status": "success"}` (older boards), or
//! - `{"status": "success", "data": <payload>}` (newer boards).
//!
//! The payload may again be a JSON string.  Older boards over-escape it
//! (`\\"` instead of `\"`), so a payload that fails to parse is retried after
//! unescaping.  A payload that never parses stays a plain string; many
//! commands answer with a human-readable message.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::envelope::TransportFailure;
use crate::protocol::ProtocolError;

/// Classified outcome of a command, as seen by callers of the device façade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("command timed out")]
    Timeout,

    #[error("device not connected")]
    NotConnected,

    #[error("communication error: {0}")]
    Communication(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The device answered, but with a status other than `success`.
    #[error("device reported `{status}`: {detail}")]
    Rejected { status: String, detail: String },
}

impl From<TransportFailure> for CommandError {
    fn from(failure: TransportFailure) -> Self {
        match failure {
            TransportFailure::Timeout => Self::Timeout,
            TransportFailure::NotConnected => Self::NotConnected,
            TransportFailure::Communication(msg) => Self::Communication(msg),
        }
    }
}

/// The decoded first element of a reply's `results` array.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    /// `None` when the inner document carried no status at all.
    pub status: Option<String>,
    pub payload: Value,
}

impl CommandReply {
    /// A missing status counts as success; only an explicit non-`success`
    /// value is a rejection.
    pub fn is_success(&self) -> bool {
        self.status.as_deref().map_or(true, |s| s == "success")
    }

    /// The payload when the device answered with a plain message.
    pub fn message(&self) -> Option<&str> {
        self.payload.as_str()
    }

    /// A one-line description of the payload, for error reports.
    pub fn detail(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// The payload as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidField`] when the payload is not an
    /// object.
    pub fn payload_object(&self) -> Result<&Map<String, Value>, ProtocolError> {
        self.payload
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidField {
                field: "result",
                reason: format!("expected object, got {}", self.payload),
            })
    }

    /// Deserializes one key of the payload object.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingKey`] if the key is absent, or
    /// [`ProtocolError::InvalidField`] if it has the wrong shape.
    pub fn field<T: DeserializeOwned>(&self, key: &'static str) -> Result<T, ProtocolError> {
        let value = self
            .payload_object()?
            .get(key)
            .ok_or(ProtocolError::MissingKey(key))?;
        serde_json::from_value(value.clone()).map_err(|e| ProtocolError::InvalidField {
            field: key,
            reason: e.to_string(),
        })
    }

    /// Deserializes the whole payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidField`] if the payload has the wrong
    /// shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| ProtocolError::InvalidField {
            field: "result",
            reason: e.to_string(),
        })
    }
}

/// Decodes the first element of a `results` array.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidField`] when `results` is empty or its first
/// element is neither a JSON-encoded object nor an object, and
/// [`ProtocolError::MalformedFrame`] when the inner string is not JSON.
///
/// # Examples
///
/// ```rust
/// use openiris_core::protocol::reply::decode_results;
/// use serde_json::json;
///
/// let results = vec![json!(r#"{"result":"{\"serial\":\"AB12\"}","status":"success"}"#)];
/// let reply = decode_results(&results).unwrap();
/// assert_eq!(reply.payload["serial"], "AB12");
/// ```
pub fn decode_results(results: &[Value]) -> Result<CommandReply, ProtocolError> {
    let first = results.first().ok_or_else(|| ProtocolError::InvalidField {
        field: "results",
        reason: "empty array".into(),
    })?;

    let mut inner = match first {
        Value::String(text) => parse_object(text)?,
        Value::Object(map) => map.clone(),
        other => {
            return Err(ProtocolError::InvalidField {
                field: "results",
                reason: format!("unexpected element {other}"),
            })
        }
    };

    let mut status = take_status(&mut inner);
    let raw = inner
        .remove("data")
        .or_else(|| inner.remove("result"))
        .unwrap_or(Value::Null);
    let mut payload = decode_payload(raw);

    // Some firmware nests the newer `{status, data}` shape inside `result`.
    if let Value::Object(nested) = &mut payload {
        if nested.contains_key("status") && nested.contains_key("data") {
            let nested_status = take_status(nested);
            let data = nested.remove("data").unwrap_or(Value::Null);
            status = status.or(nested_status);
            payload = decode_payload(data);
        }
    }

    Ok(CommandReply { status, payload })
}

fn take_status(map: &mut Map<String, Value>) -> Option<String> {
    match map.remove("status") {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn parse_object(text: &str) -> Result<Map<String, Value>, ProtocolError> {
    let parsed = serde_json::from_str::<Value>(text)
        .or_else(|_| serde_json::from_str::<Value>(&normalize_escapes(text)))
        .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::InvalidField {
            field: "results",
            reason: format!("expected object, got {other}"),
        }),
    }
}

/// Turns a string payload holding a JSON object or array into that value.
/// Anything else is returned untouched.
fn decode_payload(value: Value) -> Value {
    let Value::String(text) = value else {
        return value;
    };
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return Value::String(text);
    }
    for candidate in [trimmed.to_owned(), normalize_escapes(trimmed)] {
        if let Ok(parsed @ (Value::Object(_) | Value::Array(_))) =
            serde_json::from_str::<Value>(&candidate)
        {
            return parsed;
        }
    }
    Value::String(text)
}

/// Undoes the double escaping older firmware applies to nested JSON:
/// `\\` becomes `\`, then `\"` becomes `"`.
pub fn normalize_escapes(text: &str) -> String {
    text.replace("\\\\", "\\").replace("\\\"", "\"")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
