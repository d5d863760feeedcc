//! Messages exchanged with workers.
//!
//! Workers print newline-delimited JSON on stdout. Each line is decoded once,
//! at the router boundary, into a [`WorkerMessage`].

use serde_json::Value;

/// Serialized form of the broadcaster's fatal in-page failure.
pub const SENTINEL: &str = r#"{"name":"DOMException"}"#;

/// A decoded worker message.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// Structured reading (modem status, motion data, ...), relayed verbatim.
    Reading(Value),
    /// A bare numeric sample; the sensor prints its temperature this way.
    Temperature(f64),
    /// Free-form text: non-JSON lines and JSON strings.
    Log(String),
    /// The broadcaster hit an unrecoverable in-page failure.
    Sentinel,
}

impl WorkerMessage {
    /// Decode one output line. Never fails: anything that is not JSON is a
    /// log line.
    pub fn decode(line: &str) -> Self {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => Self::from_value(value),
            Err(_) => WorkerMessage::Log(line.to_string()),
        }
    }

    /// Classify an already parsed payload.
    pub fn from_value(value: Value) -> Self {
        if is_sentinel(&value) {
            return WorkerMessage::Sentinel;
        }
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(sample) => WorkerMessage::Temperature(sample),
                None => WorkerMessage::Reading(Value::Number(n)),
            },
            Value::String(text) => WorkerMessage::Log(text),
            other => WorkerMessage::Reading(other),
        }
    }

    /// Payload as forwarded to another worker.
    pub fn to_value(&self) -> Value {
        match self {
            WorkerMessage::Reading(value) => value.clone(),
            WorkerMessage::Temperature(sample) => serde_json::json!(sample),
            WorkerMessage::Log(text) => Value::String(text.clone()),
            WorkerMessage::Sentinel => serde_json::json!({ "name": "DOMException" }),
        }
    }

    /// Temperature sample carried by this message, if any.
    ///
    /// Structured sensor readings carry it under `temp` or `temperature`.
    pub fn temperature(&self) -> Option<f64> {
        match self {
            WorkerMessage::Temperature(sample) => Some(*sample),
            WorkerMessage::Reading(Value::Object(fields)) => fields
                .get("temperature")
                .or_else(|| fields.get("temp"))
                .and_then(Value::as_f64),
            _ => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, WorkerMessage::Sentinel)
    }
}

/// Whether a payload serializes exactly to [`SENTINEL`].
pub fn is_sentinel(value: &Value) -> bool {
    value.is_object()
        && serde_json::to_string(value)
            .map(|serialized| serialized == SENTINEL)
            .unwrap_or(false)
}
