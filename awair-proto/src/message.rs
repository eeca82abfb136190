//! Decoded inbound messages

use serde_json::{Map, Value};

/// JSON object as sent by the device
pub type JsonObject = Map<String, Value>;

/// One complete message reassembled from notification fragments
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum DecodedMessage {
    Object(JsonObject),
    Array(Vec<JsonObject>),
}

impl DecodedMessage {
    /// Parse a whole buffer. Object wins over array, and a bare `null`
    /// decodes as an empty object. Anything that is not valid JSON in full,
    /// or is JSON of another shape, yields `None`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if let Ok(object) = serde_json::from_slice::<Option<JsonObject>>(bytes) {
            return Some(DecodedMessage::Object(object.unwrap_or_default()));
        }
        serde_json::from_slice::<Vec<JsonObject>>(bytes)
            .ok()
            .map(DecodedMessage::Array)
    }

    pub fn as_object(&self) -> Option<&JsonObject> {
        match self {
            DecodedMessage::Object(object) => Some(object),
            DecodedMessage::Array(_) => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.get(key))
    }

    /// The `state` string of an object message
    pub fn state(&self) -> Option<&str> {
        self.get("state").and_then(Value::as_str)
    }
}

impl std::fmt::Display for DecodedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<unprintable>"),
        }
    }
}
