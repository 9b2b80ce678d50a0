//! Protocol packets.
//!
//! Every message exchanged over a transport is a JSON object. Requests carry
//! a `to` field naming the destination actor and a `type` field naming the
//! request; replies carry a `from` field naming the actor that produced them.
//! Any other field is payload and is passed through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PacketError;

/// A single protocol message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Packet(Map<String, Value>);

impl Packet {
    /// Create an empty packet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a request addressed to `to` with the given request type.
    pub fn request(to: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self::new()
            .with("to", to.into())
            .with("type", request_type.into())
    }

    /// Create a reply originating from `from`.
    pub fn reply(from: impl Into<String>) -> Self {
        Self::new().with("from", from.into())
    }

    /// Create an error reply, as sent for failed requests.
    pub fn error(from: impl Into<String>, error: &str, message: Option<String>) -> Self {
        let packet = Self::reply(from).with("error", error);
        match message {
            Some(message) => packet.with("message", message),
            None => packet,
        }
    }

    /// Builder style field insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// The destination actor of a request.
    ///
    /// Returns `None` for a missing or non-string `to` field.
    pub fn to(&self) -> Option<&str> {
        self.str_field("to")
    }

    /// The request type of a request.
    pub fn request_type(&self) -> Option<&str> {
        self.str_field("type")
    }

    /// The actor a reply originates from.
    pub fn from_actor(&self) -> Option<&str> {
        self.str_field("from")
    }

    pub fn set_from(&mut self, from: impl Into<String>) {
        self.insert("from", from.into());
    }

    /// The protocol error name of an error reply.
    pub fn error_name(&self) -> Option<&str> {
        self.str_field("error")
    }

    pub fn is_error(&self) -> bool {
        self.0.contains_key("error")
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for Packet {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Packet {
    type Error = PacketError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(PacketError::NotAnObject(json_kind(&other))),
        }
    }
}

impl From<Packet> for Value {
    fn from(packet: Packet) -> Self {
        packet.into_value()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_fields() {
        let packet = Packet::request("conn0.tab3", "attach");
        assert_eq!(packet.to(), Some("conn0.tab3"));
        assert_eq!(packet.request_type(), Some("attach"));
        assert_eq!(packet.from_actor(), None);
    }

    #[test]
    fn error_reply_shape() {
        let packet = Packet::error("root", "noSuchActor", None);
        assert_eq!(
            packet.into_value(),
            json!({"from": "root", "error": "noSuchActor"})
        );
    }

    #[test]
    fn non_string_address_is_ignored() {
        let packet = Packet::try_from(json!({"to": 12, "type": "ping"})).unwrap();
        assert_eq!(packet.to(), None);
        assert_eq!(packet.request_type(), Some("ping"));
    }

    #[test]
    fn rejects_non_objects() {
        let err = Packet::try_from(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, PacketError::NotAnObject("array")));
    }

    #[test]
    fn serializes_transparently() {
        let packet = Packet::reply("conn1.root1").with("applicationType", "browser");
        let text = serde_json::to_string(&packet).unwrap();
        assert_eq!(text, r#"{"from":"conn1.root1","applicationType":"browser"}"#);
    }
}
