use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SessionError};

/// Prefix of generated correlation keys (`event1`, `event2`, ...).
pub const KEY_PREFIX: &str = "event";

/// Application-level token linking a command to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Counter of a generated `event<N>` key, `None` for any other key.
    pub fn sequence(&self) -> Option<u64> {
        self.0.strip_prefix(KEY_PREFIX)?.parse().ok()
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Per-session source of `event<N>` keys, starting at 1.
#[derive(Debug)]
pub struct KeyGenerator {
    next: u64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_key(&mut self) -> CorrelationKey {
        let key = CorrelationKey(format!("{KEY_PREFIX}{}", self.next));
        self.next += 1;
        key
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound command envelope.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommandMessage<'a> {
    pub event: &'a CorrelationKey,
    pub cmd: &'a str,
    pub args: &'a Value,
}

impl CommandMessage<'_> {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Inbound envelope: a response to a command or a peripheral-initiated event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub event: CorrelationKey,
    /// Required, though it may be `null`.
    pub response: Value,
    /// Any other fields the peripheral sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InboundMessage {
    /// Decode a reassembled message.
    ///
    /// Fails with [`SessionError::MalformedMessage`] when the bytes are not
    /// UTF-8, not a JSON object, have no string `event` field, or have no
    /// `response` field.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|err| SessionError::MalformedMessage(format!("not utf-8: {err}")))?;
        serde_json::from_str(text).map_err(|err| SessionError::MalformedMessage(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn keys_count_from_one() {
        let mut keys = KeyGenerator::new();
        assert_eq!(keys.next_key().as_str(), "event1");
        assert_eq!(keys.next_key().as_str(), "event2");
    }

    #[test]
    fn sequence_reads_generated_keys_only() {
        assert_eq!(CorrelationKey::new("event12").sequence(), Some(12));
        assert_eq!(CorrelationKey::new("button").sequence(), None);
        assert_eq!(CorrelationKey::new("eventx").sequence(), None);
    }

    #[test]
    fn command_wire_shape() {
        let key = CorrelationKey::new("event1");
        let args = json!({});
        let bytes = CommandMessage {
            event: &key,
            cmd: "get_config",
            args: &args,
        }
        .to_bytes()
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"event": "event1", "cmd": "get_config", "args": {}}));
    }

    #[test]
    fn parses_response_with_extra_fields() {
        let msg =
            InboundMessage::parse(br#"{"event":"event3","response":{"ok":true},"rssi":-60}"#)
                .unwrap();
        assert_eq!(msg.event.as_str(), "event3");
        assert_eq!(msg.response, json!({"ok": true}));
        assert_eq!(msg.extra.get("rssi"), Some(&json!(-60)));
    }

    #[test]
    fn response_field_is_required() {
        let err = InboundMessage::parse(br#"{"event":"event1"}"#).unwrap_err();
        assert!(matches!(err, SessionError::MalformedMessage(_)));

        let msg = InboundMessage::parse(br#"{"event":"event1","response":null}"#).unwrap();
        assert_eq!(msg.response, Value::Null);
    }

    #[test]
    fn rejects_malformed_payloads() {
        let cases: [&[u8]; 4] = [b"not json", b"[1,2]", br#"{"response":{}}"#, &[0xff, 0xfe]];
        for bad in cases {
            let err = InboundMessage::parse(bad).unwrap_err();
            assert!(matches!(err, SessionError::MalformedMessage(_)));
        }
    }
}
