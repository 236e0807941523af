//! Notification payload parsing.
//!
//! The backend does not put routing data at the top level of the push
//! payload. It packs it into `ejson`, a string field holding a serialized
//! JSON document:
//!
//! ```text
//! {
//!   "aps": { ... },
//!   "ejson": "{\"host\":\"https://chat.example.com/\",\"rid\":\"ROOM\",
//!              \"type\":\"c\",\"sender\":{\"username\":\"alice\"}}"
//! }
//! ```
//!
//! Everything inside is untrusted: a missing or non-string field rejects the
//! whole payload.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::router::RouteError;

/// Top-level payload field carrying the embedded routing document.
pub const EMBEDDED_FIELD: &str = "ejson";

/// Classification of a conversation.
///
/// Serialized as its wire tag. Deserializes through
/// [`ConversationKind::from_tag`], so unknown tags read from disk become
/// [`ConversationKind::Group`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKind {
    /// One-to-one conversation (`"d"`).
    Direct,
    /// Public channel (`"c"`).
    Channel,
    /// Private group (`"p"`).
    Group,
}

impl ConversationKind {
    /// Map a kind tag to a kind. Unknown tags fall back to [`ConversationKind::Group`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "d" => Self::Direct,
            "c" => Self::Channel,
            "p" => Self::Group,
            other => {
                log::debug!("[Notification] Unknown conversation kind {other:?}, using group");
                Self::Group
            }
        }
    }

    /// Wire tag of this kind.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Direct => "d",
            Self::Channel => "c",
            Self::Group => "p",
        }
    }

    /// Whether this is a one-to-one conversation.
    #[must_use]
    pub fn is_direct(self) -> bool {
        self == Self::Direct
    }
}

impl Serialize for ConversationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for ConversationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

/// Routing data extracted from one inbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Origin server address as embedded by the backend.
    pub host: String,
    /// Username of the message author.
    pub sender_username: String,
    /// Target conversation id (`rid`).
    pub conversation_id: String,
    /// Target conversation kind.
    pub conversation_kind: ConversationKind,
}

impl NotificationEvent {
    /// Parse the embedded routing document of a raw payload.
    pub fn from_payload(payload: &Value) -> Result<Self, RouteError> {
        let embedded = payload
            .get(EMBEDDED_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| RouteError::MalformedPayload(format!("missing {EMBEDDED_FIELD}")))?;

        let document: Value = serde_json::from_str(embedded).map_err(|e| {
            RouteError::MalformedPayload(format!("{EMBEDDED_FIELD} is not JSON: {e}"))
        })?;
        if !document.is_object() {
            return Err(RouteError::MalformedPayload(format!(
                "{EMBEDDED_FIELD} is not an object"
            )));
        }

        let host = required_str(&document, &["host"])?;
        let sender_username = required_str(&document, &["sender", "username"])?;
        let kind_tag = required_str(&document, &["type"])?;
        let conversation_id = required_str(&document, &["rid"])?;

        Ok(Self {
            host,
            sender_username,
            conversation_id,
            conversation_kind: ConversationKind::from_tag(&kind_tag),
        })
    }
}

fn required_str(document: &Value, path: &[&str]) -> Result<String, RouteError> {
    path.iter()
        .try_fold(document, |value, key| value.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RouteError::MalformedPayload(format!("missing {}", path.join("."))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(document: &Value) -> Value {
        json!({ "aps": { "alert": "hi" }, "ejson": document.to_string() })
    }

    fn full_document() -> Value {
        json!({
            "host": "https://chat.example.com/",
            "rid": "ROOM1",
            "type": "c",
            "sender": { "_id": "u1", "username": "alice" },
        })
    }

    #[test]
    fn test_parse_full_payload() {
        let event = NotificationEvent::from_payload(&payload(&full_document())).unwrap();
        assert_eq!(
            event,
            NotificationEvent {
                host: "https://chat.example.com/".to_string(),
                sender_username: "alice".to_string(),
                conversation_id: "ROOM1".to_string(),
                conversation_kind: ConversationKind::Channel,
            }
        );
    }

    #[test]
    fn test_each_required_field_is_required() {
        for field in ["host", "rid", "type", "sender"] {
            let mut document = full_document();
            document.as_object_mut().unwrap().remove(field);
            let result = NotificationEvent::from_payload(&payload(&document));
            assert!(
                matches!(result, Err(RouteError::MalformedPayload(_))),
                "missing {field} should reject"
            );
        }
    }

    #[test]
    fn test_sender_without_username_rejects() {
        let mut document = full_document();
        document["sender"] = json!({ "_id": "u1" });
        assert!(NotificationEvent::from_payload(&payload(&document)).is_err());
    }

    #[test]
    fn test_non_string_field_rejects() {
        let mut document = full_document();
        document["rid"] = json!(42);
        assert!(NotificationEvent::from_payload(&payload(&document)).is_err());
    }

    #[test]
    fn test_missing_or_malformed_embedded_document() {
        assert!(NotificationEvent::from_payload(&json!({ "aps": {} })).is_err());
        assert!(NotificationEvent::from_payload(&json!({ "ejson": "{not json" })).is_err());
        assert!(NotificationEvent::from_payload(&json!({ "ejson": "[1,2]" })).is_err());
        assert!(NotificationEvent::from_payload(&json!({ "ejson": 5 })).is_err());
    }

    #[test]
    fn test_top_level_fields_are_ignored() {
        // Routing data only counts when it is inside the embedded document.
        let raw = json!({
            "host": "https://chat.example.com",
            "rid": "ROOM1",
            "type": "c",
            "sender": { "username": "alice" },
        });
        assert!(NotificationEvent::from_payload(&raw).is_err());
    }

    #[test]
    fn test_unknown_kind_defaults_to_group() {
        let mut document = full_document();
        document["type"] = json!("l");
        let event = NotificationEvent::from_payload(&payload(&document)).unwrap();
        assert_eq!(event.conversation_kind, ConversationKind::Group);
    }

    #[test]
    fn test_kind_serde_uses_tags_and_tolerates_unknown() {
        assert_eq!(serde_json::to_value(ConversationKind::Direct).unwrap(), json!("d"));
        let kinds: Vec<ConversationKind> = serde_json::from_value(json!(["c", "l", "p"])).unwrap();
        assert_eq!(
            kinds,
            vec![
                ConversationKind::Channel,
                ConversationKind::Group,
                ConversationKind::Group,
            ]
        );
        assert!(serde_json::from_value::<ConversationKind>(json!(3)).is_err());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(ConversationKind::from_tag("d"), ConversationKind::Direct);
        assert_eq!(ConversationKind::from_tag("c"), ConversationKind::Channel);
        assert_eq!(ConversationKind::from_tag("p"), ConversationKind::Group);
        for kind in [
            ConversationKind::Direct,
            ConversationKind::Channel,
            ConversationKind::Group,
        ] {
            assert_eq!(ConversationKind::from_tag(kind.tag()), kind);
        }
        assert!(ConversationKind::Direct.is_direct());
        assert!(!ConversationKind::Channel.is_direct());
    }
}
