use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const ENVELOPE_URL_VERIFICATION: &str = "url_verification";
pub const SCHEMA_V2: &str = "2.0";
pub const EVENT_MESSAGE_RECEIVE: &str = "im.message.receive_v1";

/// Webhook body as pushed by the platform.
///
/// Every field is optional: the body has already been accepted as JSON by the
/// time this is built, and odd shapes must degrade to "ignored", not to an error.
#[derive(Debug, Clone, Default)]
pub struct InboundEnvelope {
    pub kind: Option<String>,
    pub schema: Option<String>,
    pub challenge: Value,
    pub header: EventHeader,
    pub event: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventHeader {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
}

impl InboundEnvelope {
    pub fn from_json(raw: &Value) -> Self {
        let header = raw.get("header");
        Self {
            kind: str_field(raw, "type"),
            schema: str_field(raw, "schema"),
            challenge: raw.get("challenge").cloned().unwrap_or(Value::Null),
            header: EventHeader {
                event_id: header.and_then(|h| str_field(h, "event_id")),
                event_type: header.and_then(|h| str_field(h, "event_type")),
            },
            event: raw.get("event").cloned().unwrap_or(Value::Null),
        }
    }

    pub fn is_url_verification(&self) -> bool {
        self.kind.as_deref() == Some(ENVELOPE_URL_VERIFICATION)
    }

    /// An explicit schema other than 2.0 (legacy callbacks). A missing schema is accepted.
    pub fn has_unsupported_schema(&self) -> bool {
        self.schema.as_deref().is_some_and(|s| s != SCHEMA_V2)
    }

    pub fn is_message_receive(&self) -> bool {
        self.header.event_type.as_deref() == Some(EVENT_MESSAGE_RECEIVE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Post,
    Image,
    File,
    Audio,
    Sticker,
    Other(String),
}

impl From<&str> for MessageType {
    fn from(raw: &str) -> Self {
        match raw {
            "text" => Self::Text,
            "post" => Self::Post,
            "image" => Self::Image,
            "file" => Self::File,
            "audio" => Self::Audio,
            "sticker" => Self::Sticker,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Post => "post",
            Self::Image => "image",
            Self::File => "file",
            Self::Audio => "audio",
            Self::Sticker => "sticker",
            Self::Other(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

/// `event.message` of an `im.message.receive_v1` callback.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub chat_id: Option<String>,
    pub message_id: Option<String>,
    pub message_type: MessageType,
    /// JSON-encoded string whose schema depends on `message_type`.
    pub content: String,
    pub sender_open_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    #[serde(default)]
    text: String,
}

impl MessageEvent {
    pub fn from_event(event: &Value) -> Self {
        let message = event.get("message").unwrap_or(&Value::Null);
        Self {
            chat_id: str_field(message, "chat_id"),
            message_id: str_field(message, "message_id"),
            message_type: message
                .get("message_type")
                .and_then(|v| v.as_str())
                .map(MessageType::from)
                .unwrap_or_else(|| MessageType::Other(String::new())),
            content: str_field(message, "content").unwrap_or_else(|| "{}".to_string()),
            sender_open_id: event
                .get("sender")
                .and_then(|s| s.get("sender_id"))
                .and_then(|s| str_field(s, "open_id")),
        }
    }

    /// Decode `content` and return its trimmed `text`.
    ///
    /// Decode failures are errors; a decoded object without `text` yields an empty string.
    pub fn text(&self) -> Result<String, serde_json::Error> {
        let value: Value = serde_json::from_str(&self.content)?;
        if !value.is_object() {
            return Ok(String::new());
        }
        let content: TextContent = serde_json::from_value(value)?;
        Ok(content.text.trim().to_string())
    }

    pub fn reply_target(&self) -> Option<ReplyTarget> {
        ReplyTarget::resolve(self.message_id.as_deref(), self.chat_id.as_deref())
    }
}

/// Where a reply goes. Threaded replies are preferred; the chat is the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReplyTarget {
    Message { message_id: String },
    Chat { chat_id: String },
}

impl ReplyTarget {
    pub fn resolve(message_id: Option<&str>, chat_id: Option<&str>) -> Option<Self> {
        if let Some(id) = message_id.filter(|s| !s.is_empty()) {
            return Some(Self::Message {
                message_id: id.to_string(),
            });
        }
        chat_id.filter(|s| !s.is_empty()).map(|id| Self::Chat {
            chat_id: id.to_string(),
        })
    }
}

impl fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message { message_id } => write!(f, "message:{}", message_id),
            Self::Chat { chat_id } => write!(f, "chat:{}", chat_id),
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
