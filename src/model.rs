//! Chat transcript data model and webhook payload types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Substring marking a human-originated message in a stored session.
const HUMAN_MESSAGE_MARKER: &str = "HumanMessage";

/// Opaque message identifier.
///
/// Fresh messages get a UUID v4; messages restored from a previous session
/// use their position in the stored history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a new random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// A single entry in the chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatMessage {
    Text {
        id: MessageId,
        sender: Sender,
        text: String,
    },
    /// A bot message rendered by a named UI component.
    Component {
        id: MessageId,
        sender: Sender,
        key: String,
        #[serde(default)]
        arguments: Map<String, Value>,
    },
}

impl ChatMessage {
    /// Create a user text message with a fresh id.
    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage::Text {
            id: MessageId::new(),
            sender: Sender::User,
            text: text.into(),
        }
    }

    /// Create a bot text message with a fresh id.
    pub fn bot(text: impl Into<String>) -> Self {
        ChatMessage::Text {
            id: MessageId::new(),
            sender: Sender::Bot,
            text: text.into(),
        }
    }

    /// Create an empty bot message, the starting point of every streamed reply.
    pub fn empty_bot() -> Self {
        Self::bot(String::new())
    }

    pub fn id(&self) -> &MessageId {
        match self {
            ChatMessage::Text { id, .. } => id,
            ChatMessage::Component { id, .. } => id,
        }
    }

    pub fn sender(&self) -> Sender {
        match self {
            ChatMessage::Text { sender, .. } => *sender,
            ChatMessage::Component { sender, .. } => *sender,
        }
    }

    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match self {
            ChatMessage::Text { text, .. } => Some(text),
            ChatMessage::Component { .. } => None,
        }
    }

    /// Copy of this message with `text` replaced. Component messages are returned unchanged.
    pub fn with_text(&self, new_text: impl Into<String>) -> Self {
        match self {
            ChatMessage::Text { id, sender, .. } => ChatMessage::Text {
                id: id.clone(),
                sender: *sender,
                text: new_text.into(),
            },
            ChatMessage::Component { .. } => self.clone(),
        }
    }

    /// True for bot text messages that carry something other than whitespace.
    pub fn has_bot_content(&self) -> bool {
        self.sender() == Sender::Bot && self.text().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Parameters for one outgoing user message.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    /// Text typed by the user
    pub message: String,

    /// Prior transcript forwarded to the webhook (currently always empty)
    pub history: Vec<ChatMessage>,

    /// Session the message belongs to
    pub session_id: String,
}

/// JSON object returned by the webhook for a non-streaming send.
///
/// The payload shape is workflow-defined, so every key is kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SendMessageResponse(pub Map<String, Value>);

impl SendMessageResponse {
    /// Interpret an arbitrary JSON body. Arrays yield their first object.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Array(items) => items
                .into_iter()
                .find_map(|item| match item {
                    Value::Object(map) => Some(Self(map)),
                    _ => None,
                })
                .unwrap_or_default(),
            _ => Self::default(),
        }
    }

    /// Whether the webhook started an asynchronous execution instead of answering.
    pub fn execution_started(&self) -> bool {
        self.0
            .get("executionStarted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.0.get("executionId").and_then(Value::as_str)
    }

    /// Text to show for this response.
    ///
    /// Precedence is `output`, `text`, `message`; when none yields text and the
    /// object is non-empty, the whole object is pretty-printed.
    pub fn display_text(&self) -> String {
        let text = ["output", "text", "message"]
            .iter()
            .find_map(|key| match self.0.get(*key) {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(serde_json::to_string_pretty(other).unwrap_or_default()),
            })
            .unwrap_or_default();

        if text.is_empty() && !self.0.is_empty() {
            return serde_json::to_string_pretty(&self.0).unwrap_or_default();
        }

        text
    }
}

/// Identifier of a stored message: either a plain string or a serialisation path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StoredMessageId {
    Single(String),
    Path(Vec<String>),
}

impl StoredMessageId {
    fn contains(&self, needle: &str) -> bool {
        match self {
            StoredMessageId::Single(id) => id.contains(needle),
            StoredMessageId::Path(parts) => parts.iter().any(|p| p.contains(needle)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessageKwargs {
    #[serde(default)]
    pub content: String,
}

/// One message of a previously persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: StoredMessageId,
    #[serde(default)]
    pub kwargs: StoredMessageKwargs,
}

impl StoredMessage {
    pub fn sender(&self) -> Sender {
        if self.id.contains(HUMAN_MESSAGE_MARKER) {
            Sender::User
        } else {
            Sender::Bot
        }
    }

    /// Convert into a transcript message at the given history position.
    pub fn into_chat_message(self, index: usize) -> ChatMessage {
        ChatMessage::Text {
            id: MessageId::from(index.to_string()),
            sender: self.sender(),
            text: self.kwargs.content,
        }
    }
}

/// Response of the previous-session lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadPreviousSessionResponse {
    #[serde(default)]
    pub data: Vec<StoredMessage>,
}
