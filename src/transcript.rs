//! Ordered chat transcript with constant-time lookup by message id.

use std::collections::HashMap;

use crate::model::{ChatMessage, MessageId};

/// Messages in insertion order plus an id → position index.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    index: HashMap<MessageId, usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a transcript from messages already in order.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        let mut transcript = Self::new();
        for message in messages {
            transcript.push(message);
        }
        transcript
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.index.get(id).map(|&pos| &self.messages[pos])
    }

    /// Append a message. A message whose id is already present replaces that entry in place.
    pub fn push(&mut self, message: ChatMessage) {
        if let Some(&pos) = self.index.get(message.id()) {
            self.messages[pos] = message;
            return;
        }
        self.index.insert(message.id().clone(), self.messages.len());
        self.messages.push(message);
    }

    /// Replace the entry with the same id. Returns `false` if no such entry exists.
    pub fn replace(&mut self, message: ChatMessage) -> bool {
        match self.index.get(message.id()) {
            Some(&pos) => {
                self.messages[pos] = message;
                true
            }
            None => false,
        }
    }

    /// Whether any bot message carries non-whitespace text.
    pub fn has_bot_content(&self) -> bool {
        self.messages.iter().any(ChatMessage::has_bot_content)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.index.clear();
    }
}
