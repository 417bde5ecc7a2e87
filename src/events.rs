//! Transcript change notifications for the render layer.
//!
//! The core never touches rendering. It publishes [`ChatEvent`]s on a
//! broadcast channel; scroll requests are held by a [`ScrollScheduler`] and
//! only published when the render layer reaches its next settle point, so a
//! burst of chunks yields a single scroll.

use tokio::sync::broadcast;
use tracing::trace;

use crate::model::MessageId;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A change the render layer may react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    MessageAppended(MessageId),
    MessageUpdated(MessageId),
    /// The whole transcript was replaced or cleared.
    TranscriptReset,
    WaitingChanged(bool),
    ScrollToBottom,
}

/// Coalesces scroll requests until the next settle point.
#[derive(Debug, Default)]
pub struct ScrollScheduler {
    pending: bool,
}

impl ScrollScheduler {
    /// Request a scroll at the next settle point.
    ///
    /// Returns `true` if this call scheduled it, `false` if one was already pending.
    pub fn schedule(&mut self) -> bool {
        let newly = !self.pending;
        self.pending = true;
        newly
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Consume the pending request, if any.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

/// Publisher side of the event subscription.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChatEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ChatEvent) {
        trace!(?event, "chat event");
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_requests_coalesce() {
        let mut scroll = ScrollScheduler::default();
        assert!(scroll.schedule());
        assert!(!scroll.schedule());
        assert!(scroll.is_pending());

        assert!(scroll.take());
        assert!(!scroll.take());
        assert!(!scroll.is_pending());
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(ChatEvent::TranscriptReset);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(ChatEvent::WaitingChanged(true));
        bus.emit(ChatEvent::ScrollToBottom);

        assert_eq!(rx.recv().await.unwrap(), ChatEvent::WaitingChanged(true));
        assert_eq!(rx.recv().await.unwrap(), ChatEvent::ScrollToBottom);
    }
}
