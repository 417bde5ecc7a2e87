//! Conversation store: transcript, session identity and message sending.

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::events::{ChatEvent, EventBus, ScrollScheduler};
use crate::model::{ChatMessage, MessageId, SendMessageResponse, SendRequest};
use crate::options::ChatOptions;
use crate::router::ChunkRouter;
use crate::session::{SessionStorage, StorageError, SESSION_ID_KEY};
use crate::transcript::Transcript;
use crate::transport::{Transport, TransportError};

/// Text of the synthetic message shown when a send fails.
pub const ERROR_MESSAGE_TEXT: &str = "Error: Failed to receive response";

/// Text shown when a streaming send ends without any chunk.
pub const NO_RESPONSE_TEXT: &str = "[No response received. This could happen if streaming is enabled in the trigger but disabled in agent node(s)]";

/// Transcript inconsistencies detected while applying an update.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("Message {0} is not in the transcript")]
    MessageNotFound(MessageId),
}

/// Errors of the session operations that report failures to the caller.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Mutable conversation state shared by everything handling one send.
#[derive(Debug, Default)]
pub struct ConversationState {
    transcript: Transcript,
    waiting: bool,
    scroll: ScrollScheduler,
    events: EventBus,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn scroll_pending(&self) -> bool {
        self.scroll.is_pending()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn append(&mut self, message: ChatMessage) {
        let id = message.id().clone();
        self.transcript.push(message);
        self.events.emit(ChatEvent::MessageAppended(id));
    }

    /// Rewrite the transcript entry carrying the same id.
    pub fn update(&mut self, message: ChatMessage) -> Result<(), StoreError> {
        let id = message.id().clone();
        if !self.transcript.replace(message) {
            return Err(StoreError::MessageNotFound(id));
        }
        self.events.emit(ChatEvent::MessageUpdated(id));
        Ok(())
    }

    /// Update the message in place, or append it if the transcript lacks it.
    pub fn upsert(&mut self, message: ChatMessage) {
        if self.transcript.contains(message.id()) {
            let id = message.id().clone();
            self.transcript.replace(message);
            self.events.emit(ChatEvent::MessageUpdated(id));
        } else {
            self.append(message);
        }
    }

    pub fn set_waiting(&mut self, waiting: bool) {
        if self.waiting != waiting {
            self.waiting = waiting;
            self.events.emit(ChatEvent::WaitingChanged(waiting));
        }
    }

    pub fn schedule_scroll(&mut self) {
        self.scroll.schedule();
    }

    /// Replace the whole transcript.
    pub fn reset(&mut self, messages: Vec<ChatMessage>) {
        self.transcript = Transcript::from_messages(messages);
        self.events.emit(ChatEvent::TranscriptReset);
    }

    /// Publish the pending scroll request, if any.
    pub fn settle(&mut self) -> bool {
        if self.scroll.take() {
            self.events.emit(ChatEvent::ScrollToBottom);
            true
        } else {
            false
        }
    }
}

/// The chat's single source of truth.
///
/// Construct one per chat and hand it to whatever drives the UI. Sends take
/// `&mut self`, so a new session can only start once the in-flight send has
/// settled; there is no way to cancel a send midway.
///
/// # Example
/// ```ignore
/// let transport = WebhookClient::new(options.webhook.clone())?;
/// let mut store = ConversationStore::new(transport, MemoryStorage::new(), options);
/// let mut events = store.subscribe();
///
/// store.load_previous_session().await?;
/// store.send_message("Hello!").await;
/// store.settle();
/// ```
pub struct ConversationStore<T, S> {
    transport: T,
    storage: S,
    options: ChatOptions,
    session_id: Option<String>,
    state: ConversationState,
}

impl<T: Transport, S: SessionStorage> ConversationStore<T, S> {
    /// Create a store with an empty transcript and no session yet.
    ///
    /// # Arguments
    /// - `transport`: Backend receiving sends and history lookups
    /// - `storage`: Where the session id persists between runs
    /// - `options`: Streaming, history restore and greeting settings
    ///
    /// # Returns
    /// A new store; call `load_previous_session` to restore history
    pub fn new(transport: T, storage: S, options: ChatOptions) -> Self {
        Self {
            transport,
            storage,
            options,
            session_id: None,
            state: ConversationState::new(),
        }
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Current session id, set by the first send or a restore.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Transcript in display order, without the initial greetings.
    pub fn messages(&self) -> &[ChatMessage] {
        self.state.transcript().messages()
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// True from the start of a send until its first chunk or its end.
    pub fn is_waiting(&self) -> bool {
        self.state.is_waiting()
    }

    /// Subscribe to transcript change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.state.subscribe()
    }

    /// Called by the render layer at each settle point; emits at most one scroll.
    pub fn settle(&mut self) -> bool {
        self.state.settle()
    }

    /// Greeting messages to display ahead of the transcript.
    ///
    /// Ids are fresh on every call.
    pub fn initial_messages(&self) -> Vec<ChatMessage> {
        self.options
            .initial_messages
            .iter()
            .map(|text| ChatMessage::bot(text.as_str()))
            .collect()
    }

    /// Send a user message and fold the reply into the transcript.
    ///
    /// Never fails: transport errors become a synthetic error message.
    ///
    /// # Arguments
    /// - `text`: The user's message
    ///
    /// # Returns
    /// The raw response when the webhook started an asynchronous execution
    /// instead of answering; `None` otherwise
    pub async fn send_message(&mut self, text: impl Into<String>) -> Option<SendMessageResponse> {
        let text = text.into();
        let session_id = self.ensure_session_id();

        self.state.append(ChatMessage::user(text.clone()));
        self.state.set_waiting(true);
        self.state.schedule_scroll();

        let request = SendRequest {
            message: text,
            history: Vec::new(),
            session_id,
        };

        let mut received = None;
        let result = if self.options.enable_streaming {
            self.send_streaming(&request, &mut received).await.map(|()| None)
        } else {
            self.send_non_streaming(&request, &mut received).await
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.handle_message_error(&e, received);
                None
            }
        };

        self.state.set_waiting(false);
        self.state.schedule_scroll();
        response
    }

    async fn send_streaming(
        &mut self,
        request: &SendRequest,
        received: &mut Option<ChatMessage>,
    ) -> Result<(), TransportError> {
        let mut router = ChunkRouter::new(&mut self.state);
        let result = self
            .transport
            .send_message_streaming(request, &mut router)
            .await;
        *received = router.into_received();

        let outcome = result?;
        if !outcome.has_received_chunks {
            debug!(session_id = %request.session_id, "stream ended without chunks");
            self.handle_empty_stream(received);
        }
        Ok(())
    }

    fn handle_empty_stream(&mut self, received: &mut Option<ChatMessage>) {
        let message = match received.take() {
            Some(message) if self.state.transcript().has_bot_content() => message,
            _ => {
                let message = ChatMessage::empty_bot();
                self.state.append(message.clone());
                message
            }
        };

        let message = message.with_text(NO_RESPONSE_TEXT);
        self.state.upsert(message.clone());
        *received = Some(message);
    }

    async fn send_non_streaming(
        &mut self,
        request: &SendRequest,
        received: &mut Option<ChatMessage>,
    ) -> Result<Option<SendMessageResponse>, TransportError> {
        let response = self.transport.send_message(request).await?;

        if response.execution_started() {
            info!(
                execution_id = ?response.execution_id(),
                "webhook started an execution, no reply to show"
            );
            return Ok(Some(response));
        }

        let message = ChatMessage::bot(response.display_text());
        self.state.append(message.clone());
        *received = Some(message);
        Ok(None)
    }

    fn handle_message_error(&mut self, error: &TransportError, received: Option<ChatMessage>) {
        let message = received
            .unwrap_or_else(ChatMessage::empty_bot)
            .with_text(ERROR_MESSAGE_TEXT);
        self.state.upsert(message);

        error!(error = %error, "chat api error");
    }

    fn ensure_session_id(&mut self) -> String {
        self.session_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone()
    }

    /// Restore the transcript of the stored session.
    ///
    /// Does nothing and returns `None` when disabled in the options. Otherwise
    /// returns the session id that was looked up; it becomes the current
    /// session only if the webhook returned at least one message.
    pub async fn load_previous_session(&mut self) -> Result<Option<String>, ChatError> {
        if !self.options.load_previous_session {
            return Ok(None);
        }

        let session_id = match self.storage.get_item(SESSION_ID_KEY) {
            Ok(Some(id)) => id,
            Ok(None) => uuid::Uuid::new_v4().to_string(),
            Err(e) => {
                warn!(error = %e, "could not read stored session id, using a new one");
                uuid::Uuid::new_v4().to_string()
            }
        };

        let response = self.transport.load_previous_session(&session_id).await?;
        let messages: Vec<ChatMessage> = response
            .data
            .into_iter()
            .enumerate()
            .map(|(index, message)| message.into_chat_message(index))
            .collect();

        info!(%session_id, count = messages.len(), "previous session loaded");
        let restored = !messages.is_empty();
        self.state.reset(messages);

        if restored {
            self.session_id = Some(session_id.clone());
        }

        Ok(Some(session_id))
    }

    /// Clear the conversation and start a new persisted session.
    ///
    /// The new session is active even if persisting its id fails; the
    /// storage error is still returned.
    ///
    /// # Returns
    /// The new session id, or the storage error from persisting it
    pub fn start_new_session(&mut self) -> Result<String, ChatError> {
        self.state.reset(Vec::new());
        self.state.set_waiting(false);

        let session_id = uuid::Uuid::new_v4().to_string();
        self.session_id = Some(session_id.clone());
        info!(%session_id, "new session started");

        self.storage.set_item(SESSION_ID_KEY, &session_id)?;
        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LoadPreviousSessionResponse, Sender};
    use crate::session::MemoryStorage;
    use crate::transport::{EventStream, StreamEvent};
    use async_trait::async_trait;
    use futures::{stream, StreamExt};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeTransport {
        response: Option<serde_json::Value>,
        events: Vec<StreamEvent>,
        fail_after: Option<usize>,
        previous: LoadPreviousSessionResponse,
        requests: Mutex<Vec<SendRequest>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send_message(
            &self,
            request: &SendRequest,
        ) -> Result<SendMessageResponse, TransportError> {
            self.requests.lock().push(request.clone());
            match &self.response {
                Some(value) => Ok(SendMessageResponse::from_value(value.clone())),
                None => Err(TransportError::Config("offline".into())),
            }
        }

        async fn open_stream(&self, request: &SendRequest) -> Result<EventStream, TransportError> {
            self.requests.lock().push(request.clone());
            let mut items: Vec<Result<StreamEvent, TransportError>> =
                self.events.iter().cloned().map(Ok).collect();
            if let Some(at) = self.fail_after {
                items.truncate(at);
                items.push(Err(TransportError::Config("connection reset".into())));
            }
            Ok(stream::iter(items).boxed())
        }

        async fn load_previous_session(
            &self,
            _session_id: &str,
        ) -> Result<LoadPreviousSessionResponse, TransportError> {
            Ok(self.previous.clone())
        }
    }

    fn chunk(content: &str, node_id: Option<&str>) -> StreamEvent {
        StreamEvent::Chunk {
            content: content.into(),
            node_id: node_id.map(str::to_string),
            run_index: None,
        }
    }

    fn store(
        transport: FakeTransport,
        streaming: bool,
    ) -> ConversationStore<FakeTransport, Arc<MemoryStorage>> {
        let options = ChatOptions::default().with_streaming(streaming);
        ConversationStore::new(transport, Arc::new(MemoryStorage::new()), options)
    }

    fn bot_texts<T: Transport, S: SessionStorage>(store: &ConversationStore<T, S>) -> Vec<String> {
        store
            .messages()
            .iter()
            .filter(|m| m.sender() == Sender::Bot)
            .map(|m| m.text().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_non_streaming_send() {
        let transport = FakeTransport {
            response: Some(json!({"output": "Hi!"})),
            ..Default::default()
        };
        let mut store = store(transport, false);

        assert!(store.send_message("Hello").await.is_none());
        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.messages()[0].text(), Some("Hello"));
        assert_eq!(store.messages()[0].sender(), Sender::User);
        assert_eq!(bot_texts(&store), vec!["Hi!"]);
        assert!(!store.is_waiting());

        let requests = store.transport.requests.lock();
        assert_eq!(requests[0].message, "Hello");
        assert_eq!(Some(requests[0].session_id.as_str()), store.session_id());
    }

    #[tokio::test]
    async fn test_execution_started_returns_response() {
        let transport = FakeTransport {
            response: Some(json!({"executionStarted": true, "executionId": "7"})),
            ..Default::default()
        };
        let mut store = store(transport, false);

        let response = store.send_message("run it").await.unwrap();
        assert_eq!(response.execution_id(), Some("7"));
        assert!(bot_texts(&store).is_empty());
        assert!(!store.is_waiting());
        assert!(store.settle());
    }

    #[tokio::test]
    async fn test_non_streaming_error() {
        let mut store = store(FakeTransport::default(), false);
        store.send_message("Hello").await;

        assert_eq!(bot_texts(&store), vec![ERROR_MESSAGE_TEXT]);
        assert!(!store.is_waiting());
    }

    #[tokio::test]
    async fn test_streaming_send() {
        let transport = FakeTransport {
            events: vec![chunk("Hel", None), chunk("", None), chunk("lo", None)],
            ..Default::default()
        };
        let mut store = store(transport, true);

        store.send_message("Hi").await;
        assert_eq!(bot_texts(&store), vec!["Hello"]);
        assert!(!store.is_waiting());
    }

    #[tokio::test]
    async fn test_streaming_without_chunks() {
        let transport = FakeTransport {
            events: vec![
                StreamEvent::Begin {
                    node_id: "agent".into(),
                    run_index: None,
                },
                StreamEvent::End {
                    node_id: "agent".into(),
                    run_index: None,
                },
            ],
            ..Default::default()
        };
        let mut store = store(transport, true);

        store.send_message("Hi").await;
        assert_eq!(bot_texts(&store), vec![NO_RESPONSE_TEXT]);
    }

    #[tokio::test]
    async fn test_streaming_error_reuses_default_message() {
        let transport = FakeTransport {
            events: vec![chunk("partial", None), chunk("more", None)],
            fail_after: Some(1),
            ..Default::default()
        };
        let mut store = store(transport, true);

        store.send_message("Hi").await;
        assert_eq!(bot_texts(&store), vec![ERROR_MESSAGE_TEXT]);
        assert!(!store.is_waiting());
    }

    #[tokio::test]
    async fn test_streaming_error_after_run_chunks() {
        let transport = FakeTransport {
            events: vec![chunk("from node", Some("agent"))],
            fail_after: Some(1),
            ..Default::default()
        };
        let mut store = store(transport, true);

        store.send_message("Hi").await;
        assert_eq!(bot_texts(&store), vec!["from node", ERROR_MESSAGE_TEXT]);
    }

    #[tokio::test]
    async fn test_session_id_is_stable_across_sends() {
        let transport = FakeTransport {
            response: Some(json!({"output": "ok"})),
            ..Default::default()
        };
        let mut store = store(transport, false);

        store.send_message("one").await;
        store.send_message("two").await;

        let requests = store.transport.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].session_id, requests[1].session_id);
    }

    #[tokio::test]
    async fn test_events_published() {
        let transport = FakeTransport {
            response: Some(json!({"output": "ok"})),
            ..Default::default()
        };
        let mut store = store(transport, false);
        let mut events = store.subscribe();

        store.send_message("hello").await;
        store.settle();

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }

        assert!(matches!(received[0], ChatEvent::MessageAppended(_)));
        assert_eq!(received[1], ChatEvent::WaitingChanged(true));
        assert!(matches!(received[2], ChatEvent::MessageAppended(_)));
        assert_eq!(received[3], ChatEvent::WaitingChanged(false));
        assert_eq!(received[4], ChatEvent::ScrollToBottom);
        assert_eq!(received.len(), 5);
    }

    #[tokio::test]
    async fn test_load_previous_session() {
        let transport = FakeTransport {
            previous: serde_json::from_value(json!({
                "data": [
                    {"id": ["langchain_core", "messages", "HumanMessage"], "kwargs": {"content": "hi"}},
                    {"id": ["langchain_core", "messages", "AIMessage"], "kwargs": {"content": "hello"}}
                ]
            }))
            .unwrap(),
            ..Default::default()
        };
        let mut store = store(transport, false);
        store.storage().set_item(SESSION_ID_KEY, "stored-id").unwrap();

        let session_id = store.load_previous_session().await.unwrap();
        assert_eq!(session_id.as_deref(), Some("stored-id"));
        assert_eq!(store.session_id(), Some("stored-id"));
        assert_eq!(store.messages()[0].sender(), Sender::User);
        assert_eq!(store.messages()[1].sender(), Sender::Bot);
        assert_eq!(store.messages()[1].id().as_str(), "1");
    }

    #[tokio::test]
    async fn test_load_previous_session_empty_keeps_session_unset() {
        let mut store = store(FakeTransport::default(), false);

        let session_id = store.load_previous_session().await.unwrap();
        assert!(session_id.is_some());
        assert!(store.session_id().is_none());
    }

    #[tokio::test]
    async fn test_load_previous_session_disabled() {
        let options = ChatOptions::default().with_load_previous_session(false);
        let mut store =
            ConversationStore::new(FakeTransport::default(), MemoryStorage::new(), options);

        assert!(store.load_previous_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_new_session() {
        let transport = FakeTransport {
            response: Some(json!({"output": "ok"})),
            ..Default::default()
        };
        let mut store = store(transport, false);
        store.send_message("hello").await;
        let old = store.session_id().map(str::to_string);

        let new_id = store.start_new_session().unwrap();
        assert!(store.messages().is_empty());
        assert!(!store.is_waiting());
        assert_ne!(Some(new_id.clone()), old);
        assert_eq!(
            store.storage().get_item(SESSION_ID_KEY).unwrap(),
            Some(new_id)
        );
    }

    #[test]
    fn test_initial_messages() {
        let options = ChatOptions::default().with_initial_messages(vec!["Welcome".into()]);
        let store = ConversationStore::new(FakeTransport::default(), MemoryStorage::new(), options);

        let initial = store.initial_messages();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].text(), Some("Welcome"));
        assert_eq!(initial[0].sender(), Sender::Bot);
        assert!(store.messages().is_empty());
    }
}
