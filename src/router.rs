//! Routing of streamed events into transcript messages.
//!
//! Chunks without a node id belong to the default channel, which feeds a
//! single bot message. Chunks with a node id go to that run's message via the
//! [`StreamingMessageManager`]. Either way the transcript entry is rewritten
//! by id after every chunk.

use tracing::{debug, error};

use crate::model::ChatMessage;
use crate::store::{ConversationState, StoreError};
use crate::streaming::StreamingMessageManager;
use crate::transport::StreamHandlers;

/// Per-send event router. Borrows the conversation state for the duration of one send.
pub struct ChunkRouter<'a> {
    state: &'a mut ConversationState,
    manager: StreamingMessageManager,
    received: Option<ChatMessage>,
}

impl<'a> ChunkRouter<'a> {
    pub fn new(state: &'a mut ConversationState) -> Self {
        Self {
            state,
            manager: StreamingMessageManager::new(),
            received: None,
        }
    }

    /// Apply one chunk. Returns whether the transcript changed.
    pub fn handle_chunk(
        &mut self,
        chunk: &str,
        node_id: Option<&str>,
        run_index: Option<u32>,
    ) -> Result<bool, StoreError> {
        if chunk.is_empty() {
            return Ok(false);
        }

        match node_id {
            None => self.route_default(chunk)?,
            Some(node_id) => self.route_run(node_id, chunk, run_index)?,
        }

        self.state.set_waiting(false);
        self.state.schedule_scroll();
        Ok(true)
    }

    fn route_default(&mut self, chunk: &str) -> Result<(), StoreError> {
        let current = match self.received.take() {
            Some(message) => message,
            None => {
                let message = ChatMessage::empty_bot();
                self.state.append(message.clone());
                message
            }
        };

        let text = format!("{}{}", current.text().unwrap_or_default(), chunk);
        let updated = current.with_text(text);
        self.state.update(updated.clone())?;
        self.received = Some(updated);
        Ok(())
    }

    fn route_run(
        &mut self,
        node_id: &str,
        chunk: &str,
        run_index: Option<u32>,
    ) -> Result<(), StoreError> {
        if self.manager.get_run_message(node_id, run_index).is_none() {
            let message = self.manager.add_run_to_active(node_id, run_index);
            debug!(node_id, ?run_index, message_id = %message.id(), "run message created");
            self.state.append(message);
        }

        match self.manager.add_chunk_to_run(node_id, chunk, run_index) {
            Some(updated) => self.state.update(updated),
            None => Ok(()),
        }
    }

    pub fn handle_begin(&mut self, node_id: &str, run_index: Option<u32>) {
        debug!(node_id, ?run_index, "run started");
        self.manager.register_run_start(node_id, run_index);
    }

    pub fn handle_end(&mut self, node_id: &str, run_index: Option<u32>) {
        debug!(node_id, ?run_index, "run completed");
        self.manager.remove_run_from_active(node_id, run_index);
    }

    pub fn manager(&self) -> &StreamingMessageManager {
        &self.manager
    }

    /// The default channel's message, if any chunk reached it.
    pub fn received(&self) -> Option<&ChatMessage> {
        self.received.as_ref()
    }

    /// Finish routing and hand back the default channel's message.
    pub fn into_received(self) -> Option<ChatMessage> {
        self.received
    }
}

impl StreamHandlers for ChunkRouter<'_> {
    fn on_chunk(&mut self, chunk: &str, node_id: Option<&str>, run_index: Option<u32>) {
        if let Err(e) = self.handle_chunk(chunk, node_id, run_index) {
            error!(error = %e, node_id = ?node_id, ?run_index, "error handling stream chunk");
        }
    }

    fn on_begin_message(&mut self, node_id: &str, run_index: Option<u32>) {
        self.handle_begin(node_id, run_index);
    }

    fn on_end_message(&mut self, node_id: &str, run_index: Option<u32>) {
        self.handle_end(node_id, run_index);
    }
}
