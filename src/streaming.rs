//! Per-run accumulation of streamed text.
//!
//! Each node run of a workflow streams its own reply. The manager keeps one
//! buffer per [`RunKey`] and the bot message mirroring that buffer, so runs
//! that interleave on the wire still produce independent messages.
//!
//! A run is evicted when its end signal arrives. Restarting a key after that
//! starts a fresh run with a new message; the finished message stays as it was.

use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::model::ChatMessage;

/// Run index used when the transport does not report one.
pub const DEFAULT_RUN_INDEX: u32 = 0;

/// Identity of one streamed run: the emitting node and its repetition index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunKey {
    pub node_id: String,
    pub run_index: u32,
}

impl RunKey {
    pub fn new(node_id: impl Into<String>, run_index: Option<u32>) -> Self {
        Self {
            node_id: node_id.into(),
            run_index: run_index.unwrap_or(DEFAULT_RUN_INDEX),
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.node_id, self.run_index)
    }
}

/// Accumulated state of a run that has not ended yet.
#[derive(Debug, Clone, Default)]
struct ActiveRun {
    text: String,
    /// None until the first chunk (or explicit activation) creates the message
    message: Option<ChatMessage>,
}

/// Tracks the active runs of a single send.
///
/// Create one per send; runs are keyed by [`RunKey`], so an absent run index
/// and `Some(0)` address the same run.
///
/// # Example
/// ```rust
/// use webhook_chat::streaming::StreamingMessageManager;
///
/// let mut manager = StreamingMessageManager::new();
/// manager.add_run_to_active("agent", None);
/// manager.add_chunk_to_run("agent", "Hel", None);
/// let message = manager.add_chunk_to_run("agent", "lo", Some(0)).unwrap();
///
/// assert_eq!(message.text(), Some("Hello"));
/// assert!(manager.remove_run_from_active("agent", None).is_some());
/// assert!(manager.are_all_runs_complete());
/// ```
#[derive(Debug, Default)]
pub struct StreamingMessageManager {
    active: HashMap<RunKey, ActiveRun>,
    /// Number of runs that received a message during this send
    started: usize,
}

impl StreamingMessageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current message of a run, if the run is active and has one.
    ///
    /// # Arguments
    /// - `node_id`: Node that emits the run
    /// - `run_index`: Run of that node, `None` meaning run 0
    pub fn get_run_message(&self, node_id: &str, run_index: Option<u32>) -> Option<&ChatMessage> {
        self.active
            .get(&RunKey::new(node_id, run_index))
            .and_then(|run| run.message.as_ref())
    }

    /// Start a run with a fresh empty bot message and return that message.
    ///
    /// A run already holding a message under the same key is replaced.
    ///
    /// # Arguments
    /// - `node_id`: Node that emits the run
    /// - `run_index`: Run of that node, `None` meaning run 0
    ///
    /// # Returns
    /// The new message, to be appended to the transcript by the caller
    pub fn add_run_to_active(&mut self, node_id: &str, run_index: Option<u32>) -> ChatMessage {
        let key = RunKey::new(node_id, run_index);
        let message = ChatMessage::empty_bot();

        let previous = self.active.insert(
            key.clone(),
            ActiveRun {
                text: String::new(),
                message: Some(message.clone()),
            },
        );
        if previous.is_some_and(|run| run.message.is_some()) {
            debug!(run = %key, "replacing active run with a fresh message");
        }

        self.started += 1;
        message
    }

    /// Append `chunk` to the run and return the updated message.
    ///
    /// # Arguments
    /// - `node_id`: Node that emits the run
    /// - `chunk`: Text to append
    /// - `run_index`: Run of that node, `None` meaning run 0
    ///
    /// # Returns
    /// The message with the run's full text so far, or `None` when the run is
    /// not active or has no message yet
    pub fn add_chunk_to_run(
        &mut self,
        node_id: &str,
        chunk: &str,
        run_index: Option<u32>,
    ) -> Option<ChatMessage> {
        let run = self.active.get_mut(&RunKey::new(node_id, run_index))?;
        let message = run.message.as_ref()?;

        run.text.push_str(chunk);
        let updated = message.with_text(run.text.clone());
        run.message = Some(updated.clone());
        Some(updated)
    }

    /// Record that a run began, before any text arrived. Idempotent.
    pub fn register_run_start(&mut self, node_id: &str, run_index: Option<u32>) {
        self.active
            .entry(RunKey::new(node_id, run_index))
            .or_default();
    }

    /// End a run. Its message keeps the last accumulated text.
    ///
    /// Returns the final message, if the run had one. Unknown runs are ignored.
    pub fn remove_run_from_active(
        &mut self,
        node_id: &str,
        run_index: Option<u32>,
    ) -> Option<ChatMessage> {
        self.active
            .remove(&RunKey::new(node_id, run_index))
            .and_then(|run| run.message)
    }

    /// Keys of the runs that have begun but not ended, in sorted order.
    pub fn active_run_keys(&self) -> Vec<RunKey> {
        self.active.keys().cloned().sorted().collect()
    }

    /// Number of run messages created during this send, finished ones included.
    pub fn run_count(&self) -> usize {
        self.started
    }

    /// True once every begun run has ended.
    pub fn are_all_runs_complete(&self) -> bool {
        self.active.is_empty()
    }

    /// Forget all runs. Messages already handed out are unaffected.
    pub fn reset(&mut self) {
        self.active.clear();
        self.started = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_key_defaults_index() {
        assert_eq!(RunKey::new("n", None), RunKey::new("n", Some(0)));
        assert_ne!(RunKey::new("n", Some(1)), RunKey::new("n", Some(0)));
        assert_eq!(RunKey::new("agent", Some(2)).to_string(), "agent-2");
    }

    #[test]
    fn test_get_run_message_before_start() {
        let manager = StreamingMessageManager::new();
        assert!(manager.get_run_message("n", None).is_none());
    }

    #[test]
    fn test_chunks_accumulate_per_run() {
        let mut manager = StreamingMessageManager::new();
        let a = manager.add_run_to_active("a", None);
        let b = manager.add_run_to_active("a", Some(1));
        assert_ne!(a.id(), b.id());

        manager.add_chunk_to_run("a", "Hel", None);
        manager.add_chunk_to_run("a", "x", Some(1));
        let updated = manager.add_chunk_to_run("a", "lo", Some(0)).unwrap();

        assert_eq!(updated.id(), a.id());
        assert_eq!(updated.text(), Some("Hello"));
        assert_eq!(
            manager.get_run_message("a", Some(1)).and_then(ChatMessage::text),
            Some("x")
        );
    }

    #[test]
    fn test_chunk_without_run_is_dropped() {
        let mut manager = StreamingMessageManager::new();
        assert!(manager.add_chunk_to_run("n", "text", None).is_none());

        // A registered start alone does not create a message
        manager.register_run_start("n", None);
        assert!(manager.add_chunk_to_run("n", "text", None).is_none());
        assert!(manager.get_run_message("n", None).is_none());
    }

    #[test]
    fn test_register_run_start_is_idempotent() {
        let mut manager = StreamingMessageManager::new();
        manager.add_run_to_active("n", None);
        manager.add_chunk_to_run("n", "keep", None);

        manager.register_run_start("n", None);
        manager.register_run_start("n", None);

        assert_eq!(
            manager.get_run_message("n", None).and_then(ChatMessage::text),
            Some("keep")
        );
        assert_eq!(manager.active_run_keys(), vec![RunKey::new("n", None)]);
    }

    #[test]
    fn test_remove_run_twice_is_noop() {
        let mut manager = StreamingMessageManager::new();
        manager.add_run_to_active("n", Some(3));
        manager.add_chunk_to_run("n", "done", Some(3));

        let last = manager.remove_run_from_active("n", Some(3)).unwrap();
        assert_eq!(last.text(), Some("done"));
        assert!(manager.remove_run_from_active("n", Some(3)).is_none());
        assert!(manager.are_all_runs_complete());
        assert_eq!(manager.run_count(), 1);
    }

    #[test]
    fn test_restart_after_end_creates_fresh_message() {
        let mut manager = StreamingMessageManager::new();
        let first = manager.add_run_to_active("n", None);
        manager.remove_run_from_active("n", None);

        assert!(manager.get_run_message("n", None).is_none());
        let second = manager.add_run_to_active("n", None);
        assert_ne!(first.id(), second.id());
        assert_eq!(manager.run_count(), 2);
    }

    #[test]
    fn test_reset() {
        let mut manager = StreamingMessageManager::new();
        manager.add_run_to_active("a", None);
        manager.register_run_start("b", None);
        manager.reset();

        assert!(manager.are_all_runs_complete());
        assert_eq!(manager.run_count(), 0);
        assert!(manager.active_run_keys().is_empty());
    }
}
