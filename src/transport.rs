//! Transport trait, streaming event handlers and transport errors.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tracing::debug;

use crate::model::{LoadPreviousSessionResponse, SendMessageResponse, SendRequest};

/// Errors that can occur while talking to the webhook.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Webhook responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// A single event of a streamed webhook response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A node started producing a message.
    Begin {
        node_id: String,
        run_index: Option<u32>,
    },
    /// A fragment of text, optionally attributed to a node run.
    Chunk {
        content: String,
        node_id: Option<String>,
        run_index: Option<u32>,
    },
    /// A node finished its message.
    End {
        node_id: String,
        run_index: Option<u32>,
    },
    /// The workflow reported a failure mid-stream.
    Error {
        content: Option<String>,
        node_id: Option<String>,
        run_index: Option<u32>,
    },
}

/// Stream of decoded events for one streaming send.
pub type EventStream = BoxStream<'static, Result<StreamEvent, TransportError>>;

/// Summary of a completed streaming exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Whether at least one content chunk arrived
    pub has_received_chunks: bool,
}

/// Callbacks invoked for every event of a streamed response, in delivery order.
///
/// Handlers must not fail the exchange: a fault while applying one event is
/// the handler's to log, and the next event is still delivered.
///
/// # Required Methods
/// - `on_chunk`: A text fragment arrived
/// - `on_begin_message`: A node run announced its message
/// - `on_end_message`: A node run finished its message
pub trait StreamHandlers {
    /// Apply one text fragment.
    ///
    /// # Arguments
    /// - `chunk`: Text fragment, possibly empty
    /// - `node_id`: Node that produced it; `None` for the default channel
    /// - `run_index`: Run of that node; `None` is the same run as `Some(0)`
    fn on_chunk(&mut self, chunk: &str, node_id: Option<&str>, run_index: Option<u32>);

    /// A node run is about to stream a message.
    ///
    /// # Arguments
    /// - `node_id`: Node starting the run
    /// - `run_index`: Run of that node
    fn on_begin_message(&mut self, node_id: &str, run_index: Option<u32>);

    /// A node run finished; later chunks for the same run start a new message.
    ///
    /// # Arguments
    /// - `node_id`: Node ending the run
    /// - `run_index`: Run of that node
    fn on_end_message(&mut self, node_id: &str, run_index: Option<u32>);
}

/// Feed every event of `events` to `handlers` until the stream ends.
///
/// Transport errors abort the exchange and are returned; handler behavior is
/// the handlers' own concern.
pub async fn dispatch_stream(
    mut events: EventStream,
    handlers: &mut (dyn StreamHandlers + Send),
) -> Result<StreamOutcome, TransportError> {
    let mut outcome = StreamOutcome::default();

    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::Begin { node_id, run_index } => {
                handlers.on_begin_message(&node_id, run_index);
            }
            StreamEvent::Chunk {
                content,
                node_id,
                run_index,
            } => {
                outcome.has_received_chunks = true;
                handlers.on_chunk(&content, node_id.as_deref(), run_index);
            }
            StreamEvent::End { node_id, run_index } => {
                handlers.on_end_message(&node_id, run_index);
            }
            StreamEvent::Error {
                content,
                node_id,
                run_index,
            } => {
                debug!(node_id = ?node_id, "workflow reported an error mid-stream");
                let text = format!("Error: {}", content.as_deref().unwrap_or("Unknown error"));
                handlers.on_chunk(&text, node_id.as_deref(), run_index);
                if let Some(node_id) = node_id.as_deref() {
                    handlers.on_end_message(node_id, run_index);
                }
            }
        }
    }

    Ok(outcome)
}

/// Network side of the chat.
///
/// Implement this trait to connect the conversation store to a backend.
///
/// # Required Methods
/// - `send_message`: One request, one complete response
/// - `open_stream`: One request, a stream of decoded events
/// - `load_previous_session`: Fetch a session's stored history
///
/// # Provided Methods (with default implementations)
/// - `send_message_streaming`: Opens the stream and drives it through handlers
///
/// # Example
/// ```rust,ignore
/// struct EchoTransport;
///
/// #[async_trait]
/// impl Transport for EchoTransport {
///     async fn send_message(&self, request: &SendRequest) -> Result<SendMessageResponse, TransportError> {
///         let mut body = serde_json::Map::new();
///         body.insert("output".into(), request.message.clone().into());
///         Ok(SendMessageResponse(body))
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message and wait for the complete response.
    ///
    /// # Arguments
    /// - `request`: User text, history and session id
    ///
    /// # Returns
    /// The webhook's JSON object, or an error for network, status and decode failures
    async fn send_message(
        &self,
        request: &SendRequest,
    ) -> Result<SendMessageResponse, TransportError>;

    /// Send a message and return the stream of response events.
    ///
    /// Errors before the first byte are returned here; errors while reading
    /// arrive as `Err` items of the stream.
    ///
    /// # Arguments
    /// - `request`: User text, history and session id
    ///
    /// # Returns
    /// The decoded event stream
    async fn open_stream(&self, request: &SendRequest) -> Result<EventStream, TransportError>;

    /// Fetch the stored history of a session.
    ///
    /// # Arguments
    /// - `session_id`: Session whose history to load
    ///
    /// # Returns
    /// The stored messages, oldest first; empty for an unknown session
    async fn load_previous_session(
        &self,
        session_id: &str,
    ) -> Result<LoadPreviousSessionResponse, TransportError>;

    /// Send a message and deliver each streamed event to `handlers`.
    ///
    /// Convenience wrapper around `open_stream` and [`dispatch_stream`].
    ///
    /// # Arguments
    /// - `request`: User text, history and session id
    /// - `handlers`: Receives every event in delivery order
    ///
    /// # Returns
    /// Whether any chunk arrived, or the first transport error
    async fn send_message_streaming(
        &self,
        request: &SendRequest,
        handlers: &mut (dyn StreamHandlers + Send),
    ) -> Result<StreamOutcome, TransportError> {
        let events = self.open_stream(request).await?;
        dispatch_stream(events, handlers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl StreamHandlers for Recorder {
        fn on_chunk(&mut self, chunk: &str, node_id: Option<&str>, run_index: Option<u32>) {
            self.calls
                .push(format!("chunk:{}:{:?}:{:?}", chunk, node_id, run_index));
        }

        fn on_begin_message(&mut self, node_id: &str, run_index: Option<u32>) {
            self.calls.push(format!("begin:{}:{:?}", node_id, run_index));
        }

        fn on_end_message(&mut self, node_id: &str, run_index: Option<u32>) {
            self.calls.push(format!("end:{}:{:?}", node_id, run_index));
        }
    }

    fn events(items: Vec<Result<StreamEvent, TransportError>>) -> EventStream {
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_dispatch_in_order() {
        let mut recorder = Recorder::default();
        let outcome = dispatch_stream(
            events(vec![
                Ok(StreamEvent::Begin {
                    node_id: "a".into(),
                    run_index: Some(1),
                }),
                Ok(StreamEvent::Chunk {
                    content: "hi".into(),
                    node_id: Some("a".into()),
                    run_index: Some(1),
                }),
                Ok(StreamEvent::End {
                    node_id: "a".into(),
                    run_index: Some(1),
                }),
            ]),
            &mut recorder,
        )
        .await
        .unwrap();

        assert!(outcome.has_received_chunks);
        assert_eq!(
            recorder.calls,
            vec![
                "begin:a:Some(1)",
                "chunk:hi:Some(\"a\"):Some(1)",
                "end:a:Some(1)"
            ]
        );
    }

    #[tokio::test]
    async fn test_dispatch_without_chunks() {
        let mut recorder = Recorder::default();
        let outcome = dispatch_stream(
            events(vec![
                Ok(StreamEvent::Begin {
                    node_id: "a".into(),
                    run_index: None,
                }),
                Ok(StreamEvent::End {
                    node_id: "a".into(),
                    run_index: None,
                }),
            ]),
            &mut recorder,
        )
        .await
        .unwrap();

        assert!(!outcome.has_received_chunks);
    }

    #[tokio::test]
    async fn test_dispatch_error_event() {
        let mut recorder = Recorder::default();
        dispatch_stream(
            events(vec![Ok(StreamEvent::Error {
                content: None,
                node_id: Some("n".into()),
                run_index: None,
            })]),
            &mut recorder,
        )
        .await
        .unwrap();

        assert_eq!(
            recorder.calls,
            vec!["chunk:Error: Unknown error:Some(\"n\"):None", "end:n:None"]
        );
    }

    #[tokio::test]
    async fn test_dispatch_stops_on_transport_error() {
        let mut recorder = Recorder::default();
        let result = dispatch_stream(
            events(vec![
                Err(TransportError::Config("boom".into())),
                Ok(StreamEvent::Chunk {
                    content: "late".into(),
                    node_id: None,
                    run_index: None,
                }),
            ]),
            &mut recorder,
        )
        .await;

        assert!(matches!(result, Err(TransportError::Config(_))));
        assert!(recorder.calls.is_empty());
    }
}
