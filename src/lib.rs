//! # webhook-chat - Headless core of an embeddable webhook chat
//!
//! Keeps the transcript of a chat whose replies come from a workflow webhook,
//! either as one JSON response or as a stream of newline-delimited frames.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Transport-agnostic trait-based design with a reqwest webhook implementation
//! - Reassembly of interleaved streamed replies, one message per node run
//! - Typed change events for the render layer, with coalesced scroll requests
//! - Session id persistence and previous-session restore
//!
//! ## Architecture
//!
//! - **`StreamingMessageManager`**: accumulates text per `(node, run)` key
//! - **`ChunkRouter`**: sends each streamed chunk to the default message or a run message
//! - **`ConversationStore`**: owns the transcript, session and waiting flag; orchestrates sends
//! - **`Transport`**: network side; `WebhookClient` talks HTTP
//!
//! ## Example
//! ```no_run
//! use webhook_chat::options::{ChatOptions, WebhookOptions};
//! use webhook_chat::session::MemoryStorage;
//! use webhook_chat::store::ConversationStore;
//! use webhook_chat::webhook::WebhookClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ChatOptions::new(WebhookOptions::new("https://example.com/webhook/chat"))
//!         .with_streaming(true);
//!
//!     let transport = WebhookClient::new(options.webhook.clone())?;
//!     let mut store = ConversationStore::new(transport, MemoryStorage::new(), options);
//!
//!     store.load_previous_session().await?;
//!     store.send_message("Hello!").await;
//!
//!     for message in store.messages() {
//!         println!("{:?}: {:?}", message.sender(), message.text());
//!     }
//!     Ok(())
//! }
//! ```

pub mod events;
pub mod http;
pub mod model;
pub mod ndjson;
pub mod options;
pub mod router;
pub mod session;
pub mod store;
pub mod streaming;
pub mod transcript;
pub mod transport;
pub mod webhook;

// Re-exports for convenience
pub use events::ChatEvent;
pub use model::{ChatMessage, MessageId, SendMessageResponse, Sender};
pub use options::{ChatOptions, WebhookOptions};
pub use store::{ChatError, ConversationStore};
pub use streaming::{RunKey, StreamingMessageManager};
pub use transport::{StreamEvent, StreamHandlers, Transport, TransportError};
pub use webhook::WebhookClient;
