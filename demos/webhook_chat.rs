//! Terminal chat against a workflow webhook.
//!
//! Run with:
//! ```bash
//! export CHAT_WEBHOOK_URL="https://your-instance/webhook/<id>/chat"
//! export CHAT_STREAMING=1   # optional
//! RUST_LOG=webhook_chat=debug cargo run --example webhook_chat
//! ```

use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use webhook_chat::events::ChatEvent;
use webhook_chat::options::{ChatOptions, WebhookOptions};
use webhook_chat::session::FileStorage;
use webhook_chat::store::ConversationStore;
use webhook_chat::webhook::WebhookClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("CHAT_WEBHOOK_URL")
        .expect("CHAT_WEBHOOK_URL environment variable must be set");
    let streaming = std::env::var("CHAT_STREAMING").is_ok_and(|v| v == "1");

    let options = ChatOptions::new(WebhookOptions::new(url)).with_streaming(streaming);
    let transport = WebhookClient::new(options.webhook.clone())?;
    let mut store = ConversationStore::new(transport, FileStorage::in_data_dir()?, options);

    // Trace message updates as they land; the transcript is printed after each send
    let mut events = store.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ChatEvent::MessageUpdated(id) = event {
                tracing::trace!(%id, "message updated");
            }
        }
    });

    if let Some(session_id) = store.load_previous_session().await? {
        println!("Session: {}", session_id);
    }
    for message in store.initial_messages().iter().chain(store.messages()) {
        println!("[{:?}] {}", message.sender(), message.text().unwrap_or_default());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print!("> ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "/new" => {
                let session_id = store.start_new_session()?;
                println!("New session: {}", session_id);
            }
            text => {
                let before = store.messages().len();
                if let Some(response) = store.send_message(text).await {
                    println!("Execution started: {:?}", response.execution_id());
                }
                store.settle();

                for message in store.messages().iter().skip(before + 1) {
                    println!("[{:?}] {}", message.sender(), message.text().unwrap_or_default());
                }
            }
        }

        print!("> ");
        std::io::stdout().flush()?;
    }

    Ok(())
}
