//! Configuration for the chat core and its webhook transport.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_WEBHOOK_URL: &str = "http://localhost:5678";
const DEFAULT_CHAT_INPUT_KEY: &str = "chatInput";
const DEFAULT_CHAT_SESSION_KEY: &str = "sessionId";

/// HTTP method used to call the webhook.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum WebhookMethod {
    Get,
    #[default]
    Post,
}

/// How requests reach the webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct WebhookConfig {
    /// HTTP method for sends
    pub method: WebhookMethod,

    /// Additional HTTP headers to include in requests
    pub headers: HashMap<String, String>,
}

/// Transport-level options: where and how the webhook is called.
///
/// # Example
/// ```rust
/// use webhook_chat::options::{WebhookMethod, WebhookOptions};
/// use std::time::Duration;
///
/// let options = WebhookOptions::new("https://example.com/webhook/chat")
///     .with_method(WebhookMethod::Post)
///     .with_header("x-api-key".to_string(), "secret".to_string())
///     .with_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookOptions {
    /// Webhook endpoint receiving chat messages
    pub webhook_url: String,

    /// Method and headers, nested under `webhookConfig` in the widget config
    pub webhook_config: WebhookConfig,

    /// Body key carrying the user's text
    pub chat_input_key: String,

    /// Body key carrying the session id
    pub chat_session_key: String,

    /// Arbitrary metadata forwarded with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    /// Whole-request timeout
    #[serde(skip)]
    pub timeout: Option<Duration>,

    /// HTTP proxy URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Default for WebhookOptions {
    fn default() -> Self {
        Self::new(DEFAULT_WEBHOOK_URL)
    }
}

impl WebhookOptions {
    /// Create webhook options for the given endpoint.
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            webhook_config: WebhookConfig::default(),
            chat_input_key: DEFAULT_CHAT_INPUT_KEY.to_string(),
            chat_session_key: DEFAULT_CHAT_SESSION_KEY.to_string(),
            metadata: None,
            timeout: None,
            proxy: None,
        }
    }

    pub fn with_method(mut self, method: WebhookMethod) -> Self {
        self.webhook_config.method = method;
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.webhook_config.headers.insert(key, value);
        self
    }

    pub fn method(&self) -> WebhookMethod {
        self.webhook_config.method
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.webhook_config.headers
    }

    pub fn with_chat_input_key(mut self, key: impl Into<String>) -> Self {
        self.chat_input_key = key.into();
        self
    }

    pub fn with_chat_session_key(mut self, key: impl Into<String>) -> Self {
        self.chat_session_key = key.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// Options of the conversation core.
///
/// Deserializes from the same camelCase JSON shape the embedding page
/// passes to the widget, with method and headers under `webhookConfig`.
/// Unknown keys are ignored.
///
/// # Example
/// ```rust
/// use webhook_chat::options::ChatOptions;
///
/// let options: ChatOptions = serde_json::from_str(r#"{
///     "webhookUrl": "https://example.com/webhook/chat",
///     "enableStreaming": true,
///     "initialMessages": ["Hello!"]
/// }"#).unwrap();
///
/// assert!(options.enable_streaming);
/// assert!(options.load_previous_session);
/// assert_eq!(options.webhook.chat_input_key, "chatInput");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatOptions {
    #[serde(flatten)]
    pub webhook: WebhookOptions,

    /// Restore the stored session's history on load
    pub load_previous_session: bool,

    /// Greeting lines shown before the first exchange
    pub initial_messages: Vec<String>,

    /// Consume the webhook's NDJSON stream instead of a single response
    pub enable_streaming: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            webhook: WebhookOptions::default(),
            load_previous_session: true,
            initial_messages: vec![
                "Hi there! 👋".to_string(),
                "My name is Nathan. How can I assist you today?".to_string(),
            ],
            enable_streaming: false,
        }
    }
}

impl ChatOptions {
    /// Create options for the given webhook with all other settings at their defaults.
    pub fn new(webhook: WebhookOptions) -> Self {
        Self {
            webhook,
            ..Self::default()
        }
    }

    pub fn with_streaming(mut self, enable: bool) -> Self {
        self.enable_streaming = enable;
        self
    }

    pub fn with_load_previous_session(mut self, enable: bool) -> Self {
        self.load_previous_session = enable;
        self
    }

    pub fn with_initial_messages(mut self, messages: Vec<String>) -> Self {
        self.initial_messages = messages;
        self
    }
}
