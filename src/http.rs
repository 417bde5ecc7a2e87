//! HTTP client utilities for calling the chat webhook.
//!
//! This module builds the reqwest client and the request bodies shared by
//! every webhook action.

use reqwest::{Client, RequestBuilder};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::options::WebhookOptions;

/// Webhook action names understood by the chat trigger.
pub const ACTION_SEND_MESSAGE: &str = "sendMessage";
pub const ACTION_LOAD_PREVIOUS_SESSION: &str = "loadPreviousSession";

/// Build a configured HTTP client from webhook options.
///
/// This applies common configuration like timeouts and proxies.
///
/// # Example
/// ```ignore
/// let client = build_http_client(&webhook_options)?;
/// ```
pub fn build_http_client(options: &WebhookOptions) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &options.proxy {
        if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
            builder = builder.proxy(proxy);
        }
    }

    builder.build()
}

/// Add the configured headers to a request.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &HashMap<String, String>,
) -> RequestBuilder {
    for (key, value) in extra_headers {
        request = request.header(key, value);
    }
    request
}

/// JSON body for a webhook action.
///
/// `message` is omitted for actions that carry no user input.
pub fn action_body(
    options: &WebhookOptions,
    action: &str,
    session_id: &str,
    message: Option<&str>,
) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("action".to_string(), Value::from(action));
    body.insert(options.chat_session_key.clone(), Value::from(session_id));

    if let Some(message) = message {
        body.insert(options.chat_input_key.clone(), Value::from(message));
    }

    if let Some(metadata) = &options.metadata {
        body.insert("metadata".to_string(), Value::Object(metadata.clone()));
    }

    body
}

/// Flatten an action body into query pairs for GET webhooks.
///
/// Nested values are sent as their JSON text.
pub fn query_pairs(body: &Map<String, Value>) -> Vec<(String, String)> {
    body.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}
