//! Webhook transport over HTTP.
//!
//! Implements [`Transport`] against a chat-trigger webhook. Sends go out as a
//! JSON POST (or a GET with the same fields in the query string); streamed
//! replies are read as newline-delimited JSON frames.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde_json::{Map, Value};
use tracing::debug;

use crate::http::{
    action_body, add_extra_headers, build_http_client, query_pairs, ACTION_LOAD_PREVIOUS_SESSION,
    ACTION_SEND_MESSAGE,
};
use crate::model::{LoadPreviousSessionResponse, SendMessageResponse, SendRequest};
use crate::ndjson::NdjsonResponseExt;
use crate::options::{WebhookMethod, WebhookOptions};
use crate::transport::{EventStream, Transport, TransportError};

/// Transport talking to a chat-trigger webhook.
pub struct WebhookClient {
    options: WebhookOptions,
    http: Client,
}

impl WebhookClient {
    /// Create a client, building the HTTP client from the options.
    pub fn new(options: WebhookOptions) -> Result<Self, TransportError> {
        if options.webhook_url.trim().is_empty() {
            return Err(TransportError::Config("webhook URL is required".to_string()));
        }

        let http = build_http_client(&options)?;
        Ok(Self { options, http })
    }

    /// Create a client reusing an existing HTTP client.
    pub fn with_http_client(options: WebhookOptions, http: Client) -> Self {
        Self { options, http }
    }

    pub fn options(&self) -> &WebhookOptions {
        &self.options
    }

    /// Build the request for an action body according to the configured method.
    fn request(&self, body: &Map<String, Value>) -> RequestBuilder {
        let url = &self.options.webhook_url;
        let req = match self.options.method() {
            WebhookMethod::Get => self.http.get(url).query(&query_pairs(body)),
            WebhookMethod::Post => self
                .http
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .json(body),
        };

        add_extra_headers(req, self.options.headers())
    }

    /// Send the request and turn non-success statuses into errors.
    async fn execute(req: RequestBuilder) -> Result<reqwest::Response, TransportError> {
        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    /// Decode a JSON body, treating an empty body as an empty object.
    async fn json_body(response: reqwest::Response) -> Result<Value, TransportError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Transport for WebhookClient {
    async fn send_message(
        &self,
        request: &SendRequest,
    ) -> Result<SendMessageResponse, TransportError> {
        let body = action_body(
            &self.options,
            ACTION_SEND_MESSAGE,
            &request.session_id,
            Some(&request.message),
        );
        debug!(url = %self.options.webhook_url, "sending chat message");

        let response = Self::execute(self.request(&body)).await?;
        let value = Self::json_body(response).await?;
        Ok(SendMessageResponse::from_value(value))
    }

    async fn open_stream(&self, request: &SendRequest) -> Result<EventStream, TransportError> {
        let body = action_body(
            &self.options,
            ACTION_SEND_MESSAGE,
            &request.session_id,
            Some(&request.message),
        );
        debug!(url = %self.options.webhook_url, "opening chat stream");

        let req = self.request(&body).header(ACCEPT, "text/plain");
        let response = Self::execute(req).await?;
        Ok(response.ndjson_events().boxed())
    }

    async fn load_previous_session(
        &self,
        session_id: &str,
    ) -> Result<LoadPreviousSessionResponse, TransportError> {
        let body = action_body(&self.options, ACTION_LOAD_PREVIOUS_SESSION, session_id, None);
        debug!(url = %self.options.webhook_url, session_id, "loading previous session");

        let response = Self::execute(self.request(&body)).await?;
        let value = Self::json_body(response).await?;
        Ok(serde_json::from_value(value)?)
    }
}
