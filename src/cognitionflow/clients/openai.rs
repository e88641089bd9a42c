//! The `OpenAIClient` struct implements `ClientWrapper` for the OpenAI-compatible chat
//! completions API, capturing both the assistant reply and the token usage reported for it.
//!
//! Any endpoint speaking the same wire format works: OpenAI itself, Groq, or a local
//! gateway reached through `OPENAI_BASE_URL`.
//!
//! # Example
//!
//! ```rust,no_run
//! use cognitionflow::clients::openai::OpenAIClient;
//! use cognitionflow::client_wrapper::{ClientWrapper, Message, Role};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAIClient::new_with_model_string(&key, "gpt-4o")?.with_temperature(0.1);
//!
//!     let reply = client
//!         .send_message(&[
//!             Message::new(Role::System, "You are terse."),
//!             Message::new(Role::User, "Say hello."),
//!         ])
//!         .await?;
//!     println!("Assistant: {}", reply.content);
//!
//!     if let Some(usage) = client.get_last_usage() {
//!         println!("tokens in/out: {}/{}", usage.input_tokens, usage.output_tokens);
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use openai_rust2 as openai_rust;

use crate::cognitionflow::client_wrapper::{ClientError, ClientWrapper, Message, Role, TokenUsage};
use crate::cognitionflow::clients::common::{chat_completions_path, format_messages, send_and_track};
use crate::cognitionflow::clients::http_pool::get_http_client;
use crate::cognitionflow::config::{LlmConfig, DEFAULT_TIMEOUT_SECS, OPENAI_BASE_URL};

/// Failure setting up or talking to a chat-completions endpoint.
#[derive(Debug)]
pub enum ProviderError {
    Http(reqwest::Error),
    InvalidBaseUrl(String),
    /// Error reported by the chat API (status, transport or decoding).
    Api(String),
    MalformedResponse(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "HTTP error: {}", e),
            ProviderError::InvalidBaseUrl(msg) => write!(f, "Invalid base URL {}", msg),
            ProviderError::Api(msg) => write!(f, "Provider error: {}", msg),
            ProviderError::MalformedResponse(msg) => write!(f, "Malformed response: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e)
    }
}

/// Client wrapper for OpenAI's Chat Completions API.
///
/// The wrapper keeps the selected model identifier plus an internal [`TokenUsage`] slot so
/// callers can inspect how many tokens each request consumed. The underlying HTTP client
/// comes from the shared pool in [`crate::clients::http_pool`].
pub struct OpenAIClient {
    /// Underlying SDK client pointing at the REST endpoint.
    client: openai_rust::Client,
    base_url: String,
    /// Endpoint path derived from `base_url`, passed to every request.
    url_path: String,
    /// Model name that will be injected into each request.
    model: String,
    temperature: Option<f32>,
    /// Storage for the token usage returned by the most recent request.
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAIClient {
    /// Client for the public OpenAI endpoint.
    pub fn new_with_model_string(secret_key: &str, model_name: &str) -> Result<Self, ProviderError> {
        Self::new_with_base_url(secret_key, model_name, OPENAI_BASE_URL)
    }

    /// Client for any OpenAI-compatible endpoint. `base_url` includes the version segment.
    pub fn new_with_base_url(
        secret_key: &str,
        model_name: &str,
        base_url: &str,
    ) -> Result<Self, ProviderError> {
        Self::build(secret_key, model_name, base_url, DEFAULT_TIMEOUT_SECS)
    }

    /// Client built from resolved provider settings, temperature and timeout included.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        Ok(
            Self::build(&config.api_key, &config.model, &config.base_url, config.timeout_secs)?
                .with_temperature(config.temperature),
        )
    }

    fn build(
        secret_key: &str,
        model_name: &str,
        base_url: &str,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let url_path = chat_completions_path(&base_url)?;
        Ok(OpenAIClient {
            client: openai_rust::Client::new_with_client_and_base_url(
                secret_key,
                get_http_client(&base_url, timeout_secs)?,
                &base_url,
            ),
            base_url,
            url_path,
            model: model_name.to_string(),
            temperature: None,
            token_usage: Mutex::new(None),
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Path requests are posted to, e.g. `/v1/chat/completions`.
    pub fn url_path(&self) -> &str {
        &self.url_path
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(&self, messages: &[Message]) -> Result<Message, ClientError> {
        log::debug!(
            "POST {}{} model={} messages={}",
            self.base_url,
            self.url_path,
            self.model,
            messages.len()
        );

        let content = send_and_track(
            &self.client,
            &self.model,
            format_messages(messages),
            Some(self.url_path.clone()),
            &self.token_usage,
            self.temperature,
        )
        .await?;

        Ok(Message::new(Role::Assistant, content))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
