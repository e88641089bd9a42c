use crate::cognitionflow::client_wrapper::{ClientError, ClientWrapper, Message, TokenUsage};
use crate::cognitionflow::clients::openai::{OpenAIClient, ProviderError};
use crate::cognitionflow::config::{LlmConfig, GROQ_BASE_URL};
use async_trait::async_trait;
use std::sync::Mutex;

/// Groq-hosted chat models offered by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Llama33_70bVersatile,
    Llama31_8bInstant,
    GptOss120b,
    Qwen3_32b,
}

pub fn model_to_string(model: Model) -> String {
    match model {
        Model::Llama33_70bVersatile => "llama-3.3-70b-versatile".to_string(),
        Model::Llama31_8bInstant => "llama-3.1-8b-instant".to_string(),
        Model::GptOss120b => "openai/gpt-oss-120b".to_string(),
        Model::Qwen3_32b => "qwen/qwen3-32b".to_string(),
    }
}

/// Groq speaks the OpenAI wire format; this only pins the base URL.
pub struct GroqClient {
    client: OpenAIClient,
}

impl GroqClient {
    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Result<Self, ProviderError> {
        Self::new_with_model_str(secret_key, &model_to_string(model))
    }

    pub fn new_with_model_str(secret_key: &str, model_name: &str) -> Result<Self, ProviderError> {
        Ok(GroqClient {
            client: OpenAIClient::new_with_base_url(secret_key, model_name, GROQ_BASE_URL)?,
        })
    }

    /// Client built from resolved Groq settings. An overridden `base_url` in `config` wins
    /// over the public Groq endpoint.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        Ok(GroqClient {
            client: OpenAIClient::from_config(config)?,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.client = self.client.with_temperature(temperature);
        self
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }
}

#[async_trait]
impl ClientWrapper for GroqClient {
    async fn send_message(&self, messages: &[Message]) -> Result<Message, ClientError> {
        self.client.send_message(messages).await
    }

    fn model_name(&self) -> &str {
        self.client.model_name()
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        self.client.usage_slot()
    }
}
