//! Provider specific [`ClientWrapper`](crate::client_wrapper::ClientWrapper) implementations.
//!
//! Both Groq and OpenAI expose the same chat-completions wire format, so a single
//! [`openai::OpenAIClient`] speaks to either; [`groq::GroqClient`] is a thin preset on top.

pub mod common;
pub mod groq;
pub mod http_pool;
pub mod openai;

use crate::cognitionflow::client_wrapper::ClientWrapper;
use crate::cognitionflow::config::{LlmConfig, LlmProvider};
use std::error::Error;
use std::sync::Arc;

/// Build a completion client for the provider named in `config`.
pub fn client_from_config(
    config: &LlmConfig,
) -> Result<Arc<dyn ClientWrapper>, Box<dyn Error + Send + Sync>> {
    match config.provider {
        LlmProvider::Groq => Ok(Arc::new(groq::GroqClient::from_config(config)?)),
        LlmProvider::OpenAI => Ok(Arc::new(openai::OpenAIClient::from_config(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(provider: LlmProvider, model: &str, base_url: &str) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: "key".to_string(),
            model: model.to_string(),
            base_url: base_url.to_string(),
            temperature: 0.1,
            timeout_secs: 60,
        }
    }

    #[test]
    fn groq_config_builds_groq_client() {
        let config = config_for(
            LlmProvider::Groq,
            "llama-3.1-8b-instant",
            crate::cognitionflow::config::GROQ_BASE_URL,
        );
        let client = client_from_config(&config).unwrap();
        assert_eq!(client.model_name(), "llama-3.1-8b-instant");

        let groq = groq::GroqClient::from_config(&config).unwrap();
        assert_eq!(groq.base_url(), crate::cognitionflow::config::GROQ_BASE_URL);
    }

    #[test]
    fn openai_config_builds_openai_client() {
        let config = config_for(
            LlmProvider::OpenAI,
            "gpt-4o",
            crate::cognitionflow::config::OPENAI_BASE_URL,
        );
        let client = client_from_config(&config).unwrap();
        assert_eq!(client.model_name(), "gpt-4o");
    }

    #[test]
    fn bad_base_url_surfaces_as_error() {
        let config = config_for(LlmProvider::OpenAI, "gpt-4o", "no scheme here");
        assert!(client_from_config(&config).is_err());
    }
}
