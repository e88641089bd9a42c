use crate::cognitionflow::client_wrapper::{ClientError, Message, TokenUsage};
use crate::cognitionflow::clients::openai::ProviderError;
use openai_rust::chat;
use openai_rust2 as openai_rust;
use std::sync::Mutex;

/// Convert orchestrator messages into the request format expected by openai_rust.
pub fn format_messages(messages: &[Message]) -> Vec<chat::Message> {
    messages
        .iter()
        .map(|msg| chat::Message {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        })
        .collect()
}

/// Path of the chat-completions endpoint below `base_url`.
///
/// openai_rust replaces the whole URL path with the one given, so the base URL's own
/// path (`/v1`, `/openai/v1`, ...) has to be carried over here.
pub fn chat_completions_path(base_url: &str) -> Result<String, ProviderError> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|e| ProviderError::InvalidBaseUrl(format!("{}: {}", base_url, e)))?;
    Ok(format!("{}/chat/completions", url.path().trim_end_matches('/')))
}

/// Send a chat request, record its usage, and return the assistant's content.
pub async fn send_and_track(
    api: &openai_rust::Client,
    model: &str,
    formatted_msgs: Vec<chat::Message>,
    url_path: Option<String>,
    usage_slot: &Mutex<Option<TokenUsage>>,
    temperature: Option<f32>,
) -> Result<String, ClientError> {
    let mut chat_arguments = chat::ChatArguments::new(model, formatted_msgs);
    chat_arguments.temperature = temperature;

    let response = api.create_chat(chat_arguments, url_path).await;

    match response {
        Ok(response) => {
            let usage = TokenUsage {
                input_tokens: response.usage.prompt_tokens as usize,
                output_tokens: response.usage.completion_tokens as usize,
                total_tokens: response.usage.total_tokens as usize,
            };

            // Store it for get_last_usage()
            if let Ok(mut slot) = usage_slot.lock() {
                *slot = Some(usage);
            }

            match response.choices.first() {
                Some(choice) => Ok(choice.message.content.clone()),
                None => Err(Box::new(ProviderError::MalformedResponse(
                    "response has no choices".to_string(),
                ))),
            }
        }
        Err(err) => {
            log::error!(
                "cognitionflow::clients::common::send_and_track(...): chat API error: {}",
                err
            );
            Err(Box::new(ProviderError::Api(err.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognitionflow::client_wrapper::Role;
    use crate::cognitionflow::config::{GROQ_BASE_URL, OPENAI_BASE_URL};

    #[test]
    fn completions_path_keeps_base_url_prefix() {
        assert_eq!(chat_completions_path(OPENAI_BASE_URL).unwrap(), "/v1/chat/completions");
        assert_eq!(
            chat_completions_path(GROQ_BASE_URL).unwrap(),
            "/openai/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_path("http://localhost:8080/v1/").unwrap(),
            "/v1/chat/completions"
        );
    }

    #[test]
    fn unparsable_base_url_is_rejected() {
        let err = chat_completions_path("not a url").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidBaseUrl(_)));
    }

    #[test]
    fn messages_use_wire_role_names() {
        let formatted = format_messages(&[
            Message::new(Role::System, "sys"),
            Message::new(Role::User, "hi"),
            Message::new(Role::Assistant, "hello"),
        ]);
        let roles: Vec<&str> = formatted.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(formatted[1].content, "hi");
    }
}
