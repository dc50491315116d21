use crate::config::{non_empty, OpenAiConfig};
use crate::error::ChatError;
use crate::traits::ChatModel;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Single-turn client for OpenAI-compatible `/chat/completions`.
pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(config: &OpenAiConfig) -> Result<Self, ChatError> {
        let api_key = non_empty(config.api_key.clone()).ok_or(ChatError::MissingApiKey)?;

        Ok(Self {
            client: Client::new(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.chat_model.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ChatError> {
        debug!(model = %self.model, "chat completion request");

        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(ChatError::Provider {
                status: status.as_u16(),
                details,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ChatError::EmptyResponse)
    }
}

/// Offline stand-in: answers with the context section sharing the most words
/// with the question.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractiveChat;

#[async_trait]
impl ChatModel for ExtractiveChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ChatError> {
        let terms = user
            .split_whitespace()
            .map(|term| term.trim_matches(|ch: char| !ch.is_alphanumeric()).to_lowercase())
            .filter(|term| term.len() > 2)
            .collect::<Vec<_>>();

        let context = system
            .split_once("Context:")
            .map(|(_, context)| context)
            .unwrap_or_default();

        context
            .split("\n\nPage Number: ")
            .map(|section| section.trim().trim_start_matches("Page Number: "))
            .filter(|section| !section.is_empty())
            .map(|section| {
                let lowered = section.to_lowercase();
                let overlap = terms.iter().filter(|term| lowered.contains(term.as_str())).count();
                (overlap, section)
            })
            .max_by_key(|(overlap, _)| *overlap)
            .map(|(_, section)| format!("From page {section}"))
            .ok_or(ChatError::EmptyResponse)
    }
}
