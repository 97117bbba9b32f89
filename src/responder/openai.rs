//! OpenAI-compatible chat completions responder.
//!
//! Two calls per question: a zero-temperature classification into `IT` or
//! `NON_IT`, then either an IT-support answer or the fixed [`REFUSAL`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Responder, REFUSAL};
use crate::config::GenerationConfig;
use crate::error::{FaqError, FaqResult};

const API_KEY_ENV: &str = "OPENAI_API_KEY";

const CLASSIFY_PROMPT: &str = r#"Given the following question, determine if it's related to IT support / account management or not.
Classify it as either `IT` if it is or `NON_IT` if it's not.

Examples:

<question>
How do I reset my password?
</question>
Classification: IT

<question>
Can I get a discount if I buy a lot of stuff?
</question>
Classification: NON_IT

Do not respond with more than this classification.

<question>
{question}
</question>
Classification:"#;

const ANSWER_PROMPT: &str = r#"You are an expert in IT support and account management.

You answer only to this kind of questions and nothing more.

Provide a short but helpful answer.

Question: {question}
Answer:"#;

/// Topic assigned by the classification call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    It,
    NonIt,
}

impl Topic {
    /// Parse the model's classification. Anything unrecognized is `NonIt`.
    pub fn parse(label: &str) -> Self {
        let label = label.trim().to_ascii_uppercase();
        if label.contains("NON_IT") || label.contains("NON-IT") || label.contains("NON IT") {
            Self::NonIt
        } else if label.split(|c: char| !c.is_ascii_alphanumeric() && c != '_').any(|w| w == "IT") {
            Self::It
        } else {
            Self::NonIt
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    n: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Clone)]
pub struct OpenAiResponder {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    n: u32,
}

impl OpenAiResponder {
    /// Build a responder, reading the API key from `OPENAI_API_KEY`.
    pub fn from_env(config: &GenerationConfig) -> FaqResult<Self> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            FaqError::Generation(format!("{API_KEY_ENV} environment variable is not set"))
        })?;
        Self::new(config, &api_key)
    }

    pub fn new(config: &GenerationConfig, api_key: &str) -> FaqResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| FaqError::Generation(format!("invalid API key header: {e}")))?;
        headers.insert(AUTHORIZATION, auth);

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| FaqError::Generation(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            n: config.n.max(1),
        })
    }

    async fn complete(&self, request: ChatRequest<'_>) -> FaqResult<String> {
        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| FaqError::Generation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "chat completion rejected");
            let reason = match status {
                StatusCode::UNAUTHORIZED => "authentication failed",
                StatusCode::TOO_MANY_REQUESTS => "rate limit reached",
                _ => "backend error",
            };
            return Err(FaqError::Generation(format!("{reason} ({status})")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| FaqError::Generation(format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| FaqError::Generation("response contained no message".into()))
    }

    async fn classify(&self, question: &str) -> FaqResult<Topic> {
        let label = self
            .complete(ChatRequest {
                model: &self.model,
                messages: vec![user_message(CLASSIFY_PROMPT.replace("{question}", question))],
                temperature: 0.0,
                max_tokens: None,
                n: 1,
            })
            .await?;
        let topic = Topic::parse(&label);
        tracing::debug!(label = %label.trim(), ?topic, "question classified");
        Ok(topic)
    }
}

fn user_message(content: String) -> ChatMessage {
    ChatMessage {
        role: "user".into(),
        content: Some(content),
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    async fn respond(&self, question: &str) -> FaqResult<String> {
        match self.classify(question).await? {
            Topic::NonIt => Ok(REFUSAL.to_string()),
            Topic::It => {
                let answer = self
                    .complete(ChatRequest {
                        model: &self.model,
                        messages: vec![user_message(ANSWER_PROMPT.replace("{question}", question))],
                        temperature: self.temperature,
                        max_tokens: Some(self.max_tokens),
                        n: self.n,
                    })
                    .await?;
                Ok(answer.trim().to_string())
            }
        }
    }
}
