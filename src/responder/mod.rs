//! Generative fallback backend.
//!
//! A [`Responder`] turns a question into an answer when the knowledge base
//! has nothing close enough. The only shipped variant talks to an
//! OpenAI-compatible chat completions API; tests plug in their own.

pub mod openai;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::{FaqError, FaqResult};

/// Fixed answer for questions outside the assistant's domain.
pub const REFUSAL: &str = "This is not really what I was trained for, therefore I cannot answer. Try again.";

#[async_trait]
pub trait Responder: Send + Sync {
    /// Produce an answer for `question`. Failures are [`FaqError::Generation`].
    async fn respond(&self, question: &str) -> FaqResult<String>;
}

/// Create a responder from config.
pub fn create_responder(config: &GenerationConfig) -> FaqResult<Box<dyn Responder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(openai::OpenAiResponder::from_env(config)?)),
        other => Err(FaqError::InvalidArgument(format!(
            "unknown generation provider: {other}. Supported: openai"
        ))),
    }
}
