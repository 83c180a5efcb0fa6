//! LLM provider abstraction
//!
//! A normalized request/response model over the chat-completions wire
//! format, so the reasoning loop and its tests never see provider types.

mod error;
mod openai;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAiService;
pub use types::*;

use async_trait::async_trait;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}
