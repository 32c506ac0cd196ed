pub mod dashscope;
pub mod extract;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Short description that is safe to show to chat users.
    pub fn user_facing(&self) -> String {
        match self {
            Self::Timeout => "the request timed out".to_string(),
            Self::NetworkError(_) => "the service could not be reached".to_string(),
            Self::ApiError { status, .. } => format!("the service answered HTTP {}", status),
            Self::InvalidResponse(_) => "the service sent an unreadable response".to_string(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::NetworkError(e.to_string())
        }
    }
}

/// A single-turn text completion. Implementations never fail: every error
/// path resolves to a human-readable reply.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> String;
}
