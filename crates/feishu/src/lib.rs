//! Outbound side of the Feishu open platform: tenant credentials and message replies.

pub mod dispatch;
pub mod token;

pub use dispatch::{ReplyChannel, ReplyDispatcher};
pub use token::CredentialCache;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Network(String),
    #[error("token endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("token endpoint rejected credentials (code {code}): {msg}")]
    Rejected { code: i64, msg: String },
    #[error("token response missing tenant_access_token")]
    MissingToken,
    #[error("unreadable token response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("send failed: {0}")]
    Network(String),
    #[error("invalid API base URL: {0}")]
    InvalidUrl(String),
    #[error("send returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("platform rejected message (code {code}): {msg}")]
    Rejected { code: i64, msg: String },
}

/// Codes the platform uses for an invalid or expired tenant access token.
pub(crate) const TOKEN_INVALID_CODES: &[i64] = &[99991661, 99991663, 99991668];

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
