use crate::extract::extract_reply;
use crate::{CompletionProvider, ProviderError};
use async_trait::async_trait;
use larkrelay_core::config::{DashScopeConfig, DEFAULT_DASHSCOPE_API_BASE};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const NO_CONTENT_REPLY: &str = "The model returned an empty answer. Please try rephrasing.";

const GENERATION_PATH: &str = "/services/aigc/text-generation/generation";

/// Client for the DashScope text-generation endpoint (Qwen models).
pub struct CompletionClient {
    api_key: String,
    api_base: String,
    model: String,
    system_prompt: Option<String>,
    timeout: Duration,
    client: Client,
}

impl CompletionClient {
    pub fn new(api_key: String, api_base: Option<String>, model: String) -> Self {
        Self {
            api_key,
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_DASHSCOPE_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            system_prompt: None,
            timeout: Duration::from_secs(30),
            client: Client::new(),
        }
    }

    pub fn from_config(cfg: &DashScopeConfig) -> Self {
        Self::new(cfg.api_key.clone(), Some(cfg.api_base.clone()), cfg.model.clone())
            .with_system_prompt(cfg.system_prompt.clone())
            .with_timeout(Duration::from_secs(cfg.timeout_secs))
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        json!({
            "model": self.model,
            "input": { "messages": messages },
            "parameters": { "result_format": "message" },
        })
    }

    /// Send the request and return the raw JSON body of a successful response.
    pub async fn generate(&self, prompt: &str) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.api_base, GENERATION_PATH);

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        res.json::<Value>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl CompletionProvider for CompletionClient {
    async fn complete(&self, prompt: &str) -> String {
        match self.generate(prompt).await {
            Ok(body) => match extract_reply(&body) {
                Some(found) => {
                    debug!(source = found.source, chars = found.text.len(), "completion extracted");
                    found.text
                }
                None => {
                    warn!(body = %truncate(&body.to_string(), 300), "completion response had no content");
                    NO_CONTENT_REPLY.to_string()
                }
            },
            Err(e) => {
                warn!(model = %self.model, error = %e, "completion request failed");
                fallback_reply(&e)
            }
        }
    }
}

pub fn fallback_reply(err: &ProviderError) -> String {
    format!(
        "Sorry, I couldn't get an answer from the model ({}). Please try again later.",
        err.user_facing()
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
