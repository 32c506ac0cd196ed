use crate::{truncate, AuthError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use larkrelay_core::clock::{Clock, SystemClock};
use larkrelay_core::config::{FeishuConfig, DEFAULT_FEISHU_API_BASE};
use larkrelay_core::secrets::mask_token;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const TOKEN_PATH: &str = "/auth/v3/tenant_access_token/internal";
/// A token is not handed out once it is this close to expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;
const DEFAULT_EXPIRE_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    expire: Option<i64>,
}

/// Process-wide tenant access token for the app identity.
///
/// Reads share an `RwLock`; refreshes are serialized so a burst of callers
/// hitting an expired token results in a single fetch.
pub struct CredentialCache {
    app_id: String,
    app_secret: String,
    api_base: String,
    timeout: Duration,
    client: Client,
    clock: Arc<dyn Clock>,
    cached: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
}

impl CredentialCache {
    pub fn new(app_id: String, app_secret: String, api_base: Option<String>) -> Self {
        Self {
            app_id,
            app_secret,
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_FEISHU_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: Duration::from_secs(10),
            client: Client::new(),
            clock: Arc::new(SystemClock),
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn from_config(cfg: &FeishuConfig) -> Self {
        Self::new(
            cfg.app_id.clone(),
            cfg.app_secret.clone(),
            Some(cfg.api_base.clone()),
        )
        .with_timeout(Duration::from_secs(cfg.timeout_secs))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Return a usable token, fetching a new one only when the cached one is
    /// missing or inside the expiry margin.
    pub async fn token(&self) -> Result<String, AuthError> {
        if let Some(value) = self.usable_cached().await {
            return Ok(value);
        }

        let _refresh = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(value) = self.usable_cached().await {
            return Ok(value);
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *self.cached.write().await = Some(fresh);
        Ok(value)
    }

    /// Drop the cached token so the next `token()` call fetches a new one.
    pub async fn invalidate(&self) {
        if self.cached.write().await.take().is_some() {
            info!("tenant_access_token invalidated");
        }
    }

    /// Currently cached token regardless of freshness.
    pub async fn peek(&self) -> Option<AccessToken> {
        self.cached.read().await.clone()
    }

    async fn usable_cached(&self) -> Option<String> {
        let now = self.clock.now();
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|t| t.is_usable(now))
            .map(|t| t.value.clone())
    }

    async fn fetch(&self) -> Result<AccessToken, AuthError> {
        let url = format!("{}{}", self.api_base, TOKEN_PATH);
        let res = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&json!({
                "app_id": self.app_id,
                "app_secret": self.app_secret,
            }))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "tenant_access_token request failed");
                AuthError::Network(e.to_string())
            })?;

        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(%status, body = %truncate(&body, 200), "tenant_access_token HTTP error");
            return Err(AuthError::Http {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, "tenant_access_token response unreadable");
            AuthError::InvalidResponse(e.to_string())
        })?;

        if parsed.code != 0 {
            warn!(code = parsed.code, msg = %parsed.msg, "tenant_access_token rejected");
            return Err(AuthError::Rejected {
                code: parsed.code,
                msg: parsed.msg,
            });
        }

        let value = parsed
            .tenant_access_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let ttl = parsed.expire.unwrap_or(DEFAULT_EXPIRE_SECS);
        if ttl <= 0 {
            warn!(expire = ttl, "tenant_access_token expire is not positive");
            return Err(AuthError::InvalidResponse(format!(
                "non-positive expire: {}",
                ttl
            )));
        }
        let expires_at = ChronoDuration::try_seconds(ttl)
            .and_then(|d| self.clock.now().checked_add_signed(d))
            .ok_or_else(|| {
                warn!(expire = ttl, "tenant_access_token expire out of range");
                AuthError::InvalidResponse(format!("expire out of range: {}", ttl))
            })?;

        info!(ttl_secs = ttl, "tenant_access_token refreshed");
        debug!(token = %mask_token(&value), %expires_at, "token cached");

        Ok(AccessToken { value, expires_at })
    }
}
