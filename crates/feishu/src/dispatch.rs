use crate::token::CredentialCache;
use crate::{truncate, DispatchError, TOKEN_INVALID_CODES};
use async_trait::async_trait;
use larkrelay_core::config::{FeishuConfig, DEFAULT_FEISHU_API_BASE};
use larkrelay_core::metrics::MetricsStore;
use larkrelay_core::types::ReplyTarget;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Delivers a reply to the chat platform. Failures stay inside the implementation.
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn reply(&self, target: &ReplyTarget, text: &str);
}

pub struct ReplyDispatcher {
    credentials: Arc<CredentialCache>,
    api_base: String,
    timeout: Duration,
    client: Client,
    metrics: Option<Arc<MetricsStore>>,
}

impl ReplyDispatcher {
    pub fn new(credentials: Arc<CredentialCache>, api_base: Option<String>) -> Self {
        Self {
            credentials,
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_FEISHU_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: Duration::from_secs(10),
            client: Client::new(),
            metrics: None,
        }
    }

    pub fn from_config(credentials: Arc<CredentialCache>, cfg: &FeishuConfig) -> Self {
        Self::new(credentials, Some(cfg.api_base.clone()))
            .with_timeout(Duration::from_secs(cfg.timeout_secs))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsStore>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Send `text` to `target`, fetching a token right before the call.
    pub async fn send(&self, target: &ReplyTarget, text: &str) -> Result<(), DispatchError> {
        let token = self.credentials.token().await?;
        let content = json!({ "text": text }).to_string();

        let request = match target {
            ReplyTarget::Message { message_id } => self
                .client
                .post(self.endpoint(&["im", "v1", "messages", message_id, "reply"])?)
                .json(&json!({ "msg_type": "text", "content": content })),
            ReplyTarget::Chat { chat_id } => self
                .client
                .post(self.endpoint(&["im", "v1", "messages"])?)
                .query(&[("receive_id_type", "chat_id")])
                .json(&json!({
                    "receive_id": chat_id,
                    "msg_type": "text",
                    "content": content,
                })),
        };

        let res = request
            .bearer_auth(&token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            // Token errors also come back as HTTP 400 with a code in the body.
            self.check_token_code(&body).await;
            return Err(DispatchError::Http {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        let code = parsed.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        if code != 0 {
            self.check_token_code(&body).await;
            return Err(DispatchError::Rejected {
                code,
                msg: parsed
                    .get("msg")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        Ok(())
    }

    /// `api_base` plus percent-encoded path segments, so ids cannot alter the route.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, DispatchError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| DispatchError::InvalidUrl(format!("{}: {}", self.api_base, e)))?;
        url.path_segments_mut()
            .map_err(|_| DispatchError::InvalidUrl(self.api_base.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check_token_code(&self, body: &str) {
        let code = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("code").and_then(|c| c.as_i64()));
        if let Some(code) = code.filter(|c| TOKEN_INVALID_CODES.contains(c)) {
            warn!(code, "platform reported an invalid tenant token");
            self.credentials.invalidate().await;
        }
    }
}

#[async_trait]
impl ReplyChannel for ReplyDispatcher {
    async fn reply(&self, target: &ReplyTarget, text: &str) {
        match self.send(target, text).await {
            Ok(()) => {
                info!(%target, chars = text.chars().count(), "reply delivered");
                if let Some(m) = &self.metrics {
                    m.inc_replies_sent();
                }
            }
            Err(DispatchError::Auth(e)) => {
                error!(%target, error = %e, "reply abandoned: no tenant token");
                if let Some(m) = &self.metrics {
                    m.inc_auth_failures();
                    m.inc_reply_failures();
                }
            }
            Err(e) => {
                error!(%target, error = %e, "reply failed");
                if let Some(m) = &self.metrics {
                    m.inc_reply_failures();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_token(server: &MockServer, expect: u64) {
        Mock::given(method("POST"))
            .and(path("/auth/v3/tenant_access_token/internal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0, "msg": "ok", "tenant_access_token": "t-abc", "expire": 7200
            })))
            .expect(expect)
            .mount(server)
            .await;
    }

    fn dispatcher(server: &MockServer) -> ReplyDispatcher {
        let creds = Arc::new(CredentialCache::new(
            "cli_app".into(),
            "secret".into(),
            Some(server.uri()),
        ));
        ReplyDispatcher::new(creds, Some(server.uri()))
    }

    #[tokio::test]
    async fn replies_in_thread_to_message() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/im/v1/messages/om_1/reply"))
            .and(header("Authorization", "Bearer t-abc"))
            .and(body_json(json!({
                "msg_type": "text",
                "content": "{\"text\":\"你好\"}"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "msg": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let target = ReplyTarget::Message {
            message_id: "om_1".into(),
        };
        dispatcher(&server).send(&target, "你好").await.unwrap();
    }

    #[tokio::test]
    async fn sends_to_chat_with_receive_id_type() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/im/v1/messages"))
            .and(query_param("receive_id_type", "chat_id"))
            .and(header("Authorization", "Bearer t-abc"))
            .and(body_json(json!({
                "receive_id": "oc_1",
                "msg_type": "text",
                "content": "{\"text\":\"hello\"}"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let target = ReplyTarget::Chat {
            chat_id: "oc_1".into(),
        };
        dispatcher(&server).send(&target, "hello").await.unwrap();
    }

    #[tokio::test]
    async fn message_id_is_encoded_as_one_path_segment() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/im/v1/messages/om%2F..%2Fchats%3Fx=1/reply"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let target = ReplyTarget::Message {
            message_id: "om/../chats?x=1".into(),
        };
        dispatcher(&server).send(&target, "hi").await.unwrap();
    }

    #[tokio::test]
    async fn api_base_path_prefix_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/open-apis/auth/v3/tenant_access_token/internal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0, "tenant_access_token": "t-abc", "expire": 7200
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/open-apis/im/v1/messages/om_1/reply"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let base = format!("{}/open-apis/", server.uri());
        let creds = Arc::new(CredentialCache::new(
            "cli_app".into(),
            "secret".into(),
            Some(base.clone()),
        ));
        let target = ReplyTarget::Message {
            message_id: "om_1".into(),
        };
        ReplyDispatcher::new(creds, Some(base))
            .send(&target, "hi")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn token_failure_abandons_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v3/tenant_access_token/internal"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/im/v1/messages/om_1/reply"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let metrics = MetricsStore::new();
        let d = dispatcher(&server).with_metrics(metrics.clone());
        let target = ReplyTarget::Message {
            message_id: "om_1".into(),
        };
        assert!(matches!(
            d.send(&target, "x").await,
            Err(DispatchError::Auth(_))
        ));

        // Fire-and-forget path only logs and counts.
        d.reply(&target, "x").await;
        let snap = metrics.snapshot();
        assert_eq!(snap.auth_failures, 1);
        assert_eq!(snap.replies_sent, 0);
    }

    #[tokio::test]
    async fn invalid_token_code_invalidates_cache() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/im/v1/messages/om_1/reply"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": 99991663, "msg": "Invalid access token for authorization."
            })))
            .expect(2)
            .mount(&server)
            .await;

        let d = dispatcher(&server);
        let target = ReplyTarget::Message {
            message_id: "om_1".into(),
        };
        assert!(matches!(
            d.send(&target, "x").await,
            Err(DispatchError::Http { status: 400, .. })
        ));
        assert!(d.credentials.peek().await.is_none());
        let _ = d.send(&target, "x").await;
    }

    #[tokio::test]
    async fn non_zero_code_with_http_200_is_a_failure() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/im/v1/messages/om_1/reply"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 230002, "msg": "Bot is not in the chat."
            })))
            .mount(&server)
            .await;

        let metrics = MetricsStore::new();
        let d = dispatcher(&server).with_metrics(metrics.clone());
        let target = ReplyTarget::Message {
            message_id: "om_1".into(),
        };
        d.reply(&target, "x").await;
        assert_eq!(metrics.snapshot().reply_failures, 1);
        assert!(d.credentials.peek().await.is_some());
    }
}
