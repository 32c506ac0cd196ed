use anyhow::Result;
use larkrelay_core::config::{DashScopeConfig, FeishuConfig};
use larkrelay_core::secrets::mask_token;
use larkrelay_feishu::CredentialCache;
use larkrelay_providers::dashscope::CompletionClient;
use larkrelay_providers::extract::extract_reply;
use tracing::info;

/// Verify the Feishu app credentials by fetching a tenant access token.
pub async fn verify_feishu(cfg: &FeishuConfig) -> Result<String> {
    let cache = CredentialCache::from_config(cfg);
    match cache.token().await {
        Ok(token) => {
            info!(app_id = %cfg.app_id, "Feishu credentials verified");
            Ok(format!(
                "✅ Feishu app {} issued a tenant token ({})",
                cfg.app_id,
                mask_token(&token)
            ))
        }
        Err(e) => Err(anyhow::anyhow!(
            "❌ Feishu token request failed for app {}: {}",
            cfg.app_id,
            e
        )),
    }
}

/// Verify the DashScope API key with a one-word prompt.
pub async fn verify_dashscope(cfg: &DashScopeConfig) -> Result<String> {
    let client = CompletionClient::from_config(cfg);
    let body = client
        .generate("Say 'ok' in one word")
        .await
        .map_err(|e| anyhow::anyhow!("❌ DashScope key verification failed: {}", e))?;

    let sample = extract_reply(&body)
        .map(|r| r.text)
        .unwrap_or_else(|| "<no text>".to_string());
    info!(model = %cfg.model, "DashScope key verified");
    Ok(format!(
        "✅ DashScope key is valid (model {}, replied {:?})",
        cfg.model, sample
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feishu_cfg(base: String) -> FeishuConfig {
        FeishuConfig {
            app_id: "cli_check".into(),
            app_secret: "secret".into(),
            api_base: base,
            timeout_secs: 5,
        }
    }

    fn dashscope_cfg(base: String) -> DashScopeConfig {
        DashScopeConfig {
            api_key: "sk-check".into(),
            api_base: base,
            model: "qwen-turbo".into(),
            system_prompt: None,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn feishu_check_masks_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v3/tenant_access_token/internal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0, "tenant_access_token": "t-verysecretvalue", "expire": 7200
            })))
            .mount(&server)
            .await;

        let msg = verify_feishu(&feishu_cfg(server.uri())).await.unwrap();
        assert!(msg.contains("cli_check"));
        assert!(!msg.contains("t-verysecretvalue"));
    }

    #[tokio::test]
    async fn feishu_check_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v3/tenant_access_token/internal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 10014, "msg": "app secret invalid"
            })))
            .mount(&server)
            .await;

        let err = verify_feishu(&feishu_cfg(server.uri())).await.unwrap_err();
        assert!(err.to_string().contains("10014"));
    }

    #[tokio::test]
    async fn dashscope_check_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/aigc/text-generation/generation"))
            .respond_with(ResponseTemplate::new(401).set_body_string("InvalidApiKey"))
            .mount(&server)
            .await;

        let err = verify_dashscope(&dashscope_cfg(server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn dashscope_check_accepts_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/aigc/text-generation/generation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": {"choices": [{"message": {"content": "ok"}}]}
            })))
            .mount(&server)
            .await;

        let msg = verify_dashscope(&dashscope_cfg(server.uri())).await.unwrap();
        assert!(msg.contains("\"ok\""));
    }
}
