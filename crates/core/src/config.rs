use crate::secrets::mask_secret;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_FEISHU_API_BASE: &str = "https://open.feishu.cn/open-apis";
pub const DEFAULT_DASHSCOPE_API_BASE: &str = "https://dashscope.aliyuncs.com/api/v1";
pub const DEFAULT_MODEL: &str = "qwen-turbo";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub feishu: FeishuConfig,
    pub dashscope: DashScopeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dedupe_ttl_secs: u64,
    pub body_limit_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeishuConfig {
    pub app_id: String,
    pub app_secret: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DashScopeConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub timeout_secs: u64,
}

impl AppConfig {
    /// Load config from defaults, an optional file and the process environment.
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load_from(custom_path.as_deref(), &env)
    }

    /// Layering, lowest to highest: defaults, file, `LARKRELAY__SECTION__KEY`,
    /// then the bare `FEISHU_APP_ID` / `FEISHU_APP_SECRET` / `DASHSCOPE_API_KEY` / `PORT`.
    pub fn load_from(path: Option<&Path>, env: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000)?
            .set_default("server.dedupe_ttl_secs", 300)?
            .set_default("server.body_limit_bytes", 1024 * 1024)?
            .set_default("feishu.app_id", "")?
            .set_default("feishu.app_secret", "")?
            .set_default("feishu.api_base", DEFAULT_FEISHU_API_BASE)?
            .set_default("feishu.timeout_secs", 10)?
            .set_default("dashscope.api_key", "")?
            .set_default("dashscope.api_base", DEFAULT_DASHSCOPE_API_BASE)?
            .set_default("dashscope.model", DEFAULT_MODEL)?
            .set_default("dashscope.timeout_secs", 30)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let scoped: config::Map<String, String> = env
            .iter()
            .filter(|(k, _)| k.starts_with("LARKRELAY__"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        builder = builder.add_source(
            Environment::with_prefix("LARKRELAY")
                .prefix_separator("__")
                .separator("__")
                .source(Some(scoped)),
        );

        let port = env
            .get("PORT")
            .and_then(|p| p.trim().parse::<u16>().ok())
            .map(i64::from);

        let s = builder
            .set_override_option("feishu.app_id", env.get("FEISHU_APP_ID").cloned())?
            .set_override_option("feishu.app_secret", env.get("FEISHU_APP_SECRET").cloned())?
            .set_override_option("dashscope.api_key", env.get("DASHSCOPE_API_KEY").cloned())?
            .set_override_option("server.port", port)?
            .build()?;

        s.try_deserialize()
    }

    /// Credentials and timeouts needed to serve traffic. `status` works without them, `serve` does not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.feishu.app_id.trim().is_empty() {
            problems.push("feishu.app_id (FEISHU_APP_ID)");
        }
        if self.feishu.app_secret.trim().is_empty() {
            problems.push("feishu.app_secret (FEISHU_APP_SECRET)");
        }
        if self.dashscope.api_key.trim().is_empty() {
            problems.push("dashscope.api_key (DASHSCOPE_API_KEY)");
        }
        if self.feishu.timeout_secs == 0 {
            problems.push("feishu.timeout_secs (must be at least 1)");
        }
        if self.dashscope.timeout_secs == 0 {
            problems.push("dashscope.timeout_secs (must be at least 1)");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Message(format!(
                "missing or invalid settings: {}",
                problems.join(", ")
            )))
        }
    }

    /// Copy with every secret masked, safe to print or log.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.feishu.app_secret = mask_secret(&copy.feishu.app_secret);
        copy.dashscope.api_key = mask_secret(&copy.dashscope.api_key);
        copy
    }
}
