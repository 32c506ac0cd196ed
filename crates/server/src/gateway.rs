use crate::dedupe::EventDeduplicator;
use crate::webhook::{Ack, WebhookHandler};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use larkrelay_core::config::AppConfig;
use larkrelay_core::metrics::{MetricsSnapshot, MetricsStore};
use larkrelay_feishu::{CredentialCache, ReplyDispatcher};
use larkrelay_providers::dashscope::CompletionClient;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;
const MAX_DEDUPE_TTL_SECS: u64 = 7 * 24 * 3600;

#[derive(Clone)]
struct AppState {
    handler: Arc<WebhookHandler>,
    metrics: Arc<MetricsStore>,
}

pub struct Gateway {
    host: String,
    port: u16,
    body_limit: usize,
    handler: Arc<WebhookHandler>,
    metrics: Arc<MetricsStore>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct IndexResponse {
    status: &'static str,
    service: &'static str,
    webhook: &'static str,
}

impl Gateway {
    pub fn new(
        host: String,
        port: u16,
        handler: Arc<WebhookHandler>,
        metrics: Arc<MetricsStore>,
    ) -> Self {
        Self {
            host,
            port,
            body_limit: DEFAULT_BODY_LIMIT,
            handler,
            metrics,
        }
    }

    /// Wire the full relay from config: token cache, reply dispatcher,
    /// completion client and dedupe window.
    pub fn from_config(cfg: &AppConfig) -> Self {
        let metrics = MetricsStore::new();

        let credentials = Arc::new(CredentialCache::from_config(&cfg.feishu));
        let replier = Arc::new(
            ReplyDispatcher::from_config(credentials, &cfg.feishu).with_metrics(metrics.clone()),
        );
        let completer = Arc::new(CompletionClient::from_config(&cfg.dashscope));

        let ttl = cfg.server.dedupe_ttl_secs.min(MAX_DEDUPE_TTL_SECS) as i64;
        let dedupe = Arc::new(EventDeduplicator::new(chrono::Duration::seconds(ttl)));

        let handler = Arc::new(WebhookHandler::new(
            dedupe,
            completer,
            replier,
            metrics.clone(),
        ));

        Self::new(cfg.server.host.clone(), cfg.server.port, handler, metrics)
            .with_body_limit(cfg.server.body_limit_bytes)
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit.max(1);
        self
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            handler: self.handler.clone(),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(index))
            .route("/health", get(health_check))
            .route("/api/monitor/metrics", get(get_metrics))
            .route("/webhook", post(webhook))
            .route("/feishu/webhook", post(webhook))
            .layer(DefaultBodyLimit::max(self.body_limit))
            .with_state(state)
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let app = self.router();

        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        info!(addr = %listener.local_addr()?, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn index() -> Json<IndexResponse> {
    Json(IndexResponse {
        status: "ok",
        service: "larkrelay is running",
        webhook: "/webhook",
    })
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn webhook(State(state): State<AppState>, body: Bytes) -> Ack {
    state.handler.handle(&body).await
}
