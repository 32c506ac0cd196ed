use crate::dedupe::EventDeduplicator;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::FutureExt;
use larkrelay_core::audit::log_disposition;
use larkrelay_core::metrics::MetricsStore;
use larkrelay_core::types::{InboundEnvelope, MessageEvent, MessageType, ReplyTarget};
use larkrelay_feishu::ReplyChannel;
use larkrelay_providers::CompletionProvider;
use serde_json::{json, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// How a delivery ended, before it is mapped onto the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Challenge(Value),
    Replied(ReplyTarget),
    Duplicate,
    Ignored(&'static str),
    EmptyMessage,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed JSON body: {0}")]
    MalformedInput(#[from] serde_json::Error),
    #[error("internal failure: {0}")]
    Internal(String),
}

/// Acknowledgement returned to the platform.
#[derive(Debug, Clone)]
pub struct Ack {
    pub status: StatusCode,
    pub body: Value,
}

impl Ack {
    /// The only place dispositions and errors become HTTP responses.
    ///
    /// Anything other than unparseable JSON is acknowledged with 200 so the
    /// platform does not redeliver an event that was already admitted.
    pub fn from_outcome(outcome: &Result<Disposition, WebhookError>) -> Self {
        let (status, body) = match outcome {
            Ok(Disposition::Challenge(challenge)) => {
                (StatusCode::OK, json!({ "challenge": challenge }))
            }
            Ok(Disposition::Replied(_)) => (StatusCode::OK, json!({ "code": 0, "msg": "ok" })),
            Ok(Disposition::Duplicate) => {
                (StatusCode::OK, json!({ "code": 0, "msg": "duplicate" }))
            }
            Ok(Disposition::Ignored(reason)) => (
                StatusCode::OK,
                json!({ "code": 0, "msg": "ignored", "reason": reason }),
            ),
            Ok(Disposition::EmptyMessage) => {
                (StatusCode::OK, json!({ "code": 0, "msg": "empty message" }))
            }
            Err(WebhookError::MalformedInput(e)) => (
                StatusCode::BAD_REQUEST,
                json!({ "code": 1, "msg": "bad json", "detail": e.to_string() }),
            ),
            Err(WebhookError::Internal(detail)) => (
                StatusCode::OK,
                json!({ "code": 0, "msg": "event error", "detail": detail }),
            ),
        };
        Self { status, body }
    }
}

impl IntoResponse for Ack {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub struct WebhookHandler {
    dedupe: Arc<EventDeduplicator>,
    completer: Arc<dyn CompletionProvider>,
    replier: Arc<dyn ReplyChannel>,
    metrics: Arc<MetricsStore>,
}

impl WebhookHandler {
    pub fn new(
        dedupe: Arc<EventDeduplicator>,
        completer: Arc<dyn CompletionProvider>,
        replier: Arc<dyn ReplyChannel>,
        metrics: Arc<MetricsStore>,
    ) -> Self {
        Self {
            dedupe,
            completer,
            replier,
            metrics,
        }
    }

    /// Handle one raw webhook body. Always produces an acknowledgement.
    pub async fn handle(&self, body: &[u8]) -> Ack {
        let raw: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, bytes = body.len(), "webhook body is not JSON");
                let outcome = Err(WebhookError::MalformedInput(e));
                log_outcome(&outcome, None);
                return Ack::from_outcome(&outcome);
            }
        };

        let envelope = InboundEnvelope::from_json(&raw);
        let event_id = envelope.header.event_id.clone();

        let outcome = AssertUnwindSafe(self.process(envelope))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(WebhookError::Internal(panic_message(panic.as_ref()))));

        match &outcome {
            Ok(Disposition::Duplicate) => self.metrics.inc_duplicates(),
            Ok(Disposition::Ignored(_)) | Ok(Disposition::EmptyMessage) => {
                self.metrics.inc_ignored()
            }
            Err(e) => warn!(event_id = ?event_id, error = %e, "event processing failed"),
            _ => {}
        }

        log_outcome(&outcome, event_id.as_deref());
        Ack::from_outcome(&outcome)
    }

    async fn process(&self, envelope: InboundEnvelope) -> Result<Disposition, WebhookError> {
        if envelope.is_url_verification() {
            info!("url_verification challenge received");
            return Ok(Disposition::Challenge(envelope.challenge));
        }

        self.metrics.inc_events_received();

        if envelope.has_unsupported_schema() {
            warn!(schema = ?envelope.schema, "unsupported envelope schema ignored");
            return Ok(Disposition::Ignored("unsupported schema"));
        }

        let event_id = envelope.header.event_id.as_deref();
        if !self.dedupe.admit(event_id).await {
            info!(event_id, "duplicate delivery suppressed");
            return Ok(Disposition::Duplicate);
        }

        if !envelope.is_message_receive() {
            info!(event_type = ?envelope.header.event_type, "event type ignored");
            return Ok(Disposition::Ignored("unsupported event type"));
        }

        let message = MessageEvent::from_event(&envelope.event);
        let text = match message.text() {
            Ok(text) => text,
            Err(e) => {
                warn!(event_id, error = %e, content = %message.content, "message content is not JSON");
                return Ok(Disposition::Ignored("undecodable content"));
            }
        };

        info!(
            event_id,
            chat_id = ?message.chat_id,
            sender = ?message.sender_open_id,
            message_type = %message.message_type,
            chars = text.chars().count(),
            "message received"
        );

        if message.message_type != MessageType::Text {
            return Ok(Disposition::Ignored("non-text message"));
        }
        if text.is_empty() {
            return Ok(Disposition::EmptyMessage);
        }
        let Some(target) = message.reply_target() else {
            warn!(event_id, "message has neither message_id nor chat_id");
            return Ok(Disposition::Ignored("no reply target"));
        };

        let reply = self.completer.complete(&text).await;
        self.metrics.inc_completions();
        self.replier.reply(&target, &reply).await;

        Ok(Disposition::Replied(target))
    }
}

fn log_outcome(outcome: &Result<Disposition, WebhookError>, event_id: Option<&str>) {
    let (disposition, details) = match outcome {
        Ok(Disposition::Challenge(_)) => ("challenge", Value::Null),
        Ok(Disposition::Replied(target)) => ("replied", json!({ "target": target })),
        Ok(Disposition::Duplicate) => ("duplicate", Value::Null),
        Ok(Disposition::Ignored(reason)) => ("ignored", json!({ "reason": reason })),
        Ok(Disposition::EmptyMessage) => ("empty_message", Value::Null),
        Err(e @ WebhookError::MalformedInput(_)) => ("bad_json", json!({ "error": e.to_string() })),
        Err(e @ WebhookError::Internal(_)) => ("event_error", json!({ "error": e.to_string() })),
    };
    log_disposition(disposition, event_id, details);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic while handling event".to_string()
    }
}
