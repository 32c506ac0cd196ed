use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// Log target for audit lines; the CLI routes it to its own file.
pub const AUDIT_TARGET: &str = "audit";

#[derive(Serialize)]
pub struct AuditEvent<'a> {
    pub timestamp: i64,
    pub disposition: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<&'a str>,
    pub details: Value,
}

/// Record the final disposition of one webhook delivery.
pub fn log_disposition(disposition: &str, event_id: Option<&str>, details: Value) {
    let event = AuditEvent {
        timestamp: Utc::now().timestamp_millis(),
        disposition,
        event_id,
        details,
    };

    // Serialize to JSON string immediately to ensure the log payload is clean JSON
    if let Ok(json_str) = serde_json::to_string(&event) {
        info!(target: "audit", "{}", json_str);
    }
}
