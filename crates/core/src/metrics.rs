use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub events_received: u64,
    pub duplicates_suppressed: u64,
    pub events_ignored: u64,
    pub completions: u64,
    pub replies_sent: u64,
    pub reply_failures: u64,
    pub auth_failures: u64,
}

/// Process-wide relay counters, exposed by the gateway's monitor endpoint.
#[derive(Debug)]
pub struct MetricsStore {
    start_time: Instant,
    events_received: AtomicU64,
    duplicates_suppressed: AtomicU64,
    events_ignored: AtomicU64,
    completions: AtomicU64,
    replies_sent: AtomicU64,
    reply_failures: AtomicU64,
    auth_failures: AtomicU64,
}

impl MetricsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            events_received: AtomicU64::new(0),
            duplicates_suppressed: AtomicU64::new(0),
            events_ignored: AtomicU64::new(0),
            completions: AtomicU64::new(0),
            replies_sent: AtomicU64::new(0),
            reply_failures: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
        })
    }

    pub fn inc_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_completions(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replies_sent(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reply_failures(&self) {
        self.reply_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            events_received: self.events_received.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            replies_sent: self.replies_sent.load(Ordering::Relaxed),
            reply_failures: self.reply_failures.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
        }
    }
}
