//! Webhook Dispatcher (C11): drains the Alert Rule Engine's notification
//! queue and fans out to registered sinks with filtering, formatting,
//! per-sink rate limiting, and bounded retries.

use crate::alert_engine::{Notification, Severity};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFormat {
    Passthrough,
    Slack,
    Discord,
    Teams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSink {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub format: PayloadFormat,
    pub event_filter: Vec<String>,
    pub severity_filter: Vec<Severity>,
    pub rate_limit: chrono::Duration,
    pub enabled: bool,
}

impl WebhookSink {
    fn accepts(&self, notification: &Notification) -> bool {
        self.enabled
            && (self.event_filter.is_empty() || self.event_filter.iter().any(|e| e == &notification.event_type))
            && (self.severity_filter.is_empty() || self.severity_filter.contains(&notification.severity))
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "#2986cc",
        Severity::Low => "#6aa84f",
        Severity::Medium => "#f1c232",
        Severity::High => "#e69138",
        Severity::Critical => "#cc0000",
    }
}

/// Render a notification into the sink's declared wire format. Default
/// passthrough is `{event_type, timestamp, data}`; adapter formats wrap
/// the same fields in a platform-native envelope, per §6.
fn render_payload(format: PayloadFormat, notification: &Notification) -> Value {
    match format {
        PayloadFormat::Passthrough => json!({
            "event_type": notification.event_type,
            "timestamp": notification.enqueued_at.to_rfc3339(),
            "data": notification.data,
        }),
        PayloadFormat::Slack => json!({
            "attachments": [{
                "color": severity_color(notification.severity),
                "title": notification.event_type,
                "text": notification.message,
                "ts": notification.enqueued_at.timestamp(),
            }]
        }),
        PayloadFormat::Discord => json!({
            "embeds": [{
                "title": notification.event_type,
                "description": notification.message,
                "color": severity_color(notification.severity),
                "timestamp": notification.enqueued_at.to_rfc3339(),
            }]
        }),
        PayloadFormat::Teams => json!({
            "@type": "MessageCard",
            "summary": notification.event_type,
            "themeColor": severity_color(notification.severity),
            "text": notification.message,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub sink_id: Uuid,
    pub notification_id: Uuid,
    pub delivered: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebhookDispatchConfig {
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

pub struct WebhookDispatcher {
    sinks: Mutex<Vec<WebhookSink>>,
    last_delivered: DashMap<Uuid, DateTime<Utc>>,
    client: reqwest::Client,
    config: WebhookDispatchConfig,
    outcomes: Mutex<Vec<DeliveryOutcome>>,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookDispatchConfig) -> Self {
        let client = reqwest::Client::builder().timeout(config.request_timeout).build().expect("reqwest client builds");
        WebhookDispatcher { sinks: Mutex::new(Vec::new()), last_delivered: DashMap::new(), client, config, outcomes: Mutex::new(Vec::new()) }
    }

    pub fn register_sink(&self, sink: WebhookSink) {
        self.sinks.lock().unwrap().push(sink);
    }

    pub fn sinks(&self) -> Vec<WebhookSink> {
        self.sinks.lock().unwrap().clone()
    }

    pub fn outcomes(&self) -> Vec<DeliveryOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    /// The dispatcher's main loop: drains the queue serially (fan-in),
    /// but fans each notification out to its accepting sinks in
    /// parallel, honouring the concurrency model of §5.
    pub async fn run(&self, mut receiver: mpsc::Receiver<Notification>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                notification = receiver.recv() => {
                    match notification {
                        Some(notification) => self.fan_out(&notification).await,
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn fan_out(&self, notification: &Notification) {
        let sinks: Vec<WebhookSink> = self.sinks.lock().unwrap().iter().filter(|s| s.accepts(notification)).cloned().collect();
        let deliveries = sinks.into_iter().map(|sink| self.deliver_to_sink(sink, notification.clone()));
        futures::future::join_all(deliveries).await;
    }

    /// Per-sink delivery is serial with respect to that sink's own
    /// deliveries (to preserve enqueue ordering within a sink), even
    /// though sinks themselves are dispatched in parallel.
    async fn deliver_to_sink(&self, sink: WebhookSink, notification: Notification) {
        let now = Utc::now();
        if let Some(last) = self.last_delivered.get(&sink.id) {
            if now - *last < sink.rate_limit {
                return;
            }
        }

        let payload = render_payload(sink.format, &notification);
        let mut attempts = 0;
        let mut last_error = None;
        let mut delivered = false;

        while attempts < self.config.max_attempts {
            attempts += 1;
            match self.client.post(&sink.url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    delivered = true;
                    break;
                }
                Ok(response) => {
                    last_error = Some(format!("non-2xx status: {}", response.status()));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }
            let backoff = self.config.backoff_base * 2u32.pow(attempts.saturating_sub(1));
            tokio::time::sleep(backoff).await;
        }

        if delivered {
            self.last_delivered.insert(sink.id, now);
        }

        self.outcomes.lock().unwrap().push(DeliveryOutcome {
            sink_id: sink.id,
            notification_id: notification.id,
            delivered,
            attempts,
            last_error,
        });
    }
}
