//! Alert Rule Engine (C10): evaluates a condition tree against submitted
//! events and enqueues notifications for the Webhook Dispatcher to drain.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    Gt,
    Lt,
    Eq,
    Ne,
    Gte,
    Lte,
    Contains,
    NotContains,
}

/// A single leaf test over a dotted-path field of the event, or a
/// boolean combination of sub-conditions. Mirrors the teacher's
/// `ClassificationCondition { field, operator, value, weight }` shape,
/// upgraded to a typed operator and nested into a tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Condition {
    Leaf { field: String, operator: ConditionOperator, value: Value },
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub event_type: String,
    pub condition: Condition,
    pub severity: Severity,
    pub message_template: String,
    pub rate_limit: chrono::Duration,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub fields: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub event_type: String,
    pub severity: Severity,
    pub message: String,
    pub data: Value,
    pub enqueued_at: DateTime<Utc>,
}

fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |acc, segment| acc.get(segment))
}

fn compare(operator: ConditionOperator, actual: &Value, expected: &Value) -> bool {
    match operator {
        ConditionOperator::Eq => actual == expected,
        ConditionOperator::Ne => actual != expected,
        ConditionOperator::Gt | ConditionOperator::Lt | ConditionOperator::Gte | ConditionOperator::Lte => {
            let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) else { return false };
            match operator {
                ConditionOperator::Gt => a > b,
                ConditionOperator::Lt => a < b,
                ConditionOperator::Gte => a >= b,
                ConditionOperator::Lte => a <= b,
                _ => unreachable!(),
            }
        }
        ConditionOperator::Contains | ConditionOperator::NotContains => {
            let contains = match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(b)) => a.contains(b),
                _ => actual.as_array().map(|arr| arr.contains(expected)).unwrap_or(false),
            };
            if operator == ConditionOperator::Contains { contains } else { !contains }
        }
    }
}

fn evaluate(condition: &Condition, event: &Value) -> bool {
    match condition {
        Condition::Leaf { field, operator, value } => match resolve_path(event, field) {
            Some(actual) => compare(*operator, actual, value),
            None => false,
        },
        Condition::All(children) => children.iter().all(|c| evaluate(c, event)),
        Condition::Any(children) => children.iter().any(|c| evaluate(c, event)),
    }
}

fn render_template(template: &str, event: &Event) -> String {
    template.replace("{event_type}", &event.event_type).replace("{timestamp}", &event.timestamp.to_rfc3339())
}

pub struct AlertEngine {
    rules: Mutex<Vec<AlertRule>>,
    last_emitted: DashMap<Uuid, DateTime<Utc>>,
    sender: mpsc::Sender<Notification>,
}

impl AlertEngine {
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        AlertEngine { rules: Mutex::new(Vec::new()), last_emitted: DashMap::new(), sender }
    }

    pub fn register_rule(&self, rule: AlertRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn remove_rule(&self, id: &Uuid) {
        self.rules.lock().unwrap().retain(|r| r.id != *id);
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.lock().unwrap().clone()
    }

    /// Walk registered rules for this event's type, evaluate each
    /// condition tree, and enqueue a notification for every match whose
    /// rate-limit window has elapsed, per §4.7.
    pub async fn submit(&self, event: Event) -> Vec<Uuid> {
        let candidates: Vec<AlertRule> = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.enabled && r.event_type == event.event_type)
            .cloned()
            .collect();

        let mut fired = Vec::new();
        for rule in candidates {
            if !evaluate(&rule.condition, &event.fields) {
                continue;
            }
            let now = Utc::now();
            if let Some(last) = self.last_emitted.get(&rule.id) {
                if now - *last < rule.rate_limit {
                    continue;
                }
            }
            self.last_emitted.insert(rule.id, now);

            let notification = Notification {
                id: Uuid::new_v4(),
                rule_id: rule.id,
                event_type: event.event_type.clone(),
                severity: rule.severity,
                message: render_template(&rule.message_template, &event),
                data: event.fields.clone(),
                enqueued_at: now,
            };
            fired.push(rule.id);
            let _ = self.sender.send(notification).await;
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanctions_rule() -> AlertRule {
        AlertRule {
            id: Uuid::new_v4(),
            name: "sanctions touch".to_string(),
            event_type: "risk_assessment".to_string(),
            condition: Condition::All(vec![Condition::Leaf {
                field: "score".to_string(),
                operator: ConditionOperator::Gte,
                value: json!(0.8),
            }]),
            severity: Severity::Critical,
            message_template: "high risk score on {event_type}".to_string(),
            rate_limit: chrono::Duration::seconds(60),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_matching_event_fires_rule() {
        let (tx, mut rx) = mpsc::channel(8);
        let engine = AlertEngine::new(tx);
        engine.register_rule(sanctions_rule());

        let fired = engine
            .submit(Event { event_type: "risk_assessment".to_string(), timestamp: Utc::now(), fields: json!({"score": 0.95}) })
            .await;

        assert_eq!(fired.len(), 1);
        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_non_matching_event_does_not_fire() {
        let (tx, _rx) = mpsc::channel(8);
        let engine = AlertEngine::new(tx);
        engine.register_rule(sanctions_rule());

        let fired = engine
            .submit(Event { event_type: "risk_assessment".to_string(), timestamp: Utc::now(), fields: json!({"score": 0.1}) })
            .await;
        assert!(fired.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_suppresses_repeat_emission() {
        let (tx, mut rx) = mpsc::channel(8);
        let engine = AlertEngine::new(tx);
        engine.register_rule(sanctions_rule());

        let event = Event { event_type: "risk_assessment".to_string(), timestamp: Utc::now(), fields: json!({"score": 0.95}) };
        engine.submit(event.clone()).await;
        let fired_again = engine.submit(event).await;

        assert!(fired_again.is_empty());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
