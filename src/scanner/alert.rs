//! Alerts raised by passive rules

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::traffic::{ChannelId, MessageKind, TrafficMessage};

/// Risk level of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Informational,
    Low,
    Medium,
    High,
}

impl Risk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Risk::Informational => "info",
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
        }
    }
}

/// How sure the rule is about the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    FalsePositive,
    Low,
    Medium,
    High,
    Confirmed,
}

/// Reference back to the scanned message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: u64,
    pub kind: MessageKind,
    pub target: String,
}

impl From<&TrafficMessage> for MessageRef {
    fn from(message: &TrafficMessage) -> Self {
        Self {
            channel_id: message.channel_id,
            message_id: message.id,
            kind: message.kind,
            target: message.target.clone(),
        }
    }
}

/// A security alert produced by a rule
///
/// Created through [`ScanHelper::new_alert`](super::ScanHelper::new_alert)
/// so that `rule_id` and `message` are always attributed correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert ID
    pub id: String,

    /// Id of the rule that raised the alert
    pub rule_id: u32,

    /// Alert name/title
    pub name: String,

    pub risk: Risk,

    pub confidence: Confidence,

    /// Description of the issue
    pub description: String,

    /// Evidence/proof of the issue
    pub evidence: Option<String>,

    /// Free-form extra information
    pub other_info: Option<String>,

    /// CWE ID (if applicable)
    pub cwe_id: Option<u32>,

    /// Originating message
    pub message: MessageRef,

    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub(crate) fn new(rule_id: u32, name: &str, message: MessageRef) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id,
            name: name.to_string(),
            risk: Risk::Informational,
            confidence: Confidence::Medium,
            description: String::new(),
            evidence: None,
            other_info: None,
            cwe_id: None,
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn with_risk(mut self, risk: Risk) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    pub fn with_evidence(mut self, evidence: &str) -> Self {
        self.evidence = Some(evidence.to_string());
        self
    }

    pub fn with_other_info(mut self, info: &str) -> Self {
        self.other_info = Some(info.to_string());
        self
    }

    pub fn with_cwe(mut self, cwe_id: u32) -> Self {
        self.cwe_id = Some(cwe_id);
        self
    }
}

/// Receiver of alerts produced by the scan worker
///
/// Called synchronously on a worker thread, once per alert, in rule
/// completion order.
pub trait AlertSink: Send + Sync {
    fn alert_found(&self, alert: Alert);

    /// A tag rule labelled `message`
    fn tag_added(&self, _message: &MessageRef, _tag: &str) {}
}

/// Sink that keeps every alert and tag in memory
#[derive(Default)]
pub struct CollectingSink {
    alerts: Mutex<Vec<Alert>>,
    tags: Mutex<Vec<(MessageRef, String)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn take(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock())
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }

    pub fn tags(&self) -> Vec<(MessageRef, String)> {
        self.tags.lock().clone()
    }
}

impl AlertSink for CollectingSink {
    fn alert_found(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }

    fn tag_added(&self, message: &MessageRef, tag: &str) {
        self.tags.lock().push((message.clone(), tag.to_string()));
    }
}
