//! Scriptable rules for exercising the engine in tests
//!
//! Not part of the supported API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::alert::{Alert, Risk};
use super::rule::{PassiveRule, RuleKind, ScanHelper};
use crate::traffic::Payload;

#[derive(Debug, Clone)]
enum Behavior {
    Silent,
    /// Raise one alert when the response body or frame contains the needle
    Match(String),
    Fail(String),
    Panic,
    Sleep(Duration),
    /// Tag the message when the response body or frame contains the needle
    Tag { tag: String, needle: String },
}

/// Rule with fixed, scriptable behaviour
pub struct StaticRule {
    id: u32,
    name: String,
    behavior: Behavior,
    invocations: Arc<AtomicUsize>,
}

impl StaticRule {
    fn with_behavior(id: u32, name: &str, behavior: Behavior) -> Self {
        Self {
            id,
            name: name.to_string(),
            behavior,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn silent(id: u32, name: &str) -> Self {
        Self::with_behavior(id, name, Behavior::Silent)
    }

    pub fn matching(id: u32, name: &str, needle: &str) -> Self {
        Self::with_behavior(id, name, Behavior::Match(needle.to_string()))
    }

    pub fn failing(id: u32, name: &str, reason: &str) -> Self {
        Self::with_behavior(id, name, Behavior::Fail(reason.to_string()))
    }

    pub fn panicking(id: u32, name: &str) -> Self {
        Self::with_behavior(id, name, Behavior::Panic)
    }

    pub fn sleeping(id: u32, name: &str, duration: Duration) -> Self {
        Self::with_behavior(id, name, Behavior::Sleep(duration))
    }

    /// A [`RuleKind::Tag`] rule
    pub fn tagging(id: u32, name: &str, tag: &str, needle: &str) -> Self {
        Self::with_behavior(
            id,
            name,
            Behavior::Tag {
                tag: tag.to_string(),
                needle: needle.to_string(),
            },
        )
    }

    /// Shared counter of `scan` calls
    pub fn invocations(&self) -> Arc<AtomicUsize> {
        self.invocations.clone()
    }
}

fn payload_text(payload: &Payload) -> String {
    match payload {
        Payload::Http(exchange) => exchange
            .response
            .as_ref()
            .map(|r| r.body_text())
            .unwrap_or_default(),
        Payload::WebSocket(frame) => String::from_utf8_lossy(&frame.payload).to_string(),
    }
}

impl PassiveRule for StaticRule {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RuleKind {
        match self.behavior {
            Behavior::Tag { .. } => RuleKind::Tag,
            _ => RuleKind::Alert,
        }
    }

    fn scan(&self, helper: &ScanHelper<'_>, payload: &Payload) -> anyhow::Result<Vec<Alert>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            Behavior::Silent => Ok(Vec::new()),
            Behavior::Match(needle) => {
                if payload_text(payload).contains(needle.as_str()) {
                    Ok(vec![helper
                        .new_alert(&self.name)
                        .with_risk(Risk::High)
                        .with_evidence(needle)])
                } else {
                    Ok(Vec::new())
                }
            }
            Behavior::Fail(reason) => Err(anyhow::anyhow!("{}", reason)),
            Behavior::Panic => panic!("rule {} blew up", self.name),
            Behavior::Sleep(duration) => {
                std::thread::sleep(*duration);
                Ok(Vec::new())
            }
            Behavior::Tag { tag, needle } => {
                if payload_text(payload).contains(needle.as_str()) {
                    helper.add_tag(tag);
                }
                Ok(Vec::new())
            }
        }
    }
}
