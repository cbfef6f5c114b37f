//! Information leaks in WebSocket frames

use regex::Regex;
use std::sync::OnceLock;

use crate::scanner::alert::{Alert, Confidence, Risk};
use crate::scanner::rule::{AlertThreshold, PassiveRule, ScanHelper};
use crate::traffic::{MessageKind, Payload};

/// Looks for credentials, internal addresses and error output in text frames
pub struct WebSocketDisclosureRule;

impl WebSocketDisclosureRule {
    pub const ID: u32 = 110001;

    pub fn new() -> Self {
        Self
    }
}

impl Default for WebSocketDisclosureRule {
    fn default() -> Self {
        Self::new()
    }
}

struct LeakPattern {
    name: &'static str,
    pattern: Regex,
    risk: Risk,
    cwe: u32,
    /// Only reported when the configured threshold is LOW
    noisy: bool,
}

fn patterns() -> &'static [LeakPattern] {
    static PATTERNS: OnceLock<Vec<LeakPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let pattern = |re: &str| Regex::new(re).expect("Invalid disclosure regex");
        vec![
            LeakPattern {
                name: "Private Key in WebSocket Frame",
                pattern: pattern(r"-----BEGIN (RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----"),
                risk: Risk::High,
                cwe: 321,
                noisy: false,
            },
            LeakPattern {
                name: "AWS Access Key in WebSocket Frame",
                pattern: pattern(r"AKIA[0-9A-Z]{16}"),
                risk: Risk::High,
                cwe: 798,
                noisy: false,
            },
            LeakPattern {
                name: "Database Connection String in WebSocket Frame",
                pattern: pattern(r#"(mongodb|mysql|postgres|postgresql|redis)://[^\s'"]+"#),
                risk: Risk::Medium,
                cwe: 200,
                noisy: false,
            },
            LeakPattern {
                name: "Error Output in WebSocket Frame",
                pattern: pattern(r"(Traceback \(most recent call last\)|at\s+[\w.$]+\([^)]*\.\w+:\d+\)|SQL syntax|ORA-[0-9]+)"),
                risk: Risk::Low,
                cwe: 209,
                noisy: false,
            },
            LeakPattern {
                name: "Private IP Address in WebSocket Frame",
                pattern: pattern(r"\b(10\.\d{1,3}\.\d{1,3}\.\d{1,3}|172\.(1[6-9]|2[0-9]|3[0-1])\.\d{1,3}\.\d{1,3}|192\.168\.\d{1,3}\.\d{1,3})\b"),
                risk: Risk::Low,
                cwe: 200,
                noisy: false,
            },
            LeakPattern {
                name: "Email Address in WebSocket Frame",
                pattern: pattern(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
                risk: Risk::Informational,
                cwe: 200,
                noisy: true,
            },
        ]
    })
}

impl PassiveRule for WebSocketDisclosureRule {
    fn id(&self) -> u32 {
        Self::ID
    }

    fn name(&self) -> &str {
        "WebSocket Information Disclosure"
    }

    fn applies_to(&self, kind: MessageKind) -> bool {
        kind == MessageKind::WebSocket
    }

    fn scan(&self, helper: &ScanHelper<'_>, payload: &Payload) -> anyhow::Result<Vec<Alert>> {
        let Some(text) = payload.as_frame().and_then(|f| f.payload_text()) else {
            return Ok(Vec::new());
        };

        let threshold = helper.threshold().effective();
        let mut alerts = Vec::new();

        for leak in patterns() {
            if leak.noisy && threshold != AlertThreshold::Low {
                continue;
            }
            // HIGH keeps only the findings that are rarely false positives
            if threshold == AlertThreshold::High && leak.risk < Risk::Medium {
                continue;
            }
            if let Some(found) = leak.pattern.find(text) {
                alerts.push(
                    helper
                        .new_alert(leak.name)
                        .with_risk(leak.risk)
                        .with_confidence(Confidence::Medium)
                        .with_description("Sensitive data was sent in a WebSocket message.")
                        .with_evidence(found.as_str())
                        .with_cwe(leak.cwe),
                );
            }
        }

        Ok(alerts)
    }
}
