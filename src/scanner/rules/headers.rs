//! Security headers analysis

use crate::scanner::alert::{Alert, Confidence, Risk};
use crate::scanner::rule::{AlertThreshold, PassiveRule, ScanHelper};
use crate::traffic::{MessageKind, Payload};

/// Missing or weak security response headers
pub struct SecurityHeadersRule;

impl SecurityHeadersRule {
    pub const ID: u32 = 10020;

    pub fn new() -> Self {
        Self
    }
}

impl Default for SecurityHeadersRule {
    fn default() -> Self {
        Self::new()
    }
}

/// (header, alert name, description, risk, cwe, minimum threshold it is reported at)
const REQUIRED_HEADERS: &[(&str, &str, &str, Risk, u32, AlertThreshold)] = &[
    (
        "X-Content-Type-Options",
        "Missing X-Content-Type-Options Header",
        "The X-Content-Type-Options header is not set. This could allow MIME type sniffing attacks.",
        Risk::Low,
        693,
        AlertThreshold::High,
    ),
    (
        "X-Frame-Options",
        "Missing Anti-clickjacking Header",
        "Neither X-Frame-Options nor a CSP frame-ancestors directive is set.",
        Risk::Medium,
        1021,
        AlertThreshold::High,
    ),
    (
        "Strict-Transport-Security",
        "Strict-Transport-Security Header Not Set",
        "The HSTS header is not set on an HTTPS response. This could allow protocol downgrade attacks.",
        Risk::Low,
        319,
        AlertThreshold::Medium,
    ),
    (
        "Content-Security-Policy",
        "Content Security Policy (CSP) Header Not Set",
        "The Content-Security-Policy header is not set. This could allow XSS and data injection attacks.",
        Risk::Medium,
        693,
        AlertThreshold::Low,
    ),
];

/// A header is checked only when the configured threshold is at least as lenient
fn reported_at(configured: AlertThreshold, minimum: AlertThreshold) -> bool {
    let rank = |t: AlertThreshold| match t.effective() {
        AlertThreshold::Low => 0,
        AlertThreshold::Medium => 1,
        _ => 2,
    };
    rank(configured) <= rank(minimum)
}

impl PassiveRule for SecurityHeadersRule {
    fn id(&self) -> u32 {
        Self::ID
    }

    fn name(&self) -> &str {
        "Security Headers"
    }

    fn applies_to(&self, kind: MessageKind) -> bool {
        kind == MessageKind::Http
    }

    fn scan(&self, helper: &ScanHelper<'_>, payload: &Payload) -> anyhow::Result<Vec<Alert>> {
        let Some(exchange) = payload.as_http() else {
            return Ok(Vec::new());
        };
        let Some(response) = &exchange.response else {
            return Ok(Vec::new());
        };

        let mut alerts = Vec::new();
        let csp = response.header("Content-Security-Policy");

        for (header, name, description, risk, cwe, minimum) in REQUIRED_HEADERS {
            if !reported_at(helper.threshold(), *minimum) {
                continue;
            }
            if *header == "Strict-Transport-Security" && !exchange.request.is_https() {
                continue;
            }
            if *header == "X-Frame-Options" && csp.is_some_and(|c| c.contains("frame-ancestors")) {
                continue;
            }
            // Framing and CSP only matter for documents
            if matches!(*header, "X-Frame-Options" | "Content-Security-Policy") && !response.is_html() {
                continue;
            }
            if response.header(header).is_none() {
                alerts.push(
                    helper
                        .new_alert(name)
                        .with_risk(*risk)
                        .with_confidence(Confidence::Medium)
                        .with_description(description)
                        .with_other_info(&format!("Add the {} header to responses.", header))
                        .with_cwe(*cwe),
                );
            }
        }

        if let Some(csp) = csp {
            for directive in ["'unsafe-inline'", "'unsafe-eval'"] {
                if csp.contains(directive) {
                    alerts.push(
                        helper
                            .new_alert(&format!("CSP Contains {}", directive))
                            .with_risk(Risk::Medium)
                            .with_confidence(Confidence::High)
                            .with_description("The Content-Security-Policy weakens XSS protection.")
                            .with_evidence(csp)
                            .with_cwe(693),
                    );
                }
            }
        }

        Ok(alerts)
    }
}
