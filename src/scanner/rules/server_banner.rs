//! Server Banner/Technology Disclosure Rule

use regex::Regex;
use std::sync::OnceLock;

use crate::scanner::alert::{Alert, Confidence, Risk};
use crate::scanner::rule::{PassiveRule, ScanHelper};
use crate::traffic::{MessageKind, Payload};

/// Server banner disclosure passive scanner rule
pub struct ServerBannerRule;

impl ServerBannerRule {
    pub const ID: u32 = 10036;

    pub fn new() -> Self {
        Self
    }
}

impl Default for ServerBannerRule {
    fn default() -> Self {
        Self::new()
    }
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+\.\d+(?:\.\d+)?").expect("valid version regex"))
}

impl PassiveRule for ServerBannerRule {
    fn id(&self) -> u32 {
        Self::ID
    }

    fn name(&self) -> &str {
        "Server Banner"
    }

    fn applies_to(&self, kind: MessageKind) -> bool {
        kind == MessageKind::Http
    }

    fn scan(&self, helper: &ScanHelper<'_>, payload: &Payload) -> anyhow::Result<Vec<Alert>> {
        let Some(response) = payload.as_http().and_then(|e| e.response.as_ref()) else {
            return Ok(Vec::new());
        };

        let mut alerts = Vec::new();

        if let Some(server) = response.header("server") {
            if version_pattern().is_match(server) {
                alerts.push(
                    helper
                        .new_alert("Server Leaks Version Information via \"Server\" HTTP Response Header Field")
                        .with_risk(Risk::Low)
                        .with_confidence(Confidence::High)
                        .with_description("The Server header discloses version information.")
                        .with_evidence(server)
                        .with_other_info("Configure the web server to remove version information.")
                        .with_cwe(200),
                );
            }
        }

        for header in ["x-powered-by", "x-aspnet-version", "x-aspnetmvc-version"] {
            if let Some(value) = response.header(header) {
                alerts.push(
                    helper
                        .new_alert("Server Leaks Information via \"X-Powered-By\" HTTP Response Header Field(s)")
                        .with_risk(Risk::Low)
                        .with_confidence(Confidence::Medium)
                        .with_description("Technology disclosure headers reveal the server stack.")
                        .with_evidence(&format!("{}: {}", header, value))
                        .with_cwe(200),
                );
            }
        }

        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::AlertThreshold;
    use crate::traffic::{Direction, HttpExchange, HttpRequest, HttpResponse, TrafficMessage};

    fn scan(response: HttpResponse) -> Vec<Alert> {
        let msg = TrafficMessage::new(1, 1, Direction::FromServer, MessageKind::Http, "https://a.test/");
        let helper = ScanHelper::new(ServerBannerRule::ID, AlertThreshold::Default, &msg);
        let payload = Payload::Http(HttpExchange::new(HttpRequest::new("GET", "https://a.test/"), Some(response)));
        ServerBannerRule::new().scan(&helper, &payload).unwrap()
    }

    #[test]
    fn test_versioned_server_header() {
        assert_eq!(scan(HttpResponse::new(200).with_header("Server", "Apache/2.4.41 (Ubuntu)")).len(), 1);
        assert!(scan(HttpResponse::new(200).with_header("Server", "cloudflare")).is_empty());
    }

    #[test]
    fn test_powered_by() {
        let alerts = scan(HttpResponse::new(200).with_header("X-Powered-By", "PHP/8.1"));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].evidence.as_deref(), Some("x-powered-by: PHP/8.1"));
    }
}
