//! Cookie security analysis

use crate::scanner::alert::{Alert, Confidence, Risk};
use crate::scanner::rule::{AlertThreshold, PassiveRule, ScanHelper};
use crate::traffic::{Cookie, MessageKind, Payload};

/// Missing cookie attributes
pub struct CookieSecurityRule;

impl CookieSecurityRule {
    pub const ID: u32 = 10010;

    pub fn new() -> Self {
        Self
    }
}

impl Default for CookieSecurityRule {
    fn default() -> Self {
        Self::new()
    }
}

fn is_session_cookie(name: &str) -> bool {
    let name = name.to_lowercase();
    ["sess", "sid", "token", "auth", "jwt"]
        .iter()
        .any(|marker| name.contains(marker))
}

impl PassiveRule for CookieSecurityRule {
    fn id(&self) -> u32 {
        Self::ID
    }

    fn name(&self) -> &str {
        "Cookie Security"
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

        let is_https = exchange.request.is_https();
        // At HIGH only session-like cookies are considered
        let strict = helper.threshold().effective() == AlertThreshold::High;

        let mut alerts = Vec::new();
        for cookie in response.cookies.iter().filter(|c| !strict || is_session_cookie(&c.name)) {
            alerts.extend(check_cookie(helper, cookie, is_https));
        }
        Ok(alerts)
    }
}

fn check_cookie(helper: &ScanHelper<'_>, cookie: &Cookie, is_https: bool) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let evidence = format!("Set-Cookie: {}", cookie.name);

    if is_https && !cookie.secure {
        alerts.push(
            helper
                .new_alert("Cookie Without Secure Flag")
                .with_risk(Risk::Low)
                .with_confidence(Confidence::Medium)
                .with_description(&format!(
                    "Cookie '{}' is set without the Secure flag on an HTTPS connection.",
                    cookie.name
                ))
                .with_evidence(&evidence)
                .with_cwe(614),
        );
    }

    if !cookie.http_only {
        alerts.push(
            helper
                .new_alert("Cookie No HttpOnly Flag")
                .with_risk(Risk::Low)
                .with_confidence(Confidence::Medium)
                .with_description(&format!(
                    "Cookie '{}' is accessible to JavaScript.",
                    cookie.name
                ))
                .with_evidence(&evidence)
                .with_cwe(1004),
        );
    }

    match cookie.same_site.as_deref() {
        None => alerts.push(
            helper
                .new_alert("Cookie without SameSite Attribute")
                .with_risk(Risk::Low)
                .with_confidence(Confidence::Medium)
                .with_evidence(&evidence)
                .with_cwe(1275),
        ),
        Some(same_site) if same_site.eq_ignore_ascii_case("none") && !cookie.secure => alerts.push(
            helper
                .new_alert("SameSite=None Without Secure Flag")
                .with_risk(Risk::Low)
                .with_confidence(Confidence::High)
                .with_evidence(&evidence)
                .with_cwe(614),
        ),
        Some(_) => {}
    }

    alerts
}
