//! Auto-tagging rules
//!
//! Each rule labels HTTP responses whose body matches a pattern, or that
//! carry a given header. Tags never raise alerts.

use regex::{Regex, RegexBuilder};

use crate::scanner::alert::Alert;
use crate::scanner::rule::{PassiveRule, RuleKind, ScanHelper};
use crate::traffic::{MessageKind, Payload};

/// Where a tag rule looks
#[derive(Debug, Clone)]
pub enum TagSource {
    /// Case-insensitive pattern over the decoded response body
    ResponseBody(Regex),
    /// Presence of a response header (name is case-insensitive)
    ResponseHeader(String),
}

/// Labels a response with a fixed tag when its source matches
pub struct TagRule {
    id: u32,
    name: String,
    tag: String,
    source: TagSource,
}

impl TagRule {
    pub fn new(id: u32, name: &str, tag: &str, source: TagSource) -> Self {
        Self {
            id,
            name: name.to_string(),
            tag: tag.to_string(),
            source,
        }
    }

    /// Body rule from a pattern string
    pub fn body(id: u32, name: &str, tag: &str, pattern: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self::new(id, name, tag, TagSource::ResponseBody(regex)))
    }

    pub fn header(id: u32, name: &str, tag: &str, header: &str) -> Self {
        Self::new(id, name, tag, TagSource::ResponseHeader(header.to_ascii_lowercase()))
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl PassiveRule for TagRule {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Tag
    }

    fn applies_to(&self, kind: MessageKind) -> bool {
        kind == MessageKind::Http
    }

    fn scan(&self, helper: &ScanHelper<'_>, payload: &Payload) -> anyhow::Result<Vec<Alert>> {
        let Some(response) = payload.as_http().and_then(|e| e.response.as_ref()) else {
            return Ok(Vec::new());
        };

        let matched = match &self.source {
            TagSource::ResponseBody(regex) => regex.is_match(&response.body_text()),
            TagSource::ResponseHeader(name) => response.header(name).is_some(),
        };
        if matched {
            helper.add_tag(&self.tag);
        }

        Ok(Vec::new())
    }
}

const BODY_TAGS: &[(u32, &str, &str, &str)] = &[
    (50001, "Tag: Form", "Form", r"<form"),
    (50002, "Tag: Hidden Field", "Hidden", r#"<input[^>]+type\s*=\s*["']?hidden"#),
    (50003, "Tag: Password Field", "Password", r#"<input[^>]+type\s*=\s*["']?password"#),
    (50004, "Tag: File Upload", "Upload", r#"<input[^>]+type\s*=\s*["']?file"#),
    (50005, "Tag: Script", "Script", r"<script"),
    (50006, "Tag: IFrame", "IFrame", r"<iframe"),
    (50007, "Tag: HTML Comment", "Comment", r"<!--"),
];

/// Built-in tag rules
pub fn default_tag_rules() -> Vec<TagRule> {
    let mut rules: Vec<TagRule> = BODY_TAGS
        .iter()
        .filter_map(|(id, name, tag, pattern)| match TagRule::body(*id, name, tag, pattern) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!(rule_id = id, error = %e, "Skipping tag rule with invalid pattern");
                None
            }
        })
        .collect();
    rules.push(TagRule::header(50008, "Tag: Set-Cookie", "SetCookie", "Set-Cookie"));
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::rule::AlertThreshold;
    use crate::traffic::{Direction, HttpExchange, HttpRequest, HttpResponse, TrafficMessage};

    fn tags_for(response: HttpResponse) -> Vec<String> {
        let msg = TrafficMessage::new(1, 1, Direction::FromServer, MessageKind::Http, "https://a.test/");
        let payload = Payload::Http(HttpExchange::new(
            HttpRequest::new("GET", "https://a.test/"),
            Some(response),
        ));

        let mut all = Vec::new();
        for rule in default_tag_rules() {
            let helper = ScanHelper::new(rule.id(), AlertThreshold::Default, &msg);
            assert!(rule.scan(&helper, &payload).unwrap().is_empty());
            all.extend(helper.take_tags());
        }
        all
    }

    #[test]
    fn test_every_builtin_pattern_compiles() {
        assert_eq!(default_tag_rules().len(), BODY_TAGS.len() + 1);
    }

    #[test]
    fn test_login_form_tags() {
        let body = r#"<FORM action="/login"><input type="hidden" name="csrf"><input type='password' name="pw"></form>"#;
        let tags = tags_for(HttpResponse::new(200).with_body(body));
        assert_eq!(tags, vec!["Form", "Hidden", "Password"]);
    }

    #[test]
    fn test_header_tag() {
        let tags = tags_for(HttpResponse::new(200).with_header("Set-Cookie", "sid=1"));
        assert_eq!(tags, vec!["SetCookie"]);
    }

    #[test]
    fn test_plain_response_has_no_tags() {
        assert!(tags_for(HttpResponse::new(200).with_body("hello")).is_empty());
    }
}
