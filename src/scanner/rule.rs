//! Passive rule capability and per-scan helper

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::str::FromStr;

use super::alert::{Alert, MessageRef};
use crate::error::ApiError;
use crate::traffic::{MessageKind, Payload, TrafficMessage};

/// Minimum strictness at which a rule reports; `Off` disables the rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertThreshold {
    Off,
    Default,
    Low,
    Medium,
    High,
}

impl AlertThreshold {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertThreshold::Off => "OFF",
            AlertThreshold::Default => "DEFAULT",
            AlertThreshold::Low => "LOW",
            AlertThreshold::Medium => "MEDIUM",
            AlertThreshold::High => "HIGH",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            AlertThreshold::Off => 0,
            AlertThreshold::Default => 1,
            AlertThreshold::Low => 2,
            AlertThreshold::Medium => 3,
            AlertThreshold::High => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => AlertThreshold::Off,
            2 => AlertThreshold::Low,
            3 => AlertThreshold::Medium,
            4 => AlertThreshold::High,
            _ => AlertThreshold::Default,
        }
    }

    /// `Default` resolves to `Medium` when a rule needs a concrete level
    pub fn effective(self) -> Self {
        match self {
            AlertThreshold::Default => AlertThreshold::Medium,
            other => other,
        }
    }
}

impl fmt::Display for AlertThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertThreshold {
    type Err = ApiError;

    /// Case-insensitive, surrounding whitespace ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "OFF" => Ok(AlertThreshold::Off),
            "DEFAULT" => Ok(AlertThreshold::Default),
            "LOW" => Ok(AlertThreshold::Low),
            "MEDIUM" => Ok(AlertThreshold::Medium),
            "HIGH" => Ok(AlertThreshold::High),
            _ => Err(ApiError::DoesNotExist("alertThreshold".into())),
        }
    }
}

/// Maturity of a rule implementation (informational)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Alpha,
    Beta,
    Release,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Alpha => "alpha",
            RuleStatus::Beta => "beta",
            RuleStatus::Release => "release",
        }
    }
}

/// What a rule produces
///
/// Tag rules label messages for later filtering instead of raising alerts.
/// They are switched as a group by the tag actions and are not touched by
/// the bulk rule actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Alert,
    Tag,
}

/// Trait for passive scan rules
///
/// Rules are stateless with respect to enablement; the registry owns the
/// enabled flag and threshold.
pub trait PassiveRule: Send + Sync {
    /// Stable numeric id
    fn id(&self) -> u32;

    /// Rule name, expected to be unique
    fn name(&self) -> &str;

    fn status(&self) -> RuleStatus {
        RuleStatus::Release
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Alert
    }

    /// Whether the rule understands this kind of message
    fn applies_to(&self, _kind: MessageKind) -> bool {
        true
    }

    /// Scan one message and return any alerts
    fn scan(&self, helper: &ScanHelper<'_>, payload: &Payload) -> anyhow::Result<Vec<Alert>>;
}

/// Per-(rule, message) context handed to [`PassiveRule::scan`]
pub struct ScanHelper<'a> {
    rule_id: u32,
    threshold: AlertThreshold,
    message: &'a TrafficMessage,
    tags: RefCell<Vec<String>>,
}

impl<'a> ScanHelper<'a> {
    pub fn new(rule_id: u32, threshold: AlertThreshold, message: &'a TrafficMessage) -> Self {
        Self {
            rule_id,
            threshold,
            message,
            tags: RefCell::new(Vec::new()),
        }
    }

    /// Start an alert attributed to the current rule and message
    pub fn new_alert(&self, name: &str) -> Alert {
        Alert::new(self.rule_id, name, MessageRef::from(self.message))
    }

    /// Label the current message; duplicates are ignored
    pub fn add_tag(&self, tag: &str) {
        let mut tags = self.tags.borrow_mut();
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }

    pub(crate) fn take_tags(&self) -> Vec<String> {
        self.tags.take()
    }

    pub fn threshold(&self) -> AlertThreshold {
        self.threshold
    }

    pub fn message(&self) -> &TrafficMessage {
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::Direction;

    #[test]
    fn test_threshold_parse() {
        assert_eq!(" off ".parse::<AlertThreshold>().unwrap(), AlertThreshold::Off);
        assert_eq!("High".parse::<AlertThreshold>().unwrap(), AlertThreshold::High);
        assert_eq!(
            "bogus".parse::<AlertThreshold>(),
            Err(ApiError::DoesNotExist("alertThreshold".into()))
        );
    }

    #[test]
    fn test_threshold_u8_roundtrip_covers_all() {
        for t in [
            AlertThreshold::Off,
            AlertThreshold::Default,
            AlertThreshold::Low,
            AlertThreshold::Medium,
            AlertThreshold::High,
        ] {
            assert_eq!(AlertThreshold::from_u8(t.to_u8()), t);
        }
    }

    #[test]
    fn test_helper_stamps_alert() {
        let msg = TrafficMessage::new(42, 3, Direction::FromServer, MessageKind::Http, "https://a.test/");
        let helper = ScanHelper::new(10, AlertThreshold::Default, &msg);
        let alert = helper.new_alert("XSS");

        assert_eq!(alert.rule_id, 10);
        assert_eq!(alert.message.message_id, 42);
        assert_eq!(alert.message.channel_id, 3);
    }

    #[test]
    fn test_helper_collects_unique_tags() {
        let msg = TrafficMessage::new(1, 1, Direction::FromServer, MessageKind::Http, "https://a.test/");
        let helper = ScanHelper::new(50001, AlertThreshold::Default, &msg);
        helper.add_tag("Form");
        helper.add_tag("Script");
        helper.add_tag("Form");

        assert_eq!(helper.take_tags(), vec!["Form", "Script"]);
        assert!(helper.take_tags().is_empty());
    }
}
