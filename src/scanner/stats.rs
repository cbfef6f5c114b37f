//! Per-rule invocation counters and timings

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one rule invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

#[derive(Default)]
struct RuleCounters {
    invocations: AtomicU64,
    failures: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
    alerts: AtomicU64,
}

/// Point-in-time view of one rule's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStats {
    pub rule: String,
    pub invocations: u64,
    pub failures: u64,
    pub total_ms: u64,
    pub max_ms: u64,
    pub alerts: u64,
}

/// Message-level counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStats {
    pub scanned: u64,
    pub skipped: u64,
    pub unresolved: u64,
}

/// Telemetry sink owned by one engine instance
#[derive(Default)]
pub struct StatsRecorder {
    rules: RwLock<HashMap<String, Arc<RuleCounters>>>,
    scanned: AtomicU64,
    skipped: AtomicU64,
    unresolved: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, rule: &str) -> Arc<RuleCounters> {
        if let Some(counters) = self.rules.read().get(rule) {
            return counters.clone();
        }
        self.rules
            .write()
            .entry(rule.to_string())
            .or_default()
            .clone()
    }

    /// Record one invocation of `rule`
    pub fn record(&self, rule: &str, elapsed: Duration, outcome: Outcome) {
        let counters = self.counters(rule);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

        counters.invocations.fetch_add(1, Ordering::Relaxed);
        counters.total_micros.fetch_add(micros, Ordering::Relaxed);
        counters.max_micros.fetch_max(micros, Ordering::Relaxed);
        if outcome == Outcome::Failed {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count an alert against `rule` unless it already reached `cap`
    ///
    /// A cap of 0 means unlimited. Returns `true` if the alert may be
    /// forwarded.
    pub fn try_count_alert(&self, rule: &str, cap: usize) -> bool {
        let counters = self.counters(rule);
        if cap == 0 {
            counters.alerts.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        let cap = cap as u64;
        counters
            .alerts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < cap).then_some(n + 1))
            .is_ok()
    }

    pub fn message_scanned(&self) {
        self.scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_unresolved(&self) {
        self.unresolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rule(&self, rule: &str) -> Option<RuleStats> {
        self.rules.read().get(rule).map(|c| snapshot(rule, c))
    }

    /// All rule counters, sorted by rule name
    pub fn rules(&self) -> Vec<RuleStats> {
        let mut stats: Vec<RuleStats> = self
            .rules
            .read()
            .iter()
            .map(|(name, c)| snapshot(name, c))
            .collect();
        stats.sort_by(|a, b| a.rule.cmp(&b.rule));
        stats
    }

    pub fn messages(&self) -> MessageStats {
        MessageStats {
            scanned: self.scanned.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
        }
    }
}

fn snapshot(rule: &str, counters: &RuleCounters) -> RuleStats {
    RuleStats {
        rule: rule.to_string(),
        invocations: counters.invocations.load(Ordering::Relaxed),
        failures: counters.failures.load(Ordering::Relaxed),
        total_ms: counters.total_micros.load(Ordering::Relaxed) / 1000,
        max_ms: counters.max_micros.load(Ordering::Relaxed) / 1000,
        alerts: counters.alerts.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let stats = StatsRecorder::new();
        stats.record("XSS", Duration::from_millis(3), Outcome::Completed);
        stats.record("XSS", Duration::from_millis(7), Outcome::Failed);

        let xss = stats.rule("XSS").unwrap();
        assert_eq!(xss.invocations, 2);
        assert_eq!(xss.failures, 1);
        assert_eq!(xss.total_ms, 10);
        assert_eq!(xss.max_ms, 7);
        assert!(stats.rule("SQLi").is_none());
    }

    #[test]
    fn test_alert_cap() {
        let stats = StatsRecorder::new();
        assert!(stats.try_count_alert("XSS", 2));
        assert!(stats.try_count_alert("XSS", 2));
        assert!(!stats.try_count_alert("XSS", 2));
        assert_eq!(stats.rule("XSS").unwrap().alerts, 2);

        for _ in 0..5 {
            assert!(stats.try_count_alert("SQLi", 0));
        }
        assert_eq!(stats.rule("SQLi").unwrap().alerts, 5);
    }

    #[test]
    fn test_rules_sorted() {
        let stats = StatsRecorder::new();
        stats.record("b", Duration::ZERO, Outcome::Completed);
        stats.record("a", Duration::ZERO, Outcome::Completed);
        let names: Vec<String> = stats.rules().into_iter().map(|r| r.rule).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
