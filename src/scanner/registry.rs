//! Rule registry
//!
//! Rules are wrapped in a [`RegisteredRule`] that pairs the immutable rule
//! with its mutable enabled flag and threshold. The set itself is
//! copy-on-write: readers take an `Arc` snapshot and iterate it without
//! holding any lock, writers replace the whole vector.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use super::rule::{AlertThreshold, PassiveRule, RuleKind, RuleStatus};

/// A rule plus its runtime state
pub struct RegisteredRule {
    rule: Arc<dyn PassiveRule>,
    enabled: AtomicBool,
    threshold: AtomicU8,
    /// Serializes writers so `enabled` and `threshold` change together
    write_lock: Mutex<()>,
}

impl RegisteredRule {
    fn new(rule: Arc<dyn PassiveRule>) -> Self {
        Self {
            rule,
            enabled: AtomicBool::new(false),
            threshold: AtomicU8::new(AlertThreshold::Default.to_u8()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn rule(&self) -> &dyn PassiveRule {
        self.rule.as_ref()
    }

    pub fn id(&self) -> u32 {
        self.rule.id()
    }

    pub fn name(&self) -> &str {
        self.rule.name()
    }

    pub fn kind(&self) -> RuleKind {
        self.rule.kind()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> AlertThreshold {
        AlertThreshold::from_u8(self.threshold.load(Ordering::Acquire))
    }

    /// Returns `true` if the state changed
    ///
    /// Enabling a rule whose threshold is `Off` resets the threshold to
    /// `Default`.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let _guard = self.write_lock.lock();
        if self.is_enabled() == enabled {
            return false;
        }
        if enabled && self.threshold() == AlertThreshold::Off {
            self.threshold.store(AlertThreshold::Default.to_u8(), Ordering::Release);
        }
        self.enabled.store(enabled, Ordering::Release);
        true
    }

    /// Returns `true` if the state changed; `Off` also disables the rule
    pub fn set_threshold(&self, threshold: AlertThreshold) -> bool {
        let _guard = self.write_lock.lock();
        let mut changed = false;
        if threshold == AlertThreshold::Off && self.is_enabled() {
            self.enabled.store(false, Ordering::Release);
            changed = true;
        }
        if self.threshold() != threshold {
            self.threshold.store(threshold.to_u8(), Ordering::Release);
            changed = true;
        }
        changed
    }

    pub fn info(&self) -> RuleInfo {
        let _guard = self.write_lock.lock();
        RuleInfo {
            id: self.id(),
            name: self.name().to_string(),
            enabled: self.is_enabled(),
            threshold: self.threshold(),
            status: self.rule.status(),
        }
    }

    /// Relaxed duplicate check: same id OR same name
    fn collides_with(&self, other: &dyn PassiveRule) -> bool {
        self.id() == other.id() || self.name() == other.name()
    }
}

/// Serializable view of a registered rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
    pub threshold: AlertThreshold,
    pub status: RuleStatus,
}

/// Snapshot of the registered rules, in registration order
pub type RuleSnapshot = Arc<Vec<Arc<RegisteredRule>>>;

/// Concurrent set of passive rules
#[derive(Default)]
pub struct RuleRegistry {
    rules: RwLock<RuleSnapshot>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, initially disabled
    ///
    /// Returns `false` if a rule with the same id or the same name is
    /// already registered.
    pub fn add(&self, rule: Arc<dyn PassiveRule>) -> bool {
        let mut rules = self.rules.write();

        if let Some(existing) = rules.iter().find(|r| r.collides_with(rule.as_ref())) {
            tracing::warn!(
                rule_id = rule.id(),
                rule = rule.name(),
                existing_id = existing.id(),
                existing = existing.name(),
                "Ignoring duplicate passive rule"
            );
            return false;
        }

        let mut next = Vec::with_capacity(rules.len() + 1);
        next.extend(rules.iter().cloned());
        next.push(Arc::new(RegisteredRule::new(rule)));
        *rules = Arc::new(next);
        true
    }

    /// Unregister a rule by id
    pub fn remove(&self, id: u32) -> bool {
        let mut rules = self.rules.write();
        if !rules.iter().any(|r| r.id() == id) {
            return false;
        }

        let next: Vec<_> = rules.iter().filter(|r| r.id() != id).cloned().collect();
        *rules = Arc::new(next);
        true
    }

    pub fn get(&self, id: u32) -> Option<Arc<RegisteredRule>> {
        self.rules.read().iter().find(|r| r.id() == id).cloned()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// Stable snapshot; unaffected by later add/remove
    pub fn list(&self) -> RuleSnapshot {
        self.rules.read().clone()
    }

    /// Enabled rules at this moment, in registration order
    pub fn enabled_rules(&self) -> Vec<Arc<RegisteredRule>> {
        self.list().iter().filter(|r| r.is_enabled()).cloned().collect()
    }

    /// Returns `None` if the id is unknown, otherwise whether state changed
    pub fn set_enabled(&self, id: u32, enabled: bool) -> Option<bool> {
        self.get(id).map(|r| r.set_enabled(enabled))
    }

    /// Returns `None` if the id is unknown, otherwise whether state changed
    pub fn set_threshold(&self, id: u32, threshold: AlertThreshold) -> Option<bool> {
        self.get(id).map(|r| r.set_threshold(threshold))
    }

    /// Apply to every rule registered at call time; returns how many changed
    pub fn set_all_enabled(&self, enabled: bool) -> usize {
        self.list().iter().filter(|r| r.set_enabled(enabled)).count()
    }

    /// Like [`set_all_enabled`](Self::set_all_enabled), limited to one kind
    pub fn set_kind_enabled(&self, kind: RuleKind, enabled: bool) -> usize {
        self.list()
            .iter()
            .filter(|r| r.kind() == kind)
            .filter(|r| r.set_enabled(enabled))
            .count()
    }

    pub fn infos(&self) -> Vec<RuleInfo> {
        self.list().iter().map(|r| r.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::testing::StaticRule;

    fn registry_with(rules: &[(u32, &str)]) -> RuleRegistry {
        let registry = RuleRegistry::new();
        for (id, name) in rules {
            assert!(registry.add(Arc::new(StaticRule::silent(*id, name))));
        }
        registry
    }

    #[test]
    fn test_rules_start_disabled() {
        let registry = registry_with(&[(10, "XSS"), (20, "SQLi")]);
        assert!(registry.infos().iter().all(|r| !r.enabled));
        assert!(registry.enabled_rules().is_empty());
    }

    #[test]
    fn test_duplicate_by_id_or_name() {
        let registry = registry_with(&[(10, "XSS")]);
        assert!(!registry.add(Arc::new(StaticRule::silent(10, "Other"))));
        assert!(!registry.add(Arc::new(StaticRule::silent(11, "XSS"))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_threshold_off_disables() {
        let registry = registry_with(&[(10, "XSS")]);
        registry.set_enabled(10, true);
        assert_eq!(registry.set_threshold(10, AlertThreshold::Off), Some(true));

        let rule = registry.get(10).unwrap();
        assert!(!rule.is_enabled());
        assert_eq!(rule.threshold(), AlertThreshold::Off);
    }

    #[test]
    fn test_enabling_resets_off_threshold() {
        let registry = registry_with(&[(10, "XSS")]);
        registry.set_threshold(10, AlertThreshold::Off);
        registry.set_enabled(10, true);

        let rule = registry.get(10).unwrap();
        assert!(rule.is_enabled());
        assert_eq!(rule.threshold(), AlertThreshold::Default);
    }

    #[test]
    fn test_setters_are_idempotent() {
        let registry = registry_with(&[(10, "XSS")]);
        assert_eq!(registry.set_enabled(10, true), Some(true));
        assert_eq!(registry.set_enabled(10, true), Some(false));
        assert_eq!(registry.set_threshold(10, AlertThreshold::High), Some(true));
        assert_eq!(registry.set_threshold(10, AlertThreshold::High), Some(false));
        assert_eq!(registry.set_enabled(99, true), None);
    }

    #[test]
    fn test_snapshot_survives_mutation() {
        let registry = registry_with(&[(10, "XSS"), (20, "SQLi")]);
        let snapshot = registry.list();

        registry.remove(10);
        registry.add(Arc::new(StaticRule::silent(30, "CSRF")));

        let ids: Vec<u32> = snapshot.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![10, 20]);
        let ids: Vec<u32> = registry.list().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![20, 30]);
    }

    #[test]
    fn test_remove_unknown() {
        let registry = registry_with(&[(10, "XSS")]);
        assert!(!registry.remove(99));
        assert!(registry.remove(10));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_set_all_enabled_counts_changes() {
        let registry = registry_with(&[(10, "XSS"), (20, "SQLi")]);
        registry.set_enabled(10, true);
        assert_eq!(registry.set_all_enabled(true), 1);
        assert_eq!(registry.enabled_rules().len(), 2);
    }

    #[test]
    fn test_set_kind_enabled_leaves_other_kind() {
        let registry = registry_with(&[(10, "XSS")]);
        registry.add(Arc::new(StaticRule::tagging(50001, "Form Tag", "Form", "<form")));

        assert_eq!(registry.set_kind_enabled(RuleKind::Tag, true), 1);
        assert!(registry.get(50001).unwrap().is_enabled());
        assert!(!registry.get(10).unwrap().is_enabled());

        assert_eq!(registry.set_kind_enabled(RuleKind::Alert, true), 1);
        assert_eq!(registry.set_kind_enabled(RuleKind::Tag, false), 1);
        assert!(registry.get(10).unwrap().is_enabled());
    }
}
