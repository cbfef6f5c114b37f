//! Management API
//!
//! [`ManagementApi`] is the administrative surface of a running engine.
//! Every operation validates its input completely before touching engine
//! state, so an error result always means nothing changed. Mutating
//! operations write the new settings back to the attached configuration.

mod dispatch;
mod server;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ApiError;
use crate::scanner::{
    AlertThreshold, MessageStats, PassiveScanEngine, RuleInfo, RuleKind, RuleStats, TaskInfo,
};

pub use dispatch::{ACTIONS, VIEWS};
pub use server::{ControlRequest, ControlResponse, ControlServer, ErrorBody, RequestKind};

/// Target of `setEnabled`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    All,
    Id(u32),
}

impl RuleTarget {
    /// `ALL` (any case) or a numeric rule id
    pub fn parse(value: &str) -> Result<Self, ApiError> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(RuleTarget::All);
        }
        value
            .parse()
            .map(RuleTarget::Id)
            .map_err(|_| ApiError::IllegalParameter("id".into()))
    }
}

/// Result of the `currentRule` view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentRule {
    pub name: String,
    pub target: String,
    pub elapsed_ms: u64,
}

/// Configuration the API keeps in sync with engine state
struct Persistence {
    config: Config,
    path: Option<PathBuf>,
}

/// Administrative facade over a [`PassiveScanEngine`]
pub struct ManagementApi {
    engine: Arc<PassiveScanEngine>,
    persistence: Mutex<Persistence>,
}

impl ManagementApi {
    /// Create an API that keeps `config` updated in memory only
    pub fn new(engine: Arc<PassiveScanEngine>, config: Config) -> Self {
        Self {
            engine,
            persistence: Mutex::new(Persistence { config, path: None }),
        }
    }

    /// Also save the configuration to `path` after every change
    pub fn with_config_path(self, path: PathBuf) -> Self {
        self.persistence.lock().path = Some(path);
        self
    }

    pub fn engine(&self) -> &Arc<PassiveScanEngine> {
        &self.engine
    }

    /// Configuration reflecting the current engine settings
    pub fn config(&self) -> Config {
        self.persistence.lock().config.clone()
    }

    // ---- actions ----

    /// Enable or disable one rule, or every alert rule
    ///
    /// `ALL` leaves tag rules alone; see [`enable_all_tags`](Self::enable_all_tags).
    pub fn set_enabled(&self, target: RuleTarget, enabled: bool) -> Result<(), ApiError> {
        match target {
            RuleTarget::All => {
                self.engine.registry().set_kind_enabled(RuleKind::Alert, enabled);
            }
            RuleTarget::Id(id) => {
                self.engine
                    .registry()
                    .set_enabled(id, enabled)
                    .ok_or_else(|| ApiError::DoesNotExist("id".into()))?;
            }
        }
        tracing::info!(rules = ?target, enabled, "Rule enablement changed");
        self.persist();
        Ok(())
    }

    /// Set a rule's alert threshold
    ///
    /// `OFF` disables the rule; any other threshold enables it.
    pub fn set_threshold(&self, id: &str, threshold: &str) -> Result<(), ApiError> {
        let id: u32 = id
            .trim()
            .parse()
            .map_err(|_| ApiError::IllegalParameter("id".into()))?;
        let rule = self
            .engine
            .registry()
            .get(id)
            .ok_or_else(|| ApiError::DoesNotExist("id".into()))?;
        let threshold: AlertThreshold = threshold.parse()?;

        rule.set_threshold(threshold);
        if threshold != AlertThreshold::Off {
            rule.set_enabled(true);
        }
        tracing::info!(rule_id = id, rule = rule.name(), %threshold, "Rule threshold changed");
        self.persist();
        Ok(())
    }

    /// 0 removes the cap
    pub fn set_max_alerts_per_rule(&self, max: usize) -> Result<(), ApiError> {
        if self.engine.set_max_alerts_per_rule(max) {
            tracing::info!(max, "Max alerts per rule changed");
            self.persist();
        }
        Ok(())
    }

    pub fn enable_all_rules(&self) -> Result<(), ApiError> {
        self.set_enabled(RuleTarget::All, true)
    }

    pub fn disable_all_rules(&self) -> Result<(), ApiError> {
        self.set_enabled(RuleTarget::All, false)
    }

    pub fn enable_all_tags(&self) -> Result<(), ApiError> {
        self.set_tags_enabled(true)
    }

    pub fn disable_all_tags(&self) -> Result<(), ApiError> {
        self.set_tags_enabled(false)
    }

    fn set_tags_enabled(&self, enabled: bool) -> Result<(), ApiError> {
        let changed = self.engine.registry().set_kind_enabled(RuleKind::Tag, enabled);
        tracing::info!(changed, enabled, "Tag rules switched");
        self.persist();
        Ok(())
    }

    /// Enable every rule in a comma-separated id list
    pub fn enable_rules(&self, ids: &str) -> Result<(), ApiError> {
        self.set_rules_enabled(ids, true)
    }

    /// Disable every rule in a comma-separated id list
    pub fn disable_rules(&self, ids: &str) -> Result<(), ApiError> {
        self.set_rules_enabled(ids, false)
    }

    fn set_rules_enabled(&self, ids: &str, enabled: bool) -> Result<(), ApiError> {
        let rules = parse_ids(ids)?
            .into_iter()
            .map(|id| {
                self.engine
                    .registry()
                    .get(id)
                    .ok_or_else(|| ApiError::DoesNotExist("ids".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for rule in &rules {
            rule.set_enabled(enabled);
        }
        tracing::info!(count = rules.len(), enabled, "Rule enablement changed");
        self.persist();
        Ok(())
    }

    /// Discard all queued messages; returns how many were dropped
    pub fn clear_queue(&self) -> usize {
        self.engine.clear_queue()
    }

    /// Global passive scanning switch
    pub fn set_scanning_enabled(&self, enabled: bool) -> Result<(), ApiError> {
        if self.engine.set_scanning_enabled(enabled) {
            tracing::info!(enabled, "Passive scanning switched");
            self.persist();
        }
        Ok(())
    }

    pub fn set_scan_only_in_scope(&self, value: bool) -> Result<(), ApiError> {
        if self.engine.filter().set_scan_only_in_scope(value) {
            tracing::info!(scan_only_in_scope = value, "Scope gate changed");
            self.persist();
        }
        Ok(())
    }

    // ---- views ----

    pub fn list_rules(&self) -> Vec<RuleInfo> {
        self.engine.registry().infos()
    }

    pub fn queue_depth(&self) -> usize {
        self.engine.queue_depth()
    }

    pub fn current_tasks(&self) -> Vec<TaskInfo> {
        self.engine.current_tasks()
    }

    /// The longest-running task, or an empty record when idle
    pub fn current_rule(&self) -> CurrentRule {
        self.engine
            .oldest_task()
            .map(|task| CurrentRule {
                name: task.rule_name,
                target: task.target,
                elapsed_ms: task.elapsed_ms,
            })
            .unwrap_or_default()
    }

    pub fn max_alerts_per_rule(&self) -> usize {
        self.engine.max_alerts_per_rule()
    }

    pub fn scan_only_in_scope(&self) -> bool {
        self.engine.filter().scan_only_in_scope()
    }

    pub fn scanning_enabled(&self) -> bool {
        self.engine.scanning_enabled()
    }

    pub fn rule_stats(&self) -> Vec<RuleStats> {
        self.engine.stats().rules()
    }

    pub fn message_stats(&self) -> MessageStats {
        self.engine.stats().messages()
    }

    /// Copy engine settings into the configuration and save it if a path
    /// is attached; a failed save is logged and does not undo the change
    fn persist(&self) {
        let mut persistence = self.persistence.lock();
        let scanner = self.engine.scanner_settings(&persistence.config.scanner);
        persistence.config.scanner = scanner;
        persistence.config.set_rule_settings(self.engine.rule_settings());

        if let Some(path) = &persistence.path {
            if let Err(e) = persistence.config.save(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist configuration");
            }
        }
    }
}

/// Parse a comma-separated list of rule ids; empty items are skipped
fn parse_ids(ids: &str) -> Result<Vec<u32>, ApiError> {
    ids.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| ApiError::IllegalParameter("ids".into())))
        .collect()
}
