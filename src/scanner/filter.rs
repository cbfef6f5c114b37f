//! Eligibility gates applied before any rule runs

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::scope::Scope;
use crate::traffic::{Origin, TrafficMessage};

/// Scope gate plus origin gate
///
/// The decision is computed once per message and cached on it.
pub struct ScopeFilter {
    scan_only_in_scope: AtomicBool,
    ignore_server_mode: AtomicBool,
    scope: RwLock<Scope>,
}

impl ScopeFilter {
    pub fn new(scope: Scope, scan_only_in_scope: bool, ignore_server_mode: bool) -> Self {
        Self {
            scan_only_in_scope: AtomicBool::new(scan_only_in_scope),
            ignore_server_mode: AtomicBool::new(ignore_server_mode),
            scope: RwLock::new(scope),
        }
    }

    /// Whether the message may be scanned
    pub fn should_scan(&self, message: &TrafficMessage) -> bool {
        message.scan_decision(|m| self.evaluate(m))
    }

    fn evaluate(&self, message: &TrafficMessage) -> bool {
        if self.ignore_server_mode() && message.origin == Origin::ServerMode {
            tracing::trace!(message_id = message.id, "Skipping server-mode traffic");
            return false;
        }

        if self.scan_only_in_scope() && !self.scope.read().is_in_scope(&message.target) {
            tracing::trace!(message_id = message.id, target = %message.target, "Skipping out-of-scope traffic");
            return false;
        }

        true
    }

    pub fn scan_only_in_scope(&self) -> bool {
        self.scan_only_in_scope.load(Ordering::Acquire)
    }

    pub fn set_scan_only_in_scope(&self, value: bool) -> bool {
        self.scan_only_in_scope.swap(value, Ordering::AcqRel) != value
    }

    pub fn ignore_server_mode(&self) -> bool {
        self.ignore_server_mode.load(Ordering::Acquire)
    }

    pub fn set_ignore_server_mode(&self, value: bool) -> bool {
        self.ignore_server_mode.swap(value, Ordering::AcqRel) != value
    }

    pub fn scope(&self) -> Scope {
        self.scope.read().clone()
    }

    pub fn set_scope(&self, scope: Scope) {
        *self.scope.write() = scope;
    }
}

impl Default for ScopeFilter {
    fn default() -> Self {
        Self::new(Scope::default(), false, true)
    }
}
