//! Background scan loop

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use super::alert::{AlertSink, MessageRef};
use super::engine::EngineShared;
use super::registry::RegisteredRule;
use super::rule::ScanHelper;
use super::stats::Outcome;
use crate::traffic::{Payload, TrafficMessage};

/// One long-lived consumer of the scan queue
///
/// Each iteration takes at most one message. The whole iteration runs
/// inside a panic boundary so nothing a rule or sink does can end the loop.
/// There is no per-rule timeout: a rule that never returns stalls this
/// worker.
pub(crate) struct ScanWorker {
    index: usize,
    shared: Arc<EngineShared>,
}

impl ScanWorker {
    pub(crate) fn new(index: usize, shared: Arc<EngineShared>) -> Self {
        Self { index, shared }
    }

    pub(crate) fn run(self) {
        let span = tracing::info_span!("pscan", engine = %self.shared.name, worker = self.index);
        let _enter = span.enter();
        tracing::debug!("Scan worker started");

        while self.shared.is_running() {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| self.step())) {
                tracing::error!(error = %panic_message(panic.as_ref()), "Scan worker iteration panicked, continuing");
            }
        }

        tracing::debug!("Scan worker stopped");
    }

    fn step(&self) {
        let Some(message) = self.shared.queue.poll_timeout(self.shared.idle_interval) else {
            return;
        };
        let _pending = PendingGuard(&self.shared);
        self.scan_message(&message);
    }

    fn scan_message(&self, message: &TrafficMessage) {
        if !self.shared.filter.should_scan(message) {
            self.shared.stats.message_skipped();
            return;
        }

        let payload = match self.shared.store.load(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    message_id = message.id,
                    channel_id = message.channel_id,
                    error = %e,
                    "Failed to resolve message payload, dropping"
                );
                self.shared.stats.message_unresolved();
                return;
            }
        };

        for rule in self.shared.registry.enabled_rules() {
            // May have been disabled after the snapshot was taken
            if !rule.is_enabled() || !rule.rule().applies_to(message.kind) {
                continue;
            }
            self.invoke(&rule, message, &payload);
        }

        self.shared.stats.message_scanned();
    }

    fn invoke(&self, rule: &RegisteredRule, message: &TrafficMessage, payload: &Payload) {
        let helper = ScanHelper::new(rule.id(), rule.threshold(), message);
        let _task = self.shared.tasks.start(rule.name(), &message.identifier());

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| rule.rule().scan(&helper, payload)));
        let elapsed = started.elapsed();

        let alerts = match result {
            Ok(Ok(alerts)) => {
                self.shared.stats.record(rule.name(), elapsed, Outcome::Completed);
                alerts
            }
            Ok(Err(e)) => {
                self.shared.stats.record(rule.name(), elapsed, Outcome::Failed);
                tracing::warn!(
                    rule_id = rule.id(),
                    rule = rule.name(),
                    message_id = message.id,
                    error = %format!("{:#}", e),
                    "Passive rule failed"
                );
                return;
            }
            Err(panic) => {
                self.shared.stats.record(rule.name(), elapsed, Outcome::Failed);
                tracing::warn!(
                    rule_id = rule.id(),
                    rule = rule.name(),
                    message_id = message.id,
                    error = %panic_message(panic.as_ref()),
                    "Passive rule panicked"
                );
                return;
            }
        };

        if elapsed > self.shared.slow_rule {
            tracing::debug!(
                rule = rule.name(),
                message_id = message.id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow passive rule"
            );
        }

        let cap = self.shared.max_alerts_per_rule();
        for alert in alerts {
            if self.shared.stats.try_count_alert(rule.name(), cap) {
                self.deliver(rule, message, |sink| sink.alert_found(alert));
            } else {
                tracing::trace!(rule = rule.name(), cap, "Alert cap reached, not recording");
            }
        }

        let tags = helper.take_tags();
        if !tags.is_empty() {
            let target = MessageRef::from(message);
            for tag in &tags {
                self.deliver(rule, message, |sink| sink.tag_added(&target, tag));
            }
        }
    }

    /// Hand a result to the sink; a panicking sink costs only that result
    fn deliver(&self, rule: &RegisteredRule, message: &TrafficMessage, f: impl FnOnce(&dyn AlertSink)) {
        let sink: &dyn AlertSink = &*self.shared.sink;
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| f(sink))) {
            tracing::warn!(
                rule = rule.name(),
                message_id = message.id,
                error = %panic_message(panic.as_ref()),
                "Alert sink panicked"
            );
        }
    }
}

/// Marks the current message as finished, even if the scan unwinds
struct PendingGuard<'a>(&'a EngineShared);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.message_finished();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
