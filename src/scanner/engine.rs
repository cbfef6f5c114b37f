//! Passive scan engine orchestration

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::alert::AlertSink;
use super::filter::ScopeFilter;
use super::queue::ScanQueue;
use super::registry::RuleRegistry;
use super::rule::PassiveRule;
use super::stats::StatsRecorder;
use super::tasks::{TaskInfo, TaskTracker};
use super::worker::ScanWorker;
use crate::config::{RuleConfig, ScannerConfig};
use crate::scope::Scope;
use crate::traffic::{PayloadStore, TrafficMessage};

/// State shared between the engine handle and its workers
pub(crate) struct EngineShared {
    pub(crate) name: String,
    pub(crate) registry: RuleRegistry,
    pub(crate) filter: ScopeFilter,
    pub(crate) queue: ScanQueue,
    pub(crate) stats: StatsRecorder,
    pub(crate) tasks: TaskTracker,
    pub(crate) store: Arc<dyn PayloadStore>,
    pub(crate) sink: Arc<dyn AlertSink>,
    pub(crate) idle_interval: Duration,
    pub(crate) slow_rule: Duration,
    running: AtomicBool,
    scanning_enabled: AtomicBool,
    max_alerts_per_rule: AtomicUsize,
    /// Messages accepted but not yet finished (queued or in flight)
    pending: AtomicUsize,
}

impl EngineShared {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn max_alerts_per_rule(&self) -> usize {
        self.max_alerts_per_rule.load(Ordering::Acquire)
    }

    pub(crate) fn message_finished(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Builder for [`PassiveScanEngine`]
pub struct EngineBuilder {
    name: String,
    config: ScannerConfig,
    scope: Scope,
    store: Arc<dyn PayloadStore>,
    sink: Arc<dyn AlertSink>,
}

impl EngineBuilder {
    /// Instance name, shown in every log line from this engine
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn config(mut self, config: &ScannerConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn build(self) -> PassiveScanEngine {
        let config = self.config;
        let shared = EngineShared {
            name: self.name,
            registry: RuleRegistry::new(),
            filter: ScopeFilter::new(self.scope, config.scan_only_in_scope, config.ignore_server_mode),
            queue: ScanQueue::new(config.max_queue_depth),
            stats: StatsRecorder::new(),
            tasks: TaskTracker::new(),
            store: self.store,
            sink: self.sink,
            idle_interval: Duration::from_millis(config.idle_interval_ms.max(1)),
            slow_rule: Duration::from_millis(config.slow_rule_ms),
            running: AtomicBool::new(false),
            scanning_enabled: AtomicBool::new(config.enabled),
            max_alerts_per_rule: AtomicUsize::new(config.max_alerts_per_rule),
            pending: AtomicUsize::new(0),
        };

        PassiveScanEngine {
            shared: Arc::new(shared),
            workers: Mutex::new(Vec::new()),
            worker_count: config.workers.max(1),
        }
    }
}

/// Passive scan engine
///
/// Owns the rule registry, the scope filter, the queue and the worker
/// threads. With one worker, messages are scanned in global FIFO order.
/// With several workers there is no ordering guarantee between messages,
/// not even within a channel.
pub struct PassiveScanEngine {
    shared: Arc<EngineShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl PassiveScanEngine {
    pub fn builder(store: Arc<dyn PayloadStore>, sink: Arc<dyn AlertSink>) -> EngineBuilder {
        EngineBuilder {
            name: "default".to_string(),
            config: ScannerConfig::default(),
            scope: Scope::default(),
            store,
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn the worker threads; calling it on a running engine is a no-op
    pub fn start(&self) -> std::io::Result<()> {
        let mut workers = self.workers.lock();
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for index in 0..self.worker_count {
            let worker = ScanWorker::new(index, self.shared.clone());
            let spawned = std::thread::Builder::new()
                .name(format!("pscan-{}-{}", self.shared.name, index))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(workers);
                    self.shutdown();
                    return Err(e);
                }
            }
        }

        tracing::info!(engine = %self.shared.name, workers = self.worker_count, "Passive scan engine started");
        Ok(())
    }

    /// Stop the workers and wait for them
    ///
    /// A message already being scanned finishes first.
    pub fn shutdown(&self) {
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        if !self.shared.running.swap(false, Ordering::AcqRel) && handles.is_empty() {
            return;
        }
        self.shared.queue.wake_all();

        for handle in handles {
            if handle.join().is_err() {
                tracing::error!(engine = %self.shared.name, "Scan worker thread panicked");
            }
        }
        tracing::info!(engine = %self.shared.name, "Passive scan engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Interception entry point; never scans synchronously
    ///
    /// Returns `true` if the message was queued.
    pub fn on_message(&self, message: TrafficMessage) -> bool {
        if !self.scanning_enabled() {
            return false;
        }

        if !self.shared.filter.should_scan(&message) {
            self.shared.stats.message_skipped();
            return false;
        }

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if self.shared.queue.enqueue(message) {
            true
        } else {
            self.shared.message_finished();
            false
        }
    }

    pub fn add_rule(&self, rule: Arc<dyn PassiveRule>) -> bool {
        self.shared.registry.add(rule)
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.shared.registry
    }

    pub fn filter(&self) -> &ScopeFilter {
        &self.shared.filter
    }

    pub fn stats(&self) -> &StatsRecorder {
        &self.shared.stats
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn dropped_messages(&self) -> u64 {
        self.shared.queue.dropped()
    }

    /// Discard every pending message without scanning it
    pub fn clear_queue(&self) -> usize {
        let cleared = self.shared.queue.clear();
        self.shared.pending.fetch_sub(cleared, Ordering::AcqRel);
        tracing::info!(engine = %self.shared.name, cleared, "Cleared passive scan queue");
        cleared
    }

    pub fn current_tasks(&self) -> Vec<TaskInfo> {
        self.shared.tasks.current()
    }

    pub fn oldest_task(&self) -> Option<TaskInfo> {
        self.shared.tasks.oldest()
    }

    pub fn scanning_enabled(&self) -> bool {
        self.shared.scanning_enabled.load(Ordering::Acquire)
    }

    pub fn set_scanning_enabled(&self, enabled: bool) -> bool {
        self.shared.scanning_enabled.swap(enabled, Ordering::AcqRel) != enabled
    }

    pub fn max_alerts_per_rule(&self) -> usize {
        self.shared.max_alerts_per_rule()
    }

    pub fn set_max_alerts_per_rule(&self, max: usize) -> bool {
        self.shared.max_alerts_per_rule.swap(max, Ordering::AcqRel) != max
    }

    /// Block until every accepted message has been scanned or dropped
    ///
    /// Returns `false` on timeout.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Apply persisted rule state; unknown ids are ignored
    pub fn apply_rule_settings(&self, settings: &BTreeMap<u32, RuleConfig>) {
        for (id, rule_config) in settings {
            match self.shared.registry.get(*id) {
                Some(rule) => {
                    rule.set_threshold(rule_config.threshold);
                    if rule_config.threshold != super::AlertThreshold::Off {
                        rule.set_enabled(rule_config.enabled);
                    }
                }
                None => tracing::debug!(rule_id = id, "Ignoring settings for unregistered rule"),
            }
        }
    }

    /// Current rule state, for persistence
    pub fn rule_settings(&self) -> BTreeMap<u32, RuleConfig> {
        self.shared
            .registry
            .infos()
            .into_iter()
            .map(|info| {
                (
                    info.id,
                    RuleConfig {
                        enabled: info.enabled,
                        threshold: info.threshold,
                    },
                )
            })
            .collect()
    }

    /// Current scanner settings, for persistence
    pub fn scanner_settings(&self, base: &ScannerConfig) -> ScannerConfig {
        ScannerConfig {
            enabled: self.scanning_enabled(),
            scan_only_in_scope: self.shared.filter.scan_only_in_scope(),
            ignore_server_mode: self.shared.filter.ignore_server_mode(),
            max_alerts_per_rule: self.max_alerts_per_rule(),
            ..base.clone()
        }
    }
}

impl Drop for PassiveScanEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::testing::StaticRule;
    use crate::scanner::{AlertThreshold, CollectingSink};
    use crate::traffic::{HttpExchange, HttpRequest, HttpResponse, MessageHistory};

    fn engine() -> (PassiveScanEngine, Arc<MessageHistory>, Arc<CollectingSink>) {
        let history = Arc::new(MessageHistory::new(100));
        let sink = Arc::new(CollectingSink::new());
        let config = ScannerConfig {
            idle_interval_ms: 10,
            ..Default::default()
        };
        let engine = PassiveScanEngine::builder(history.clone(), sink.clone())
            .name("unit")
            .config(&config)
            .build();
        (engine, history, sink)
    }

    fn html(history: &MessageHistory, body: &str) -> TrafficMessage {
        history.record_http(
            1,
            HttpExchange::new(
                HttpRequest::new("GET", "https://a.test/"),
                Some(HttpResponse::new(200).with_body(body)),
            ),
        )
    }

    #[test]
    fn test_disabled_engine_discards() {
        let (engine, history, _sink) = engine();
        engine.set_scanning_enabled(false);
        assert!(!engine.on_message(html(&history, "x")));
        assert_eq!(engine.queue_depth(), 0);
    }

    #[test]
    fn test_clear_queue_before_start() {
        let (engine, history, sink) = engine();
        engine.add_rule(Arc::new(StaticRule::matching(10, "XSS", "<script>")));
        engine.registry().set_enabled(10, true);

        engine.on_message(html(&history, "<script>old</script>"));
        engine.on_message(html(&history, "<script>old</script>"));
        assert_eq!(engine.clear_queue(), 2);
        assert!(engine.wait_until_drained(Duration::from_millis(10)));

        engine.on_message(html(&history, "<script>new</script>"));
        engine.start().unwrap();
        assert!(engine.wait_until_drained(Duration::from_secs(5)));
        engine.shutdown();

        assert_eq!(sink.len(), 1);
        assert_eq!(engine.stats().messages().scanned, 1);
    }

    #[test]
    fn test_start_is_idempotent_and_shutdown_joins() {
        let (engine, _history, _sink) = engine();
        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.workers.lock().len(), 1);
        engine.shutdown();
        assert!(!engine.is_running());
        engine.shutdown();
    }

    #[test]
    fn test_rule_settings_roundtrip() {
        let (engine, _history, _sink) = engine();
        engine.add_rule(Arc::new(StaticRule::silent(10, "XSS")));
        engine.add_rule(Arc::new(StaticRule::silent(20, "SQLi")));

        let mut settings = BTreeMap::new();
        settings.insert(10, RuleConfig { enabled: true, threshold: AlertThreshold::High });
        settings.insert(20, RuleConfig { enabled: true, threshold: AlertThreshold::Off });
        settings.insert(99, RuleConfig { enabled: true, threshold: AlertThreshold::Low });
        engine.apply_rule_settings(&settings);

        let applied = engine.rule_settings();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[&10], RuleConfig { enabled: true, threshold: AlertThreshold::High });
        assert_eq!(applied[&20], RuleConfig { enabled: false, threshold: AlertThreshold::Off });
    }
}
