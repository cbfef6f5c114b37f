//! In-flight scan task tracking

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// One (rule, message) scan currently running
#[derive(Debug, Clone)]
struct ScanTask {
    rule_name: String,
    target: String,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// Serializable view of a running task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub rule_name: String,
    pub target: String,
    #[serde(rename = "startTimestamp")]
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Registry of running tasks, ordered by start
#[derive(Default)]
pub struct TaskTracker {
    next_id: AtomicU64,
    running: Mutex<BTreeMap<u64, ScanTask>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task; it is removed when the guard drops
    pub fn start(&self, rule_name: &str, target: &str) -> TaskGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.running.lock().insert(
            id,
            ScanTask {
                rule_name: rule_name.to_string(),
                target: target.to_string(),
                started_at: Utc::now(),
                started: Instant::now(),
            },
        );
        TaskGuard { tracker: self, id }
    }

    /// Running tasks, oldest first
    pub fn current(&self) -> Vec<TaskInfo> {
        self.running.lock().values().map(info).collect()
    }

    pub fn oldest(&self) -> Option<TaskInfo> {
        self.running.lock().values().next().map(info)
    }

    pub fn len(&self) -> usize {
        self.running.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.lock().is_empty()
    }
}

fn info(task: &ScanTask) -> TaskInfo {
    TaskInfo {
        rule_name: task.rule_name.clone(),
        target: task.target.clone(),
        started_at: task.started_at,
        elapsed_ms: u64::try_from(task.started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

/// Removes its task from the tracker on drop, including during unwinding
pub struct TaskGuard<'a> {
    tracker: &'a TaskTracker,
    id: u64,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.tracker.running.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_lifecycle() {
        let tracker = TaskTracker::new();
        {
            let _first = tracker.start("XSS", "https://a.test/");
            let _second = tracker.start("SQLi", "https://b.test/");
            assert_eq!(tracker.len(), 2);
            assert_eq!(tracker.oldest().unwrap().rule_name, "XSS");

            let names: Vec<String> = tracker.current().into_iter().map(|t| t.rule_name).collect();
            assert_eq!(names, vec!["XSS", "SQLi"]);
        }
        assert!(tracker.is_empty());
        assert!(tracker.oldest().is_none());
    }

    #[test]
    fn test_task_info_wire_keys() {
        let tracker = TaskTracker::new();
        let _task = tracker.start("XSS", "https://a.test/");

        let value = serde_json::to_value(tracker.current()).unwrap();
        let mut keys: Vec<&str> = value[0].as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["elapsedMs", "ruleName", "startTimestamp", "target"]);
    }
}
