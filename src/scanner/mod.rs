//! Passive scanning
//!
//! Messages observed by the proxy are queued on a [`PassiveScanEngine`] and
//! scanned in the background by every enabled [`PassiveRule`]. Nothing in
//! here modifies traffic or sends requests.

mod alert;
mod engine;
mod filter;
mod queue;
mod registry;
mod rule;
pub mod rules;
mod stats;
mod tasks;
#[doc(hidden)]
pub mod testing;
mod worker;

pub use alert::{Alert, AlertSink, CollectingSink, Confidence, MessageRef, Risk};
pub use engine::{EngineBuilder, PassiveScanEngine};
pub use filter::ScopeFilter;
pub use queue::ScanQueue;
pub use registry::{RegisteredRule, RuleInfo, RuleRegistry, RuleSnapshot};
pub use rule::{AlertThreshold, PassiveRule, RuleKind, RuleStatus, ScanHelper};
pub use stats::{MessageStats, Outcome, RuleStats, StatsRecorder};
pub use tasks::{TaskGuard, TaskInfo, TaskTracker};
