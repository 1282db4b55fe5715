//! Execution statistics
//!
//! Workers aggregate counters in memory and a background ticker flushes one
//! update per execution to the orchestrator's sink. The orchestrator reads
//! the shared counters to drive its quiescence decision.

pub mod counters;
pub mod reporter;

pub use counters::ExecutionCounters;
pub use reporter::{HttpStatsSink, KvStatsSink, StatsReporter, StatsReporterConfig, StatsSink};
