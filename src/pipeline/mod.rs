//! Per-period orchestration, progress events and run metrics.

mod metrics;
mod orchestrator;
mod progress;

pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::{CompletedPeriod, FailedPeriod, PeriodOutcome, PipelineOrchestrator, RunSummary};
pub use progress::{ProgressEvent, ProgressPublisher, Stage};
