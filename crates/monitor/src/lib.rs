//! The monitoring control loop: per-unit evaluation, the periodic scheduler
//! and built-in collaborators for running without a platform integration.

pub mod adapters;
pub mod evaluator;
pub mod scheduler;

pub use adapters::{FileMetricsSource, SimulatedExecutor};
pub use evaluator::{UnitEvaluation, UnitEvaluator, UnitInput};
pub use scheduler::{CycleReport, MonitoringScheduler};
