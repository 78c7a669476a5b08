pub mod collaborators;
pub mod config;
pub mod error;
pub mod ingest;
pub mod types;

pub use collaborators::{
    ActionExecutor, ActionRequest, ApprovalGate, ExecutionReport, ExecutionStatus, MetricsSource,
};
pub use config::GuardConfig;
pub use error::{CampaignError, CampaignResult, ExecutorError, SourceError};
pub use ingest::RawMetrics;
