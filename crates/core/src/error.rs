use thiserror::Error;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metrics source error: {0}")]
    Source(#[from] SourceError),

    #[error("Action executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Persistence error: {0}")]
    Store(String),

    #[error("Invalid metrics record: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for CampaignError {
    fn from(e: config::ConfigError) -> Self {
        CampaignError::Config(e.to_string())
    }
}

/// Failures reported by a [`MetricsSource`](crate::collaborators::MetricsSource).
///
/// "No data" is never an error: sources return a zeroed snapshot instead.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("authentication failure: {0}")]
    Auth(String),

    #[error("fetch timed out after {0} ms")]
    Timeout(u64),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Failures raised while applying an action on the advertising platform.
#[derive(Error, Debug, Clone)]
pub enum ExecutorError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("platform rejected action: {0}")]
    Rejected(String),

    #[error("execution timed out after {0} ms")]
    Timeout(u64),
}
