use campaign_core::CampaignError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoded state does not read back: {0}")]
    Unreadable(serde_json::Error),

    #[error("Unsupported state version {found} (expected <= {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for CampaignError {
    fn from(e: StoreError) -> Self {
        CampaignError::Store(e.to_string())
    }
}
