//! Durable guard state: the versioned document, its retention rules and
//! the stores that persist it.

pub mod error;
pub mod file;
pub mod memory;
pub mod state;

pub use error::StoreError;
pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use state::{
    AssessmentRecord, Dashboard, FinancialOverview, GuardState, PersistenceHealth, Retention,
    STATE_VERSION,
};

/// Load/save contract for [`GuardState`].
///
/// `load` never fails: a missing or unreadable document yields a fresh state.
/// `save` trims bounded collections in place, then writes atomically so a
/// crash mid-write leaves the previous document intact.
pub trait PersistenceStore: Send + Sync {
    fn load(&self) -> GuardState;
    fn save(&self, state: &mut GuardState) -> Result<(), StoreError>;
}
