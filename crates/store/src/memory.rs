use crate::error::StoreError;
use crate::state::{GuardState, Retention};
use crate::PersistenceStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-process store for dry runs and tests. Can be told to fail saves to
/// exercise persistence-failure handling.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<Option<GuardState>>,
    retention: Retention,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: GuardState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_saves.store(failing, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<GuardState> {
        self.state.lock().clone()
    }
}

impl PersistenceStore for MemoryStore {
    fn load(&self) -> GuardState {
        self.state.lock().clone().unwrap_or_default()
    }

    fn save(&self, state: &mut GuardState) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store set to fail".to_string()));
        }
        state.trim(&self.retention);
        *self.state.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
