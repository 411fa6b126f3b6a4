//! Volatile state store.

use crate::{CoordinatorState, Result, StateChange, StateStore};

/// Keeps the coordinator state in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: CoordinatorState,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn state(&self) -> &CoordinatorState {
        &self.state
    }

    fn apply(&mut self, change: StateChange) -> Result<()> {
        self.state.apply(&change)
    }

    fn reset(&mut self) -> Result<()> {
        self.state = CoordinatorState::new();
        Ok(())
    }
}
