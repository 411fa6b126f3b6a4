//! # nomad-storage: Durable coordinator state for `Nomad`
//!
//! The protocol state machine reads and writes exactly one thing: a
//! [`CoordinatorState`]. This crate defines that state, the atomic
//! [`StateChange`] used to move it, and two stores:
//!
//! - [`MemoryStore`]: volatile, for tests and embedded use
//! - [`FileStore`]: an append-only, checksummed log replayed on open
//!
//! Stores never interpret the protocol; they only apply state changes and
//! guarantee that each one is all-or-nothing.

mod change;
mod error;
mod file;
mod memory;
mod record;
mod state;

#[cfg(test)]
mod tests;

pub use change::{RequestKind, StateChange};
pub use error::{Result, StorageError};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use state::CoordinatorState;

/// Owner of one node's [`CoordinatorState`].
pub trait StateStore: Send {
    /// Current in-memory view of the state.
    fn state(&self) -> &CoordinatorState;

    /// Durably applies `change`. On error the state is unchanged.
    fn apply(&mut self, change: StateChange) -> Result<()>;

    /// Discards all state, leaving the store uninitialized.
    fn reset(&mut self) -> Result<()>;
}

impl<S: StateStore + ?Sized> StateStore for Box<S> {
    fn state(&self) -> &CoordinatorState {
        (**self).state()
    }

    fn apply(&mut self, change: StateChange) -> Result<()> {
        (**self).apply(change)
    }

    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
}
