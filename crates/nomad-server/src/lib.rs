//! # nomad-server: The `Nomad` change-coordination protocol
//!
//! A lightweight two-phase commit that keeps every node of a cluster applying
//! the same configuration changes in the same order.
//!
//! # Protocol
//!
//! ```text
//!  coordinator                      node
//!      │──── discover ───────────────▶│   mode, mutation count, versions
//!      │──── prepare(count, v, Δ) ───▶│   ACCEPTING → PREPARED
//!      │──── commit(count+1, id) ────▶│   PREPARED → ACCEPTING, Δ applied
//!      │          or                  │
//!      │──── rollback(count+1, id) ──▶│   PREPARED → ACCEPTING
//! ```
//!
//! Every mutative message carries the mutation count the sender last saw.
//! A stale count is refused as [`RejectionReason::Dead`], which fences out
//! coordinators working from an outdated view of the node.
//!
//! # Components
//!
//! - [`NomadServer`]: the state machine over a [`nomad_storage::StateStore`]
//! - [`SerializingNomadServer`]: fair one-at-a-time access for concurrent callers
//! - [`ChangeApplicator`] / [`ConfigChangeApplicator`]: the domain rules
//! - [`ChangeCoordinator`]: an in-process driver for the active role

mod applicator;
mod coordinator;
mod error;
mod message;
mod serializing;
mod server;


pub use applicator::{
    ApplyError, ChangeApplicator, ConfigChangeApplicator, PotentialApplicationResult,
    RuntimeConfig,
};
pub use coordinator::{ChangeCoordinator, ChangeOutcome, CoordinatorError, RepairOutcome};
pub use error::{NomadError, Result};
pub use message::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, MutationStamp, NomadRequest,
    NomadResponse, PrepareMessage, RejectionReason, RollbackMessage, TakeoverMessage,
};
pub use serializing::SerializingNomadServer;
pub use server::NomadServer;
