//! # nomad-sync: History reconciliation for `Nomad` nodes
//!
//! A node that (re)joins a cluster receives a [`SyncPayload`] from a
//! running member and feeds it to [`HistorySynchronizer::sync`]. The
//! synchronizer either proves the two histories compatible and replays
//! what is missing, or fails with a [`SyncError`] that names the first
//! disagreement.
//!
//! ```text
//!   source node                     joining node
//!   ───────────                     ────────────
//!   SyncPayload::export ──bytes──▶ SyncPayload::decode
//!                                       │
//!                                       ▼
//!                             HistorySynchronizer::sync
//!                                       │
//!                                       ▼
//!                        {NOTHING | RESTART_REQUIRED | ZAP_REQUIRED}
//! ```

mod error;
mod payload;
mod synchronizer;


pub use error::{Result, Side, SyncError};
pub use payload::SyncPayload;
pub use synchronizer::{HistorySynchronizer, Require, SyncOptions};
