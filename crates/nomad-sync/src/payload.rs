//! The unit of data a source node hands to a syncing node.
//!
//! # Encoding
//!
//! ```text
//! ┌───────────┬─────────┬─────────────┬──────────────────┐
//! │ "NMDS"    │ format  │ length u32  │ postcard payload │
//! │ 4 bytes   │ 1 byte  │ LE          │ length bytes     │
//! └───────────┴─────────┴─────────────┴──────────────────┘
//! ```

use nomad_server::NomadServer;
use nomad_storage::StateStore;
use nomad_types::{ChangeRequestRecord, Cluster};
use serde::{Deserialize, Serialize};

use crate::error::{Result, Side, SyncError};

const MAGIC: &[u8; 4] = b"NMDS";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1 + 4;

/// A source node's full history plus the topology it currently runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub history: Vec<ChangeRequestRecord>,
    pub source_topology: Cluster,
}

impl SyncPayload {
    pub fn new(history: Vec<ChangeRequestRecord>, source_topology: Cluster) -> Self {
        Self {
            history,
            source_topology,
        }
    }

    /// Captures `server`'s history. The node must have a committed
    /// configuration.
    pub fn export<S: StateStore>(server: &NomadServer<S>) -> Result<Self> {
        let topology = server
            .current_committed_config()
            .map(|ctx| ctx.cluster().clone())
            .ok_or(SyncError::EmptyHistory(Side::Source))?;
        Ok(Self::new(server.change_history(), topology))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = postcard::to_allocvec(self).map_err(SyncError::Encode)?;
        let len = u32::try_from(body.len()).map_err(|_| SyncError::TooLarge(body.len()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(SyncError::Decode(format!(
                "need at least {HEADER_LEN} bytes, got {}",
                data.len()
            )));
        }
        if &data[..4] != MAGIC {
            return Err(SyncError::Decode("not a sync payload".into()));
        }
        if data[4] != FORMAT_VERSION {
            return Err(SyncError::Decode(format!(
                "unsupported format version {}",
                data[4]
            )));
        }

        let len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
        let body = &data[HEADER_LEN..];
        if body.len() != len {
            return Err(SyncError::Decode(format!(
                "declared length {len} but {} bytes follow the header",
                body.len()
            )));
        }

        let (payload, rest) = postcard::take_from_bytes::<Self>(body)
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        if !rest.is_empty() {
            return Err(SyncError::Decode(format!("{} trailing bytes", rest.len())));
        }
        Ok(payload)
    }
}
