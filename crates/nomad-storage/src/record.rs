//! Framing for the state-change log.
//!
//! # Frame Format
//!
//! ```text
//! [FRAME_START:u32][length:u32][payload:bytes][crc32:u32][FRAME_END:u32]
//!        4B            4B         variable        4B          4B
//! ```
//!
//! All integers are little-endian. The CRC covers everything from the start
//! sentinel through the payload. A frame that cannot be read to its end is
//! reported as a torn write; whether that is a crash-truncated tail or damage
//! in the middle of the log is decided by the caller with [`next_frame`].

use crate::StorageError;

const FRAME_START: u32 = 0x4E4F_4D41;
const FRAME_END: u32 = 0x4144_4D4F;

const HEADER_SIZE: usize = 8;
const FRAME_OVERHEAD: usize = 16;

/// Wraps `payload` in a checksummed frame.
pub(crate) fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.extend_from_slice(&FRAME_START.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&FRAME_END.to_le_bytes());
    buf
}

/// Decodes the frame at the start of `data`.
///
/// `position` is the byte offset of `data` within the log and only feeds
/// error messages. Returns the payload and the number of bytes consumed.
///
/// # Errors
///
/// - [`StorageError::TornWrite`] if the frame is truncated or a sentinel is missing
/// - [`StorageError::CorruptedRecord`] if the CRC doesn't match
pub(crate) fn decode_frame(data: &[u8], position: u64) -> Result<(&[u8], usize), StorageError> {
    let torn = |reason: &str| StorageError::TornWrite {
        position,
        reason: reason.to_string(),
    };

    if data.len() < HEADER_SIZE {
        return Err(torn("truncated header"));
    }
    if read_u32(data, 0) != FRAME_START {
        return Err(torn("missing start sentinel"));
    }

    let length = read_u32(data, 4) as usize;
    let total = FRAME_OVERHEAD + length;
    if data.len() < total {
        return Err(torn("truncated payload"));
    }

    let crc_offset = HEADER_SIZE + length;
    if read_u32(data, crc_offset) != crc32fast::hash(&data[..crc_offset]) {
        return Err(StorageError::CorruptedRecord { position });
    }
    if read_u32(data, crc_offset + 4) != FRAME_END {
        return Err(torn("missing end sentinel"));
    }

    Ok((&data[HEADER_SIZE..crc_offset], total))
}

/// Offset of the first intact frame starting after `from`, if any.
///
/// Only frames that pass their checksum count: a stray start sentinel inside
/// a partially written payload must not be mistaken for later history.
pub(crate) fn next_frame(data: &[u8], from: usize) -> Option<usize> {
    let start = FRAME_START.to_le_bytes();
    (from + 1..data.len().saturating_sub(FRAME_OVERHEAD - 1))
        .filter(|&at| data[at..at + 4] == start)
        .find(|&at| decode_frame(&data[at..], at as u64).is_ok())
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(bytes)
}
