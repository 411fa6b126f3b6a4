//! Crash-safe file-backed state store.
//!
//! The store is a single append-only log of framed, postcard-encoded
//! [`StateChange`]s. The in-memory [`CoordinatorState`] is rebuilt on open by
//! replaying the log from the beginning.
//!
//! # Recovery
//!
//! A frame cut short by a crash (torn write) can only be the last one in the
//! log: if no intact frame follows it, the log is truncated back to the last
//! complete frame and a warning is logged. Any other damage, including a
//! broken frame with intact history after it, is real corruption and opening
//! fails with [`StorageError::CorruptedRecord`]. Committed history is never
//! discarded on open.
//!
//! An append that fails part way is cut back off before the error is
//! returned, so later appends never land behind a partial frame.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, error, info, warn};

use crate::{
    CoordinatorState, Result, StateChange, StateStore, StorageError,
    record::{decode_frame, encode_frame, next_frame},
};

/// Default log filename inside a node's data directory.
pub const LOG_FILENAME: &str = "nomad.log";

/// File-backed [`StateStore`].
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: File,
    state: CoordinatorState,
    sync_writes: bool,
}

impl FileStore {
    /// Opens (or creates) the log at `path` and replays it.
    ///
    /// When `sync_writes` is set every appended frame is fsynced before
    /// [`StateStore::apply`] returns.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut state = CoordinatorState::new();
        let mut pos = 0usize;
        let mut replayed = 0usize;
        while pos < data.len() {
            match decode_frame(&data[pos..], pos as u64) {
                Ok((payload, used)) => {
                    let change: StateChange =
                        postcard::from_bytes(payload).map_err(|source| StorageError::Decode {
                            position: pos as u64,
                            source,
                        })?;
                    state.apply(&change)?;
                    pos += used;
                    replayed += 1;
                }
                Err(StorageError::TornWrite { position, reason }) => {
                    if let Some(intact) = next_frame(&data, pos) {
                        error!(
                            path = %path.display(),
                            position,
                            %reason,
                            next_intact_frame = intact,
                            "damaged frame in the middle of the state log"
                        );
                        return Err(StorageError::CorruptedRecord { position });
                    }
                    warn!(
                        path = %path.display(),
                        position,
                        %reason,
                        discarded = data.len() - pos,
                        "truncating torn tail of state log"
                    );
                    file.set_len(pos as u64)?;
                    file.sync_all()?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        info!(path = %path.display(), records = replayed, "opened state log");

        Ok(Self {
            path,
            file,
            state,
            sync_writes,
        })
    }

    /// Opens the default log file inside `data_dir`.
    pub fn open_in(data_dir: impl AsRef<Path>, sync_writes: bool) -> Result<Self> {
        Self::open(data_dir.as_ref().join(LOG_FILENAME), sync_writes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStore {
    fn state(&self) -> &CoordinatorState {
        &self.state
    }

    fn apply(&mut self, change: StateChange) -> Result<()> {
        self.state.check(&change)?;

        let payload = postcard::to_allocvec(&change).map_err(StorageError::Encode)?;
        let frame = encode_frame(&payload);
        append_frame(&mut self.file, &frame, self.sync_writes)?;

        debug!(kind = ?change.kind(), bytes = frame.len(), "appended state change");
        self.state.apply(&change)
    }

    fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.state = CoordinatorState::new();
        info!(path = %self.path.display(), "state log reset");
        Ok(())
    }
}

/// The operations an append needs from the log file.
trait LogFile: Write {
    fn len(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Appends `frame`, cutting the log back to its previous length on failure.
fn append_frame(log: &mut impl LogFile, frame: &[u8], sync: bool) -> Result<()> {
    let len = log.len()?;
    let written = log
        .write_all(frame)
        .and_then(|()| if sync { log.sync() } else { Ok(()) });

    if let Err(e) = written {
        warn!(error = %e, len, "append failed, rewinding state log");
        if let Err(rewind) = log.truncate(len) {
            error!(error = %rewind, len, "failed to rewind state log after a failed append");
            return Err(rewind.into());
        }
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory log whose writes fail once `capacity` bytes are stored.
    struct FlakyLog {
        data: Vec<u8>,
        capacity: usize,
        fail_sync: bool,
    }

    impl FlakyLog {
        fn new(capacity: usize) -> Self {
            Self {
                data: Vec::new(),
                capacity,
                fail_sync: false,
            }
        }
    }

    impl Write for FlakyLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity - self.data.len();
            if room == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = room.min(buf.len());
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for FlakyLog {
        fn len(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            if self.fail_sync {
                return Err(io::Error::other("fsync failed"));
            }
            Ok(())
        }
    }

    #[test]
    fn failed_append_leaves_no_partial_frame() {
        let first = encode_frame(b"first");
        let mut log = FlakyLog::new(first.len() + 10);
        append_frame(&mut log, &first, true).unwrap();

        let err = append_frame(&mut log, &encode_frame(b"second"), true).unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert_eq!(log.data, first);

        // The next append lands right after the last complete frame.
        log.capacity = usize::MAX;
        let third = encode_frame(b"third");
        append_frame(&mut log, &third, true).unwrap();
        let (payload, used) = decode_frame(&log.data[first.len()..], 0).unwrap();
        assert_eq!(payload, b"third");
        assert_eq!(first.len() + used, log.data.len());
    }

    #[test]
    fn failed_sync_rewinds_the_frame() {
        let mut log = FlakyLog::new(usize::MAX);
        log.fail_sync = true;

        assert!(append_frame(&mut log, &encode_frame(b"lost"), true).is_err());
        assert!(log.data.is_empty());

        // Without fsync the same append goes through.
        append_frame(&mut log, &encode_frame(b"kept"), false).unwrap();
        assert!(!log.data.is_empty());
    }
}
