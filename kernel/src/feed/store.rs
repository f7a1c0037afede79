// Feed Record Storage
//
// Durability contract for the feed. Every accepted state change is
// persisted here before it becomes visible in memory, so a store can be
// rebuilt by replaying the entries in order.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Identity, ResultSet};

/// One durable state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedEntry {
    Initialized { writer: Identity },
    ResultSet(ResultSet),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("feed file {} is locked by another writer", .path.display())]
    Locked { path: PathBuf },
}

/// Storage backend for feed entries.
///
/// Implementations MUST NOT:
/// - Reorder entries
/// - Mutate or drop persisted entries
/// - Report success for an entry that was not stored
/// - Keep any part of an entry whose `persist` returned an error
pub trait RecordStore: Send {
    /// Durably append one entry, or leave the backend as it was.
    fn persist(&mut self, entry: &FeedEntry) -> Result<(), StorageError>;

    /// Load all entries in persisted order.
    fn load(&self) -> Result<Vec<FeedEntry>, StorageError>;
}

/// Volatile backend, used when durability is not needed.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    entries: Vec<FeedEntry>,
}

impl InMemoryRecordStore {
    /// Seed the backend with existing entries, e.g. a history to replay.
    pub fn with_entries(entries: Vec<FeedEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[FeedEntry] {
        &self.entries
    }
}

impl RecordStore for InMemoryRecordStore {
    fn persist(&mut self, entry: &FeedEntry) -> Result<(), StorageError> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<FeedEntry>, StorageError> {
        Ok(self.entries.clone())
    }
}

/// Parse JSON Lines data.
///
/// Returns the entries and the byte length of the intact prefix. A bad or
/// unterminated final line is a torn write and is left out of both; a bad
/// line followed by more data is corruption.
fn scan(data: &[u8]) -> Result<(Vec<FeedEntry>, usize), StorageError> {
    let mut entries = Vec::new();
    let mut intact = 0;

    for (number, segment) in data.split_inclusive(|&b| b == b'\n').enumerate() {
        let end = intact + segment.len();
        let terminated = segment.last() == Some(&b'\n');
        let body = if terminated {
            &segment[..segment.len() - 1]
        } else {
            segment
        };

        if terminated && body.iter().all(|b| b.is_ascii_whitespace()) {
            intact = end;
            continue;
        }

        match serde_json::from_slice::<FeedEntry>(body) {
            Ok(entry) if terminated => entries.push(entry),
            _ if end == data.len() => return Ok((entries, intact)),
            parsed => {
                return Err(StorageError::Corrupt {
                    line: number + 1,
                    reason: match parsed {
                        Err(err) => err.to_string(),
                        Ok(_) => "unterminated entry".into(),
                    },
                })
            }
        }
        intact = end;
    }

    Ok((entries, intact))
}

/// JSON Lines file backend. One entry per line, synced on every persist.
///
/// Holds an exclusive advisory lock on the file for its whole lifetime, so
/// only one process can write a given feed.
#[derive(Debug)]
pub struct JsonFileRecordStore {
    path: PathBuf,
    file: File,
}

impl JsonFileRecordStore {
    /// Open `path` for appending, creating it if missing.
    ///
    /// Fails with [`StorageError::Locked`] if another handle holds the file.
    /// A torn final line left by an interrupted write is truncated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::Locked { path: path.clone() })?;

        let data = fs::read(&path)?;
        let (_, intact) = scan(&data)?;
        if intact < data.len() {
            warn!(
                path = %path.display(),
                dropped = data.len() - intact,
                "truncating torn entry at end of feed file"
            );
            file.set_len(intact as u64)?;
            file.sync_data()?;
        }

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `line`, then run `sync`. On any failure the file is cut back
    /// to its previous length.
    fn write_line<F>(&mut self, line: &[u8], sync: F) -> io::Result<()>
    where
        F: FnOnce(&File) -> io::Result<()>,
    {
        let len = self.file.metadata()?.len();
        let written = self
            .file
            .write_all(line)
            .and_then(|()| sync(&self.file));

        if let Err(err) = written {
            if let Err(rollback) = self.file.set_len(len) {
                warn!(path = %self.path.display(), error = %rollback, "feed file rollback failed");
            }
            return Err(err);
        }
        Ok(())
    }
}

impl RecordStore for JsonFileRecordStore {
    fn persist(&mut self, entry: &FeedEntry) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        self.write_line(line.as_bytes(), File::sync_data)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<FeedEntry>, StorageError> {
        let data = fs::read(&self.path)?;
        let (entries, _) = scan(&data)?;
        Ok(entries)
    }
}
