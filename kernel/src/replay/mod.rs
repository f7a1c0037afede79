// Deterministic Replay Engine
//
// Rebuilds a feed store from its persisted entries, re-running every
// entry through the same checks a live call would face.

use std::sync::Arc;

use tracing::{info, warn};

use crate::env::CurrentTimeProvider;
use crate::feed::{FeedEntry, RecordIndex, RecordStore, StorageError};
use crate::notify::ResultSink;
use crate::oracle::{FeedError, FeedStore};

/// Errors that can occur during replay.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("entry {position} rejected: {source}")]
    Rejected { position: usize, source: FeedError },

    #[error("entry {position} has index {actual}, expected {expected}")]
    IndexMismatch {
        position: usize,
        expected: RecordIndex,
        actual: RecordIndex,
    },
}

/// Open a feed store over `backend`, replaying everything it holds.
///
/// This is the only supported way to resume a persisted feed. Replayed
/// results are not sent to `sink`; only new appends are.
pub fn open_feed<S: RecordStore>(
    backend: S,
    clock: Arc<dyn CurrentTimeProvider>,
    sink: Arc<dyn ResultSink>,
) -> Result<FeedStore<S>, ReplayError> {
    let entries = backend.load()?;
    let store = FeedStore::new(backend, clock).with_sink(sink);

    for (offset, entry) in entries.iter().enumerate() {
        let position = offset + 1;

        if let FeedEntry::ResultSet(event) = entry {
            let expected = store.len() + 1;
            if event.index != expected {
                warn!(position, expected, actual = event.index, "replay index mismatch");
                return Err(ReplayError::IndexMismatch {
                    position,
                    expected,
                    actual: event.index,
                });
            }
        }

        store.restore(entry).map_err(|source| {
            warn!(position, error = %source, "replay rejected entry");
            ReplayError::Rejected { position, source }
        })?;
    }

    info!(entries = entries.len(), records = store.len(), "feed replayed");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::FixedClock;
    use crate::feed::{FeedResult, Identity, InMemoryRecordStore, JsonFileRecordStore, ResultSet};
    use crate::notify::{NullSink, RecordingSink};
    use uuid::Uuid;

    const NOW: u64 = 1_700_000_000;

    fn set(writer: Identity, index: u64, date: u64) -> FeedEntry {
        FeedEntry::ResultSet(ResultSet {
            result: FeedResult([index as u8; 32]),
            date,
            index,
            sender: writer,
        })
    }

    fn replay(entries: Vec<FeedEntry>) -> Result<FeedStore, ReplayError> {
        open_feed(
            InMemoryRecordStore::with_entries(entries),
            Arc::new(FixedClock::new(NOW)),
            Arc::new(NullSink),
        )
    }

    #[test]
    fn replay_restores_writer_and_records() {
        let writer = Identity(Uuid::new_v4());
        let store = replay(vec![
            FeedEntry::Initialized { writer },
            set(writer, 1, NOW - 20),
            set(writer, 2, NOW - 10),
        ])
        .unwrap();

        assert_eq!(store.writer(), Some(writer));
        assert_eq!(store.len(), 2);
        assert_eq!(store.result_by_date(NOW - 10).unwrap().1, 2);
        assert_eq!(store.latest_result_date(), Some(NOW - 10));
    }

    #[test]
    fn replay_continues_with_next_index() {
        let writer = Identity(Uuid::new_v4());
        let sink = Arc::new(RecordingSink::new());
        let store = open_feed(
            InMemoryRecordStore::with_entries(vec![
                FeedEntry::Initialized { writer },
                set(writer, 1, NOW - 20),
            ]),
            Arc::new(FixedClock::new(NOW)),
            sink.clone(),
        )
        .unwrap();

        assert!(sink.is_empty());
        assert_eq!(store.append(&writer, FeedResult([9; 32]), NOW).unwrap(), 2);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn replay_rejects_duplicate_initialization() {
        let writer = Identity(Uuid::new_v4());
        let err = replay(vec![
            FeedEntry::Initialized { writer },
            FeedEntry::Initialized {
                writer: Identity(Uuid::new_v4()),
            },
        ])
        .unwrap_err();

        assert!(matches!(
            err,
            ReplayError::Rejected {
                position: 2,
                source: FeedError::AlreadyInitialized
            }
        ));
    }

    #[test]
    fn replay_rejects_out_of_order_dates() {
        let writer = Identity(Uuid::new_v4());
        let err = replay(vec![
            FeedEntry::Initialized { writer },
            set(writer, 1, NOW - 10),
            set(writer, 2, NOW - 20),
        ])
        .unwrap_err();

        assert!(matches!(
            err,
            ReplayError::Rejected {
                position: 3,
                source: FeedError::NonMonotonicDate { .. }
            }
        ));
    }

    #[test]
    fn replay_rejects_foreign_sender() {
        let writer = Identity(Uuid::new_v4());
        let err = replay(vec![
            FeedEntry::Initialized { writer },
            set(Identity(Uuid::new_v4()), 1, NOW - 10),
        ])
        .unwrap_err();

        assert!(matches!(
            err,
            ReplayError::Rejected {
                source: FeedError::Unauthorized { .. },
                ..
            }
        ));
    }

    #[test]
    fn replay_rejects_records_before_initialization() {
        let writer = Identity(Uuid::new_v4());
        let err = replay(vec![set(writer, 1, NOW - 10)]).unwrap_err();

        assert!(matches!(
            err,
            ReplayError::Rejected {
                position: 1,
                source: FeedError::NotInitialized
            }
        ));
    }

    #[test]
    fn replay_rejects_index_gaps() {
        let writer = Identity(Uuid::new_v4());
        let err = replay(vec![
            FeedEntry::Initialized { writer },
            set(writer, 2, NOW - 10),
        ])
        .unwrap_err();

        assert!(matches!(
            err,
            ReplayError::IndexMismatch {
                position: 2,
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn replay_rejects_records_dated_after_clock() {
        let writer = Identity(Uuid::new_v4());
        let err = replay(vec![
            FeedEntry::Initialized { writer },
            set(writer, 1, NOW + 10),
        ])
        .unwrap_err();

        assert!(matches!(
            err,
            ReplayError::Rejected {
                source: FeedError::FutureDate { .. },
                ..
            }
        ));
    }

    #[test]
    fn empty_backend_opens_uninitialized() {
        let store = replay(vec![]).unwrap();
        assert!(!store.is_initialized());
        assert!(store.is_empty());
    }

    fn open_file(path: &std::path::Path) -> Result<FeedStore<JsonFileRecordStore>, ReplayError> {
        let backend = JsonFileRecordStore::open(path)?;
        open_feed(backend, Arc::new(FixedClock::new(NOW)), Arc::new(NullSink))
    }

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("feedstore-replay-{}.jsonl", Uuid::new_v4()))
    }

    #[test]
    fn second_writer_on_same_file_is_refused() {
        let path = temp_path();
        let writer = Identity(Uuid::new_v4());

        let first = open_file(&path).unwrap();
        first.initialize(writer).unwrap();

        let err = open_file(&path).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Storage(StorageError::Locked { .. })
        ));

        assert_eq!(first.append(&writer, FeedResult([1; 32]), NOW - 100).unwrap(), 1);
        drop(first);

        let reopened = open_file(&path).unwrap();
        assert_eq!(reopened.len(), 1);

        drop(reopened);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn torn_write_does_not_block_reopen() {
        use std::io::Write;

        let path = temp_path();
        let writer = Identity(Uuid::new_v4());
        {
            let store = open_file(&path).unwrap();
            store.initialize(writer).unwrap();
            store.append(&writer, FeedResult([1; 32]), NOW - 100).unwrap();
        }
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"{\"kind\":\"result_se")
            .unwrap();

        let store = open_file(&path).unwrap();
        assert_eq!(
            store.result_by_index(1).unwrap(),
            (FeedResult([1; 32]), NOW - 100)
        );
        assert_eq!(store.append(&writer, FeedResult([2; 32]), NOW).unwrap(), 2);

        drop(store);
        assert_eq!(open_file(&path).unwrap().len(), 2);
        std::fs::remove_file(&path).unwrap();
    }
}
