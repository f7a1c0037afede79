// Feed Store
//
// Single-writer, append-only oracle feed. Results are addressable by
// insertion index and by their exact date. All mutable state sits
// behind one lock, so an append is applied entirely or not at all.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::env::{CurrentCallerProvider, CurrentTimeProvider};
use crate::feed::{
    FeedEntry, FeedLog, FeedResult, Identity, InMemoryRecordStore, RecordIndex, RecordStore,
    ResultSet, StorageError, Timestamp,
};
use crate::invariants::{AppendContext, InvariantEngine};
use crate::notify::{NullSink, ResultSink};

/// Reasons a feed operation is rejected. A rejected call never changes state.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("writer identity must not be null")]
    InvalidWriter,

    #[error("feed store is already initialized")]
    AlreadyInitialized,

    #[error("feed store is not initialized")]
    NotInitialized,

    #[error("caller {caller} is not the authorized writer")]
    Unauthorized { caller: Identity },

    #[error("date {date} is after current time {now}")]
    FutureDate { date: Timestamp, now: Timestamp },

    #[error("date {date} is not after latest date {last}")]
    NonMonotonicDate { date: Timestamp, last: Timestamp },

    #[error("no result at index {0}")]
    IndexNotFound(RecordIndex),

    #[error("no result at date {0}")]
    DateNotFound(Timestamp),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

struct FeedState<S> {
    writer: Option<Identity>,
    log: FeedLog,
    backend: S,
}

impl<S> FeedState<S> {
    fn check_initialize(&self, writer: Identity) -> Result<(), FeedError> {
        if self.writer.is_some() {
            return Err(FeedError::AlreadyInitialized);
        }
        if writer.is_null() {
            return Err(FeedError::InvalidWriter);
        }
        Ok(())
    }

    fn append_context(&self, caller: Identity, date: Timestamp, now: Timestamp) -> AppendContext {
        AppendContext {
            writer: self.writer,
            caller,
            date,
            now,
            last_date: self.log.last_date(),
        }
    }
}

/// The oracle feed.
///
/// Time comes from the injected clock; caller identity is passed to each
/// append. Successful appends are reported to the sink in append order.
pub struct FeedStore<S: RecordStore = InMemoryRecordStore> {
    state: Mutex<FeedState<S>>,
    rules: InvariantEngine,
    clock: Arc<dyn CurrentTimeProvider>,
    sink: Arc<dyn ResultSink>,
}

impl FeedStore<InMemoryRecordStore> {
    /// Create an empty store without durability.
    pub fn in_memory(clock: Arc<dyn CurrentTimeProvider>) -> Self {
        Self::new(InMemoryRecordStore::default(), clock)
    }
}

impl<S: RecordStore> FeedStore<S> {
    /// Create an uninitialized store over `backend`.
    ///
    /// The backend is not read; use [`crate::replay::open_feed`] to resume
    /// from persisted entries.
    pub fn new(backend: S, clock: Arc<dyn CurrentTimeProvider>) -> Self {
        Self {
            state: Mutex::new(FeedState {
                writer: None,
                log: FeedLog::new(),
                backend,
            }),
            rules: InvariantEngine::standard(),
            clock,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set the single authorized writer. Succeeds at most once.
    pub fn initialize(&self, writer: Identity) -> Result<(), FeedError> {
        let mut state = self.state.lock();
        state.check_initialize(writer)?;

        state.backend.persist(&FeedEntry::Initialized { writer })?;
        state.writer = Some(writer);

        info!(%writer, "feed store initialized");
        Ok(())
    }

    /// Append a result dated `date` and return its index.
    pub fn append<P>(
        &self,
        caller: &P,
        result: FeedResult,
        date: Timestamp,
    ) -> Result<RecordIndex, FeedError>
    where
        P: CurrentCallerProvider + ?Sized,
    {
        let caller = caller.current_caller();
        let mut state = self.state.lock();
        let now = self.clock.now();

        self.rules.evaluate(&state.append_context(caller, date, now))?;

        let event = ResultSet {
            result,
            date,
            index: state.log.next_index(),
            sender: caller,
        };
        state.backend.persist(&FeedEntry::ResultSet(event))?;
        let index = state.log.push(result, date);
        debug_assert_eq!(index, event.index);

        info!(index, date, "result appended");
        self.emit(&event);
        Ok(index)
    }

    /// Re-apply a persisted entry without persisting or notifying.
    ///
    /// Runs the same checks as a live call, against the current clock.
    pub(crate) fn restore(&self, entry: &FeedEntry) -> Result<(), FeedError> {
        let mut state = self.state.lock();
        match *entry {
            FeedEntry::Initialized { writer } => {
                state.check_initialize(writer)?;
                state.writer = Some(writer);
            }
            FeedEntry::ResultSet(event) => {
                let now = self.clock.now();
                self.rules
                    .evaluate(&state.append_context(event.sender, event.date, now))?;
                state.log.push(event.result, event.date);
            }
        }
        Ok(())
    }

    fn emit(&self, event: &ResultSet) {
        let delivered = catch_unwind(AssertUnwindSafe(|| self.sink.notify(event)));
        if delivered.is_err() {
            warn!(index = event.index, "result sink panicked; append kept");
        }
    }

    pub fn result_by_index(
        &self,
        index: RecordIndex,
    ) -> Result<(FeedResult, Timestamp), FeedError> {
        let state = self.state.lock();
        state
            .log
            .get(index)
            .map(|record| (record.result, record.date))
            .ok_or(FeedError::IndexNotFound(index))
    }

    /// Exact-date lookup. Never returns a neighbouring record.
    pub fn result_by_date(&self, date: Timestamp) -> Result<(FeedResult, RecordIndex), FeedError> {
        let state = self.state.lock();
        state
            .log
            .find(date)
            .map(|record| (record.result, record.index))
            .ok_or(FeedError::DateNotFound(date))
    }

    /// Result of the most recent record, or `None` before the first append.
    pub fn latest_result(&self) -> Option<FeedResult> {
        self.state.lock().log.latest().map(|record| record.result)
    }

    /// Date of the most recent record, or `None` before the first append.
    pub fn latest_result_date(&self) -> Option<Timestamp> {
        self.state.lock().log.last_date()
    }

    pub fn date_has_result(&self, date: Timestamp) -> bool {
        self.state.lock().log.find(date).is_some()
    }

    pub fn index_has_result(&self, index: RecordIndex) -> bool {
        self.state.lock().log.get(index).is_some()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> u64 {
        self.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().log.is_empty()
    }

    pub fn writer(&self) -> Option<Identity> {
        self.state.lock().writer
    }

    pub fn is_initialized(&self) -> bool {
        self.writer().is_some()
    }
}

impl<S: RecordStore> fmt::Debug for FeedStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FeedStore")
            .field("writer", &state.writer)
            .field("records", &state.log.len())
            .field("last_date", &state.log.last_date())
            .finish()
    }
}
