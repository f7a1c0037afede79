// Result Notifications
//
// Fire-and-forget side channel for successful appends. Sinks receive
// events in append order and return nothing to the store.

#[cfg(test)]
use parking_lot::Mutex;

use crate::feed::ResultSet;

/// Observer for `ResultSet` events.
///
/// Called while the store lock is held. Implementations must not call
/// back into the store.
pub trait ResultSink: Send + Sync {
    fn notify(&self, event: &ResultSet);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn notify(&self, _event: &ResultSet) {}
}

/// Emits each event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ResultSink for TracingSink {
    fn notify(&self, event: &ResultSet) {
        tracing::info!(
            target: "feedstore::events",
            result = %event.result,
            date = event.date,
            index = event.index,
            sender = %event.sender,
            "ResultSet"
        );
    }
}

/// Keeps every event in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ResultSet>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResultSet> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[cfg(test)]
impl ResultSink for RecordingSink {
    fn notify(&self, event: &ResultSet) {
        self.events.lock().push(*event);
    }
}
