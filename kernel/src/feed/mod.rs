// Feed Records
//
// Value types for the oracle feed and the dual-indexed record log.
// Records are append-only: once pushed they are never mutated or removed.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

pub mod store;

pub use store::{FeedEntry, InMemoryRecordStore, JsonFileRecordStore, RecordStore, StorageError};

/// Seconds since the UNIX epoch.
pub type Timestamp = u64;

/// 1-based position of a record in append order. Index 0 is never assigned.
pub type RecordIndex = u64;

/// Width of a feed result payload in bytes.
pub const RESULT_LEN: usize = 32;

/// Opaque identity of a caller or of the authorized writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(pub Uuid);

impl Identity {
    /// The null identity. Never accepted as a writer.
    pub const NULL: Identity = Identity(Uuid::nil());

    pub fn is_null(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Opaque fixed-width payload published by the writer.
///
/// The store never interprets the bytes. Text form is 64 lowercase hex
/// characters, optionally prefixed with `0x` when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedResult(pub [u8; RESULT_LEN]);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseResultError {
    #[error("invalid result encoding: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FeedResult {
    pub fn as_bytes(&self) -> &[u8; RESULT_LEN] {
        &self.0
    }
}

impl From<[u8; RESULT_LEN]> for FeedResult {
    fn from(bytes: [u8; RESULT_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for FeedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for FeedResult {
    type Err = ParseResultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; RESULT_LEN];
        hex::decode_to_slice(digits, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for FeedResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FeedResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// A single published result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub result: FeedResult,
    pub date: Timestamp,
    pub index: RecordIndex,
}

/// Notification emitted once per successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSet {
    pub result: FeedResult,
    pub date: Timestamp,
    pub index: RecordIndex,
    pub sender: Identity,
}

/// Record sequence plus the date index derived from it.
///
/// Both indexes are only ever changed by [`FeedLog::push`], so a date
/// entry exists exactly when a record with that date exists.
#[derive(Debug, Default)]
pub struct FeedLog {
    records: Vec<Record>,
    by_date: HashMap<Timestamp, RecordIndex>,
}

impl FeedLog {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            by_date: HashMap::new(),
        }
    }

    /// Index the next pushed record will receive.
    pub fn next_index(&self) -> RecordIndex {
        self.len() + 1
    }

    /// Append a record and index its date.
    ///
    /// Callers must have checked that `date` is after [`FeedLog::last_date`].
    pub(crate) fn push(&mut self, result: FeedResult, date: Timestamp) -> RecordIndex {
        debug_assert!(self.last_date().map_or(true, |last| date > last));

        let index = self.next_index();
        self.records.push(Record {
            result,
            date,
            index,
        });
        self.by_date.insert(date, index);
        index
    }

    pub fn get(&self, index: RecordIndex) -> Option<&Record> {
        let position = index.checked_sub(1)?;
        usize::try_from(position)
            .ok()
            .and_then(|position| self.records.get(position))
    }

    /// Exact-date lookup.
    pub fn find(&self, date: Timestamp) -> Option<&Record> {
        self.by_date.get(&date).and_then(|&index| self.get(index))
    }

    pub fn latest(&self) -> Option<&Record> {
        self.records.last()
    }

    pub fn last_date(&self) -> Option<Timestamp> {
        self.latest().map(|record| record.date)
    }

    pub fn len(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(byte: u8) -> FeedResult {
        FeedResult([byte; RESULT_LEN])
    }

    #[test]
    fn push_assigns_one_based_indexes() {
        let mut log = FeedLog::new();
        assert_eq!(log.next_index(), 1);

        assert_eq!(log.push(result(1), 100), 1);
        assert_eq!(log.push(result(2), 200), 2);

        assert_eq!(log.len(), 2);
        assert_eq!(log.get(2).map(|r| r.result), Some(result(2)));
        assert_eq!(log.latest().map(|r| r.date), Some(200));
    }

    #[test]
    fn index_zero_and_past_end_are_absent() {
        let mut log = FeedLog::new();
        log.push(result(1), 100);

        assert!(log.get(0).is_none());
        assert!(log.get(2).is_none());
        assert!(log.get(u64::MAX).is_none());
    }

    #[test]
    fn date_lookup_is_exact() {
        let mut log = FeedLog::new();
        log.push(result(1), 100);
        log.push(result(2), 200);

        assert_eq!(log.find(200).map(|r| r.index), Some(2));
        assert!(log.find(150).is_none());
        assert!(log.find(201).is_none());
    }

    #[test]
    fn empty_log_has_no_latest() {
        let log = FeedLog::new();
        assert!(log.is_empty());
        assert!(log.latest().is_none());
        assert!(log.last_date().is_none());
    }

    #[test]
    fn result_text_form() {
        let parsed: FeedResult =
            "0x00000000000000000000000000000000000000000000000000000000000000ff"
                .parse()
                .unwrap();
        assert_eq!(parsed.0[31], 0xff);
        assert_eq!(
            parsed.to_string(),
            "00000000000000000000000000000000000000000000000000000000000000ff"
        );

        let short = "abcd".parse::<FeedResult>().unwrap_err();
        assert_eq!(
            short,
            ParseResultError::Hex(hex::FromHexError::InvalidStringLength)
        );
    }

    #[test]
    fn null_identity() {
        assert!(Identity::NULL.is_null());
        assert!(!Identity(Uuid::new_v4()).is_null());
    }
}
