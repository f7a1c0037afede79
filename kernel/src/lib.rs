// Feedstore Kernel
//
// Single-writer, append-only oracle feed with lookups by insertion
// index and by result date.

pub mod config;
pub mod env;
pub mod feed;
pub mod invariants;
pub mod notify;
pub mod oracle;
pub mod replay;
