//! Skiplist Module
//!
//! The ordered in-memory index: a probabilistic multi-level linked list
//! with expected O(log n) search, insert, and delete.
//!
//! ## Responsibilities
//! - Ordered storage of (i64 key, string value) entries
//! - Point lookup, insert-or-refuse, delete, ordered traversal
//! - Snapshot dump/load in `key:value;` line format
//!
//! ## Concurrency
//! All operations go through a single index-wide mutex. Snapshot I/O
//! copies the entries out first so the lock is never held across file
//! writes.

mod list;
mod node;

pub use list::{InsertOutcome, SkipList, DEFAULT_MAX_LEVEL};
