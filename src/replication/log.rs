//! Bounded replication log
//!
//! The primary retains the most recent mutations so a reconnecting
//! follower can catch up without a full resync. Offsets are assigned
//! here: exactly one per accepted mutation, strictly increasing.

use std::collections::VecDeque;
use std::time::Instant;

/// One retained mutation
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Position in the primary's mutation stream
    pub offset: u64,

    /// Canonical command text
    pub command: String,

    /// When the entry was created
    pub created_at: Instant,
}

/// FIFO of recent mutations, evicting oldest past the capacity bound
pub struct ReplicationLog {
    entries: VecDeque<LogEntry>,
    last_offset: u64,
    capacity: usize,
}

impl ReplicationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            last_offset: 0,
            capacity,
        }
    }

    /// Assign the next offset to `command` and retain it
    pub fn append(&mut self, command: &str) -> u64 {
        self.last_offset += 1;
        self.entries.push_back(LogEntry {
            offset: self.last_offset,
            command: command.to_string(),
            created_at: Instant::now(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.last_offset
    }

    /// Most recently assigned offset; 0 before any mutation
    pub fn last_offset(&self) -> u64 {
        self.last_offset
    }

    /// Oldest offset still retained
    pub fn oldest_offset(&self) -> Option<u64> {
        self.entries.front().map(|e| e.offset)
    }

    /// Entries with offset strictly greater than `offset`, oldest first
    pub fn entries_since(&self, offset: u64) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.offset > offset)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
