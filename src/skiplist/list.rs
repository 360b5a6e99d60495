//! Skiplist implementation
//!
//! Arena-backed: nodes are stored in a `Vec` and linked by slot index.
//! Slot 0 is the head sentinel, which spans every level and never holds
//! an entry. Freed slots are recycled through a free list.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use rand::Rng;

use super::node::Node;
use crate::error::Result;

/// Default skiplist level cap
pub const DEFAULT_MAX_LEVEL: usize = 18;

/// Key/value delimiter in the snapshot format
const DELIMITER: char = ':';

/// Outcome of an insert attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The key was not present; the entry was added
    Inserted,

    /// The key was already present; the existing value is kept
    AlreadyExists,
}

/// Concurrent ordered index over (i64, String) entries
pub struct SkipList {
    inner: Mutex<Inner>,
}

struct Inner {
    /// Node arena; slot 0 is the head sentinel
    arena: Vec<Node>,

    /// Recycled arena slots
    free: Vec<usize>,

    /// Level cap for any node
    max_level: usize,

    /// Highest level currently populated
    current_level: usize,

    /// Number of live entries
    len: usize,
}

impl SkipList {
    /// Create an empty skiplist with the given level cap
    pub fn new(max_level: usize) -> Self {
        let head = Node::new(i64::MIN, String::new(), max_level);
        Self {
            inner: Mutex::new(Inner {
                arena: vec![head],
                free: Vec::new(),
                max_level,
                current_level: 0,
                len: 0,
            }),
        }
    }

    /// Insert an entry, refusing to overwrite an existing key
    pub fn insert(&self, key: i64, value: String) -> InsertOutcome {
        let mut inner = self.inner.lock();
        inner.insert(key, value)
    }

    /// Whether the key is present
    pub fn contains(&self, key: i64) -> bool {
        let inner = self.inner.lock();
        inner.find(key).is_some()
    }

    /// Value stored for the key, if any
    pub fn get(&self, key: i64) -> Option<String> {
        let inner = self.inner.lock();
        inner.find(key).map(|idx| inner.arena[idx].value.clone())
    }

    /// Remove a key; returns whether an entry was unlinked
    pub fn remove(&self, key: i64) -> bool {
        let mut inner = self.inner.lock();
        inner.remove(key)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset to the empty state
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let max_level = inner.max_level;
        inner.arena.clear();
        inner.arena.push(Node::new(i64::MIN, String::new(), max_level));
        inner.free.clear();
        inner.current_level = 0;
        inner.len = 0;
    }

    /// Level-0 snapshot of all entries, ascending by key
    pub fn entries(&self) -> Vec<(i64, String)> {
        let inner = self.inner.lock();
        let mut out = Vec::with_capacity(inner.len);
        let mut cursor = inner.arena[0].forward[0];
        while let Some(idx) = cursor {
            let node = &inner.arena[idx];
            out.push((node.key, node.value.clone()));
            cursor = node.forward[0];
        }
        out
    }

    /// Write every entry to `path` as `key:value;` lines
    pub fn dump_to(&self, path: &Path) -> Result<usize> {
        let entries = self.entries();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        for (key, value) in &entries {
            writeln!(writer, "{}{}{};", key, DELIMITER, value)?;
        }
        writer.flush()?;
        Ok(entries.len())
    }

    /// Read `key:value;` lines from `path` and insert each pair.
    ///
    /// Blank and malformed lines are skipped with a warning; duplicate
    /// keys are refused silently. Returns the number of entries inserted.
    pub fn load_from(&self, path: &Path) -> Result<usize> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut loaded = 0;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_entry_line(&line) {
                Some((key, value)) => {
                    if self.insert(key, value) == InsertOutcome::Inserted {
                        loaded += 1;
                    }
                }
                None => {
                    tracing::warn!("skipping malformed snapshot line: {:?}", line);
                }
            }
        }
        Ok(loaded)
    }
}

impl Inner {
    /// Level-0 slot of the node with `key`, if present
    fn find(&self, key: i64) -> Option<usize> {
        let mut cursor = 0;
        for level in (0..=self.current_level).rev() {
            while let Some(next) = self.arena[cursor].forward[level] {
                if self.arena[next].key < key {
                    cursor = next;
                } else {
                    break;
                }
            }
        }
        match self.arena[cursor].forward[0] {
            Some(next) if self.arena[next].key == key => Some(next),
            _ => None,
        }
    }

    /// Rightmost predecessor of `key` at every level `0..=max_level`
    fn predecessors(&self, key: i64) -> Vec<usize> {
        let mut update = vec![0; self.max_level + 1];
        let mut cursor = 0;
        for level in (0..=self.current_level).rev() {
            while let Some(next) = self.arena[cursor].forward[level] {
                if self.arena[next].key < key {
                    cursor = next;
                } else {
                    break;
                }
            }
            update[level] = cursor;
        }
        update
    }

    fn insert(&mut self, key: i64, value: String) -> InsertOutcome {
        let update = self.predecessors(key);

        if let Some(next) = self.arena[update[0]].forward[0] {
            if self.arena[next].key == key {
                return InsertOutcome::AlreadyExists;
            }
        }

        let level = self.random_level();
        if level > self.current_level {
            // Levels above the old top have the head as predecessor.
            self.current_level = level;
        }

        let idx = self.alloc(Node::new(key, value, level));
        for lvl in 0..=level {
            let pred = update[lvl];
            self.arena[idx].forward[lvl] = self.arena[pred].forward[lvl];
            self.arena[pred].forward[lvl] = Some(idx);
        }

        self.len += 1;
        InsertOutcome::Inserted
    }

    fn remove(&mut self, key: i64) -> bool {
        let update = self.predecessors(key);

        let target = match self.arena[update[0]].forward[0] {
            Some(next) if self.arena[next].key == key => next,
            _ => return false,
        };

        for lvl in 0..=self.arena[target].level() {
            let pred = update[lvl];
            if self.arena[pred].forward[lvl] != Some(target) {
                break;
            }
            self.arena[pred].forward[lvl] = self.arena[target].forward[lvl];
        }

        while self.current_level > 0 && self.arena[0].forward[self.current_level].is_none() {
            self.current_level -= 1;
        }

        self.release(target);
        self.len -= 1;
        true
    }

    /// Draw a level by fair coin flips: geometric, capped at `max_level`
    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 0;
        while level < self.max_level && rng.gen_bool(0.5) {
            level += 1;
        }
        level
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = node;
                idx
            }
            None => {
                self.arena.push(node);
                self.arena.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        // Leave a stub in the slot; the free list keeps it out of traversals.
        self.arena[idx] = Node::new(0, String::new(), 0);
        self.free.push(idx);
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEVEL)
    }
}

/// Split a snapshot line at the first `:`, stripping one trailing `;`
fn parse_entry_line(line: &str) -> Option<(i64, String)> {
    let (key, value) = line.split_once(DELIMITER)?;
    let key = key.trim().parse::<i64>().ok()?;
    let value = value.strip_suffix(';').unwrap_or(value);
    Some((key, value.to_string()))
}
