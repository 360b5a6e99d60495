//! # TowerKV
//!
//! An in-memory key-value server speaking the RESP wire protocol, with:
//! - A probabilistic skiplist index over (integer key, string value)
//! - Append-only command logging (AOF) for crash recovery by replay
//! - Primary/follower replication with offsets, heartbeats, and lag
//!   accounting over a dedicated control port
//! - Periodic snapshot dumps of the index
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │           (accept loop + worker thread pool)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ RESP frames
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Engine                                 │
//! │        (verb table, handlers, single-writer section)         │
//! └───────┬──────────────────┬──────────────────┬───────────────┘
//!         │                  │                  │
//!         ▼                  ▼                  ▼
//!  ┌─────────────┐    ┌─────────────┐    ┌──────────────┐
//!  │  SkipList   │    │     AOF     │    │ Replication  │
//!  │   (index)   │    │  (append)   │    │  (streaming) │
//!  └─────────────┘    └─────────────┘    └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod aof;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod network;
pub mod protocol;
pub mod replication;
pub mod skiplist;
pub mod stats;
pub mod tasks;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use engine::{Engine, Session, Source};
pub use error::{Result, TowerError};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TowerKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
