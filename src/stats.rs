//! Server statistics
//!
//! Monotonic per-verb counters plus the connection gauge and uptime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::protocol::CommandKind;

/// Snapshot of the command counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandCounters {
    pub total: u64,
    pub ping: u64,
    pub echo: u64,
    pub set: u64,
    pub get: u64,
    pub del: u64,
    pub exists: u64,
    pub keys: u64,
    pub flush: u64,
    pub save: u64,
    pub load: u64,
    pub info: u64,
    pub config: u64,
    pub select: u64,
    pub auth: u64,
    pub quit: u64,
}

/// Shared server statistics
pub struct ServerStats {
    started_at: Instant,
    connections: AtomicUsize,
    counters: Mutex<CommandCounters>,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections: AtomicUsize::new(0),
            counters: Mutex::new(CommandCounters::default()),
        }
    }

    /// Count a dispatched command. Unknown verbs still count toward total.
    pub fn record(&self, kind: Option<CommandKind>) {
        let mut counters = self.counters.lock();
        counters.total += 1;
        let slot = match kind {
            Some(CommandKind::Ping) => &mut counters.ping,
            Some(CommandKind::Echo) => &mut counters.echo,
            Some(CommandKind::Set) => &mut counters.set,
            Some(CommandKind::Get) => &mut counters.get,
            Some(CommandKind::Del) => &mut counters.del,
            Some(CommandKind::Exists) => &mut counters.exists,
            Some(CommandKind::Keys) => &mut counters.keys,
            Some(CommandKind::Flush) => &mut counters.flush,
            Some(CommandKind::Save) => &mut counters.save,
            Some(CommandKind::Load) => &mut counters.load,
            Some(CommandKind::Info) => &mut counters.info,
            Some(CommandKind::Config) => &mut counters.config,
            Some(CommandKind::Select) => &mut counters.select,
            Some(CommandKind::Auth) => &mut counters.auth,
            Some(CommandKind::Quit) => &mut counters.quit,
            None => return,
        };
        *slot += 1;
    }

    pub fn counters(&self) -> CommandCounters {
        *self.counters.lock()
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn current_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}
