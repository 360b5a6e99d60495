//! Replication Module
//!
//! Primary/follower command streaming over a dedicated control port.
//!
//! ## Architecture
//! - The primary runs a listener on the replication port; each follower
//!   connection gets its own handler thread and a shared write handle so
//!   handshake replies, streamed commands, and heartbeats interleave
//!   safely on the single ordered stream.
//! - Every accepted mutation gets the next offset, is retained in a
//!   bounded log, and is pushed to all online followers. Local writes
//!   never wait for acknowledgments.
//! - A follower runs a state machine: Connecting -> Connected -> Syncing
//!   -> Online, applying streamed commands through the local dispatcher
//!   with replication suppressed, acknowledging each one.
//!
//! ## Wire protocol (line-oriented text)
//! ```text
//! follower -> primary   SLAVE_CONNECT:<offset> | SYNC_REQUEST:<offset>
//!                       | COMMAND_ACK:<offset> | PING | PONG
//! primary  -> follower  MASTER:OK:<offset> | SYNC:OK:0 | SYNC:START:<n>
//!                       | OK | PING | PONG | CMD:<offset>:<command>
//! ```

mod follower;
mod log;
mod primary;

pub use log::{LogEntry, ReplicationLog};

use std::fmt;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{Result, TowerError};

/// Delay between follower reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Node role, fixed at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
    Unknown,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
            Role::Unknown => write!(f, "unknown"),
        }
    }
}

/// Replication link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Syncing,
    Online,
    Disconnected,
    Error,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Syncing => "syncing",
            LinkState::Online => "online",
            LinkState::Disconnected => "disconnected",
            LinkState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Public view of a registered follower
#[derive(Debug, Clone)]
pub struct ReplicaInfo {
    /// Unique identity, `host:port`
    pub id: String,
    pub host: String,
    pub port: u16,
    pub state: LinkState,
    pub last_heartbeat: Instant,
    /// Highest offset the follower has acknowledged
    pub ack_offset: u64,
    pub online: bool,
}

impl ReplicaInfo {
    fn new(host: String, port: u16) -> Self {
        let id = format!("{}:{}", host, port);
        Self {
            id,
            host,
            port,
            state: LinkState::Connecting,
            last_heartbeat: Instant::now(),
            ack_offset: 0,
            online: false,
        }
    }
}

/// A registered follower plus its write handle
struct Replica {
    info: ReplicaInfo,
    writer: Option<Arc<Mutex<TcpStream>>>,
}

/// Replication counters
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicationStats {
    pub commands_replicated: u64,
    pub bytes_replicated: u64,
    pub connected_followers: usize,
    pub average_lag: u64,
}

/// Callback applying a replicated command through the local dispatcher
pub type ApplyFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Replication knobs, extracted from the server config
#[derive(Debug, Clone)]
pub struct ReplicationSettings {
    /// Port the primary's control listener binds to
    pub listen_port: u16,

    /// Heartbeat period
    pub ping_interval: Duration,

    /// Connect/sync timeout
    pub sync_timeout: Duration,

    /// Bound on the in-memory replication log
    pub max_log_entries: usize,

    /// Master address; present means follower role
    pub master_addr: Option<(String, u16)>,
}

impl ReplicationSettings {
    pub fn from_config(config: &Config) -> Self {
        let master_addr = if config.is_replica() {
            Some((config.master_host.clone(), config.master_port))
        } else {
            None
        };
        Self {
            listen_port: config.replication_port,
            ping_interval: Duration::from_millis(config.ping_interval_ms),
            sync_timeout: Duration::from_millis(config.sync_timeout_ms),
            max_log_entries: config.max_replication_log,
            master_addr,
        }
    }
}

/// Coordinates both sides of replication for this node
pub struct ReplicationManager {
    role: Role,
    settings: ReplicationSettings,
    running: Arc<AtomicBool>,

    /// Primary: last assigned offset. Follower: local applied offset.
    offset: AtomicU64,

    log: Mutex<ReplicationLog>,
    replicas: Mutex<Vec<Replica>>,

    /// Follower-side link state; Online on a running primary
    link_state: Mutex<LinkState>,

    apply: RwLock<Option<ApplyFn>>,
    stats: Mutex<ReplicationStats>,
    threads: Mutex<Vec<JoinHandle<()>>>,

    /// Actual bound address of the primary listener
    listen_addr: Mutex<Option<SocketAddr>>,
}

impl ReplicationManager {
    /// Create a manager; role follows from the presence of a master address
    pub fn new(settings: ReplicationSettings) -> Arc<Self> {
        let role = if settings.master_addr.is_some() {
            Role::Slave
        } else {
            Role::Master
        };
        tracing::info!(role = %role, "replication manager initialized");

        let max_log = settings.max_log_entries;
        Arc::new(Self {
            role,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            offset: AtomicU64::new(0),
            log: Mutex::new(ReplicationLog::new(max_log)),
            replicas: Mutex::new(Vec::new()),
            link_state: Mutex::new(LinkState::Disconnected),
            apply: RwLock::new(None),
            stats: Mutex::new(ReplicationStats::default()),
            threads: Mutex::new(Vec::new()),
            listen_addr: Mutex::new(None),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn is_slave(&self) -> bool {
        self.role == Role::Slave
    }

    /// Install the dispatcher callback used to apply replicated commands
    pub fn set_apply(&self, apply: ApplyFn) {
        *self.apply.write() = Some(apply);
    }

    /// Start the role-appropriate threads.
    ///
    /// On a primary a bind failure is returned to the caller; startup
    /// should treat it as fatal.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut threads = self.threads.lock();
        match self.role {
            Role::Master => {
                threads.extend(primary::spawn(self)?);
                *self.link_state.lock() = LinkState::Online;
                tracing::info!(
                    port = self.listen_addr().map(|a| a.port()).unwrap_or(0),
                    "primary replication started"
                );
            }
            Role::Slave => {
                *self.link_state.lock() = LinkState::Connecting;
                threads.push(follower::spawn(Arc::clone(self))?);
                tracing::info!("follower replication started, connecting to master");
            }
            Role::Unknown => {
                return Err(TowerError::Replication(
                    "cannot start replication with unknown role".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Signal all threads to stop and join them
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        *self.link_state.lock() = LinkState::Disconnected;
        tracing::info!("replication stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current offset: last assigned (primary) or last applied (follower)
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn link_state(&self) -> LinkState {
        *self.link_state.lock()
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        *self.listen_addr.lock()
    }

    pub fn followers(&self) -> Vec<ReplicaInfo> {
        self.replicas.lock().iter().map(|r| r.info.clone()).collect()
    }

    pub fn stats(&self) -> ReplicationStats {
        *self.stats.lock()
    }

    /// Record an accepted local mutation and stream it to online followers.
    ///
    /// Primary only; never blocks on follower acknowledgment.
    pub fn publish(&self, command: &str) {
        if !self.is_master() {
            return;
        }

        let offset = self.log.lock().append(command);
        self.offset.store(offset, Ordering::SeqCst);

        let line = format!("CMD:{}:{}\n", offset, command);
        let mut delivered = 0usize;
        {
            let mut replicas = self.replicas.lock();
            for replica in replicas.iter_mut() {
                if !replica.info.online {
                    continue;
                }
                if let Some(writer) = &replica.writer {
                    if let Err(e) = writer.lock().write_all(line.as_bytes()) {
                        tracing::warn!(
                            follower = %replica.info.id,
                            "failed to stream command: {}", e
                        );
                        replica.info.online = false;
                        replica.info.state = LinkState::Error;
                    } else {
                        delivered += 1;
                    }
                }
            }
        }

        let mut stats = self.stats.lock();
        stats.commands_replicated += 1;
        stats.bytes_replicated += command.len() as u64;
        tracing::debug!(offset, delivered, "mutation replicated");
    }

    // -------------------------------------------------------------------------
    // Follower bookkeeping (primary side)
    // -------------------------------------------------------------------------

    /// Register or update a follower; re-registration under the same
    /// identity replaces the write handle and refreshes the descriptor.
    fn register_follower(
        &self,
        host: String,
        port: u16,
        ack_offset: u64,
        writer: Arc<Mutex<TcpStream>>,
    ) -> String {
        let mut replicas = self.replicas.lock();
        let id = format!("{}:{}", host, port);
        if let Some(existing) = replicas.iter_mut().find(|r| r.info.id == id) {
            existing.info.state = LinkState::Connected;
            existing.info.online = true;
            existing.info.last_heartbeat = Instant::now();
            existing.info.ack_offset = ack_offset;
            existing.writer = Some(writer);
            tracing::info!(follower = %id, "follower re-registered");
        } else {
            let mut info = ReplicaInfo::new(host, port);
            info.state = LinkState::Connected;
            info.online = true;
            info.ack_offset = ack_offset;
            replicas.push(Replica {
                info,
                writer: Some(writer),
            });
            tracing::info!(follower = %id, "follower registered");
        }
        id
    }

    /// Refresh a follower's heartbeat
    fn touch_follower(&self, id: &str) {
        let mut replicas = self.replicas.lock();
        if let Some(replica) = replicas.iter_mut().find(|r| r.info.id == id) {
            replica.info.last_heartbeat = Instant::now();
            replica.info.online = true;
        }
    }

    /// Update a follower's acknowledged offset (non-decreasing)
    fn ack_follower(&self, id: &str, offset: u64) {
        let mut replicas = self.replicas.lock();
        if let Some(replica) = replicas.iter_mut().find(|r| r.info.id == id) {
            if offset > replica.info.ack_offset {
                replica.info.ack_offset = offset;
            }
            replica.info.last_heartbeat = Instant::now();
        }
    }

    /// Transition a follower's link state
    fn set_follower_state(&self, id: &str, state: LinkState, online: bool) {
        let mut replicas = self.replicas.lock();
        if let Some(replica) = replicas.iter_mut().find(|r| r.info.id == id) {
            replica.info.state = state;
            replica.info.online = online;
        }
    }

    /// Apply a replicated command on a follower and advance the local
    /// offset by exactly one
    fn apply_replicated(&self, command: &str) -> u64 {
        if let Some(apply) = self.apply.read().clone() {
            apply(command);
        } else {
            tracing::warn!("no apply callback installed, dropping replicated command");
        }
        self.offset.fetch_add(1, Ordering::SeqCst) + 1
    }
}
