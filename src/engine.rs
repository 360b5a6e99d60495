//! Engine Module
//!
//! The command dispatcher: validates requests against the verb table,
//! runs handlers against the skiplist index, and threads accepted
//! mutations through the AOF and the replication stream.
//!
//! ## Responsibilities
//! - Per-verb argument validation and integer key parsing
//! - Handler execution and reply construction
//! - AOF append + replication publish for accepted mutations, under a
//!   single writer lock so the three orders agree
//! - AOF replay and snapshot load on startup

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::aof::{Aof, FsyncPolicy};
use crate::config::Config;
use crate::error::Result;
use crate::protocol::{CommandFrame, CommandKind, Frame};
use crate::replication::{ReplicationManager, ReplicationSettings};
use crate::skiplist::{InsertOutcome, SkipList};
use crate::stats::ServerStats;

/// Where a command came from; controls durability and replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A client connection: AOF append and replication publish
    Client,

    /// AOF replay at startup: neither, or the log would double itself
    Replay,

    /// The replication stream on a follower: AOF only
    Replica,
}

/// Per-connection state
#[derive(Debug, Clone)]
pub struct Session {
    /// Whether AUTH has succeeded (starts true with no password set)
    pub authenticated: bool,

    /// Database selected via SELECT; recorded but without semantic effect
    pub db_index: i64,

    /// Set by QUIT; the connection should close after the reply
    pub should_close: bool,
}

impl Session {
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated,
            db_index: 0,
            should_close: false,
        }
    }

    /// Session for internal dispatch (replay, replication apply)
    fn internal() -> Self {
        Self::new(true)
    }
}

/// The core of the server: index, durability, replication, statistics
pub struct Engine {
    config: Config,
    index: SkipList,
    aof: Option<Aof>,
    stats: ServerStats,
    replication: RwLock<Option<Arc<ReplicationManager>>>,

    /// Serializes mutation + AOF append + replication publish so AOF
    /// order, replication order, and in-memory order agree
    write_lock: Mutex<()>,
}

impl Engine {
    /// Create the engine and rebuild state from disk.
    ///
    /// An AOF that fails to open demotes the server to non-persistent
    /// mode rather than aborting startup.
    pub fn open(config: Config) -> Arc<Self> {
        let index = SkipList::new(config.max_level);

        let aof = if config.enable_aof {
            let policy = config
                .aof_fsync
                .parse::<FsyncPolicy>()
                .unwrap_or(FsyncPolicy::EverySec);
            let interval = Duration::from_secs(config.aof_fsync_interval);
            match Aof::open(&config.aof_file, policy, interval) {
                Ok(aof) => Some(aof),
                Err(e) => {
                    tracing::error!(
                        "failed to open AOF {}: {}; persistence disabled",
                        config.aof_file.display(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        let engine = Arc::new(Self {
            config,
            index,
            aof,
            stats: ServerStats::new(),
            replication: RwLock::new(None),
            write_lock: Mutex::new(()),
        });

        if engine.aof.is_some() {
            engine.replay_aof();
        }
        engine.load_snapshot();

        engine
    }

    /// Wire up replication: the manager gets a dispatcher callback so a
    /// follower can apply streamed commands locally.
    pub fn init_replication(self: &Arc<Self>) -> Arc<ReplicationManager> {
        let manager = ReplicationManager::new(ReplicationSettings::from_config(&self.config));

        let weak = Arc::downgrade(self);
        manager.set_apply(Arc::new(move |command: &str| {
            if let Some(engine) = weak.upgrade() {
                engine.execute_line(command, Source::Replica);
            }
        }));

        *self.replication.write() = Some(Arc::clone(&manager));
        manager
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn index(&self) -> &SkipList {
        &self.index
    }

    pub fn replication(&self) -> Option<Arc<ReplicationManager>> {
        self.replication.read().clone()
    }

    /// Fresh session for a new client connection
    pub fn new_session(&self) -> Session {
        Session::new(self.config.requirepass.is_empty())
    }

    /// Dispatch one whitespace-separated command line (AOF replay and
    /// the replication stream). Blank lines yield `None`.
    pub fn execute_line(&self, line: &str, source: Source) -> Option<Frame> {
        let cmd = CommandFrame::parse_line(line)?;
        let mut session = Session::internal();
        Some(self.execute(cmd, &mut session, source))
    }

    /// Dispatch a command and produce its reply frame
    pub fn execute(&self, cmd: CommandFrame, session: &mut Session, source: Source) -> Frame {
        let kind = CommandKind::from_verb(&cmd.verb);
        self.stats.record(kind);

        let kind = match kind {
            Some(kind) => kind,
            None => return Frame::error("ERR unknown command"),
        };

        let (min, max) = kind.arity();
        if cmd.args.len() < min || max.map_or(false, |max| cmd.args.len() > max) {
            return Frame::error(format!(
                "ERR wrong number of arguments for '{}' command",
                kind.name()
            ));
        }

        if source == Source::Client
            && !session.authenticated
            && !matches!(kind, CommandKind::Auth | CommandKind::Ping | CommandKind::Quit)
        {
            return Frame::error("ERR authentication required");
        }

        if kind.is_mutation() {
            // One critical section per mutation: index change, AOF
            // append, and replication publish stay in the same order.
            let _guard = self.write_lock.lock();
            let (reply, accepted) = self.apply_mutation(kind, &cmd);
            if accepted {
                self.record_mutation(&cmd, source);
            }
            reply
        } else {
            self.execute_query(kind, &cmd, session)
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    fn apply_mutation(&self, kind: CommandKind, cmd: &CommandFrame) -> (Frame, bool) {
        match kind {
            CommandKind::Set => {
                let key = match parse_key(&cmd.args[0]) {
                    Ok(key) => key,
                    Err(reply) => return (reply, false),
                };
                match self.index.insert(key, cmd.args[1].clone()) {
                    InsertOutcome::Inserted => (Frame::ok(), true),
                    InsertOutcome::AlreadyExists => {
                        (Frame::error("ERR failed to set key"), false)
                    }
                }
            }
            CommandKind::Del => {
                let key = match parse_key(&cmd.args[0]) {
                    Ok(key) => key,
                    Err(reply) => return (reply, false),
                };
                // Deleting an absent key still replies :1 and is logged.
                self.index.remove(key);
                (Frame::Integer(1), true)
            }
            CommandKind::Flush => {
                self.index.clear();
                (Frame::ok(), true)
            }
            _ => (Frame::error("ERR unknown command"), false),
        }
    }

    /// Append the canonical command text to the AOF and hand it to
    /// replication, as the source allows
    fn record_mutation(&self, cmd: &CommandFrame, source: Source) {
        if source == Source::Replay {
            return;
        }

        let line = cmd.canonical_line();

        if let Some(aof) = &self.aof {
            if let Err(e) = aof.append(&line) {
                tracing::error!("AOF append failed: {}", e);
            }
        }

        if source == Source::Client {
            if let Some(replication) = self.replication.read().as_ref() {
                if replication.is_master() {
                    replication.publish(&line);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    fn execute_query(&self, kind: CommandKind, cmd: &CommandFrame, session: &mut Session) -> Frame {
        match kind {
            CommandKind::Ping => match cmd.args.first() {
                Some(message) => Frame::bulk(message),
                None => Frame::Simple("PONG".to_string()),
            },
            CommandKind::Echo => Frame::bulk(&cmd.args[0]),
            CommandKind::Get => {
                let key = match parse_key(&cmd.args[0]) {
                    Ok(key) => key,
                    Err(reply) => return reply,
                };
                match self.index.get(key) {
                    Some(value) => Frame::bulk(&value),
                    None => Frame::Null,
                }
            }
            CommandKind::Exists => {
                let key = match parse_key(&cmd.args[0]) {
                    Ok(key) => key,
                    Err(reply) => return reply,
                };
                Frame::Integer(self.index.contains(key) as i64)
            }
            CommandKind::Keys => Frame::Array(Vec::new()),
            CommandKind::Save => match self.save_snapshot() {
                Ok(_) => Frame::ok(),
                Err(e) => {
                    tracing::error!("snapshot dump failed: {}", e);
                    Frame::error("ERR failed to save")
                }
            },
            CommandKind::Load => {
                self.load_snapshot();
                Frame::ok()
            }
            CommandKind::Info => Frame::bulk(&self.info_block()),
            CommandKind::Config => {
                if cmd.args[0] == "GET" {
                    Frame::bulk(&self.config.describe())
                } else {
                    Frame::error("ERR unknown subcommand")
                }
            }
            CommandKind::Select => {
                let db = match cmd.args[0].parse::<i64>() {
                    Ok(db) => db,
                    Err(_) => return Frame::error("ERR invalid DB index"),
                };
                if !(0..=15).contains(&db) {
                    return Frame::error("ERR DB index is out of range");
                }
                session.db_index = db;
                Frame::ok()
            }
            CommandKind::Auth => {
                if self.config.requirepass.is_empty() || cmd.args[0] == self.config.requirepass {
                    session.authenticated = true;
                    Frame::ok()
                } else {
                    Frame::error("ERR invalid password")
                }
            }
            CommandKind::Quit => {
                session.should_close = true;
                Frame::ok()
            }
            _ => Frame::error("ERR unknown command"),
        }
    }

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------

    /// Replay the AOF through the dispatcher with replication and
    /// re-appending suppressed
    fn replay_aof(&self) {
        let path = self.config.aof_file.clone();
        if !path.exists() {
            return;
        }
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::error!("failed to read AOF {}: {}", path.display(), e);
                return;
            }
        };

        let mut replayed = 0u64;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match self.execute_line(line, Source::Replay) {
                Some(Frame::Error(message)) => {
                    tracing::warn!("skipping AOF record {:?}: {}", line, message);
                }
                Some(_) => replayed += 1,
                None => tracing::warn!("skipping malformed AOF record {:?}", line),
            }
        }
        tracing::info!(replayed, "AOF replay complete");
    }

    /// Dump the index to the configured snapshot file
    pub fn save_snapshot(&self) -> Result<usize> {
        let count = self.index.dump_to(&self.config.data_file)?;
        tracing::info!(entries = count, "snapshot saved");
        Ok(count)
    }

    /// Load the snapshot file if present; parse failures skip lines
    pub fn load_snapshot(&self) {
        let path = &self.config.data_file;
        if !path.exists() {
            return;
        }
        match self.index.load_from(path) {
            Ok(count) => tracing::info!(entries = count, "snapshot loaded"),
            Err(e) => tracing::error!("failed to load snapshot {}: {}", path.display(), e),
        }
    }

    /// Force any buffered AOF records to disk
    pub fn flush_aof(&self) {
        if let Some(aof) = &self.aof {
            if let Err(e) = aof.flush() {
                tracing::error!("AOF flush failed: {}", e);
            }
        }
    }

    /// Close and re-open the AOF after out-of-band rotation
    pub fn reopen_aof(&self) -> Result<()> {
        if let Some(aof) = &self.aof {
            aof.reopen()?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// The INFO reply body
    fn info_block(&self) -> String {
        let counters = self.stats.counters();
        let mut out = String::new();

        out.push_str("# Server\n");
        out.push_str(&format!("towerkv_version:{}\n", crate::VERSION));
        out.push_str(&format!("process_id:{}\n", std::process::id()));
        out.push_str(&format!("tcp_port:{}\n", self.config.port));
        out.push_str(&format!("uptime_in_seconds:{}\n", self.stats.uptime_seconds()));
        out.push_str(&format!(
            "connected_clients:{}\n",
            self.stats.current_connections()
        ));
        out.push_str(&format!("db_keys:{}\n", self.index.len()));

        out.push_str("# Stats\n");
        out.push_str(&format!("total_commands_processed:{}\n", counters.total));
        out.push_str(&format!("cmd_ping:{}\n", counters.ping));
        out.push_str(&format!("cmd_echo:{}\n", counters.echo));
        out.push_str(&format!("cmd_set:{}\n", counters.set));
        out.push_str(&format!("cmd_get:{}\n", counters.get));
        out.push_str(&format!("cmd_del:{}\n", counters.del));
        out.push_str(&format!("cmd_exists:{}\n", counters.exists));
        out.push_str(&format!("cmd_flush:{}\n", counters.flush));
        out.push_str(&format!("cmd_save:{}\n", counters.save));
        out.push_str(&format!("cmd_load:{}\n", counters.load));

        out.push_str("# Replication\n");
        match self.replication.read().as_ref() {
            Some(replication) => {
                let stats = replication.stats();
                out.push_str(&format!("role:{}\n", replication.role()));
                out.push_str(&format!("replication_offset:{}\n", replication.offset()));
                out.push_str(&format!("link_state:{}\n", replication.link_state()));
                out.push_str(&format!(
                    "connected_followers:{}\n",
                    stats.connected_followers
                ));
                out.push_str(&format!(
                    "commands_replicated:{}\n",
                    stats.commands_replicated
                ));
                out.push_str(&format!("bytes_replicated:{}\n", stats.bytes_replicated));
                out.push_str(&format!("average_lag:{}\n", stats.average_lag));
            }
            None => out.push_str("role:unknown\n"),
        }

        out
    }
}

/// Keys are signed integers in display form
fn parse_key(arg: &str) -> std::result::Result<i64, Frame> {
    arg.parse::<i64>()
        .map_err(|_| Frame::error("ERR key must be an integer"))
}
