//! Tests for replication
//!
//! These tests verify:
//! - Offset assignment and the bounded log
//! - Role selection from settings
//! - Live primary/follower convergence over TCP, including backlog
//!   catch-up and follower removal after silence

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use towerkv::protocol::Frame;
use towerkv::replication::{LinkState, ReplicationLog, ReplicationManager, ReplicationSettings, Role};
use towerkv::{Config, Engine, Source};

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.data_file = dir.path().join("dumpFile");
    config.aof_file = dir.path().join("appendonly.aof");
    config.log_file = dir.path().join("towerkv.log");
    config.enable_persistence = false;
    // Ephemeral control port; fast heartbeats keep the tests quick.
    config.replication_port = 0;
    config.ping_interval_ms = 100;
    config.sync_timeout_ms = 2000;
    config
}

fn follower_config(dir: &TempDir, master_port: u16) -> Config {
    let mut config = test_config(dir);
    config.master_host = "127.0.0.1".to_string();
    config.master_port = master_port;
    config
}

fn wait_for(what: &str, timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("timed out waiting for {}", what);
}

// =============================================================================
// Replication Log
// =============================================================================

#[test]
fn test_log_offsets_strictly_increase() {
    let mut log = ReplicationLog::new(100);

    assert_eq!(log.last_offset(), 0);
    assert_eq!(log.append("SET 1 a"), 1);
    assert_eq!(log.append("SET 2 b"), 2);
    assert_eq!(log.append("DEL 1"), 3);
    assert_eq!(log.last_offset(), 3);
}

#[test]
fn test_log_evicts_oldest_past_capacity() {
    let mut log = ReplicationLog::new(3);

    for i in 1..=5 {
        log.append(&format!("SET {} v", i));
    }

    assert_eq!(log.len(), 3);
    assert_eq!(log.oldest_offset(), Some(3));
    // Offsets keep increasing past evictions.
    assert_eq!(log.last_offset(), 5);
}

#[test]
fn test_log_entries_since() {
    let mut log = ReplicationLog::new(100);
    log.append("SET 1 a");
    log.append("SET 2 b");
    log.append("SET 3 c");

    let missing = log.entries_since(1);
    assert_eq!(missing.len(), 2);
    assert_eq!(missing[0].offset, 2);
    assert_eq!(missing[0].command, "SET 2 b");
    assert_eq!(missing[1].offset, 3);

    assert!(log.entries_since(3).is_empty());
}

// =============================================================================
// Roles
// =============================================================================

#[test]
fn test_role_follows_master_address() {
    let temp_dir = TempDir::new().unwrap();

    let primary = ReplicationManager::new(ReplicationSettings::from_config(&test_config(&temp_dir)));
    assert_eq!(primary.role(), Role::Master);
    assert!(primary.is_master());

    let follower = ReplicationManager::new(ReplicationSettings::from_config(&follower_config(
        &temp_dir, 16379,
    )));
    assert_eq!(follower.role(), Role::Slave);
    assert!(follower.is_slave());
}

#[test]
fn test_publish_is_master_only() {
    let temp_dir = TempDir::new().unwrap();
    let follower = ReplicationManager::new(ReplicationSettings::from_config(&follower_config(
        &temp_dir, 16379,
    )));

    follower.publish("SET 1 a");
    assert_eq!(follower.offset(), 0);
    assert_eq!(follower.stats().commands_replicated, 0);
}

#[test]
fn test_publish_advances_offset_and_stats() {
    let temp_dir = TempDir::new().unwrap();
    let primary = ReplicationManager::new(ReplicationSettings::from_config(&test_config(&temp_dir)));

    primary.publish("SET 1 a");
    primary.publish("DEL 1");

    assert_eq!(primary.offset(), 2);
    let stats = primary.stats();
    assert_eq!(stats.commands_replicated, 2);
    assert_eq!(stats.bytes_replicated, ("SET 1 a".len() + "DEL 1".len()) as u64);
}

// =============================================================================
// End-to-End Streaming
// =============================================================================

struct Node {
    _dir: TempDir,
    engine: Arc<Engine>,
    replication: Arc<ReplicationManager>,
}

fn start_primary() -> Node {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&dir));
    let replication = engine.init_replication();
    replication.start().unwrap();
    Node {
        _dir: dir,
        engine,
        replication,
    }
}

fn start_follower(master_port: u16) -> Node {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(follower_config(&dir, master_port));
    let replication = engine.init_replication();
    replication.start().unwrap();
    Node {
        _dir: dir,
        engine,
        replication,
    }
}

#[test]
fn test_two_followers_converge() {
    let primary = start_primary();
    let port = primary.replication.listen_addr().unwrap().port();

    let follower_a = start_follower(port);
    let follower_b = start_follower(port);

    wait_for("followers online", Duration::from_secs(5), || {
        follower_a.replication.link_state() == LinkState::Online
            && follower_b.replication.link_state() == LinkState::Online
    });

    primary
        .engine
        .execute_line("SET 1 x", Source::Client)
        .unwrap();
    primary
        .engine
        .execute_line("SET 2 y", Source::Client)
        .unwrap();
    primary
        .engine
        .execute_line("DEL 1", Source::Client)
        .unwrap();
    assert_eq!(primary.replication.offset(), 3);

    wait_for("followers applied offset 3", Duration::from_secs(5), || {
        follower_a.replication.offset() == 3 && follower_b.replication.offset() == 3
    });
    wait_for("acks reached the primary", Duration::from_secs(5), || {
        let followers = primary.replication.followers();
        followers.len() == 2 && followers.iter().all(|f| f.ack_offset == 3)
    });

    for follower in [&follower_a, &follower_b] {
        assert_eq!(
            follower.engine.execute_line("EXISTS 1", Source::Client).unwrap(),
            Frame::Integer(0)
        );
        assert_eq!(
            follower.engine.execute_line("GET 2", Source::Client).unwrap(),
            Frame::bulk("y")
        );
        assert_eq!(follower.engine.index().len(), 1);
    }

    follower_a.replication.stop();
    follower_b.replication.stop();
    primary.replication.stop();
}

#[test]
fn test_follower_catches_up_from_backlog() {
    let primary = start_primary();
    let port = primary.replication.listen_addr().unwrap().port();

    // Mutations land before any follower exists.
    primary
        .engine
        .execute_line("SET 10 a", Source::Client)
        .unwrap();
    primary
        .engine
        .execute_line("SET 20 b", Source::Client)
        .unwrap();
    primary
        .engine
        .execute_line("DEL 10", Source::Client)
        .unwrap();

    let follower = start_follower(port);

    wait_for("follower synced the backlog", Duration::from_secs(5), || {
        follower.replication.offset() == 3
    });

    assert_eq!(
        follower.engine.execute_line("EXISTS 10", Source::Client).unwrap(),
        Frame::Integer(0)
    );
    assert_eq!(
        follower.engine.execute_line("GET 20", Source::Client).unwrap(),
        Frame::bulk("b")
    );

    follower.replication.stop();
    primary.replication.stop();
}

#[test]
fn test_silent_follower_is_removed() {
    let primary = start_primary();
    let port = primary.replication.listen_addr().unwrap().port();

    let follower = start_follower(port);
    wait_for("follower registered", Duration::from_secs(5), || {
        !primary.replication.followers().is_empty()
    });

    // The stopped follower closes its connection and goes silent; the
    // heartbeat task prunes it after 3x the ping interval.
    follower.replication.stop();
    wait_for("follower removed", Duration::from_secs(5), || {
        primary.replication.followers().is_empty()
    });

    primary.replication.stop();
}

#[test]
fn test_follower_never_rereplicates() {
    let primary = start_primary();
    let port = primary.replication.listen_addr().unwrap().port();

    let follower = start_follower(port);
    wait_for("follower online", Duration::from_secs(5), || {
        follower.replication.link_state() == LinkState::Online
    });

    primary
        .engine
        .execute_line("SET 1 x", Source::Client)
        .unwrap();
    wait_for("follower applied", Duration::from_secs(5), || {
        follower.replication.offset() == 1
    });

    // Applying on the follower must not feed its own publish path.
    assert_eq!(follower.replication.stats().commands_replicated, 0);

    follower.replication.stop();
    primary.replication.stop();
}
