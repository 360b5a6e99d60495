//! Tests for the append-only file
//!
//! These tests verify:
//! - Record format (one command line per append)
//! - Fsync policies
//! - Reopen after rotation
//! - Replay through the engine on startup

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use towerkv::aof::{Aof, FsyncPolicy};
use towerkv::protocol::Frame;
use towerkv::{Config, Engine, Source};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_aof() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("appendonly.aof");
    (temp_dir, path)
}

fn aof_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.data_file = dir.path().join("dumpFile");
    config.aof_file = dir.path().join("appendonly.aof");
    config.log_file = dir.path().join("towerkv.log");
    config.enable_persistence = false;
    config.enable_aof = true;
    config.aof_fsync = "always".to_string();
    config
}

// =============================================================================
// Record Format
// =============================================================================

#[test]
fn test_append_writes_one_line_per_record() {
    let (_temp, path) = setup_temp_aof();

    let aof = Aof::open(&path, FsyncPolicy::Always, Duration::from_secs(1)).unwrap();
    aof.append("SET 42 hello").unwrap();
    aof.append("DEL 42").unwrap();
    aof.append("FLUSH").unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "SET 42 hello\nDEL 42\nFLUSH\n");
}

#[test]
fn test_append_preserves_existing_records() {
    let (_temp, path) = setup_temp_aof();

    {
        let aof = Aof::open(&path, FsyncPolicy::Always, Duration::from_secs(1)).unwrap();
        aof.append("SET 1 a").unwrap();
    }
    {
        // A reopened log appends, never truncates.
        let aof = Aof::open(&path, FsyncPolicy::Always, Duration::from_secs(1)).unwrap();
        aof.append("SET 2 b").unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "SET 1 a\nSET 2 b\n");
}

// =============================================================================
// Fsync Policies
// =============================================================================

#[test]
fn test_always_policy_is_on_disk_after_append() {
    let (_temp, path) = setup_temp_aof();

    let aof = Aof::open(&path, FsyncPolicy::Always, Duration::from_secs(1)).unwrap();
    aof.append("SET 5 v").unwrap();

    // No flush call: the record must already be visible.
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "SET 5 v\n");
}

#[test]
fn test_no_policy_flushes_on_demand() {
    let (_temp, path) = setup_temp_aof();

    let aof = Aof::open(&path, FsyncPolicy::No, Duration::from_secs(1)).unwrap();
    aof.append("SET 1 a").unwrap();
    aof.flush().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "SET 1 a\n");
}

#[test]
fn test_everysec_policy_flushes_after_interval() {
    let (_temp, path) = setup_temp_aof();

    let aof = Aof::open(&path, FsyncPolicy::EverySec, Duration::from_millis(50)).unwrap();
    aof.append("SET 1 a").unwrap();
    std::thread::sleep(Duration::from_millis(80));
    // The interval has elapsed, so this append syncs both records.
    aof.append("SET 2 b").unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "SET 1 a\nSET 2 b\n");
}

#[test]
fn test_policy_parsing() {
    assert_eq!("always".parse::<FsyncPolicy>().unwrap(), FsyncPolicy::Always);
    assert_eq!(
        "EVERYSEC".parse::<FsyncPolicy>().unwrap(),
        FsyncPolicy::EverySec
    );
    assert_eq!("no".parse::<FsyncPolicy>().unwrap(), FsyncPolicy::No);
    assert!("sometimes".parse::<FsyncPolicy>().is_err());
}

// =============================================================================
// Reopen
// =============================================================================

#[test]
fn test_reopen_continues_appending() {
    let (_temp, path) = setup_temp_aof();

    let aof = Aof::open(&path, FsyncPolicy::Always, Duration::from_secs(1)).unwrap();
    aof.append("SET 1 a").unwrap();

    // Out-of-band rotation: move the file away, then reopen.
    let rotated = path.with_extension("aof.1");
    std::fs::rename(&path, &rotated).unwrap();
    aof.reopen().unwrap();
    aof.append("SET 2 b").unwrap();

    assert_eq!(std::fs::read_to_string(&rotated).unwrap(), "SET 1 a\n");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "SET 2 b\n");
}

// =============================================================================
// Replay Through the Engine
// =============================================================================

#[test]
fn test_engine_writes_mutations_to_aof() {
    let temp_dir = TempDir::new().unwrap();
    let config = aof_config(&temp_dir);

    let engine = Engine::open(config.clone());
    engine.execute_line("SET 42 hello", Source::Client).unwrap();
    engine.execute_line("DEL 42", Source::Client).unwrap();
    // Refused mutations are not logged.
    engine.execute_line("SET 7 a", Source::Client).unwrap();
    engine.execute_line("SET 7 b", Source::Client).unwrap();

    let contents = std::fs::read_to_string(&config.aof_file).unwrap();
    assert_eq!(contents, "SET 42 hello\nDEL 42\nSET 7 a\n");
}

#[test]
fn test_replay_rebuilds_state() {
    let temp_dir = TempDir::new().unwrap();
    let config = aof_config(&temp_dir);

    std::fs::write(&config.aof_file, "SET 7 z\nDEL 7\nSET 8 q\n").unwrap();

    let engine = Engine::open(config);
    assert_eq!(
        engine.execute_line("EXISTS 7", Source::Client).unwrap(),
        Frame::Integer(0)
    );
    assert_eq!(
        engine.execute_line("EXISTS 8", Source::Client).unwrap(),
        Frame::Integer(1)
    );
    assert_eq!(
        engine.execute_line("GET 8", Source::Client).unwrap(),
        Frame::bulk("q")
    );
}

#[test]
fn test_replay_does_not_grow_the_log() {
    let temp_dir = TempDir::new().unwrap();
    let config = aof_config(&temp_dir);

    let original = "SET 1 a\nSET 2 b\n";
    std::fs::write(&config.aof_file, original).unwrap();

    let engine = Engine::open(config.clone());
    engine.flush_aof();
    drop(engine);

    // Replaying must not re-append the records it reads.
    let contents = std::fs::read_to_string(&config.aof_file).unwrap();
    assert_eq!(contents, original);
}

#[test]
fn test_replay_skips_malformed_lines() {
    let temp_dir = TempDir::new().unwrap();
    let config = aof_config(&temp_dir);

    std::fs::write(
        &config.aof_file,
        "SET 1 a\n\nBOGUS 9 9\nSET abc x\nSET 2 b\n",
    )
    .unwrap();

    let engine = Engine::open(config);
    assert_eq!(
        engine.execute_line("EXISTS 1", Source::Client).unwrap(),
        Frame::Integer(1)
    );
    assert_eq!(
        engine.execute_line("EXISTS 2", Source::Client).unwrap(),
        Frame::Integer(1)
    );
    assert_eq!(engine.index().len(), 2);
}

#[test]
fn test_replay_survives_restart_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let config = aof_config(&temp_dir);

    {
        let engine = Engine::open(config.clone());
        engine.execute_line("SET 5 v", Source::Client).unwrap();
    }

    // Equivalent to a crash after the +OK: the always policy already
    // synced the record.
    let engine = Engine::open(config);
    assert_eq!(
        engine.execute_line("EXISTS 5", Source::Client).unwrap(),
        Frame::Integer(1)
    );
    assert_eq!(
        engine.execute_line("GET 5", Source::Client).unwrap(),
        Frame::bulk("v")
    );
}
