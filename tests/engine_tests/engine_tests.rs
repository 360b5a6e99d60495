//! Tests for the command dispatcher
//!
//! These tests verify the per-verb contracts: arity rules, integer key
//! validation, reply shapes, the documented DEL quirk, reinsert refusal,
//! snapshot commands, sessions (SELECT/AUTH/QUIT), and the info block.

use tempfile::TempDir;
use towerkv::protocol::{CommandFrame, Frame};
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
    config
}

fn exec(engine: &std::sync::Arc<Engine>, line: &str) -> Frame {
    engine.execute_line(line, Source::Client).unwrap()
}

fn err(message: &str) -> Frame {
    Frame::Error(message.to_string())
}

// =============================================================================
// PING / ECHO
// =============================================================================

#[test]
fn test_ping() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    assert_eq!(exec(&engine, "PING"), Frame::Simple("PONG".to_string()));
    assert_eq!(exec(&engine, "PING hello"), Frame::bulk("hello"));
}

#[test]
fn test_echo() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    assert_eq!(exec(&engine, "ECHO message"), Frame::bulk("message"));
    assert_eq!(
        exec(&engine, "ECHO"),
        err("ERR wrong number of arguments for 'echo' command")
    );
}

// =============================================================================
// SET / GET / EXISTS
// =============================================================================

#[test]
fn test_set_and_get() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    assert_eq!(exec(&engine, "SET 42 hello"), Frame::ok());
    assert_eq!(exec(&engine, "GET 42"), Frame::bulk("hello"));
    assert_eq!(exec(&engine, "GET 99"), Frame::Null);
}

#[test]
fn test_set_duplicate_key_refused() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    assert_eq!(exec(&engine, "SET 1 a"), Frame::ok());
    assert_eq!(exec(&engine, "SET 1 b"), err("ERR failed to set key"));

    // The first value survives.
    assert_eq!(exec(&engine, "GET 1"), Frame::bulk("a"));
    assert_eq!(exec(&engine, "EXISTS 1"), Frame::Integer(1));
}

#[test]
fn test_exists() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    assert_eq!(exec(&engine, "EXISTS 5"), Frame::Integer(0));
    exec(&engine, "SET 5 v");
    assert_eq!(exec(&engine, "EXISTS 5"), Frame::Integer(1));
}

#[test]
fn test_non_integer_keys_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    for line in ["SET abc v", "GET abc", "DEL abc", "EXISTS abc"] {
        assert_eq!(
            exec(&engine, line),
            err("ERR key must be an integer"),
            "line: {}",
            line
        );
    }
}

// =============================================================================
// DEL
// =============================================================================

#[test]
fn test_del_removes_key() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    exec(&engine, "SET 1 a");
    assert_eq!(exec(&engine, "DEL 1"), Frame::Integer(1));
    assert_eq!(exec(&engine, "EXISTS 1"), Frame::Integer(0));
}

#[test]
fn test_del_missing_key_still_replies_one() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    // Deleting an absent key is a no-op but the reply is still :1.
    assert_eq!(exec(&engine, "DEL 12345"), Frame::Integer(1));
}

// =============================================================================
// KEYS / FLUSH
// =============================================================================

#[test]
fn test_keys_returns_empty_array() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    exec(&engine, "SET 1 a");
    assert_eq!(exec(&engine, "KEYS"), Frame::Array(Vec::new()));
    assert_eq!(exec(&engine, "KEYS *"), Frame::Array(Vec::new()));
}

#[test]
fn test_flush_clears_index() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    exec(&engine, "SET 1 a");
    exec(&engine, "SET 2 b");
    assert_eq!(exec(&engine, "FLUSH"), Frame::ok());
    assert_eq!(exec(&engine, "EXISTS 1"), Frame::Integer(0));
    assert_eq!(exec(&engine, "EXISTS 2"), Frame::Integer(0));
    assert_eq!(engine.index().len(), 0);
}

// =============================================================================
// SAVE / LOAD
// =============================================================================

#[test]
fn test_save_and_load_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);

    {
        let engine = Engine::open(config.clone());
        exec(&engine, "SET 1 one");
        exec(&engine, "SET 2 two");
        assert_eq!(exec(&engine, "SAVE"), Frame::ok());
    }

    // A fresh engine loads the snapshot at startup.
    let engine = Engine::open(config);
    assert_eq!(exec(&engine, "GET 1"), Frame::bulk("one"));
    assert_eq!(exec(&engine, "GET 2"), Frame::bulk("two"));
}

#[test]
fn test_load_command_reads_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);

    std::fs::write(&config.data_file, "9:nine;\n").unwrap();

    let engine = Engine::open(config);
    // Loaded once at startup; an explicit LOAD is also accepted.
    assert_eq!(exec(&engine, "LOAD"), Frame::ok());
    assert_eq!(exec(&engine, "GET 9"), Frame::bulk("nine"));
}

// =============================================================================
// INFO / CONFIG
// =============================================================================

#[test]
fn test_info_block() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    exec(&engine, "SET 1 a");
    let reply = exec(&engine, "INFO");
    let body = match reply {
        Frame::Bulk(data) => String::from_utf8(data).unwrap(),
        other => panic!("expected bulk INFO reply, got {:?}", other),
    };

    assert!(body.contains("# Server"));
    assert!(body.contains("# Stats"));
    assert!(body.contains("# Replication"));
    assert!(body.contains("total_commands_processed:"));
    assert!(body.contains("db_keys:1"));
}

#[test]
fn test_config_get() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    let reply = exec(&engine, "CONFIG GET");
    let body = match reply {
        Frame::Bulk(data) => String::from_utf8(data).unwrap(),
        other => panic!("expected bulk CONFIG reply, got {:?}", other),
    };
    assert!(body.contains("port:6379"));
    assert!(body.contains("max_level:18"));

    assert_eq!(exec(&engine, "CONFIG SET port 1"), err("ERR unknown subcommand"));
}

// =============================================================================
// Sessions: SELECT / AUTH / QUIT
// =============================================================================

#[test]
fn test_select_range() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    assert_eq!(exec(&engine, "SELECT 0"), Frame::ok());
    assert_eq!(exec(&engine, "SELECT 15"), Frame::ok());
    assert_eq!(exec(&engine, "SELECT 16"), err("ERR DB index is out of range"));
    assert_eq!(exec(&engine, "SELECT -1"), err("ERR DB index is out of range"));
    assert_eq!(exec(&engine, "SELECT abc"), err("ERR invalid DB index"));
}

#[test]
fn test_auth_without_password_configured() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    // With no password configured any AUTH succeeds.
    assert_eq!(exec(&engine, "AUTH anything"), Frame::ok());
}

#[test]
fn test_auth_gates_commands_when_password_set() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(&temp_dir);
    config.requirepass = "sesame".to_string();

    let engine = Engine::open(config);
    let mut session = engine.new_session();
    assert!(!session.authenticated);

    let exec_in = |session: &mut towerkv::Session, line: &str| {
        engine.execute(
            CommandFrame::parse_line(line).unwrap(),
            session,
            Source::Client,
        )
    };

    // PING works before AUTH; mutations do not.
    assert_eq!(
        exec_in(&mut session, "PING"),
        Frame::Simple("PONG".to_string())
    );
    assert_eq!(
        exec_in(&mut session, "SET 1 a"),
        err("ERR authentication required")
    );

    assert_eq!(
        exec_in(&mut session, "AUTH wrong"),
        err("ERR invalid password")
    );
    assert!(!session.authenticated);

    assert_eq!(exec_in(&mut session, "AUTH sesame"), Frame::ok());
    assert!(session.authenticated);
    assert_eq!(exec_in(&mut session, "SET 1 a"), Frame::ok());
}

#[test]
fn test_quit_closes_session() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    let mut session = engine.new_session();
    let reply = engine.execute(
        CommandFrame::parse_line("QUIT").unwrap(),
        &mut session,
        Source::Client,
    );
    assert_eq!(reply, Frame::ok());
    assert!(session.should_close);
}

// =============================================================================
// Dispatch Errors
// =============================================================================

#[test]
fn test_unknown_command() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    assert_eq!(exec(&engine, "NOSUCH 1 2"), err("ERR unknown command"));
}

#[test]
fn test_wrong_arity() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    assert_eq!(
        exec(&engine, "SET 1"),
        err("ERR wrong number of arguments for 'set' command")
    );
    assert_eq!(
        exec(&engine, "SET 1 a b"),
        err("ERR wrong number of arguments for 'set' command")
    );
    assert_eq!(
        exec(&engine, "GET 1 2"),
        err("ERR wrong number of arguments for 'get' command")
    );
    assert_eq!(
        exec(&engine, "QUIT now"),
        err("ERR wrong number of arguments for 'quit' command")
    );
}

// =============================================================================
// Statistics
// =============================================================================

#[test]
fn test_counters_track_commands() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&temp_dir));

    exec(&engine, "PING");
    exec(&engine, "SET 1 a");
    exec(&engine, "GET 1");
    exec(&engine, "GET 1");
    exec(&engine, "NOSUCH");

    let counters = engine.stats().counters();
    assert_eq!(counters.ping, 1);
    assert_eq!(counters.set, 1);
    assert_eq!(counters.get, 2);
    // Unknown verbs count toward the total only.
    assert_eq!(counters.total, 5);
}
