//! Follower-side replication
//!
//! A single state-machine thread owns the link to the master: connect,
//! handshake, request sync, then apply the command stream and heartbeat.
//! Any failure tears the session down and reconnects after a fixed
//! backoff.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Result, TowerError};

use super::{LinkState, ReplicationManager, RECONNECT_DELAY};

/// Read timeout so the loop can heartbeat and observe shutdown
const READ_POLL: Duration = Duration::from_millis(200);

pub(super) fn spawn(mgr: Arc<ReplicationManager>) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("towerkv-repl-follower".to_string())
        .spawn(move || run(mgr))
        .map_err(|e| TowerError::Replication(format!("failed to spawn follower thread: {}", e)))
}

fn run(mgr: Arc<ReplicationManager>) {
    while mgr.is_running() {
        set_state(&mgr, LinkState::Connecting);
        if let Err(e) = session(&mgr) {
            tracing::warn!("replication link error: {}", e);
            set_state(&mgr, LinkState::Error);
        }
        if !mgr.is_running() {
            break;
        }
        set_state(&mgr, LinkState::Disconnected);
        sleep_while_running(&mgr, RECONNECT_DELAY);
    }
    set_state(&mgr, LinkState::Disconnected);
}

/// One full session against the master; returns Ok only on shutdown
fn session(mgr: &ReplicationManager) -> Result<()> {
    let (host, port) = mgr
        .settings
        .master_addr
        .clone()
        .ok_or_else(|| TowerError::Replication("no master address configured".to_string()))?;

    let addr = format!("{}:{}", host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| TowerError::Network(format!("cannot resolve master {}:{}", host, port)))?;

    tracing::info!(master = %addr, "connecting to master");
    let stream = TcpStream::connect_timeout(&addr, mgr.settings.sync_timeout)?;
    let _ = stream.set_nodelay(true);
    stream.set_read_timeout(Some(READ_POLL))?;

    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    // Handshake: announce our offset, learn the master's.
    send(&mut writer, &format!("SLAVE_CONNECT:{}", mgr.offset()))?;
    let reply = read_line_deadline(mgr, &mut reader, mgr.settings.sync_timeout)?;
    let master_offset = match reply.strip_prefix("MASTER:OK:") {
        Some(rest) => rest.trim().parse::<u64>().map_err(|_| {
            TowerError::Replication(format!("malformed handshake reply: {}", reply))
        })?,
        None => {
            return Err(TowerError::Replication(format!(
                "unexpected handshake reply: {}",
                reply
            )))
        }
    };
    set_state(mgr, LinkState::Connected);
    tracing::info!(master_offset, local_offset = mgr.offset(), "connected to master");

    send(&mut writer, &format!("SYNC_REQUEST:{}", mgr.offset()))?;

    let interval = mgr.settings.ping_interval;
    let mut last_heard = Instant::now();
    let mut last_ping = Instant::now();
    let mut line = String::new();

    while mgr.is_running() {
        match reader.read_line(&mut line) {
            Ok(0) => return Err(TowerError::Replication("master closed the connection".into())),
            Ok(_) => {
                let msg = line.trim_end().to_string();
                line.clear();
                if !msg.is_empty() {
                    last_heard = Instant::now();
                    handle_message(mgr, &mut writer, &msg, master_offset)?;
                }
            }
            // Timeouts keep partial input buffered; fall through to heartbeat
            Err(ref e) if is_timeout(e) => {}
            Err(e) => return Err(e.into()),
        }

        if last_ping.elapsed() >= interval {
            send(&mut writer, "PING")?;
            last_ping = Instant::now();
        }
        if last_heard.elapsed() > interval * 2 {
            return Err(TowerError::Replication("master heartbeat lost".to_string()));
        }
    }

    Ok(())
}

fn handle_message(
    mgr: &ReplicationManager,
    writer: &mut TcpStream,
    msg: &str,
    master_offset: u64,
) -> Result<()> {
    if let Some(rest) = msg.strip_prefix("CMD:") {
        let (offset, command) = rest.split_once(':').ok_or_else(|| {
            TowerError::Replication(format!("malformed stream entry: {}", msg))
        })?;
        let offset = offset.parse::<u64>().map_err(|_| {
            TowerError::Replication(format!("malformed stream offset: {}", msg))
        })?;

        let local = mgr.offset();
        if offset <= local {
            // Redelivery after a reconnect; already applied.
            send(writer, &format!("COMMAND_ACK:{}", local))?;
        } else if offset == local + 1 {
            let advanced = mgr.apply_replicated(command);
            send(writer, &format!("COMMAND_ACK:{}", advanced))?;
            if advanced >= master_offset && mgr.link_state() != LinkState::Online {
                set_state(mgr, LinkState::Online);
            }
        } else {
            return Err(TowerError::Replication(format!(
                "stream gap: expected offset {}, got {}",
                local + 1,
                offset
            )));
        }
    } else if msg == "PING" {
        send(writer, "PONG")?;
    } else if msg == "PONG" || msg == "OK" {
        // Heartbeat replies and ack confirmations carry no payload.
    } else if let Some(rest) = msg.strip_prefix("SYNC:") {
        if rest == "OK:0" {
            set_state(mgr, LinkState::Online);
            tracing::info!("in sync with master");
        } else if let Some(count) = rest.strip_prefix("START:") {
            let count = count.trim().parse::<u64>().unwrap_or(0);
            if count == 0 {
                set_state(mgr, LinkState::Online);
            } else {
                set_state(mgr, LinkState::Syncing);
                tracing::info!(count, "syncing missed commands from master");
            }
        }
    } else if msg.starts_with("MASTER:OK:") {
        // Duplicate handshake reply; nothing to do.
    } else if msg.starts_with("ERROR:") {
        return Err(TowerError::Replication(format!("master reported: {}", msg)));
    } else {
        tracing::debug!(message = msg, "unexpected message from master");
    }
    Ok(())
}

fn set_state(mgr: &ReplicationManager, state: LinkState) {
    let mut current = mgr.link_state.lock();
    if *current != state {
        tracing::debug!(from = %*current, to = %state, "replication state changed");
        *current = state;
    }
}

fn send(writer: &mut TcpStream, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Read one non-empty line, retrying short timeouts until the deadline
fn read_line_deadline(
    mgr: &ReplicationManager,
    reader: &mut BufReader<TcpStream>,
    timeout: Duration,
) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let mut line = String::new();
    while mgr.is_running() && Instant::now() < deadline {
        match reader.read_line(&mut line) {
            Ok(0) => {
                return Err(TowerError::Replication(
                    "master closed the connection during handshake".to_string(),
                ))
            }
            Ok(_) => {
                let msg = line.trim_end().to_string();
                if !msg.is_empty() {
                    return Ok(msg);
                }
                line.clear();
            }
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(TowerError::Replication("handshake timed out".to_string()))
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn sleep_while_running(mgr: &ReplicationManager, duration: Duration) {
    let deadline = Instant::now() + duration;
    while mgr.is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100));
    }
}
