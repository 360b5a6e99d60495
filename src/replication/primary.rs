//! Primary-side replication
//!
//! A dedicated listener accepts follower connections on the replication
//! port. Each connection gets a handler thread that serves the textual
//! control protocol; the shared write handle registered for the follower
//! is also used by `publish` to push mutations and by the heartbeat task
//! to ping.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, TowerError};

use super::{LinkState, ReplicationManager};

/// Read timeout so handler threads observe shutdown promptly
const READ_POLL: Duration = Duration::from_millis(200);

/// Bind the control listener and spawn the accept and heartbeat threads
pub(super) fn spawn(mgr: &Arc<ReplicationManager>) -> Result<Vec<JoinHandle<()>>> {
    let listener = TcpListener::bind(("0.0.0.0", mgr.settings.listen_port)).map_err(|e| {
        TowerError::Replication(format!(
            "failed to bind replication port {}: {}",
            mgr.settings.listen_port, e
        ))
    })?;
    listener.set_nonblocking(true)?;
    *mgr.listen_addr.lock() = Some(listener.local_addr()?);

    let mut handles = Vec::new();

    let accept_mgr = Arc::clone(mgr);
    handles.push(
        thread::Builder::new()
            .name("towerkv-repl-accept".to_string())
            .spawn(move || accept_loop(accept_mgr, listener))
            .map_err(|e| TowerError::Replication(format!("failed to spawn accept thread: {}", e)))?,
    );

    let heartbeat_mgr = Arc::clone(mgr);
    handles.push(
        thread::Builder::new()
            .name("towerkv-repl-heartbeat".to_string())
            .spawn(move || heartbeat_loop(heartbeat_mgr))
            .map_err(|e| {
                TowerError::Replication(format!("failed to spawn heartbeat thread: {}", e))
            })?,
    );

    Ok(handles)
}

fn accept_loop(mgr: Arc<ReplicationManager>, listener: TcpListener) {
    while mgr.is_running() {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::info!(%peer, "follower connection accepted");
                let conn_mgr = Arc::clone(&mgr);
                let spawned = thread::Builder::new()
                    .name("towerkv-repl-conn".to_string())
                    .spawn(move || handle_follower(conn_mgr, stream, peer));
                if let Err(e) = spawned {
                    tracing::error!("failed to spawn follower handler: {}", e);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                if mgr.is_running() {
                    tracing::error!("replication accept error: {}", e);
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

/// Serve one follower connection until it drops or the server stops
fn handle_follower(mgr: Arc<ReplicationManager>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_read_timeout(Some(READ_POLL)) {
        tracing::error!(%peer, "failed to set read timeout: {}", e);
        return;
    }
    // A stalled follower must not block publish behind its socket.
    let _ = stream.set_write_timeout(Some(mgr.settings.sync_timeout));
    let _ = stream.set_nodelay(true);

    let writer = match stream.try_clone() {
        Ok(clone) => Arc::new(Mutex::new(clone)),
        Err(e) => {
            tracing::error!(%peer, "failed to clone follower stream: {}", e);
            return;
        }
    };
    let mut reader = BufReader::new(stream);

    let mut registered: Option<String> = None;
    let mut line = String::new();
    while mgr.is_running() {
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let msg = line.trim_end().to_string();
                line.clear();
                if !msg.is_empty() {
                    handle_control(&mgr, &peer, &writer, &mut registered, &msg);
                }
            }
            // Timeouts keep partial input buffered; re-check running and retry
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                tracing::debug!(%peer, "follower connection error: {}", e);
                break;
            }
        }
    }

    if let Some(id) = registered {
        mgr.set_follower_state(&id, LinkState::Disconnected, false);
        tracing::info!(follower = %id, "follower connection closed");
    }
}

fn handle_control(
    mgr: &ReplicationManager,
    peer: &SocketAddr,
    writer: &Arc<Mutex<TcpStream>>,
    registered: &mut Option<String>,
    msg: &str,
) {
    tracing::debug!(%peer, message = msg, "control message");

    if let Some(rest) = msg.strip_prefix("SLAVE_CONNECT:") {
        let offset = match rest.trim().parse::<u64>() {
            Ok(offset) => offset,
            Err(_) => {
                send_line(writer, "ERROR:Invalid connect offset");
                return;
            }
        };
        let id = mgr.register_follower(
            peer.ip().to_string(),
            peer.port(),
            offset,
            Arc::clone(writer),
        );
        *registered = Some(id.clone());
        send_line(writer, &format!("MASTER:OK:{}", mgr.offset()));

        if offset < mgr.offset() {
            mgr.set_follower_state(&id, LinkState::Syncing, true);
            stream_backlog(mgr, writer, offset);
        }
        mgr.set_follower_state(&id, LinkState::Online, true);
    } else if msg == "PING" {
        mgr.touch_follower(&follower_id(registered, peer));
        send_line(writer, "PONG");
    } else if msg == "PONG" {
        mgr.touch_follower(&follower_id(registered, peer));
    } else if let Some(rest) = msg.strip_prefix("SYNC_REQUEST:") {
        let offset = match rest.trim().parse::<u64>() {
            Ok(offset) => offset,
            Err(_) => {
                send_line(writer, "ERROR:Invalid sync offset");
                return;
            }
        };
        let current = mgr.offset();
        if offset >= current {
            send_line(writer, "SYNC:OK:0");
        } else {
            send_line(writer, &format!("SYNC:START:{}", current - offset));
            stream_backlog(mgr, writer, offset);
            mgr.set_follower_state(&follower_id(registered, peer), LinkState::Online, true);
        }
    } else if let Some(rest) = msg.strip_prefix("COMMAND_ACK:") {
        let offset = match rest.trim().parse::<u64>() {
            Ok(offset) => offset,
            Err(_) => {
                send_line(writer, "ERROR:Invalid ack offset");
                return;
            }
        };
        mgr.ack_follower(&follower_id(registered, peer), offset);
        send_line(writer, "OK");
    } else {
        tracing::warn!(%peer, message = msg, "unknown control message");
        send_line(writer, "ERROR:Unknown message type");
    }
}

/// Send retained entries newer than `from_offset`, oldest first.
///
/// A follower older than the bounded log gets only what is retained;
/// snapshot-based bootstrap is not implemented.
fn stream_backlog(mgr: &ReplicationManager, writer: &Arc<Mutex<TcpStream>>, from_offset: u64) {
    let (entries, oldest) = {
        let log = mgr.log.lock();
        (log.entries_since(from_offset), log.oldest_offset())
    };

    if let Some(oldest) = oldest {
        if from_offset + 1 < oldest {
            tracing::warn!(
                from_offset,
                oldest,
                "follower predates the retained log; entries before the bound are lost"
            );
        }
    }

    for entry in entries {
        if !send_line(writer, &format!("CMD:{}:{}", entry.offset, entry.command)) {
            break;
        }
    }
}

fn heartbeat_loop(mgr: Arc<ReplicationManager>) {
    while mgr.is_running() {
        heartbeat_pass(&mgr);
        sleep_while_running(&mgr, mgr.settings.ping_interval);
    }
}

/// One heartbeat round: ping online followers, demote the silent, drop
/// the long-silent, refresh aggregate stats
fn heartbeat_pass(mgr: &ReplicationManager) {
    let interval = mgr.settings.ping_interval;
    let primary_offset = mgr.offset();

    let mut replicas = mgr.replicas.lock();

    replicas.retain(|replica| {
        if replica.info.last_heartbeat.elapsed() > interval * 3 {
            tracing::info!(
                follower = %replica.info.id,
                "follower removed after prolonged silence"
            );
            false
        } else {
            true
        }
    });

    let mut connected = 0u64;
    let mut total_lag = 0u64;
    for replica in replicas.iter_mut() {
        if replica.info.online && replica.info.last_heartbeat.elapsed() > interval * 2 {
            tracing::warn!(follower = %replica.info.id, "follower unresponsive, marking offline");
            replica.info.online = false;
            replica.info.state = LinkState::Disconnected;
            continue;
        }
        if replica.info.online {
            if let Some(writer) = &replica.writer {
                if writer.lock().write_all(b"PING\n").is_err() {
                    replica.info.online = false;
                    replica.info.state = LinkState::Error;
                    continue;
                }
            }
            connected += 1;
            total_lag += primary_offset.saturating_sub(replica.info.ack_offset);
        }
    }
    drop(replicas);

    let mut stats = mgr.stats.lock();
    stats.connected_followers = connected as usize;
    stats.average_lag = if connected > 0 { total_lag / connected } else { 0 };
}

fn follower_id(registered: &Option<String>, peer: &SocketAddr) -> String {
    registered
        .clone()
        .unwrap_or_else(|| format!("{}:{}", peer.ip(), peer.port()))
}

fn send_line(writer: &Arc<Mutex<TcpStream>>, line: &str) -> bool {
    let mut stream = writer.lock();
    let result = stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.write_all(b"\n"));
    if let Err(e) = result {
        tracing::debug!("failed to write control reply: {}", e);
        return false;
    }
    true
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn sleep_while_running(mgr: &ReplicationManager, duration: Duration) {
    let deadline = std::time::Instant::now() + duration;
    while mgr.is_running() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
}
