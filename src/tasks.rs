//! Background tasks
//!
//! Periodic snapshot dumps and a monitor loop for stats refresh and AOF
//! flushing. Both observe the shared running flag between sleeps so
//! shutdown is honored within a second.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::engine::Engine;

/// Seconds between monitor passes
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically dump the index to the snapshot file
pub fn spawn_snapshot_task(engine: Arc<Engine>, running: Arc<AtomicBool>) -> JoinHandle<()> {
    let interval = Duration::from_secs(engine.config().persistence_interval.max(1));
    thread::Builder::new()
        .name("towerkv-snapshot".to_string())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                sleep_while_running(interval, &running);
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = engine.save_snapshot() {
                    tracing::error!("periodic snapshot failed: {}", e);
                }
            }
        })
        .expect("failed to spawn snapshot thread")
}

/// Refresh stats and flush the AOF on a slow cadence
pub fn spawn_monitor_task(engine: Arc<Engine>, running: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("towerkv-monitor".to_string())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                sleep_while_running(MONITOR_INTERVAL, &running);
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                engine.flush_aof();
                let counters = engine.stats().counters();
                tracing::debug!(
                    uptime = engine.stats().uptime_seconds(),
                    connections = engine.stats().current_connections(),
                    commands = counters.total,
                    keys = engine.index().len(),
                    "server status"
                );
            }
        })
        .expect("failed to spawn monitor thread")
}

fn sleep_while_running(duration: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(Duration::from_secs(1)));
    }
}
