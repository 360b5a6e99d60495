//! TCP Server
//!
//! Accepts connections and dispatches to worker threads.

use std::net::{SocketAddr, TcpListener};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Result, TowerError};

use super::Connection;

/// Message sent to worker threads
enum WorkerMessage {
    /// New client connection to handle
    NewConnection(TcpStream),
    /// Signal to shutdown
    Shutdown,
}

/// TCP server for TowerKV
///
/// ## Architecture
/// - Main thread accepts connections
/// - Worker thread pool handles client I/O
/// - Shared Engine reference for all workers
pub struct Server {
    /// Server configuration
    config: Config,

    /// Shared engine
    engine: Arc<Engine>,

    /// TCP listener (created on bind)
    listener: Option<TcpListener>,

    /// Channel to send work to workers
    work_sender: Option<Sender<WorkerMessage>>,

    /// Worker thread handles
    workers: Vec<JoinHandle<()>>,

    /// Shared running flag; false means shut down
    running: Arc<AtomicBool>,
}

impl Server {
    /// Create a new server with the given config and engine
    pub fn new(config: Config, engine: Arc<Engine>) -> Self {
        Self {
            config,
            engine,
            listener: None,
            work_sender: None,
            workers: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Bind the listener; returns the actual bound address
    pub fn bind(&mut self) -> Result<SocketAddr> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .map_err(|e| TowerError::Network(format!("Failed to bind to {}: {}", addr, e)))?;

        // Non-blocking so the accept loop can check the running flag.
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        tracing::info!("Server listening on {}", local);
        self.listener = Some(listener);
        Ok(local)
    }

    /// Handle to flip for a graceful shutdown from another thread
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Start the server (blocking)
    ///
    /// This method:
    /// 1. Binds to the configured address (unless bind() already ran)
    /// 2. Spawns worker threads
    /// 3. Accepts connections in a loop
    /// 4. Returns when shutdown is signaled
    pub fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind()?;
        }

        let num_workers = self.config.thread_pool_size.max(1);
        let (sender, receiver) = bounded::<WorkerMessage>(self.config.max_connections);
        self.work_sender = Some(sender);

        tracing::info!("Starting {} worker threads", num_workers);

        for worker_id in 0..num_workers {
            let worker = Worker::new(
                worker_id,
                receiver.clone(),
                Arc::clone(&self.engine),
                Arc::clone(&self.running),
            );
            let handle = thread::Builder::new()
                .name(format!("towerkv-worker-{}", worker_id))
                .spawn(move || worker.run())
                .map_err(|e| TowerError::Network(format!("Failed to spawn worker: {}", e)))?;

            self.workers.push(handle);
        }

        self.accept_loop()?;
        self.cleanup();

        Ok(())
    }

    /// Main accept loop
    fn accept_loop(&mut self) -> Result<()> {
        let listener = self.listener.as_ref().expect("listener bound in run()");
        let sender = self.work_sender.as_ref().expect("channel created in run()");

        while self.running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let current = self.engine.stats().current_connections();
                    if current >= self.config.max_connections {
                        tracing::warn!(
                            "Connection limit reached ({}/{}), rejecting {}",
                            current,
                            self.config.max_connections,
                            addr
                        );
                        drop(stream);
                        continue;
                    }

                    tracing::debug!("Accepted connection from {}", addr);

                    if let Err(e) = sender.send(WorkerMessage::NewConnection(stream)) {
                        tracing::error!("Failed to dispatch connection: {}", e);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // No pending connections, sleep briefly
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    if self.running.load(Ordering::Relaxed) {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Cleanup workers and resources
    fn cleanup(&mut self) {
        tracing::info!("Shutting down server...");

        if let Some(sender) = &self.work_sender {
            for _ in 0..self.workers.len() {
                let _ = sender.send(WorkerMessage::Shutdown);
            }
        }

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                tracing::error!("Worker thread panicked: {:?}", e);
            }
        }

        tracing::info!("Server shutdown complete");
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        tracing::info!("Shutdown signal received");
        self.running.store(false, Ordering::Relaxed);
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Get the bound address (if bound)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

/// Worker thread that handles client connections
struct Worker {
    /// Worker ID for logging
    id: usize,

    /// Channel to receive work
    receiver: Receiver<WorkerMessage>,

    /// Shared engine reference
    engine: Arc<Engine>,

    /// Shared running flag
    running: Arc<AtomicBool>,
}

impl Worker {
    fn new(
        id: usize,
        receiver: Receiver<WorkerMessage>,
        engine: Arc<Engine>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            receiver,
            engine,
            running,
        }
    }

    fn run(self) {
        tracing::debug!("Worker {} started", self.id);

        loop {
            match self.receiver.recv() {
                Ok(WorkerMessage::NewConnection(stream)) => {
                    self.handle_connection(stream);
                }
                Ok(WorkerMessage::Shutdown) => {
                    tracing::debug!("Worker {} received shutdown signal", self.id);
                    break;
                }
                Err(_) => {
                    // Channel closed
                    tracing::debug!("Worker {} channel closed", self.id);
                    break;
                }
            }
        }

        tracing::debug!("Worker {} stopped", self.id);
    }

    fn handle_connection(&self, stream: TcpStream) {
        self.engine.stats().connection_opened();

        let mut conn = match Connection::new(stream, Arc::clone(&self.engine)) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("Failed to create connection: {}", e);
                self.engine.stats().connection_closed();
                return;
            }
        };

        if let Err(e) = conn.handle(&self.running) {
            tracing::debug!("Connection {} ended with error: {}", conn.peer_addr(), e);
        }

        self.engine.stats().connection_closed();
    }
}
