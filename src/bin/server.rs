//! TowerKV Server Binary
//!
//! Starts the RESP server, replication, and background tasks.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use towerkv::config::create_directories;
use towerkv::network::Server;
use towerkv::tasks;
use towerkv::{logging, Config, Engine};

/// TowerKV Server
#[derive(Parser, Debug)]
#[command(name = "towerkv-server")]
#[command(about = "Skiplist-backed RESP key-value server")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Server port
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Log level (DEBUG|INFO|WARN|ERROR|FATAL)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Run as daemon (reserved)
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Replicate from a master, as host:port
    #[arg(long, value_name = "HOST:PORT")]
    replicaof: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Layer configuration: defaults < environment < file < CLI flags.
    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(replicaof) = args.replicaof {
        match replicaof.rsplit_once(':').and_then(|(host, port)| {
            port.parse::<u16>().ok().map(|port| (host.to_string(), port))
        }) {
            Some((host, port)) => {
                config.master_host = host;
                config.master_port = port;
            }
            None => {
                eprintln!("invalid --replicaof address: {}", replicaof);
                std::process::exit(1);
            }
        }
    }
    if args.daemon {
        eprintln!("daemon mode is reserved and not implemented");
    }

    if let Err(e) = create_directories(&config) {
        eprintln!("failed to create data directories: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = logging::init(&config) {
        eprintln!("failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    tracing::info!("TowerKV v{}", towerkv::VERSION);
    tracing::info!("Listen address: {}", config.listen_addr());

    let engine = Engine::open(config.clone());

    // Replication: a bind failure on the primary control port is fatal.
    let replication = engine.init_replication();
    if let Err(e) = replication.start() {
        tracing::error!("Failed to start replication: {}", e);
        std::process::exit(1);
    }

    let mut server = Server::new(config.clone(), Arc::clone(&engine));
    if let Err(e) = server.bind() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
    let running = server.shutdown_handle();

    let mut background = Vec::new();
    if config.enable_persistence {
        background.push(tasks::spawn_snapshot_task(
            Arc::clone(&engine),
            Arc::clone(&running),
        ));
    }
    background.push(tasks::spawn_monitor_task(
        Arc::clone(&engine),
        Arc::clone(&running),
    ));

    tracing::info!("TowerKV started on {}:{}", config.host, config.port);

    // Blocks until the running flag is cleared.
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    for handle in background {
        let _ = handle.join();
    }
    replication.stop();
    if let Err(e) = engine.save_snapshot() {
        tracing::error!("final snapshot failed: {}", e);
    }
    engine.flush_aof();

    tracing::info!("Server stopped");
}
