//! TowerKV CLI Client
//!
//! Small RESP client for poking at a running server.
//!
//! ## Connection Handling
//!
//! Uses a single TCP stream for sequential write-then-read, the same
//! pattern as redis-cli: encode the request, write it, then read one
//! reply frame from the same stream.

use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use clap::{Parser, Subcommand};

use towerkv::protocol::{Frame, FrameError};

/// TowerKV CLI
#[derive(Parser, Debug)]
#[command(name = "towerkv-cli")]
#[command(about = "CLI for the TowerKV key-value server")]
#[command(version)]
struct Args {
    /// Server address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    server: String,

    /// Connection timeout in milliseconds
    #[arg(short, long, default_value = "5000")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the server
    Ping {
        /// Optional message to echo back
        message: Option<String>,
    },

    /// Set a key-value pair (keys are integers)
    Set { key: i64, value: String },

    /// Get a value by key
    Get { key: i64 },

    /// Delete a key
    Del { key: i64 },

    /// Check whether a key exists
    Exists { key: i64 },

    /// Clear the whole index
    Flush,

    /// Trigger a snapshot dump
    Save,

    /// Print the server info block
    Info,
}

fn main() {
    let args = Args::parse();

    let request = build_request(&args.command);

    let addr = match args.server.parse() {
        Ok(addr) => addr,
        Err(_) => {
            eprintln!("invalid server address: {}", args.server);
            std::process::exit(1);
        }
    };
    let timeout = Duration::from_millis(args.timeout);
    let mut stream = match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("failed to connect to {}: {}", args.server, e);
            std::process::exit(1);
        }
    };
    let _ = stream.set_read_timeout(Some(timeout));
    let _ = stream.set_write_timeout(Some(timeout));
    let _ = stream.set_nodelay(true);

    if let Err(e) = stream.write_all(&request.serialize()) {
        eprintln!("failed to send command: {}", e);
        std::process::exit(1);
    }

    match read_reply(&mut stream) {
        Ok(reply) => print_reply(&reply),
        Err(e) => {
            eprintln!("failed to read reply: {}", e);
            std::process::exit(1);
        }
    }
}

/// Encode a subcommand as a RESP array of bulk strings
fn build_request(command: &Commands) -> Frame {
    let parts: Vec<String> = match command {
        Commands::Ping { message: Some(m) } => vec!["PING".into(), m.clone()],
        Commands::Ping { message: None } => vec!["PING".into()],
        Commands::Set { key, value } => vec!["SET".into(), key.to_string(), value.clone()],
        Commands::Get { key } => vec!["GET".into(), key.to_string()],
        Commands::Del { key } => vec!["DEL".into(), key.to_string()],
        Commands::Exists { key } => vec!["EXISTS".into(), key.to_string()],
        Commands::Flush => vec!["FLUSH".into()],
        Commands::Save => vec!["SAVE".into()],
        Commands::Info => vec!["INFO".into()],
    };
    Frame::Array(parts.iter().map(|p| Frame::bulk(p)).collect())
}

/// Read bytes until one complete reply frame parses
fn read_reply(stream: &mut TcpStream) -> std::io::Result<Frame> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before a full reply",
            ));
        }
        buffer.extend_from_slice(&chunk[..n]);

        let mut cursor = Cursor::new(&buffer[..]);
        match Frame::parse(&mut cursor) {
            Ok(frame) => return Ok(frame),
            Err(FrameError::Incomplete) => continue,
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                ))
            }
        }
    }
}

fn print_reply(frame: &Frame) {
    match frame {
        Frame::Simple(s) => println!("{}", s),
        Frame::Error(e) => {
            eprintln!("(error) {}", e);
            std::process::exit(1);
        }
        Frame::Integer(n) => println!("(integer) {}", n),
        Frame::Bulk(data) => match std::str::from_utf8(data) {
            Ok(s) => println!("{}", s),
            Err(_) => println!("{:?}", data),
        },
        Frame::Null => println!("(nil)"),
        Frame::Array(children) => {
            if children.is_empty() {
                println!("(empty array)");
            }
            for (i, child) in children.iter().enumerate() {
                print!("{}) ", i + 1);
                print_reply(child);
            }
        }
        Frame::NullArray => println!("(nil)"),
    }
}
