//! Connection Handler
//!
//! Owns one client socket: buffers incoming bytes, parses complete RESP
//! frames, dispatches them, and writes the replies. Reads use a short
//! timeout so the loop observes shutdown promptly.

use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};

use crate::engine::{Engine, Session, Source};
use crate::error::{Result, TowerError};
use crate::protocol::{is_valid_tag, CommandFrame, Frame, FrameError};

/// Read timeout; bounds how long shutdown can go unnoticed
const READ_POLL: Duration = Duration::from_millis(200);

/// Bytes pulled off the socket per read
const READ_CHUNK: usize = 4096;

/// Handles a single client connection
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: BytesMut,
    session: Session,
    engine: Arc<Engine>,
}

impl Connection {
    pub fn new(stream: TcpStream, engine: Arc<Engine>) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_read_timeout(Some(READ_POLL))?;
        let _ = stream.set_nodelay(true);
        let session = engine.new_session();
        Ok(Self {
            stream,
            peer,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            session,
            engine,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Serve the connection until the peer closes, QUIT, a protocol
    /// violation, or server shutdown
    pub fn handle(&mut self, running: &AtomicBool) -> Result<()> {
        loop {
            // Drain every complete frame already buffered.
            loop {
                match self.parse_frame() {
                    Ok(Some(frame)) => {
                        if !self.process(frame)? {
                            return Ok(());
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // Unparseable RESP: report and drop the connection.
                        let reply = Frame::error(format!("ERR Protocol error: {}", e));
                        let _ = self.write_frame(&reply);
                        tracing::debug!(peer = %self.peer, "closing on protocol error: {}", e);
                        return Ok(());
                    }
                }
            }

            if !running.load(Ordering::Relaxed) {
                return Ok(());
            }

            let mut chunk = [0u8; READ_CHUNK];
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(ref e) if is_timeout(e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Dispatch one frame; returns false when the connection should close
    fn process(&mut self, frame: Frame) -> Result<bool> {
        let reply = match CommandFrame::try_from(frame) {
            Ok(cmd) => self
                .engine
                .execute(cmd, &mut self.session, Source::Client),
            // Well-formed RESP but not a command: error reply, stay open.
            Err(e) => Frame::error(format!("ERR {}", e)),
        };

        self.write_frame(&reply)?;
        Ok(!self.session.should_close)
    }

    /// Try to parse one complete frame from the buffer
    fn parse_frame(&mut self) -> std::result::Result<Option<Frame>, FrameError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        // Fast-path rejection before any frame work.
        if !is_valid_tag(self.buffer[0]) {
            return Err(FrameError::InvalidTag(self.buffer[0]));
        }
        let mut cursor = Cursor::new(&self.buffer[..]);
        match Frame::parse(&mut cursor) {
            Ok(frame) => {
                let consumed = cursor.position() as usize;
                self.buffer.advance(consumed);
                Ok(Some(frame))
            }
            Err(FrameError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and write a full reply; `write_all` retries partial writes
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.serialize();
        self.stream
            .write_all(&bytes)
            .map_err(|e| TowerError::Network(format!("failed to write reply: {}", e)))
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
