//! RESP frames
//!
//! Parsing is streaming and non-blocking: `Frame::parse` either consumes
//! one complete frame from the caller-owned buffer or reports
//! `Incomplete`, in which case the caller reads more bytes and retries.
//! Any other error is a protocol violation and the connection must be
//! closed.

use std::io::Cursor;

use thiserror::Error;

const CRLF: &[u8; 2] = b"\r\n";

/// Frame-level parse errors
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not enough buffered bytes for a complete frame
    #[error("not enough data to parse a complete frame")]
    Incomplete,

    /// First byte is not one of the five RESP tags
    #[error("invalid frame tag: 0x{0:02x}")]
    InvalidTag(u8),

    /// Structurally invalid frame
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// A parsed RESP value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+...` simple string
    Simple(String),

    /// `-...` error
    Error(String),

    /// `:...` signed integer
    Integer(i64),

    /// `$N` bulk string
    Bulk(Vec<u8>),

    /// `$-1` null bulk string
    Null,

    /// `*N` array; children own their subtrees directly
    Array(Vec<Frame>),

    /// `*-1` null array
    NullArray,
}

/// Fast-path check for the five legal frame tags
pub fn is_valid_tag(byte: u8) -> bool {
    matches!(byte, b'+' | b'-' | b':' | b'$' | b'*')
}

impl Frame {
    /// Bulk frame from a string slice
    pub fn bulk(data: &str) -> Self {
        Frame::Bulk(data.as_bytes().to_vec())
    }

    /// `+OK` reply
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    /// `-ERR ...` reply
    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error(message.into())
    }

    /// Parse one frame from the cursor, advancing past it on success.
    ///
    /// On `Incomplete` the cursor position is meaningless; the caller
    /// re-parses from the start once more bytes arrive.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, FrameError> {
        let tag = get_u8(src)?;
        match tag {
            b'+' => {
                let line = get_line(src)?;
                Ok(Frame::Simple(decode_utf8(line)?))
            }
            b'-' => {
                let line = get_line(src)?;
                Ok(Frame::Error(decode_utf8(line)?))
            }
            b':' => {
                let line = get_line(src)?;
                Ok(Frame::Integer(decode_int(line)?))
            }
            b'$' => {
                let len = decode_int(get_line(src)?)?;
                if len == -1 {
                    return Ok(Frame::Null);
                }
                if len < 0 {
                    return Err(FrameError::Malformed(format!(
                        "invalid bulk length {}",
                        len
                    )));
                }
                let data = get_exact(src, len as usize)?;
                Ok(Frame::Bulk(data.to_vec()))
            }
            b'*' => {
                let len = decode_int(get_line(src)?)?;
                if len == -1 {
                    return Ok(Frame::NullArray);
                }
                if len < 0 {
                    return Err(FrameError::Malformed(format!(
                        "invalid array length {}",
                        len
                    )));
                }
                let mut children = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    children.push(Frame::parse(src)?);
                }
                Ok(Frame::Array(children))
            }
            other => Err(FrameError::InvalidTag(other)),
        }
    }

    /// Serialize the frame into RESP bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Frame::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(CRLF);
            }
            Frame::Bulk(data) => {
                out.push(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                out.extend_from_slice(data);
                out.extend_from_slice(CRLF);
            }
            Frame::Null => out.extend_from_slice(b"$-1\r\n"),
            Frame::Array(children) => {
                out.push(b'*');
                out.extend_from_slice(children.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                for child in children {
                    child.write_to(out);
                }
            }
            Frame::NullArray => out.extend_from_slice(b"*-1\r\n"),
        }
    }
}

/// Next byte, or `Incomplete`
fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, FrameError> {
    let pos = src.position() as usize;
    let buf = *src.get_ref();
    if pos >= buf.len() {
        return Err(FrameError::Incomplete);
    }
    src.set_position(pos as u64 + 1);
    Ok(buf[pos])
}

/// Bytes up to the next CRLF, which is consumed but not returned
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], FrameError> {
    let start = src.position() as usize;
    let buf = *src.get_ref();
    if buf.len() < 2 {
        return Err(FrameError::Incomplete);
    }
    for i in start..buf.len() - 1 {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            src.set_position((i + 2) as u64);
            return Ok(&buf[start..i]);
        }
    }
    Err(FrameError::Incomplete)
}

/// Exactly `len` payload bytes followed by CRLF
fn get_exact<'a>(src: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8], FrameError> {
    let start = src.position() as usize;
    let buf = *src.get_ref();
    if buf.len() < start + len + 2 {
        return Err(FrameError::Incomplete);
    }
    if &buf[start + len..start + len + 2] != CRLF {
        return Err(FrameError::Malformed(
            "bulk payload not terminated by CRLF".to_string(),
        ));
    }
    src.set_position((start + len + 2) as u64);
    Ok(&buf[start..start + len])
}

fn decode_utf8(bytes: &[u8]) -> Result<String, FrameError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| FrameError::Malformed("invalid UTF-8 in line frame".to_string()))
}

fn decode_int(bytes: &[u8]) -> Result<i64, FrameError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| FrameError::Malformed("invalid UTF-8 in integer".to_string()))?;
    text.parse::<i64>()
        .map_err(|_| FrameError::Malformed(format!("invalid integer: {:?}", text)))
}
