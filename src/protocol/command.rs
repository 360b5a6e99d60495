//! Command frames
//!
//! A request is a RESP array of bulk strings: the verb (normalized to
//! upper case) followed by its arguments. The verb table carries each
//! command's arity bounds and whether it mutates the keyspace.

use crate::error::TowerError;

use super::Frame;

/// The recognized command verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ping,
    Echo,
    Set,
    Get,
    Del,
    Exists,
    Keys,
    Flush,
    Save,
    Load,
    Info,
    Config,
    Select,
    Auth,
    Quit,
}

impl CommandKind {
    /// Look up a verb; expects the upper-cased form
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "PING" => Some(Self::Ping),
            "ECHO" => Some(Self::Echo),
            "SET" => Some(Self::Set),
            "GET" => Some(Self::Get),
            "DEL" => Some(Self::Del),
            "EXISTS" => Some(Self::Exists),
            "KEYS" => Some(Self::Keys),
            "FLUSH" => Some(Self::Flush),
            "SAVE" => Some(Self::Save),
            "LOAD" => Some(Self::Load),
            "INFO" => Some(Self::Info),
            "CONFIG" => Some(Self::Config),
            "SELECT" => Some(Self::Select),
            "AUTH" => Some(Self::Auth),
            "QUIT" => Some(Self::Quit),
            _ => None,
        }
    }

    /// (min, max) argument counts; `None` means unbounded
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Self::Ping => (0, Some(1)),
            Self::Echo => (1, Some(1)),
            Self::Set => (2, Some(2)),
            Self::Get => (1, Some(1)),
            Self::Del => (1, Some(1)),
            Self::Exists => (1, Some(1)),
            Self::Keys => (0, None),
            Self::Flush => (0, Some(0)),
            Self::Save => (0, Some(0)),
            Self::Load => (0, Some(0)),
            Self::Info => (0, Some(0)),
            Self::Config => (1, None),
            Self::Select => (1, Some(1)),
            Self::Auth => (1, Some(1)),
            Self::Quit => (0, Some(0)),
        }
    }

    /// Whether an accepted invocation is appended to the AOF and replicated
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Set | Self::Del | Self::Flush)
    }

    /// Lower-case name for error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Echo => "echo",
            Self::Set => "set",
            Self::Get => "get",
            Self::Del => "del",
            Self::Exists => "exists",
            Self::Keys => "keys",
            Self::Flush => "flush",
            Self::Save => "save",
            Self::Load => "load",
            Self::Info => "info",
            Self::Config => "config",
            Self::Select => "select",
            Self::Auth => "auth",
            Self::Quit => "quit",
        }
    }
}

/// A decoded request: upper-cased verb plus argument strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub verb: String,
    pub args: Vec<String>,
}

impl CommandFrame {
    pub fn new(verb: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            verb: verb.into().to_ascii_uppercase(),
            args,
        }
    }

    /// Parse a whitespace-separated command line (AOF records and the
    /// replication stream use this form). Returns `None` for blank input.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next()?;
        Some(Self::new(verb, parts.map(str::to_string).collect()))
    }

    /// Canonical text form: `VERB ARG1 ARG2 ...`
    pub fn canonical_line(&self) -> String {
        let mut line = self.verb.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl TryFrom<Frame> for CommandFrame {
    type Error = TowerError;

    /// Extract a command from a top-level frame.
    ///
    /// Only an array of bulk strings is a valid request.
    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let children = match frame {
            Frame::Array(children) => children,
            other => {
                return Err(TowerError::Protocol(format!(
                    "expected array request, got {}",
                    frame_name(&other)
                )))
            }
        };

        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Frame::Bulk(data) => {
                    parts.push(String::from_utf8_lossy(&data).into_owned());
                }
                other => {
                    return Err(TowerError::Protocol(format!(
                        "expected bulk string element, got {}",
                        frame_name(&other)
                    )))
                }
            }
        }

        let mut parts = parts.into_iter();
        let verb = parts
            .next()
            .ok_or_else(|| TowerError::Protocol("empty command array".to_string()))?;
        Ok(Self::new(verb, parts.collect()))
    }
}

fn frame_name(frame: &Frame) -> &'static str {
    match frame {
        Frame::Simple(_) => "simple string",
        Frame::Error(_) => "error",
        Frame::Integer(_) => "integer",
        Frame::Bulk(_) => "bulk string",
        Frame::Null => "null",
        Frame::Array(_) => "array",
        Frame::NullArray => "null array",
    }
}
