//! Protocol Module
//!
//! RESP wire protocol: streaming frame parser, serializer, and command
//! extraction.
//!
//! ## Frame types
//! ```text
//! +OK\r\n                  simple string
//! -ERR message\r\n         error
//! :1000\r\n                integer
//! $5\r\nhello\r\n          bulk string ($-1\r\n encodes null)
//! *2\r\n<frame><frame>     array (*-1\r\n encodes null array)
//! ```
//!
//! A request is an array of bulk strings: the verb followed by its
//! arguments. `SET 1 hello` arrives as
//! `*3\r\n$3\r\nSET\r\n$1\r\n1\r\n$5\r\nhello\r\n`.

mod command;
mod frame;

pub use command::{CommandFrame, CommandKind};
pub use frame::{is_valid_tag, Frame, FrameError};
