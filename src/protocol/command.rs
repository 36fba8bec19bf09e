//! Command definitions
//!
//! Represents commands sent to the server. A command is its wire name plus
//! an ordered list of string arguments; argument shaping lives in the
//! client layer.

use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

/// Wire names of the supported commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Get,
    GetDel,
    GetEx,
    Set,
    Decr,
    DecrBy,
    Incr,
    IncrBy,
    Del,
    Exists,
    Expire,
    ExpireTime,
    FlushDb,
    Ttl,
    Type,
    GetWatch,
    Unwatch,
    Handshake,
    Ping,
}

impl CommandKind {
    /// The exact name written on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Get => "GET",
            CommandKind::GetDel => "GETDEL",
            CommandKind::GetEx => "GETEX",
            CommandKind::Set => "SET",
            CommandKind::Decr => "DECR",
            CommandKind::DecrBy => "DECRBY",
            CommandKind::Incr => "INCR",
            CommandKind::IncrBy => "INCRBY",
            CommandKind::Del => "DEL",
            CommandKind::Exists => "EXISTS",
            CommandKind::Expire => "EXPIRE",
            CommandKind::ExpireTime => "EXPIRETIME",
            CommandKind::FlushDb => "FLUSHDB",
            CommandKind::Ttl => "TTL",
            CommandKind::Type => "TYPE",
            CommandKind::GetWatch => "GET.WATCH",
            CommandKind::Unwatch => "UNWATCH",
            CommandKind::Handshake => "HANDSHAKE",
            CommandKind::Ping => "PING",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(CommandKind::Get),
            "GETDEL" => Ok(CommandKind::GetDel),
            "GETEX" => Ok(CommandKind::GetEx),
            "SET" => Ok(CommandKind::Set),
            "DECR" => Ok(CommandKind::Decr),
            "DECRBY" => Ok(CommandKind::DecrBy),
            "INCR" => Ok(CommandKind::Incr),
            "INCRBY" => Ok(CommandKind::IncrBy),
            "DEL" => Ok(CommandKind::Del),
            "EXISTS" => Ok(CommandKind::Exists),
            "EXPIRE" => Ok(CommandKind::Expire),
            "EXPIRETIME" => Ok(CommandKind::ExpireTime),
            "FLUSHDB" => Ok(CommandKind::FlushDb),
            "TTL" => Ok(CommandKind::Ttl),
            "TYPE" => Ok(CommandKind::Type),
            "GET.WATCH" => Ok(CommandKind::GetWatch),
            "UNWATCH" => Ok(CommandKind::Unwatch),
            "HANDSHAKE" => Ok(CommandKind::Handshake),
            "PING" => Ok(CommandKind::Ping),
            other => Err(ClientError::Protocol(format!(
                "Unknown command name: {other}"
            ))),
        }
    }
}

/// A command ready to serialize
///
/// Immutable once built; lives only for the duration of one encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command name
    pub kind: CommandKind,

    /// Ordered string arguments
    pub args: Vec<String>,
}

impl Command {
    /// Build a command with no arguments
    pub fn new(kind: CommandKind) -> Self {
        Self { kind, args: Vec::new() }
    }

    /// Build a command with the given arguments
    pub fn with_args<I, S>(kind: CommandKind, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}
