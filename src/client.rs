//! Client command surface
//!
//! Per-command convenience wrappers over a single [`Connection`]:
//! argument shaping from typed option structs to the trailing protocol
//! arguments, plus the entry point for opening a watch session.

use crate::config::Config;
use crate::error::Result;
use crate::network::{ConnState, Connection, WatchSession};
use crate::protocol::{Command, CommandKind, Response};

/// Options for `SET`
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Expire after this many seconds (`EX`)
    pub ex: Option<u64>,
    /// Expire after this many milliseconds (`PX`)
    pub px: Option<u64>,
    /// Expire at this Unix time in seconds (`EXAT`)
    pub exat: Option<u64>,
    /// Expire at this Unix time in milliseconds (`PXAT`)
    pub pxat: Option<u64>,
    /// Only set if the key already exists (`XX`)
    pub if_exists: bool,
    /// Only set if the key does not exist (`NX`)
    pub if_not_exists: bool,
    /// Keep the key's existing TTL (`KEEPTTL`)
    pub keep_ttl: bool,
    /// Return the previous value (`GET`)
    pub get: bool,
}

impl SetOptions {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ex) = self.ex {
            args.push("EX".to_string());
            args.push(ex.to_string());
        }
        if let Some(px) = self.px {
            args.push("PX".to_string());
            args.push(px.to_string());
        }
        if let Some(exat) = self.exat {
            args.push("EXAT".to_string());
            args.push(exat.to_string());
        }
        if let Some(pxat) = self.pxat {
            args.push("PXAT".to_string());
            args.push(pxat.to_string());
        }
        if self.if_exists {
            args.push("XX".to_string());
        }
        if self.if_not_exists {
            args.push("NX".to_string());
        }
        if self.keep_ttl {
            args.push("KEEPTTL".to_string());
        }
        if self.get {
            args.push("GET".to_string());
        }
        args
    }
}

/// Options for `GETEX`
#[derive(Debug, Clone, Default)]
pub struct GetExOptions {
    /// Expire after this many seconds (`EX`)
    pub ex: Option<u64>,
    /// Expire after this many milliseconds (`PX`)
    pub px: Option<u64>,
    /// Expire at this Unix time in seconds (`EXAT`)
    pub exat: Option<u64>,
    /// Expire at this Unix time in milliseconds (`PXAT`)
    pub pxat: Option<u64>,
    /// Remove the key's expiration (`PERSIST`)
    pub persist: bool,
}

impl GetExOptions {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ex) = self.ex {
            args.push("EX".to_string());
            args.push(ex.to_string());
        }
        if let Some(px) = self.px {
            args.push("PX".to_string());
            args.push(px.to_string());
        }
        if let Some(exat) = self.exat {
            args.push("EXAT".to_string());
            args.push(exat.to_string());
        }
        if let Some(pxat) = self.pxat {
            args.push("PXAT".to_string());
            args.push(pxat.to_string());
        }
        if self.persist {
            args.push("PERSIST".to_string());
        }
        args
    }
}

/// Options for `EXPIRE`
#[derive(Debug, Clone, Default)]
pub struct ExpireOptions {
    /// Only when the key already has an expiration (`XX`); without this
    /// the command defaults to `NX` (only when it has none)
    pub if_exists: bool,
    /// Only when the new expiry is greater than the current one (`GT`)
    pub gt: Option<u64>,
    /// Only when the new expiry is less than the current one (`LT`)
    pub lt: Option<u64>,
}

impl ExpireOptions {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.if_exists {
            args.push("XX".to_string());
        } else {
            args.push("NX".to_string());
        }
        // GT and LT are mutually exclusive; the last one set wins.
        if let Some(gt) = self.gt {
            args.push("GT".to_string());
            args.push(gt.to_string());
        } else if let Some(lt) = self.lt {
            args.push("LT".to_string());
            args.push(lt.to_string());
        }
        args
    }
}

/// A connected OpalKV client
///
/// Thin command layer over one [`Connection`]; every method is a
/// blocking round trip resolving in issue order.
pub struct Client {
    config: Config,
    conn: Connection,
}

impl Client {
    /// Create an unconnected client
    pub fn new(config: Config) -> Self {
        let conn = Connection::new(config.clone());
        Self { config, conn }
    }

    /// Open the socket and perform the command-mode handshake
    pub fn connect(&self) -> Result<()> {
        self.conn.connect()
    }

    /// Current connection state
    pub fn state(&self) -> ConnState {
        self.conn.state()
    }

    /// Receiver for fatal asynchronous connection errors
    pub fn errors(&self) -> crossbeam::channel::Receiver<crate::error::ClientError> {
        self.conn.errors()
    }

    /// Send a raw command
    pub fn execute(&self, command: &Command) -> Result<Response> {
        self.conn.execute(command)
    }

    /// Get the value of a key; nil payload if the key does not exist
    pub fn get(&self, key: &str) -> Result<Response> {
        self.execute(&Command::with_args(CommandKind::Get, [key]))
    }

    /// Get the value of a key and delete it
    pub fn getdel(&self, key: &str) -> Result<Response> {
        self.execute(&Command::with_args(CommandKind::GetDel, [key]))
    }

    /// Get the value of a key and adjust its expiration
    pub fn getex(&self, key: &str, options: &GetExOptions) -> Result<Response> {
        let mut args = vec![key.to_string()];
        args.extend(options.to_args());
        self.execute(&Command::with_args(CommandKind::GetEx, args))
    }

    /// Set a key to a value. The server acknowledges with `OK`, not the
    /// stored value.
    pub fn set(&self, key: &str, value: &str) -> Result<Response> {
        self.execute(&Command::with_args(CommandKind::Set, [key, value]))
    }

    /// Set a key to a value with expiration/conditional options
    pub fn set_with_options(
        &self,
        key: &str,
        value: &str,
        options: &SetOptions,
    ) -> Result<Response> {
        let mut args = vec![key.to_string(), value.to_string()];
        args.extend(options.to_args());
        self.execute(&Command::with_args(CommandKind::Set, args))
    }

    /// Decrement a key by 1; a missing key starts from 0
    pub fn decr(&self, key: &str) -> Result<Response> {
        self.execute(&Command::with_args(CommandKind::Decr, [key]))
    }

    /// Decrement a key by `delta`
    pub fn decr_by(&self, key: &str, delta: i64) -> Result<Response> {
        self.execute(&Command::with_args(
            CommandKind::DecrBy,
            [key.to_string(), delta.to_string()],
        ))
    }

    /// Increment a key by 1; a missing key starts from 0
    pub fn incr(&self, key: &str) -> Result<Response> {
        self.execute(&Command::with_args(CommandKind::Incr, [key]))
    }

    /// Increment a key by `delta`
    pub fn incr_by(&self, key: &str, delta: i64) -> Result<Response> {
        self.execute(&Command::with_args(
            CommandKind::IncrBy,
            [key.to_string(), delta.to_string()],
        ))
    }

    /// Delete keys; the integer payload is the number of keys removed
    pub fn del(&self, keys: &[&str]) -> Result<Response> {
        self.execute(&Command::with_args(CommandKind::Del, keys.iter().copied()))
    }

    /// Count how many of the given keys exist
    pub fn exists(&self, keys: &[&str]) -> Result<Response> {
        self.execute(&Command::with_args(
            CommandKind::Exists,
            keys.iter().copied(),
        ))
    }

    /// Set a key's expiration in seconds (defaults to `NX` semantics)
    pub fn expire(&self, key: &str, seconds: u64) -> Result<Response> {
        self.expire_with_options(key, seconds, &ExpireOptions::default())
    }

    /// Set a key's expiration with explicit conditions
    pub fn expire_with_options(
        &self,
        key: &str,
        seconds: u64,
        options: &ExpireOptions,
    ) -> Result<Response> {
        let mut args = vec![key.to_string(), seconds.to_string()];
        args.extend(options.to_args());
        self.execute(&Command::with_args(CommandKind::Expire, args))
    }

    /// Unix time at which the key expires
    pub fn expire_time(&self, key: &str) -> Result<Response> {
        self.execute(&Command::with_args(CommandKind::ExpireTime, [key]))
    }

    /// Delete every key in the database
    pub fn flush(&self) -> Result<Response> {
        self.execute(&Command::new(CommandKind::FlushDb))
    }

    /// Remaining time to live of a key, in seconds
    pub fn ttl(&self, key: &str) -> Result<Response> {
        self.execute(&Command::with_args(CommandKind::Ttl, [key]))
    }

    /// Type of the value stored at a key
    pub fn key_type(&self, key: &str) -> Result<Response> {
        self.execute(&Command::with_args(CommandKind::Type, [key]))
    }

    /// Health check
    pub fn ping(&self) -> Result<Response> {
        self.execute(&Command::new(CommandKind::Ping))
    }

    /// Open a dedicated watch session and subscribe to `key`.
    ///
    /// The session runs on its own socket; command traffic on this client
    /// and notifications on the session proceed independently.
    pub fn watch(&self, key: &str) -> Result<WatchSession> {
        let session = WatchSession::new(self.config.clone());
        session.connect()?;
        session.subscribe(key)?;
        Ok(session)
    }

    /// Gracefully close the connection. Idempotent.
    pub fn close(&self) {
        self.conn.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_options_shape_in_declaration_order() {
        let opts = SetOptions {
            ex: Some(10),
            if_not_exists: true,
            get: true,
            ..Default::default()
        };
        assert_eq!(opts.to_args(), vec!["EX", "10", "NX", "GET"]);
    }

    #[test]
    fn expire_defaults_to_nx() {
        assert_eq!(ExpireOptions::default().to_args(), vec!["NX"]);

        let opts = ExpireOptions {
            if_exists: true,
            gt: Some(100),
            ..Default::default()
        };
        assert_eq!(opts.to_args(), vec!["XX", "GT", "100"]);
    }

    #[test]
    fn getex_persist_is_bare_flag() {
        let opts = GetExOptions {
            persist: true,
            ..Default::default()
        };
        assert_eq!(opts.to_args(), vec!["PERSIST"]);
    }
}
