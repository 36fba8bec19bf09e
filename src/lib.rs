//! # OpalKV Client
//!
//! Client driver for the OpalKV key-value server:
//! - Binary wire protocol over raw TCP with tagged response payloads
//! - Versioned handshake with per-connection client identifiers
//! - Strictly pipelined FIFO request/response correlation
//! - Backoff-driven reconnection after transient socket loss
//! - Long-lived watch subscriptions streaming key-change notifications
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────┐   execute()   ┌──────────────────────────────┐
//! │   Client   ├──────────────▶│          Connection          │
//! │  (or Pool) │               │  write ──▶ socket ──▶ server │
//! └─────┬──────┘               │  reader thread ◀── frames    │
//!       │                      │        │                     │
//!       │ watch()              │        ▼                     │
//!       │                      │  correlation queue (FIFO)    │
//!       ▼                      └──────────────────────────────┘
//! ┌────────────┐
//! │WatchSession│──▶ dedicated socket, push notifications
//! └────────────┘     fan out to registered listeners
//! ```
//!
//! The protocol carries no request identifier: a server answers commands
//! in send order, and the correlation queue resolves the Nth reply
//! against the Nth outstanding command. Each connection exclusively owns
//! its socket and queue; pool members and watch sessions run fully
//! independently.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod client;
pub mod id;
pub mod network;
pub mod pool;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::{Client, ExpireOptions, GetExOptions, SetOptions};
pub use config::Config;
pub use error::{ClientError, Result};
pub use network::{ConnState, Connection, Mode, SubscriptionHandle, WatchSession, WatchState};
pub use pool::Pool;
pub use protocol::{AttrValue, Command, CommandKind, Response, Value};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
