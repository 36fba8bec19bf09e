//! Network Module
//!
//! Connection lifecycle, request/response correlation, and the watch
//! subscription channel. Each connection exclusively owns one TCP socket
//! and one correlation queue; independent connections share no mutable
//! state and may proceed in parallel.

mod queue;
pub mod connection;
pub mod watch;

pub use connection::{ConnState, Connection, Mode};
pub use watch::{SubscriptionHandle, WatchSession, WatchState};
