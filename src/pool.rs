//! Connection pool
//!
//! Holds N independently connected clients and fans each call to the
//! next one in round-robin order. The pool exposes the same operation
//! surface as a single client through an explicit interface; no ordering
//! guarantee is made across pool members.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::client::{Client, ExpireOptions, GetExOptions, SetOptions};
use crate::config::Config;
use crate::error::Result;
use crate::network::WatchSession;
use crate::protocol::{Command, Response};

/// Round-robin pool of independent client connections
pub struct Pool {
    clients: Vec<Client>,
    next: AtomicUsize,
}

impl Pool {
    /// Create an unconnected pool of `size` clients
    pub fn new(size: usize, config: Config) -> Self {
        let clients = (0..size.max(1))
            .map(|_| Client::new(config.clone()))
            .collect();
        Self {
            clients,
            next: AtomicUsize::new(0),
        }
    }

    /// Connect every client in the pool; fails on the first client that
    /// cannot complete its handshake.
    pub fn connect(&self) -> Result<()> {
        for client in &self.clients {
            client.connect()?;
        }
        Ok(())
    }

    /// Number of clients in the pool
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Next client in round-robin order
    fn client(&self) -> &Client {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        &self.clients[index]
    }

    pub fn execute(&self, command: &Command) -> Result<Response> {
        self.client().execute(command)
    }

    pub fn get(&self, key: &str) -> Result<Response> {
        self.client().get(key)
    }

    pub fn getdel(&self, key: &str) -> Result<Response> {
        self.client().getdel(key)
    }

    pub fn getex(&self, key: &str, options: &GetExOptions) -> Result<Response> {
        self.client().getex(key, options)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<Response> {
        self.client().set(key, value)
    }

    pub fn set_with_options(
        &self,
        key: &str,
        value: &str,
        options: &SetOptions,
    ) -> Result<Response> {
        self.client().set_with_options(key, value, options)
    }

    pub fn decr(&self, key: &str) -> Result<Response> {
        self.client().decr(key)
    }

    pub fn decr_by(&self, key: &str, delta: i64) -> Result<Response> {
        self.client().decr_by(key, delta)
    }

    pub fn incr(&self, key: &str) -> Result<Response> {
        self.client().incr(key)
    }

    pub fn incr_by(&self, key: &str, delta: i64) -> Result<Response> {
        self.client().incr_by(key, delta)
    }

    pub fn del(&self, keys: &[&str]) -> Result<Response> {
        self.client().del(keys)
    }

    pub fn exists(&self, keys: &[&str]) -> Result<Response> {
        self.client().exists(keys)
    }

    pub fn expire(&self, key: &str, seconds: u64) -> Result<Response> {
        self.client().expire(key, seconds)
    }

    pub fn expire_with_options(
        &self,
        key: &str,
        seconds: u64,
        options: &ExpireOptions,
    ) -> Result<Response> {
        self.client().expire_with_options(key, seconds, options)
    }

    pub fn expire_time(&self, key: &str) -> Result<Response> {
        self.client().expire_time(key)
    }

    pub fn flush(&self) -> Result<Response> {
        self.client().flush()
    }

    pub fn ttl(&self, key: &str) -> Result<Response> {
        self.client().ttl(key)
    }

    pub fn key_type(&self, key: &str) -> Result<Response> {
        self.client().key_type(key)
    }

    pub fn ping(&self) -> Result<Response> {
        self.client().ping()
    }

    /// Watch sessions get their own socket regardless of which pool
    /// member hands them out
    pub fn watch(&self, key: &str) -> Result<WatchSession> {
        self.client().watch(key)
    }

    /// Close every client in the pool
    pub fn close(&self) {
        for client in &self.clients {
            client.close();
        }
    }
}
