//! Watch session
//!
//! A dedicated subscription socket. It performs the same handshake as a
//! command connection but in `watch` mode, issues a single `GET.WATCH`
//! subscribe, and then treats every inbound frame as a push notification
//! rather than a call reply. The server assigns each subscription a
//! fingerprint, delivered inside notification attributes; it is cached
//! from the first notification and required to issue a clean `UNWATCH`.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::protocol::{codec, AttrValue, Command, CommandKind, Response, Value};
use super::connection::{dial, next_delay, Mode};

/// Watch session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Connecting,
    /// Handshake completed, awaiting `subscribe()`
    Handshaking,
    Subscribed,
    Unsubscribing,
    Closed,
}

/// Handle returned by [`WatchSession::register_listener`], used to detach
/// that listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

struct WatchInner {
    state: WatchState,
    stream: Option<TcpStream>,
    /// Key passed to `subscribe()`, remembered for resubscription
    key: Option<String>,
    /// Server-assigned subscription fingerprint, cached from the first
    /// pushed notification
    fingerprint: Option<String>,
    graceful_close: bool,
    attempts: u32,
    delay: Duration,
}

struct WatchShared {
    inner: Mutex<WatchInner>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    error_tx: Sender<ClientError>,
}

/// A server-push subscription for one key
pub struct WatchSession {
    config: Config,
    shared: Arc<WatchShared>,
    error_rx: Receiver<ClientError>,
}

impl WatchSession {
    /// Create an idle watch session
    pub fn new(config: Config) -> Self {
        let (error_tx, error_rx) = unbounded();
        let delay = config.reconnect_delay;
        Self {
            config,
            shared: Arc::new(WatchShared {
                inner: Mutex::new(WatchInner {
                    state: WatchState::Idle,
                    stream: None,
                    key: None,
                    fingerprint: None,
                    graceful_close: false,
                    attempts: 0,
                    delay,
                }),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                error_tx,
            }),
            error_rx,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> WatchState {
        self.shared.inner.lock().state
    }

    /// Fingerprint learned from the first notification, if any yet
    pub fn fingerprint(&self) -> Option<String> {
        self.shared.inner.lock().fingerprint.clone()
    }

    /// Receiver for fatal asynchronous errors (reconnect exhaustion)
    pub fn errors(&self) -> Receiver<ClientError> {
        self.error_rx.clone()
    }

    /// Open the socket and handshake in `watch` mode
    pub fn connect(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                WatchState::Idle | WatchState::Closed => {}
                state => {
                    return Err(ClientError::State(format!(
                        "connect() called in state {state:?}"
                    )))
                }
            }
            inner.state = WatchState::Connecting;
            inner.graceful_close = false;
        }

        let result = self.dial_and_install();
        if result.is_err() {
            self.shared.inner.lock().state = WatchState::Idle;
        }
        result
    }

    fn dial_and_install(&self) -> Result<()> {
        let stream = dial(&self.config, Mode::Watch)?;
        let reader = stream.try_clone()?;

        {
            let mut inner = self.shared.inner.lock();
            inner.stream = Some(stream);
            inner.state = WatchState::Handshaking;
            inner.attempts = 0;
            inner.delay = self.config.reconnect_delay;
        }

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        thread::Builder::new()
            .name("opalkv-watch".to_string())
            .spawn(move || watch_loop(shared, config, reader))?;

        tracing::debug!(addr = %self.config.addr(), "Watch session handshaken");
        Ok(())
    }

    /// Subscribe to change notifications for `key`.
    ///
    /// Fire-and-acknowledge: the write either fails locally and rejects,
    /// or the session is considered subscribed without waiting for a
    /// reply. Every subsequent frame is delivered as a notification.
    pub fn subscribe(&self, key: &str) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != WatchState::Handshaking {
            return Err(ClientError::State(format!(
                "subscribe() requires a handshaken watch session (state {:?})",
                inner.state
            )));
        }
        let stream = match inner.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(ClientError::State("Watch session has no socket".to_string())),
        };

        let command = Command::with_args(CommandKind::GetWatch, [key]);
        codec::write_command(stream, &command).map_err(|e| {
            ClientError::Command(format!("Failed to perform GET.WATCH: {e}"))
        })?;

        inner.key = Some(key.to_string());
        inner.state = WatchState::Subscribed;
        tracing::debug!(key, "Watch subscription issued");
        Ok(())
    }

    /// Attach a notification listener; values are delivered in arrival
    /// order, synchronously with respect to other notifications. Delivery
    /// runs against a snapshot of the registry, so a listener may call
    /// `unregister` or `unsubscribe` from inside its own callback.
    pub fn register_listener<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().push((id, Arc::new(callback)));
        SubscriptionHandle(id)
    }

    /// Detach a previously registered listener
    pub fn unregister(&self, handle: SubscriptionHandle) {
        self.shared
            .listeners
            .lock()
            .retain(|(id, _)| *id != handle.0);
    }

    /// Cancel the subscription and close the session.
    ///
    /// Writes `UNWATCH <fingerprint>` when subscribed and a fingerprint
    /// has been learned, detaches all listeners, and ends the socket
    /// gracefully so the reconnection path stays suppressed. Idempotent.
    pub fn unsubscribe(&self) -> Result<()> {
        let mut write_result = Ok(());
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == WatchState::Closed {
                return Ok(());
            }
            inner.graceful_close = true;

            if inner.state == WatchState::Subscribed {
                inner.state = WatchState::Unsubscribing;
                let fingerprint = inner.fingerprint.clone();
                if let (Some(fingerprint), Some(stream)) = (fingerprint, inner.stream.as_mut()) {
                    let command = Command::with_args(CommandKind::Unwatch, [fingerprint]);
                    write_result = codec::write_command(stream, &command).map_err(|e| {
                        ClientError::Command(format!("Failed to perform UNWATCH: {e}"))
                    });
                }
            }

            if let Some(stream) = inner.stream.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            inner.state = WatchState::Closed;
        }
        self.shared.listeners.lock().clear();
        tracing::debug!("Watch session closed");
        write_result
    }

    /// Alias for [`WatchSession::unsubscribe`]
    pub fn close(&self) -> Result<()> {
        self.unsubscribe()
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}

// =============================================================================
// Notification loop
// =============================================================================

fn watch_loop(shared: Arc<WatchShared>, config: Config, mut stream: TcpStream) {
    loop {
        let frame = match codec::read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(ClientError::Io(err)) => {
                tracing::debug!(%err, "Watch socket read ended");
                match handle_watch_disconnect(&shared, &config) {
                    Some(reconnected) => stream = reconnected,
                    None => return,
                }
                continue;
            }
            Err(err) => {
                // A framing violation leaves the stream position unknown:
                // drop the socket and let the reconnect machine take over.
                tracing::error!(%err, "Framing violation on watch socket");
                let _ = stream.shutdown(Shutdown::Both);
                match handle_watch_disconnect(&shared, &config) {
                    Some(reconnected) => stream = reconnected,
                    None => return,
                }
                continue;
            }
        };
        match codec::decode_response(&frame) {
            Ok(response) => deliver(&shared, response),
            // No request queue here: an undecodable push is dropped.
            Err(err) => tracing::warn!(%err, "Discarding undecodable watch frame"),
        }
    }
}

/// Deliver one pushed notification: cache the fingerprint on first sight,
/// then fan the payload value out to every listener in arrival order.
fn deliver(shared: &WatchShared, response: Response) {
    {
        let mut inner = shared.inner.lock();
        if inner.state != WatchState::Subscribed {
            tracing::warn!("Dropping frame on unsubscribed watch socket");
            return;
        }
        if inner.fingerprint.is_none() {
            inner.fingerprint = extract_fingerprint(&response);
            if let Some(fp) = &inner.fingerprint {
                tracing::debug!(fingerprint = %fp, "Cached subscription fingerprint");
            }
        }
    }

    let value = match response.value {
        Some(value) => value,
        None => return,
    };
    // Snapshot before invoking: no registry lock is held during callbacks,
    // so a listener may detach itself or close the session.
    let listeners: Vec<Listener> = shared
        .listeners
        .lock()
        .iter()
        .map(|(_, listener)| Arc::clone(listener))
        .collect();
    for listener in listeners {
        listener(&value);
    }
}

/// Pull the subscription fingerprint out of notification attributes
fn extract_fingerprint(response: &Response) -> Option<String> {
    match response.attr("fingerprint")? {
        AttrValue::Str(s) => Some(s.clone()),
        // The server encodes the fingerprint as a number inside the
        // attribute struct; it is used verbatim as an UNWATCH argument.
        AttrValue::Float(f) => Some((*f as u64).to_string()),
        _ => None,
    }
}

/// Watch-side reconnection: same backoff policy as a command connection.
/// On success the subscribe command is re-issued for the remembered key
/// when the config asks for it; otherwise the session stays handshaken
/// and silent until the caller subscribes again.
fn handle_watch_disconnect(shared: &Arc<WatchShared>, config: &Config) -> Option<TcpStream> {
    {
        let mut inner = shared.inner.lock();
        if inner.graceful_close || inner.state != WatchState::Subscribed {
            inner.state = WatchState::Closed;
            inner.stream = None;
            return None;
        }
        inner.state = WatchState::Connecting;
        inner.stream = None;
        // The old subscription died with the socket.
        inner.fingerprint = None;
    }

    loop {
        let delay;
        {
            let mut inner = shared.inner.lock();
            if inner.graceful_close {
                inner.state = WatchState::Closed;
                return None;
            }
            if inner.attempts >= config.max_reconnect_attempts {
                inner.state = WatchState::Closed;
                drop(inner);
                let _ = shared.error_tx.send(ClientError::Connection(format!(
                    "Failed to reconnect after {} tries",
                    config.max_reconnect_attempts
                )));
                return None;
            }
            inner.attempts += 1;
            delay = inner.delay;
            inner.delay = next_delay(inner.delay, config.max_reconnect_delay);
            tracing::debug!(attempt = inner.attempts, delay_ms = delay.as_millis() as u64, "Scheduling watch reconnect");
        }

        thread::sleep(delay);

        match dial(config, Mode::Watch).and_then(|s| Ok((s.try_clone()?, s))) {
            Ok((reader, mut writer)) => {
                let mut inner = shared.inner.lock();
                if inner.graceful_close {
                    let _ = writer.shutdown(Shutdown::Both);
                    inner.state = WatchState::Closed;
                    return None;
                }
                inner.attempts = 0;
                inner.delay = config.reconnect_delay;
                inner.state = WatchState::Handshaking;

                let key = inner.key.clone();
                if config.resubscribe_on_reconnect {
                    if let Some(key) = key {
                        let command = Command::with_args(CommandKind::GetWatch, [key.as_str()]);
                        match codec::write_command(&mut writer, &command) {
                            Ok(()) => {
                                inner.state = WatchState::Subscribed;
                                tracing::debug!(key = %key, "Resubscribed after reconnect");
                            }
                            Err(err) => {
                                tracing::warn!(%err, "Resubscribe failed after reconnect");
                            }
                        }
                    }
                } else {
                    tracing::warn!(
                        "Watch session reconnected without resubscribing; \
                         no notifications until subscribe() is called again"
                    );
                }

                inner.stream = Some(writer);
                return Some(reader);
            }
            Err(err) => {
                tracing::warn!(%err, "Watch reconnect attempt failed");
            }
        }
    }
}
