//! Command connection
//!
//! Owns one TCP socket: drives the handshake, writes serialized commands,
//! and runs a reader thread that decodes inbound frames and resolves
//! pending requests in FIFO order. An unexpected socket loss after the
//! handshake triggers backoff-driven reconnection.

use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::id::generate_client_id;
use crate::protocol::{codec, Command, CommandKind, Response};
use super::queue::CorrelationQueue;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

/// Handshake mode announced to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Normal request/response connection
    Command,
    /// Subscription socket for server-push notifications
    Watch,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Command => "command",
            Mode::Watch => "watch",
        }
    }
}

/// Double the reconnect delay up to the configured ceiling
pub(crate) fn next_delay(current: Duration, ceiling: Duration) -> Duration {
    (current * 2).min(ceiling)
}

/// Open a TCP socket and perform the handshake in the given mode.
///
/// Writes `HANDSHAKE <client-id> <mode>` with a freshly generated client
/// identifier and waits for the acknowledgement; any reply whose string
/// payload lacks the `OK` token, or no reply within the handshake
/// timeout, fails the dial and tears the socket down.
pub(crate) fn dial(config: &Config, mode: Mode) -> Result<TcpStream> {
    let stream = TcpStream::connect(config.addr())
        .map_err(|e| ClientError::Connection(format!("Failed to connect: {e}")))?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(config.handshake_timeout))?;

    let handshake = Command::with_args(
        CommandKind::Handshake,
        [generate_client_id(), mode.as_str().to_string()],
    );
    codec::write_command(&mut &stream, &handshake)
        .map_err(|e| ClientError::Connection(format!("Handshake write failed: {e}")))?;

    let ack = match codec::read_response(&mut &stream) {
        Ok(response) => response,
        Err(ClientError::Io(ref e))
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(ClientError::Connection(format!(
                "Handshake timed out after {}ms",
                config.handshake_timeout.as_millis()
            )));
        }
        Err(e) => {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(ClientError::Connection(format!("Handshake failed: {e}")));
        }
    };

    if !handshake_acknowledged(&ack) {
        let _ = stream.shutdown(Shutdown::Both);
        return Err(ClientError::Connection(format!(
            "Handshake responded with unexpected reply: {:?}",
            ack.value_str().unwrap_or_default()
        )));
    }

    stream.set_read_timeout(None)?;
    Ok(stream)
}

/// Success is any reply whose string payload contains the `OK` token
fn handshake_acknowledged(response: &Response) -> bool {
    !response.is_err()
        && response
            .value_str()
            .is_some_and(|ack| ack.contains("OK"))
}

struct Inner {
    state: ConnState,
    /// Write half of the socket; the reader thread holds its own clone
    stream: Option<TcpStream>,
    queue: CorrelationQueue,
    graceful_close: bool,
    attempts: u32,
    delay: Duration,
}

struct Shared {
    inner: Mutex<Inner>,
    error_tx: Sender<ClientError>,
}

/// A single client connection to the server
///
/// All queue state is mutated under one lock by exactly two parties: the
/// caller's write path and this connection's reader thread. Commands
/// resolve strictly in issue order.
pub struct Connection {
    config: Config,
    mode: Mode,
    shared: Arc<Shared>,
    error_rx: Receiver<ClientError>,
}

impl Connection {
    /// Create an unconnected connection in command mode
    pub fn new(config: Config) -> Self {
        Self::with_mode(config, Mode::Command)
    }

    pub(crate) fn with_mode(config: Config, mode: Mode) -> Self {
        let (error_tx, error_rx) = unbounded();
        let delay = config.reconnect_delay;
        Self {
            config,
            mode,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ConnState::Disconnected,
                    stream: None,
                    queue: CorrelationQueue::new(),
                    graceful_close: false,
                    attempts: 0,
                    delay,
                }),
                error_tx,
            }),
            error_rx,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnState {
        self.shared.inner.lock().state
    }

    /// Receiver for fatal asynchronous errors (reconnect exhaustion)
    pub fn errors(&self) -> Receiver<ClientError> {
        self.error_rx.clone()
    }

    /// Open the socket and perform the handshake.
    ///
    /// Only one handshake may be in flight; calling while already
    /// connecting or connected is a state error.
    pub fn connect(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                ConnState::Disconnected | ConnState::Closed => {}
                state => {
                    return Err(ClientError::State(format!(
                        "connect() called in state {state:?}"
                    )))
                }
            }
            inner.state = ConnState::Connecting;
            inner.graceful_close = false;
        }

        let result = self.dial_and_install();
        if result.is_err() {
            self.shared.inner.lock().state = ConnState::Disconnected;
        }
        result
    }

    fn dial_and_install(&self) -> Result<()> {
        self.shared.inner.lock().state = ConnState::Handshaking;
        let stream = dial(&self.config, self.mode)?;
        let reader = stream.try_clone()?;

        {
            let mut inner = self.shared.inner.lock();
            inner.stream = Some(stream);
            inner.state = ConnState::Ready;
            inner.attempts = 0;
            inner.delay = self.config.reconnect_delay;
        }

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let mode = self.mode;
        thread::Builder::new()
            .name("opalkv-reader".to_string())
            .spawn(move || reader_loop(shared, config, mode, reader))?;

        tracing::debug!(addr = %self.config.addr(), "Connection ready");
        Ok(())
    }

    /// Send one command and wait for its reply.
    ///
    /// Valid only while `Ready`. The pending handle is enqueued before
    /// the write; if the write fails locally the handle is removed and
    /// rejected immediately since no byte reached the wire. A server-side
    /// error string rejects with a command error.
    pub fn execute(&self, command: &Command) -> Result<Response> {
        let (tx, rx) = crossbeam::channel::bounded(1);
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != ConnState::Ready {
                return Err(ClientError::State(format!(
                    "execute() requires a ready connection (state {:?})",
                    inner.state
                )));
            }
            inner.queue.push_back(tx);

            let stream = match inner.stream.as_mut() {
                Some(stream) => stream,
                None => {
                    inner.queue.abandon_tail();
                    return Err(ClientError::State("Connection has no socket".to_string()));
                }
            };
            if let Err(e) = codec::write_command(stream, command) {
                inner.queue.abandon_tail();
                return Err(ClientError::Command(format!(
                    "Failed to perform {}: {e}",
                    command.kind
                )));
            }
        }

        match rx.recv() {
            Ok(result) => result,
            // Queue dropped without resolving: the connection went away.
            Err(_) => Err(ClientError::Connection(
                "Connection closed before a reply arrived".to_string(),
            )),
        }
    }

    /// Gracefully close the connection. Idempotent.
    ///
    /// Suppresses reconnection and fails any still-pending requests with
    /// a connection error; callers needing bounded latency on `execute()`
    /// must impose their own timeout.
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.state == ConnState::Closed && inner.graceful_close {
            return;
        }
        inner.graceful_close = true;
        inner.state = ConnState::Closing;
        if let Some(stream) = inner.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        inner
            .queue
            .fail_all(|| ClientError::Connection("Connection closed".to_string()));
        inner.state = ConnState::Closed;
        tracing::debug!("Connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Reader thread
// =============================================================================

fn reader_loop(shared: Arc<Shared>, config: Config, mode: Mode, mut stream: TcpStream) {
    loop {
        let frame = match codec::read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(ClientError::Io(err)) => {
                tracing::debug!(%err, "Socket read ended");
                match handle_disconnect(&shared, &config, mode) {
                    Some(reconnected) => stream = reconnected,
                    None => return,
                }
                continue;
            }
            Err(err) => {
                // A framing violation leaves the stream position unknown;
                // no later frame boundary can be trusted, so the socket is
                // dropped and the reconnect machine takes over.
                tracing::error!(%err, "Framing violation, dropping socket");
                let _ = stream.shutdown(Shutdown::Both);
                match handle_disconnect(&shared, &config, mode) {
                    Some(reconnected) => stream = reconnected,
                    None => return,
                }
                continue;
            }
        };
        match codec::decode_response(&frame) {
            Ok(response) => resolve_next(&shared, response),
            Err(err) => {
                // Decode failure is local to the frame that was consumed:
                // reject only the oldest pending request and keep reading.
                let pending = shared.inner.lock().queue.pop_front();
                match pending {
                    Some(tx) => {
                        let _ = tx.send(Err(err));
                    }
                    None => tracing::warn!(%err, "Discarding undecodable frame"),
                }
            }
        }
    }
}

/// Pop the oldest pending handle and fulfill it with this frame. A frame
/// with no pending request is a protocol anomaly: drop it, never fabricate
/// a match.
fn resolve_next(shared: &Shared, response: Response) {
    let pending = shared.inner.lock().queue.pop_front();
    match pending {
        Some(tx) => {
            let result = if response.is_err() {
                Err(ClientError::Command(response.err))
            } else {
                Ok(response)
            };
            let _ = tx.send(result);
        }
        None => tracing::warn!("Dropping frame with no pending request"),
    }
}

/// Reconnection state machine, run on the reader thread after an
/// unexpected socket loss. Returns the new reader stream on success, or
/// `None` when the thread should exit (graceful close or attempts
/// exhausted).
fn handle_disconnect(shared: &Arc<Shared>, config: &Config, mode: Mode) -> Option<TcpStream> {
    {
        let mut inner = shared.inner.lock();
        if inner.graceful_close || inner.state != ConnState::Ready {
            inner.state = ConnState::Closed;
            inner.stream = None;
            return None;
        }
        inner.state = ConnState::Disconnected;
        inner.stream = None;
        // Outstanding requests can never be matched on a new socket.
        inner.queue.fail_all(|| {
            ClientError::Connection("Connection lost before a reply arrived".to_string())
        });
    }

    loop {
        let delay;
        {
            let mut inner = shared.inner.lock();
            if inner.graceful_close {
                inner.state = ConnState::Closed;
                return None;
            }
            if inner.attempts >= config.max_reconnect_attempts {
                inner.state = ConnState::Closed;
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
            inner.state = ConnState::Connecting;
            tracing::debug!(attempt = inner.attempts, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        }

        thread::sleep(delay);

        match dial(config, mode).and_then(|s| Ok((s.try_clone()?, s))) {
            Ok((reader, writer)) => {
                let mut inner = shared.inner.lock();
                if inner.graceful_close {
                    let _ = writer.shutdown(Shutdown::Both);
                    inner.state = ConnState::Closed;
                    return None;
                }
                inner.stream = Some(writer);
                inner.state = ConnState::Ready;
                // A later transient blip gets the fast initial delay again.
                inner.attempts = 0;
                inner.delay = config.reconnect_delay;
                tracing::debug!("Reconnected");
                return Some(reader);
            }
            Err(err) => {
                let mut inner = shared.inner.lock();
                inner.state = ConnState::Disconnected;
                tracing::warn!(%err, "Reconnect attempt failed");
            }
        }
    }
}
