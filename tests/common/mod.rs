//! Shared test support: an in-process OpalKV server speaking the crate's
//! own codec, plus small scripted servers for failure scenarios.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use opalkv::protocol::{
    read_command, write_response, AttrValue, Command, CommandKind, Response, Value,
};
use opalkv::Config;

/// Fingerprint the fake server assigns to every watch subscription
pub const FINGERPRINT: &str = "2930774573";

fn str_response(s: &str) -> Response {
    Response {
        value: Some(Value::Str(s.to_string())),
        ..Default::default()
    }
}

fn int_response(i: i64) -> Response {
    Response {
        value: Some(Value::Int(i)),
        ..Default::default()
    }
}

fn nil_response() -> Response {
    Response {
        value: Some(Value::Nil),
        ..Default::default()
    }
}

fn err_response(message: &str) -> Response {
    Response {
        err: message.to_string(),
        ..Default::default()
    }
}

fn notification(value: &str) -> Response {
    let mut attrs = std::collections::BTreeMap::new();
    attrs.insert(
        "fingerprint".to_string(),
        AttrValue::Str(FINGERPRINT.to_string()),
    );
    Response {
        value: Some(Value::Str(value.to_string())),
        attrs: Some(attrs),
        ..Default::default()
    }
}

/// Minimal in-process key-value server
pub struct KvServer {
    pub addr: SocketAddr,
    /// Every decoded command, handshakes included, in arrival order
    pub commands: Arc<Mutex<Vec<Command>>>,
    /// Number of accepted connections
    pub accepts: Arc<AtomicUsize>,
}

impl KvServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let store: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
        let watchers: Arc<Mutex<Vec<(String, TcpStream)>>> = Arc::new(Mutex::new(Vec::new()));
        let commands: Arc<Mutex<Vec<Command>>> = Arc::new(Mutex::new(Vec::new()));
        let accepts = Arc::new(AtomicUsize::new(0));

        {
            let store = Arc::clone(&store);
            let watchers = Arc::clone(&watchers);
            let commands = Arc::clone(&commands);
            let accepts = Arc::clone(&accepts);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(_) => return,
                    };
                    accepts.fetch_add(1, Ordering::SeqCst);
                    let store = Arc::clone(&store);
                    let watchers = Arc::clone(&watchers);
                    let commands = Arc::clone(&commands);
                    thread::spawn(move || handle_conn(stream, store, watchers, commands));
                }
            });
        }

        Self {
            addr,
            commands,
            accepts,
        }
    }

    /// Client config pointed at this server, with short test timeouts
    pub fn config(&self) -> Config {
        Config::builder()
            .host("127.0.0.1")
            .port(self.addr.port())
            .handshake_timeout(Duration::from_secs(2))
            .reconnect_delay(Duration::from_millis(50))
            .max_reconnect_delay(Duration::from_millis(200))
            .max_reconnect_attempts(3)
            .build()
    }

    pub fn accept_count(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Snapshot of commands of the given kind
    pub fn commands_of(&self, kind: CommandKind) -> Vec<Command> {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }
}

fn handle_conn(
    stream: TcpStream,
    store: Arc<Mutex<HashMap<String, String>>>,
    watchers: Arc<Mutex<Vec<(String, TcpStream)>>>,
    commands: Arc<Mutex<Vec<Command>>>,
) {
    let mut reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(_) => return,
    };

    let handshake = match read_command(&mut reader) {
        Ok(cmd) => cmd,
        Err(_) => return,
    };
    let mode = handshake.args.get(1).cloned().unwrap_or_default();
    commands.lock().push(handshake);
    if write_response(&mut &stream, &str_response("OK")).is_err() {
        return;
    }

    if mode == "watch" {
        loop {
            let cmd = match read_command(&mut reader) {
                Ok(cmd) => cmd,
                Err(_) => return,
            };
            commands.lock().push(cmd.clone());
            if cmd.kind == CommandKind::GetWatch {
                if let (Some(key), Ok(push)) = (cmd.args.first(), stream.try_clone()) {
                    watchers.lock().push((key.clone(), push));
                }
            }
        }
    }

    loop {
        let cmd = match read_command(&mut reader) {
            Ok(cmd) => cmd,
            Err(_) => return,
        };
        commands.lock().push(cmd.clone());
        let response = apply(&cmd, &store);
        if write_response(&mut &stream, &response).is_err() {
            return;
        }
        if cmd.kind == CommandKind::Set {
            if let (Some(key), Some(value)) = (cmd.args.first(), cmd.args.get(1)) {
                let mut watchers = watchers.lock();
                for (watched, push) in watchers.iter_mut() {
                    if watched == key {
                        let _ = write_response(push, &notification(value));
                    }
                }
            }
        }
    }
}

fn apply(cmd: &Command, store: &Mutex<HashMap<String, String>>) -> Response {
    let mut store = store.lock();
    let arg = |i: usize| cmd.args.get(i).cloned().unwrap_or_default();
    match cmd.kind {
        CommandKind::Set => {
            store.insert(arg(0), arg(1));
            str_response("OK")
        }
        CommandKind::Get => match store.get(&arg(0)) {
            Some(value) => str_response(value),
            None => nil_response(),
        },
        CommandKind::GetDel => match store.remove(&arg(0)) {
            Some(value) => str_response(&value),
            None => nil_response(),
        },
        CommandKind::Incr | CommandKind::IncrBy | CommandKind::Decr | CommandKind::DecrBy => {
            let delta: i64 = match cmd.kind {
                CommandKind::Incr => 1,
                CommandKind::Decr => -1,
                CommandKind::IncrBy => arg(1).parse().unwrap_or(0),
                _ => -arg(1).parse().unwrap_or(0),
            };
            let current: i64 = store
                .get(&arg(0))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let next = current + delta;
            store.insert(arg(0), next.to_string());
            int_response(next)
        }
        CommandKind::Del => {
            let removed = cmd.args.iter().filter(|k| store.remove(*k).is_some()).count();
            int_response(removed as i64)
        }
        CommandKind::Exists => {
            let found = cmd.args.iter().filter(|k| store.contains_key(*k)).count();
            int_response(found as i64)
        }
        CommandKind::FlushDb => {
            store.clear();
            str_response("OK")
        }
        CommandKind::Ping => str_response("PONG"),
        _ => err_response("ERR unsupported command"),
    }
}

/// Server that answers the handshake with the given reply string and then
/// closes the connection
pub fn handshake_reply_server(reply: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            let mut reader = match stream.try_clone() {
                Ok(reader) => reader,
                Err(_) => return,
            };
            if read_command(&mut reader).is_ok() {
                let _ = write_response(&mut &stream, &str_response(reply));
            }
        }
    });
    addr
}

/// Server that accepts one connection and never answers the handshake
pub fn silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            // Hold the socket open so the client hits its handshake timeout.
            thread::sleep(Duration::from_secs(10));
            drop(stream);
        }
    });
    addr
}

/// Poll until `predicate` holds or the timeout elapses
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    predicate()
}
