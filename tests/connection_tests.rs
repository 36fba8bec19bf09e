//! Connection Tests
//!
//! Handshake, FIFO correlation, graceful close, and reconnection
//! behavior against an in-process server.

mod common;

use std::net::{Shutdown, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use opalkv::protocol::{read_command, write_response, Response, Value};
use opalkv::{Client, ClientError, Config, ConnState};

use common::{handshake_reply_server, silent_server, wait_until, KvServer};

fn short_config(port: u16) -> Config {
    Config::builder()
        .host("127.0.0.1")
        .port(port)
        .handshake_timeout(Duration::from_millis(300))
        .reconnect_delay(Duration::from_millis(50))
        .max_reconnect_delay(Duration::from_millis(200))
        .max_reconnect_attempts(2)
        .build()
}

// =============================================================================
// Handshake Tests
// =============================================================================

#[test]
fn test_connect_performs_handshake() {
    let server = KvServer::start();
    let client = Client::new(server.config());

    client.connect().unwrap();
    assert_eq!(client.state(), ConnState::Ready);

    let handshakes = server.commands_of(opalkv::CommandKind::Handshake);
    assert_eq!(handshakes.len(), 1);
    assert_eq!(handshakes[0].args.len(), 2);
    assert!(!handshakes[0].args[0].is_empty());
    assert_eq!(handshakes[0].args[1], "command");

    client.close();
}

#[test]
fn test_execute_before_connect_fails_fast() {
    let server = KvServer::start();
    let client = Client::new(server.config());

    match client.ping() {
        Err(ClientError::State(_)) => {}
        other => panic!("Expected state error, got {other:?}"),
    }
}

#[test]
fn test_handshake_rejected_by_server() {
    let addr = handshake_reply_server("NOPE");
    let client = Client::new(short_config(addr.port()));

    match client.connect() {
        Err(ClientError::Connection(_)) => {}
        other => panic!("Expected connection error, got {other:?}"),
    }
    assert_eq!(client.state(), ConnState::Disconnected);
}

#[test]
fn test_handshake_timeout_tears_down() {
    let addr = silent_server();
    let client = Client::new(short_config(addr.port()));

    let start = Instant::now();
    match client.connect() {
        Err(ClientError::Connection(msg)) => assert!(msg.contains("timed out"), "{msg}"),
        other => panic!("Expected connection error, got {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_connect_twice_is_a_state_error() {
    let server = KvServer::start();
    let client = Client::new(server.config());
    client.connect().unwrap();

    match client.connect() {
        Err(ClientError::State(_)) => {}
        other => panic!("Expected state error, got {other:?}"),
    }
    client.close();
}

// =============================================================================
// Command Scenarios
// =============================================================================

#[test]
fn test_set_then_get_scenario() {
    let server = KvServer::start();
    let client = Client::new(server.config());
    client.connect().unwrap();

    // SET acknowledges with OK, never the stored value.
    let set = client.set("foo", "bar").unwrap();
    assert_eq!(set.value_str(), Some("OK"));
    assert_ne!(set.value_str(), Some("bar"));

    let get = client.get("foo").unwrap();
    assert_eq!(get.value_str(), Some("bar"));

    client.close();
}

#[test]
fn test_incr_on_missing_key_counts_up() {
    let server = KvServer::start();
    let client = Client::new(server.config());
    client.connect().unwrap();

    assert_eq!(client.incr("count").unwrap().value_int(), Some(1));
    assert_eq!(client.incr("count").unwrap().value_int(), Some(2));

    client.close();
}

#[test]
fn test_get_missing_key_is_nil() {
    let server = KvServer::start();
    let client = Client::new(server.config());
    client.connect().unwrap();

    let response = client.get("never-set").unwrap();
    assert_eq!(response.value, Some(Value::Nil));

    client.close();
}

#[test]
fn test_server_error_rejects_only_that_command() {
    let server = KvServer::start();
    let client = Client::new(server.config());
    client.connect().unwrap();

    // The fake server rejects TTL as unsupported.
    match client.ttl("foo") {
        Err(ClientError::Command(_)) => {}
        other => panic!("Expected command error, got {other:?}"),
    }
    // The connection stays usable for the next command.
    assert_eq!(client.ping().unwrap().value_str(), Some("PONG"));

    client.close();
}

// =============================================================================
// FIFO Correlation Tests
// =============================================================================

#[test]
fn test_pipelined_replies_resolve_in_issue_order() {
    // Server that banks three requests, then answers them in arrival
    // order in a single write. Each reply echoes its command's first
    // argument, so any permutation would be caught by the callers.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = stream.try_clone().unwrap();

        read_command(&mut reader).unwrap();
        write_response(
            &mut &stream,
            &Response {
                value: Some(Value::Str("OK".to_string())),
                ..Default::default()
            },
        )
        .unwrap();

        let mut banked = Vec::new();
        for _ in 0..3 {
            banked.push(read_command(&mut reader).unwrap());
        }
        let mut batch = Vec::new();
        for cmd in &banked {
            let echo = Response {
                value: Some(Value::Str(format!("echo:{}", cmd.args[0]))),
                ..Default::default()
            };
            batch.extend_from_slice(&opalkv::protocol::encode_response(&echo));
        }
        use std::io::Write;
        (&stream).write_all(&batch).unwrap();
        (&stream).flush().unwrap();
        thread::sleep(Duration::from_secs(1));
    });

    let client = Arc::new(Client::new(short_config(port)));
    client.connect().unwrap();

    let mut handles = Vec::new();
    for key in ["alpha", "beta", "gamma"] {
        let client = Arc::clone(&client);
        handles.push(thread::spawn(move || {
            let response = client.get(key).unwrap();
            assert_eq!(response.value_str(), Some(format!("echo:{key}").as_str()));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    client.close();
}

#[test]
fn test_sequential_commands_resolve_in_order() {
    let server = KvServer::start();
    let client = Client::new(server.config());
    client.connect().unwrap();

    for i in 1..=20 {
        assert_eq!(client.incr("seq").unwrap().value_int(), Some(i));
    }

    client.close();
}

// =============================================================================
// Close / Reconnect Tests
// =============================================================================

#[test]
fn test_close_is_idempotent_and_fails_pending_fast() {
    let server = KvServer::start();
    let client = Client::new(server.config());
    client.connect().unwrap();

    client.close();
    client.close();
    assert_eq!(client.state(), ConnState::Closed);

    match client.ping() {
        Err(ClientError::State(_)) => {}
        other => panic!("Expected state error, got {other:?}"),
    }
}

#[test]
fn test_graceful_close_suppresses_reconnect() {
    let server = KvServer::start();
    let client = Client::new(server.config());
    client.connect().unwrap();
    assert_eq!(server.accept_count(), 1);

    client.close();

    // Several reconnect delays' worth of waiting: no new connection may
    // be attempted after a graceful close.
    thread::sleep(Duration::from_millis(400));
    assert_eq!(server.accept_count(), 1);
}

#[test]
fn test_reconnects_after_unexpected_drop() {
    // First connection is killed right after the handshake; the client
    // must come back on its own and serve commands on the new socket.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        // Connection 1: handshake, then drop.
        let (stream, _) = listener.accept().unwrap();
        let mut reader = stream.try_clone().unwrap();
        read_command(&mut reader).unwrap();
        write_response(
            &mut &stream,
            &Response {
                value: Some(Value::Str("OK".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
        let _ = stream.shutdown(Shutdown::Both);

        // Connection 2: handshake, then echo PONG forever.
        let (stream, _) = listener.accept().unwrap();
        let mut reader = stream.try_clone().unwrap();
        read_command(&mut reader).unwrap();
        write_response(
            &mut &stream,
            &Response {
                value: Some(Value::Str("OK".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
        while read_command(&mut reader).is_ok() {
            let _ = write_response(
                &mut &stream,
                &Response {
                    value: Some(Value::Str("PONG".to_string())),
                    ..Default::default()
                },
            );
        }
    });

    let client = Client::new(short_config(port));
    client.connect().unwrap();

    assert!(
        wait_until(Duration::from_secs(3), || client.state() == ConnState::Ready
            && client.ping().map(|r| r.value_str() == Some("PONG")).unwrap_or(false)),
        "client did not recover after the drop"
    );

    client.close();
}

#[test]
fn test_reconnect_counter_resets_after_recovery() {
    // Two separate drop/recover cycles on a budget of one attempt per
    // outage. If the attempt counter failed to reset after the first
    // recovery, the second outage would exhaust immediately and go fatal.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        // Connection 1: handshake, then drop.
        let (stream, _) = listener.accept().unwrap();
        let mut reader = stream.try_clone().unwrap();
        read_command(&mut reader).unwrap();
        write_response(
            &mut &stream,
            &Response {
                value: Some(Value::Str("OK".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
        let _ = stream.shutdown(Shutdown::Both);

        // Connection 2: handshake, answer one command, then drop.
        let (stream, _) = listener.accept().unwrap();
        let mut reader = stream.try_clone().unwrap();
        read_command(&mut reader).unwrap();
        write_response(
            &mut &stream,
            &Response {
                value: Some(Value::Str("OK".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
        read_command(&mut reader).unwrap();
        write_response(
            &mut &stream,
            &Response {
                value: Some(Value::Str("PONG-2".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
        let _ = stream.shutdown(Shutdown::Both);

        // Connection 3: handshake, then serve forever.
        let (stream, _) = listener.accept().unwrap();
        let mut reader = stream.try_clone().unwrap();
        read_command(&mut reader).unwrap();
        write_response(
            &mut &stream,
            &Response {
                value: Some(Value::Str("OK".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
        while read_command(&mut reader).is_ok() {
            let _ = write_response(
                &mut &stream,
                &Response {
                    value: Some(Value::Str("PONG-3".to_string())),
                    ..Default::default()
                },
            );
        }
    });

    let config = Config::builder()
        .host("127.0.0.1")
        .port(port)
        .handshake_timeout(Duration::from_millis(500))
        .reconnect_delay(Duration::from_millis(50))
        .max_reconnect_delay(Duration::from_millis(200))
        .max_reconnect_attempts(1)
        .build();
    let client = Client::new(config);
    client.connect().unwrap();
    let errors = client.errors();

    assert!(
        wait_until(Duration::from_secs(3), || client
            .ping()
            .map(|r| r.value_str() == Some("PONG-2"))
            .unwrap_or(false)),
        "client did not recover from the first drop"
    );
    assert!(
        wait_until(Duration::from_secs(3), || client
            .ping()
            .map(|r| r.value_str() == Some("PONG-3"))
            .unwrap_or(false)),
        "client did not recover from the second drop"
    );

    // Both outages were survived within budget; nothing went fatal.
    assert!(errors.try_recv().is_err());
    assert_eq!(client.state(), ConnState::Ready);
    client.close();
}

#[test]
fn test_framing_violation_forces_reconnect() {
    // Server answers a command with a garbage length header. The client
    // cannot trust any later frame boundary on that socket, so it must
    // drop it and recover on a fresh connection.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        // Connection 1: handshake, one command, then a 4 GB frame header.
        let (first, _) = listener.accept().unwrap();
        let mut reader = first.try_clone().unwrap();
        read_command(&mut reader).unwrap();
        write_response(
            &mut &first,
            &Response {
                value: Some(Value::Str("OK".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
        read_command(&mut reader).unwrap();
        use std::io::Write;
        (&first).write_all(&[0xff, 0xff, 0xff, 0xff]).unwrap();
        (&first).flush().unwrap();

        // Connection 2: handshake, then serve PONG; conn 1 stays open so
        // the client, not the server, is the one giving up on it.
        let (stream, _) = listener.accept().unwrap();
        let mut reader = stream.try_clone().unwrap();
        read_command(&mut reader).unwrap();
        write_response(
            &mut &stream,
            &Response {
                value: Some(Value::Str("OK".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
        while read_command(&mut reader).is_ok() {
            let _ = write_response(
                &mut &stream,
                &Response {
                    value: Some(Value::Str("PONG".to_string())),
                    ..Default::default()
                },
            );
        }
        drop(first);
    });

    let client = Client::new(short_config(port));
    client.connect().unwrap();

    // The command outstanding at the violation is failed, never left
    // hanging or resolved against a misparsed boundary.
    match client.get("poisoned") {
        Err(ClientError::Connection(_)) => {}
        other => panic!("Expected connection error, got {other:?}"),
    }

    assert!(
        wait_until(Duration::from_secs(3), || client.state() == ConnState::Ready
            && client.ping().map(|r| r.value_str() == Some("PONG")).unwrap_or(false)),
        "client did not recover after the framing violation"
    );

    client.close();
}

#[test]
fn test_reconnect_exhaustion_is_fatal() {
    // Server handshakes once, drops the connection, and goes away; the
    // client must stop retrying after max_reconnect_attempts and surface
    // a fatal error.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = stream.try_clone().unwrap();
        read_command(&mut reader).unwrap();
        write_response(
            &mut &stream,
            &Response {
                value: Some(Value::Str("OK".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
        let _ = stream.shutdown(Shutdown::Both);
        drop(listener);
    });

    let client = Client::new(short_config(port));
    client.connect().unwrap();
    let errors = client.errors();

    match errors.recv_timeout(Duration::from_secs(5)) {
        Ok(ClientError::Connection(msg)) => assert!(msg.contains("reconnect"), "{msg}"),
        other => panic!("Expected fatal connection error, got {other:?}"),
    }

    // After exhaustion the connection is dead; further calls fail fast.
    assert_eq!(client.state(), ConnState::Closed);
    match client.ping() {
        Err(ClientError::State(_)) => {}
        other => panic!("Expected state error, got {other:?}"),
    }
}

#[test]
fn test_disconnect_fails_outstanding_requests() {
    // Server that handshakes, reads one command, and drops the socket
    // without answering: the caller blocked in execute() must get a
    // connection error rather than hang.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = stream.try_clone().unwrap();
        read_command(&mut reader).unwrap();
        write_response(
            &mut &stream,
            &Response {
                value: Some(Value::Str("OK".to_string())),
                ..Default::default()
            },
        )
        .unwrap();
        read_command(&mut reader).unwrap();
        let _ = stream.shutdown(Shutdown::Both);
    });

    let client = Client::new(short_config(port));
    client.connect().unwrap();

    match client.get("doomed") {
        Err(ClientError::Connection(_)) => {}
        other => panic!("Expected connection error, got {other:?}"),
    }
}
