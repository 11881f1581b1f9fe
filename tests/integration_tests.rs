//! End-to-end integration tests: real TCP connections against a running
//! server: framing, routing errors, notifications, and connection lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arca_protocol::{HandlerResult, Request};
use arca_server::RpcServer;
use arca_transport::{ServerConfig, TransportError};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Backing store handed to target handlers.
struct Store {
    reply: &'static str,
}

/// Start a server on an OS-assigned port with Ping/Pang registered.
async fn start_server() -> (RpcServer<Store>, SocketAddr) {
    start_server_with(ServerConfig::with_address("127.0.0.1:0")).await
}

async fn start_server_with(config: ServerConfig) -> (RpcServer<Store>, SocketAddr) {
    let mut server = RpcServer::new(config);
    server.register_source("Ping", "Global", |_| Ok(Some(json!("Pong"))));
    server.register_source("Pang", "Global", |_| Ok(Some(json!("Pung"))));
    let addr = server.start().await.expect("server should start");
    (server, addr)
}

/// Wait until the server has registered exactly `n` connections.
async fn wait_for_connections(server: &RpcServer<Store>, n: usize) {
    timeout(READ_TIMEOUT, async {
        while server.connection_count() != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {n} connections, have {}", server.connection_count()));
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn send(&mut self, request: &Request) {
        let line = serde_json::to_string(request).unwrap();
        self.send_line(&line).await;
    }

    /// Next line, without its terminator.
    async fn recv(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("Timeout waiting for frame")
            .expect("read error");
        assert!(n > 0, "connection closed while waiting for a frame");
        line.truncate(line.trim_end_matches('\n').len());
        line
    }

    async fn recv_json(&mut self) -> Value {
        serde_json::from_str(&self.recv().await).unwrap()
    }

    async fn call(&mut self, request: &Request) -> String {
        self.send(request).await;
        self.recv().await
    }

    async fn assert_closed(&mut self) {
        let mut line = String::new();
        let n = timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("Timeout waiting for close")
            .unwrap_or(0);
        assert_eq!(n, 0, "expected EOF, got {line:?}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_accepts_connections() {
    let (server, addr) = start_server().await;
    let _client = Client::connect(addr).await;
    wait_for_connections(&server, 1).await;
    assert_eq!(server.local_addr(), Some(addr));
}

#[tokio::test]
async fn second_server_on_same_address_fails_without_disturbing_first() {
    let (_first, addr) = start_server().await;

    let mut second: RpcServer<Store> = RpcServer::new(ServerConfig::with_address(addr.to_string()));
    let err = second.start().await.unwrap_err();
    assert!(err.is_addr_in_use(), "unexpected error: {err}");

    let mut client = Client::connect(addr).await;
    let reply = client.call(&Request::new("ID", "Ping", "Global")).await;
    assert!(reply.contains(r#""Result":"Pong""#));
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let (mut server, _addr) = start_server().await;
    assert!(matches!(server.start().await, Err(TransportError::AlreadyStarted)));
}

#[tokio::test]
async fn close_refuses_new_connections() {
    let (mut server, addr) = start_server().await;
    let _client = Client::connect(addr).await;

    server.close().await;

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn close_leaves_open_sessions_running() {
    let (mut server, addr) = start_server().await;
    let mut client = Client::connect(addr).await;
    wait_for_connections(&server, 1).await;

    server.close().await;

    let reply = client.call(&Request::new("ID", "Ping", "Global")).await;
    assert!(reply.contains(r#""Result":"Pong""#));
}

#[tokio::test]
async fn max_connections_closes_extra_clients() {
    let config = ServerConfig {
        max_connections: Some(1),
        ..ServerConfig::with_address("127.0.0.1:0")
    };
    let (server, addr) = start_server_with(config).await;

    let mut first = Client::connect(addr).await;
    wait_for_connections(&server, 1).await;

    let mut second = Client::connect(addr).await;
    second.assert_closed().await;

    assert_eq!(server.connection_count(), 1);
    let reply = first.call(&Request::new("ID", "Ping", "Global")).await;
    assert!(reply.contains("Pong"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Framing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_json_gets_parse_error_and_connection_survives() {
    let (_server, addr) = start_server().await;
    let mut client = Client::connect(addr).await;

    client.send_line("!json").await;
    assert_eq!(
        client.recv().await,
        r#"{"ID":"","Method":"","Context":null,"Result":null,"Error":{"Code":-32700,"Message":"Parse error","Data":"expected value at line 1 column 1"}}"#
    );

    let reply = client.call(&Request::new("ID", "Ping", "Global")).await;
    assert!(reply.contains(r#""Result":"Pong""#));
}

#[tokio::test]
async fn empty_lines_are_skipped() {
    let (_server, addr) = start_server().await;
    let mut client = Client::connect(addr).await;

    client.send_line("").await;
    client.send_line("").await;
    let reply = client.call(&Request::new("after-blank", "Ping", "Global")).await;
    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["ID"], "after-blank");
}

#[tokio::test]
async fn crlf_terminated_requests_are_accepted() {
    let (_server, addr) = start_server().await;
    let mut client = Client::connect(addr).await;

    client
        .send_line("{\"ID\":\"crlf\",\"Method\":\"Ping\",\"Context\":\"Global\"}\r")
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["Result"], "Pong");
}

#[tokio::test]
async fn oversized_frame_is_rejected_and_connection_survives() {
    let config = ServerConfig {
        max_frame_bytes: 64,
        ..ServerConfig::with_address("127.0.0.1:0")
    };
    let (_server, addr) = start_server_with(config).await;
    let mut client = Client::connect(addr).await;

    let big = format!(r#"{{"ID":"big","Method":"Ping","Context":"Global","Params":"{}"}}"#, "x".repeat(200));
    client.send_line(&big).await;
    let reply = client.recv_json().await;
    assert_eq!(reply["Error"]["Code"], -32700);
    assert!(reply["Error"]["Data"].as_str().unwrap().contains("exceeds the 64 byte limit"));

    let reply = client.call(&Request::new("small", "Ping", "Global")).await;
    assert!(reply.contains(r#""ID":"small""#));
}

#[tokio::test]
async fn unlimited_frame_size_serves_and_deregisters() {
    let config = ServerConfig {
        max_frame_bytes: usize::MAX,
        ..ServerConfig::with_address("127.0.0.1:0")
    };
    let (server, addr) = start_server_with(config).await;
    assert_eq!(server.config().max_frame_bytes, usize::MAX);

    let mut client = Client::connect(addr).await;
    let reply = client.call(&Request::new("ID", "Ping", "Global")).await;
    assert!(reply.contains(r#""Result":"Pong""#));
    wait_for_connections(&server, 1).await;

    drop(client);
    wait_for_connections(&server, 0).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Source routing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_round_trip() {
    let (_server, addr) = start_server().await;
    let mut client = Client::connect(addr).await;

    client
        .send_line(r#"{"ID":"ID","Method":"Ping","Context":"Global"}"#)
        .await;
    assert_eq!(
        client.recv().await,
        r#"{"ID":"ID","Method":"Ping","Context":"Global","Result":"Pong","Error":null}"#
    );
}

#[tokio::test]
async fn two_methods_in_one_context_on_one_connection() {
    let (_server, addr) = start_server().await;
    let mut client = Client::connect(addr).await;

    assert_eq!(
        client.call(&Request::new("ID", "Pang", "Global")).await,
        r#"{"ID":"ID","Method":"Pang","Context":"Global","Result":"Pung","Error":null}"#
    );
    assert_eq!(
        client.call(&Request::new("ID", "Ping", "Global")).await,
        r#"{"ID":"ID","Method":"Ping","Context":"Global","Result":"Pong","Error":null}"#
    );
}

#[tokio::test]
async fn role_keyed_context_is_echoed() {
    let (_server, addr) = start_server().await;
    let mut client = Client::connect(addr).await;

    let request = Request::new("ID", "Pang", json!({"Source": "Global"}));
    assert_eq!(
        client.call(&request).await,
        r#"{"ID":"ID","Method":"Pang","Context":{"Source":"Global"},"Result":"Pung","Error":null}"#
    );
}

#[tokio::test]
async fn incorrect_context_is_invalid_request() {
    let (_server, addr) = start_server().await;
    let mut client = Client::connect(addr).await;

    let request = Request::new("ID", "Unknown Method", json!(434));
    assert_eq!(
        client.call(&request).await,
        r#"{"ID":"ID","Method":"Unknown Method","Context":434,"Result":null,"Error":{"Code":-32600,"Message":"Invalid Request","Data":{"Error":"Incorrect context 434","ID":"ID","Method":"Unknown Method"}}}"#
    );
}

#[tokio::test]
async fn unknown_method_then_registration_succeeds() {
    let (server, addr) = start_server().await;
    let mut client = Client::connect(addr).await;

    let request = Request::new("ID", "Unknown Method", "Global");
    assert_eq!(
        client.call(&request).await,
        r#"{"ID":"ID","Method":"Unknown Method","Context":"Global","Result":null,"Error":{"Code":-32601,"Message":"Method not found","Data":{"ID":"ID","Method":"Unknown Method"}}}"#
    );

    server.register_source("Unknown Method", "Global", |_| Ok(Some(json!("known now"))));
    let reply: Value = serde_json::from_str(&client.call(&request).await).unwrap();
    assert_eq!(reply["Result"], "known now");
    assert!(reply["Error"].is_null());
}

#[tokio::test]
async fn null_result_sends_no_reply() {
    let (server, addr) = start_server().await;
    server.register_source("Fire", "Global", |_| Ok(None));
    let mut client = Client::connect(addr).await;

    client.send(&Request::new("1", "Fire", "Global")).await;
    let reply = client.call(&Request::new("2", "Ping", "Global")).await;
    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["ID"], "2");
}

#[tokio::test]
async fn handler_panic_becomes_internal_error() {
    let (server, addr) = start_server().await;
    server.register_source("Boom", "Global", |_| panic!("kaboom"));
    let mut client = Client::connect(addr).await;

    client.send(&Request::new("B", "Boom", "Global")).await;
    let reply = client.recv_json().await;
    assert_eq!(reply["Error"]["Code"], -32603);
    assert_eq!(reply["Error"]["Message"], "Internal error");
    assert_eq!(reply["Error"]["Data"], json!({"Error": "kaboom", "ID": "B", "Method": "Boom"}));

    let reply = client.call(&Request::new("P", "Ping", "Global")).await;
    assert!(reply.contains("Pong"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifications & broadcast
// ─────────────────────────────────────────────────────────────────────────────

fn register_target_ping(server: &RpcServer<Store>) {
    server.register_target("Ping", "Global", |store: Arc<Store>| {
        move |_: &Request| -> HandlerResult { Ok(Some(json!(store.reply))) }
    });
}

#[tokio::test]
async fn notification_is_broadcast_to_every_connection() {
    let (server, addr) = start_server().await;
    register_target_ping(&server);

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(Client::connect(addr).await);
    }
    wait_for_connections(&server, 3).await;

    let request = Request::new("ID", "Ping", json!({"Target": "Global"}));
    server
        .process_notification(request, Arc::new(Store { reply: "Pong" }))
        .await;

    for client in &mut clients {
        assert_eq!(
            client.recv().await,
            r#"{"ID":"ID","Method":"Ping","Context":{"Target":"Global"},"Result":"Pong","Error":null}"#
        );
    }
}

#[tokio::test]
async fn unregistered_notification_broadcasts_method_not_found() {
    let (server, addr) = start_server().await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(Client::connect(addr).await);
    }
    wait_for_connections(&server, 3).await;

    let request = Request::new("N", "Missing", json!({"Target": "Global"}));
    server
        .process_notification(request, Arc::new(Store { reply: "" }))
        .await;

    for client in &mut clients {
        let reply = client.recv_json().await;
        assert_eq!(reply["Error"]["Code"], -32601);
        assert_eq!(reply["Error"]["Message"], "Method not found");
        assert_eq!(reply["Context"], json!({"Target": "Global"}));
    }
}

#[tokio::test]
async fn notification_with_bad_context_broadcasts_invalid_request() {
    let (server, addr) = start_server().await;
    register_target_ping(&server);
    let mut client = Client::connect(addr).await;
    wait_for_connections(&server, 1).await;

    let request = Request::new("N", "Ping", json!({"Source": "Global"}));
    server
        .process_notification(request, Arc::new(Store { reply: "Pong" }))
        .await;

    let reply = client.recv_json().await;
    assert_eq!(reply["Error"]["Code"], -32600);
    assert_eq!(reply["Error"]["Data"]["Error"], r#"Incorrect context {"Source":"Global"}"#);
}

#[tokio::test]
async fn disconnect_does_not_affect_remaining_clients() {
    let (server, addr) = start_server().await;
    register_target_ping(&server);

    let mut a = Client::connect(addr).await;
    let b = Client::connect(addr).await;
    let mut c = Client::connect(addr).await;
    wait_for_connections(&server, 3).await;

    drop(b);
    wait_for_connections(&server, 2).await;

    let request = Request::new("ID", "Ping", json!({"Target": "Global"}));
    server
        .process_notification(request, Arc::new(Store { reply: "still here" }))
        .await;

    for client in [&mut a, &mut c] {
        let reply = client.recv_json().await;
        assert_eq!(reply["Result"], "still here");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcasts_survive_concurrent_connect_and_disconnect() {
    let (server, addr) = start_server().await;
    register_target_ping(&server);

    let mut stable = Vec::new();
    for _ in 0..3 {
        stable.push(Client::connect(addr).await);
    }
    wait_for_connections(&server, 3).await;

    const CHURNERS: usize = 16;
    const ROUNDS: usize = 5;
    const NOTIFICATIONS: usize = 40;

    let churn: Vec<_> = (0..CHURNERS)
        .map(|n| {
            tokio::spawn(async move {
                for round in 0..ROUNDS {
                    let mut client = Client::connect(addr).await;
                    let id = format!("c{n}-{round}");
                    client.send(&Request::new(id.clone(), "Ping", "Global")).await;
                    // Broadcasts may arrive ahead of the reply
                    while client.recv_json().await["ID"] != id.as_str() {}
                }
            })
        })
        .collect();

    for i in 0..NOTIFICATIONS {
        let request = Request::new(i.to_string(), "Ping", json!({"Target": "Global"}));
        server
            .process_notification(request, Arc::new(Store { reply: "Pong" }))
            .await;
        tokio::task::yield_now().await;
    }
    for task in churn {
        task.await.expect("churn task panicked");
    }

    for client in &mut stable {
        for i in 0..NOTIFICATIONS {
            let frame = client.recv_json().await;
            assert_eq!(frame["ID"], i.to_string());
            assert_eq!(frame["Result"], "Pong");
        }
    }
    wait_for_connections(&server, 3).await;
}

#[tokio::test]
async fn replies_and_broadcasts_never_interleave() {
    let (server, addr) = start_server().await;
    let payload = "y".repeat(16 * 1024);
    server.register_source("Big", "Global", move |req| {
        Ok(Some(json!({"id": req.id, "payload": payload})))
    });
    register_target_ping(&server);

    let mut client = Client::connect(addr).await;
    wait_for_connections(&server, 1).await;

    const REQUESTS: usize = 50;
    const NOTIFICATIONS: usize = 50;
    for i in 0..REQUESTS {
        client.send(&Request::new(i.to_string(), "Big", "Global")).await;
    }

    // Notify while reading; the replies alone overflow the socket buffers.
    let notify = async {
        for _ in 0..NOTIFICATIONS {
            let request = Request::new("N", "Ping", json!({"Target": "Global"}));
            server
                .process_notification(request, Arc::new(Store { reply: "Pong" }))
                .await;
        }
    };
    let read = async {
        let mut replies = 0;
        let mut broadcasts = 0;
        for _ in 0..REQUESTS + NOTIFICATIONS {
            let frame = client.recv_json().await;
            if frame["ID"] == "N" {
                broadcasts += 1;
            } else {
                assert_eq!(frame["Result"]["payload"].as_str().map(str::len), Some(16 * 1024));
                replies += 1;
            }
        }
        (replies, broadcasts)
    };

    let ((), counts) = tokio::join!(notify, read);
    assert_eq!(counts, (REQUESTS, NOTIFICATIONS));
}

#[tokio::test]
async fn broadcast_error_reaches_everyone() {
    let (server, addr) = start_server().await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    wait_for_connections(&server, 2).await;

    let base = Request::new("X", "Shutdown", "Global").base();
    let delivered = server
        .broadcast_error(base, arca_protocol::RpcError::internal("X", "Shutdown", "going away"))
        .await;
    assert_eq!(delivered, 2);

    for client in [&mut a, &mut b] {
        let reply = client.recv_json().await;
        assert_eq!(reply["Error"]["Data"]["Error"], "going away");
        assert!(reply["Result"].is_null());
    }
}
