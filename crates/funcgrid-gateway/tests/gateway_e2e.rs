//! Gateway end-to-end scenarios over real sockets.
//!
//! Each test boots a gateway on ephemeral ports with a scratch
//! shared-memory directory, drives it with a hand-rolled HTTP/1.1
//! client, and (where needed) a fake watchdog speaking the framed IPC
//! protocol and the shared-memory file contract.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use funcgrid_gateway::{GatewayConfig, Server, State};
use funcgrid_proto::{
    FuncCall, HandshakeMessage, HandshakeResponse, HandshakeStatus, Message, MessageType, Role,
    HANDSHAKE_RESPONSE_WIRE_SIZE, MESSAGE_WIRE_SIZE,
};

const FUNC_CONFIG_JSON: &str = r#"[
    {"funcName": "echo", "funcId": 7},
    {"funcName": "grpc:foo.Bar", "funcId": 8, "grpcMethods": ["Baz"]}
]"#;

struct TestGateway {
    _dir: tempfile::TempDir,
    server: Server,
    http_addr: SocketAddr,
    ipc_path: PathBuf,
    shm_path: PathBuf,
}

impl TestGateway {
    fn start() -> Self {
        Self::start_with(|_| {})
    }

    fn start_with(customize: impl FnOnce(&mut Server)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let func_config_file = dir.path().join("func_config.json");
        std::fs::write(&func_config_file, FUNC_CONFIG_JSON).unwrap();
        let shm_path = dir.path().join("shm");
        let ipc_path = dir.path().join("ipc.sock");
        let config = GatewayConfig {
            address: "127.0.0.1".to_string(),
            http_port: 0,
            grpc_port: 0,
            ipc_path: ipc_path.clone(),
            func_config_file,
            shared_mem_path: shm_path.clone(),
            ..GatewayConfig::default()
        };
        let mut server = Server::new(config);
        customize(&mut server);
        server.start().unwrap();
        assert_eq!(server.state(), State::Running);
        let http_addr = server.http_local_addr().unwrap();
        Self {
            _dir: dir,
            server,
            http_addr,
            ipc_path,
            shm_path,
        }
    }

    fn shutdown(mut self) {
        self.server.schedule_stop();
        self.server.wait_for_finish();
        assert_eq!(self.server.state(), State::Stopped);
    }
}

/// Minimal HTTP/1.1 client: one request, connection closed after the
/// response.
fn http_request(addr: SocketAddr, method: &str, path: &str, body: &[u8]) -> (u16, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).unwrap();
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: gateway\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(request.as_bytes()).unwrap();
    stream.write_all(body).unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();
    let header_end = raw
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .expect("malformed HTTP response");
    let head = std::str::from_utf8(&raw[..header_end]).unwrap();
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("missing status code");
    (status, raw[header_end + 4..].to_vec())
}

enum WatchdogBehavior {
    /// Copy the input region to the output region, report complete.
    Echo,
    /// Report failure without producing output.
    Fail,
}

/// A stand-in for the per-function watchdog process: handshakes over
/// the IPC socket and serves invocations through shared memory.
struct FakeWatchdog {
    stream: UnixStream,
    response: HandshakeResponse,
}

impl FakeWatchdog {
    fn connect(ipc_path: &Path, func_id: u16) -> Self {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut stream = loop {
            match UnixStream::connect(ipc_path) {
                Ok(stream) => break stream,
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                Err(e) => panic!("cannot reach gateway IPC socket: {e}"),
            }
        };
        let handshake = HandshakeMessage {
            role: Role::Watchdog,
            func_id,
        };
        stream.write_all(&handshake.encode()).unwrap();
        let mut buf = [0u8; HANDSHAKE_RESPONSE_WIRE_SIZE];
        stream.read_exact(&mut buf).unwrap();
        let response = HandshakeResponse::decode(&buf).unwrap();
        Self { stream, response }
    }

    fn status(&self) -> HandshakeStatus {
        self.response.status
    }

    /// Serve invocations until the gateway closes the connection.
    fn run(mut self, shm_path: PathBuf, behavior: WatchdogBehavior) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let mut frame = [0u8; MESSAGE_WIRE_SIZE];
            while self.stream.read_exact(&mut frame).is_ok() {
                let message = Message::decode(&frame).unwrap();
                assert_eq!(message.message_type, MessageType::InvokeFunc);
                let call = message.func_call;
                let reply = match behavior {
                    WatchdogBehavior::Echo => {
                        let input =
                            std::fs::read(shm_path.join(call.input_region_name())).unwrap();
                        std::fs::write(shm_path.join(call.output_region_name()), input).unwrap();
                        Message::func_call_complete(call)
                    }
                    WatchdogBehavior::Fail => Message::func_call_failed(call),
                };
                if self.stream.write_all(&reply.encode()).is_err() {
                    break;
                }
            }
        })
    }
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn region_files(shm_path: &Path) -> Vec<String> {
    std::fs::read_dir(shm_path)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn hello_route() {
    let gateway = TestGateway::start();
    let (status, body) = http_request(gateway.http_addr, "GET", "/hello", b"");
    assert_eq!(status, 200);
    assert_eq!(body, b"Hello world\n");
    gateway.shutdown();
}

#[test]
fn unknown_route_is_404() {
    let gateway = TestGateway::start();
    let (status, _body) = http_request(gateway.http_addr, "GET", "/nope", b"");
    assert_eq!(status, 404);
    let (status, _body) = http_request(gateway.http_addr, "POST", "/function/unknown", b"x");
    assert_eq!(status, 404);
    gateway.shutdown();
}

#[test]
fn happy_path_echo_through_watchdog() {
    let gateway = TestGateway::start();
    let watchdog = FakeWatchdog::connect(&gateway.ipc_path, 7);
    assert_eq!(watchdog.status(), HandshakeStatus::Ok);
    let worker = watchdog.run(gateway.shm_path.clone(), WatchdogBehavior::Echo);

    let (status, body) = http_request(gateway.http_addr, "POST", "/function/echo", b"hi");
    assert_eq!(status, 200);
    assert_eq!(body, b"hi");

    // Both regions are unlinked once the call record is dropped.
    assert!(wait_until(Duration::from_secs(1), || {
        region_files(&gateway.shm_path).is_empty()
    }));

    gateway.shutdown();
    worker.join().unwrap();
}

#[test]
fn missing_watchdog_is_404_with_func_id() {
    let gateway = TestGateway::start();
    let (status, body) = http_request(gateway.http_addr, "POST", "/function/echo", b"x");
    assert_eq!(status, 404);
    assert_eq!(body, b"Cannot find watchdog for func_id 7\n");
    // The input region was destroyed on the miss path.
    assert!(wait_until(Duration::from_secs(1), || {
        region_files(&gateway.shm_path).is_empty()
    }));
    gateway.shutdown();
}

#[test]
fn empty_body_is_rejected_without_creating_regions() {
    let gateway = TestGateway::start();
    let (status, body) = http_request(gateway.http_addr, "POST", "/function/echo", b"");
    assert_eq!(status, 400);
    assert_eq!(body, b"Request body cannot be empty!\n");
    assert!(region_files(&gateway.shm_path).is_empty());
    gateway.shutdown();
}

#[test]
fn function_failure_is_500_and_regions_unlinked() {
    let gateway = TestGateway::start();
    let watchdog = FakeWatchdog::connect(&gateway.ipc_path, 7);
    let worker = watchdog.run(gateway.shm_path.clone(), WatchdogBehavior::Fail);

    let (status, body) = http_request(gateway.http_addr, "POST", "/function/echo", b"boom");
    assert_eq!(status, 500);
    assert_eq!(body, b"Function call failed\n");
    assert!(wait_until(Duration::from_secs(1), || {
        region_files(&gateway.shm_path).is_empty()
    }));

    gateway.shutdown();
    worker.join().unwrap();
}

#[test]
fn duplicate_watchdog_handshake_is_rejected() {
    let gateway = TestGateway::start();
    let first = FakeWatchdog::connect(&gateway.ipc_path, 7);
    assert_eq!(first.status(), HandshakeStatus::Ok);

    let second = FakeWatchdog::connect(&gateway.ipc_path, 7);
    assert_eq!(second.status(), HandshakeStatus::WatchdogExists);

    // The registered watchdog still serves invocations.
    let worker = first.run(gateway.shm_path.clone(), WatchdogBehavior::Echo);
    let (status, body) = http_request(gateway.http_addr, "POST", "/function/echo", b"still up");
    assert_eq!(status, 200);
    assert_eq!(body, b"still up");

    drop(second);
    gateway.shutdown();
    worker.join().unwrap();
}

#[test]
fn sequential_calls_get_distinct_call_ids() {
    let gateway = TestGateway::start();
    let watchdog = FakeWatchdog::connect(&gateway.ipc_path, 7);
    let worker = watchdog.run(gateway.shm_path.clone(), WatchdogBehavior::Echo);

    for payload in [&b"one"[..], b"two", b"three"] {
        let (status, body) = http_request(gateway.http_addr, "POST", "/function/echo", payload);
        assert_eq!(status, 200);
        assert_eq!(body, payload);
    }

    gateway.shutdown();
    worker.join().unwrap();
}

#[test]
fn user_handlers_match_before_built_ins() {
    let gateway = TestGateway::start_with(|server| {
        server
            .register_sync_request_handler(
                std::sync::Arc::new(|method, path| method == "GET" && path == "/hello"),
                std::sync::Arc::new(|context| {
                    context.append_to_response_body("overridden\n");
                }),
            )
            .unwrap();
    });
    let (status, body) = http_request(gateway.http_addr, "GET", "/hello", b"");
    assert_eq!(status, 200);
    assert_eq!(body, b"overridden\n");
    gateway.shutdown();
}

#[test]
fn shutdown_route_stops_the_gateway() {
    let mut gateway = TestGateway::start();
    let (status, body) = http_request(gateway.http_addr, "POST", "/shutdown", b"");
    assert_eq!(status, 200);
    assert_eq!(body, b"Server is shutting down\n");

    gateway.server.wait_for_finish();
    assert_eq!(gateway.server.state(), State::Stopped);
}

#[test]
fn nested_call_message_is_relayed_between_peers() {
    let gateway = TestGateway::start();

    // A watchdog for func 7 and an engine worker peer.
    let watchdog = FakeWatchdog::connect(&gateway.ipc_path, 7);
    let mut engine = UnixStream::connect(&gateway.ipc_path).unwrap();
    engine
        .write_all(
            &HandshakeMessage {
                role: Role::EngineWorker,
                func_id: 0,
            }
            .encode(),
        )
        .unwrap();
    let mut buf = [0u8; HANDSHAKE_RESPONSE_WIRE_SIZE];
    engine.read_exact(&mut buf).unwrap();
    let engine_client_id = HandshakeResponse::decode(&buf).unwrap().client_id;

    // Engine invokes func 7 as a nested call; the gateway relays it
    // to the watchdog connection.
    let call = FuncCall::new(7, engine_client_id, 1);
    engine
        .write_all(&Message::invoke_func(call).encode())
        .unwrap();

    let mut watchdog_stream = watchdog.stream;
    let mut frame = [0u8; MESSAGE_WIRE_SIZE];
    watchdog_stream.read_exact(&mut frame).unwrap();
    let invoke = Message::decode(&frame).unwrap();
    assert_eq!(invoke.message_type, MessageType::InvokeFunc);
    assert_eq!(invoke.func_call, call);

    // The watchdog completes; the completion routes back to the
    // engine peer by client id.
    watchdog_stream
        .write_all(&Message::func_call_complete(call).encode())
        .unwrap();
    engine.read_exact(&mut frame).unwrap();
    let completion = Message::decode(&frame).unwrap();
    assert_eq!(completion.message_type, MessageType::FuncCallComplete);
    assert_eq!(completion.func_call, call);

    gateway.shutdown();
}
