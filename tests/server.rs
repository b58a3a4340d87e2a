//! End-to-end tests: real server on an ephemeral port, std clients
//!
//! Usage:
//!   cargo test --test server

use rstest::rstest;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tinyweb::backend::backend_pool;
use tinyweb::{
    ActorModel, CredentialStore, Server, ServerConfig, ServerContext, ServerHandle, ServerResult,
    TriggerMode,
};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    handle: ServerHandle,
    thread: Option<JoinHandle<ServerResult<()>>>,
    root: TempDir,
}

impl Running {
    fn start(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let root = tempfile::tempdir().unwrap();
        write_page(root.path(), "judge.html", b"<h1>judge</h1>");
        write_page(root.path(), "index.html", b"<h1>index</h1>");
        write_page(root.path(), "welcome.html", b"welcome");
        write_page(root.path(), "logError.html", b"login failed");
        write_page(root.path(), "log.html", b"please log in");
        write_page(root.path(), "registerError.html", b"register failed");
        write_page(root.path(), "register.html", b"register here");

        let mut config = ServerConfig {
            port: 0,
            bind_ip: "127.0.0.1".to_string(),
            doc_root: root.path().to_path_buf(),
            worker_threads: 4,
            backend_pool_size: 2,
            ..ServerConfig::default()
        };
        configure(&mut config);

        let backend = backend_pool(
            config.backend_pool_size,
            Arc::new(CredentialStore::in_memory()),
        )
        .unwrap();
        let ctx = ServerContext::new(config.doc_root.clone(), backend);
        let mut server = Server::bind(config, ctx).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        let thread = thread::spawn(move || server.run());

        Self {
            addr,
            handle,
            thread: Some(thread),
            root,
        }
    }

    fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        stream.set_write_timeout(Some(IO_TIMEOUT)).unwrap();
        stream
    }

    fn root(&self) -> &Path {
        self.root.path()
    }

    fn stop(mut self) {
        self.handle.stop().unwrap();
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap().unwrap();
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.stop();
            let _ = thread.join();
        }
    }
}

fn write_page(root: &Path, name: &str, content: &[u8]) {
    let path = root.join(name);
    fs::write(&path, content).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
}

struct Reply {
    status: u16,
    head: String,
    body: Vec<u8>,
}

fn read_reply(stream: &mut TcpStream) -> Reply {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before headers");
        raw.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8(raw[..head_end].to_vec()).unwrap();
    let status = head[9..12].parse().unwrap();
    let length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .unwrap()
        .parse()
        .unwrap();

    let mut body = raw[head_end..].to_vec();
    while body.len() < length {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed mid-body");
        body.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(body.len(), length);
    Reply { status, head, body }
}

fn get(path: &str, keep_alive: bool) -> Vec<u8> {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: {connection}\r\n\r\n").into_bytes()
}

fn post(path: &str, body: &str) -> Vec<u8> {
    format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Peer closed: EOF or reset, never data
fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected close, got {n} bytes"),
        Err(e) => assert_eq!(e.kind(), ErrorKind::ConnectionReset),
    }
}

#[rstest]
#[case(ActorModel::Proactor, 0)]
#[case(ActorModel::Proactor, 3)]
#[case(ActorModel::Reactor, 0)]
#[case(ActorModel::Reactor, 3)]
fn test_keep_alive_serves_repeated_requests(#[case] actor: ActorModel, #[case] trigger: u8) {
    let server = Running::start(|config| {
        config.actor_model = actor;
        config.trigger = TriggerMode::from_code(trigger).unwrap();
    });
    let mut stream = server.connect();

    for _ in 0..3 {
        stream.write_all(&get("/index.html", true)).unwrap();
        let reply = read_reply(&mut stream);
        assert_eq!(reply.status, 200);
        assert!(reply.head.contains("Connection: keep-alive\r\n"));
        assert!(reply.head.contains("Content-Type: text/html"));
        assert_eq!(reply.body, b"<h1>index</h1>");
    }

    stream.write_all(&get("/", false)).unwrap();
    let reply = read_reply(&mut stream);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, b"<h1>judge</h1>");
    assert_closed(&mut stream);

    server.stop();
}

#[rstest]
#[case(ActorModel::Proactor)]
#[case(ActorModel::Reactor)]
fn test_missing_file_is_404(#[case] actor: ActorModel) {
    let server = Running::start(|config| config.actor_model = actor);
    let mut stream = server.connect();

    stream.write_all(&get("/nope.html", true)).unwrap();
    let reply = read_reply(&mut stream);
    assert_eq!(reply.status, 404);
    assert!(String::from_utf8_lossy(&reply.body).contains("not found"));

    // error responses keep the connection usable
    stream.write_all(&get("/index.html", true)).unwrap();
    assert_eq!(read_reply(&mut stream).status, 200);
}

#[rstest]
#[case(ActorModel::Proactor)]
#[case(ActorModel::Reactor)]
fn test_bad_request_answers_400_and_closes(#[case] actor: ActorModel) {
    let server = Running::start(|config| config.actor_model = actor);
    let mut stream = server.connect();

    stream
        .write_all(b"BREW /pot HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let reply = read_reply(&mut stream);
    assert_eq!(reply.status, 400);
    assert!(reply.head.contains("Connection: close\r\n"));
    assert_closed(&mut stream);
}

#[test]
fn test_directory_target_is_forbidden() {
    let server = Running::start(|_| {});
    fs::create_dir(server.root().join("sub")).unwrap();
    let mut stream = server.connect();

    stream.write_all(&get("/sub", true)).unwrap();
    assert_eq!(read_reply(&mut stream).status, 403);
}

#[rstest]
#[case(ActorModel::Proactor)]
#[case(ActorModel::Reactor)]
fn test_register_then_login(#[case] actor: ActorModel) {
    let server = Running::start(|config| config.actor_model = actor);
    let mut stream = server.connect();

    stream
        .write_all(&post("/2CGISQL.cgi", "user=alice&password=pw"))
        .unwrap();
    assert_eq!(read_reply(&mut stream).body, b"login failed");

    stream
        .write_all(&post("/3CGISQL.cgi", "user=alice&password=pw"))
        .unwrap();
    assert_eq!(read_reply(&mut stream).body, b"please log in");

    stream
        .write_all(&post("/3CGISQL.cgi", "user=alice&password=other"))
        .unwrap();
    assert_eq!(read_reply(&mut stream).body, b"register failed");

    stream
        .write_all(&post("/2CGISQL.cgi", "user=alice&password=pw"))
        .unwrap();
    assert_eq!(read_reply(&mut stream).body, b"welcome");
}

#[test]
fn test_request_split_across_writes() {
    let server = Running::start(|_| {});
    let mut stream = server.connect();
    stream.set_nodelay(true).unwrap();

    let request = get("/index.html", true);
    for piece in request.chunks(7) {
        stream.write_all(piece).unwrap();
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(read_reply(&mut stream).body, b"<h1>index</h1>");
}

#[rstest]
#[case(ActorModel::Proactor)]
#[case(ActorModel::Reactor)]
fn test_large_file_survives_partial_writes(#[case] actor: ActorModel) {
    let server = Running::start(|config| config.actor_model = actor);
    let content: Vec<u8> = (0..8 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    write_page(server.root(), "big.bin", &content);

    let mut stream = server.connect();
    stream.write_all(&get("/big.bin", true)).unwrap();
    // let the server hit a full socket buffer before draining
    thread::sleep(Duration::from_millis(100));
    let reply = read_reply(&mut stream);
    assert_eq!(reply.status, 200);
    assert!(reply.head.contains("Content-Type: application/octet-stream"));
    assert!(reply.body == content);
}

#[rstest]
#[case(0)]
#[case(2)]
fn test_connection_ceiling_rejects_with_busy(#[case] trigger: u8) {
    let server = Running::start(|config| {
        config.max_connections = 1;
        config.trigger = TriggerMode::from_code(trigger).unwrap();
    });

    let mut first = server.connect();
    first.write_all(&get("/index.html", true)).unwrap();
    assert_eq!(read_reply(&mut first).status, 200);

    let mut second = server.connect();
    let mut rejected = Vec::new();
    match second.read_to_end(&mut rejected) {
        Ok(_) => {}
        Err(e) => assert_eq!(e.kind(), ErrorKind::ConnectionReset),
    }
    assert!(String::from_utf8_lossy(&rejected).contains("Internal server busy"));

    // the admitted connection is unaffected
    first.write_all(&get("/index.html", true)).unwrap();
    assert_eq!(read_reply(&mut first).status, 200);

    // once it closes, the slot frees up
    drop(first);
    let deadline = Instant::now() + IO_TIMEOUT;
    loop {
        let mut third = server.connect();
        let _ = third.write_all(&get("/index.html", true));
        let mut head = [0u8; 12];
        if third.read_exact(&mut head).is_ok() && &head[9..12] == b"200" {
            break;
        }
        assert!(Instant::now() < deadline, "slot never released");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_idle_connection_evicted_by_sweep() {
    let server = Running::start(|config| config.timeslot = Duration::from_millis(100));

    let mut idle = server.connect();
    let begin = Instant::now();
    assert_closed(&mut idle);
    // three timeslots of silence, give or take one sweep period
    assert!(begin.elapsed() >= Duration::from_millis(200));
}

#[test]
fn test_activity_slides_the_deadline() {
    let server = Running::start(|config| config.timeslot = Duration::from_millis(100));
    let mut stream = server.connect();

    // keep talking well past a single idle timeout
    for _ in 0..6 {
        thread::sleep(Duration::from_millis(150));
        stream.write_all(&get("/index.html", true)).unwrap();
        assert_eq!(read_reply(&mut stream).status, 200);
    }
}

#[test]
fn test_manual_sweep_spares_fresh_connection() {
    let server = Running::start(|config| config.timeslot = Duration::from_secs(60));
    let mut stream = server.connect();
    stream.write_all(&get("/index.html", true)).unwrap();
    assert_eq!(read_reply(&mut stream).status, 200);

    server.handle.sweep().unwrap();
    thread::sleep(Duration::from_millis(50));

    stream.write_all(&get("/index.html", true)).unwrap();
    assert_eq!(read_reply(&mut stream).status, 200);
}

#[test]
fn test_stop_closes_live_connections() {
    let server = Running::start(|_| {});
    let mut stream = server.connect();
    stream.write_all(&get("/index.html", true)).unwrap();
    assert_eq!(read_reply(&mut stream).status, 200);

    server.stop();
    assert_closed(&mut stream);
}

#[rstest]
#[case(ActorModel::Proactor)]
#[case(ActorModel::Reactor)]
fn test_full_queue_serves_every_client(#[case] actor: ActorModel) {
    const CLIENTS: usize = 8;
    let server = Running::start(|config| {
        config.actor_model = actor;
        config.worker_threads = 1;
        config.queue_capacity = 1;
        config.max_connections = CLIENTS;
    });
    let content: Vec<u8> = (0..256 * 1024u32).map(|i| (i % 241) as u8).collect();
    write_page(server.root(), "mid.bin", &content);
    let content = Arc::new(content);

    // two rounds at the ceiling: a slot leaked in the first would turn
    // a client of the second into a busy reply
    for _ in 0..2 {
        let clients: Vec<_> = (0..CLIENTS)
            .map(|_| {
                let mut stream = server.connect();
                let content = Arc::clone(&content);
                thread::spawn(move || {
                    stream.write_all(&get("/mid.bin", false)).unwrap();
                    let reply = read_reply(&mut stream);
                    assert_eq!(reply.status, 200);
                    assert!(reply.body == *content);
                    assert_closed(&mut stream);
                })
            })
            .collect();
        for client in clients {
            client.join().unwrap();
        }
    }
}
