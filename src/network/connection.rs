//! Per-connection HTTP state machine
//!
//! Satu [`HttpConnection`] per slot, dibuat sekali dan di-init ulang pada
//! setiap accept dan setiap siklus keep-alive.
//!
//! Only one actor touches a connection at a time: the dispatcher between
//! events, or the single worker the connection was handed to.

use memmap2::Mmap;
use mio::net::TcpStream;
use mio::Token;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::backend::BackendHandle;
use crate::config::Trigger;
use crate::context::ServerContext;
use crate::protocol::{
    build_response, content_type, keeps_alive, parse_credentials, FileBody, HttpCode, Method,
    RequestParser, Response,
};

/// What the connection wants next from the readiness set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Read,
    Write,
    Close,
}

/// Hasil satu percobaan write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// socket buffer full, wait for write readiness
    Pending,
    /// response done, connection reset for the next request
    KeepAlive,
    /// response done, peer did not ask for keep-alive
    Close,
    Failed,
}

pub struct HttpConnection {
    token: Token,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    trigger: Trigger,
    parser: RequestParser,
    response: Option<Response>,
    real_file: PathBuf,
    linger: bool,
}

impl HttpConnection {
    /// Slot baru dengan receive buffer `read_buffer_size`
    pub fn new(read_buffer_size: usize) -> Self {
        Self {
            token: Token(0),
            stream: None,
            peer: None,
            trigger: Trigger::Level,
            parser: RequestParser::new(read_buffer_size),
            response: None,
            real_file: PathBuf::new(),
            linger: false,
        }
    }

    /// Bind a freshly accepted socket to this slot
    pub fn init(&mut self, token: Token, stream: TcpStream, peer: SocketAddr, trigger: Trigger) {
        self.token = token;
        self.stream = Some(stream);
        self.peer = Some(peer);
        self.trigger = trigger;
        self.reset();
    }

    /// Reinitialize request state, keep the socket
    pub fn reset(&mut self) {
        self.parser.reset();
        self.response = None;
        self.real_file.clear();
        self.linger = false;
    }

    /// Detach the socket; dropping it closes the descriptor
    pub fn take_stream(&mut self) -> Option<TcpStream> {
        self.reset();
        self.peer = None;
        self.stream.take()
    }

    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn parser(&self) -> &RequestParser {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut RequestParser {
        &mut self.parser
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Target file resolved by the last request
    pub fn real_file(&self) -> &Path {
        &self.real_file
    }

    /// Non-blocking read into the receive buffer.
    ///
    /// Level-triggered reads once; edge-triggered drains until the socket
    /// would block. Returns `false` on end-of-stream, a hard error, or a
    /// receive buffer that was already full.
    pub fn read_once(&mut self) -> bool {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return false,
        };
        if self.parser.is_full() {
            return false;
        }

        loop {
            let spare = self.parser.spare_mut();
            if spare.is_empty() {
                return true;
            }
            match stream.read(spare) {
                Ok(0) => return false,
                Ok(n) => {
                    self.parser.commit(n);
                    if self.trigger == Trigger::Level {
                        return true;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(token = self.token.0, "read error: {e}");
                    return false;
                }
            }
        }
    }

    /// Scatter/gather write of the pending response.
    ///
    /// A partial write keeps the sent offset so the next call resumes
    /// where this one stopped.
    pub fn write(&mut self) -> WriteOutcome {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return WriteOutcome::Failed,
        };
        let response = match self.response.as_mut() {
            Some(response) => response,
            None => {
                self.reset();
                return WriteOutcome::KeepAlive;
            }
        };

        let result = loop {
            if response.is_complete() {
                break Ok(());
            }
            let written = stream.write_vectored(&response.segments());
            match written {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => response.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return WriteOutcome::Pending;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };

        // drops the file mapping
        self.response = None;
        match result {
            Ok(()) if self.linger => {
                self.reset();
                WriteOutcome::KeepAlive
            }
            Ok(()) => WriteOutcome::Close,
            Err(e) => {
                tracing::debug!(token = self.token.0, "write error: {e}");
                WriteOutcome::Failed
            }
        }
    }

    /// Parse, resolve and stage the response using a pooled backend
    /// handle held for the duration of the call.
    pub fn process(&mut self, ctx: &ServerContext) -> Next {
        let handle = ctx.backend.scoped();
        self.process_with(&ctx.doc_root, &handle)
    }

    pub fn process_with(&mut self, doc_root: &Path, handle: &BackendHandle) -> Next {
        let (code, file) = match self.parser.parse() {
            HttpCode::NoRequest => return Next::Read,
            HttpCode::GetRequest => self.do_request(doc_root, handle),
            other => (other, None),
        };

        if self.process_write(code, file) {
            Next::Write
        } else {
            Next::Close
        }
    }

    fn do_request(&mut self, doc_root: &Path, handle: &BackendHandle) -> (HttpCode, Option<FileBody>) {
        let target = route(
            self.parser.method(),
            self.parser.url(),
            self.parser.body(),
            handle,
        );
        self.real_file = doc_root.join(target.trim_start_matches('/'));
        open_target(&self.real_file)
    }

    fn process_write(&mut self, code: HttpCode, file: Option<FileBody>) -> bool {
        self.linger = keeps_alive(code, self.parser.linger());
        match build_response(code, self.linger, file) {
            Some(response) => {
                self.response = Some(response);
                true
            }
            None => false,
        }
    }
}

/// Map a request target onto a document-root relative path.
///
/// `/2` (login) and `/3` (register) POSTs go through the backend handle;
/// the other single-digit shortcuts name fixed pages.
pub fn route(method: Method, url: &str, body: &[u8], handle: &BackendHandle) -> String {
    if url == "/" {
        return "/judge.html".to_string();
    }

    let segment = match url.rfind('/') {
        Some(slash) => &url[slash + 1..],
        None => url,
    };
    let code = match segment.chars().next() {
        Some(c)
            if c.is_ascii_digit()
                && (segment.len() == 1 || segment[1..].eq_ignore_ascii_case("CGISQL.cgi")) =>
        {
            c
        }
        _ => return url.to_string(),
    };

    match (code, method) {
        ('2', Method::Post) => {
            let ok = parse_credentials(body).map_or(false, |(user, password)| {
                handle.verify(&user, &password)
            });
            let target = if ok { "/welcome.html" } else { "/logError.html" };
            target.to_string()
        }
        ('3', Method::Post) => {
            let registered = match parse_credentials(body) {
                Some((user, password)) => match handle.register(&user, &password) {
                    Ok(()) => {
                        tracing::info!(user = %user, "user registered");
                        true
                    }
                    Err(e) => {
                        tracing::warn!("register failed: {e}");
                        false
                    }
                },
                None => false,
            };
            let target = if registered { "/log.html" } else { "/registerError.html" };
            target.to_string()
        }
        ('0', _) => "/register.html".to_string(),
        ('1', _) => "/log.html".to_string(),
        ('5', _) => "/picture.html".to_string(),
        ('6', _) => "/video.html".to_string(),
        ('7', _) => "/fans.html".to_string(),
        _ => url.to_string(),
    }
}

/// Stat and map the target file read-only
fn open_target(path: &Path) -> (HttpCode, Option<FileBody>) {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            let code = match e.kind() {
                io::ErrorKind::NotFound => HttpCode::NoResource,
                io::ErrorKind::PermissionDenied => HttpCode::ForbiddenRequest,
                _ => HttpCode::InternalError,
            };
            return (code, None);
        }
    };

    if meta.is_dir() {
        return (HttpCode::ForbiddenRequest, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // world-readable only
        if meta.permissions().mode() & 0o004 == 0 {
            return (HttpCode::ForbiddenRequest, None);
        }
    }
    if meta.len() == 0 {
        return (HttpCode::InternalError, None);
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return (HttpCode::ForbiddenRequest, None),
    };
    // SAFETY: read-only mapping; served files are not expected to be
    // truncated while a response is in flight.
    match unsafe { Mmap::map(&file) } {
        Ok(map) => (
            HttpCode::FileRequest,
            Some(FileBody {
                map,
                content_type: content_type(path),
            }),
        ),
        Err(e) => {
            tracing::error!(path = %path.display(), "mmap failed: {e}");
            (HttpCode::InternalError, None)
        }
    }
}
