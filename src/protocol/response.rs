//! Response composition: header buffer + body source
//!
//! The header block lives in a small bounded buffer; the body is a separate
//! segment (usually a read-only file mapping) so both go out in a single
//! vectored write without copying the file.

use memmap2::Mmap;
use std::io::{IoSlice, Write as _};

use super::HttpCode;

/// Batas ukuran header block
pub const HEADER_BUFFER_SIZE: usize = 1024;

const OK_TITLE: &str = "OK";
const BAD_REQUEST_TITLE: &str = "Bad Request";
const BAD_REQUEST_FORM: &str =
    "Your request has bad syntax or is inherently impossible to satisfy.\n";
const FORBIDDEN_TITLE: &str = "Forbidden";
const FORBIDDEN_FORM: &str = "You do not have permission to get file from this server.\n";
const NOT_FOUND_TITLE: &str = "Not Found";
const NOT_FOUND_FORM: &str = "The requested file was not found on this server.\n";
const INTERNAL_TITLE: &str = "Internal Error";
const INTERNAL_FORM: &str = "There was an unusual problem serving the request file.\n";

pub const BUSY_RESPONSE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
Content-Type: text/plain\r\n\
Content-Length: 20\r\n\
Connection: close\r\n\
\r\n\
Internal server busy";

/// Second write segment
pub enum Body {
    Empty,
    Static(&'static [u8]),
    Mapped(Mmap),
}

impl Body {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Static(bytes) => bytes,
            Body::Mapped(map) => map,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// File yang siap dikirim sebagai body
pub struct FileBody {
    pub map: Mmap,
    pub content_type: &'static str,
}

/// A response being written, tracking how much has been sent
pub struct Response {
    status: u16,
    header: Vec<u8>,
    body: Body,
    sent: usize,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header_bytes(&self) -> &[u8] {
        &self.header
    }

    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_bytes()
    }

    pub fn total_len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.total_len() - self.sent
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Unsent tail of both segments
    pub fn segments(&self) -> [IoSlice<'_>; 2] {
        let header_len = self.header.len();
        let head_from = self.sent.min(header_len);
        let body_from = self.sent.saturating_sub(header_len);
        [
            IoSlice::new(&self.header[head_from..]),
            IoSlice::new(&self.body.as_bytes()[body_from..]),
        ]
    }

    /// Record `n` more bytes as written
    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.sent = (self.sent + n).min(self.total_len());
    }
}

/// Bounded header writer, mirip `add_response` berformat
struct HeaderWriter {
    buf: Vec<u8>,
}

impl HeaderWriter {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(HEADER_BUFFER_SIZE),
        }
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) -> Option<()> {
        let before = self.buf.len();
        self.buf.write_fmt(args).ok()?;
        if self.buf.len() > HEADER_BUFFER_SIZE {
            self.buf.truncate(before);
            return None;
        }
        Some(())
    }

    fn status_line(&mut self, status: u16, title: &str) -> Option<()> {
        self.line(format_args!("HTTP/1.1 {status} {title}\r\n"))
    }

    fn headers(&mut self, content_type: &str, content_length: usize, keep_alive: bool) -> Option<()> {
        self.line(format_args!("Content-Type: {content_type}\r\n"))?;
        self.line(format_args!("Content-Length: {content_length}\r\n"))?;
        let mode = if keep_alive { "keep-alive" } else { "close" };
        self.line(format_args!("Connection: {mode}\r\n"))?;
        self.line(format_args!("\r\n"))
    }
}

/// Compose the response for a classified request.
///
/// `BadRequest` always closes. Returns `None` for codes that produce no
/// response (`NoRequest`, `GetRequest`, `ClosedConnection`), for a
/// `FileRequest` without a file, or when the header block overflows.
pub fn build_response(code: HttpCode, keep_alive: bool, file: Option<FileBody>) -> Option<Response> {
    let (status, title, body, content_type, keep_alive) = match code {
        HttpCode::FileRequest => {
            let file = file?;
            (200, OK_TITLE, Body::Mapped(file.map), file.content_type, keep_alive)
        }
        HttpCode::BadRequest => (
            400,
            BAD_REQUEST_TITLE,
            Body::Static(BAD_REQUEST_FORM.as_bytes()),
            "text/html",
            false,
        ),
        HttpCode::ForbiddenRequest => (
            403,
            FORBIDDEN_TITLE,
            Body::Static(FORBIDDEN_FORM.as_bytes()),
            "text/html",
            keep_alive,
        ),
        HttpCode::NoResource => (
            404,
            NOT_FOUND_TITLE,
            Body::Static(NOT_FOUND_FORM.as_bytes()),
            "text/html",
            keep_alive,
        ),
        HttpCode::InternalError => (
            500,
            INTERNAL_TITLE,
            Body::Static(INTERNAL_FORM.as_bytes()),
            "text/html",
            keep_alive,
        ),
        HttpCode::NoRequest | HttpCode::GetRequest | HttpCode::ClosedConnection => return None,
    };

    let mut writer = HeaderWriter::new();
    writer.status_line(status, title)?;
    writer.headers(content_type, body.len(), keep_alive)?;

    Some(Response {
        status,
        header: writer.buf,
        body,
        sent: 0,
    })
}

/// Whether the connection stays open after `code`'s response
pub fn keeps_alive(code: HttpCode, requested: bool) -> bool {
    requested && code != HttpCode::BadRequest
}
