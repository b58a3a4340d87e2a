//! HTTP/1.1 request parser
//!
//! Two nested state machines over a fixed receive buffer:
//! - line reader: scan for `\r\n`, a dangling `\r` means wait for more data
//! - request state: REQUEST_LINE -> HEADERS -> CONTENT
//!
//! The buffer is allocated once per connection slot and only reset between
//! requests, never reallocated.

use std::collections::HashMap;
use std::fmt;

/// Supported request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl Method {
    fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("GET") {
            Some(Self::Get)
        } else if token.eq_ignore_ascii_case("POST") {
            Some(Self::Post)
        } else {
            None
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Hasil pemrosesan request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    /// incomplete, read more
    NoRequest,
    /// a complete request was parsed
    GetRequest,
    BadRequest,
    NoResource,
    ForbiddenRequest,
    FileRequest,
    InternalError,
    ClosedConnection,
}

/// Status pembacaan satu baris
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Ok,
    Bad,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckState {
    RequestLine,
    Headers,
    Content,
}

/// Incremental request parser with its own receive buffer
pub struct RequestParser {
    buf: Box<[u8]>,
    /// one past the last byte received
    read_idx: usize,
    /// next byte the line reader looks at
    checked_idx: usize,
    /// start of the line being parsed
    start_line: usize,
    /// end of the last complete line, excluding `\r\n`
    line_end: usize,
    state: CheckState,

    method: Method,
    url: String,
    version: String,
    headers: HashMap<String, String>,
    content_length: usize,
    linger: bool,
    body: Vec<u8>,
}

impl RequestParser {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_idx: 0,
            checked_idx: 0,
            start_line: 0,
            line_end: 0,
            state: CheckState::RequestLine,
            method: Method::Get,
            url: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            content_length: 0,
            linger: false,
            body: Vec::new(),
        }
    }

    /// Reset untuk request berikutnya, buffer di-reuse
    pub fn reset(&mut self) {
        self.read_idx = 0;
        self.checked_idx = 0;
        self.start_line = 0;
        self.line_end = 0;
        self.state = CheckState::RequestLine;
        self.method = Method::Get;
        self.url.clear();
        self.version.clear();
        self.headers.clear();
        self.content_length = 0;
        self.linger = false;
        self.body.clear();
    }

    /// Unfilled tail of the receive buffer, for socket reads
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.read_idx..]
    }

    /// Mark `n` bytes of [`spare_mut`](Self::spare_mut) as received
    #[inline]
    pub fn commit(&mut self, n: usize) {
        self.read_idx = (self.read_idx + n).min(self.buf.len());
    }

    /// Copy `data` into the buffer. Returns how many bytes fit.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        let spare = self.spare_mut();
        let n = data.len().min(spare.len());
        spare[..n].copy_from_slice(&data[..n]);
        self.commit(n);
        n
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.read_idx >= self.buf.len()
    }

    pub fn buffered(&self) -> usize {
        self.read_idx
    }

    /// Scan for the next line terminator
    pub fn parse_line(&mut self) -> LineStatus {
        while self.checked_idx < self.read_idx {
            match self.buf[self.checked_idx] {
                b'\r' => {
                    if self.checked_idx + 1 == self.read_idx {
                        // `\n` has not arrived yet
                        return LineStatus::Open;
                    }
                    if self.buf[self.checked_idx + 1] == b'\n' {
                        self.line_end = self.checked_idx;
                        self.checked_idx += 2;
                        return LineStatus::Ok;
                    }
                    return LineStatus::Bad;
                }
                b'\n' => return LineStatus::Bad,
                _ => self.checked_idx += 1,
            }
        }
        LineStatus::Open
    }

    /// Drive the state machine over everything buffered so far.
    ///
    /// Returns `NoRequest` while more bytes are needed, `GetRequest` once a
    /// full request (including any declared body) is available, and
    /// `BadRequest` for anything malformed.
    pub fn parse(&mut self) -> HttpCode {
        loop {
            if self.state == CheckState::Content {
                return self.parse_content();
            }

            match self.parse_line() {
                LineStatus::Open => {
                    if self.is_full() {
                        // a line longer than the buffer can never complete
                        return HttpCode::BadRequest;
                    }
                    return HttpCode::NoRequest;
                }
                LineStatus::Bad => return HttpCode::BadRequest,
                LineStatus::Ok => {}
            }

            let line = match std::str::from_utf8(&self.buf[self.start_line..self.line_end]) {
                Ok(line) => line.to_owned(),
                Err(_) => return HttpCode::BadRequest,
            };
            self.start_line = self.checked_idx;

            let code = match self.state {
                CheckState::RequestLine => self.parse_request_line(&line),
                CheckState::Headers => self.parse_header(&line),
                CheckState::Content => unreachable!("content is handled before line reading"),
            };
            match code {
                HttpCode::NoRequest => continue,
                other => return other,
            }
        }
    }

    /// `METHOD SP TARGET SP VERSION`
    fn parse_request_line(&mut self, line: &str) -> HttpCode {
        let mut parts = line.split([' ', '\t']).filter(|part| !part.is_empty());
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v)) => (m, t, v),
            _ => return HttpCode::BadRequest,
        };
        if parts.next().is_some() {
            return HttpCode::BadRequest;
        }

        self.method = match Method::parse(method) {
            Some(method) => method,
            None => return HttpCode::BadRequest,
        };
        if !version.eq_ignore_ascii_case("HTTP/1.1") {
            return HttpCode::BadRequest;
        }

        let path = match strip_authority(target) {
            Some(path) => path,
            None => return HttpCode::BadRequest,
        };

        self.url = path.to_string();
        self.version = version.to_string();
        self.state = CheckState::Headers;
        HttpCode::NoRequest
    }

    fn parse_header(&mut self, line: &str) -> HttpCode {
        if line.is_empty() {
            if self.content_length > 0 {
                if self.content_length > self.buf.len().saturating_sub(self.start_line) {
                    // declared body cannot fit the receive buffer
                    return HttpCode::BadRequest;
                }
                self.state = CheckState::Content;
                return HttpCode::NoRequest;
            }
            return HttpCode::GetRequest;
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => return HttpCode::BadRequest,
        };
        if name.is_empty() {
            return HttpCode::BadRequest;
        }

        if name.eq_ignore_ascii_case("Connection") {
            self.linger = value.eq_ignore_ascii_case("keep-alive");
        } else if name.eq_ignore_ascii_case("Content-Length") {
            self.content_length = match value.parse() {
                Ok(len) => len,
                Err(_) => return HttpCode::BadRequest,
            };
        }

        // duplicates: last occurrence wins
        self.headers.insert(name.to_string(), value.to_string());
        HttpCode::NoRequest
    }

    fn parse_content(&mut self) -> HttpCode {
        let end = match self.checked_idx.checked_add(self.content_length) {
            Some(end) if end <= self.buf.len() => end,
            _ => return HttpCode::BadRequest,
        };
        if self.read_idx < end {
            return HttpCode::NoRequest;
        }
        self.body.clear();
        self.body.extend_from_slice(&self.buf[self.checked_idx..end]);
        self.checked_idx = end;
        self.start_line = end;
        HttpCode::GetRequest
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Header lookup by exact name as received
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn host(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("Host"))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// `Connection: keep-alive` was sent
    pub fn linger(&self) -> bool {
        self.linger
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Drop a leading `http://host` / `https://host` and keep the path.
fn strip_authority(target: &str) -> Option<&str> {
    // compare bytes: the prefix is ASCII, so a match also lands on a char boundary
    let bytes = target.as_bytes();
    let rest = if bytes.get(..7).map_or(false, |p| p.eq_ignore_ascii_case(b"http://")) {
        &target[7..]
    } else if bytes.get(..8).map_or(false, |p| p.eq_ignore_ascii_case(b"https://")) {
        &target[8..]
    } else {
        return target.starts_with('/').then_some(target);
    };
    rest.find('/').map(|slash| &rest[slash..])
}

/// Parse an `application/x-www-form-urlencoded` credential body
pub fn parse_credentials(body: &[u8]) -> Option<(String, String)> {
    let body = std::str::from_utf8(body).ok()?;
    let mut user = None;
    let mut password = None;
    for pair in body.trim_end_matches(['\r', '\n']).split('&') {
        match pair.split_once('=') {
            Some(("user" | "username", value)) => user = Some(value.to_string()),
            Some(("password" | "passwd", value)) => password = Some(value.to_string()),
            _ => {}
        }
    }
    Some((user?, password?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const GET_KEEP_ALIVE: &[u8] =
        b"GET /index.html HTTP/1.1\r\nHost: h\r\nConnection: keep-alive\r\n\r\n";

    fn parse_all(data: &[u8]) -> (RequestParser, HttpCode) {
        let mut parser = RequestParser::new(2048);
        assert_eq!(parser.feed(data), data.len());
        let code = parser.parse();
        (parser, code)
    }

    #[test]
    fn test_get_in_one_piece() {
        let (parser, code) = parse_all(GET_KEEP_ALIVE);
        assert_eq!(code, HttpCode::GetRequest);
        assert_eq!(parser.method(), Method::Get);
        assert_eq!(parser.url(), "/index.html");
        assert_eq!(parser.version(), "HTTP/1.1");
        assert_eq!(parser.host(), Some("h"));
        assert!(parser.linger());
    }

    #[test]
    fn test_get_split_at_every_boundary() {
        for split in 0..=GET_KEEP_ALIVE.len() {
            let mut parser = RequestParser::new(2048);
            parser.feed(&GET_KEEP_ALIVE[..split]);
            let first = parser.parse();
            if split < GET_KEEP_ALIVE.len() {
                assert_eq!(first, HttpCode::NoRequest, "split at {split}");
                parser.feed(&GET_KEEP_ALIVE[split..]);
                assert_eq!(parser.parse(), HttpCode::GetRequest, "split at {split}");
            } else {
                assert_eq!(first, HttpCode::GetRequest);
            }
            assert_eq!(parser.url(), "/index.html");
            assert!(parser.linger());
        }
    }

    #[test]
    fn test_get_byte_by_byte() {
        let mut parser = RequestParser::new(2048);
        let mut last = HttpCode::NoRequest;
        for byte in GET_KEEP_ALIVE {
            parser.feed(std::slice::from_ref(byte));
            last = parser.parse();
        }
        assert_eq!(last, HttpCode::GetRequest);
    }

    #[test]
    fn test_dangling_cr_is_open() {
        let mut parser = RequestParser::new(64);
        parser.feed(b"GET / HTTP/1.1\r");
        assert_eq!(parser.parse_line(), LineStatus::Open);
        parser.feed(b"\n");
        assert_eq!(parser.parse_line(), LineStatus::Ok);
    }

    #[test]
    fn test_post_body_completes_later() {
        let (mut parser, code) = parse_all(b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nab");
        assert_eq!(code, HttpCode::NoRequest);
        assert_eq!(parser.content_length(), 5);

        parser.feed(b"cde");
        assert_eq!(parser.parse(), HttpCode::GetRequest);
        assert_eq!(parser.method(), Method::Post);
        assert_eq!(parser.body(), b"abcde");
    }

    #[rstest]
    #[case::unsupported_method(b"FOO /x HTTP/1.1\r\n".as_slice())]
    #[case::old_version(b"GET /x HTTP/1.0\r\n".as_slice())]
    #[case::missing_version(b"GET /x\r\n".as_slice())]
    #[case::relative_target(b"GET index.html HTTP/1.1\r\n".as_slice())]
    #[case::bare_lf(b"GET /x HTTP/1.1\n".as_slice())]
    #[case::cr_without_lf(b"GET /x HTTP/1.1\rX".as_slice())]
    #[case::header_without_colon(b"GET /x HTTP/1.1\r\nHost h\r\n\r\n".as_slice())]
    #[case::bad_length(b"POST /x HTTP/1.1\r\nContent-Length: abc\r\n\r\n".as_slice())]
    #[case::length_overflows(b"POST /x HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n".as_slice())]
    #[case::multibyte_relative_target("GET httpx\u{20ac}/ HTTP/1.1\r\n\r\n".as_bytes())]
    fn test_bad_requests(#[case] input: &[u8]) {
        let (_, code) = parse_all(input);
        assert_eq!(code, HttpCode::BadRequest);
    }

    #[rstest]
    #[case("http://example.com/a/b.html", "/a/b.html")]
    #[case("HTTPS://example.com:8443/", "/")]
    #[case("/plain", "/plain")]
    #[case("/aaaaa\u{20ac}x", "/aaaaa\u{20ac}x")]
    #[case("/aaaaaa\u{20ac}x", "/aaaaaa\u{20ac}x")]
    fn test_scheme_host_stripped(#[case] target: &str, #[case] path: &str) {
        let request = format!("GET {target} HTTP/1.1\r\n\r\n");
        let (parser, code) = parse_all(request.as_bytes());
        assert_eq!(code, HttpCode::GetRequest);
        assert_eq!(parser.url(), path);
    }

    #[test]
    fn test_scheme_without_path_is_bad() {
        let (_, code) = parse_all(b"GET http://example.com HTTP/1.1\r\n\r\n");
        assert_eq!(code, HttpCode::BadRequest);
    }

    #[test]
    fn test_headers_case_preserved_last_wins() {
        let (parser, code) =
            parse_all(b"GET / HTTP/1.1\r\nX-Trace: one\r\nX-Trace: two\r\nconnection: close\r\n\r\n");
        assert_eq!(code, HttpCode::GetRequest);
        assert_eq!(parser.header("X-Trace"), Some("two"));
        assert_eq!(parser.header("connection"), Some("close"));
        assert!(!parser.linger());
    }

    #[test]
    fn test_oversized_body_rejected() {
        let mut parser = RequestParser::new(128);
        parser.feed(b"POST /x HTTP/1.1\r\nContent-Length: 4096\r\n\r\n");
        assert_eq!(parser.parse(), HttpCode::BadRequest);
    }

    #[test]
    fn test_line_longer_than_buffer_rejected() {
        let mut parser = RequestParser::new(32);
        parser.feed(&[b'a'; 64]);
        assert!(parser.is_full());
        assert_eq!(parser.parse(), HttpCode::BadRequest);
    }

    #[test]
    fn test_reset_reuses_buffer() {
        let (mut parser, code) = parse_all(GET_KEEP_ALIVE);
        assert_eq!(code, HttpCode::GetRequest);
        parser.reset();
        assert_eq!(parser.buffered(), 0);
        assert!(parser.headers().is_empty());
        parser.feed(b"POST /2 HTTP/1.1\r\n\r\n");
        assert_eq!(parser.parse(), HttpCode::GetRequest);
        assert_eq!(parser.method(), Method::Post);
        assert!(!parser.linger());
    }

    #[rstest]
    #[case(b"user=admin&password=123".as_slice(), Some(("admin", "123")))]
    #[case(b"username=bob&password=pw\r\n".as_slice(), Some(("bob", "pw")))]
    #[case(b"user=only".as_slice(), None)]
    fn test_parse_credentials(#[case] body: &[u8], #[case] expected: Option<(&str, &str)>) {
        let parsed = parse_credentials(body);
        assert_eq!(
            parsed.as_ref().map(|(u, p)| (u.as_str(), p.as_str())),
            expected
        );
    }
}
