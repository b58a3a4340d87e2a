//! Protocol Layer: HTTP/1.1 subset
//!
//! Prinsip desain:
//! - Incremental: parser bisa dipanggil ulang setiap ada data baru
//! - Fixed buffers: receive buffer dan header buffer dialokasi sekali
//! - Zero-Copy body: file di-mmap, dikirim lewat vectored write
//!
//! Only GET and POST with `Content-Length` bodies are understood.

mod mime;
mod request;
mod response;

pub use mime::content_type;
pub use request::{parse_credentials, HttpCode, LineStatus, Method, RequestParser};
pub use response::{
    build_response, keeps_alive, Body, FileBody, Response, BUSY_RESPONSE, HEADER_BUFFER_SIZE,
};
