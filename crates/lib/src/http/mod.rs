//! HTTP/1.1 over raw TCP/TLS sockets.
//!
//! One request per connection. Response bodies are framed by `Content-Length`
//! or `Transfer-Encoding: chunked`; no pipelining, proxies or trailers.

mod client;
mod request;
mod response;
mod url;

pub use client::{HttpClient, DEFAULT_READ_BUFFER_SIZE};
pub use request::{Headers, HttpMethod, HttpRequest};
pub use response::HttpResponse;
pub use url::{QueryParams, Url};

use crate::tls::TlsError;

/// Errors raised while modeling or executing an HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("malformed url: {0}")]
    MalformedUrl(String),
    #[error("invalid http method: {0}")]
    InvalidMethod(String),
    #[error("socket closed before the response was complete; request was:\n{request}")]
    PrematureSocketClosure { request: String },
    #[error("malformed http response: {0}")]
    MalformedResponse(String),
    #[error("http i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("invalid json body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Blank line separating the head of an HTTP message from its body.
pub(crate) const HEADER_BOUNDARY: &[u8] = b"\r\n\r\n";

/// Position of the first occurrence of `needle` in `haystack`.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
