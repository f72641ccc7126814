//! One request/response exchange per socket.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::response::{content_length, is_chunked, parse_head};
use super::{find_subsequence, Headers, HttpError, HttpMethod, HttpRequest, HttpResponse, Url};
use super::HEADER_BOUNDARY;
use crate::tls::{MaybeTlsStream, TlsConfig};

/// Size of each socket read while accumulating a response.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Zero-size chunk followed by the blank line that ends a chunked body.
const CHUNKED_TERMINATOR: &[u8] = b"0\r\n\r\n";

/// HTTP/1.1 client over raw TCP, TLS-wrapped for `https`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    tls: TlsConfig,
    read_buffer_size: usize,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(TlsConfig::default())
    }
}

impl HttpClient {
    pub fn new(tls: TlsConfig) -> Self {
        Self {
            tls,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub async fn get(&self, url: Url, headers: Headers) -> Result<HttpResponse, HttpError> {
        let request = HttpRequest::new(HttpMethod::Get, url).with_headers(headers);
        self.request(&request).await
    }

    pub async fn post(
        &self,
        url: Url,
        headers: Headers,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, HttpError> {
        let mut request = HttpRequest::new(HttpMethod::Post, url).with_headers(headers);
        request.body = body;
        self.request(&request).await
    }

    pub async fn put(
        &self,
        url: Url,
        headers: Headers,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, HttpError> {
        let mut request = HttpRequest::new(HttpMethod::Put, url).with_headers(headers);
        request.body = body;
        self.request(&request).await
    }

    pub async fn delete(&self, url: Url, headers: Headers) -> Result<HttpResponse, HttpError> {
        let request = HttpRequest::new(HttpMethod::Delete, url).with_headers(headers);
        self.request(&request).await
    }

    /// Open a socket to the request's host, send it, and read back a complete response.
    pub async fn request(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = &request.url;
        let port = url.port_or_default().ok_or_else(|| {
            HttpError::MalformedUrl(format!("{} (no port and unknown scheme)", url))
        })?;

        log::debug!("http: {} {}", request.method, url);
        let tcp = TcpStream::connect((url.domain.as_str(), port)).await?;
        let mut stream = if url.is_secure() {
            self.tls.connect(&url.domain, tcp).await?
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        let raw = request.serialize();
        exchange(&mut stream, &raw, self.read_buffer_size).await
    }
}

/// Write a serialized request and read the response from the same stream.
pub async fn exchange<S>(stream: &mut S, raw_request: &[u8], read_size: usize) -> Result<HttpResponse, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(raw_request).await?;
    stream.flush().await?;
    read_response(stream, raw_request, read_size).await
}

/// Accumulate reads until the response is complete. EOF first is a premature closure.
pub(crate) async fn read_response<R>(
    reader: &mut R,
    raw_request: &[u8],
    read_size: usize,
) -> Result<HttpResponse, HttpError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(read_size);
    let mut chunk = vec![0u8; read_size.max(1)];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::PrematureSocketClosure {
                request: String::from_utf8_lossy(raw_request).into_owned(),
            });
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(response) = completed_response(&buf)? {
            log::debug!("http: {} {} ({} bytes)", response.status_code, response.reason, buf.len());
            return Ok(response);
        }
    }
}

/// The parsed response if `buf` holds a complete one, `None` if more bytes are needed.
fn completed_response(buf: &[u8]) -> Result<Option<HttpResponse>, HttpError> {
    let Some(boundary) = find_subsequence(buf, HEADER_BOUNDARY) else {
        return Ok(None);
    };
    let (status_code, reason, headers) = parse_head(&buf[..boundary])?;
    let body = &buf[boundary + HEADER_BOUNDARY.len()..];

    if status_code == 204 {
        return Ok(Some(HttpResponse {
            status_code,
            reason,
            headers,
            body: Vec::new(),
        }));
    }

    if let Some(len) = content_length(&headers) {
        if body.len() >= len {
            return HttpResponse::parse(buf).map(Some);
        }
        return Ok(None);
    }

    if is_chunked(&headers) && body.ends_with(CHUNKED_TERMINATOR) {
        return Ok(Some(HttpResponse {
            status_code,
            reason,
            headers,
            body: decode_chunked(body),
        }));
    }

    Ok(None)
}

/// Best-effort chunked body reassembly: walks `size\r\ndata\r\n` records until the
/// zero-size chunk. Chunk extensions are ignored and trailers are not supported.
/// Anything that does not parse as a chunk record is kept verbatim.
pub fn decode_chunked(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut rest = body;
    loop {
        let Some(line_end) = find_subsequence(rest, b"\r\n") else {
            out.extend_from_slice(rest);
            break;
        };
        let size_line = String::from_utf8_lossy(&rest[..line_end]);
        let size_text = size_line.split(';').next().unwrap_or_default().trim();
        let Ok(size) = usize::from_str_radix(size_text, 16) else {
            out.extend_from_slice(rest);
            break;
        };
        if size == 0 {
            break;
        }
        let data_start = line_end + 2;
        let data_end = data_start.saturating_add(size);
        if data_end > rest.len() {
            out.extend_from_slice(&rest[data_start.min(rest.len())..]);
            break;
        }
        out.extend_from_slice(&rest[data_start..data_end]);
        rest = &rest[data_end..];
        rest = rest.strip_prefix(b"\r\n".as_slice()).unwrap_or(rest);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_body_is_reassembled() {
        assert_eq!(decode_chunked(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"), b"Wikipedia");
    }

    #[test]
    fn chunk_extensions_and_uppercase_sizes() {
        let body = b"A;name=value\r\n0123456789\r\n1\r\n!\r\n0\r\n\r\n";
        assert_eq!(decode_chunked(body), b"0123456789!");
    }

    #[test]
    fn unparsable_remainder_is_kept() {
        assert_eq!(decode_chunked(b"zz\r\nraw"), b"zz\r\nraw");
    }

    #[test]
    fn incomplete_content_length_waits_for_more() {
        let partial = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc";
        assert!(completed_response(partial).unwrap().is_none());
        let full = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc";
        assert_eq!(completed_response(full).unwrap().unwrap().body, b"abc");
    }

    #[test]
    fn no_content_completes_at_boundary() {
        let raw = b"HTTP/1.1 204 No Content\r\nDate: today\r\n\r\n";
        let resp = completed_response(raw).unwrap().unwrap();
        assert_eq!(resp.status_code, 204);
        assert!(resp.body.is_empty());
    }

    #[test]
    fn chunked_completes_only_at_terminator() {
        let head = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        let mut partial = head.clone();
        partial.extend_from_slice(b"4\r\nWiki\r\n");
        assert!(completed_response(&partial).unwrap().is_none());

        let mut full = head;
        full.extend_from_slice(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n");
        let resp = completed_response(&full).unwrap().unwrap();
        assert_eq!(resp.text(), "Wikipedia");
        assert_eq!(resp.header("transfer-encoding"), Some("chunked"));
    }

    #[tokio::test]
    async fn eof_before_completion_is_premature_closure() {
        let mut reader: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\nshort";
        let err = read_response(&mut reader, b"GET / HTTP/1.1\r\n\r\n", 8)
            .await
            .unwrap_err();
        match err {
            HttpError::PrematureSocketClosure { request } => assert!(request.starts_with("GET /")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn small_reads_accumulate_across_chunks() {
        let mut reader: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let resp = read_response(&mut reader, b"", 3).await.unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.text(), "hello");
    }
}
