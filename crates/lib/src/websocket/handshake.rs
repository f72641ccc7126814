//! Connection factory: TCP connect with a bounded retry, optional TLS, HTTP Upgrade.

use std::future::Future;
use std::io;
use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{random_bytes, WebSocket, WebSocketError};
use crate::http::{find_subsequence, HttpError, Url, HEADER_BOUNDARY};
use crate::tls::{MaybeTlsStream, TlsConfig};

pub const DEFAULT_RETRIES: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const TLS_PORT: u16 = 443;
const SWITCHING_PROTOCOLS: &str = "101 Switching Protocols";
const READ_CHUNK: usize = 4096;

/// Opens WebSocket connections to one endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketFactory {
    /// Request target for the Upgrade request, e.g. `/?v=10&encoding=json`.
    pub route: String,
    pub host: String,
    pub port: u16,
    /// Extra connect attempts after the first one times out.
    pub retries: u32,
    pub connect_timeout: Duration,
    tls: TlsConfig,
}

impl WebSocketFactory {
    pub fn new(route: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            route: route.into(),
            host: host.into(),
            port,
            retries: DEFAULT_RETRIES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls: TlsConfig::default(),
        }
    }

    /// Factory for a `ws://` or `wss://` URL.
    pub fn from_url(url: &Url) -> Result<Self, HttpError> {
        let port = url.port_or_default().ok_or_else(|| {
            HttpError::MalformedUrl(format!("{} (no port and unknown scheme)", url))
        })?;
        Ok(Self::new(url.route_for_send(), url.domain.clone(), port))
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Connect, wrap in TLS when targeting port 443, and perform the Upgrade.
    /// Returns the connection and the raw handshake response head.
    pub async fn handshake(&self) -> Result<(WebSocket, String), WebSocketError> {
        let tcp = self.connect().await?;
        let stream = if self.port == TLS_PORT {
            self.tls.connect(&self.host, tcp).await?
        } else {
            MaybeTlsStream::Plain(tcp)
        };
        self.upgrade(stream).await
    }

    async fn connect(&self) -> Result<TcpStream, WebSocketError> {
        let stream = self
            .connect_with(|| TcpStream::connect((self.host.clone(), self.port)))
            .await?;
        log::debug!("websocket: connected to {}:{}", self.host, self.port);
        Ok(stream)
    }

    /// Run `attempt` under the connect timeout. A timed-out attempt is retried up
    /// to `retries` more times; any other error fails at once.
    async fn connect_with<T, F, Fut>(&self, mut attempt: F) -> Result<T, WebSocketError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match timeout(self.connect_timeout, attempt()).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) if attempts > self.retries => {
                    return Err(WebSocketError::ConnectTimeout {
                        host: self.host.clone(),
                        port: self.port,
                        attempts,
                    });
                }
                Err(_) => {
                    log::warn!(
                        "websocket: connect to {}:{} timed out (attempt {}/{})",
                        self.host,
                        self.port,
                        attempts,
                        self.retries + 1
                    );
                }
            }
        }
    }

    /// Run the HTTP Upgrade exchange over an already-connected stream.
    pub async fn upgrade<S>(&self, mut stream: S) -> Result<(WebSocket<S>, String), WebSocketError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let key = base64::engine::general_purpose::STANDARD.encode(random_bytes::<16>()?);
        let request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}:{}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            self.route, self.host, self.port, key
        );
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;

        let mut response = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let boundary = loop {
            if let Some(at) = find_subsequence(&response, HEADER_BOUNDARY) {
                break at;
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(self.failure());
            }
            response.extend_from_slice(&chunk[..n]);
        };

        let body_start = boundary + HEADER_BOUNDARY.len();
        let leftover = response.split_off(body_start);
        let head = String::from_utf8_lossy(&response).into_owned();
        let status_line = head.lines().next().unwrap_or_default();
        if !status_line.contains(SWITCHING_PROTOCOLS) {
            log::warn!("websocket: upgrade rejected: {}", status_line);
            return Err(self.failure());
        }

        Ok((WebSocket::with_buffered(stream, leftover), head))
    }

    fn failure(&self) -> WebSocketError {
        WebSocketError::HandshakeFailure {
            host: self.host.clone(),
            port: self.port,
        }
    }
}
