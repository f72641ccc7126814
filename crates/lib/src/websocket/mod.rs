//! RFC6455 WebSocket client: frame codec, connection wrapper and Upgrade handshake.

mod close;
mod connection;
mod frame;
mod handshake;

pub use close::{status_text, CloseStatus};
pub use connection::{WebSocket, WebSocketSender};
pub use frame::{apply_mask, Frame, Opcode, MAX_PAYLOAD_LEN};
pub use handshake::{WebSocketFactory, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RETRIES};

use std::io;

use crate::tls::TlsError;

#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
    #[error("unknown websocket opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("cannot process {0:?} frame outside a fragmented message")]
    UnprocessableOpcode(Opcode),
    #[error("websocket handshake with {host}:{port} failed")]
    HandshakeFailure { host: String, port: u16 },
    #[error("could not connect to {host}:{port} after {attempts} attempts")]
    ConnectTimeout {
        host: String,
        port: u16,
        attempts: u32,
    },
    #[error("frame payload of {0} bytes exceeds the limit")]
    PayloadTooLarge(u64),
    #[error("could not generate random bytes: {0}")]
    Entropy(getrandom::Error),
    #[error("websocket i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
}

impl WebSocketError {
    /// True when the peer went away mid-stream (reset, EOF inside a frame, broken pipe).
    pub fn is_disconnect(&self) -> bool {
        match self {
            WebSocketError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Fill a fixed-size array from the OS RNG.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], WebSocketError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(WebSocketError::Entropy)?;
    Ok(bytes)
}
