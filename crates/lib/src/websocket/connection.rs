//! One WebSocket connection: message reassembly on the read side, a cloneable
//! sender for the write side.

use std::io::Cursor;
use std::sync::Arc;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Chain, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use super::{CloseStatus, Frame, Opcode, WebSocketError};
use crate::tls::MaybeTlsStream;

/// Write side of a connection. Clones share the socket; frames are written whole
/// under a lock so concurrent senders never interleave bytes.
pub struct WebSocketSender<S = MaybeTlsStream> {
    writer: Arc<Mutex<WriteHalf<S>>>,
}

impl<S> Clone for WebSocketSender<S> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
        }
    }
}

impl<S: AsyncWrite> WebSocketSender<S> {
    /// Send `text` as a single final, masked TEXT frame.
    pub async fn send_message(&self, text: &str) -> Result<(), WebSocketError> {
        self.send_frame(&Frame::text(text)).await
    }

    pub async fn send_pong(&self, payload: Vec<u8>) -> Result<(), WebSocketError> {
        self.send_frame(&Frame::pong(payload)).await
    }

    /// Client frames are always masked.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), WebSocketError> {
        let raw = frame.serialize(true)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&raw).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), WebSocketError> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

/// A connected WebSocket. Dropping it (and every sender clone) closes the socket.
pub struct WebSocket<S = MaybeTlsStream> {
    reader: Chain<Cursor<Vec<u8>>, ReadHalf<S>>,
    sender: WebSocketSender<S>,
    close_status: Option<CloseStatus>,
}

impl<S> std::fmt::Debug for WebSocket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("close_status", &self.close_status)
            .finish_non_exhaustive()
    }
}

impl<S: AsyncRead + AsyncWrite> WebSocket<S> {
    pub fn new(stream: S) -> Self {
        Self::with_buffered(stream, Vec::new())
    }

    /// Wrap a stream whose first bytes were already read off the socket
    /// (frames that arrived in the same packet as the handshake response).
    pub fn with_buffered(stream: S, buffered: Vec<u8>) -> Self {
        let (read_half, write_half) = split(stream);
        Self {
            reader: Cursor::new(buffered).chain(read_half),
            sender: WebSocketSender {
                writer: Arc::new(Mutex::new(write_half)),
            },
            close_status: None,
        }
    }

    pub fn sender(&self) -> WebSocketSender<S> {
        self.sender.clone()
    }

    /// Status from the peer's close frame, once one has been received.
    pub fn close_status(&self) -> Option<&CloseStatus> {
        self.close_status.as_ref()
    }

    pub async fn send_message(&self, text: &str) -> Result<(), WebSocketError> {
        self.sender.send_message(text).await
    }

    pub async fn send_pong(&self, payload: Vec<u8>) -> Result<(), WebSocketError> {
        self.sender.send_pong(payload).await
    }

    /// Read frames until one has FIN set and return the accumulated payload.
    ///
    /// TEXT, BINARY and CONTINUATION payloads are concatenated. A PING is answered
    /// with a PONG echoing its payload, and that payload is also appended to the
    /// message; PONG payloads are appended too. A CLOSE frame shuts the socket down
    /// and yields `None`, as does end of stream.
    pub async fn receive_message(&mut self) -> Result<Option<Vec<u8>>, WebSocketError> {
        let mut message = Vec::new();
        loop {
            let Some(frame) = Frame::read_from(&mut self.reader).await? else {
                return Ok(None);
            };

            match frame.opcode {
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    message.extend_from_slice(&frame.payload);
                }
                Opcode::Close => {
                    let status = CloseStatus::from_payload(&frame.payload);
                    log::info!("websocket: peer closed the connection: {}", status);
                    self.close_status = Some(status);
                    if let Err(e) = self.sender.shutdown().await {
                        log::debug!("websocket: shutdown after close failed: {}", e);
                    }
                    return Ok(None);
                }
                Opcode::Ping => {
                    self.sender.send_pong(frame.payload.clone()).await?;
                    message.extend_from_slice(&frame.payload);
                }
                Opcode::Pong => {
                    log::debug!("websocket: pong received ({} bytes)", frame.payload.len());
                    message.extend_from_slice(&frame.payload);
                }
            }

            if frame.fin {
                return Ok(Some(message));
            }
            if message.is_empty() {
                return Err(WebSocketError::UnprocessableOpcode(frame.opcode));
            }
        }
    }

    /// Send a normal-closure frame and shut down the write side.
    pub async fn close(&self) -> Result<(), WebSocketError> {
        self.sender.send_frame(&Frame::close(1000, "")).await?;
        self.sender.shutdown().await
    }
}
