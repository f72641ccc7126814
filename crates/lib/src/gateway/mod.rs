//! Real-time gateway client: envelope protocol, session state machine,
//! heartbeat scheduler and dispatch routing.
//!
//! Connection lifecycle: Connecting -> AwaitingHello -> Identifying -> Running -> Closed.

mod client;
pub mod handlers;
pub mod heartbeat;
pub mod model;
pub mod protocol;

pub use client::{GatewayClient, DEFAULT_HANDLER_QUEUE};
pub use handlers::HandlerRegistry;
pub use heartbeat::{Timer, TokioTimer};
pub use protocol::{Envelope, Intents};

use crate::http::HttpError;
use crate::websocket::WebSocketError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("dispatch event received before the ready event established the client identity")]
    IdentityNotEstablished,
    #[error("unexpected gateway payload: {0}")]
    UnexpectedPayload(String),
    #[error("invalid gateway json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    WebSocket(#[from] WebSocketError),
    #[error(transparent)]
    Http(#[from] HttpError),
}
