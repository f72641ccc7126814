//! Tilde core library: a raw-socket HTTP/1.1 client, an RFC6455 WebSocket
//! client, and the real-time gateway session built on top of them.

pub mod config;
pub mod gateway;
pub mod http;
pub mod rest;
pub mod session;
pub mod tls;
pub mod websocket;
