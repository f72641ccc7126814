//! Integration tests: WebSocketFactory::handshake against a loopback TCP server
//! that answers the Upgrade request and then speaks raw frames.

use lib::websocket::{Frame, Opcode, WebSocketError, WebSocketFactory};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn read_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.expect("read upgrade request");
        buf.push(byte[0]);
    }
    String::from_utf8(buf).expect("utf8 head")
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local_addr").port();
    (listener, port)
}

#[tokio::test]
async fn handshake_then_exchange_messages() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let request = read_head(&mut stream).await;

        let mut reply = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n".to_vec();
        reply.extend(Frame::text(r#"{"op":10}"#).serialize_with_mask(None));
        stream.write_all(&reply).await.expect("write reply");

        let frame = Frame::read_from(&mut stream)
            .await
            .expect("read frame")
            .expect("frame");
        stream
            .write_all(&Frame::close(1000, "bye").serialize_with_mask(None))
            .await
            .expect("write close");
        (request, frame)
    });

    let factory = WebSocketFactory::new("/?v=10", "127.0.0.1", port)
        .with_connect_timeout(Duration::from_secs(2));
    let (mut ws, head) = factory.handshake().await.expect("handshake");
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols"));

    let first = ws.receive_message().await.expect("receive").expect("message");
    assert_eq!(first, br#"{"op":10}"#);

    ws.send_message("hello").await.expect("send");
    assert_eq!(ws.receive_message().await.expect("receive close"), None);
    assert_eq!(ws.close_status().and_then(|s| s.code), Some(1000));

    let (request, frame) = server.await.expect("server");
    assert!(request.starts_with("GET /?v=10 HTTP/1.1\r\n"));
    assert!(request.contains(&format!("Host: 127.0.0.1:{}\r\n", port)));
    assert!(request.contains("Upgrade: websocket\r\n"));
    assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
    assert_eq!(frame.opcode, Opcode::Text);
    assert_eq!(frame.payload, b"hello");
}

#[tokio::test]
async fn non_101_status_is_handshake_failure() {
    let (listener, port) = listener().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        read_head(&mut stream).await;
        stream
            .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
            .await
            .expect("write reply");
    });

    let factory = WebSocketFactory::new("/", "127.0.0.1", port);
    let err = factory.handshake().await.expect_err("should be rejected");
    match err {
        WebSocketError::HandshakeFailure { host, port: p } => {
            assert_eq!(host, "127.0.0.1");
            assert_eq!(p, port);
        }
        other => panic!("unexpected error: {other}"),
    }
    server.await.expect("server");
}

#[tokio::test]
async fn connection_refused_is_io_error() {
    let (listener, port) = listener().await;
    drop(listener);

    let factory = WebSocketFactory::new("/", "127.0.0.1", port).with_retries(0);
    let err = factory.handshake().await.expect_err("nothing is listening");
    assert!(matches!(err, WebSocketError::Io(_)), "got {err}");
}
