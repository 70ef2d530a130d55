//! Shared utilities for integration testing.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use bare_proxy::config::BareConfig;
use bare_proxy::BareServer;

/// Config suitable for loopback testing: outbound filtering off, error
/// detail on.
pub fn test_config() -> BareConfig {
    let mut config = BareConfig::default();
    config.ssrf.block_local = false;
    config.server.log_errors = true;
    config
}

/// Start a tunnel server on an ephemeral port.
pub async fn spawn_server(config: BareConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = BareServer::new(config);
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });
    addr
}

/// Start a mock upstream that answers every request with a fixed response.
#[allow(dead_code)]
pub async fn start_mock_backend(response: String) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let response = response.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut request = Vec::new();
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            request.extend_from_slice(&buf[..n]);
                            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a mock upstream that reflects the received request head back as
/// the response body.
#[allow(dead_code)]
pub async fn start_reflecting_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut request = Vec::new();
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            request.extend_from_slice(&buf[..n]);
                            if let Some(end) =
                                request.windows(4).position(|w| w == b"\r\n\r\n")
                            {
                                request.truncate(end);
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    request.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&request).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a mock WebSocket upstream that echoes the offered subprotocol, a
/// Set-Cookie header, and every text/binary message.
#[allow(dead_code)]
pub async fn start_mock_ws_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let callback = |req: &Request, mut resp: Response| {
                    if let Some(protocol) = req.headers().get("sec-websocket-protocol") {
                        resp.headers_mut()
                            .insert("sec-websocket-protocol", protocol.clone());
                    }
                    resp.headers_mut()
                        .insert("set-cookie", "session=abc".parse().unwrap());
                    Ok(resp)
                };
                let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() && msg.to_text().unwrap_or_default() == "close-now" {
                        let _ = ws.close(None).await;
                        break;
                    }
                    if msg.is_text() || msg.is_binary() {
                        if ws.send(msg).await.is_err() {
                            break;
                        }
                    } else if msg.is_close() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Open a raw client connection and read the response head.
#[allow(dead_code)]
pub async fn raw_exchange(addr: SocketAddr, request: String) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before response head completed");
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    (stream, String::from_utf8_lossy(&head).into_owned())
}
