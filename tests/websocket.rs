//! WebSocket relay integration tests.

mod common;

use std::time::Duration;

use common::{raw_exchange, spawn_server, start_mock_ws_echo, test_config};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::Message;

use bare_proxy::headers::codec::encode_protocol;

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// v3: connect frame, open reply, echo relay, close propagation.
#[tokio::test]
async fn test_v3_websocket_relay() {
    let upstream = start_mock_ws_echo().await;
    let proxy = spawn_server(test_config()).await;

    let (mut ws, _) = connect_async(format!("ws://{proxy}/v3/")).await.unwrap();

    let connect = json!({
        "type": "connect",
        "remote": format!("ws://{upstream}/"),
        "protocols": ["x"],
        "headers": {},
        "forwardHeaders": [],
    });
    ws.send(Message::text(connect.to_string())).await.unwrap();

    let open = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("open frame within deadline")
        .unwrap()
        .unwrap();
    let open: Value = serde_json::from_str(open.to_text().unwrap()).unwrap();
    assert_eq!(open["type"], "open");
    assert_eq!(open["protocol"], "x");
    assert_eq!(open["setCookies"], json!(["session=abc"]));

    ws.send(Message::text("hello-tunnel")).await.unwrap();
    let echoed = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("echo within deadline")
        .unwrap()
        .unwrap();
    assert_eq!(echoed.to_text().unwrap(), "hello-tunnel");

    // Remote-initiated close reaches the client.
    ws.send(Message::text("close-now")).await.unwrap();
    let mut saw_close = false;
    while let Ok(Some(frame)) = timeout(Duration::from_secs(5), ws.next()).await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => {
                saw_close = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_close, "client should observe the remote close");
}

/// v3: a non-connect first frame ends the session.
#[tokio::test]
async fn test_v3_rejects_bad_first_frame() {
    let proxy = spawn_server(test_config()).await;
    let (mut ws, _) = connect_async(format!("ws://{proxy}/v3/")).await.unwrap();

    ws.send(Message::binary(vec![1, 2, 3])).await.unwrap();

    let mut closed = false;
    loop {
        match timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => {
                closed = true;
                break;
            }
            Ok(Some(Ok(_))) => {}
            Err(_) => break,
        }
    }
    assert!(closed, "server should close after a bad first frame");
}

/// v1: subprotocol-framed handshake, raw splice, and the meta side-channel.
#[tokio::test]
async fn test_v1_websocket_handshake_and_meta() {
    let upstream = start_mock_ws_echo().await;
    let proxy = spawn_server(test_config()).await;

    // 1. Allocate a side-channel record.
    let id = client()
        .post(format!("http://{proxy}/v1/ws-new-meta"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(id.len(), 32);

    // 2. Upgrade through the proxy with the connect payload in the
    //    subprotocol header.
    let payload = json!({
        "remote": {
            "host": upstream.ip().to_string(),
            "port": upstream.port(),
            "path": "/",
            "protocol": "ws:",
        },
        "headers": {},
        "forward_headers": [],
        "id": id,
    });
    let key = generate_key();
    let request = format!(
        "GET /v1/ HTTP/1.1\r\n\
         Host: {proxy}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Protocol: bare, {}\r\n\
         \r\n",
        encode_protocol(&payload.to_string())
    );
    let (mut stream, head) = raw_exchange(proxy, request).await;
    let head_lower = head.to_ascii_lowercase();
    assert!(head_lower.starts_with("http/1.1 101"), "head: {head}");
    assert!(head_lower.contains("sec-websocket-protocol: bare"));
    // The accept echoed from the remote must match our key.
    assert!(head_lower.contains(&derive_accept_key(key.as_bytes()).to_ascii_lowercase()));

    // 3. Frames splice through untouched. A zero mask key keeps the
    //    payload readable in the raw bytes.
    let frame = [
        0x81, 0x84, 0x00, 0x00, 0x00, 0x00, b'p', b'i', b'n', b'g',
    ];
    stream.write_all(&frame).await.unwrap();
    let mut echoed = [0u8; 6];
    timeout(Duration::from_secs(5), stream.read_exact(&mut echoed))
        .await
        .expect("echo within deadline")
        .unwrap();
    assert_eq!(&echoed, &[0x81, 0x04, b'p', b'i', b'n', b'g']);

    // 4. The side-channel now holds the remote's handshake headers and is
    //    consumed exactly once.
    let meta = client()
        .get(format!("http://{proxy}/v1/ws-meta"))
        .header("x-bare-id", &id)
        .send()
        .await
        .unwrap();
    assert_eq!(meta.status(), 200);
    let meta: Value = meta.json().await.unwrap();
    let headers = meta["headers"].as_object().unwrap();
    assert!(
        headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("sec-websocket-accept")),
        "meta headers: {headers:?}"
    );

    let again = client()
        .get(format!("http://{proxy}/v1/ws-meta"))
        .header("x-bare-id", &id)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 400);
    let body: Value = again.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_BARE_HEADER");
}

/// v2: envelope parked via ws-new-meta, id-keyed handshake, status in the
/// side-channel.
#[tokio::test]
async fn test_v2_websocket_handshake_and_meta() {
    let upstream = start_mock_ws_echo().await;
    let proxy = spawn_server(test_config()).await;

    let id = client()
        .post(format!("http://{proxy}/v2/ws-new-meta"))
        .header("x-bare-host", upstream.ip().to_string())
        .header("x-bare-port", upstream.port().to_string())
        .header("x-bare-protocol", "ws:")
        .header("x-bare-path", "/")
        .header("x-bare-headers", "{}")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(id.len(), 32);

    let key = generate_key();
    let request = format!(
        "GET /v2/ HTTP/1.1\r\n\
         Host: {proxy}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Protocol: {id}\r\n\
         \r\n"
    );
    let (_stream, head) = raw_exchange(proxy, request).await;
    let head_lower = head.to_ascii_lowercase();
    assert!(head_lower.starts_with("http/1.1 101"), "head: {head}");
    assert!(head_lower.contains(&format!("sec-websocket-protocol: {id}")));

    let meta = client()
        .get(format!("http://{proxy}/v2/ws-meta"))
        .header("x-bare-id", &id)
        .send()
        .await
        .unwrap();
    assert_eq!(meta.status(), 200);
    let meta: Value = meta.json().await.unwrap();
    assert_eq!(meta["status"], 101);
    assert_eq!(meta["statusText"], "Switching Protocols");
    assert!(meta["headers"].is_object());
}

/// An unregistered id on the v2 upgrade path is rejected before any
/// outbound work.
#[tokio::test]
async fn test_v2_unregistered_id() {
    let proxy = spawn_server(test_config()).await;
    let key = generate_key();
    let request = format!(
        "GET /v2/ HTTP/1.1\r\n\
         Host: {proxy}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Protocol: 0123456789abcdef0123456789abcdef\r\n\
         \r\n"
    );
    let (_stream, head) = raw_exchange(proxy, request).await;
    assert!(head.starts_with("HTTP/1.1 400"), "head: {head}");
}
