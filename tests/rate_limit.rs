//! Rate limiter integration tests.

mod common;

use common::{spawn_server, start_mock_backend, test_config};
use reqwest::Method;
use serde_json::Value;

fn limited_config(rps: u32, burst: u32) -> bare_proxy::config::BareConfig {
    let mut config = test_config();
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_second = rps;
    config.rate_limit.burst_size = burst;
    config
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn tunnel_once(
    client: &reqwest::Client,
    proxy: std::net::SocketAddr,
    upstream: std::net::SocketAddr,
    close: bool,
) -> reqwest::Response {
    let mut request = client
        .get(format!("http://{proxy}/v1/"))
        .header("x-bare-host", upstream.ip().to_string())
        .header("x-bare-port", upstream.port().to_string())
        .header("x-bare-protocol", "http:")
        .header("x-bare-path", "/")
        .header("x-bare-headers", "{}")
        .header("x-bare-forward-headers", "[]");
    if close {
        request = request.header("connection", "close");
    }
    request.send().await.unwrap()
}

/// Keep-alive exchanges consume tokens; exhaustion yields the 429 envelope.
#[tokio::test]
async fn test_keep_alive_exhaustion() {
    let upstream = start_mock_backend(
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok".to_string(),
    )
    .await;
    let proxy = spawn_server(limited_config(1, 2)).await;
    let client = client();

    assert_eq!(tunnel_once(&client, proxy, upstream, false).await.status(), 200);
    assert_eq!(tunnel_once(&client, proxy, upstream, false).await.status(), 200);

    let limited = tunnel_once(&client, proxy, upstream, false).await;
    assert_eq!(limited.status(), 429);
    assert_eq!(limited.headers().get("ratelimit-limit").unwrap(), "2");
    assert_eq!(limited.headers().get("ratelimit-remaining").unwrap(), "0");
    assert!(limited.headers().contains_key("retry-after"));
    assert!(limited.headers().contains_key("ratelimit-reset"));
    assert_eq!(
        limited.headers().get("access-control-allow-origin").unwrap(),
        "*",
        "even 429s carry CORS"
    );

    let body: Value = limited.json().await.unwrap();
    assert_eq!(body["code"], "CONNECTION_LIMIT_EXCEEDED");
    assert_eq!(body["id"], "error.TooManyConnections");
}

/// Non-keep-alive exchanges only inspect the bucket.
#[tokio::test]
async fn test_connection_close_inspects_only() {
    let upstream = start_mock_backend(
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok".to_string(),
    )
    .await;
    let proxy = spawn_server(limited_config(1, 1)).await;
    let client = client();

    // A single token, never consumed: every one-shot request passes.
    for _ in 0..5 {
        assert_eq!(tunnel_once(&client, proxy, upstream, true).await.status(), 200);
    }
}

/// Pre-flights bypass the limiter entirely.
#[tokio::test]
async fn test_options_bypasses_limiter() {
    let upstream = start_mock_backend(
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok".to_string(),
    )
    .await;
    let proxy = spawn_server(limited_config(1, 1)).await;
    let client = client();

    // Exhaust the bucket.
    assert_eq!(tunnel_once(&client, proxy, upstream, false).await.status(), 200);
    assert_eq!(tunnel_once(&client, proxy, upstream, false).await.status(), 429);

    let preflight = client
        .request(Method::OPTIONS, format!("http://{proxy}/v1/"))
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), 200);
}
