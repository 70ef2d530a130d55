//! WebSocket relay plumbing.
//!
//! Two relay shapes exist. The header-framed versions (v1/v2) splice raw
//! bytes between the upgraded client socket and the upgraded remote socket;
//! frames pass through untouched, masking included. The message-framed
//! version (v3) terminates WebSocket on both legs and forwards messages.

use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TgCloseFrame;
use tokio_tungstenite::tungstenite::Message as TgMessage;

use crate::fetch::websocket::RemoteSocket;
use crate::observability::metrics;

/// Raw byte splice for v1/v2. Runs until either socket closes or the
/// server shuts down.
pub async fn splice_sockets(
    on_upgrade: OnUpgrade,
    remote: Upgraded,
    mut shutdown: broadcast::Receiver<()>,
    version: &'static str,
) {
    let client = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::debug!(error = %e, "Client upgrade never completed");
            return;
        }
    };

    metrics::record_ws_relay(version, 1);
    let mut client = TokioIo::new(client);
    let mut remote = TokioIo::new(remote);

    tokio::select! {
        result = tokio::io::copy_bidirectional(&mut client, &mut remote) => {
            match result {
                Ok((to_remote, to_client)) => {
                    tracing::debug!(to_remote, to_client, "WebSocket relay closed");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket relay errored");
                }
            }
        }
        _ = shutdown.recv() => {
            tracing::debug!("WebSocket relay stopped by shutdown");
        }
    }
    metrics::record_ws_relay(version, -1);
}

/// Message-level relay for v3. Closing one side closes the other.
pub async fn relay_messages(
    client: WebSocket,
    remote: RemoteSocket,
    mut shutdown: broadcast::Receiver<()>,
) {
    metrics::record_ws_relay("v3", 1);
    let (mut remote_sink, mut remote_stream) = remote.split();
    let (mut client_sink, mut client_stream) = client.split();

    let client_to_remote = async {
        while let Some(Ok(msg)) = client_stream.next().await {
            if remote_sink.send(to_tungstenite(msg)).await.is_err() {
                break;
            }
        }
        let _ = remote_sink.close().await;
    };

    let remote_to_client = async {
        while let Some(Ok(msg)) = remote_stream.next().await {
            let Some(msg) = to_axum(msg) else {
                continue;
            };
            if client_sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = client_sink.close().await;
    };

    tokio::select! {
        _ = client_to_remote => {}
        _ = remote_to_client => {}
        _ = shutdown.recv() => {}
    }
    metrics::record_ws_relay("v3", -1);
}

fn to_tungstenite(msg: AxumMessage) -> TgMessage {
    match msg {
        AxumMessage::Text(t) => TgMessage::Text(t.to_string().into()),
        AxumMessage::Binary(b) => TgMessage::Binary(b),
        AxumMessage::Ping(p) => TgMessage::Ping(p),
        AxumMessage::Pong(p) => TgMessage::Pong(p),
        AxumMessage::Close(frame) => TgMessage::Close(frame.map(|f| TgCloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        })),
    }
}

fn to_axum(msg: TgMessage) -> Option<AxumMessage> {
    match msg {
        TgMessage::Text(t) => Some(AxumMessage::Text(t.to_string().into())),
        TgMessage::Binary(b) => Some(AxumMessage::Binary(b)),
        TgMessage::Ping(p) => Some(AxumMessage::Ping(p)),
        TgMessage::Pong(p) => Some(AxumMessage::Pong(p)),
        TgMessage::Close(frame) => Some(AxumMessage::Close(frame.map(|f| AxumCloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        }))),
        // Raw frames never surface from a managed stream.
        TgMessage::Frame(_) => None,
    }
}
