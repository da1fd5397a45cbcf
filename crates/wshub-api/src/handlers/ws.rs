//! WebSocket upgrade handler.
//!
//! Every non-API path is looked up in the service manager. The upgraded
//! socket is split: a writer task drains the transport's outbound queue
//! while this task reads frames and drives the connection hooks.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::StreamExt;
use tracing::{debug, info, warn};

use wshub_core::error::AppError;
use wshub_realtime::message::close_code;
use wshub_realtime::{CloseArgs, Message, ServiceHost, Transport, TransportError};

use crate::error::ApiError;
use crate::state::AppState;
use crate::transport::{self, AxumTransport};

/// How long a refused connection gets to flush its close frame.
const REJECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// GET /{path}: upgrade to a WebSocket on the service mounted at `path`.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let path = format!("/{path}");
    let host = state
        .services
        .get(&path)
        .ok_or_else(|| AppError::not_found(format!("No WebSocket service at '{path}'")))?;

    let requested = headers
        .get("sec-websocket-protocol")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let protocol = host.negotiate_protocol(requested.split(',').filter(|p| !p.trim().is_empty()));

    let ws = match &protocol {
        Some(p) => ws.protocols([p.clone()]),
        None => ws,
    };

    debug!(path = %path, protocol = ?protocol, "Upgrading WebSocket connection");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, host, protocol)))
}

/// Drive one upgraded socket through its lifecycle.
async fn handle_socket(socket: WebSocket, host: Arc<ServiceHost>, protocol: Option<String>) {
    let (sink, mut stream) = socket.split();
    let (transport, outbound) = AxumTransport::new(host.wait_time());
    let transport = Arc::new(transport);
    if let Some(protocol) = protocol {
        transport.set_protocol(protocol);
    }
    let writer = tokio::spawn(transport::run_writer(sink, outbound));
    transport.mark_open();

    let mut conn = host.connect(transport.clone() as Arc<dyn Transport>);
    if !conn.open().await {
        warn!(path = %host.path(), "Connection refused by service");
        let _ = tokio::time::timeout(REJECT_FLUSH_TIMEOUT, writer).await;
        return;
    }

    let mut peer_closed = false;
    let close = loop {
        let next = tokio::select! {
            _ = transport.aborted() => break CloseArgs::abnormal(),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(WsMessage::Text(text))) => {
                conn.message(Message::Text(text.as_str().to_owned())).await
            }
            Some(Ok(WsMessage::Binary(data))) => conn.message(Message::Binary(data)).await,
            Some(Ok(WsMessage::Pong(data))) => transport.pong_received(&data),
            Some(Ok(WsMessage::Ping(_))) => {}
            Some(Ok(WsMessage::Close(frame))) => {
                peer_closed = true;
                break close_args_from(frame);
            }
            Some(Err(e)) => {
                conn.error(TransportError::Io(e.to_string())).await;
                break CloseArgs::abnormal();
            }
            None => break CloseArgs::abnormal(),
        }
    };

    // Reading again flushes the automatic close reply.
    if peer_closed {
        let _ = tokio::time::timeout(REJECT_FLUSH_TIMEOUT, stream.next()).await;
    }

    transport.mark_closed();
    conn.close(close).await;
    transport.shutdown_writer();
    let _ = writer.await;

    if let Some(id) = conn.id() {
        info!(path = %host.path(), session_id = %id, "WebSocket connection finished");
    }
}

fn close_args_from(frame: Option<CloseFrame>) -> CloseArgs {
    match frame {
        Some(frame) => CloseArgs::new(frame.code, frame.reason.as_str()),
        None => CloseArgs::new(close_code::NO_STATUS, ""),
    }
}
