//! Manages the WebSocket connection lifecycle for a conversation.

use super::protocol::TransportStyle;
use crate::{
    handlers::ApiError, identity::caller_from_headers, models::ConnectParams, state::AppState,
};
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use confirm_core::Caller;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

/// Upgrades `/websocket-non-reactive/to/rest`.
pub async fn non_reactive_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    upgrade(TransportStyle::Blocking, ws, state, params, &headers)
}

/// Upgrades `/websocket-reactive-uni/to/rest`.
pub async fn reactive_uni_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    upgrade(TransportStyle::ReactiveUni, ws, state, params, &headers)
}

/// Upgrades `/websocket-reactive-multi/to/rest`.
pub async fn reactive_multi_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    upgrade(TransportStyle::ReactiveMulti, ws, state, params, &headers)
}

fn upgrade(
    style: TransportStyle,
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    params: ConnectParams,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let caller = caller_from_headers(headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing x-user-id header".to_string()))?;
    let session_id = params
        .memory_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, style, state, session_id, caller)))
}

/// Main handler for an individual WebSocket connection.
///
/// Utterances from one connection are answered strictly in order, and every
/// frame of a reply is queued before the next utterance is stepped. The
/// blocking style does this inside the receive loop; the reactive styles hand
/// utterances to a per-connection worker so the loop keeps reading.
#[instrument(name = "ws_session", skip_all, fields(endpoint = %style, session_id = %session_id, user = %caller.subject))]
async fn handle_socket(
    socket: WebSocket,
    style: TransportStyle,
    state: Arc<AppState>,
    session_id: String,
    caller: Caller,
) {
    let connections = state.service.attach(&session_id).await;
    info!(roles = ?caller.roles, connections, "User connected");

    let (socket_tx, mut socket_rx) = socket.split();
    let (frame_tx, frame_rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(write_frames(socket_tx, frame_rx).in_current_span());

    let worker = match style {
        TransportStyle::Blocking => None,
        TransportStyle::ReactiveUni | TransportStyle::ReactiveMulti => {
            let (utterance_tx, utterance_rx) = mpsc::channel::<String>(64);
            let handle = tokio::spawn(
                answer_in_order(
                    state.clone(),
                    style,
                    session_id.clone(),
                    caller.clone(),
                    utterance_rx,
                    frame_tx.clone(),
                )
                .in_current_span(),
            );
            Some((utterance_tx, handle))
        }
    };

    if frame_tx.send(style.greeting()).await.is_ok() {
        while let Some(msg_result) = socket_rx.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    let utterance = text.as_str().to_string();
                    match &worker {
                        None => {
                            let frames =
                                respond(&state, style, &session_id, &caller, &utterance).await;
                            if send_frames(&frame_tx, frames).await.is_err() {
                                break;
                            }
                        }
                        Some((utterance_tx, _)) => {
                            if utterance_tx.send(utterance).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(Message::Binary(_)) => warn!("Ignoring binary frame."),
                Ok(Message::Close(_)) => {
                    info!("Client sent close frame.");
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => {
                    error!("Error receiving from client WebSocket: {:?}", e);
                    break;
                }
            }
        }
    } else {
        error!("Failed to queue greeting for client.");
    }
    drop(frame_tx);

    // Let queued steps finish so the store never holds a half-applied turn,
    // then release this connection's hold on the session.
    let service = state.service.clone();
    let evict = state.config.evict_on_close;
    tokio::spawn(
        async move {
            if let Some((utterance_tx, handle)) = worker {
                drop(utterance_tx);
                if let Err(e) = handle.await {
                    error!("Reply worker failed: {:?}", e);
                }
            }
            if service.detach(&session_id, evict).await {
                debug!("Session evicted after last connection closed.");
            }
            let _ = writer.await;
            info!("WebSocket connection closed.");
        }
        .in_current_span(),
    );
}

/// Steps queued utterances one at a time, sending each reply in full.
///
/// Keeps stepping after the client is gone so queued confirmations still
/// reach the store; their replies are dropped.
async fn answer_in_order(
    state: Arc<AppState>,
    style: TransportStyle,
    session_id: String,
    caller: Caller,
    mut utterance_rx: mpsc::Receiver<String>,
    frame_tx: mpsc::Sender<String>,
) {
    while let Some(utterance) = utterance_rx.recv().await {
        let frames = respond(&state, style, &session_id, &caller, &utterance).await;
        if send_frames(&frame_tx, frames).await.is_err() {
            debug!("Connection gone before reply was sent; discarding.");
        }
    }
}

/// Runs one utterance through the conversation service and frames the reply.
async fn respond(
    state: &AppState,
    style: TransportStyle,
    session_id: &str,
    caller: &Caller,
    utterance: &str,
) -> Vec<String> {
    info!(message = %utterance, "User sent message");

    let required = &state.config.required_role;
    if !caller.has_role(required) {
        warn!(roles = ?caller.roles, %required, "Message rejected: missing role");
        return vec![format!("Forbidden: the '{}' role is required", required)];
    }

    let reply = state.service.step(session_id, utterance, caller).await;
    debug!(stage = ?reply.stage, tool_invoked = reply.tool_invoked, "Replying");
    style.frames(&reply.text)
}

async fn send_frames(
    frame_tx: &mpsc::Sender<String>,
    frames: Vec<String>,
) -> Result<(), mpsc::error::SendError<String>> {
    for frame in frames {
        frame_tx.send(frame).await?;
    }
    Ok(())
}

/// Drains queued frames into the socket until every sender is gone.
async fn write_frames(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut frame_rx: mpsc::Receiver<String>,
) {
    while let Some(frame) = frame_rx.recv().await {
        if let Err(e) = socket_tx.send(Message::Text(frame.into())).await {
            debug!("Failed to write frame to client: {:?}", e);
            return;
        }
    }
    let _ = socket_tx.close().await;
}
