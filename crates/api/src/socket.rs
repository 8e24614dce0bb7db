//! `/ws`: the real-time subscription endpoint.
//!
//! A browser authenticates with its session cookie at upgrade time, or with
//! an `auth` frame as the first message. After that every client frame is
//! dispatched to the core gateway and answered with an ack when it carried
//! one.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use relay_core::error::AckError;
use relay_core::gateway::{Gateway, Session};
use relay_core::protocol::{ack_frame, ClientEvent, ClientFrame, ServerEvent};
use relay_core::rooms::Outbound;
use relay_core::types::SessionUser;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    error::AppError,
    middleware::auth::{resolve_session, session_token},
    state::{AppState, RequestId},
};

const OUTBOUND_BUFFER: usize = 256;
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);

pub async fn subscribe_ws(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = session_token(&headers);
    ws.on_upgrade(move |socket| handle_socket(state, socket, token, request_id))
}

/// Token and ack id of an `auth` frame.
fn auth_frame(text: &str) -> Option<(String, Option<u64>)> {
    let frame: ClientFrame = serde_json::from_str(text).ok()?;
    match ClientEvent::from_frame(&frame).ok()? {
        ClientEvent::Auth(auth) => Some((auth.token, frame.ack)),
        _ => None,
    }
}

fn auth_failure_message(err: &AppError) -> &'static str {
    match err {
        AppError::Unauthorized => "Not authenticated",
        _ => "Authentication failed",
    }
}

async fn push(outbound: &Outbound, event: ServerEvent) {
    match event.encode() {
        Ok(frame) => {
            let _ = outbound.send(frame).await;
        }
        Err(err) => warn!(error = %err, "failed to encode server event"),
    }
}

async fn reply(outbound: &Outbound, ack: Option<u64>, result: Result<Value, AckError>) {
    let Some(ack) = ack else {
        if let Err(err) = result {
            debug!(error = %err.error, "client frame failed without ack");
        }
        return;
    };
    match ack_frame(ack, &result) {
        Ok(frame) => {
            let _ = outbound.send(frame).await;
        }
        Err(err) => warn!(error = %err, "failed to encode ack"),
    }
}

async fn authenticate(
    state: &AppState,
    cookie_token: Option<String>,
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Result<(SessionUser, Option<u64>), &'static str> {
    let (token, ack) = match cookie_token {
        Some(token) => (token, None),
        None => {
            let first = tokio::time::timeout(AUTH_TIMEOUT, receiver.next())
                .await
                .map_err(|_| "Authentication timed out")?;
            let parsed = match first {
                Some(Ok(Message::Text(text))) => auth_frame(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => std::str::from_utf8(&bytes).ok().and_then(auth_frame),
                _ => None,
            };
            parsed.ok_or("Invalid auth payload")?
        }
    };

    let user = resolve_session(state, &token)
        .await
        .map_err(|err| auth_failure_message(&err))?;
    Ok((user, ack))
}

async fn handle_socket(
    state: AppState,
    socket: WebSocket,
    cookie_token: Option<String>,
    request_id: RequestId,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let (user, auth_ack) = match authenticate(&state, cookie_token, &mut ws_receiver).await {
        Ok(authenticated) => authenticated,
        Err(message) => {
            debug!(request_id = %request_id.0, %message, "subscriber auth failed");
            push(
                &outbound_tx,
                ServerEvent::AuthError {
                    message: message.to_string(),
                },
            )
            .await;
            drop(outbound_tx);
            let _ = send_task.await;
            return;
        }
    };

    let gateway = state.gateway.clone();
    let mut session = gateway.open_session(user, outbound_tx.clone());
    push(
        &outbound_tx,
        ServerEvent::AuthOk {
            user_id: session.user.id.clone(),
        },
    )
    .await;
    reply(&outbound_tx, auth_ack, Ok(json!({}))).await;

    info!(
        request_id = %request_id.0,
        connection_id = %session.connection_id,
        user_id = %session.user.id,
        "subscription opened"
    );

    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_frame(&gateway, &mut session, &outbound_tx, text.as_str()).await
            }
            Ok(Message::Binary(bytes)) => {
                if let Ok(text) = std::str::from_utf8(&bytes) {
                    handle_frame(&gateway, &mut session, &outbound_tx, text).await;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection_id = %session.connection_id, error = %err, "subscription receive error");
                break;
            }
        }
    }

    let connection_id = session.connection_id.clone();
    gateway.close_session(session);
    // in-flight sends may still hold a sender clone
    send_task.abort();

    info!(%connection_id, "subscription closed");
}

async fn handle_frame(gateway: &Arc<Gateway>, session: &mut Session, outbound: &Outbound, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(connection_id = %session.connection_id, error = %err, "invalid client frame");
            return;
        }
    };
    let ack = frame.ack;

    let event = match ClientEvent::from_frame(&frame) {
        Ok(event) => event,
        Err(err) => {
            reply(outbound, ack, Err(err.to_ack())).await;
            return;
        }
    };

    match event {
        // already authenticated
        ClientEvent::Auth(_) => reply(outbound, ack, Ok(json!({}))).await,
        ClientEvent::Join(target) => {
            let result = gateway
                .join(session, &target.channel_id)
                .await
                .map(|_| json!({ "channelId": target.channel_id }))
                .map_err(|err| err.to_ack());
            reply(outbound, ack, result).await;
        }
        ClientEvent::Leave(target) => {
            gateway.leave(session, &target.channel_id);
            reply(outbound, ack, Ok(json!({}))).await;
        }
        ClientEvent::Typing(target) => {
            let result = gateway
                .typing(session, &target.channel_id)
                .map(|_| json!({}))
                .map_err(|err| err.to_ack());
            reply(outbound, ack, result).await;
        }
        ClientEvent::Send(request) => {
            let pending = match gateway.submit(session, request) {
                Ok(pending) => pending,
                Err(err) => {
                    reply(outbound, ack, Err(err.to_ack())).await;
                    return;
                }
            };
            // the session lane keeps order; acks go out off the read loop
            let outbound = outbound.clone();
            let connection_id = session.connection_id.clone();
            tokio::spawn(async move {
                let result = pending
                    .outcome()
                    .await
                    .map(|message_id| json!({ "messageId": message_id }))
                    .map_err(|err| {
                        debug!(%connection_id, error = %err, "send rejected");
                        err.to_ack()
                    });
                reply(&outbound, ack, result).await;
            });
        }
    }
}
