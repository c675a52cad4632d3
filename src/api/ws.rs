// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Live notification stream over WebSocket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    error::ApiError,
    hub::{NotificationHub, Subscriber},
    state::AppState,
};

/// `GET /ws/live`: push every notification as a JSON text frame.
///
/// Client frames are read only to notice a close.
pub async fn live(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    // Registered before the upgrade; dropping the handle on a failed
    // upgrade removes it again.
    let subscriber = match state.hub.subscribe() {
        Ok(subscriber) => subscriber,
        Err(e) => return ApiError::service_unavailable(e.to_string()).into_response(),
    };
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, subscriber))
}

/// Drive one connection until either side goes away.
async fn handle_socket(mut socket: WebSocket, hub: NotificationHub, subscriber: Subscriber) {
    let connection_id = subscriber.connection_id();
    tracing::info!(%connection_id, "Live subscriber connected");

    loop {
        tokio::select! {
            next = subscriber.recv() => {
                match next {
                    Some(notification) => {
                        if let Err(e) = send_json(&mut socket, notification.as_ref()).await {
                            tracing::info!(%connection_id, error = %e, "Live send failed, disconnecting");
                            break;
                        }
                    }
                    None => {
                        // Removed by the hub (shutdown).
                        if let Err(e) = socket.send(Message::Close(None)).await {
                            tracing::debug!(%connection_id, error = %e, "Close frame not delivered");
                        }
                        break;
                    }
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.unsubscribe(connection_id);
    tracing::info!(%connection_id, dropped = subscriber.dropped(), "Live subscriber disconnected");
}

/// Serialize `value` as JSON and send it as a text frame.
async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).map_err(axum::Error::new)?;
    socket.send(Message::Text(text.into())).await
}
