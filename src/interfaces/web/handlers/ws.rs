use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::core::hub::MAX_INBOUND_FRAME;

use super::super::AppState;

/// Upgrades the connection and hands the socket to the hub. Inbound frames
/// are capped at 512 bytes; larger frames terminate the connection.
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = match &state.hub {
        Some(hub) => hub.clone(),
        None => {
            return (StatusCode::SERVICE_UNAVAILABLE, "Event hub unavailable").into_response()
        }
    };

    ws.max_message_size(MAX_INBOUND_FRAME)
        .max_frame_size(MAX_INBOUND_FRAME)
        .on_upgrade(move |socket| async move {
            hub.accept_socket(socket);
        })
}
