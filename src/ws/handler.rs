//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::{GameEvent, GameHandle};
use crate::protocol::PlayerId;
use crate::transport::OUTBOUND_QUEUE_CAPACITY;
use crate::util::rate_limit::FrameRateLimiter;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);

    let (game, client_id) = match state.registry.join(outbound_tx).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!(error = %e, "Could not place connection in a game");
            return;
        }
    };
    info!(game_id = %game.id, client_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    run_connection(&game, client_id, ws_sink, ws_stream, outbound_rx).await;

    // The writer and its queue are gone, so this probe's send fails in the game
    if game.send(GameEvent::ReaderClosed { client_id }).await.is_err() {
        debug!(game_id = %game.id, client_id, "Game already finished");
    }

    info!(game_id = %game.id, client_id, "WebSocket connection closed");
}

/// Pump both directions until either side stops
async fn run_connection(
    game: &GameHandle,
    client_id: PlayerId,
    ws_sink: SplitSink<WebSocket, Message>,
    ws_stream: SplitStream<WebSocket>,
    outbound_rx: mpsc::Receiver<String>,
) {
    tokio::select! {
        _ = write_frames(client_id, ws_sink, outbound_rx) => {
            debug!(client_id, "Writer finished");
        }
        _ = read_frames(game, client_id, ws_stream) => {
            debug!(client_id, "Reader finished");
        }
    }
}

/// Outbound queue -> WebSocket
async fn write_frames(
    client_id: PlayerId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
) {
    while let Some(text) = outbound_rx.recv().await {
        if let Err(e) = ws_sink.send(Message::Text(text)).await {
            debug!(client_id, error = %e, "WebSocket send failed");
            return;
        }
    }
    // The game dropped this client
    let _ = ws_sink.close().await;
}

/// WebSocket -> game inbox
async fn read_frames(game: &GameHandle, client_id: PlayerId, mut ws_stream: SplitStream<WebSocket>) {
    let mut rate_limiter = FrameRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_frame() {
                    warn!(client_id, dropped = rate_limiter.dropped(), "Rate limited inbound frame");
                    continue;
                }
                if game.send(GameEvent::Frame { client_id, text }).await.is_err() {
                    debug!(client_id, "Game inbox closed");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                debug!(client_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(client_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}
