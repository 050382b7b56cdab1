use crate::auth::{self, Identity};
use crate::error::AppError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::rooms::ConnId;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use bidding::BidRequest;
use chrono::Utc;
use futures::{sink::SinkExt, stream::StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use types::prelude::AuctionId;

/// Soft deadline on the admission path; after the hot store committed,
/// only the acknowledgement can be lost
const ADMISSION_DEADLINE: Duration = Duration::from_secs(2);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    // 1. Authenticate the handshake before upgrading
    let token = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(auth::bearer_token)
        .or_else(|| params.get("token").map(String::as_str))
        .ok_or_else(|| AppError::Unauthorized("Missing authentication credentials".into()))?;
    let identity = auth::verify_token(token, &state.jwt_secret)?;

    // 2. Capture request metadata for the bid log
    let user_agent = headers
        .get("User-Agent")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity, user_agent)))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    identity: Identity,
    user_agent: Option<String>,
) {
    let (conn_id, mut outbound_rx) = state.rooms.register(identity.user_id, &identity.username);

    // Clock sync is the first frame after the upgrade
    state
        .rooms
        .send_to(conn_id, ServerMessage::server_time(Utc::now()));

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drains this connection's queue in send order
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let frame = Message::Text(Utf8Bytes::from(message.to_json()));
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => {
                handle_client_message(&state, conn_id, &identity, &user_agent, &text).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Implicit leave of every room; in-flight admission tasks and queued
    // jobs are unaffected
    state.rooms.disconnect(conn_id);
    writer.abort();
    debug!(conn_id, username = %identity.username, "socket closed");
}

async fn handle_client_message(
    state: &AppState,
    conn_id: ConnId,
    identity: &Identity,
    user_agent: &Option<String>,
    raw: &str,
) {
    let parsed = match ClientMessage::parse(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            state.rooms.send_to(
                conn_id,
                ServerMessage::error("INVALID_INPUT", format!("Unparseable message: {}", err)),
            );
            return;
        }
    };

    match parsed {
        ClientMessage::Join { auction_id } => {
            if auction_is_known(state, auction_id).await {
                state.rooms.join(conn_id, auction_id);
                state
                    .rooms
                    .send_to(conn_id, ServerMessage::Joined { auction_id });
            } else {
                state.rooms.send_to(
                    conn_id,
                    ServerMessage::error("AUCTION_NOT_FOUND", "Auction not found"),
                );
            }
        }
        ClientMessage::Leave { auction_id } => {
            state.rooms.leave(conn_id, auction_id);
        }
        ClientMessage::BidPlaced { auction_id, amount } => {
            let request = BidRequest {
                auction_id,
                bidder_id: identity.user_id,
                bidder_username: identity.username.clone(),
                amount,
                ip_address: None,
                user_agent: user_agent.clone(),
            };

            // Detached so a deadline (or disconnect) cannot cancel an
            // admission that is about to commit
            let admission = Arc::clone(&state.admission);
            let task = tokio::spawn(async move { admission.place_bid(request).await });

            match tokio::time::timeout(ADMISSION_DEADLINE, task).await {
                Ok(Ok(Ok(accepted))) => {
                    state
                        .rooms
                        .send_to(conn_id, ServerMessage::bid_accepted(&accepted));
                }
                Ok(Ok(Err(err))) => {
                    state
                        .rooms
                        .send_to(conn_id, ServerMessage::bid_rejected(auction_id, &err));
                }
                Ok(Err(join_err)) => {
                    warn!(conn_id, %auction_id, %join_err, "admission task panicked");
                    state.rooms.send_to(
                        conn_id,
                        ServerMessage::error("BID_FAILED", "Bid processing failed"),
                    );
                }
                Err(_) => {
                    // The bid may still land; only this ack is lost
                    warn!(conn_id, %auction_id, "admission deadline passed, ack dropped");
                }
            }
        }
    }
}

/// A room can be joined for any auction the platform knows about, hot
/// or cold
async fn auction_is_known(state: &AppState, auction_id: AuctionId) -> bool {
    if state.hot.get(auction_id).is_some() {
        return true;
    }
    matches!(state.cold.load_auction_row(auction_id).await, Ok(Some(_)))
}
