//! Connection registry and single-instance limiter.
//!
//! Sits between the transport and the coordinator: every invocation must
//! carry the (token, connection, hub) tuple recorded for the user, otherwise
//! it is rejected as stale before any room state is touched.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientRequest, ServerEvent},
    error::ServiceError,
    services::room_service,
    state::{SharedState, connection::ConnectionState, hub::HubKind},
};

/// Transport-reported identity of one hub connection.
#[derive(Debug, Clone)]
pub struct HubIdentity {
    pub user_id: i64,
    pub token_id: String,
    pub hub: HubKind,
    pub connection_id: String,
}

/// Register a hub connection for a user, displacing any previous client
/// instance that holds a different token.
pub async fn register_connection(
    state: &SharedState,
    identity: &HubIdentity,
    sender: mpsc::UnboundedSender<Message>,
) -> Result<(), ServiceError> {
    let mut usage = state
        .connection_states()
        .acquire(identity.user_id, true)
        .await?;

    let displaced = match usage.get_mut() {
        None => Some(Vec::new()),
        Some(existing) if existing.token_id == identity.token_id => {
            // Same client instance opening another hub or reconnecting one.
            existing.register(identity.hub, &identity.connection_id);
            None
        }
        // A new client instance supersedes the old one everywhere.
        Some(existing) => Some(existing.connections.values().cloned().collect()),
    };

    if let Some(displaced) = displaced {
        for old_connection in &displaced {
            state
                .gateway()
                .send_to_connection(old_connection, ServerEvent::DisconnectRequested);
        }
        usage.set(ConnectionState::new(
            &identity.token_id,
            identity.hub,
            &identity.connection_id,
        ));
    }

    state.gateway().register_connection(
        identity.hub,
        &identity.connection_id,
        identity.user_id,
        sender,
    );
    Ok(())
}

/// Reject any invocation whose transport tuple no longer matches the
/// recorded client instance.
pub async fn verify_invocation(
    state: &SharedState,
    identity: &HubIdentity,
) -> Result<(), ServiceError> {
    let usage = state
        .connection_states()
        .acquire(identity.user_id, false)
        .await
        .map_err(|err| match err {
            ServiceError::NotTracked => ServiceError::StaleConnection,
            other => other,
        })?;
    let connected = usage.get().ok_or(ServiceError::StaleConnection)?;
    if !connected.matches(&identity.token_id, identity.hub, &identity.connection_id) {
        return Err(ServiceError::StaleConnection);
    }
    Ok(())
}

/// Clean-disconnect teardown: drop the connection record when it still
/// belongs to this instance, then leave any joined room.
///
/// Transport-layer errors never reach this path; their state is left for the
/// user to reconnect to or for a new instance to displace.
pub async fn handle_disconnect(state: &SharedState, identity: &HubIdentity) {
    state
        .gateway()
        .unregister_connection(&identity.connection_id);

    let mut usage = match state
        .connection_states()
        .acquire(identity.user_id, false)
        .await
    {
        Ok(usage) => usage,
        Err(_) => return,
    };
    let owns_record = usage.get().is_some_and(|connected| {
        connected.token_id == identity.token_id
            && connected.connection_for(identity.hub) == Some(identity.connection_id.as_str())
    });
    if !owns_record {
        return;
    }
    usage.destroy();

    if let Err(err) = room_service::leave_room(state, identity.user_id).await {
        warn!(user_id = identity.user_id, error = %err, "failed to leave room on disconnect");
    }
}

/// Handle the full lifecycle for one hub WebSocket connection.
pub async fn handle_socket(
    state: SharedState,
    socket: WebSocket,
    user_id: i64,
    token_id: String,
    hub: HubKind,
) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let identity = HubIdentity {
        user_id,
        token_id,
        hub,
        connection_id: Uuid::new_v4().to_string(),
    };

    if let Err(err) = register_connection(&state, &identity, outbound_tx.clone()).await {
        warn!(user_id, error = %err, "failed to register hub connection");
        finalize(writer_task, outbound_tx).await;
        return;
    }
    info!(user_id, hub = ?hub, connection_id = %identity.connection_id, "hub connected");

    let mut clean_close = false;
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if hub != HubKind::Multiplayer {
                    continue;
                }
                match serde_json::from_str::<ClientRequest>(&text) {
                    Ok(request) => {
                        if let Err(err) = verify_invocation(&state, &identity).await {
                            send_event(
                                &outbound_tx,
                                &ServerEvent::RequestFailed {
                                    message: err.to_string(),
                                },
                            );
                            continue;
                        }
                        dispatch(&state, &identity, request, &outbound_tx).await;
                    }
                    Err(err) => {
                        warn!(user_id, error = %err, "failed to parse hub request");
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                clean_close = true;
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(user_id, error = %err, "websocket error");
                break;
            }
        }
    }

    if clean_close {
        handle_disconnect(&state, &identity).await;
    } else {
        state
            .gateway()
            .unregister_connection(&identity.connection_id);
    }

    info!(user_id, connection_id = %identity.connection_id, "hub disconnected");
    finalize(writer_task, outbound_tx).await;
}

/// Route a parsed request to the coordinator and reply on this connection.
async fn dispatch(
    state: &SharedState,
    identity: &HubIdentity,
    request: ClientRequest,
    outbound: &mpsc::UnboundedSender<Message>,
) {
    let user_id = identity.user_id;
    let result: Result<Option<ServerEvent>, ServiceError> = match request {
        ClientRequest::JoinRoom { room_id, password } => {
            room_service::join_room(state, user_id, room_id, password.as_deref())
                .await
                .map(|room| Some(ServerEvent::JoinedRoom { room }))
        }
        ClientRequest::LeaveRoom => room_service::leave_room(state, user_id).await.map(|_| None),
        ClientRequest::ChangeState { state: new_state } => {
            room_service::change_state(state, user_id, new_state)
                .await
                .map(|_| None)
        }
        ClientRequest::ChangeSettings { settings } => {
            room_service::change_settings(state, user_id, settings)
                .await
                .map(|_| None)
        }
        ClientRequest::ChangeUserMods { mods } => {
            room_service::change_user_mods(state, user_id, mods)
                .await
                .map(|_| None)
        }
        ClientRequest::ChangeBeatmapAvailability { availability } => {
            room_service::change_beatmap_availability(state, user_id, availability)
                .await
                .map(|_| None)
        }
        ClientRequest::SendMatchRequest { request } => {
            room_service::send_match_request(state, user_id, request)
                .await
                .map(|_| None)
        }
        ClientRequest::StartMatch => room_service::start_match(state, user_id).await.map(|_| None),
        ClientRequest::AbortGameplay => {
            room_service::abort_gameplay(state, user_id).await.map(|_| None)
        }
        ClientRequest::TransferHost { user_id: target } => {
            room_service::transfer_host(state, user_id, target)
                .await
                .map(|_| None)
        }
        ClientRequest::KickUser { user_id: target } => {
            room_service::kick_user(state, user_id, target)
                .await
                .map(|_| None)
        }
        ClientRequest::AddPlaylistItem { item } => {
            room_service::add_playlist_item(state, user_id, item)
                .await
                .map(|_| None)
        }
        ClientRequest::EditPlaylistItem { item } => {
            room_service::edit_playlist_item(state, user_id, item)
                .await
                .map(|_| None)
        }
        ClientRequest::RemovePlaylistItem { item_id } => {
            room_service::remove_playlist_item(state, user_id, item_id)
                .await
                .map(|_| None)
        }
        ClientRequest::InvitePlayer { user_id: target } => {
            room_service::invite_player(state, user_id, target)
                .await
                .map(|_| None)
        }
        ClientRequest::Unknown => Err(ServiceError::InvalidInput(
            "unrecognized request".into(),
        )),
    };

    match result {
        Ok(Some(event)) => send_event(outbound, &event),
        Ok(None) => {}
        Err(err) => {
            warn!(user_id, error = %err, "hub request rejected");
            send_event(
                outbound,
                &ServerEvent::RequestFailed {
                    message: err.to_string(),
                },
            );
        }
    }
}

/// Serialize a reply and push it onto this connection's writer channel.
fn send_event(tx: &mpsc::UnboundedSender<Message>, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(payload) => {
            let _ = tx.send(Message::Text(payload.into()));
        }
        Err(err) => warn!(error = %err, "failed to serialize reply"),
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
