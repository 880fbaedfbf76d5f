use std::collections::HashSet;

use axum::extract::ws::Message;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use utoipa::ToSchema;

use crate::dto::ws::ServerEvent;

/// The bidirectional endpoints a client instance may hold open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum HubKind {
    Multiplayer,
    Spectator,
}

/// Control group for a room: every joined connection.
pub fn room_group(room_id: i64) -> String {
    format!("room:{room_id}")
}

/// Gameplay group for a room: connections receiving load/abort/finish flow.
pub fn gameplay_group(room_id: i64) -> String {
    format!("room:{room_id}:true")
}

/// Fan-out seam between the coordinator and connected clients.
///
/// Sends are fire-and-forget; delivery failures are logged and dropped, the
/// room state itself is the source of truth clients reconcile against.
pub trait ClientGateway: Send + Sync {
    fn register_connection(
        &self,
        hub: HubKind,
        connection_id: &str,
        user_id: i64,
        sender: mpsc::UnboundedSender<Message>,
    );
    fn unregister_connection(&self, connection_id: &str);
    fn add_to_group(&self, connection_id: &str, group: &str);
    fn remove_from_group(&self, connection_id: &str, group: &str);
    /// Resolve a user's live connection on a hub and add it to a group.
    fn add_user_to_group(&self, hub: HubKind, user_id: i64, group: &str);
    fn remove_user_from_group(&self, hub: HubKind, user_id: i64, group: &str);
    fn send_to_group(&self, group: &str, event: ServerEvent);
    fn send_to_connection(&self, connection_id: &str, event: ServerEvent);
    fn send_to_user(&self, hub: HubKind, user_id: i64, event: ServerEvent);
}

struct ClientHandle {
    hub: HubKind,
    user_id: i64,
    tx: mpsc::UnboundedSender<Message>,
}

/// Production gateway over the WebSocket writer channels.
#[derive(Default)]
pub struct WsGateway {
    connections: DashMap<String, ClientHandle>,
    by_user: DashMap<(HubKind, i64), String>,
    groups: DashMap<String, HashSet<String>>,
}

impl WsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, connection_id: &str, payload: &str) {
        if let Some(handle) = self.connections.get(connection_id) {
            if handle.tx.send(Message::Text(payload.to_owned().into())).is_err() {
                warn!(connection_id, "writer closed; dropping outbound event");
            }
        }
    }
}

/// Serialize an event once per fan-out target set.
fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(error = %err, "failed to serialize server event");
            None
        }
    }
}

impl ClientGateway for WsGateway {
    fn register_connection(
        &self,
        hub: HubKind,
        connection_id: &str,
        user_id: i64,
        sender: mpsc::UnboundedSender<Message>,
    ) {
        self.connections.insert(
            connection_id.to_owned(),
            ClientHandle {
                hub,
                user_id,
                tx: sender,
            },
        );
        self.by_user.insert((hub, user_id), connection_id.to_owned());
    }

    fn unregister_connection(&self, connection_id: &str) {
        if let Some((_, handle)) = self.connections.remove(connection_id) {
            self.by_user
                .remove_if(&(handle.hub, handle.user_id), |_, current| {
                    current == connection_id
                });
        }
        for mut members in self.groups.iter_mut() {
            members.value_mut().remove(connection_id);
        }
    }

    fn add_to_group(&self, connection_id: &str, group: &str) {
        self.groups
            .entry(group.to_owned())
            .or_default()
            .insert(connection_id.to_owned());
    }

    fn remove_from_group(&self, connection_id: &str, group: &str) {
        if let Some(mut members) = self.groups.get_mut(group) {
            members.remove(connection_id);
        }
    }

    fn add_user_to_group(&self, hub: HubKind, user_id: i64, group: &str) {
        if let Some(connection_id) = self.by_user.get(&(hub, user_id)).map(|id| id.clone()) {
            self.add_to_group(&connection_id, group);
        }
    }

    fn remove_user_from_group(&self, hub: HubKind, user_id: i64, group: &str) {
        if let Some(connection_id) = self.by_user.get(&(hub, user_id)).map(|id| id.clone()) {
            self.remove_from_group(&connection_id, group);
        }
    }

    fn send_to_group(&self, group: &str, event: ServerEvent) {
        let Some(payload) = encode(&event) else {
            return;
        };
        let Some(members) = self.groups.get(group) else {
            return;
        };
        for connection_id in members.iter() {
            self.push(connection_id, &payload);
        }
    }

    fn send_to_connection(&self, connection_id: &str, event: ServerEvent) {
        if let Some(payload) = encode(&event) {
            self.push(connection_id, &payload);
        }
    }

    fn send_to_user(&self, hub: HubKind, user_id: i64, event: ServerEvent) {
        let Some(connection_id) = self.by_user.get(&(hub, user_id)).map(|id| id.clone()) else {
            return;
        };
        self.send_to_connection(&connection_id, event);
    }
}
