#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use tempo_back::{
    config::AppConfig,
    dao::{
        memory::MemoryMatchStore,
        models::{PlaylistItemEntity, RoomEntity},
    },
    dto::{room::RoomSnapshot, ws::ServerEvent},
    error::ServiceError,
    rules::StandardRules,
    services::{connection_service, connection_service::HubIdentity, room_service},
    state::{
        AppState, SharedState,
        hub::{ClientGateway, HubKind, gameplay_group, room_group},
        room::{MatchType, QueueMode},
    },
};

/// Where a recorded event was sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Group(String),
    Connection(String),
    User(HubKind, i64),
}

#[derive(Default)]
struct GatewayLog {
    events: Vec<(Target, ServerEvent)>,
    connections: HashMap<String, (HubKind, i64)>,
    by_user: HashMap<(HubKind, i64), String>,
    groups: HashMap<String, HashSet<String>>,
}

/// Gateway double that records every send and group mutation.
#[derive(Default)]
pub struct RecordingGateway {
    log: Mutex<GatewayLog>,
}

impl RecordingGateway {
    pub fn all_events(&self) -> Vec<(Target, ServerEvent)> {
        self.log.lock().unwrap().events.clone()
    }

    pub fn group_events(&self, group: &str) -> Vec<ServerEvent> {
        self.log
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|(target, _)| *target == Target::Group(group.to_string()))
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn user_events(&self, hub: HubKind, user_id: i64) -> Vec<ServerEvent> {
        self.log
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|(target, _)| *target == Target::User(hub, user_id))
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn connection_events(&self, connection_id: &str) -> Vec<ServerEvent> {
        self.log
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|(target, _)| *target == Target::Connection(connection_id.to_string()))
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn is_user_in_group(&self, hub: HubKind, user_id: i64, group: &str) -> bool {
        let log = self.log.lock().unwrap();
        let Some(connection_id) = log.by_user.get(&(hub, user_id)) else {
            return false;
        };
        log.groups
            .get(group)
            .is_some_and(|members| members.contains(connection_id))
    }

    pub fn clear_events(&self) {
        self.log.lock().unwrap().events.clear();
    }
}

impl ClientGateway for RecordingGateway {
    fn register_connection(
        &self,
        hub: HubKind,
        connection_id: &str,
        user_id: i64,
        _sender: mpsc::UnboundedSender<Message>,
    ) {
        let mut log = self.log.lock().unwrap();
        log.connections
            .insert(connection_id.to_owned(), (hub, user_id));
        log.by_user.insert((hub, user_id), connection_id.to_owned());
    }

    fn unregister_connection(&self, connection_id: &str) {
        let mut log = self.log.lock().unwrap();
        if let Some((hub, user_id)) = log.connections.remove(connection_id) {
            if log.by_user.get(&(hub, user_id)).map(String::as_str) == Some(connection_id) {
                log.by_user.remove(&(hub, user_id));
            }
        }
        for members in log.groups.values_mut() {
            members.remove(connection_id);
        }
    }

    fn add_to_group(&self, connection_id: &str, group: &str) {
        self.log
            .lock()
            .unwrap()
            .groups
            .entry(group.to_owned())
            .or_default()
            .insert(connection_id.to_owned());
    }

    fn remove_from_group(&self, connection_id: &str, group: &str) {
        if let Some(members) = self.log.lock().unwrap().groups.get_mut(group) {
            members.remove(connection_id);
        }
    }

    fn add_user_to_group(&self, hub: HubKind, user_id: i64, group: &str) {
        let connection_id = {
            let log = self.log.lock().unwrap();
            log.by_user.get(&(hub, user_id)).cloned()
        };
        if let Some(connection_id) = connection_id {
            self.add_to_group(&connection_id, group);
        }
    }

    fn remove_user_from_group(&self, hub: HubKind, user_id: i64, group: &str) {
        let connection_id = {
            let log = self.log.lock().unwrap();
            log.by_user.get(&(hub, user_id)).cloned()
        };
        if let Some(connection_id) = connection_id {
            self.remove_from_group(&connection_id, group);
        }
    }

    fn send_to_group(&self, group: &str, event: ServerEvent) {
        self.log
            .lock()
            .unwrap()
            .events
            .push((Target::Group(group.to_owned()), event));
    }

    fn send_to_connection(&self, connection_id: &str, event: ServerEvent) {
        self.log
            .lock()
            .unwrap()
            .events
            .push((Target::Connection(connection_id.to_owned()), event));
    }

    fn send_to_user(&self, hub: HubKind, user_id: i64, event: ServerEvent) {
        self.log
            .lock()
            .unwrap()
            .events
            .push((Target::User(hub, user_id), event));
    }
}

/// Everything a scenario needs: shared state plus handles on the doubles.
pub struct TestEnv {
    pub state: SharedState,
    pub store: Arc<MemoryMatchStore>,
    pub gateway: Arc<RecordingGateway>,
}

pub fn test_env() -> TestEnv {
    let store = Arc::new(MemoryMatchStore::new());
    let gateway = Arc::new(RecordingGateway::default());
    let state = AppState::new(
        AppConfig::default(),
        store.clone(),
        gateway.clone(),
        Arc::new(StandardRules),
    );
    TestEnv {
        state,
        store,
        gateway,
    }
}

pub const BEATMAP_ID: i64 = 1001;
pub const BEATMAP_CHECKSUM: &str = "checksum-1001";

impl TestEnv {
    /// Seed a joinable room row with one playlist item, returning the item id.
    pub fn seed_room(&self, room_id: i64, host_user_id: i64) -> i64 {
        self.seed_room_with(room_id, host_user_id, QueueMode::AllPlayers, 0)
    }

    pub fn seed_room_with(
        &self,
        room_id: i64,
        host_user_id: i64,
        queue_mode: QueueMode,
        auto_start_seconds: u64,
    ) -> i64 {
        self.store.seed_room(RoomEntity {
            room_id,
            name: "test room".into(),
            password: None,
            host_user_id,
            match_type: MatchType::HeadToHead,
            queue_mode,
            auto_start_seconds,
            ends_at: None,
        });
        self.store.seed_beatmap(BEATMAP_ID, BEATMAP_CHECKSUM);
        self.store.seed_playlist_item(PlaylistItemEntity {
            id: 0,
            room_id,
            owner_id: host_user_id,
            beatmap_id: BEATMAP_ID,
            beatmap_checksum: BEATMAP_CHECKSUM.into(),
            ruleset_id: 0,
            required_mods: Vec::new(),
            allowed_mods: Vec::new(),
            playlist_order: 0,
            expired: false,
        })
    }

    /// Register a multiplayer hub connection the way the socket layer would.
    pub async fn connect(&self, user_id: i64, token: &str) -> HubIdentity {
        let identity = HubIdentity {
            user_id,
            token_id: token.into(),
            hub: HubKind::Multiplayer,
            connection_id: format!("conn-{user_id}-{token}"),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        connection_service::register_connection(&self.state, &identity, tx)
            .await
            .expect("register connection");
        identity
    }

    pub async fn connect_and_join(&self, user_id: i64, room_id: i64) -> RoomSnapshot {
        self.connect(user_id, &format!("token-{user_id}")).await;
        room_service::join_room(&self.state, user_id, room_id, None)
            .await
            .expect("join room")
    }

    /// Deep snapshot of a tracked room.
    pub async fn room_snapshot(&self, room_id: i64) -> RoomSnapshot {
        let mut usage = self
            .state
            .rooms()
            .acquire(room_id, false)
            .await
            .expect("room tracked");
        RoomSnapshot::from(&*usage.get_mut().expect("room initialized"))
    }

    pub async fn room_is_tracked(&self, room_id: i64) -> bool {
        match self.state.rooms().acquire(room_id, false).await {
            Ok(_) => true,
            Err(ServiceError::NotTracked) => false,
            Err(err) => panic!("unexpected acquire error: {err:?}"),
        }
    }

    /// Check the structural invariants that must hold for any reachable room.
    pub async fn assert_room_invariants(&self, room_id: i64) {
        let snapshot = self.room_snapshot(room_id).await;
        assert!(
            !snapshot.users.is_empty(),
            "a tracked room must have at least one user"
        );
        let host = snapshot.host_user_id.expect("host must be set");
        assert!(
            snapshot.users.iter().any(|user| user.user_id == host),
            "host must be a listed user"
        );
        for user in &snapshot.users {
            if user.state.is_gameplay() {
                assert!(
                    self.gateway.is_user_in_group(
                        HubKind::Multiplayer,
                        user.user_id,
                        &gameplay_group(room_id)
                    ),
                    "gameplay user {} must be in the gameplay group",
                    user.user_id
                );
            }
            assert!(
                self.gateway.is_user_in_group(
                    HubKind::Multiplayer,
                    user.user_id,
                    &room_group(room_id)
                ),
                "user {} must be in the control group",
                user.user_id
            );
        }
    }
}

/// Events sent to the room's control group.
pub fn control_events(env: &TestEnv, room_id: i64) -> Vec<ServerEvent> {
    env.gateway.group_events(&room_group(room_id))
}

/// Events sent to the room's gameplay group.
pub fn gameplay_events(env: &TestEnv, room_id: i64) -> Vec<ServerEvent> {
    env.gateway.group_events(&gameplay_group(room_id))
}
