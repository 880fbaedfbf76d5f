pub mod connection;
pub mod countdown;
pub mod entity_store;
pub mod hub;
pub mod match_type;
pub mod playlist;
pub mod room;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    dao::match_store::MatchStore,
    rules::ModRules,
    state::{
        connection::ConnectionState,
        entity_store::EntityStore,
        hub::ClientGateway,
        room::ServerRoom,
    },
};

pub type SharedState = Arc<AppState>;

/// Per-user multiplayer client state; exists exactly while the user is in a
/// room and points at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    pub room_id: i64,
}

/// Central application state: the entity stores plus the external
/// collaborator seams every operation runs against.
pub struct AppState {
    config: AppConfig,
    rooms: EntityStore<ServerRoom>,
    user_states: EntityStore<ClientState>,
    connection_states: EntityStore<ConnectionState>,
    store: Arc<dyn MatchStore>,
    gateway: Arc<dyn ClientGateway>,
    rules: Arc<dyn ModRules>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn MatchStore>,
        gateway: Arc<dyn ClientGateway>,
        rules: Arc<dyn ModRules>,
    ) -> SharedState {
        let lock_timeout = config.lock_timeout;
        Arc::new(Self {
            config,
            rooms: EntityStore::new(lock_timeout),
            user_states: EntityStore::new(lock_timeout),
            connection_states: EntityStore::new(lock_timeout),
            store,
            gateway,
            rules,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Live rooms keyed by room id.
    pub fn rooms(&self) -> &EntityStore<ServerRoom> {
        &self.rooms
    }

    /// Multiplayer client states keyed by user id.
    pub fn user_states(&self) -> &EntityStore<ClientState> {
        &self.user_states
    }

    /// Connection instance records keyed by user id; the connection service
    /// is the only writer.
    pub fn connection_states(&self) -> &EntityStore<ConnectionState> {
        &self.connection_states
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn ClientGateway> {
        &self.gateway
    }

    pub fn rules(&self) -> &Arc<dyn ModRules> {
        &self.rules
    }
}
