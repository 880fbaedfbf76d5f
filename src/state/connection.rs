use indexmap::IndexMap;

use crate::state::hub::HubKind;

/// Per-user record of which hub connections belong to the active client
/// instance.
///
/// All hub connections opened by one client instance share a token id;
/// a reconnect from a different instance produces a new token and displaces
/// this record. The connection service is the only writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    /// Opaque per-client-instance token derived from the auth credential.
    pub token_id: String,
    /// Hub kind -> live connection id for this instance.
    pub connections: IndexMap<HubKind, String>,
}

impl ConnectionState {
    pub fn new(token_id: impl Into<String>, hub: HubKind, connection_id: impl Into<String>) -> Self {
        let mut connections = IndexMap::new();
        connections.insert(hub, connection_id.into());
        Self {
            token_id: token_id.into(),
            connections,
        }
    }

    /// Record a connection for a hub, returning any id it replaced.
    pub fn register(&mut self, hub: HubKind, connection_id: impl Into<String>) -> Option<String> {
        self.connections.insert(hub, connection_id.into())
    }

    pub fn connection_for(&self, hub: HubKind) -> Option<&str> {
        self.connections.get(&hub).map(String::as_str)
    }

    /// Whether an invocation's transport tuple matches this instance.
    pub fn matches(&self, token_id: &str, hub: HubKind, connection_id: &str) -> bool {
        self.token_id == token_id && self.connection_for(hub) == Some(connection_id)
    }
}
