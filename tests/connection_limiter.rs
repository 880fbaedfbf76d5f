mod support;

use tokio::sync::mpsc;

use support::test_env;
use tempo_back::{
    dto::ws::ServerEvent,
    error::ServiceError,
    services::{connection_service, connection_service::HubIdentity, room_service},
    state::hub::HubKind,
};

fn identity(user_id: i64, token: &str, hub: HubKind, connection_id: &str) -> HubIdentity {
    HubIdentity {
        user_id,
        token_id: token.into(),
        hub,
        connection_id: connection_id.into(),
    }
}

async fn register(env: &support::TestEnv, identity: &HubIdentity) {
    let (tx, _rx) = mpsc::unbounded_channel();
    connection_service::register_connection(&env.state, identity, tx)
        .await
        .unwrap();
}

#[tokio::test]
async fn new_instance_supersedes_every_old_hub_connection() {
    let env = test_env();
    let old_multiplayer = identity(1, "token-a", HubKind::Multiplayer, "conn-a-m");
    let old_spectator = identity(1, "token-a", HubKind::Spectator, "conn-a-s");
    register(&env, &old_multiplayer).await;
    register(&env, &old_spectator).await;

    let new_instance = identity(1, "token-b", HubKind::Multiplayer, "conn-b-m");
    register(&env, &new_instance).await;

    for old_connection in ["conn-a-m", "conn-a-s"] {
        assert!(
            env.gateway
                .connection_events(old_connection)
                .iter()
                .any(|event| matches!(event, ServerEvent::DisconnectRequested)),
            "{old_connection} must be asked to disconnect"
        );
    }

    assert!(matches!(
        connection_service::verify_invocation(&env.state, &old_multiplayer)
            .await
            .unwrap_err(),
        ServiceError::StaleConnection
    ));
    connection_service::verify_invocation(&env.state, &new_instance)
        .await
        .unwrap();
}

#[tokio::test]
async fn same_instance_reconnect_replaces_the_hub_slot() {
    let env = test_env();
    let first = identity(1, "token-a", HubKind::Multiplayer, "conn-1");
    register(&env, &first).await;

    let reconnect = identity(1, "token-a", HubKind::Multiplayer, "conn-2");
    register(&env, &reconnect).await;

    assert!(
        env.gateway.connection_events("conn-1").is_empty(),
        "a same-instance reconnect must not request disconnects"
    );
    assert!(matches!(
        connection_service::verify_invocation(&env.state, &first)
            .await
            .unwrap_err(),
        ServiceError::StaleConnection
    ));
    connection_service::verify_invocation(&env.state, &reconnect)
        .await
        .unwrap();
}

#[tokio::test]
async fn same_instance_may_hold_both_hubs() {
    let env = test_env();
    let multiplayer = identity(1, "token-a", HubKind::Multiplayer, "conn-m");
    let spectator = identity(1, "token-a", HubKind::Spectator, "conn-s");
    register(&env, &multiplayer).await;
    register(&env, &spectator).await;

    connection_service::verify_invocation(&env.state, &multiplayer)
        .await
        .unwrap();
    connection_service::verify_invocation(&env.state, &spectator)
        .await
        .unwrap();
}

#[tokio::test]
async fn clean_disconnect_destroys_state_and_leaves_the_room() {
    let env = test_env();
    env.seed_room(7, 1);
    let connection = identity(1, "token-a", HubKind::Multiplayer, "conn-1-token-a");
    register(&env, &connection).await;
    room_service::join_room(&env.state, 1, 7, None).await.unwrap();

    connection_service::handle_disconnect(&env.state, &connection).await;

    assert!(!env.room_is_tracked(7).await);
    assert!(env.store.room_has_ended(7));
    assert!(matches!(
        connection_service::verify_invocation(&env.state, &connection)
            .await
            .unwrap_err(),
        ServiceError::StaleConnection
    ));
}

#[tokio::test]
async fn stale_instance_disconnect_leaves_the_new_state_alone() {
    let env = test_env();
    let old_instance = identity(1, "token-a", HubKind::Multiplayer, "conn-a");
    register(&env, &old_instance).await;
    let new_instance = identity(1, "token-b", HubKind::Multiplayer, "conn-b");
    register(&env, &new_instance).await;

    // The displaced client's socket finally closes.
    connection_service::handle_disconnect(&env.state, &old_instance).await;

    connection_service::verify_invocation(&env.state, &new_instance)
        .await
        .unwrap();
}
