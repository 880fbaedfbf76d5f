use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dto::room::{CountdownSnapshot, PlaylistItemInput, PlaylistItemSnapshot, RoomSnapshot, RoomUserSnapshot};
use crate::state::{
    match_type::MatchRoomState,
    room::{BeatmapAvailability, MatchUserState, Mod, RoomSettings, RoomState, UserState},
};

/// Requests accepted from hub WebSocket clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum ClientRequest {
    JoinRoom {
        room_id: i64,
        #[serde(default)]
        password: Option<String>,
    },
    LeaveRoom,
    ChangeState {
        state: UserState,
    },
    ChangeSettings {
        settings: RoomSettings,
    },
    ChangeUserMods {
        mods: Vec<Mod>,
    },
    ChangeBeatmapAvailability {
        availability: BeatmapAvailability,
    },
    SendMatchRequest {
        request: MatchRequest,
    },
    StartMatch,
    AbortGameplay,
    TransferHost {
        user_id: i64,
    },
    KickUser {
        user_id: i64,
    },
    AddPlaylistItem {
        item: PlaylistItemInput,
    },
    EditPlaylistItem {
        item: PlaylistItemInput,
    },
    RemovePlaylistItem {
        item_id: i64,
    },
    InvitePlayer {
        user_id: i64,
    },
    #[serde(other)]
    Unknown,
}

/// Match-scoped requests routed through `SendMatchRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum MatchRequest {
    StartCountdown { duration_secs: u64 },
    StopCountdown,
    ChangeTeam { team_id: u32 },
}

/// Match-scoped events fanned to the room group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum MatchServerEvent {
    CountdownChanged {
        countdown: Option<CountdownSnapshot>,
    },
}

/// Events pushed from the server to hub clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Reply to a successful JoinRoom carrying the full room snapshot.
    JoinedRoom { room: RoomSnapshot },
    /// Reply to a request the server rejected.
    RequestFailed { message: String },
    UserJoined { user: RoomUserSnapshot },
    UserLeft { user_id: i64 },
    UserKicked { user_id: i64 },
    HostChanged { user_id: i64 },
    SettingsChanged { settings: RoomSettings },
    UserStateChanged { user_id: i64, state: UserState },
    RoomStateChanged { state: RoomState },
    UserBeatmapAvailabilityChanged {
        user_id: i64,
        availability: BeatmapAvailability,
    },
    UserModsChanged { user_id: i64, mods: Vec<Mod> },
    MatchStarted,
    ResultsReady,
    LoadRequested,
    MatchEvent { event: MatchServerEvent },
    MatchRoomStateChanged { state: Option<MatchRoomState> },
    MatchUserStateChanged {
        user_id: i64,
        state: Option<MatchUserState>,
    },
    PlaylistItemAdded { item: PlaylistItemSnapshot },
    PlaylistItemChanged { item: PlaylistItemSnapshot },
    PlaylistItemRemoved { item_id: i64 },
    Invited {
        room_id: i64,
        inviter_id: i64,
        #[serde(default)]
        password: Option<String>,
    },
    DisconnectRequested,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_inbound_messages_fall_through() {
        let parsed: ClientRequest =
            serde_json::from_str(r#"{"type":"SomethingNew","payload":1}"#).unwrap();
        assert_eq!(parsed, ClientRequest::Unknown);
    }

    #[test]
    fn join_room_parses_without_password() {
        let parsed: ClientRequest =
            serde_json::from_str(r#"{"type":"JoinRoom","room_id":42}"#).unwrap();
        assert_eq!(
            parsed,
            ClientRequest::JoinRoom {
                room_id: 42,
                password: None
            }
        );
    }

    #[test]
    fn server_events_round_trip() {
        let event = ServerEvent::UserStateChanged {
            user_id: 7,
            state: UserState::Ready,
        };
        let payload = serde_json::to_string(&event).unwrap();
        let parsed: ServerEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed, event);
    }
}
