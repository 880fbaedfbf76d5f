use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    countdown::{ActiveCountdown, CountdownKind},
    match_type::MatchRoomState,
    playlist::PlaylistItem,
    room::{
        BeatmapAvailability, MatchUserState, Mod, RoomSettings, RoomState, RoomUser, ServerRoom,
        UserState,
    },
};

/// One participant as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoomUserSnapshot {
    pub user_id: i64,
    pub state: UserState,
    pub mods: Vec<Mod>,
    pub availability: BeatmapAvailability,
    pub match_state: Option<MatchUserState>,
}

impl From<&RoomUser> for RoomUserSnapshot {
    fn from(value: &RoomUser) -> Self {
        Self {
            user_id: value.user_id,
            state: value.state,
            mods: value.mods.clone(),
            availability: value.availability,
            match_state: value.match_state,
        }
    }
}

/// One queued beatmap as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlaylistItemSnapshot {
    pub id: i64,
    pub owner_id: i64,
    pub beatmap_id: i64,
    pub beatmap_checksum: String,
    pub ruleset_id: i16,
    pub required_mods: Vec<Mod>,
    pub allowed_mods: Vec<Mod>,
    pub playlist_order: u32,
    pub expired: bool,
}

impl From<&PlaylistItem> for PlaylistItemSnapshot {
    fn from(value: &PlaylistItem) -> Self {
        Self {
            id: value.id,
            owner_id: value.owner_id,
            beatmap_id: value.beatmap_id,
            beatmap_checksum: value.beatmap_checksum.clone(),
            ruleset_id: value.ruleset_id,
            required_mods: value.required_mods.clone(),
            allowed_mods: value.allowed_mods.clone(),
            playlist_order: value.playlist_order,
            expired: value.expired,
        }
    }
}

/// Client-supplied playlist item for add/edit operations. The id is only
/// meaningful for edits; on add the server assigns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PlaylistItemInput {
    pub id: Option<i64>,
    pub beatmap_id: i64,
    pub beatmap_checksum: String,
    pub ruleset_id: i16,
    #[serde(default)]
    pub required_mods: Vec<Mod>,
    #[serde(default)]
    pub allowed_mods: Vec<Mod>,
}

/// A running countdown as seen by clients. Remaining time is computed from
/// the clock at serialization, so late joiners read an accurate figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CountdownSnapshot {
    pub id: Uuid,
    pub kind: CountdownKind,
    pub time_remaining_ms: u64,
}

impl From<&ActiveCountdown> for CountdownSnapshot {
    fn from(value: &ActiveCountdown) -> Self {
        Self {
            id: value.id,
            kind: value.kind,
            time_remaining_ms: value.time_remaining().as_millis() as u64,
        }
    }
}

/// Deep copy of a live room handed across the hub boundary; live objects
/// never leave the room lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoomSnapshot {
    pub room_id: i64,
    pub settings: RoomSettings,
    pub users: Vec<RoomUserSnapshot>,
    pub host_user_id: Option<i64>,
    pub state: RoomState,
    pub playlist: Vec<PlaylistItemSnapshot>,
    pub countdown: Option<CountdownSnapshot>,
    pub match_room_state: Option<MatchRoomState>,
}

impl From<&ServerRoom> for RoomSnapshot {
    fn from(room: &ServerRoom) -> Self {
        Self {
            room_id: room.room_id,
            settings: room.settings.clone(),
            users: room.users.iter().map(Into::into).collect(),
            host_user_id: room.host_user_id,
            state: room.state,
            playlist: room.queue.items().iter().map(Into::into).collect(),
            countdown: room.countdown.as_ref().map(Into::into),
            match_room_state: room.match_logic.room_state(),
        }
    }
}
