use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::state::room::{MatchType, Mod, QueueMode};

/// Persisted room row as returned by the match store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEntity {
    pub room_id: i64,
    pub name: String,
    pub password: Option<String>,
    pub host_user_id: i64,
    pub match_type: MatchType,
    pub queue_mode: QueueMode,
    /// Auto-start countdown length in seconds; zero disables auto-start.
    pub auto_start_seconds: u64,
    /// Set once the room has ended; a room whose `ends_at` has passed may not
    /// be joined again.
    pub ends_at: Option<SystemTime>,
}

impl RoomEntity {
    /// Whether the persisted room has already ended.
    pub fn has_ended(&self) -> bool {
        self.ends_at.is_some_and(|at| at <= SystemTime::now())
    }
}

/// Persisted playlist item row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistItemEntity {
    pub id: i64,
    pub room_id: i64,
    pub owner_id: i64,
    pub beatmap_id: i64,
    pub beatmap_checksum: String,
    pub ruleset_id: i16,
    pub required_mods: Vec<Mod>,
    pub allowed_mods: Vec<Mod>,
    pub playlist_order: u32,
    pub expired: bool,
}

/// Relation between two users as recorded by the wider platform.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RelationEntity {
    pub is_blocked: bool,
    pub is_friend: bool,
}
