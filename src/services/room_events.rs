//! Broadcast helpers so the coordinator reads as policy, not plumbing.
//!
//! Events fanned to the control group are linearized by the sending order
//! under the room lock.

use crate::{
    dto::{
        room::{CountdownSnapshot, PlaylistItemSnapshot},
        ws::{MatchServerEvent, ServerEvent},
    },
    state::{
        SharedState,
        countdown::ActiveCountdown,
        hub::{HubKind, gameplay_group, room_group},
        match_type::MatchRoomState,
        playlist::PlaylistItem,
        room::{BeatmapAvailability, MatchUserState, Mod, RoomSettings, RoomState, RoomUser, UserState},
    },
};

fn to_room(state: &SharedState, room_id: i64, event: ServerEvent) {
    state.gateway().send_to_group(&room_group(room_id), event);
}

fn to_gameplay(state: &SharedState, room_id: i64, event: ServerEvent) {
    state.gateway().send_to_group(&gameplay_group(room_id), event);
}

pub fn user_joined(state: &SharedState, room_id: i64, user: &RoomUser) {
    to_room(
        state,
        room_id,
        ServerEvent::UserJoined { user: user.into() },
    );
}

pub fn user_left(state: &SharedState, room_id: i64, user_id: i64) {
    to_room(state, room_id, ServerEvent::UserLeft { user_id });
}

pub fn user_kicked(state: &SharedState, room_id: i64, user_id: i64) {
    to_room(state, room_id, ServerEvent::UserKicked { user_id });
}

/// Kick notice delivered straight to the target before its groups are torn down.
pub fn kicked_directly(state: &SharedState, user_id: i64) {
    state
        .gateway()
        .send_to_user(HubKind::Multiplayer, user_id, ServerEvent::UserKicked { user_id });
}

pub fn host_changed(state: &SharedState, room_id: i64, user_id: i64) {
    to_room(state, room_id, ServerEvent::HostChanged { user_id });
}

pub fn settings_changed(state: &SharedState, room_id: i64, settings: &RoomSettings) {
    to_room(
        state,
        room_id,
        ServerEvent::SettingsChanged {
            settings: settings.clone(),
        },
    );
}

pub fn user_state_changed(state: &SharedState, room_id: i64, user_id: i64, user_state: UserState) {
    to_room(
        state,
        room_id,
        ServerEvent::UserStateChanged {
            user_id,
            state: user_state,
        },
    );
}

pub fn room_state_changed(state: &SharedState, room_id: i64, room_state: RoomState) {
    to_room(
        state,
        room_id,
        ServerEvent::RoomStateChanged { state: room_state },
    );
}

pub fn user_mods_changed(state: &SharedState, room_id: i64, user_id: i64, mods: &[Mod]) {
    to_room(
        state,
        room_id,
        ServerEvent::UserModsChanged {
            user_id,
            mods: mods.to_vec(),
        },
    );
}

pub fn user_beatmap_availability_changed(
    state: &SharedState,
    room_id: i64,
    user_id: i64,
    availability: BeatmapAvailability,
) {
    to_room(
        state,
        room_id,
        ServerEvent::UserBeatmapAvailabilityChanged {
            user_id,
            availability,
        },
    );
}

pub fn match_started(state: &SharedState, room_id: i64) {
    to_room(state, room_id, ServerEvent::MatchStarted);
}

pub fn results_ready(state: &SharedState, room_id: i64) {
    to_room(state, room_id, ServerEvent::ResultsReady);
}

/// Load request fanned only to the gameplay group.
pub fn load_requested(state: &SharedState, room_id: i64) {
    to_gameplay(state, room_id, ServerEvent::LoadRequested);
}

/// Load request for a single late-joining spectator.
pub fn load_requested_for_user(state: &SharedState, user_id: i64) {
    state
        .gateway()
        .send_to_user(HubKind::Multiplayer, user_id, ServerEvent::LoadRequested);
}

pub fn countdown_changed(state: &SharedState, room_id: i64, countdown: Option<&ActiveCountdown>) {
    to_room(
        state,
        room_id,
        ServerEvent::MatchEvent {
            event: MatchServerEvent::CountdownChanged {
                countdown: countdown.map(CountdownSnapshot::from),
            },
        },
    );
}

pub fn match_room_state_changed(
    state: &SharedState,
    room_id: i64,
    match_state: Option<MatchRoomState>,
) {
    to_room(
        state,
        room_id,
        ServerEvent::MatchRoomStateChanged { state: match_state },
    );
}

pub fn match_user_state_changed(
    state: &SharedState,
    room_id: i64,
    user_id: i64,
    match_state: Option<MatchUserState>,
) {
    to_room(
        state,
        room_id,
        ServerEvent::MatchUserStateChanged {
            user_id,
            state: match_state,
        },
    );
}

pub fn playlist_item_added(state: &SharedState, room_id: i64, item: &PlaylistItem) {
    to_room(
        state,
        room_id,
        ServerEvent::PlaylistItemAdded {
            item: PlaylistItemSnapshot::from(item),
        },
    );
}

pub fn playlist_item_changed(state: &SharedState, room_id: i64, item: &PlaylistItem) {
    to_room(
        state,
        room_id,
        ServerEvent::PlaylistItemChanged {
            item: PlaylistItemSnapshot::from(item),
        },
    );
}

pub fn playlist_item_removed(state: &SharedState, room_id: i64, item_id: i64) {
    to_room(state, room_id, ServerEvent::PlaylistItemRemoved { item_id });
}

pub fn invited(
    state: &SharedState,
    target_user_id: i64,
    room_id: i64,
    inviter_id: i64,
    password: Option<String>,
) {
    state.gateway().send_to_user(
        HubKind::Multiplayer,
        target_user_id,
        ServerEvent::Invited {
            room_id,
            inviter_id,
            password,
        },
    );
}
