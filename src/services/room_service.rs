//! Multiplayer coordinator: validates user-driven transitions, drives
//! room-level state, and fans events to the room's broadcast groups.
//!
//! Lock discipline: operations acquire the caller's client-state lock first,
//! then the room lock. Countdown completion tasks acquire only the room lock.

use std::{sync::Arc, time::Duration};

use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::{
        room::{PlaylistItemInput, RoomSnapshot},
        ws::MatchRequest,
    },
    error::ServiceError,
    services::room_events,
    state::{
        ClientState, SharedState,
        countdown::{self, CountdownKind, CountdownOutcome},
        entity_store::EntityUsage,
        hub::{HubKind, gameplay_group, room_group},
        match_type::MatchTypeLogic,
        playlist::{AddDisposition, PlaylistItem, PlaylistQueue},
        room::{
            BeatmapAvailability, MatchType, Mod, QueueMode, RoomSettings, RoomState, RoomUser,
            ServerRoom, StateChangeOutcome, UserState,
        },
    },
};

type RoomUsage = EntityUsage<ServerRoom>;
type UserUsage = EntityUsage<ClientState>;

enum Removal {
    Leave,
    Kick,
}

/// Acquire the caller's client state and the room it references, in the
/// canonical user-before-room order.
async fn acquire_user_room(
    state: &SharedState,
    user_id: i64,
) -> Result<(UserUsage, RoomUsage), ServiceError> {
    let user_usage = state
        .user_states()
        .acquire(user_id, false)
        .await
        .map_err(|err| match err {
            ServiceError::NotTracked => ServiceError::NotJoinedRoom,
            other => other,
        })?;
    let room_id = user_usage
        .get()
        .ok_or(ServiceError::NotJoinedRoom)?
        .room_id;
    let room_usage = state.rooms().acquire(room_id, false).await?;
    Ok((user_usage, room_usage))
}

fn room_of(usage: &mut RoomUsage) -> Result<&mut ServerRoom, ServiceError> {
    usage.get_mut().ok_or(ServiceError::NotTracked)
}

/// Join a room, initializing it from persistence when this node does not
/// track it yet. Returns a deep snapshot of the joined room.
pub async fn join_room(
    state: &SharedState,
    user_id: i64,
    room_id: i64,
    password: Option<&str>,
) -> Result<RoomSnapshot, ServiceError> {
    if state.store().is_user_restricted(user_id).await? {
        return Err(ServiceError::InvalidState(
            "restricted users cannot join rooms".into(),
        ));
    }

    let mut user_usage = state.user_states().acquire(user_id, true).await?;
    if user_usage.get().is_some() {
        return Err(ServiceError::InvalidState(
            "user is already in a room".into(),
        ));
    }

    let mut room_usage = match state.rooms().acquire(room_id, true).await {
        Ok(usage) => usage,
        Err(err) => {
            user_usage.destroy();
            return Err(err);
        }
    };

    match join_room_inner(state, &mut room_usage, user_id, room_id, password).await {
        Ok(snapshot) => {
            user_usage.set(ClientState { room_id });
            Ok(snapshot)
        }
        Err(err) => {
            unwind_failed_join(state, room_usage, user_id).await;
            user_usage.destroy();
            Err(err)
        }
    }
}

async fn join_room_inner(
    state: &SharedState,
    room_usage: &mut RoomUsage,
    user_id: i64,
    room_id: i64,
    password: Option<&str>,
) -> Result<RoomSnapshot, ServiceError> {
    if room_usage.get().is_none() {
        let room = load_room(state, room_id, user_id).await?;
        room_usage.set(room);
    }
    let room = room_of(room_usage)?;

    if room.settings.requires_password()
        && room.settings.password.as_deref() != Some(password.unwrap_or_default())
    {
        return Err(ServiceError::InvalidPassword);
    }

    if room.has_user(user_id) {
        return Err(ServiceError::InvalidState(
            "user is already listed in this room".into(),
        ));
    }

    let mut user = RoomUser::new(user_id);
    room.match_logic.on_join(&room.users, &mut user);

    // Broadcast first so the joiner only learns about itself from the snapshot.
    room_events::user_joined(state, room_id, &user);
    room.users.push(user);
    if room.host_user_id.is_none() {
        room.host_user_id = Some(user_id);
    }

    if let Err(err) = state.store().add_participant(room_id, user_id).await {
        warn!(room_id, user_id, error = %err, "failed to persist participant join");
    }

    state
        .gateway()
        .add_user_to_group(HubKind::Multiplayer, user_id, &room_group(room_id));

    Ok(RoomSnapshot::from(&*room))
}

/// Fetch and validate the persisted room, build its in-memory aggregate, and
/// mark it active before any user is added.
async fn load_room(
    state: &SharedState,
    room_id: i64,
    user_id: i64,
) -> Result<ServerRoom, ServiceError> {
    let entity = state
        .store()
        .get_room(room_id)
        .await?
        .ok_or_else(|| ServiceError::InvalidState("room is not available".into()))?;

    if entity.has_ended() {
        return Err(ServiceError::InvalidState("room has already ended".into()));
    }
    if entity.host_user_id != user_id {
        return Err(ServiceError::InvalidState(
            "the room owner must join before other players".into(),
        ));
    }

    let settings = RoomSettings {
        name: entity.name,
        password: entity.password,
        match_type: entity.match_type,
        queue_mode: entity.queue_mode,
        auto_start_seconds: entity.auto_start_seconds,
    };

    let items = state.store().get_all_playlist_items(room_id).await?;
    let mut queue = PlaylistQueue::from_entities(items, state.config().queue_items_per_user);
    queue.reorder(settings.queue_mode);

    state.store().mark_room_active(room_id).await?;
    Ok(ServerRoom::new(room_id, settings, queue))
}

/// Undo a partial join: a half-joined user leaves through the normal path; a
/// room that was activated but never populated is ended and destroyed; a slot
/// whose aggregate never got installed is simply released.
async fn unwind_failed_join(state: &SharedState, mut room_usage: RoomUsage, user_id: i64) {
    let status = room_usage
        .get()
        .map(|room| (room.has_user(user_id), room.users.is_empty()));
    match status {
        Some((true, _)) => {
            match remove_user(state, &mut room_usage, user_id, Removal::Leave).await {
                Ok(true) => end_and_destroy(state, room_usage).await,
                Ok(false) => {}
                Err(err) => {
                    warn!(user_id, error = %err, "failed to unwind partial join");
                }
            }
        }
        Some((false, true)) => end_and_destroy(state, room_usage).await,
        Some((false, false)) => {}
        None => room_usage.destroy(),
    }
}

/// Leave the caller's current room. A caller with no client state is a no-op.
pub async fn leave_room(state: &SharedState, user_id: i64) -> Result<(), ServiceError> {
    let mut user_usage = match state.user_states().acquire(user_id, false).await {
        Ok(usage) => usage,
        Err(ServiceError::NotTracked) => return Ok(()),
        Err(err) => return Err(err),
    };
    let Some(client) = user_usage.get().cloned() else {
        user_usage.destroy();
        return Ok(());
    };

    let mut room_usage = match state.rooms().acquire(client.room_id, false).await {
        Ok(usage) => usage,
        Err(ServiceError::NotTracked) => {
            user_usage.destroy();
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    match remove_user(state, &mut room_usage, user_id, Removal::Leave).await {
        Ok(true) => end_and_destroy(state, room_usage).await,
        Ok(false) => {}
        Err(ServiceError::InvalidState(_)) => {}
        Err(err) => return Err(err),
    }
    user_usage.destroy();
    Ok(())
}

/// Kick a user from the caller's room. Host only; the target's client state
/// is torn down with it.
pub async fn kick_user(
    state: &SharedState,
    caller_id: i64,
    target_id: i64,
) -> Result<(), ServiceError> {
    if caller_id == target_id {
        return Err(ServiceError::InvalidState("cannot kick yourself".into()));
    }

    let mut target_usage = state
        .user_states()
        .acquire(target_id, false)
        .await
        .map_err(|err| match err {
            ServiceError::NotTracked => {
                ServiceError::InvalidState("user is not in the room".into())
            }
            other => other,
        })?;
    let room_id = target_usage
        .get()
        .ok_or_else(|| ServiceError::InvalidState("user is not in the room".into()))?
        .room_id;

    let mut room_usage = state.rooms().acquire(room_id, false).await?;
    {
        let room = room_of(&mut room_usage)?;
        if !room.is_host(caller_id) {
            return Err(ServiceError::NotHost);
        }
    }

    match remove_user(state, &mut room_usage, target_id, Removal::Kick).await {
        Ok(true) => end_and_destroy(state, room_usage).await,
        Ok(false) => {}
        Err(err) => return Err(err),
    }
    target_usage.destroy();
    Ok(())
}

/// Remove a user from the room, returning whether the room is now empty.
/// The caller decides what to do with an empty room.
async fn remove_user(
    state: &SharedState,
    room_usage: &mut RoomUsage,
    target_id: i64,
    removal: Removal,
) -> Result<bool, ServiceError> {
    let room_id = room_usage.id();
    let room = room_of(room_usage)?;
    let index = room
        .users
        .iter()
        .position(|user| user.user_id == target_id)
        .ok_or_else(|| ServiceError::InvalidState("user is not in the room".into()))?;

    if matches!(removal, Removal::Kick) {
        room_events::kicked_directly(state, target_id);
    }

    let gateway = state.gateway();
    gateway.remove_user_from_group(HubKind::Multiplayer, target_id, &gameplay_group(room_id));
    gateway.remove_user_from_group(HubKind::Multiplayer, target_id, &room_group(room_id));

    let mut user = room.users.remove(index);
    room.match_logic.on_leave(&mut user);

    if let Err(err) = state.store().remove_participant(room_id, target_id).await {
        warn!(room_id, user_id = target_id, error = %err, "failed to persist participant removal");
    }

    if room.users.is_empty() {
        if let Some(mut stale) = room.countdown.take() {
            stale.stop();
        }
        return Ok(true);
    }

    update_room_state(state, room).await?;

    if room.host_user_id == Some(target_id) {
        let new_host = room.users[0].user_id;
        room.host_user_id = Some(new_host);
        room_events::host_changed(state, room_id, new_host);
        if let Err(err) = state.store().update_room_host(room_id, new_host).await {
            warn!(room_id, user_id = new_host, error = %err, "failed to persist host change");
        }
    }

    match removal {
        Removal::Leave => room_events::user_left(state, room_id, target_id),
        Removal::Kick => room_events::user_kicked(state, room_id, target_id),
    }
    Ok(false)
}

/// End the match in persistence and release the room entity.
async fn end_and_destroy(state: &SharedState, room_usage: RoomUsage) {
    let room_id = room_usage.id();
    if let Err(err) = state.store().end_match(room_id).await {
        warn!(room_id, error = %err, "failed to persist match end");
    }
    room_usage.destroy();
}

/// Apply a client-requested user state change.
pub async fn change_state(
    state: &SharedState,
    user_id: i64,
    new_state: UserState,
) -> Result<(), ServiceError> {
    let (_user_usage, mut room_usage) = acquire_user_room(state, user_id).await?;
    let room = room_of(&mut room_usage)?;
    let current = room
        .user(user_id)
        .ok_or(ServiceError::NotJoinedRoom)?
        .state;

    if current == new_state {
        return Ok(());
    }
    match current.validate_client_change(new_state)? {
        StateChangeOutcome::SilentIgnore => return Ok(()),
        StateChangeOutcome::Apply => {}
    }
    if new_state == UserState::Ready && room.queue.current_item().is_none() {
        return Err(ServiceError::InvalidState(
            "the current playlist item is not playable".into(),
        ));
    }

    set_user_state(state, room, user_id, new_state);

    // A spectator arriving mid-match needs the load request it missed.
    if new_state == UserState::Spectating && room.state != RoomState::Open {
        room_events::load_requested_for_user(state, user_id);
    }

    update_room_state(state, room).await
}

/// Apply a user state, maintain gameplay-group membership, and broadcast.
fn set_user_state(state: &SharedState, room: &mut ServerRoom, user_id: i64, new_state: UserState) {
    let room_id = room.room_id;
    if let Some(user) = room.user_mut(user_id) {
        user.state = new_state;
    }
    if new_state.joins_gameplay_group() {
        state
            .gateway()
            .add_user_to_group(HubKind::Multiplayer, user_id, &gameplay_group(room_id));
    } else if new_state.leaves_gameplay_group() {
        state
            .gateway()
            .remove_user_from_group(HubKind::Multiplayer, user_id, &gameplay_group(room_id));
    }
    room_events::user_state_changed(state, room_id, user_id, new_state);
}

/// Host-driven match start.
pub async fn start_match(state: &SharedState, user_id: i64) -> Result<(), ServiceError> {
    let (_user_usage, mut room_usage) = acquire_user_room(state, user_id).await?;
    let room = room_of(&mut room_usage)?;

    if !room.is_host(user_id) {
        return Err(ServiceError::NotHost);
    }
    if room.state != RoomState::Open {
        return Err(ServiceError::InvalidState(
            "a match is already in progress".into(),
        ));
    }
    let host_state = room.user(user_id).map(|user| user.state);
    if !matches!(host_state, Some(UserState::Ready | UserState::Spectating)) {
        return Err(ServiceError::InvalidState("the host is not ready".into()));
    }
    if !room.any_user_in_state(UserState::Ready) {
        return Err(ServiceError::InvalidState("no users are ready".into()));
    }
    if room.queue.current_item().is_none() {
        return Err(ServiceError::InvalidState(
            "the current playlist item has already been played".into(),
        ));
    }

    internal_start(state, room);
    Ok(())
}

/// Move every ready user into the load phase and request loads from the
/// gameplay group. Any pending countdown is cancelled first.
fn internal_start(state: &SharedState, room: &mut ServerRoom) {
    stop_countdown(state, room);
    for ready_id in room.user_ids_in_state(UserState::Ready) {
        set_user_state(state, room, ready_id, UserState::WaitingForLoad);
    }
    room.state = RoomState::WaitingForLoad;
    room_events::room_state_changed(state, room.room_id, room.state);
    room_events::load_requested(state, room.room_id);
}

/// Bail out of gameplay back to the lobby.
pub async fn abort_gameplay(state: &SharedState, user_id: i64) -> Result<(), ServiceError> {
    let (_user_usage, mut room_usage) = acquire_user_room(state, user_id).await?;
    let room = room_of(&mut room_usage)?;
    let current = room
        .user(user_id)
        .ok_or(ServiceError::NotJoinedRoom)?
        .state;
    if !current.is_gameplay() {
        return Err(ServiceError::InvalidState(
            "user is not in a gameplay state".into(),
        ));
    }
    set_user_state(state, room, user_id, UserState::Idle);
    update_room_state(state, room).await
}

/// Hand the host role to another participant.
pub async fn transfer_host(
    state: &SharedState,
    caller_id: i64,
    target_id: i64,
) -> Result<(), ServiceError> {
    let (_user_usage, mut room_usage) = acquire_user_room(state, caller_id).await?;
    let room_id = room_usage.id();
    let room = room_of(&mut room_usage)?;

    if !room.is_host(caller_id) {
        return Err(ServiceError::NotHost);
    }
    if !room.has_user(target_id) {
        return Err(ServiceError::InvalidState("user is not in the room".into()));
    }
    if room.host_user_id == Some(target_id) {
        return Ok(());
    }

    room.host_user_id = Some(target_id);
    room_events::host_changed(state, room_id, target_id);
    if let Err(err) = state.store().update_room_host(room_id, target_id).await {
        warn!(room_id, user_id = target_id, error = %err, "failed to persist host change");
    }
    Ok(())
}

/// Host-driven settings change; playlist-item identity stays server-owned.
pub async fn change_settings(
    state: &SharedState,
    user_id: i64,
    new_settings: RoomSettings,
) -> Result<(), ServiceError> {
    let (_user_usage, mut room_usage) = acquire_user_room(state, user_id).await?;
    let room_id = room_usage.id();
    let room = room_of(&mut room_usage)?;

    if !room.is_host(user_id) {
        return Err(ServiceError::NotHost);
    }
    if room.state != RoomState::Open {
        return Err(ServiceError::InvalidState(
            "cannot change settings while gameplay is in progress".into(),
        ));
    }
    if new_settings.match_type == MatchType::Playlists {
        return Err(ServiceError::InvalidInput(
            "playlists rooms cannot be hosted here".into(),
        ));
    }
    if new_settings.auto_start_seconds > state.config().countdown_max.as_secs() {
        return Err(ServiceError::InvalidInput(
            "auto-start duration is too long".into(),
        ));
    }
    if new_settings == room.settings {
        return Ok(());
    }

    let previous = std::mem::replace(&mut room.settings, new_settings);
    if let Err(err) = state
        .store()
        .update_room_settings(room_id, room.settings.clone())
        .await
    {
        // Settings are authoritative in persistence; roll back and rethrow.
        room.settings = previous;
        return Err(err.into());
    }

    if previous.match_type != room.settings.match_type {
        swap_match_logic(state, room);
    }
    if previous.queue_mode != room.settings.queue_mode {
        apply_queue_reorder(state, room).await;
    }

    ensure_all_users_valid_mods(state, room);
    unready_all(state, room);
    room_events::settings_changed(state, room_id, &room.settings);
    update_room_state(state, room).await
}

/// Swap in the strategy for the current match type and replay its join hook
/// for every present user.
fn swap_match_logic(state: &SharedState, room: &mut ServerRoom) {
    room.match_logic = MatchTypeLogic::for_match_type(room.settings.match_type);
    let room_id = room.room_id;
    let logic = room.match_logic.clone();
    for index in 0..room.users.len() {
        let (assigned, rest) = room.users.split_at_mut(index);
        let user = &mut rest[0];
        logic.on_join(assigned, user);
        room_events::match_user_state_changed(state, room_id, user.user_id, user.match_state);
    }
    room_events::match_room_state_changed(state, room_id, logic.room_state());
}

/// Update the caller's mod selection against the current item.
pub async fn change_user_mods(
    state: &SharedState,
    user_id: i64,
    mods: Vec<Mod>,
) -> Result<(), ServiceError> {
    let (_user_usage, mut room_usage) = acquire_user_room(state, user_id).await?;
    let room_id = room_usage.id();
    let room = room_of(&mut room_usage)?;

    let (allowed, required) = {
        let current = room.queue.current_item().ok_or_else(|| {
            ServiceError::InvalidState("the current playlist item is not playable".into())
        })?;
        (current.allowed_mods.clone(), current.required_mods.clone())
    };
    state
        .rules()
        .validate_user_mods(&allowed, &required, &mods)
        .map_err(ServiceError::InvalidState)?;

    let user = room.user_mut(user_id).ok_or(ServiceError::NotJoinedRoom)?;
    if user.mods == mods {
        return Ok(());
    }
    user.mods = mods.clone();
    room_events::user_mods_changed(state, room_id, user_id, &mods);
    Ok(())
}

/// Record the caller's beatmap availability, broadcasting only real changes.
pub async fn change_beatmap_availability(
    state: &SharedState,
    user_id: i64,
    availability: BeatmapAvailability,
) -> Result<(), ServiceError> {
    let (_user_usage, mut room_usage) = acquire_user_room(state, user_id).await?;
    let room_id = room_usage.id();
    let room = room_of(&mut room_usage)?;
    let user = room.user_mut(user_id).ok_or(ServiceError::NotJoinedRoom)?;
    if user.availability == availability {
        return Ok(());
    }
    user.availability = availability;
    room_events::user_beatmap_availability_changed(state, room_id, user_id, availability);
    Ok(())
}

/// Dispatch a match-scoped request by tag.
pub async fn send_match_request(
    state: &SharedState,
    user_id: i64,
    request: MatchRequest,
) -> Result<(), ServiceError> {
    let (_user_usage, mut room_usage) = acquire_user_room(state, user_id).await?;
    let room = room_of(&mut room_usage)?;

    match request {
        MatchRequest::StartCountdown { duration_secs } => {
            if !room.is_host(user_id) {
                return Err(ServiceError::NotHost);
            }
            if room.state != RoomState::Open {
                return Err(ServiceError::InvalidState(
                    "cannot start a countdown during gameplay".into(),
                ));
            }
            if room.settings.auto_start_enabled() {
                return Err(ServiceError::InvalidState(
                    "auto-start manages the countdown for this room".into(),
                ));
            }
            let duration = state
                .config()
                .clamp_countdown(Duration::from_secs(duration_secs));
            start_countdown(state, room, CountdownKind::MatchStart, duration);
            Ok(())
        }
        MatchRequest::StopCountdown => {
            if !room.is_host(user_id) {
                return Err(ServiceError::NotHost);
            }
            if let Some(active) = room.countdown.as_ref() {
                if !active.kind.is_host_cancellable() {
                    return Err(ServiceError::InvalidState(
                        "the auto-start countdown cannot be cancelled".into(),
                    ));
                }
                stop_countdown(state, room);
            }
            Ok(())
        }
        MatchRequest::ChangeTeam { team_id } => {
            let room_id = room.room_id;
            let logic = room.match_logic.clone();
            let user = room.user_mut(user_id).ok_or(ServiceError::NotJoinedRoom)?;
            if logic.handle_change_team(user, team_id)? {
                let match_state = user.match_state;
                room_events::match_user_state_changed(state, room_id, user_id, match_state);
            }
            Ok(())
        }
    }
}

/// Start a countdown, replacing any prior one before it becomes visible.
fn start_countdown(
    state: &SharedState,
    room: &mut ServerRoom,
    kind: CountdownKind,
    duration: Duration,
) {
    stop_countdown(state, room);

    let (active, mut wakeup) = countdown::begin(kind, duration);
    let countdown_id = active.id;
    room_events::countdown_changed(state, room.room_id, Some(&active));
    room.countdown = Some(active);

    let task_state = Arc::clone(state);
    let room_id = room.room_id;
    tokio::spawn(async move {
        let outcome = wakeup.wait().await;
        if outcome != CountdownOutcome::Stopped {
            if let Err(err) = on_countdown_elapsed(&task_state, room_id, countdown_id).await {
                warn!(room_id, error = %err, "countdown completion failed");
            }
        }
        wakeup.finish();
    });
}

/// Cancel the running countdown, suppressing its completion.
fn stop_countdown(state: &SharedState, room: &mut ServerRoom) {
    if let Some(mut active) = room.countdown.take() {
        active.stop();
        room_events::countdown_changed(state, room.room_id, None);
    }
}

fn stop_countdown_if_kind(state: &SharedState, room: &mut ServerRoom, kind: CountdownKind) {
    if room.countdown.as_ref().is_some_and(|active| active.kind == kind) {
        stop_countdown(state, room);
    }
}

/// Countdown completion: re-acquire the room, verify the countdown is still
/// current, clear it, and start the match if that is still possible.
pub(crate) async fn on_countdown_elapsed(
    state: &SharedState,
    room_id: i64,
    countdown_id: Uuid,
) -> Result<(), ServiceError> {
    let mut room_usage = match state.rooms().acquire(room_id, false).await {
        Ok(usage) => usage,
        Err(ServiceError::NotTracked) => return Ok(()),
        Err(err) => return Err(err),
    };
    let Some(room) = room_usage.get_mut() else {
        return Ok(());
    };
    if room.countdown.as_ref().map(|active| active.id) != Some(countdown_id) {
        return Ok(());
    }

    room.countdown = None;
    room_events::countdown_changed(state, room_id, None);

    if room.state == RoomState::Open
        && room.any_user_in_state(UserState::Ready)
        && room.queue.current_item().is_some()
    {
        internal_start(state, room);
    }
    Ok(())
}

/// Validate a client-supplied playlist item against the rules seam and the
/// persisted beatmap checksum.
async fn validate_item_input(
    state: &SharedState,
    input: &PlaylistItemInput,
) -> Result<(), ServiceError> {
    if !state.rules().is_valid_ruleset(input.ruleset_id) {
        return Err(ServiceError::InvalidInput(format!(
            "ruleset `{}` is not playable",
            input.ruleset_id
        )));
    }
    state
        .rules()
        .validate_item_mods(input.ruleset_id, &input.required_mods, &input.allowed_mods)
        .map_err(ServiceError::InvalidInput)?;

    let checksum = state
        .store()
        .get_beatmap_checksum(input.beatmap_id)
        .await?
        .ok_or_else(|| ServiceError::InvalidInput("beatmap does not exist".into()))?;
    if checksum != input.beatmap_checksum {
        return Err(ServiceError::InvalidInput(
            "beatmap checksum does not match".into(),
        ));
    }
    Ok(())
}

/// Add an item under the active queue mode. In host-only mode the single
/// pending item is re-edited in place.
pub async fn add_playlist_item(
    state: &SharedState,
    user_id: i64,
    input: PlaylistItemInput,
) -> Result<(), ServiceError> {
    let (_user_usage, mut room_usage) = acquire_user_room(state, user_id).await?;
    let room_id = room_usage.id();
    let room = room_of(&mut room_usage)?;

    validate_item_input(state, &input).await?;
    let disposition =
        room.queue
            .check_add_allowed(room.settings.queue_mode, user_id, room.is_host(user_id))?;
    let previous_current = room.queue.current_item_id();
    let mut edited_current = false;

    match disposition {
        AddDisposition::Append => {
            let mut item = PlaylistItem {
                id: 0,
                owner_id: user_id,
                beatmap_id: input.beatmap_id,
                beatmap_checksum: input.beatmap_checksum,
                ruleset_id: input.ruleset_id,
                required_mods: input.required_mods,
                allowed_mods: input.allowed_mods,
                playlist_order: room.queue.next_order(),
                expired: false,
            };
            item.id = state
                .store()
                .add_playlist_item(item.to_entity(room_id))
                .await?;
            room.queue.upsert(item.clone());
            room_events::playlist_item_added(state, room_id, &item);
        }
        AddDisposition::ReplaceCurrent(current_id) => {
            let existing = room
                .queue
                .item(current_id)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(format!("playlist item `{current_id}`")))?;
            let item = PlaylistItem {
                id: current_id,
                owner_id: existing.owner_id,
                beatmap_id: input.beatmap_id,
                beatmap_checksum: input.beatmap_checksum,
                ruleset_id: input.ruleset_id,
                required_mods: input.required_mods,
                allowed_mods: input.allowed_mods,
                playlist_order: existing.playlist_order,
                expired: false,
            };
            state
                .store()
                .update_playlist_item(item.to_entity(room_id))
                .await?;
            room.queue.upsert(item.clone());
            room_events::playlist_item_changed(state, room_id, &item);
            edited_current = true;
        }
    }

    apply_queue_reorder(state, room).await;
    after_queue_changed(state, room, previous_current, edited_current);
    update_room_state(state, room).await
}

/// Edit an existing non-expired item the caller is entitled to change.
pub async fn edit_playlist_item(
    state: &SharedState,
    user_id: i64,
    input: PlaylistItemInput,
) -> Result<(), ServiceError> {
    let item_id = input
        .id
        .ok_or_else(|| ServiceError::InvalidInput("playlist item id is required".into()))?;

    let (_user_usage, mut room_usage) = acquire_user_room(state, user_id).await?;
    let room_id = room_usage.id();
    let room = room_of(&mut room_usage)?;

    validate_item_input(state, &input).await?;
    room.queue
        .check_edit_allowed(room.settings.queue_mode, user_id, room.is_host(user_id), item_id)?;

    let existing = room
        .queue
        .item(item_id)
        .cloned()
        .ok_or_else(|| ServiceError::NotFound(format!("playlist item `{item_id}`")))?;
    let previous_current = room.queue.current_item_id();
    let item = PlaylistItem {
        id: item_id,
        owner_id: existing.owner_id,
        beatmap_id: input.beatmap_id,
        beatmap_checksum: input.beatmap_checksum,
        ruleset_id: input.ruleset_id,
        required_mods: input.required_mods,
        allowed_mods: input.allowed_mods,
        playlist_order: existing.playlist_order,
        expired: false,
    };
    state
        .store()
        .update_playlist_item(item.to_entity(room_id))
        .await?;
    room.queue.upsert(item.clone());
    room_events::playlist_item_changed(state, room_id, &item);

    apply_queue_reorder(state, room).await;
    let edited_current = room.queue.current_item_id() == Some(item_id);
    after_queue_changed(state, room, previous_current, edited_current);
    update_room_state(state, room).await
}

/// Remove an item the caller is entitled to remove. The sole remaining live
/// item is protected; removing the current item re-unreadies the room.
pub async fn remove_playlist_item(
    state: &SharedState,
    user_id: i64,
    item_id: i64,
) -> Result<(), ServiceError> {
    let (_user_usage, mut room_usage) = acquire_user_room(state, user_id).await?;
    let room_id = room_usage.id();
    let room = room_of(&mut room_usage)?;

    room.queue.check_remove_allowed(
        room.settings.queue_mode,
        user_id,
        room.is_host(user_id),
        item_id,
    )?;
    let previous_current = room.queue.current_item_id();

    state.store().remove_playlist_item(room_id, item_id).await?;
    room.queue.remove(item_id);
    room_events::playlist_item_removed(state, room_id, item_id);

    apply_queue_reorder(state, room).await;
    after_queue_changed(state, room, previous_current, false);
    update_room_state(state, room).await
}

/// Invite another player, honoring block and PM-privacy relations.
pub async fn invite_player(
    state: &SharedState,
    caller_id: i64,
    target_id: i64,
) -> Result<(), ServiceError> {
    if caller_id == target_id {
        return Err(ServiceError::InvalidState("cannot invite yourself".into()));
    }

    let target_view = state.store().get_user_relation(target_id, caller_id).await?;
    if target_view.is_some_and(|relation| relation.is_blocked) {
        return Err(ServiceError::UserBlocked);
    }
    let caller_view = state.store().get_user_relation(caller_id, target_id).await?;
    if caller_view.is_some_and(|relation| relation.is_blocked) {
        return Err(ServiceError::UserBlocked);
    }
    if state.store().pm_friends_only(target_id).await?
        && !target_view.is_some_and(|relation| relation.is_friend)
    {
        return Err(ServiceError::UserBlocksPMs);
    }

    let (_user_usage, mut room_usage) = acquire_user_room(state, caller_id).await?;
    let room = room_of(&mut room_usage)?;
    room_events::invited(
        state,
        target_id,
        room.room_id,
        caller_id,
        room.settings.password.clone(),
    );
    Ok(())
}

/// Re-unready and re-validate when the current item changed identity, or
/// re-validate mods when its content was edited in place.
fn after_queue_changed(
    state: &SharedState,
    room: &mut ServerRoom,
    previous_current: Option<i64>,
    edited_current: bool,
) {
    if room.queue.current_item_id() != previous_current {
        unready_all(state, room);
        ensure_all_users_valid_mods(state, room);
    } else if edited_current {
        ensure_all_users_valid_mods(state, room);
    }
}

fn unready_all(state: &SharedState, room: &mut ServerRoom) {
    for ready_id in room.user_ids_in_state(UserState::Ready) {
        set_user_state(state, room, ready_id, UserState::Idle);
    }
}

/// Force-change any selection the new current item no longer permits.
fn ensure_all_users_valid_mods(state: &SharedState, room: &mut ServerRoom) {
    let Some((allowed, required)) = room
        .queue
        .current_item()
        .map(|item| (item.allowed_mods.clone(), item.required_mods.clone()))
    else {
        return;
    };
    let room_id = room.room_id;
    let rules = Arc::clone(state.rules());
    for user in &mut room.users {
        if !user.mods.is_empty()
            && rules
                .validate_user_mods(&allowed, &required, &user.mods)
                .is_err()
        {
            user.mods = rules.filter_user_mods(&allowed, &user.mods);
            room_events::user_mods_changed(state, room_id, user.user_id, &user.mods);
        }
    }
}

/// Persist and broadcast any ordering changes for the active queue mode.
async fn apply_queue_reorder(state: &SharedState, room: &mut ServerRoom) {
    let changed = room.queue.reorder(room.settings.queue_mode);
    for item in changed {
        if let Err(err) = state
            .store()
            .update_playlist_item(item.to_entity(room.room_id))
            .await
        {
            warn!(room_id = room.room_id, item_id = item.id, error = %err, "failed to persist playlist order");
        }
        room_events::playlist_item_changed(state, room.room_id, &item);
    }
}

/// Single-pass room state recomputation, run after any user-state or
/// user-set change.
async fn update_room_state(state: &SharedState, room: &mut ServerRoom) -> Result<(), ServiceError> {
    match room.state {
        RoomState::Open => {
            if room.settings.auto_start_enabled() {
                let startable = room.any_user_in_state(UserState::Ready)
                    && room.queue.current_item().is_some();
                if startable {
                    if room.countdown.is_none() {
                        start_countdown(
                            state,
                            room,
                            CountdownKind::ForceStart,
                            room.settings.auto_start_duration(),
                        );
                    }
                } else {
                    stop_countdown_if_kind(state, room, CountdownKind::ForceStart);
                }
            } else {
                stop_countdown_if_kind(state, room, CountdownKind::ForceStart);
            }
        }
        RoomState::WaitingForLoad => {
            if !room.any_user_in_state(UserState::WaitingForLoad) {
                if room.any_user_in_state(UserState::Loaded) {
                    for loaded_id in room.user_ids_in_state(UserState::Loaded) {
                        set_user_state(state, room, loaded_id, UserState::Playing);
                    }
                    room_events::match_started(state, room.room_id);
                    room.state = RoomState::Playing;
                    room_events::room_state_changed(state, room.room_id, room.state);
                } else {
                    // Everyone abandoned the load.
                    room.state = RoomState::Open;
                    room_events::room_state_changed(state, room.room_id, room.state);
                }
            }
        }
        RoomState::Playing => {
            if !room.any_user_in_state(UserState::Playing) {
                for finished_id in room.user_ids_in_state(UserState::FinishedPlay) {
                    set_user_state(state, room, finished_id, UserState::Results);
                }
                room.state = RoomState::Open;
                room_events::room_state_changed(state, room.room_id, room.state);
                room_events::results_ready(state, room.room_id);
                finish_current_item(state, room).await?;
            }
        }
    }
    Ok(())
}

/// Expire the finished item and produce its successor per queue mode.
async fn finish_current_item(
    state: &SharedState,
    room: &mut ServerRoom,
) -> Result<(), ServiceError> {
    let Some(current) = room.queue.current_item().cloned() else {
        return Ok(());
    };
    let room_id = room.room_id;

    room.queue.expire(current.id);
    state
        .store()
        .mark_playlist_item_played(room_id, current.id)
        .await?;
    if let Some(expired) = room.queue.item(current.id) {
        room_events::playlist_item_changed(state, room_id, expired);
    }

    if room.settings.queue_mode == QueueMode::HostOnly {
        // Host-only rooms replay the same item under a fresh id.
        let mut replay = current.clone();
        replay.id = 0;
        replay.expired = false;
        replay.playlist_order = room.queue.next_order();
        replay.id = state
            .store()
            .add_playlist_item(replay.to_entity(room_id))
            .await?;
        room.queue.upsert(replay.clone());
        room_events::playlist_item_added(state, room_id, &replay);
    }

    apply_queue_reorder(state, room).await;
    after_queue_changed(state, room, Some(current.id), false);
    Ok(())
}
