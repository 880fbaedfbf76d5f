use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ServiceError;
use crate::state::{countdown::ActiveCountdown, match_type::MatchTypeLogic, playlist::PlaylistQueue};

/// Per-user gameplay lifecycle state.
///
/// `WaitingForLoad`, `Playing`, and `Results` are server-managed; clients may
/// never request them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum UserState {
    Idle,
    Ready,
    WaitingForLoad,
    Loaded,
    Playing,
    FinishedPlay,
    Results,
    Spectating,
}

/// Verdict for a client-requested state change that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeOutcome {
    Apply,
    /// Raced against a server-driven transition; dropped without an error.
    SilentIgnore,
}

impl UserState {
    /// Whether this state participates in active gameplay.
    pub fn is_gameplay(self) -> bool {
        matches!(
            self,
            UserState::WaitingForLoad | UserState::Loaded | UserState::Playing
        )
    }

    /// States whose connections belong in the room's gameplay broadcast group.
    pub fn joins_gameplay_group(self) -> bool {
        matches!(self, UserState::Ready | UserState::Spectating)
    }

    /// States whose connections leave the gameplay broadcast group.
    pub fn leaves_gameplay_group(self) -> bool {
        matches!(self, UserState::Idle | UserState::FinishedPlay)
    }

    /// Validate a client-requested transition from `self` to `to`.
    ///
    /// An un-ready request that raced a server-side move into gameplay is
    /// ignored rather than rejected.
    pub fn validate_client_change(
        self,
        to: UserState,
    ) -> Result<StateChangeOutcome, ServiceError> {
        use UserState::*;

        if self.is_gameplay() && to == Idle {
            return Ok(StateChangeOutcome::SilentIgnore);
        }

        let allowed = matches!(
            (self, to),
            (Idle, Ready)
                | (Idle, Spectating)
                | (Ready, Idle)
                | (Ready, Spectating)
                | (WaitingForLoad, Loaded)
                | (Playing, FinishedPlay)
                | (FinishedPlay, Idle)
                | (Results, Idle)
                | (Results, Ready)
                | (Results, Spectating)
                | (Spectating, Idle)
        );

        if allowed {
            Ok(StateChangeOutcome::Apply)
        } else {
            Err(ServiceError::InvalidStateChange { from: self, to })
        }
    }
}

/// Room-level lifecycle state. Transitions are monotonic per match:
/// Open -> WaitingForLoad -> Playing -> Open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum RoomState {
    Open,
    WaitingForLoad,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum MatchType {
    HeadToHead,
    TeamVersus,
    /// Reserved for the platform's non-realtime listings; never valid here.
    Playlists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum QueueMode {
    HostOnly,
    AllPlayers,
    AllPlayersRoundRobin,
}

/// A gameplay modifier selection, identified by its acronym.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Mod {
    pub acronym: String,
}

impl Mod {
    pub fn new(acronym: impl Into<String>) -> Self {
        Self {
            acronym: acronym.into(),
        }
    }
}

/// Client-reported availability of the current beatmap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status")]
pub enum BeatmapAvailability {
    Unknown,
    NotDownloaded,
    Downloading { progress: f32 },
    Importing,
    LocallyAvailable,
}

/// Host-controlled room settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoomSettings {
    pub name: String,
    pub password: Option<String>,
    pub match_type: MatchType,
    pub queue_mode: QueueMode,
    /// Auto-start countdown length in seconds; zero disables auto-start.
    pub auto_start_seconds: u64,
}

impl RoomSettings {
    pub fn auto_start_enabled(&self) -> bool {
        self.auto_start_seconds > 0
    }

    pub fn auto_start_duration(&self) -> Duration {
        Duration::from_secs(self.auto_start_seconds)
    }

    pub fn requires_password(&self) -> bool {
        self.password.as_deref().is_some_and(|pw| !pw.is_empty())
    }
}

/// Match-type specific per-user state, embedded in the room user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind")]
pub enum MatchUserState {
    TeamVersus { team_id: u32 },
}

/// One participant of a live room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomUser {
    pub user_id: i64,
    pub state: UserState,
    pub mods: Vec<Mod>,
    pub availability: BeatmapAvailability,
    pub match_state: Option<MatchUserState>,
}

impl RoomUser {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            state: UserState::Idle,
            mods: Vec::new(),
            availability: BeatmapAvailability::Unknown,
            match_state: None,
        }
    }
}

/// In-memory aggregate for one live multiplayer room.
///
/// Every mutation happens under the room's entity lock; the aggregate itself
/// carries no synchronization.
pub struct ServerRoom {
    pub room_id: i64,
    pub settings: RoomSettings,
    /// Participants ordered by join time; host transfer picks the first.
    pub users: Vec<RoomUser>,
    pub host_user_id: Option<i64>,
    pub state: RoomState,
    pub queue: PlaylistQueue,
    pub countdown: Option<ActiveCountdown>,
    pub match_logic: MatchTypeLogic,
}

impl ServerRoom {
    pub fn new(room_id: i64, settings: RoomSettings, queue: PlaylistQueue) -> Self {
        let match_logic = MatchTypeLogic::for_match_type(settings.match_type);
        Self {
            room_id,
            settings,
            users: Vec::new(),
            host_user_id: None,
            state: RoomState::Open,
            queue,
            countdown: None,
            match_logic,
        }
    }

    pub fn user(&self, user_id: i64) -> Option<&RoomUser> {
        self.users.iter().find(|user| user.user_id == user_id)
    }

    pub fn user_mut(&mut self, user_id: i64) -> Option<&mut RoomUser> {
        self.users.iter_mut().find(|user| user.user_id == user_id)
    }

    pub fn has_user(&self, user_id: i64) -> bool {
        self.user(user_id).is_some()
    }

    pub fn is_host(&self, user_id: i64) -> bool {
        self.host_user_id == Some(user_id)
    }

    pub fn any_user_in_state(&self, state: UserState) -> bool {
        self.users.iter().any(|user| user.state == state)
    }

    pub fn user_ids_in_state(&self, state: UserState) -> Vec<i64> {
        self.users
            .iter()
            .filter(|user| user.state == state)
            .map(|user| user.user_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_managed_states_are_client_rejected() {
        for to in [
            UserState::WaitingForLoad,
            UserState::Playing,
            UserState::Results,
        ] {
            let err = UserState::Idle.validate_client_change(to).unwrap_err();
            assert!(matches!(err, ServiceError::InvalidStateChange { .. }));
        }
    }

    #[test]
    fn unready_race_is_silently_dropped() {
        for from in [
            UserState::WaitingForLoad,
            UserState::Loaded,
            UserState::Playing,
        ] {
            assert_eq!(
                from.validate_client_change(UserState::Idle).unwrap(),
                StateChangeOutcome::SilentIgnore
            );
        }
    }

    #[test]
    fn gameplay_progression_is_allowed() {
        assert_eq!(
            UserState::WaitingForLoad
                .validate_client_change(UserState::Loaded)
                .unwrap(),
            StateChangeOutcome::Apply
        );
        assert_eq!(
            UserState::Playing
                .validate_client_change(UserState::FinishedPlay)
                .unwrap(),
            StateChangeOutcome::Apply
        );
    }

    #[test]
    fn spectating_is_not_reachable_mid_gameplay() {
        for from in [
            UserState::WaitingForLoad,
            UserState::Loaded,
            UserState::Playing,
            UserState::FinishedPlay,
        ] {
            assert!(from.validate_client_change(UserState::Spectating).is_err());
        }
    }

    #[test]
    fn results_allows_returning_to_lobby_states() {
        for to in [UserState::Idle, UserState::Ready, UserState::Spectating] {
            assert_eq!(
                UserState::Results.validate_client_change(to).unwrap(),
                StateChangeOutcome::Apply
            );
        }
    }

    #[test]
    fn gameplay_group_membership_follows_state() {
        assert!(UserState::Ready.joins_gameplay_group());
        assert!(UserState::Spectating.joins_gameplay_group());
        assert!(UserState::Idle.leaves_gameplay_group());
        assert!(UserState::FinishedPlay.leaves_gameplay_group());
    }
}
