use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ServiceError;
use crate::state::room::{MatchType, MatchUserState, RoomUser};

/// Team identifiers used by the team-versus strategy.
const TEAM_IDS: [u32; 2] = [0, 1];

/// A team exposed through the room's match state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MatchTeam {
    pub id: u32,
    pub name: String,
}

/// Match-type specific room-level state, broadcast to clients when it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind")]
pub enum MatchRoomState {
    TeamVersus { teams: Vec<MatchTeam> },
}

/// Pluggable per-room match behavior.
///
/// Head-to-head carries no state and ignores requests; team-versus keeps two
/// fixed teams and balances joins onto the smaller one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchTypeLogic {
    HeadToHead,
    TeamVersus,
}

impl MatchTypeLogic {
    pub fn for_match_type(match_type: MatchType) -> Self {
        match match_type {
            MatchType::TeamVersus => MatchTypeLogic::TeamVersus,
            MatchType::HeadToHead | MatchType::Playlists => MatchTypeLogic::HeadToHead,
        }
    }

    /// Hook invoked when a user joins (or when the strategy is swapped in and
    /// joins are replayed). `present` holds the users already assigned.
    pub fn on_join(&self, present: &[RoomUser], joining: &mut RoomUser) {
        match self {
            MatchTypeLogic::HeadToHead => {
                joining.match_state = None;
            }
            MatchTypeLogic::TeamVersus => {
                joining.match_state = Some(MatchUserState::TeamVersus {
                    team_id: smallest_team(present),
                });
            }
        }
    }

    /// Hook invoked when a user leaves the room.
    pub fn on_leave(&self, leaving: &mut RoomUser) {
        leaving.match_state = None;
    }

    /// Handle a team-change request, returning whether the user's match state
    /// changed. Head-to-head accepts and ignores the request.
    pub fn handle_change_team(
        &self,
        user: &mut RoomUser,
        team_id: u32,
    ) -> Result<bool, ServiceError> {
        match self {
            MatchTypeLogic::HeadToHead => Ok(false),
            MatchTypeLogic::TeamVersus => {
                if !TEAM_IDS.contains(&team_id) {
                    return Err(ServiceError::InvalidInput(format!(
                        "team `{team_id}` does not exist"
                    )));
                }
                let next = Some(MatchUserState::TeamVersus { team_id });
                if user.match_state == next {
                    return Ok(false);
                }
                user.match_state = next;
                Ok(true)
            }
        }
    }

    /// Room-level match state for snapshots and change broadcasts.
    pub fn room_state(&self) -> Option<MatchRoomState> {
        match self {
            MatchTypeLogic::HeadToHead => None,
            MatchTypeLogic::TeamVersus => Some(MatchRoomState::TeamVersus {
                teams: TEAM_IDS
                    .iter()
                    .map(|id| MatchTeam {
                        id: *id,
                        name: format!("Team {}", id + 1),
                    })
                    .collect(),
            }),
        }
    }
}

/// Pick the smaller team, breaking ties towards the lowest id.
fn smallest_team(present: &[RoomUser]) -> u32 {
    let mut counts = [0usize; 2];
    for user in present {
        if let Some(MatchUserState::TeamVersus { team_id }) = user.match_state {
            if let Some(count) = counts.get_mut(team_id as usize) {
                *count += 1;
            }
        }
    }
    if counts[1] < counts[0] { TEAM_IDS[1] } else { TEAM_IDS[0] }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_on_team(user_id: i64, team_id: u32) -> RoomUser {
        let mut user = RoomUser::new(user_id);
        user.match_state = Some(MatchUserState::TeamVersus { team_id });
        user
    }

    #[test]
    fn first_joiner_lands_on_lowest_team() {
        let logic = MatchTypeLogic::TeamVersus;
        let mut joining = RoomUser::new(1);
        logic.on_join(&[], &mut joining);
        assert_eq!(
            joining.match_state,
            Some(MatchUserState::TeamVersus { team_id: 0 })
        );
    }

    #[test]
    fn joins_balance_onto_smaller_team() {
        let logic = MatchTypeLogic::TeamVersus;
        let present = vec![user_on_team(1, 0), user_on_team(2, 0), user_on_team(3, 1)];
        let mut joining = RoomUser::new(4);
        logic.on_join(&present, &mut joining);
        assert_eq!(
            joining.match_state,
            Some(MatchUserState::TeamVersus { team_id: 1 })
        );
    }

    #[test]
    fn tie_breaks_to_lowest_team_id() {
        let logic = MatchTypeLogic::TeamVersus;
        let present = vec![user_on_team(1, 0), user_on_team(2, 1)];
        let mut joining = RoomUser::new(3);
        logic.on_join(&present, &mut joining);
        assert_eq!(
            joining.match_state,
            Some(MatchUserState::TeamVersus { team_id: 0 })
        );
    }

    #[test]
    fn change_team_rejects_unknown_team() {
        let logic = MatchTypeLogic::TeamVersus;
        let mut user = user_on_team(1, 0);
        assert!(logic.handle_change_team(&mut user, 5).is_err());
        assert_eq!(
            user.match_state,
            Some(MatchUserState::TeamVersus { team_id: 0 })
        );
    }

    #[test]
    fn change_team_reports_whether_state_moved() {
        let logic = MatchTypeLogic::TeamVersus;
        let mut user = user_on_team(1, 0);
        assert!(logic.handle_change_team(&mut user, 1).unwrap());
        assert!(!logic.handle_change_team(&mut user, 1).unwrap());
    }

    #[test]
    fn head_to_head_ignores_requests_and_state() {
        let logic = MatchTypeLogic::HeadToHead;
        let mut user = RoomUser::new(1);
        logic.on_join(&[], &mut user);
        assert_eq!(user.match_state, None);
        assert!(!logic.handle_change_team(&mut user, 1).unwrap());
        assert!(logic.room_state().is_none());
    }
}
