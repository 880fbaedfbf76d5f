use crate::dao::models::PlaylistItemEntity;
use crate::error::ServiceError;
use crate::state::room::{Mod, QueueMode};

/// Runtime representation of one queued beatmap.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistItem {
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

impl PlaylistItem {
    pub fn to_entity(&self, room_id: i64) -> PlaylistItemEntity {
        PlaylistItemEntity {
            id: self.id,
            room_id,
            owner_id: self.owner_id,
            beatmap_id: self.beatmap_id,
            beatmap_checksum: self.beatmap_checksum.clone(),
            ruleset_id: self.ruleset_id,
            required_mods: self.required_mods.clone(),
            allowed_mods: self.allowed_mods.clone(),
            playlist_order: self.playlist_order,
            expired: self.expired,
        }
    }
}

impl From<PlaylistItemEntity> for PlaylistItem {
    fn from(value: PlaylistItemEntity) -> Self {
        Self {
            id: value.id,
            owner_id: value.owner_id,
            beatmap_id: value.beatmap_id,
            beatmap_checksum: value.beatmap_checksum,
            ruleset_id: value.ruleset_id,
            required_mods: value.required_mods,
            allowed_mods: value.allowed_mods,
            playlist_order: value.playlist_order,
            expired: value.expired,
        }
    }
}

/// How a validated add request should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddDisposition {
    /// Append a fresh item to the tail of the queue.
    Append,
    /// Host-only mode keeps a single pending item that is re-edited in place.
    ReplaceCurrent(i64),
}

/// Ordered playlist for one room.
///
/// The current item is the first non-expired item by (order, id); when every
/// item is expired the room has no current item and Ready transitions fail.
#[derive(Debug, Clone)]
pub struct PlaylistQueue {
    items: Vec<PlaylistItem>,
    per_user_limit: usize,
}

impl PlaylistQueue {
    pub fn new(per_user_limit: usize) -> Self {
        Self {
            items: Vec::new(),
            per_user_limit,
        }
    }

    pub fn from_entities(entities: Vec<PlaylistItemEntity>, per_user_limit: usize) -> Self {
        let mut items: Vec<PlaylistItem> = entities.into_iter().map(Into::into).collect();
        items.sort_by_key(|item| (item.playlist_order, item.id));
        Self {
            items,
            per_user_limit,
        }
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    pub fn item(&self, item_id: i64) -> Option<&PlaylistItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn current_item(&self) -> Option<&PlaylistItem> {
        self.items
            .iter()
            .filter(|item| !item.expired)
            .min_by_key(|item| (item.playlist_order, item.id))
    }

    pub fn current_item_id(&self) -> Option<i64> {
        self.current_item().map(|item| item.id)
    }

    fn non_expired_count(&self) -> usize {
        self.items.iter().filter(|item| !item.expired).count()
    }

    fn user_item_count(&self, user_id: i64) -> usize {
        self.items
            .iter()
            .filter(|item| !item.expired && item.owner_id == user_id)
            .count()
    }

    /// Next order value for an appended item.
    pub fn next_order(&self) -> u32 {
        self.items
            .iter()
            .map(|item| item.playlist_order + 1)
            .max()
            .unwrap_or(0)
    }

    /// Validate an add under the active queue mode.
    pub fn check_add_allowed(
        &self,
        mode: QueueMode,
        user_id: i64,
        is_host: bool,
    ) -> Result<AddDisposition, ServiceError> {
        match mode {
            QueueMode::HostOnly => {
                if !is_host {
                    return Err(ServiceError::NotHost);
                }
                match self.current_item_id() {
                    Some(current) => Ok(AddDisposition::ReplaceCurrent(current)),
                    None => Ok(AddDisposition::Append),
                }
            }
            QueueMode::AllPlayers | QueueMode::AllPlayersRoundRobin => {
                if self.user_item_count(user_id) >= self.per_user_limit {
                    return Err(ServiceError::InvalidInput(format!(
                        "queue limit of {} items per user reached",
                        self.per_user_limit
                    )));
                }
                Ok(AddDisposition::Append)
            }
        }
    }

    /// Validate an edit under the active queue mode.
    pub fn check_edit_allowed(
        &self,
        mode: QueueMode,
        user_id: i64,
        is_host: bool,
        item_id: i64,
    ) -> Result<(), ServiceError> {
        let item = self
            .item(item_id)
            .ok_or_else(|| ServiceError::NotFound(format!("playlist item `{item_id}`")))?;
        if item.expired {
            return Err(ServiceError::InvalidState(
                "cannot edit an item that has already been played".into(),
            ));
        }
        match mode {
            QueueMode::HostOnly if !is_host => Err(ServiceError::NotHost),
            QueueMode::AllPlayers | QueueMode::AllPlayersRoundRobin
                if item.owner_id != user_id =>
            {
                Err(ServiceError::InvalidState(
                    "only the item owner may edit it".into(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Validate a remove under the active queue mode.
    pub fn check_remove_allowed(
        &self,
        mode: QueueMode,
        user_id: i64,
        is_host: bool,
        item_id: i64,
    ) -> Result<(), ServiceError> {
        self.check_edit_allowed(mode, user_id, is_host, item_id)?;
        if self.non_expired_count() == 1 && self.current_item_id() == Some(item_id) {
            return Err(ServiceError::InvalidState(
                "the only remaining queue item cannot be removed".into(),
            ));
        }
        Ok(())
    }

    /// Insert a new item or replace an existing one with the same id.
    pub fn upsert(&mut self, item: PlaylistItem) {
        match self.items.iter().position(|existing| existing.id == item.id) {
            Some(index) => self.items[index] = item,
            None => self.items.push(item),
        }
    }

    pub fn remove(&mut self, item_id: i64) -> Option<PlaylistItem> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        Some(self.items.remove(index))
    }

    /// Mark an item expired, returning whether it was present and live.
    pub fn expire(&mut self, item_id: i64) -> bool {
        match self.items.iter_mut().find(|item| item.id == item_id) {
            Some(item) if !item.expired => {
                item.expired = true;
                true
            }
            _ => false,
        }
    }

    /// Recompute ordering for the active queue mode, returning clones of every
    /// item whose order changed (for persistence and change broadcasts).
    ///
    /// Round-robin interleaves per-owner sublists: each owner's first pending
    /// item plays before anyone's second.
    pub fn reorder(&mut self, mode: QueueMode) -> Vec<PlaylistItem> {
        let mut live: Vec<usize> = (0..self.items.len())
            .filter(|index| !self.items[*index].expired)
            .collect();

        match mode {
            QueueMode::HostOnly | QueueMode::AllPlayers => {
                live.sort_by_key(|index| {
                    let item = &self.items[*index];
                    (item.playlist_order, item.id)
                });
            }
            QueueMode::AllPlayersRoundRobin => {
                let owner_sequence: Vec<(usize, i64)> = live
                    .iter()
                    .map(|index| {
                        let item = &self.items[*index];
                        let position = self
                            .items
                            .iter()
                            .filter(|other| {
                                !other.expired
                                    && other.owner_id == item.owner_id
                                    && other.id < item.id
                            })
                            .count();
                        (position, item.id)
                    })
                    .collect();
                let mut keyed: Vec<(usize, (usize, i64))> =
                    live.into_iter().zip(owner_sequence).collect();
                keyed.sort_by_key(|(_, key)| *key);
                live = keyed.into_iter().map(|(index, _)| index).collect();
            }
        }

        let mut changed = Vec::new();
        for (order, index) in live.into_iter().enumerate() {
            let item = &mut self.items[index];
            if item.playlist_order != order as u32 {
                item.playlist_order = order as u32;
                changed.push(item.clone());
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, owner_id: i64, order: u32) -> PlaylistItem {
        PlaylistItem {
            id,
            owner_id,
            beatmap_id: 100 + id,
            beatmap_checksum: format!("checksum-{id}"),
            ruleset_id: 0,
            required_mods: Vec::new(),
            allowed_mods: Vec::new(),
            playlist_order: order,
            expired: false,
        }
    }

    fn queue_with(items: Vec<PlaylistItem>) -> PlaylistQueue {
        let mut queue = PlaylistQueue::new(3);
        for item in items {
            queue.upsert(item);
        }
        queue
    }

    #[test]
    fn current_item_is_first_live_by_order() {
        let mut first = item(1, 10, 0);
        first.expired = true;
        let queue = queue_with(vec![first, item(2, 10, 1), item(3, 11, 2)]);
        assert_eq!(queue.current_item_id(), Some(2));
    }

    #[test]
    fn all_items_expired_means_no_current() {
        let mut only = item(1, 10, 0);
        only.expired = true;
        let queue = queue_with(vec![only]);
        assert_eq!(queue.current_item_id(), None);
    }

    #[test]
    fn host_only_add_replaces_the_pending_item() {
        let queue = queue_with(vec![item(1, 10, 0)]);
        assert_eq!(
            queue
                .check_add_allowed(QueueMode::HostOnly, 10, true)
                .unwrap(),
            AddDisposition::ReplaceCurrent(1)
        );
        assert!(matches!(
            queue
                .check_add_allowed(QueueMode::HostOnly, 11, false)
                .unwrap_err(),
            ServiceError::NotHost
        ));
    }

    #[test]
    fn shared_modes_enforce_per_user_limit() {
        let queue = queue_with(vec![item(1, 10, 0), item(2, 10, 1), item(3, 10, 2)]);
        assert!(matches!(
            queue
                .check_add_allowed(QueueMode::AllPlayers, 10, false)
                .unwrap_err(),
            ServiceError::InvalidInput(_)
        ));
        assert_eq!(
            queue
                .check_add_allowed(QueueMode::AllPlayers, 11, false)
                .unwrap(),
            AddDisposition::Append
        );
    }

    #[test]
    fn only_owner_may_edit_in_shared_modes() {
        let queue = queue_with(vec![item(1, 10, 0), item(2, 11, 1)]);
        assert!(
            queue
                .check_edit_allowed(QueueMode::AllPlayers, 10, false, 1)
                .is_ok()
        );
        assert!(
            queue
                .check_edit_allowed(QueueMode::AllPlayers, 10, true, 2)
                .is_err()
        );
    }

    #[test]
    fn expired_items_cannot_be_edited_or_removed() {
        let mut played = item(1, 10, 0);
        played.expired = true;
        let queue = queue_with(vec![played, item(2, 10, 1)]);
        assert!(
            queue
                .check_edit_allowed(QueueMode::AllPlayers, 10, false, 1)
                .is_err()
        );
        assert!(
            queue
                .check_remove_allowed(QueueMode::AllPlayers, 10, false, 1)
                .is_err()
        );
    }

    #[test]
    fn sole_live_item_cannot_be_removed() {
        let queue = queue_with(vec![item(1, 10, 0)]);
        assert!(matches!(
            queue
                .check_remove_allowed(QueueMode::AllPlayers, 10, false, 1)
                .unwrap_err(),
            ServiceError::InvalidState(_)
        ));
    }

    #[test]
    fn current_item_may_be_removed_when_a_successor_exists() {
        let queue = queue_with(vec![item(1, 10, 0), item(2, 10, 1)]);
        assert!(
            queue
                .check_remove_allowed(QueueMode::AllPlayers, 10, false, 1)
                .is_ok()
        );
    }

    #[test]
    fn round_robin_interleaves_owner_sublists() {
        let mut queue = queue_with(vec![
            item(1, 10, 0),
            item(2, 10, 1),
            item(3, 10, 2),
            item(4, 11, 3),
            item(5, 11, 4),
        ]);
        queue.reorder(QueueMode::AllPlayersRoundRobin);

        let mut live: Vec<(i64, u32)> = queue
            .items()
            .iter()
            .map(|item| (item.id, item.playlist_order))
            .collect();
        live.sort_by_key(|(_, order)| *order);
        let ids: Vec<i64> = live.into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 4, 2, 5, 3]);
    }

    #[test]
    fn reorder_reports_only_changed_items() {
        let mut queue = queue_with(vec![item(1, 10, 0), item(2, 11, 1)]);
        assert!(queue.reorder(QueueMode::AllPlayers).is_empty());

        queue.expire(1);
        let changed = queue.reorder(QueueMode::AllPlayers);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, 2);
        assert_eq!(changed[0].playlist_order, 0);
    }
}
