use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::SystemTime,
};

use futures::{FutureExt, future::BoxFuture};

use crate::dao::{
    match_store::MatchStore,
    models::{PlaylistItemEntity, RelationEntity, RoomEntity},
    storage::StorageResult,
};
use crate::state::room::RoomSettings;

/// In-memory [`MatchStore`] backend.
///
/// Backs tests and single-node development runs; every call completes
/// synchronously under one process-wide mutex.
#[derive(Default)]
pub struct MemoryMatchStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<i64, RoomEntity>,
    participants: HashMap<i64, HashSet<i64>>,
    playlist: HashMap<i64, Vec<PlaylistItemEntity>>,
    beatmaps: HashMap<i64, String>,
    restricted: HashSet<i64>,
    relations: HashMap<(i64, i64), RelationEntity>,
    pm_friends_only: HashSet<i64>,
    next_item_id: i64,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a room row as the platform would have created it ahead of join.
    pub fn seed_room(&self, room: RoomEntity) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.rooms.insert(room.room_id, room);
    }

    /// Insert an initial playlist item for a seeded room, returning its id.
    pub fn seed_playlist_item(&self, mut item: PlaylistItemEntity) -> i64 {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.next_item_id += 1;
        item.id = inner.next_item_id;
        let id = item.id;
        inner.playlist.entry(item.room_id).or_default().push(item);
        id
    }

    /// Register a beatmap checksum for add/edit validation.
    pub fn seed_beatmap(&self, beatmap_id: i64, checksum: impl Into<String>) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.beatmaps.insert(beatmap_id, checksum.into());
    }

    pub fn set_restricted(&self, user_id: i64, restricted: bool) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        if restricted {
            inner.restricted.insert(user_id);
        } else {
            inner.restricted.remove(&user_id);
        }
    }

    /// Record the relation `user_id` holds towards `other_user_id`.
    pub fn seed_relation(&self, user_id: i64, other_user_id: i64, relation: RelationEntity) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.relations.insert((user_id, other_user_id), relation);
    }

    pub fn set_pm_friends_only(&self, user_id: i64, enabled: bool) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        if enabled {
            inner.pm_friends_only.insert(user_id);
        } else {
            inner.pm_friends_only.remove(&user_id);
        }
    }

    /// Test hook: whether the room row has been marked ended.
    pub fn room_has_ended(&self, room_id: i64) -> bool {
        let inner = self.inner.lock().expect("memory store poisoned");
        inner
            .rooms
            .get(&room_id)
            .is_some_and(RoomEntity::has_ended)
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> BoxFuture<'static, T>
    where
        T: Send + 'static,
    {
        let result = {
            let mut inner = self.inner.lock().expect("memory store poisoned");
            f(&mut inner)
        };
        futures::future::ready(result).boxed()
    }
}

impl MatchStore for MemoryMatchStore {
    fn get_room(&self, room_id: i64) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        self.with_inner(move |inner| Ok(inner.rooms.get(&room_id).cloned()))
    }

    fn mark_room_active(&self, room_id: i64) -> BoxFuture<'static, StorageResult<()>> {
        self.with_inner(move |inner| {
            if let Some(room) = inner.rooms.get_mut(&room_id) {
                room.ends_at = None;
            }
            Ok(())
        })
    }

    fn update_room_settings(
        &self,
        room_id: i64,
        settings: RoomSettings,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.with_inner(move |inner| {
            if let Some(room) = inner.rooms.get_mut(&room_id) {
                room.name = settings.name;
                room.password = settings.password;
                room.match_type = settings.match_type;
                room.queue_mode = settings.queue_mode;
                room.auto_start_seconds = settings.auto_start_seconds;
            }
            Ok(())
        })
    }

    fn update_room_host(
        &self,
        room_id: i64,
        host_user_id: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.with_inner(move |inner| {
            if let Some(room) = inner.rooms.get_mut(&room_id) {
                room.host_user_id = host_user_id;
            }
            Ok(())
        })
    }

    fn end_match(&self, room_id: i64) -> BoxFuture<'static, StorageResult<()>> {
        self.with_inner(move |inner| {
            if let Some(room) = inner.rooms.get_mut(&room_id) {
                room.ends_at = Some(SystemTime::now());
            }
            inner.participants.remove(&room_id);
            Ok(())
        })
    }

    fn add_participant(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.with_inner(move |inner| {
            inner.participants.entry(room_id).or_default().insert(user_id);
            Ok(())
        })
    }

    fn remove_participant(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.with_inner(move |inner| {
            if let Some(users) = inner.participants.get_mut(&room_id) {
                users.remove(&user_id);
            }
            Ok(())
        })
    }

    fn get_current_playlist_item(
        &self,
        room_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<PlaylistItemEntity>>> {
        self.with_inner(move |inner| {
            let mut items: Vec<_> = inner
                .playlist
                .get(&room_id)
                .map(|items| items.iter().filter(|item| !item.expired).collect())
                .unwrap_or_default();
            items.sort_by_key(|item| (item.playlist_order, item.id));
            Ok(items.first().map(|item| (*item).clone()))
        })
    }

    fn add_playlist_item(
        &self,
        mut item: PlaylistItemEntity,
    ) -> BoxFuture<'static, StorageResult<i64>> {
        self.with_inner(move |inner| {
            inner.next_item_id += 1;
            item.id = inner.next_item_id;
            let id = item.id;
            inner.playlist.entry(item.room_id).or_default().push(item);
            Ok(id)
        })
    }

    fn update_playlist_item(
        &self,
        item: PlaylistItemEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.with_inner(move |inner| {
            if let Some(items) = inner.playlist.get_mut(&item.room_id) {
                if let Some(slot) = items.iter_mut().find(|existing| existing.id == item.id) {
                    *slot = item;
                }
            }
            Ok(())
        })
    }

    fn remove_playlist_item(
        &self,
        room_id: i64,
        item_id: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.with_inner(move |inner| {
            if let Some(items) = inner.playlist.get_mut(&room_id) {
                items.retain(|item| item.id != item_id);
            }
            Ok(())
        })
    }

    fn mark_playlist_item_played(
        &self,
        room_id: i64,
        item_id: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.with_inner(move |inner| {
            if let Some(items) = inner.playlist.get_mut(&room_id) {
                if let Some(item) = items.iter_mut().find(|item| item.id == item_id) {
                    item.expired = true;
                }
            }
            Ok(())
        })
    }

    fn get_all_playlist_items(
        &self,
        room_id: i64,
    ) -> BoxFuture<'static, StorageResult<Vec<PlaylistItemEntity>>> {
        self.with_inner(move |inner| {
            Ok(inner.playlist.get(&room_id).cloned().unwrap_or_default())
        })
    }

    fn get_beatmap_checksum(
        &self,
        beatmap_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<String>>> {
        self.with_inner(move |inner| Ok(inner.beatmaps.get(&beatmap_id).cloned()))
    }

    fn is_user_restricted(&self, user_id: i64) -> BoxFuture<'static, StorageResult<bool>> {
        self.with_inner(move |inner| Ok(inner.restricted.contains(&user_id)))
    }

    fn get_user_relation(
        &self,
        user_id: i64,
        other_user_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<RelationEntity>>> {
        self.with_inner(move |inner| {
            Ok(inner.relations.get(&(user_id, other_user_id)).copied())
        })
    }

    fn pm_friends_only(&self, user_id: i64) -> BoxFuture<'static, StorageResult<bool>> {
        self.with_inner(move |inner| Ok(inner.pm_friends_only.contains(&user_id)))
    }
}
