use futures::future::BoxFuture;

use crate::dao::{
    models::{PlaylistItemEntity, RelationEntity, RoomEntity},
    storage::StorageResult,
};
use crate::state::room::RoomSettings;

/// Abstraction over the persistence layer for rooms, playlists, and the
/// user bookkeeping the coordinator depends on.
///
/// Calls are expected to be short; the coordinator holds a room lock across
/// them (see the concurrency notes in `state::entity_store`).
pub trait MatchStore: Send + Sync {
    fn get_room(&self, room_id: i64) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;
    fn mark_room_active(&self, room_id: i64) -> BoxFuture<'static, StorageResult<()>>;
    fn update_room_settings(
        &self,
        room_id: i64,
        settings: RoomSettings,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn update_room_host(
        &self,
        room_id: i64,
        host_user_id: i64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn end_match(&self, room_id: i64) -> BoxFuture<'static, StorageResult<()>>;
    fn add_participant(&self, room_id: i64, user_id: i64)
    -> BoxFuture<'static, StorageResult<()>>;
    fn remove_participant(
        &self,
        room_id: i64,
        user_id: i64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn get_current_playlist_item(
        &self,
        room_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<PlaylistItemEntity>>>;
    fn add_playlist_item(
        &self,
        item: PlaylistItemEntity,
    ) -> BoxFuture<'static, StorageResult<i64>>;
    fn update_playlist_item(
        &self,
        item: PlaylistItemEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn remove_playlist_item(
        &self,
        room_id: i64,
        item_id: i64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn mark_playlist_item_played(
        &self,
        room_id: i64,
        item_id: i64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn get_all_playlist_items(
        &self,
        room_id: i64,
    ) -> BoxFuture<'static, StorageResult<Vec<PlaylistItemEntity>>>;
    fn get_beatmap_checksum(
        &self,
        beatmap_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<String>>>;
    fn is_user_restricted(&self, user_id: i64) -> BoxFuture<'static, StorageResult<bool>>;
    fn get_user_relation(
        &self,
        user_id: i64,
        other_user_id: i64,
    ) -> BoxFuture<'static, StorageResult<Option<RelationEntity>>>;
    fn pm_friends_only(&self, user_id: i64) -> BoxFuture<'static, StorageResult<bool>>;
}
