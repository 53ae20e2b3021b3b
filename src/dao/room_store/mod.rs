pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;

use crate::dao::models::{AnswerEntity, MemberEntity, ParticipantId, RoomCode, RoomEntity};
use crate::dao::storage::StorageResult;

pub use memory::InMemoryRoomStore;

/// Abstraction over the persistence layer for rooms, memberships and answers.
///
/// Lookups addressing a single record report a missing record as
/// [`StorageError::NotFound`](crate::dao::storage::StorageError::NotFound) so callers can
/// tell it apart from backend failures.
pub trait RoomStore: Send + Sync {
    /// Insert a new room, failing with `Duplicate` when the code is taken.
    fn create_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn get_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<RoomEntity>>;
    /// Replace an existing room record.
    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Delete a room together with its members and answers.
    fn delete_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<()>>;

    /// Members of a room in join order.
    fn list_members(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<Vec<MemberEntity>>>;
    fn find_member(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<MemberEntity>>;
    /// Rooms the participant currently belongs to.
    fn rooms_of_participant(
        &self,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomCode>>>;
    /// Insert a membership, failing with `Duplicate` when the participant is already a member.
    fn add_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn save_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove a membership and the answer it submitted.
    fn remove_member(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Reset per-round data: drop answers, clear votes, and flag exactly `odd_ones`.
    fn begin_round(
        &self,
        code: RoomCode,
        odd_ones: Vec<ParticipantId>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Insert or replace the answer keyed by (room, participant).
    fn add_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_answers(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;
    /// Record (or replace) the vote cast by `voter`.
    fn record_vote(
        &self,
        code: RoomCode,
        voter: ParticipantId,
        target: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Rooms still answering whose answers deadline is at or before `now`.
    fn find_rooms_past_answer_deadline(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomCode>>>;
    /// Rooms still voting whose voting deadline is at or before `now`.
    fn find_rooms_past_voting_deadline(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomCode>>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
