//! Process-local room store backed by a [`DashMap`] of room aggregates.

use std::{sync::Arc, time::SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use indexmap::IndexMap;

use super::RoomStore;
use crate::{
    dao::{
        models::{AnswerEntity, MemberEntity, ParticipantId, RoomCode, RoomEntity},
        storage::{StorageError, StorageResult},
    },
    state::state_machine::RoomPhase,
};

const ROOM: &str = "room";
const MEMBER: &str = "member";

/// Every write to a room goes through the shard lock of its entry, which serializes
/// writes per room the way a relational store serializes per-row writes.
#[derive(Clone, Default)]
pub struct InMemoryRoomStore {
    rooms: Arc<DashMap<RoomCode, RoomRecord>>,
}

struct RoomRecord {
    room: RoomEntity,
    members: IndexMap<ParticipantId, MemberEntity>,
    answers: IndexMap<ParticipantId, AnswerEntity>,
}

impl InMemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(
        &self,
        code: &str,
        f: impl FnOnce(&mut RoomRecord) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut record = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| StorageError::not_found(ROOM, code))?;
        f(&mut record)
    }

    fn rooms_past(
        &self,
        phase: RoomPhase,
        deadline: impl Fn(&RoomEntity) -> Option<SystemTime>,
        now: SystemTime,
    ) -> Vec<RoomCode> {
        self.rooms
            .iter()
            .filter(|entry| {
                let room = &entry.value().room;
                room.phase == phase && deadline(room).is_some_and(|at| at <= now)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }
}

fn member_key(code: &str, participant_id: ParticipantId) -> String {
    format!("{code}/{participant_id}")
}

impl RoomStore for InMemoryRoomStore {
    fn create_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            match store.rooms.entry(room.code.clone()) {
                Entry::Occupied(_) => Err(StorageError::duplicate(ROOM, &room.code)),
                Entry::Vacant(slot) => {
                    slot.insert(RoomRecord {
                        room,
                        members: IndexMap::new(),
                        answers: IndexMap::new(),
                    });
                    Ok(())
                }
            }
        })
    }

    fn get_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rooms
                .get(&code)
                .map(|record| record.room.clone())
                .ok_or_else(|| StorageError::not_found(ROOM, &code))
        })
    }

    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let code = room.code.clone();
            store.with_record(&code, |record| {
                record.room = room;
                Ok(())
            })
        })
    }

    fn delete_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rooms
                .remove(&code)
                .map(|_| ())
                .ok_or_else(|| StorageError::not_found(ROOM, &code))
        })
    }

    fn list_members(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<Vec<MemberEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_record(&code, |record| Ok(record.members.values().cloned().collect()))
        })
    }

    fn find_member(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<MemberEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_record(&code, |record| {
                record
                    .members
                    .get(&participant_id)
                    .cloned()
                    .ok_or_else(|| StorageError::not_found(MEMBER, member_key(&code, participant_id)))
            })
        })
    }

    fn rooms_of_participant(
        &self,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomCode>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .rooms
                .iter()
                .filter(|entry| entry.value().members.contains_key(&participant_id))
                .map(|entry| entry.key().clone())
                .collect())
        })
    }

    fn add_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let code = member.room_code.clone();
            store.with_record(&code, |record| {
                if record.members.contains_key(&member.participant_id) {
                    return Err(StorageError::duplicate(
                        MEMBER,
                        member_key(&code, member.participant_id),
                    ));
                }
                record.members.insert(member.participant_id, member);
                Ok(())
            })
        })
    }

    fn save_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let code = member.room_code.clone();
            store.with_record(&code, |record| match record.members.get_mut(&member.participant_id) {
                Some(slot) => {
                    *slot = member;
                    Ok(())
                }
                None => Err(StorageError::not_found(
                    MEMBER,
                    member_key(&code, member.participant_id),
                )),
            })
        })
    }

    fn remove_member(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_record(&code, |record| {
                record
                    .members
                    .shift_remove(&participant_id)
                    .ok_or_else(|| StorageError::not_found(MEMBER, member_key(&code, participant_id)))?;
                record.answers.shift_remove(&participant_id);
                Ok(())
            })
        })
    }

    fn begin_round(
        &self,
        code: RoomCode,
        odd_ones: Vec<ParticipantId>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_record(&code, |record| {
                record.answers.clear();
                for (id, member) in record.members.iter_mut() {
                    member.vote = None;
                    member.is_odd_one = odd_ones.contains(id);
                }
                Ok(())
            })
        })
    }

    fn add_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let code = answer.room_code.clone();
            store.with_record(&code, |record| {
                if !record.members.contains_key(&answer.participant_id) {
                    return Err(StorageError::not_found(
                        MEMBER,
                        member_key(&code, answer.participant_id),
                    ));
                }
                record.answers.insert(answer.participant_id, answer);
                Ok(())
            })
        })
    }

    fn list_answers(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_record(&code, |record| Ok(record.answers.values().cloned().collect()))
        })
    }

    fn record_vote(
        &self,
        code: RoomCode,
        voter: ParticipantId,
        target: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.with_record(&code, |record| {
                let member = record
                    .members
                    .get_mut(&voter)
                    .ok_or_else(|| StorageError::not_found(MEMBER, member_key(&code, voter)))?;
                member.vote = Some(target);
                Ok(())
            })
        })
    }

    fn find_rooms_past_answer_deadline(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomCode>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.rooms_past(RoomPhase::Answering, |room| room.answers_deadline, now))
        })
    }

    fn find_rooms_past_voting_deadline(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomCode>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store.rooms_past(RoomPhase::Voting, |room| room.voting_deadline, now))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    fn room(code: &str) -> RoomEntity {
        RoomEntity::new(code.into(), "Animals".into(), SystemTime::now())
    }

    fn member(code: &str, id: ParticipantId, host: bool) -> MemberEntity {
        MemberEntity::new(code.into(), id, "player".into(), host, SystemTime::now())
    }

    #[tokio::test]
    async fn create_room_rejects_duplicate_codes() {
        let store = InMemoryRoomStore::new();
        store.create_room(room("ABCD")).await.unwrap();

        let err = store.create_room(room("ABCD")).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn missing_room_is_reported_as_not_found() {
        let store = InMemoryRoomStore::new();
        let err = store.get_room("ZZZZ".into()).await.unwrap_err();
        assert!(err.is_not_found());

        let err = store.list_members("ZZZZ".into()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn members_are_listed_in_join_order_and_unique() {
        let store = InMemoryRoomStore::new();
        store.create_room(room("ABCD")).await.unwrap();
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        for (index, id) in ids.iter().enumerate() {
            store.add_member(member("ABCD", *id, index == 0)).await.unwrap();
        }

        let err = store.add_member(member("ABCD", ids[1], false)).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { .. }));

        let listed: Vec<_> = store
            .list_members("ABCD".into())
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.participant_id)
            .collect();
        assert_eq!(listed, ids.to_vec());
    }

    #[tokio::test]
    async fn answers_are_replaced_per_participant() {
        let store = InMemoryRoomStore::new();
        store.create_room(room("ABCD")).await.unwrap();
        let id = Uuid::new_v4();
        store.add_member(member("ABCD", id, true)).await.unwrap();

        for content in ["cat", "dog"] {
            store
                .add_answer(AnswerEntity {
                    room_code: "ABCD".into(),
                    participant_id: id,
                    content: content.into(),
                    submitted_at: SystemTime::now(),
                })
                .await
                .unwrap();
        }

        let answers = store.list_answers("ABCD".into()).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].content, "dog");
    }

    #[tokio::test]
    async fn begin_round_resets_flags_votes_and_answers() {
        let store = InMemoryRoomStore::new();
        store.create_room(room("ABCD")).await.unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.add_member(member("ABCD", a, true)).await.unwrap();
        store.add_member(member("ABCD", b, false)).await.unwrap();
        store.begin_round("ABCD".into(), vec![a]).await.unwrap();
        store.record_vote("ABCD".into(), b, a).await.unwrap();

        store.begin_round("ABCD".into(), vec![b]).await.unwrap();

        let members = store.list_members("ABCD".into()).await.unwrap();
        assert!(!members[0].is_odd_one);
        assert!(members[1].is_odd_one);
        assert!(members.iter().all(|m| m.vote.is_none()));
        assert!(store.list_answers("ABCD".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deadline_queries_filter_by_phase_and_time() {
        let store = InMemoryRoomStore::new();
        let now = SystemTime::now();

        let mut due = room("DUE1");
        due.phase = RoomPhase::Answering;
        due.answers_deadline = Some(now - Duration::from_secs(1));
        let mut later = room("LATE");
        later.phase = RoomPhase::Answering;
        later.answers_deadline = Some(now + Duration::from_secs(30));
        let mut voting = room("VOTE");
        voting.phase = RoomPhase::Voting;
        voting.answers_deadline = Some(now - Duration::from_secs(60));
        voting.voting_deadline = Some(now);

        for r in [due, later, voting] {
            store.create_room(r).await.unwrap();
        }

        assert_eq!(
            store.find_rooms_past_answer_deadline(now).await.unwrap(),
            vec!["DUE1".to_string()]
        );
        assert_eq!(
            store.find_rooms_past_voting_deadline(now).await.unwrap(),
            vec!["VOTE".to_string()]
        );
    }

    #[tokio::test]
    async fn removing_a_member_drops_its_answer() {
        let store = InMemoryRoomStore::new();
        store.create_room(room("ABCD")).await.unwrap();
        let id = Uuid::new_v4();
        store.add_member(member("ABCD", id, false)).await.unwrap();
        store
            .add_answer(AnswerEntity {
                room_code: "ABCD".into(),
                participant_id: id,
                content: "owl".into(),
                submitted_at: SystemTime::now(),
            })
            .await
            .unwrap();

        store.remove_member("ABCD".into(), id).await.unwrap();

        assert!(store.list_answers("ABCD".into()).await.unwrap().is_empty());
        assert!(store.rooms_of_participant(id).await.unwrap().is_empty());
        let err = store.remove_member("ABCD".into(), id).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
