use std::time::SystemTime;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    options::IndexOptions,
};
use tracing::info;

use super::{
    config::{MongoConfig, establish_connection},
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        ANSWER_COLLECTION_NAME, MEMBER_COLLECTION_NAME, MongoAnswerDocument, MongoMemberDocument,
        MongoRoomDocument, ROOM_COLLECTION_NAME,
    },
};
use crate::{
    dao::{
        models::{AnswerEntity, MemberEntity, ParticipantId, RoomCode, RoomEntity},
        room_store::RoomStore,
        storage::{StorageError, StorageResult},
    },
    state::state_machine::RoomPhase,
};

const ROOM: &str = "room";
const MEMBER: &str = "member";

#[derive(Clone)]
pub struct MongoRoomStore {
    database: Database,
}

fn room_filter(code: &str) -> Document {
    doc! { "_id": code }
}

fn member_filter(code: &str, participant_id: ParticipantId) -> Document {
    doc! { "room_id": code, "participant_id": participant_id.to_string() }
}

fn phase_name(phase: RoomPhase) -> &'static str {
    match phase {
        RoomPhase::Lobby => "lobby",
        RoomPhase::Answering => "answering",
        RoomPhase::Voting => "voting",
        RoomPhase::Finished => "finished",
    }
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) = establish_connection(&config).await?;
        let store = Self { database };
        store.ensure_indexes().await?;
        info!(database = %config.database_name, "connected to MongoDB room store");
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let unique_pair = IndexModel::builder()
            .keys(doc! { "room_id": 1, "participant_id": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("room_participant_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        for collection in [MEMBER_COLLECTION_NAME, ANSWER_COLLECTION_NAME] {
            self.database
                .collection::<Document>(collection)
                .create_index(unique_pair.clone())
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index: "room_id,participant_id",
                    source,
                })?;
        }

        let deadlines = IndexModel::builder()
            .keys(doc! { "phase": 1, "answers_deadline": 1, "voting_deadline": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("room_deadline_idx".to_owned()))
                    .build(),
            )
            .build();
        self.rooms()
            .create_index(deadlines)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ROOM_COLLECTION_NAME,
                index: "phase,deadlines",
                source,
            })?;

        Ok(())
    }

    fn rooms(&self) -> Collection<MongoRoomDocument> {
        self.database.collection(ROOM_COLLECTION_NAME)
    }

    fn members(&self) -> Collection<MongoMemberDocument> {
        self.database.collection(MEMBER_COLLECTION_NAME)
    }

    fn answers(&self) -> Collection<MongoAnswerDocument> {
        self.database.collection(ANSWER_COLLECTION_NAME)
    }

    async fn create_room(&self, room: RoomEntity) -> StorageResult<()> {
        let code = room.code.clone();
        let document: MongoRoomDocument = room.into();
        match self.rooms().insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StorageError::duplicate(ROOM, code)),
            Err(err) => Err(MongoDaoError::operation("insert room", ROOM_COLLECTION_NAME)(err).into()),
        }
    }

    async fn get_room(&self, code: &str) -> StorageResult<RoomEntity> {
        self.rooms()
            .find_one(room_filter(code))
            .await
            .map_err(MongoDaoError::operation("load room", ROOM_COLLECTION_NAME))?
            .map(Into::into)
            .ok_or_else(|| StorageError::not_found(ROOM, code))
    }

    async fn ensure_room(&self, code: &str) -> StorageResult<()> {
        let count = self
            .rooms()
            .count_documents(room_filter(code))
            .await
            .map_err(MongoDaoError::operation("count rooms", ROOM_COLLECTION_NAME))?;
        if count == 0 {
            return Err(StorageError::not_found(ROOM, code));
        }
        Ok(())
    }

    async fn save_room(&self, room: RoomEntity) -> StorageResult<()> {
        let code = room.code.clone();
        let document: MongoRoomDocument = room.into();
        let result = self
            .rooms()
            .replace_one(room_filter(&code), &document)
            .await
            .map_err(MongoDaoError::operation("save room", ROOM_COLLECTION_NAME))?;
        if result.matched_count == 0 {
            return Err(StorageError::not_found(ROOM, code));
        }
        Ok(())
    }

    async fn delete_room(&self, code: &str) -> StorageResult<()> {
        let result = self
            .rooms()
            .delete_one(room_filter(code))
            .await
            .map_err(MongoDaoError::operation("delete room", ROOM_COLLECTION_NAME))?;
        if result.deleted_count == 0 {
            return Err(StorageError::not_found(ROOM, code));
        }

        self.members()
            .delete_many(doc! { "room_id": code })
            .await
            .map_err(MongoDaoError::operation("delete members", MEMBER_COLLECTION_NAME))?;
        self.answers()
            .delete_many(doc! { "room_id": code })
            .await
            .map_err(MongoDaoError::operation("delete answers", ANSWER_COLLECTION_NAME))?;
        Ok(())
    }

    async fn list_members(&self, code: &str) -> StorageResult<Vec<MemberEntity>> {
        self.ensure_room(code).await?;
        let documents: Vec<MongoMemberDocument> = self
            .members()
            .find(doc! { "room_id": code })
            .sort(doc! { "joined_at": 1, "_id": 1 })
            .await
            .map_err(MongoDaoError::operation("list members", MEMBER_COLLECTION_NAME))?
            .try_collect()
            .await
            .map_err(MongoDaoError::operation("list members", MEMBER_COLLECTION_NAME))?;

        documents
            .into_iter()
            .map(|document| MemberEntity::try_from(document).map_err(Into::into))
            .collect()
    }

    async fn find_member(
        &self,
        code: &str,
        participant_id: ParticipantId,
    ) -> StorageResult<MemberEntity> {
        let document = self
            .members()
            .find_one(member_filter(code, participant_id))
            .await
            .map_err(MongoDaoError::operation("load member", MEMBER_COLLECTION_NAME))?
            .ok_or_else(|| StorageError::not_found(MEMBER, format!("{code}/{participant_id}")))?;
        Ok(MemberEntity::try_from(document)?)
    }

    async fn rooms_of_participant(&self, participant_id: ParticipantId) -> StorageResult<Vec<RoomCode>> {
        let codes = self
            .members()
            .distinct("room_id", doc! { "participant_id": participant_id.to_string() })
            .await
            .map_err(MongoDaoError::operation("list rooms of participant", MEMBER_COLLECTION_NAME))?;
        Ok(codes
            .into_iter()
            .filter_map(|value| value.as_str().map(str::to_owned))
            .collect())
    }

    async fn add_member(&self, member: MemberEntity) -> StorageResult<()> {
        self.ensure_room(&member.room_code).await?;
        let key = format!("{}/{}", member.room_code, member.participant_id);
        let document: MongoMemberDocument = member.into();
        match self.members().insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StorageError::duplicate(MEMBER, key)),
            Err(err) => {
                Err(MongoDaoError::operation("insert member", MEMBER_COLLECTION_NAME)(err).into())
            }
        }
    }

    async fn save_member(&self, member: MemberEntity) -> StorageResult<()> {
        let filter = member_filter(&member.room_code, member.participant_id);
        let key = format!("{}/{}", member.room_code, member.participant_id);
        let document: MongoMemberDocument = member.into();
        let result = self
            .members()
            .replace_one(filter, &document)
            .await
            .map_err(MongoDaoError::operation("save member", MEMBER_COLLECTION_NAME))?;
        if result.matched_count == 0 {
            return Err(StorageError::not_found(MEMBER, key));
        }
        Ok(())
    }

    async fn remove_member(&self, code: &str, participant_id: ParticipantId) -> StorageResult<()> {
        let filter = member_filter(code, participant_id);
        let result = self
            .members()
            .delete_one(filter.clone())
            .await
            .map_err(MongoDaoError::operation("delete member", MEMBER_COLLECTION_NAME))?;
        if result.deleted_count == 0 {
            return Err(StorageError::not_found(MEMBER, format!("{code}/{participant_id}")));
        }

        self.answers()
            .delete_one(filter)
            .await
            .map_err(MongoDaoError::operation("delete answer", ANSWER_COLLECTION_NAME))?;
        Ok(())
    }

    async fn begin_round(&self, code: &str, odd_ones: Vec<ParticipantId>) -> StorageResult<()> {
        self.ensure_room(code).await?;
        self.answers()
            .delete_many(doc! { "room_id": code })
            .await
            .map_err(MongoDaoError::operation("clear answers", ANSWER_COLLECTION_NAME))?;
        self.members()
            .update_many(
                doc! { "room_id": code },
                doc! { "$set": { "is_odd_one": false, "vote": null } },
            )
            .await
            .map_err(MongoDaoError::operation("reset members", MEMBER_COLLECTION_NAME))?;

        let odd_ones: Vec<String> = odd_ones.iter().map(ToString::to_string).collect();
        self.members()
            .update_many(
                doc! { "room_id": code, "participant_id": { "$in": odd_ones } },
                doc! { "$set": { "is_odd_one": true } },
            )
            .await
            .map_err(MongoDaoError::operation("flag odd ones", MEMBER_COLLECTION_NAME))?;
        Ok(())
    }

    async fn add_answer(&self, answer: AnswerEntity) -> StorageResult<()> {
        let filter = member_filter(&answer.room_code, answer.participant_id);
        let is_member = self
            .members()
            .count_documents(filter.clone())
            .await
            .map_err(MongoDaoError::operation("count members", MEMBER_COLLECTION_NAME))?;
        if is_member == 0 {
            return Err(StorageError::not_found(
                MEMBER,
                format!("{}/{}", answer.room_code, answer.participant_id),
            ));
        }

        let document: MongoAnswerDocument = answer.into();
        self.answers()
            .replace_one(filter, &document)
            .upsert(true)
            .await
            .map_err(MongoDaoError::operation("save answer", ANSWER_COLLECTION_NAME))?;
        Ok(())
    }

    async fn list_answers(&self, code: &str) -> StorageResult<Vec<AnswerEntity>> {
        self.ensure_room(code).await?;
        let documents: Vec<MongoAnswerDocument> = self
            .answers()
            .find(doc! { "room_id": code })
            .await
            .map_err(MongoDaoError::operation("list answers", ANSWER_COLLECTION_NAME))?
            .try_collect()
            .await
            .map_err(MongoDaoError::operation("list answers", ANSWER_COLLECTION_NAME))?;

        documents
            .into_iter()
            .map(|document| AnswerEntity::try_from(document).map_err(Into::into))
            .collect()
    }

    async fn record_vote(
        &self,
        code: &str,
        voter: ParticipantId,
        target: ParticipantId,
    ) -> StorageResult<()> {
        let result = self
            .members()
            .update_one(
                member_filter(code, voter),
                doc! { "$set": { "vote": target.to_string() } },
            )
            .await
            .map_err(MongoDaoError::operation("record vote", MEMBER_COLLECTION_NAME))?;
        if result.matched_count == 0 {
            return Err(StorageError::not_found(MEMBER, format!("{code}/{voter}")));
        }
        Ok(())
    }

    async fn rooms_past(
        &self,
        phase: RoomPhase,
        deadline_field: &str,
        now: SystemTime,
    ) -> StorageResult<Vec<RoomCode>> {
        let documents: Vec<MongoRoomDocument> = self
            .rooms()
            .find(doc! {
                "phase": phase_name(phase),
                deadline_field: { "$lte": DateTime::from_system_time(now) },
            })
            .await
            .map_err(MongoDaoError::operation("scan deadlines", ROOM_COLLECTION_NAME))?
            .try_collect()
            .await
            .map_err(MongoDaoError::operation("scan deadlines", ROOM_COLLECTION_NAME))?;

        Ok(documents
            .iter()
            .map(|document| document.code().to_owned())
            .collect())
    }

    async fn ping(&self) -> MongoResult<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }
}

impl RoomStore for MongoRoomStore {
    fn create_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_room(room).await })
    }

    fn get_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        Box::pin(async move { store.get_room(&code).await })
    }

    fn save_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_room(room).await })
    }

    fn delete_room(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.delete_room(&code).await })
    }

    fn list_members(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<Vec<MemberEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_members(&code).await })
    }

    fn find_member(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<MemberEntity>> {
        let store = self.clone();
        Box::pin(async move { store.find_member(&code, participant_id).await })
    }

    fn rooms_of_participant(
        &self,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomCode>>> {
        let store = self.clone();
        Box::pin(async move { store.rooms_of_participant(participant_id).await })
    }

    fn add_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.add_member(member).await })
    }

    fn save_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_member(member).await })
    }

    fn remove_member(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.remove_member(&code, participant_id).await })
    }

    fn begin_round(
        &self,
        code: RoomCode,
        odd_ones: Vec<ParticipantId>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.begin_round(&code, odd_ones).await })
    }

    fn add_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.add_answer(answer).await })
    }

    fn list_answers(&self, code: RoomCode) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_answers(&code).await })
    }

    fn record_vote(
        &self,
        code: RoomCode,
        voter: ParticipantId,
        target: ParticipantId,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.record_vote(&code, voter, target).await })
    }

    fn find_rooms_past_answer_deadline(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomCode>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rooms_past(RoomPhase::Answering, "answers_deadline", now)
                .await
        })
    }

    fn find_rooms_past_voting_deadline(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<RoomCode>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rooms_past(RoomPhase::Voting, "voting_deadline", now)
                .await
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }
}
