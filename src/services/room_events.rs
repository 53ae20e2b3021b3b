use std::time::SystemTime;

use axum::extract::ws::Message;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::{
    dao::models::{ParticipantId, RoomEntity},
    dto::ws::{Envelope, InitPayload, OutboundMessage, VoteResultPayload},
    error::ServiceError,
    state::{ConnectionHandle, SharedState},
};

/// Announce a freshly connected member to everyone else in the room.
pub async fn broadcast_join(
    state: &SharedState,
    code: &str,
    participant: ParticipantId,
    display_name: &str,
) {
    let envelope =
        Envelope::new(code, OutboundMessage::Join(display_name.to_owned())).about(participant);
    state.hub().broadcast(code, &envelope, &[participant]).await;
}

pub async fn broadcast_leave(state: &SharedState, code: &str, participant: ParticipantId) {
    let envelope = Envelope::new(code, OutboundMessage::Leave(participant)).about(participant);
    state.hub().broadcast(code, &envelope, &[]).await;
}

pub async fn broadcast_room_deleted(state: &SharedState, code: &str) {
    let envelope = Envelope::new(code, OutboundMessage::RoomDeleted);
    let delivered = state.hub().broadcast(code, &envelope, &[]).await;
    debug!(room = %code, delivered, "room deletion broadcast");
}

pub async fn broadcast_presence(
    state: &SharedState,
    code: &str,
    participant: ParticipantId,
    online: bool,
) {
    let envelope = Envelope::new(
        code,
        OutboundMessage::Presence {
            participant_id: participant,
            online,
        },
    )
    .about(participant);
    state.hub().broadcast(code, &envelope, &[participant]).await;
}

pub async fn broadcast_update_user(
    state: &SharedState,
    code: &str,
    participant: ParticipantId,
    display_name: &str,
) {
    let envelope = Envelope::new(code, OutboundMessage::UpdateUser(display_name.to_owned()))
        .about(participant);
    state.hub().broadcast(code, &envelope, &[participant]).await;
}

/// Regular question to everyone but the odd-ones, then the alternate one to each odd-one.
pub async fn send_questions(state: &SharedState, room: &RoomEntity, odd_ones: &[ParticipantId]) {
    let Some(answers_deadline) = room.answers_deadline else {
        warn!(room = %room.code, "cannot send questions without an answers deadline");
        return;
    };

    let regular = Envelope::new(
        room.code.as_str(),
        OutboundMessage::Question {
            question: room.regular_question.clone(),
            answers_deadline,
        },
    );
    state.hub().broadcast(&room.code, &regular, odd_ones).await;

    for odd_one in odd_ones {
        let sneaky = Envelope::new(
            room.code.as_str(),
            OutboundMessage::Question {
                question: room.sneaky_question.clone(),
                answers_deadline,
            },
        )
        .about(*odd_one);
        state.hub().send_to(&room.code, *odd_one, &sneaky).await;
    }
}

pub async fn broadcast_answers(
    state: &SharedState,
    code: &str,
    answers: IndexMap<ParticipantId, String>,
    true_question: String,
    voting_deadline: SystemTime,
) {
    let envelope = Envelope::new(
        code,
        OutboundMessage::Answers {
            answers,
            true_question,
            voting_deadline,
        },
    );
    state.hub().broadcast(code, &envelope, &[]).await;
}

pub async fn broadcast_vote_result(state: &SharedState, code: &str, result: VoteResultPayload) {
    let envelope = Envelope::new(code, OutboundMessage::VoteResult(result));
    state.hub().broadcast(code, &envelope, &[]).await;
}

/// Queue the `init` snapshot on one specific connection.
pub fn send_init(
    connection: &ConnectionHandle,
    code: &str,
    participant: ParticipantId,
    payload: InitPayload,
) {
    let envelope =
        Envelope::new(code, OutboundMessage::Init(Box::new(payload))).about(participant);
    send_direct(connection, &envelope);
}

/// Report a failed action to the connection that issued it.
pub fn send_error(
    connection: &ConnectionHandle,
    code: &str,
    participant: ParticipantId,
    err: &ServiceError,
) {
    let envelope = Envelope::new(
        code,
        OutboundMessage::Error {
            kind: err.kind(),
            message: err.client_message(),
        },
    )
    .about(participant);
    send_direct(connection, &envelope);
}

fn send_direct(connection: &ConnectionHandle, envelope: &Envelope) {
    match serde_json::to_string(envelope) {
        Ok(text) => {
            connection.try_deliver(Message::Text(text.into()));
        }
        Err(err) => warn!(error = %err, "failed to serialize outbound message"),
    }
}
