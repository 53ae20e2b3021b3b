use std::time::SystemTime;

use axum::extract::ws::{Message, WebSocket};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    dao::models::ParticipantId,
    dto::ws::{ErrorKind, InboundMessage},
    error::ServiceError,
    services::{room_events, room_service, round_service},
    state::{ConnectionHandle, ConnectionReceiver, Session, SharedState},
};

/// Handle the full lifecycle of one member's real-time connection to a room.
pub async fn handle_socket(state: SharedState, socket: WebSocket, code: String, session: Session) {
    let participant = session.participant_id;
    let (sender, receiver) = socket.split();
    let (connection, outbound) = ConnectionHandle::channel(state.config().outbound_buffer);
    let mut shutdown = outbound.shutdown.clone();

    // Dedicated writer task keeps outbound messages flowing while we await inbound frames.
    let writer_task = tokio::spawn(write_loop(sender, outbound));

    if let Err(err) = attach(&state, &code, participant, &connection).await {
        warn!(room = %code, participant = %participant, error = %err, "connection refused");
        let _ = writer_task.await;
        return;
    }
    info!(room = %code, participant = %participant, "member connected");

    read_loop(&state, &code, participant, &connection, receiver, &mut shutdown).await;

    detach(&state, &code, participant, &connection).await;
    let _ = writer_task.await;
    info!(room = %code, participant = %participant, "member disconnected");
}

/// Bind `connection` to `participant` in room `code`, queue its `init` snapshot, then announce
/// the member to the others with `join` and `presence`.
///
/// Membership is checked again under the room gate: the member may have left, or the room may
/// have been deleted, between the upgrade request and now. On failure the error is queued on the
/// connection, which is then closed without ever being registered. A previous connection of the
/// same member is replaced and closed.
pub async fn attach(
    state: &SharedState,
    code: &str,
    participant: ParticipantId,
    connection: &ConnectionHandle,
) -> Result<(), ServiceError> {
    let store = state.store();
    let attached = state
        .run_room_transition_then(
            code,
            || async {
                let room = store.get_room(code.to_owned()).await?;
                let member = store
                    .find_member(code.to_owned(), participant)
                    .await
                    .map_err(|err| room_service::membership_error(code, err))?;
                let members = store.list_members(code.to_owned()).await?;
                let answers = store.list_answers(code.to_owned()).await?;
                Ok((room, member, members, answers))
            },
            |(room, member, members, answers)| async move {
                if let Some(previous) = state
                    .hub()
                    .register(code, participant, connection.clone())
                    .await
                {
                    debug!(room = %code, participant = %participant, "replacing previous connection");
                    previous.close();
                }

                let online = state.hub().online_participants(code).await;
                let payload =
                    round_service::init_snapshot(&room, &members, &answers, &online, participant);
                room_events::send_init(connection, code, participant, payload);
                room_events::broadcast_join(state, code, participant, &member.display_name).await;
                room_events::broadcast_presence(state, code, participant, true).await;
            },
        )
        .await;

    if let Err(err) = &attached {
        room_events::send_error(connection, code, participant, err);
        connection.close();
    }
    attached
}

/// Unbind and close `connection`.
///
/// `presence(false)` is only sent when this was the member's live connection, not one that a
/// reconnect already replaced.
pub async fn detach(
    state: &SharedState,
    code: &str,
    participant: ParticipantId,
    connection: &ConnectionHandle,
) {
    let removed = state.hub().unregister(code, connection.id()).await;
    connection.close();
    if removed && !state.hub().is_online(code, participant).await {
        room_events::broadcast_presence(state, code, participant, false).await;
    }
}

async fn read_loop(
    state: &SharedState,
    code: &str,
    participant: ParticipantId,
    connection: &ConnectionHandle,
    mut receiver: SplitStream<WebSocket>,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => {
                debug!(room = %code, participant = %participant, "connection closed by server");
                break;
            }
            frame = receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                debug!(room = %code, participant = %participant, payload = %text, "received message");
                if let Err(err) = handle_inbound(state, code, participant, text.as_str()).await {
                    match err.kind() {
                        ErrorKind::Internal => {
                            warn!(room = %code, participant = %participant, error = %err, "failed to handle message")
                        }
                        _ => {
                            debug!(room = %code, participant = %participant, error = %err, "rejected message")
                        }
                    }
                    room_events::send_error(connection, code, participant, &err);
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                connection.try_deliver(Message::Pong(payload));
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Binary(_) | Message::Pong(_))) => {}
            Some(Err(err)) => {
                warn!(room = %code, participant = %participant, error = %err, "websocket error");
                break;
            }
        }
    }
}

/// Decode one inbound frame and dispatch it to the round logic.
pub async fn handle_inbound(
    state: &SharedState,
    code: &str,
    participant: ParticipantId,
    text: &str,
) -> Result<(), ServiceError> {
    let message = InboundMessage::from_json_str(text)
        .map_err(|err| ServiceError::InvalidInput(format!("malformed message: {err}")))?;

    match message {
        InboundMessage::Start(duration_secs) => {
            round_service::start_round(state, code, participant, duration_secs, SystemTime::now())
                .await
        }
        InboundMessage::Answer(content) => {
            round_service::submit_answer(state, code, participant, content, SystemTime::now())
                .await
        }
        InboundMessage::Vote(target) => {
            round_service::submit_vote(state, code, participant, target).await
        }
        InboundMessage::Unknown => Err(ServiceError::InvalidInput("unknown message kind".into())),
    }
}

/// Forward queued messages to the socket; on shutdown, flush the queue and send a close frame.
async fn write_loop(mut sender: SplitSink<WebSocket, Message>, mut outbound: ConnectionReceiver) {
    loop {
        tokio::select! {
            biased;
            message = outbound.messages.recv() => match message {
                Some(message) => {
                    if sender.send(message).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = async { outbound.shutdown.wait_for(|closed| *closed).await.is_ok() } => break,
        }
    }

    while let Ok(message) = outbound.messages.try_recv() {
        if sender.send(message).await.is_err() {
            return;
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, SystemTime},
    };

    use rand::{SeedableRng, rngs::StdRng};
    use serde_json::Value;

    use super::*;
    use crate::{
        config::AppConfig,
        content::QuestionCatalog,
        dao::room_store::InMemoryRoomStore,
        services::room_service::{self, LeaveOutcome},
        state::{AppState, state_machine::RoomPhase},
    };

    fn state() -> SharedState {
        AppState::with_rng_source(
            AppConfig::default(),
            QuestionCatalog::default(),
            Arc::new(InMemoryRoomStore::new()),
            StdRng::seed_from_u64(5),
        )
    }

    fn session(state: &SharedState, name: &str) -> Session {
        state.with_rng(|rng| state.sessions().create(name.into(), rng))
    }

    fn t0() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn frames(receiver: &mut ConnectionReceiver) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(message) = receiver.messages.try_recv() {
            if let Message::Text(text) = message {
                frames.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        frames
    }

    async fn room_with_guest(state: &SharedState) -> (String, Session, Session) {
        let host = session(state, "Host");
        let guest = session(state, "Guest");
        let code = room_service::create_room(state, &host, "Animals", t0())
            .await
            .unwrap();
        room_service::join_room(state, &guest, &code, t0())
            .await
            .unwrap();
        (code, host, guest)
    }

    #[tokio::test]
    async fn attach_sends_init_then_announces_the_member() {
        let state = state();
        let (code, host, guest) = room_with_guest(&state).await;

        let (host_conn, mut host_rx) = ConnectionHandle::channel(16);
        attach(&state, &code, host.participant_id, &host_conn)
            .await
            .unwrap();
        frames(&mut host_rx);

        let (guest_conn, mut guest_rx) = ConnectionHandle::channel(16);
        attach(&state, &code, guest.participant_id, &guest_conn)
            .await
            .unwrap();
        assert!(state.hub().is_online(&code, guest.participant_id).await);

        let greeting = frames(&mut guest_rx);
        assert_eq!(greeting.len(), 1, "the new member only gets its snapshot");
        let init = &greeting[0];
        assert_eq!(init["kind"], "init");
        assert_eq!(init["participant_id"], guest.participant_id.to_string());
        let payload = &init["payload"];
        assert_eq!(payload["phase"], "lobby");
        assert_eq!(payload["question"], "");
        assert!(payload.get("answers").is_none());
        assert!(payload.get("true_question").is_none());
        // Registered before the snapshot was taken, so it sees itself online.
        let me = payload["members"]
            .as_array()
            .unwrap()
            .iter()
            .find(|member| member["id"] == guest.participant_id.to_string())
            .unwrap();
        assert_eq!(me["online"], true);

        let announced = frames(&mut host_rx);
        let kinds: Vec<&str> = announced
            .iter()
            .map(|frame| frame["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, ["join", "presence"]);
        assert_eq!(announced[0]["payload"], "Guest");
        assert_eq!(announced[1]["payload"]["online"], true);
    }

    #[tokio::test]
    async fn member_connecting_mid_vote_gets_answers_in_init() {
        let state = state();
        let (code, host, guest) = room_with_guest(&state).await;
        let third = session(&state, "Third");
        room_service::join_room(&state, &third, &code, t0())
            .await
            .unwrap();

        round_service::start_round(&state, &code, host.participant_id, 30, t0())
            .await
            .unwrap();
        round_service::submit_answer(&state, &code, host.participant_id, "owl".into(), t0())
            .await
            .unwrap();
        round_service::submit_answer(&state, &code, guest.participant_id, "bat".into(), t0())
            .await
            .unwrap();
        let outcome = round_service::close_answers(&state, &code, t0() + Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(outcome, round_service::TransitionOutcome::Applied);

        let room = state.store().get_room(code.clone()).await.unwrap();
        assert_eq!(room.phase, RoomPhase::Voting);

        let (late_conn, mut late_rx) = ConnectionHandle::channel(16);
        attach(&state, &code, third.participant_id, &late_conn)
            .await
            .unwrap();

        let greeting = frames(&mut late_rx);
        let init = &greeting[0];
        assert_eq!(init["kind"], "init");
        let payload = &init["payload"];
        assert_eq!(payload["phase"], "voting");
        assert_eq!(payload["true_question"], room.regular_question.as_str());
        let answers = payload["answers"].as_object().unwrap();
        assert_eq!(answers.len(), 3);
        assert_eq!(answers[&host.participant_id.to_string()], "owl");
        assert_eq!(answers[&guest.participant_id.to_string()], "bat");
        assert_eq!(answers[&third.participant_id.to_string()], "");
    }

    #[tokio::test]
    async fn reconnect_closes_the_replaced_connection() {
        let state = state();
        let (code, host, guest) = room_with_guest(&state).await;

        let (host_conn, mut host_rx) = ConnectionHandle::channel(16);
        attach(&state, &code, host.participant_id, &host_conn)
            .await
            .unwrap();

        let (first_conn, first_rx) = ConnectionHandle::channel(16);
        attach(&state, &code, guest.participant_id, &first_conn)
            .await
            .unwrap();
        let (second_conn, second_rx) = ConnectionHandle::channel(16);
        attach(&state, &code, guest.participant_id, &second_conn)
            .await
            .unwrap();

        assert!(*first_rx.shutdown.borrow());
        assert!(!*second_rx.shutdown.borrow());
        frames(&mut host_rx);

        // The replaced connection going away leaves the member online.
        detach(&state, &code, guest.participant_id, &first_conn).await;
        assert!(state.hub().is_online(&code, guest.participant_id).await);
        assert!(frames(&mut host_rx).is_empty());

        detach(&state, &code, guest.participant_id, &second_conn).await;
        assert!(!state.hub().is_online(&code, guest.participant_id).await);
        assert!(*second_rx.shutdown.borrow());
        let gone = frames(&mut host_rx);
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0]["kind"], "presence");
        assert_eq!(gone[0]["payload"]["online"], false);
        assert_eq!(
            gone[0]["payload"]["participant_id"],
            guest.participant_id.to_string()
        );
    }

    #[tokio::test]
    async fn attach_fails_once_the_room_is_deleted_after_the_upgrade_check() {
        let state = state();
        let (code, host, guest) = room_with_guest(&state).await;

        room_service::require_member(&state, &guest, &code)
            .await
            .unwrap();
        let outcome = room_service::leave_room(&state, &host, &code).await.unwrap();
        assert_eq!(outcome, LeaveOutcome::RoomDeleted);

        let (conn, mut rx) = ConnectionHandle::channel(16);
        let err = attach(&state, &code, guest.participant_id, &conn)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(*rx.shutdown.borrow());
        assert!(state.hub().online_participants(&code).await.is_empty());

        let sent = frames(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["kind"], "error");
    }

    #[tokio::test]
    async fn attach_fails_for_a_member_who_left_after_the_upgrade_check() {
        let state = state();
        let (code, host, guest) = room_with_guest(&state).await;

        room_service::require_member(&state, &guest, &code)
            .await
            .unwrap();
        room_service::leave_room(&state, &guest, &code).await.unwrap();

        let (conn, rx) = ConnectionHandle::channel(16);
        let err = attach(&state, &code, guest.participant_id, &conn)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        assert!(*rx.shutdown.borrow());
        assert!(!state.hub().is_online(&code, guest.participant_id).await);
        assert!(!state.hub().is_online(&code, host.participant_id).await);
    }
}
