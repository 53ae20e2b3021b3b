use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use axum::extract::ws::Message;
use rand::{SeedableRng, rngs::StdRng};
use serde_json::Value;
use uuid::Uuid;

use odd_one_out_back::{
    config::AppConfig,
    content::QuestionCatalog,
    dao::room_store::InMemoryRoomStore,
    services::{
        room_service::{self, LeaveOutcome},
        round_service,
        scheduler::PhaseScheduler,
        session_service, websocket_service,
    },
    state::{AppState, ConnectionHandle, ConnectionReceiver, Session, SharedState},
};

fn seeded_state(seed: u64) -> SharedState {
    AppState::with_rng_source(
        AppConfig::default(),
        QuestionCatalog::default(),
        Arc::new(InMemoryRoomStore::new()),
        StdRng::seed_from_u64(seed),
    )
}

fn t0() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

async fn connect(state: &SharedState, code: &str, session: &Session) -> ConnectionReceiver {
    let (connection, receiver) = ConnectionHandle::channel(32);
    state
        .hub()
        .register(code, session.participant_id, connection)
        .await;
    receiver
}

fn drain(receiver: &mut ConnectionReceiver) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(message) = receiver.messages.try_recv() {
        if let Message::Text(text) = message {
            frames.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    frames
}

fn of_kind<'a>(frames: &'a [Value], kind: &str) -> Vec<&'a Value> {
    frames.iter().filter(|frame| frame["kind"] == kind).collect()
}

async fn run_tick(scheduler: &PhaseScheduler, now: SystemTime) {
    for task in scheduler.tick(now).await {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn full_round_from_lobby_to_vote_result() {
    let state = seeded_state(42);
    let scheduler = PhaseScheduler::new(state.clone());

    let host = session_service::create_session(&state, "Host".into());
    let member = session_service::create_session(&state, "Member".into());
    let idle = session_service::create_session(&state, "Idle".into());

    let code = room_service::create_room(&state, &host, "Animals", t0())
        .await
        .unwrap();
    room_service::join_room(&state, &member, &code, t0())
        .await
        .unwrap();
    room_service::join_room(&state, &idle, &code, t0())
        .await
        .unwrap();

    let mut host_rx = connect(&state, &code, &host).await;
    let mut member_rx = connect(&state, &code, &member).await;
    let mut idle_rx = connect(&state, &code, &idle).await;

    round_service::start_round(&state, &code, host.participant_id, 30, t0())
        .await
        .unwrap();

    let deadline = t0().duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs() + 30;
    let members = state.store().list_members(code.clone()).await.unwrap();
    let odd_ones: Vec<Uuid> = members
        .iter()
        .filter(|m| m.is_odd_one)
        .map(|m| m.participant_id)
        .collect();
    assert_eq!(odd_ones.len(), 1);

    let room = state.store().get_room(code.clone()).await.unwrap();
    for (session, receiver) in [
        (&host, &mut host_rx),
        (&member, &mut member_rx),
        (&idle, &mut idle_rx),
    ] {
        let frames = drain(receiver);
        let questions = of_kind(&frames, "question");
        assert_eq!(questions.len(), 1, "exactly one question per member");
        assert_eq!(questions[0]["payload"]["answers_deadline"], deadline);
        let expected = if odd_ones.contains(&session.participant_id) {
            &room.sneaky_question
        } else {
            &room.regular_question
        };
        assert_eq!(questions[0]["payload"]["question"], expected.as_str());
    }

    round_service::submit_answer(&state, &code, host.participant_id, "a cat".into(), t0())
        .await
        .unwrap();
    round_service::submit_answer(&state, &code, member.participant_id, "a dog".into(), t0())
        .await
        .unwrap();
    round_service::submit_answer(&state, &code, member.participant_id, "a horse".into(), t0())
        .await
        .unwrap();

    // Votes are rejected while answering.
    let err = round_service::submit_vote(&state, &code, host.participant_id, member.participant_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), odd_one_out_back::dto::ws::ErrorKind::Conflict);

    run_tick(&scheduler, t0() + Duration::from_secs(29)).await;
    assert!(drain(&mut host_rx).is_empty());

    run_tick(&scheduler, t0() + Duration::from_secs(30)).await;
    let frames = drain(&mut member_rx);
    let answers = of_kind(&frames, "answers");
    assert_eq!(answers.len(), 1);
    let payload = &answers[0]["payload"];
    assert_eq!(payload["true_question"], room.regular_question.as_str());
    assert_eq!(payload["voting_deadline"], deadline + 30);
    assert_eq!(payload["answers"][host.participant_id.to_string()], "a cat");
    assert_eq!(payload["answers"][member.participant_id.to_string()], "a horse");
    assert_eq!(payload["answers"][idle.participant_id.to_string()], "");

    // A member reconnecting mid-vote is greeted with everything needed to render the room.
    let (late_conn, mut late_rx) = ConnectionHandle::channel(32);
    websocket_service::attach(&state, &code, idle.participant_id, &late_conn)
        .await
        .unwrap();
    assert!(*idle_rx.shutdown.borrow(), "replaced connection is closed");
    let frames = drain(&mut late_rx);
    let init = &frames[0];
    assert_eq!(init["kind"], "init");
    assert_eq!(init["payload"]["phase"], "voting");
    assert_eq!(
        init["payload"]["true_question"],
        room.regular_question.as_str()
    );
    assert_eq!(init["payload"]["answers"].as_object().map(|a| a.len()), Some(3));
    assert_eq!(
        init["payload"]["answers"][member.participant_id.to_string()],
        "a horse"
    );
    drain(&mut host_rx);

    round_service::submit_vote(&state, &code, host.participant_id, member.participant_id)
        .await
        .unwrap();
    round_service::submit_vote(&state, &code, member.participant_id, idle.participant_id)
        .await
        .unwrap();
    round_service::submit_vote(&state, &code, member.participant_id, host.participant_id)
        .await
        .unwrap();

    run_tick(&scheduler, t0() + Duration::from_secs(60)).await;
    let frames = drain(&mut host_rx);
    let results = of_kind(&frames, "vote-result");
    assert_eq!(results.len(), 1);
    let payload = &results[0]["payload"];
    let votes = payload["votes"].as_object().unwrap();
    assert_eq!(votes.len(), 2);
    assert_eq!(
        votes[&host.participant_id.to_string()],
        member.participant_id.to_string()
    );
    assert_eq!(
        votes[&member.participant_id.to_string()],
        host.participant_id.to_string()
    );
    assert!(!votes.contains_key(&idle.participant_id.to_string()));
    assert_eq!(payload["odd_ones"][0], odd_ones[0].to_string());

    // Finished is terminal: further ticks and votes change nothing.
    run_tick(&scheduler, t0() + Duration::from_secs(120)).await;
    assert!(drain(&mut host_rx).is_empty());
    assert!(
        round_service::submit_vote(&state, &code, idle.participant_id, host.participant_id)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn start_fails_without_enough_members() {
    let state = seeded_state(7);
    let host = session_service::create_session(&state, "Host".into());
    let code = room_service::create_room(&state, &host, "Food", t0())
        .await
        .unwrap();

    let err = round_service::start_round(&state, &code, host.participant_id, 30, t0())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), odd_one_out_back::dto::ws::ErrorKind::Conflict);

    let room = state.store().get_room(code).await.unwrap();
    assert_eq!(
        room.phase,
        odd_one_out_back::state::state_machine::RoomPhase::Lobby
    );
    assert!(room.answers_deadline.is_none());
}

#[tokio::test]
async fn host_departure_deletes_room_and_notifies_before_closing() {
    let state = seeded_state(11);
    let host = session_service::create_session(&state, "Host".into());
    let first = session_service::create_session(&state, "First".into());
    let second = session_service::create_session(&state, "Second".into());

    let code = room_service::create_room(&state, &host, "Travel", t0())
        .await
        .unwrap();
    room_service::join_room(&state, &first, &code, t0())
        .await
        .unwrap();
    room_service::join_room(&state, &second, &code, t0())
        .await
        .unwrap();

    let mut first_rx = connect(&state, &code, &first).await;
    let mut second_rx = connect(&state, &code, &second).await;

    let outcome = room_service::leave_room(&state, &host, &code).await.unwrap();
    assert_eq!(outcome, LeaveOutcome::RoomDeleted);

    for receiver in [&mut first_rx, &mut second_rx] {
        assert!(*receiver.shutdown.borrow());
        let frames = drain(receiver);
        assert_eq!(of_kind(&frames, "room-deleted").len(), 1);
    }
    assert!(state.hub().online_participants(&code).await.is_empty());
    assert!(
        state
            .store()
            .get_room(code)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn inbound_frames_are_dispatched_and_bad_ones_rejected() {
    let state = seeded_state(3);
    let host = session_service::create_session(&state, "Host".into());
    let guest = session_service::create_session(&state, "Guest".into());
    let code = room_service::create_room(&state, &host, "Hobbies", t0())
        .await
        .unwrap();
    room_service::join_room(&state, &guest, &code, t0())
        .await
        .unwrap();

    let err = websocket_service::handle_inbound(&state, &code, host.participant_id, "not json")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), odd_one_out_back::dto::ws::ErrorKind::Validation);

    let err = websocket_service::handle_inbound(
        &state,
        &code,
        host.participant_id,
        r#"{"kind":"dance","payload":null}"#,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), odd_one_out_back::dto::ws::ErrorKind::Validation);

    let err = websocket_service::handle_inbound(
        &state,
        &code,
        guest.participant_id,
        r#"{"kind":"start","payload":30}"#,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), odd_one_out_back::dto::ws::ErrorKind::Validation);

    websocket_service::handle_inbound(
        &state,
        &code,
        host.participant_id,
        r#"{"kind":"start","payload":30}"#,
    )
    .await
    .unwrap();
    websocket_service::handle_inbound(
        &state,
        &code,
        guest.participant_id,
        r#"{"kind":"answer","payload":"knitting"}"#,
    )
    .await
    .unwrap();

    let answers = state.store().list_answers(code.clone()).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].content, "knitting");

    // A second start is a conflict: the room is already answering.
    let err = websocket_service::handle_inbound(
        &state,
        &code,
        host.participant_id,
        r#"{"kind":"start","payload":30}"#,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), odd_one_out_back::dto::ws::ErrorKind::Conflict);
}
