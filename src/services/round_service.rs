//! Round lifecycle: starting, answering, voting and the deadline-driven phase changes.

use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use tracing::info;

use crate::{
    dao::models::{AnswerEntity, MemberEntity, ParticipantId, RoomEntity},
    dto::ws::{InitPayload, MemberSnapshot, VoteResultPayload},
    error::ServiceError,
    services::room_events,
    state::{
        SharedState,
        round::select_odd_ones,
        state_machine::{self, InvalidTransition, RoomEvent, RoomEventKind, RoomPhase},
    },
};

/// Longest accepted answer, in characters.
pub const MAX_ANSWER_CHARS: usize = 280;

/// Result of a deadline-driven transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The room was gone, had already moved on, or its deadline had not elapsed.
    Skipped,
}

/// Host starts the round: draw odd-ones and a question, open answering, send the questions.
pub async fn start_round(
    state: &SharedState,
    code: &str,
    actor: ParticipantId,
    duration_secs: u64,
    now: SystemTime,
) -> Result<(), ServiceError> {
    let config = state.config();
    if !config.round_duration_in_range(duration_secs) {
        return Err(ServiceError::InvalidInput(format!(
            "round duration must be between {} and {} seconds",
            config.min_round_secs, config.max_round_secs
        )));
    }

    let store = state.store();
    state
        .run_room_transition_then(
            code,
            || async {
                let mut room = store.get_room(code.to_owned()).await?;
                let members = store.list_members(code.to_owned()).await?;
                let host = members
                    .iter()
                    .find(|member| member.participant_id == actor)
                    .ok_or_else(|| ServiceError::NotFound(format!("not a member of room `{code}`")))?;
                if !host.is_host {
                    return Err(ServiceError::Unauthorized(
                        "only the host can start the round".into(),
                    ));
                }
                if room.phase != RoomPhase::Lobby {
                    return Err(InvalidTransition {
                        from: room.phase,
                        event: RoomEventKind::StartRound,
                    }
                    .into());
                }

                let ids: Vec<ParticipantId> = members.iter().map(|m| m.participant_id).collect();
                let (odd_ones, question) = state.with_rng(|rng| {
                    (
                        select_odd_ones(&ids, config.odd_one_count, rng),
                        state.catalog().pick_question(&room.category, rng),
                    )
                });
                let odd_ones = odd_ones.map_err(|err| ServiceError::InvalidState(err.to_string()))?;
                let question = question.ok_or_else(|| {
                    ServiceError::NotFound(format!("no question for category `{}`", room.category))
                })?;

                let answers_deadline = now + Duration::from_secs(duration_secs);
                state_machine::apply(
                    &mut room,
                    RoomEvent::StartRound {
                        regular: question.regular,
                        sneaky: question.sneaky,
                        answers_deadline,
                    },
                    now,
                )?;

                // Flags first, phase last: an interrupted start leaves the room in Lobby and the
                // next start resets the flags.
                store.begin_round(code.to_owned(), odd_ones.clone()).await?;
                store.save_room(room.clone()).await?;
                info!(room = %code, members = ids.len(), duration_secs, "round started");
                Ok((room, odd_ones))
            },
            |(room, odd_ones)| async move {
                room_events::send_questions(state, &room, &odd_ones).await;
            },
        )
        .await
}

/// Store (or replace) the answer of `actor` while the room is answering.
pub async fn submit_answer(
    state: &SharedState,
    code: &str,
    actor: ParticipantId,
    content: String,
    now: SystemTime,
) -> Result<(), ServiceError> {
    let content = content.trim().to_owned();
    if content.is_empty() {
        return Err(ServiceError::InvalidInput("answer must not be empty".into()));
    }
    if content.chars().count() > MAX_ANSWER_CHARS {
        return Err(ServiceError::InvalidInput(format!(
            "answer must be at most {MAX_ANSWER_CHARS} characters"
        )));
    }

    let store = state.store();
    state
        .run_room_transition(code, || async {
            let room = store.get_room(code.to_owned()).await?;
            store.find_member(code.to_owned(), actor).await?;
            if !room.phase.accepts_answers() {
                return Err(ServiceError::InvalidState(format!(
                    "answers are not accepted while the room is {:?}",
                    room.phase
                )));
            }

            store
                .add_answer(AnswerEntity {
                    room_code: code.to_owned(),
                    participant_id: actor,
                    content,
                    submitted_at: now,
                })
                .await?;
            Ok(())
        })
        .await
}

/// Record (or replace) the vote of `actor` while the room is voting.
pub async fn submit_vote(
    state: &SharedState,
    code: &str,
    actor: ParticipantId,
    target: ParticipantId,
) -> Result<(), ServiceError> {
    if actor == target {
        return Err(ServiceError::InvalidInput("cannot vote for yourself".into()));
    }

    let store = state.store();
    state
        .run_room_transition(code, || async {
            let room = store.get_room(code.to_owned()).await?;
            store.find_member(code.to_owned(), actor).await?;
            if !room.phase.accepts_votes() {
                return Err(ServiceError::InvalidState(format!(
                    "votes are not accepted while the room is {:?}",
                    room.phase
                )));
            }
            store
                .find_member(code.to_owned(), target)
                .await
                .map_err(|_| ServiceError::InvalidInput("vote target is not a member".into()))?;

            store
                .record_vote(code.to_owned(), actor, target)
                .await?;
            Ok(())
        })
        .await
}

/// Close answering once the deadline elapsed: open voting and reveal the answers.
pub async fn close_answers(
    state: &SharedState,
    code: &str,
    now: SystemTime,
) -> Result<TransitionOutcome, ServiceError> {
    let store = state.store();
    state
        .run_room_transition_then(
            code,
            || async {
                let mut room = match store.get_room(code.to_owned()).await {
                    Ok(room) => room,
                    Err(err) if err.is_not_found() => return Ok(None),
                    Err(err) => return Err(err.into()),
                };
                if room.phase != RoomPhase::Answering
                    || !room.answers_deadline.is_some_and(|deadline| deadline <= now)
                {
                    return Ok(None);
                }

                let members = store.list_members(code.to_owned()).await?;
                let answers = store.list_answers(code.to_owned()).await?;
                let voting_deadline = now + state.config().voting_window;
                state_machine::apply(&mut room, RoomEvent::CloseAnswers { voting_deadline }, now)?;
                store.save_room(room.clone()).await?;
                info!(room = %code, answers = answers.len(), "answering closed; voting open");

                Ok(Some((
                    answers_by_member(&members, &answers),
                    room.regular_question,
                    voting_deadline,
                )))
            },
            |revealed| async move {
                let Some((answers, true_question, voting_deadline)) = revealed else {
                    return TransitionOutcome::Skipped;
                };
                room_events::broadcast_answers(state, code, answers, true_question, voting_deadline)
                    .await;
                TransitionOutcome::Applied
            },
        )
        .await
}

/// Close voting once the deadline elapsed and reveal the votes.
pub async fn close_voting(
    state: &SharedState,
    code: &str,
    now: SystemTime,
) -> Result<TransitionOutcome, ServiceError> {
    let store = state.store();
    state
        .run_room_transition_then(
            code,
            || async {
                let mut room = match store.get_room(code.to_owned()).await {
                    Ok(room) => room,
                    Err(err) if err.is_not_found() => return Ok(None),
                    Err(err) => return Err(err.into()),
                };
                if room.phase != RoomPhase::Voting
                    || !room.voting_deadline.is_some_and(|deadline| deadline <= now)
                {
                    return Ok(None);
                }

                let members = store.list_members(code.to_owned()).await?;
                state_machine::apply(&mut room, RoomEvent::CloseVoting, now)?;
                store.save_room(room).await?;

                let result = vote_result(&members);
                info!(room = %code, votes = result.votes.len(), "voting closed");
                Ok(Some(result))
            },
            |result| async move {
                let Some(result) = result else {
                    return TransitionOutcome::Skipped;
                };
                room_events::broadcast_vote_result(state, code, result).await;
                TransitionOutcome::Applied
            },
        )
        .await
}

/// Answer of every member in join order; members who did not answer get an empty string.
pub fn answers_by_member(
    members: &[MemberEntity],
    answers: &[AnswerEntity],
) -> IndexMap<ParticipantId, String> {
    members
        .iter()
        .map(|member| {
            let content = answers
                .iter()
                .find(|answer| answer.participant_id == member.participant_id)
                .map(|answer| answer.content.clone())
                .unwrap_or_default();
            (member.participant_id, content)
        })
        .collect()
}

/// Votes cast, tally per target and the odd-ones reveal.
pub fn vote_result(members: &[MemberEntity]) -> VoteResultPayload {
    let mut result = VoteResultPayload::default();
    for member in members {
        if let Some(target) = member.vote {
            result.votes.insert(member.participant_id, target);
            *result.tally.entry(target).or_insert(0) += 1;
        }
        if member.is_odd_one {
            result.odd_ones.push(member.participant_id);
        }
    }
    result
}

/// Snapshot sent to `viewer` when it connects, whatever the phase.
pub fn init_snapshot(
    room: &RoomEntity,
    members: &[MemberEntity],
    answers: &[AnswerEntity],
    online: &[ParticipantId],
    viewer: ParticipantId,
) -> InitPayload {
    let is_odd_one = members
        .iter()
        .any(|member| member.participant_id == viewer && member.is_odd_one);
    let question = match room.phase {
        RoomPhase::Lobby => String::new(),
        _ if is_odd_one => room.sneaky_question.clone(),
        _ => room.regular_question.clone(),
    };

    let reveals = room.phase.reveals_answers();
    InitPayload {
        phase: room.phase,
        category: room.category.clone(),
        members: members
            .iter()
            .map(|member| MemberSnapshot {
                id: member.participant_id,
                name: member.display_name.clone(),
                is_host: member.is_host,
                online: online.contains(&member.participant_id),
            })
            .collect(),
        answers_deadline: room.answers_deadline,
        voting_deadline: room.voting_deadline,
        question,
        true_question: reveals.then(|| room.regular_question.clone()),
        answers: reveals.then(|| answers_by_member(members, answers)),
        vote_result: (room.phase == RoomPhase::Finished).then(|| vote_result(members)),
    }
}
