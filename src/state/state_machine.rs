use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::dao::models::RoomEntity;

/// Phases a room moves through during a round. Phases only ever advance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    /// Members gather; the host may start the round.
    Lobby,
    /// Questions are out and answers are collected until the answers deadline.
    Answering,
    /// Answers are revealed and votes are collected until the voting deadline.
    Voting,
    /// Votes are revealed. Terminal.
    Finished,
}

impl RoomPhase {
    pub fn accepts_answers(self) -> bool {
        self == RoomPhase::Answering
    }

    pub fn accepts_votes(self) -> bool {
        self == RoomPhase::Voting
    }

    /// Whether answers and the true question are visible to members.
    pub fn reveals_answers(self) -> bool {
        matches!(self, RoomPhase::Voting | RoomPhase::Finished)
    }
}

/// Events that can be applied to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// Host starts the round with the selected question pair.
    StartRound {
        /// Question shown to regular members.
        regular: String,
        /// Question shown to the odd-ones.
        sneaky: String,
        answers_deadline: SystemTime,
    },
    /// Answers deadline elapsed; open voting.
    CloseAnswers { voting_deadline: SystemTime },
    /// Voting deadline elapsed; reveal the results.
    CloseVoting,
}

/// Payload-free discriminant of [`RoomEvent`], used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEventKind {
    StartRound,
    CloseAnswers,
    CloseVoting,
}

impl RoomEvent {
    pub fn kind(&self) -> RoomEventKind {
        match self {
            RoomEvent::StartRound { .. } => RoomEventKind::StartRound,
            RoomEvent::CloseAnswers { .. } => RoomEventKind::CloseAnswers,
            RoomEvent::CloseVoting => RoomEventKind::CloseVoting,
        }
    }
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the room was in when the invalid event was received.
    pub from: RoomPhase,
    /// The event that cannot be applied from this phase.
    pub event: RoomEventKind,
}

/// Compute the phase reached by applying `event` from `from`.
pub fn compute_transition(from: RoomPhase, event: &RoomEvent) -> Result<RoomPhase, InvalidTransition> {
    let next = match (from, event) {
        (RoomPhase::Lobby, RoomEvent::StartRound { .. }) => RoomPhase::Answering,
        (RoomPhase::Answering, RoomEvent::CloseAnswers { .. }) => RoomPhase::Voting,
        (RoomPhase::Voting, RoomEvent::CloseVoting) => RoomPhase::Finished,
        (from, event) => {
            return Err(InvalidTransition {
                from,
                event: event.kind(),
            });
        }
    };

    Ok(next)
}

/// Apply `event` to `room`, writing the phase, questions and deadlines it carries.
///
/// This is the only place those fields are written. On error the room is left untouched.
pub fn apply(
    room: &mut RoomEntity,
    event: RoomEvent,
    now: SystemTime,
) -> Result<RoomPhase, InvalidTransition> {
    let next = compute_transition(room.phase, &event)?;

    match event {
        RoomEvent::StartRound {
            regular,
            sneaky,
            answers_deadline,
        } => {
            room.regular_question = regular;
            room.sneaky_question = sneaky;
            room.answers_deadline = Some(answers_deadline);
            room.voting_deadline = None;
        }
        RoomEvent::CloseAnswers { voting_deadline } => {
            room.voting_deadline = Some(voting_deadline);
        }
        RoomEvent::CloseVoting => {}
    }

    room.phase = next;
    room.updated_at = now;
    Ok(next)
}
