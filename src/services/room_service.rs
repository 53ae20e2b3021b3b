use std::time::SystemTime;

use tracing::{info, warn};

use crate::{
    dao::{
        models::{MemberEntity, RoomCode, RoomEntity},
        storage::StorageError,
    },
    dto::{
        room::{MemberSummary, RoomSummary},
        validation::validate_room_code,
    },
    error::ServiceError,
    services::room_events,
    state::{Session, SharedState, round::generate_room_code, state_machine::RoomPhase},
};

const MAX_CODE_ATTEMPTS: usize = 16;

/// What happened to the room after a member left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Only the leaving member was removed.
    MemberRemoved,
    /// The room and all its records were deleted.
    RoomDeleted,
}

/// Uppercase and validate a room code taken from a path.
pub fn normalize_code(raw: &str) -> Result<RoomCode, ServiceError> {
    let code = raw.trim().to_ascii_uppercase();
    validate_room_code(&code)
        .map_err(|_| ServiceError::InvalidInput(format!("invalid room code `{raw}`")))?;
    Ok(code)
}

/// Open a room in `category` with the caller as host.
pub async fn create_room(
    state: &SharedState,
    session: &Session,
    category: &str,
    now: SystemTime,
) -> Result<RoomCode, ServiceError> {
    if !state.catalog().has_category(category) {
        return Err(ServiceError::InvalidInput(format!(
            "unknown category `{category}`"
        )));
    }
    let _participant = state.lock_participant(session.participant_id).await;
    ensure_not_in_a_room(state, session).await?;

    let store = state.store();
    let length = state.config().room_code_length;
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = state.with_rng(|rng| generate_room_code(rng, length));
        match store
            .create_room(RoomEntity::new(code.clone(), category.to_owned(), now))
            .await
        {
            Ok(()) => {
                store
                    .add_member(MemberEntity::new(
                        code.clone(),
                        session.participant_id,
                        session.display_name.clone(),
                        true,
                        now,
                    ))
                    .await?;
                info!(room = %code, host = %session.participant_id, category, "room created");
                return Ok(code);
            }
            Err(StorageError::Duplicate { .. }) => continue,
            Err(err) => return Err(err.into()),
        }
    }

    warn!(length, "could not find a free room code");
    Err(ServiceError::Internal("no free room code available".into()))
}

/// Add the caller to an existing room as a regular member.
pub async fn join_room(
    state: &SharedState,
    session: &Session,
    code: &str,
    now: SystemTime,
) -> Result<(), ServiceError> {
    let _participant = state.lock_participant(session.participant_id).await;
    let store = state.store();
    state
        .run_room_transition(code, || async {
            let room = store.get_room(code.to_owned()).await?;
            if room.phase == RoomPhase::Finished {
                return Err(ServiceError::InvalidState(format!(
                    "room `{code}` is finished"
                )));
            }
            ensure_not_in_a_room(state, session).await?;

            store
                .add_member(MemberEntity::new(
                    code.to_owned(),
                    session.participant_id,
                    session.display_name.clone(),
                    false,
                    now,
                ))
                .await?;
            info!(room = %code, participant = %session.participant_id, "member joined");
            Ok(())
        })
        .await
}

/// Remove the caller from the room.
///
/// The host leaving before the round is finished deletes the room. A room left without members
/// is deleted as well.
pub async fn leave_room(
    state: &SharedState,
    session: &Session,
    code: &str,
) -> Result<LeaveOutcome, ServiceError> {
    let store = state.store();
    let participant = session.participant_id;
    state
        .run_room_transition_then(
            code,
            || async {
                let room = store.get_room(code.to_owned()).await?;
                let member = store.find_member(code.to_owned(), participant).await?;

                if member.is_host && room.phase != RoomPhase::Finished {
                    store.delete_room(code.to_owned()).await?;
                    info!(room = %code, host = %participant, "host left; room deleted");
                    return Ok(Departure {
                        member_removed: false,
                        outcome: LeaveOutcome::RoomDeleted,
                    });
                }

                store.remove_member(code.to_owned(), participant).await?;
                info!(room = %code, participant = %participant, "member left");
                if store.list_members(code.to_owned()).await?.is_empty() {
                    store.delete_room(code.to_owned()).await?;
                    info!(room = %code, "last member left; room deleted");
                    return Ok(Departure {
                        member_removed: true,
                        outcome: LeaveOutcome::RoomDeleted,
                    });
                }
                Ok(Departure {
                    member_removed: true,
                    outcome: LeaveOutcome::MemberRemoved,
                })
            },
            |departure| async move {
                if departure.member_removed {
                    room_events::broadcast_leave(state, code, participant).await;
                    state.hub().close_participant(code, participant).await;
                }
                if departure.outcome == LeaveOutcome::RoomDeleted {
                    close_deleted_room(state, code).await;
                }
                departure.outcome
            },
        )
        .await
}

struct Departure {
    member_removed: bool,
    outcome: LeaveOutcome,
}

/// Tell the connected members the room is gone, then close their connections.
async fn close_deleted_room(state: &SharedState, code: &str) {
    room_events::broadcast_room_deleted(state, code).await;
    state.hub().close_room(code).await;
    state.forget_room(code);
}

/// Fetch the membership of `session` in `code`, rejecting non-members.
pub async fn require_member(
    state: &SharedState,
    session: &Session,
    code: &str,
) -> Result<MemberEntity, ServiceError> {
    let store = state.store();
    store.get_room(code.to_owned()).await?;
    store
        .find_member(code.to_owned(), session.participant_id)
        .await
        .map_err(|err| membership_error(code, err))
}

/// Map a failed member lookup of an existing room: a missing record means "not a member".
pub(crate) fn membership_error(code: &str, err: StorageError) -> ServiceError {
    if err.is_not_found() {
        ServiceError::Unauthorized(format!("not a member of room `{code}`"))
    } else {
        err.into()
    }
}

/// Room state as seen over REST by one of its members.
pub async fn room_summary(
    state: &SharedState,
    session: &Session,
    code: &str,
) -> Result<RoomSummary, ServiceError> {
    require_member(state, session, code).await?;
    let store = state.store();
    let room = store.get_room(code.to_owned()).await?;
    let members = store.list_members(code.to_owned()).await?;
    let online = state.hub().online_participants(code).await;

    let members = members
        .iter()
        .map(|member| MemberSummary::new(member, online.contains(&member.participant_id)))
        .collect();
    Ok(RoomSummary::new(&room, members))
}

/// Category names available for new rooms.
pub fn categories(state: &SharedState) -> Vec<String> {
    state.catalog().categories()
}

/// Callers hold the participant lock, so no concurrent create or join can slip in between.
async fn ensure_not_in_a_room(state: &SharedState, session: &Session) -> Result<(), ServiceError> {
    let rooms = state
        .store()
        .rooms_of_participant(session.participant_id)
        .await?;
    match rooms.first() {
        Some(code) => Err(ServiceError::InvalidState(format!(
            "already a member of room `{code}`"
        ))),
        None => Ok(()),
    }
}
