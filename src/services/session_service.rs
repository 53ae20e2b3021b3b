use tracing::{info, warn};

use crate::{
    error::ServiceError,
    services::room_events,
    state::{Session, SharedState},
};

/// Issue a session for a new participant.
pub fn create_session(state: &SharedState, username: String) -> Session {
    let session = state.with_rng(|rng| state.sessions().create(username, rng));
    info!(participant = %session.participant_id, "session created");
    session
}

/// Resolve a token to its session, rejecting unknown tokens.
pub fn authenticate(state: &SharedState, token: &str) -> Result<Session, ServiceError> {
    state
        .sessions()
        .resolve(token)
        .ok_or_else(|| ServiceError::Unauthorized("unknown session token".into()))
}

/// Rename the participant and tell every room they belong to.
pub async fn rename(
    state: &SharedState,
    session: &Session,
    username: String,
) -> Result<Session, ServiceError> {
    let updated = state
        .sessions()
        .rename(&session.token, username)
        .ok_or_else(|| ServiceError::Unauthorized("unknown session token".into()))?;

    let store = state.store();
    let participant = updated.participant_id;
    let display_name = updated.display_name.as_str();
    for code in store.rooms_of_participant(participant).await? {
        let code = code.as_str();
        let result = state
            .run_room_transition_then(
                code,
                || async {
                    let mut member = store.find_member(code.to_owned(), participant).await?;
                    member.display_name = display_name.to_owned();
                    store.save_member(member).await?;
                    Ok(())
                },
                |()| async move {
                    room_events::broadcast_update_user(state, code, participant, display_name)
                        .await;
                },
            )
            .await;
        if let Err(err) = result {
            warn!(room = %code, participant = %participant, error = %err, "failed to propagate rename");
        }
    }

    Ok(updated)
}
