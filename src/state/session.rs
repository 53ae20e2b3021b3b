//! In-memory session registry resolving tokens to participant identities.

use std::time::SystemTime;

use dashmap::DashMap;
use rand::{Rng, distr::Alphanumeric};
use uuid::Uuid;

use crate::dao::models::ParticipantId;

const TOKEN_LENGTH: usize = 32;

/// Identity attached to a session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub created_at: SystemTime,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new session with a fresh participant id.
    pub fn create<R: Rng + ?Sized>(&self, display_name: String, rng: &mut R) -> Session {
        loop {
            let token: String = (0..TOKEN_LENGTH)
                .map(|_| char::from(rng.sample(Alphanumeric)))
                .collect();
            if self.sessions.contains_key(&token) {
                continue;
            }

            let session = Session {
                token: token.clone(),
                participant_id: Uuid::new_v4(),
                display_name,
                created_at: SystemTime::now(),
            };
            self.sessions.insert(token, session.clone());
            return session;
        }
    }

    pub fn resolve(&self, token: &str) -> Option<Session> {
        self.sessions.get(token).map(|entry| entry.value().clone())
    }

    /// Change the display name of a session, returning the updated session.
    pub fn rename(&self, token: &str, display_name: String) -> Option<Session> {
        let mut entry = self.sessions.get_mut(token)?;
        entry.display_name = display_name;
        Some(entry.clone())
    }
}
