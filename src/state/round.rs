//! Random draws made when rooms are created and rounds start.

use rand::{Rng, seq::IndexedRandom};
use thiserror::Error;

use crate::dao::models::ParticipantId;

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Not enough members to keep at least one regular member after the draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("need more than {count} members to pick {count} odd one(s), room has {members}")]
pub struct NotEnoughMembers {
    pub members: usize,
    pub count: usize,
}

/// Uniformly pick `count` distinct odd-ones among `members`.
///
/// Fails when `members.len() <= count` or `count == 0`.
pub fn select_odd_ones<R: Rng + ?Sized>(
    members: &[ParticipantId],
    count: usize,
    rng: &mut R,
) -> Result<Vec<ParticipantId>, NotEnoughMembers> {
    if count == 0 || members.len() <= count {
        return Err(NotEnoughMembers {
            members: members.len(),
            count,
        });
    }

    Ok(members.choose_multiple(rng, count).copied().collect())
}

/// Random uppercase alphanumeric code of `length` characters.
pub fn generate_room_code<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}
