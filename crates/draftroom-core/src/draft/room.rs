// Room codes and join validation.

use serde::{Deserialize, Serialize};

use super::model::{Draft, DraftStatus, Team};
use crate::error::Rejection;

/// Uppercase letters and digits without the easily confused I, O, 0 and 1.
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const ROOM_CODE_LEN: usize = 6;

pub fn generate_room_code() -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let i = rand::random::<u32>() as usize % ROOM_CODE_ALPHABET.len();
            ROOM_CODE_ALPHABET[i] as char
        })
        .collect()
}

/// Trim and uppercase user-entered codes.
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub user_id: String,
    pub display_name: String,
    /// `None` joins as a spectator.
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Check a join against the draft row and its current teams.
///
/// Spectators may join at any stage; taking a team requires the draft to
/// still be in setup, a free slot, and a team name not already used (case
/// insensitive).
pub fn validate_join(draft: &Draft, teams: &[Team], request: &JoinRequest) -> Result<(), Rejection> {
    if let Some(expected) = draft.password.as_deref().filter(|p| !p.is_empty()) {
        if request.password.as_deref() != Some(expected) {
            return Err(Rejection::JoinRefused {
                reason: "incorrect password".to_string(),
            });
        }
    }
    if request.display_name.trim().is_empty() {
        return Err(Rejection::JoinRefused {
            reason: "display name is required".to_string(),
        });
    }

    let Some(team_name) = request.team_name.as_deref() else {
        return Ok(());
    };
    let team_name = team_name.trim();
    if team_name.is_empty() {
        return Err(Rejection::JoinRefused {
            reason: "team name is required".to_string(),
        });
    }
    if draft.status != DraftStatus::Setup {
        return Err(Rejection::JoinRefused {
            reason: format!("the draft is already {}", draft.status),
        });
    }
    if teams.len() as u32 >= draft.max_teams {
        return Err(Rejection::JoinRefused {
            reason: format!("the draft is full ({} teams)", draft.max_teams),
        });
    }
    if teams.iter().any(|t| t.name.trim().eq_ignore_ascii_case(team_name)) {
        return Err(Rejection::JoinRefused {
            reason: format!("team name '{team_name}' is taken"),
        });
    }
    Ok(())
}
