// Wire protocol between `draftroom host` and `draftroom join`.
//
// JSON text frames, internally tagged by "type". Clients identify themselves
// with `HELLO` and then send `COMMAND`s under their own attempt ids; the host
// answers each command with `ACCEPTED` or `REJECTED` and streams every
// committed change batch to all welcomed clients as `CHANGE`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use draftroom_core::draft::room::JoinRequest;
use draftroom_core::draft::Snapshot;
use draftroom_core::error::RepoError;
use draftroom_core::sync::{ChangeBatch, DraftAction};

// ---------------------------------------------------------------------------
// Client -> host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Join (or rejoin) the hosted draft.
    Hello { room_code: String, join: JoinRequest },
    /// Run one intent. `attempt_id` doubles as the idempotency key, so a
    /// command resent after a reconnect is applied at most once.
    Command { attempt_id: String, action: DraftAction },
    Heartbeat,
    /// Ask for a fresh snapshot after a sequence gap.
    Resync,
}

// ---------------------------------------------------------------------------
// Host -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Full state; sent after `HELLO`, after `RESYNC` and after the host
    /// itself resynchronizes.
    Welcome {
        participant_id: String,
        snapshot: Snapshot,
    },
    Change(ChangeBatch),
    Accepted { attempt_id: String },
    Rejected {
        attempt_id: String,
        reason: String,
        /// Resending the same command later may succeed.
        retryable: bool,
    },
    /// `HELLO` was refused; the connection is of no further use.
    Refused { reason: String },
    Notice { message: String },
    Pong,
}

impl ServerMessage {
    pub fn rejected(attempt_id: &str, error: &RepoError) -> Self {
        let retryable = error.is_backend() || error.rejection().is_some_and(|r| r.is_retryable());
        ServerMessage::Rejected {
            attempt_id: attempt_id.to_string(),
            reason: error.to_string(),
            retryable,
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        ServerMessage::Notice {
            message: message.into(),
        }
    }
}

/// Serialize a frame, logging (and skipping) the rare value that cannot be
/// encoded.
pub fn encode<T: Serialize>(message: &T) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("failed to encode message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftroom_core::error::Rejection;

    #[test]
    fn hello_uses_screaming_type_tag() {
        let msg = ClientMessage::Hello {
            room_code: "ABCDEF".into(),
            join: JoinRequest {
                user_id: "u1".into(),
                display_name: "Misty".into(),
                team_name: Some("Cerulean".into()),
                password: None,
            },
        };
        let json: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "HELLO");
        assert_eq!(json["room_code"], "ABCDEF");
        assert_eq!(json["join"]["team_name"], "Cerulean");
    }

    #[test]
    fn command_carries_tagged_action() {
        let raw = r#"{"type":"COMMAND","attempt_id":"a-1","action":{"kind":"pick","item_id":25}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Command {
                attempt_id: "a-1".into(),
                action: DraftAction::Pick { item_id: 25 },
            }
        );
    }

    #[test]
    fn unit_variants_parse() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"HEARTBEAT"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Heartbeat);
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"PONG"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Pong);
    }

    #[test]
    fn change_batch_is_flattened_into_the_frame() {
        let msg = ServerMessage::Change(ChangeBatch {
            seq: 7,
            draft_id: "d1".into(),
            events: vec![],
        });
        let json: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(json["type"], "CHANGE");
        assert_eq!(json["seq"], 7);
        let back: ServerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn rejection_reason_and_retry_hint() {
        let stale = RepoError::from(Rejection::StaleState);
        match ServerMessage::rejected("a-2", &stale) {
            ServerMessage::Rejected {
                attempt_id,
                retryable,
                ..
            } => {
                assert_eq!(attempt_id, "a-2");
                assert!(retryable);
            }
            other => panic!("unexpected {other:?}"),
        }

        let taken = RepoError::from(Rejection::AlreadyTaken { item_id: 4 });
        match ServerMessage::rejected("a-3", &taken) {
            ServerMessage::Rejected {
                reason, retryable, ..
            } => {
                assert_eq!(reason, "item #4 has already been drafted");
                assert!(!retryable);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        let parsed: Result<ClientMessage, _> = serde_json::from_str(r#"{"type":"SHOUT"}"#);
        assert!(parsed.is_err());
    }
}
