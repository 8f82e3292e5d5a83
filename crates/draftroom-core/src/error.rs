// Error taxonomy shared by the draft engine, the repository and the sync layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::draft::model::{DraftMode, DraftStatus, ItemId};

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// A typed refusal of a pick, bid, nomination or lifecycle action.
///
/// Rejections are always produced before any state is mutated, so the caller
/// can show the reason and retry against fresh state. The `Display` text is
/// meant for end users: it says *why* the action failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    #[error("the draft is not active (status: {status})")]
    DraftNotActive { status: DraftStatus },

    #[error("this action is not available in {mode} drafts")]
    WrongMode { mode: DraftMode },

    #[error("it is not your turn ({on_clock} is on the clock)")]
    NotYourTurn { on_clock: String },

    #[error("item #{item_id} is not legal in this format: {reason}")]
    IllegalItem { item_id: ItemId, reason: String },

    #[error("item #{item_id} has already been drafted")]
    AlreadyTaken { item_id: ItemId },

    #[error("insufficient budget: this costs {cost} but only {remaining} remains")]
    InsufficientBudget { cost: u32, remaining: u32 },

    #[error("roster is already full ({size} picks)")]
    RosterFull { size: u32 },

    #[error("no auction is currently open for bidding")]
    AuctionNotActive,

    #[error("an auction is already in progress")]
    AuctionInProgress,

    #[error("bid of {amount} must be greater than the current bid of {current}")]
    BidTooLow { amount: u32, current: u32 },

    #[error("starting bid of {amount} is below the minimum of {minimum}")]
    StartingBidTooLow { amount: u32, minimum: u32 },

    #[error("you already hold the high bid")]
    BidderIsCurrentHighBidder,

    #[error("your team is not next in the nomination rotation")]
    NotInRotation,

    #[error("the draft changed before this action landed; refresh and retry")]
    StaleState,

    #[error("undo is disabled for this draft")]
    UndoNotAllowed,

    #[error("there is no pick to undo")]
    NothingToUndo,

    #[error("only the host can {action}")]
    NotPermitted { action: String },

    #[error("cannot {action} while the draft is {status}")]
    InvalidTransition { action: String, status: DraftStatus },

    #[error("unknown participant {participant_id}")]
    UnknownParticipant { participant_id: String },

    #[error("participant has not joined a team")]
    NoTeam,

    #[error("item #{item_id} is not in the catalog")]
    UnknownItem { item_id: ItemId },

    #[error("item #{item_id} is already on the wishlist")]
    DuplicateWishlistEntry { item_id: ItemId },

    #[error("wishlist reorder must list every entry exactly once")]
    InvalidReorder,

    #[error("cannot join draft: {reason}")]
    JoinRefused { reason: String },
}

impl Rejection {
    /// Whether retrying the same intent against refreshed state can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Rejection::StaleState)
    }
}

// ---------------------------------------------------------------------------
// Repository / session errors
// ---------------------------------------------------------------------------

/// Errors returned by the repository and by session operations that write
/// through it.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl RepoError {
    /// The typed rejection, if this error is one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            RepoError::Rejected(r) => Some(r),
            _ => None,
        }
    }

    /// Backend failures are treated as connectivity problems by the session
    /// (the action is queued for replay); rejections and missing rows are not.
    pub fn is_backend(&self) -> bool {
        matches!(self, RepoError::Backend(_))
    }
}

// ---------------------------------------------------------------------------
// Synchronization errors
// ---------------------------------------------------------------------------

/// Failures of the realtime layer. These are surfaced as connection-state
/// transitions rather than propagated as fatal errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("subscription error: {0}")]
    SubscriptionError(String),

    #[error("reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("offline action {key} dropped after {attempts} replay attempts: {reason}")]
    OfflineQueueReplayFailed {
        key: String,
        attempts: u32,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages_distinguish_causes() {
        let turn = Rejection::NotYourTurn {
            on_clock: "Team Rocket".into(),
        };
        let budget = Rejection::InsufficientBudget {
            cost: 150,
            remaining: 100,
        };
        let illegal = Rejection::IllegalItem {
            item_id: 25,
            reason: "explicitly banned".into(),
        };
        assert_eq!(turn.to_string(), "it is not your turn (Team Rocket is on the clock)");
        assert_eq!(
            budget.to_string(),
            "insufficient budget: this costs 150 but only 100 remains"
        );
        assert!(illegal.to_string().contains("explicitly banned"));
    }

    #[test]
    fn only_stale_state_is_retryable() {
        assert!(Rejection::StaleState.is_retryable());
        assert!(!Rejection::AlreadyTaken { item_id: 1 }.is_retryable());
        assert!(!Rejection::BidderIsCurrentHighBidder.is_retryable());
    }

    #[test]
    fn rejection_serializes_with_kind_tag() {
        let json = serde_json::to_value(Rejection::BidTooLow {
            amount: 8,
            current: 10,
        })
        .unwrap();
        assert_eq!(json["kind"], "bid_too_low");
        assert_eq!(json["amount"], 8);
    }

    #[test]
    fn repo_error_exposes_rejection() {
        let err = RepoError::from(Rejection::AuctionNotActive);
        assert_eq!(err.rejection(), Some(&Rejection::AuctionNotActive));
        assert!(!err.is_backend());

        let backend = RepoError::from(anyhow::anyhow!("disk gone"));
        assert!(backend.rejection().is_none());
        assert!(backend.is_backend());
    }
}
