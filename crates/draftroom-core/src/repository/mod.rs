// Narrow interface to the backing store.
//
// Every mutation is a conditional write: it re-checks the preconditions its
// plan was validated against and fails with a typed rejection when they no
// longer hold. Successful mutations return the `ChangeBatch` they committed,
// which is also published to subscribers. Keyed mutations are idempotent:
// replaying a key returns the originally committed batch.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::draft::auction::{BidPlan, NominationPlan, SettlementPlan};
use crate::draft::ledger::{PickCommit, UndoPlan};
use crate::draft::model::{Draft, DraftMode, DraftSettings, DraftStatus, Participant, Team, WishlistItem};
use crate::draft::room::JoinRequest;
use crate::draft::store::Snapshot;
use crate::error::RepoError;
use crate::sync::event::ChangeBatch;

pub use sqlite::SqliteRepository;

/// Parameters for creating a draft; the host joins it as the first
/// participant.
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub name: String,
    pub format: String,
    pub mode: DraftMode,
    pub budget_per_team: u32,
    pub max_teams: u32,
    pub settings: DraftSettings,
    pub password: Option<String>,
    pub host: JoinRequest,
}

#[derive(Debug, Clone)]
pub struct CreatedDraft {
    pub draft: Draft,
    pub host: Participant,
    pub team: Option<Team>,
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub draft_id: String,
    pub participant: Participant,
    pub team: Option<Team>,
    /// `None` when the user was already a participant (rejoin).
    pub batch: Option<ChangeBatch>,
}

#[async_trait]
pub trait DraftRepository: Send + Sync {
    async fn load_snapshot(&self, draft_id: &str) -> Result<Snapshot, RepoError>;

    async fn create_draft(&self, new: NewDraft) -> Result<CreatedDraft, RepoError>;

    async fn find_by_room_code(&self, room_code: &str) -> Result<Draft, RepoError>;

    async fn join_draft(&self, room_code: &str, request: JoinRequest) -> Result<JoinOutcome, RepoError>;

    /// Move the draft from `from` to `to`. Starting a draft (setup ->
    /// active) also places the first turn.
    async fn set_status(
        &self,
        draft_id: &str,
        from: DraftStatus,
        to: DraftStatus,
        key: &str,
    ) -> Result<ChangeBatch, RepoError>;

    async fn touch_participant(
        &self,
        participant_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ChangeBatch, RepoError>;

    async fn commit_pick(&self, commit: &PickCommit, key: &str) -> Result<ChangeBatch, RepoError>;

    async fn undo_pick(&self, plan: &UndoPlan, key: &str) -> Result<ChangeBatch, RepoError>;

    async fn open_auction(&self, plan: &NominationPlan, key: &str) -> Result<ChangeBatch, RepoError>;

    async fn place_bid(&self, plan: &BidPlan, key: &str) -> Result<ChangeBatch, RepoError>;

    /// Write the countdown, provided no bid has landed since it was read.
    async fn update_auction_timer(
        &self,
        auction_id: &str,
        expected_bid: u32,
        time_remaining: u32,
    ) -> Result<ChangeBatch, RepoError>;

    async fn settle_auction(&self, plan: &SettlementPlan, key: &str) -> Result<ChangeBatch, RepoError>;

    async fn cancel_auction(&self, draft_id: &str, auction_id: &str, key: &str) -> Result<ChangeBatch, RepoError>;

    /// Replace a participant's wishlist with `entries`.
    async fn upsert_wishlist(
        &self,
        draft_id: &str,
        participant_id: &str,
        entries: &[WishlistItem],
    ) -> Result<ChangeBatch, RepoError>;

    /// The batch committed under an idempotency key, if any.
    async fn find_attempt(&self, key: &str) -> Result<Option<ChangeBatch>, RepoError>;

    /// Trivial read used as a liveness probe.
    async fn ping(&self) -> Result<(), RepoError>;

    /// Every committed batch, for all drafts.
    fn subscribe(&self) -> broadcast::Receiver<ChangeBatch>;
}
