// Per-draft session: validates intents against the local store, commits
// them through the repository and keeps the store in step with the change
// feed.
//
// A session is owned by one event loop. Mutations never touch the store
// directly; after the repository acknowledges a write the session drains the
// change feed, which delivers its own batch in sequence order along with
// anything committed before it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::FormatResolver;
use crate::draft::auction::{self, AuctionPhase, TickOutcome};
use crate::draft::ledger::{self, participant};
use crate::draft::model::{
    new_id, Auction, Bid, DraftMode, DraftStatus, ItemId, Pick, WishlistItem,
};
use crate::draft::room::JoinRequest;
use crate::draft::store::DraftStore;
use crate::draft::wishlist;
use crate::error::{Rejection, RepoError, SyncError};
use crate::repository::{DraftRepository, JoinOutcome};
use crate::sync::connection::{reconnect, ConnectionMonitor, ConnectionState, Connector, ReconnectPolicy};
use crate::sync::event::ChangeBatch;
use crate::sync::offline::{DraftAction, OfflineQueue, QueuedAction, ReplayReport};
use crate::sync::realtime::{RealtimeSync, SubscriptionHealth, SyncDirective, SyncSettings};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub sync: SyncSettings,
    pub reconnect: ReconnectPolicy,
    /// No successful heartbeat for this long marks the backend lost.
    pub heartbeat_timeout: Duration,
    pub offline_max_retries: u32,
    /// A participant unseen for this long has their turn auto-picked.
    pub absent_after: chrono::Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            sync: SyncSettings::default(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_timeout: Duration::from_secs(15),
            offline_max_retries: 3,
            absent_after: chrono::Duration::seconds(30),
        }
    }
}

/// Result of [`DraftSession::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Applied,
    /// Held in the offline queue under this idempotency key.
    Queued { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuctionTick {
    /// No auction is counting down.
    Idle,
    Counting { time_remaining: u32 },
    Settled { pick: Pick, completes: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoPickOutcome {
    Picked(Pick),
    Nominated(Auction),
    /// Nothing on the wishlist is legal, unpicked and affordable.
    ManualPickRequired { team_id: String },
}

/// Liveness probe used to re-establish a lost backend.
struct RepoProbe<'a> {
    repo: &'a dyn DraftRepository,
}

#[async_trait]
impl<'a> Connector for RepoProbe<'a> {
    type Connection = ();

    async fn connect(&mut self) -> anyhow::Result<()> {
        self.repo.ping().await?;
        Ok(())
    }
}

pub struct DraftSession {
    draft_id: String,
    store: DraftStore,
    resolver: Arc<FormatResolver>,
    repo: Arc<dyn DraftRepository>,
    changes: broadcast::Receiver<ChangeBatch>,
    sync: RealtimeSync,
    monitor: ConnectionMonitor,
    queue: OfflineQueue,
    settings: SessionSettings,
    /// Turn being timed and when it started.
    pick_clock: Option<(u32, Instant)>,
}

impl DraftSession {
    /// Subscribe to the change feed, then load the draft. Subscribing first
    /// means no batch committed after the snapshot can be missed.
    pub async fn open(
        draft_id: &str,
        repo: Arc<dyn DraftRepository>,
        resolver: Arc<FormatResolver>,
        settings: SessionSettings,
    ) -> Result<Self, RepoError> {
        let changes = repo.subscribe();
        let snapshot = repo.load_snapshot(draft_id).await?;
        if !resolver.has_format(&snapshot.draft.format) {
            warn!(
                "draft {} uses unknown format '{}'; every item will be illegal",
                draft_id, snapshot.draft.format
            );
        }
        info!(
            "session opened for draft '{}' ({}) at seq {}",
            snapshot.draft.name, draft_id, snapshot.seq
        );
        Ok(DraftSession {
            draft_id: draft_id.to_string(),
            store: DraftStore::from_snapshot(snapshot),
            resolver,
            repo,
            changes,
            sync: RealtimeSync::new(settings.sync.clone()),
            monitor: ConnectionMonitor::new(settings.reconnect.clone(), settings.heartbeat_timeout),
            queue: OfflineQueue::new(settings.offline_max_retries),
            settings,
            pick_clock: None,
        })
    }

    pub fn draft_id(&self) -> &str {
        &self.draft_id
    }

    pub fn store(&self) -> &DraftStore {
        &self.store
    }

    pub fn resolver(&self) -> &FormatResolver {
        &self.resolver
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }

    pub fn sync_health(&self) -> SubscriptionHealth {
        self.sync.health()
    }

    pub fn offline_queue(&self) -> &OfflineQueue {
        &self.queue
    }

    // -----------------------------------------------------------------------
    // Change feed
    // -----------------------------------------------------------------------

    /// Offer one batch to the store.
    pub fn ingest(&mut self, batch: &ChangeBatch) -> SyncDirective {
        if batch.draft_id != self.draft_id {
            return SyncDirective::Ignored;
        }
        let directive = self.sync.ingest(&mut self.store, batch, Instant::now());
        debug!("batch {} -> {:?}", batch.seq, directive);
        directive
    }

    /// Apply every batch already waiting on the feed. Returns how many were
    /// applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.changes.try_recv() {
                Ok(batch) => {
                    if self.ingest(&batch) == SyncDirective::Applied {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(skipped)) => self.sync.record_lag(skipped, Instant::now()),
                Err(TryRecvError::Closed) => {
                    self.resubscribe();
                    break;
                }
            }
        }
        applied
    }

    /// Wait for the next batch of this draft. Returns `None` after a lag or
    /// a closed feed, both of which schedule a refetch.
    pub async fn next_change(&mut self) -> Option<ChangeBatch> {
        loop {
            match self.changes.recv().await {
                Ok(batch) if batch.draft_id == self.draft_id => return Some(batch),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    self.sync.record_lag(skipped, Instant::now());
                    return None;
                }
                Err(RecvError::Closed) => {
                    self.resubscribe();
                    return None;
                }
            }
        }
    }

    fn resubscribe(&mut self) {
        self.sync.record_error(
            SyncError::SubscriptionError("change feed closed".to_string()),
            Instant::now(),
        );
        self.changes = self.repo.subscribe();
    }

    /// Deadline of the pending refetch, for timers in the event loop.
    pub fn refetch_deadline(&self) -> Option<Instant> {
        self.sync.refetch_deadline()
    }

    /// Reload the whole draft and resume patching.
    pub async fn refetch(&mut self) -> Result<(), RepoError> {
        let snapshot = self.repo.load_snapshot(&self.draft_id).await?;
        self.sync.complete_refetch(&mut self.store, snapshot);
        // Anything queued on the feed at or below the snapshot is a duplicate.
        self.pump();
        Ok(())
    }

    /// Run the pending refetch if its debounce has elapsed.
    pub async fn refetch_if_due(&mut self) -> Result<bool, RepoError> {
        if !self.sync.refetch_due(Instant::now()) {
            return Ok(false);
        }
        self.refetch().await?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Connection health
    // -----------------------------------------------------------------------

    /// Probe the backend with a trivial read. Returns whether it answered.
    pub async fn heartbeat(&mut self) -> bool {
        let started = Instant::now();
        match self.repo.ping().await {
            Ok(()) => {
                self.monitor.record_heartbeat(started.elapsed(), Instant::now());
                true
            }
            Err(e) => {
                warn!("heartbeat failed: {}", e);
                self.monitor.connection_lost();
                false
            }
        }
    }

    /// Whether the backend has gone silent for longer than the heartbeat
    /// timeout.
    pub fn check_stale(&mut self) -> bool {
        self.monitor.check_stale(Instant::now())
    }

    /// Re-establish the backend with backoff, resynchronize the store and
    /// replay the offline queue.
    pub async fn recover(&mut self) -> Result<ReplayReport, SyncError> {
        let repo = Arc::clone(&self.repo);
        let mut probe = RepoProbe { repo: repo.as_ref() };
        reconnect(&mut probe, &mut self.monitor).await?;
        if let Err(e) = self.refetch().await {
            warn!("refetch after reconnect failed: {}", e);
            self.monitor.connection_lost();
            return Err(SyncError::SubscriptionError(e.to_string()));
        }
        Ok(self.replay_offline().await)
    }

    // -----------------------------------------------------------------------
    // Picks
    // -----------------------------------------------------------------------

    fn after_commit(&mut self, batch: &ChangeBatch) {
        self.pump();
        // Covers a feed that lagged past our own batch.
        self.ingest(batch);
    }

    pub async fn attempt_pick(&mut self, participant_id: &str, item_id: ItemId) -> Result<Pick, RepoError> {
        self.pick_keyed(participant_id, item_id, &new_id()).await
    }

    async fn pick_keyed(&mut self, participant_id: &str, item_id: ItemId, key: &str) -> Result<Pick, RepoError> {
        let commit = ledger::plan_pick(&self.store, &self.resolver, participant_id, item_id)?;
        let batch = self.repo.commit_pick(&commit, key).await?;
        self.after_commit(&batch);
        self.pick_clock = None;
        Ok(commit.pick)
    }

    pub async fn undo_last_pick(&mut self, participant_id: &str) -> Result<Pick, RepoError> {
        self.undo_keyed(participant_id, &new_id()).await
    }

    async fn undo_keyed(&mut self, participant_id: &str, key: &str) -> Result<Pick, RepoError> {
        let plan = ledger::plan_undo(&self.store, participant_id)?;
        let batch = self.repo.undo_pick(&plan, key).await?;
        self.after_commit(&batch);
        self.pick_clock = None;
        Ok(plan.pick)
    }

    // -----------------------------------------------------------------------
    // Auctions
    // -----------------------------------------------------------------------

    pub async fn nominate(
        &mut self,
        participant_id: &str,
        item_id: ItemId,
        starting_bid: u32,
    ) -> Result<Auction, RepoError> {
        self.nominate_keyed(participant_id, item_id, starting_bid, &new_id())
            .await
    }

    async fn nominate_keyed(
        &mut self,
        participant_id: &str,
        item_id: ItemId,
        starting_bid: u32,
        key: &str,
    ) -> Result<Auction, RepoError> {
        let plan = auction::plan_nomination(&self.store, &self.resolver, participant_id, item_id, starting_bid)?;
        let batch = self.repo.open_auction(&plan, key).await?;
        self.after_commit(&batch);
        Ok(plan.auction)
    }

    pub async fn place_bid(&mut self, participant_id: &str, amount: u32) -> Result<Bid, RepoError> {
        self.bid_keyed(participant_id, amount, &new_id()).await
    }

    async fn bid_keyed(&mut self, participant_id: &str, amount: u32, key: &str) -> Result<Bid, RepoError> {
        let plan = auction::plan_bid(&self.store, participant_id, amount)?;
        let batch = self.repo.place_bid(&plan, key).await?;
        self.after_commit(&batch);
        Ok(plan.bid)
    }

    pub async fn cancel_auction(&mut self, participant_id: &str) -> Result<(), RepoError> {
        self.cancel_keyed(participant_id, &new_id()).await
    }

    async fn cancel_keyed(&mut self, participant_id: &str, key: &str) -> Result<(), RepoError> {
        let auction_id = auction::plan_cancel(&self.store, participant_id)?;
        let batch = self
            .repo
            .cancel_auction(&self.draft_id, &auction_id, key)
            .await?;
        self.after_commit(&batch);
        Ok(())
    }

    /// Advance the active auction's countdown by `elapsed_secs`, settling it
    /// once the timer runs out.
    pub async fn tick_auction(&mut self, elapsed_secs: u32) -> Result<AuctionTick, RepoError> {
        match auction::phase(&self.store) {
            AuctionPhase::Idle | AuctionPhase::Nominating => Ok(AuctionTick::Idle),
            AuctionPhase::Settling => self.settle().await,
            AuctionPhase::Bidding => {
                let Some(active) = self.store.active_auction().cloned() else {
                    return Ok(AuctionTick::Idle);
                };
                match auction::tick(&active, elapsed_secs) {
                    TickOutcome::Expired => self.settle().await,
                    TickOutcome::Running { time_remaining } => {
                        match self
                            .repo
                            .update_auction_timer(&active.id, active.current_bid, time_remaining)
                            .await
                        {
                            Ok(batch) => self.after_commit(&batch),
                            // A bid landed and reset the clock; keep its value.
                            Err(RepoError::Rejected(Rejection::StaleState)) => {
                                self.pump();
                            }
                            Err(e) => return Err(e),
                        }
                        Ok(AuctionTick::Counting {
                            time_remaining: self
                                .store
                                .active_auction()
                                .map_or(time_remaining, |a| a.time_remaining),
                        })
                    }
                }
            }
        }
    }

    async fn settle(&mut self) -> Result<AuctionTick, RepoError> {
        let plan = auction::plan_settlement(&self.store, &self.resolver)?;
        let batch = self.repo.settle_auction(&plan, &new_id()).await?;
        self.after_commit(&batch);
        Ok(AuctionTick::Settled {
            pick: plan.pick,
            completes: plan.completes,
        })
    }

    // -----------------------------------------------------------------------
    // Auto-pick and the pick clock
    // -----------------------------------------------------------------------

    /// Pick (snake) or nominate (auction) the first viable wishlist entry of
    /// the team's owner.
    pub async fn auto_pick(&mut self, team_id: &str) -> Result<AutoPickOutcome, RepoError> {
        let draft = self.store.draft().ok_or(Rejection::StaleState)?;
        let mode = draft.mode;
        let floor = draft.settings.starting_bid_floor();
        let owner_id = self
            .store
            .team(team_id)
            .map(|t| t.owner_id.clone())
            .ok_or(Rejection::NoTeam)?;

        let Some(item_id) = wishlist::next_pick(&self.store, &self.resolver, team_id) else {
            info!("no viable wishlist entry for team {}; manual pick required", team_id);
            return Ok(AutoPickOutcome::ManualPickRequired {
                team_id: team_id.to_string(),
            });
        };
        info!("auto-picking #{} for team {}", item_id, team_id);
        match mode {
            DraftMode::Snake => Ok(AutoPickOutcome::Picked(
                self.attempt_pick(&owner_id, item_id).await?,
            )),
            DraftMode::Auction => Ok(AutoPickOutcome::Nominated(
                self.nominate(&owner_id, item_id, floor).await?,
            )),
        }
    }

    /// The team that owes the next move: the snake team on the clock, or
    /// the auction nominator while no auction is open. Paired with the turn
    /// it is timed against.
    pub fn on_clock(&self) -> Option<(u32, String)> {
        let draft = self.store.draft()?;
        if draft.status != DraftStatus::Active {
            return None;
        }
        let team = match draft.mode {
            DraftMode::Snake => self.store.current_team()?,
            DraftMode::Auction => {
                if auction::phase(&self.store) != AuctionPhase::Nominating {
                    return None;
                }
                auction::nominator(&self.store)?.0
            }
        };
        Some((draft.current_turn, team.id.clone()))
    }

    /// The team on the clock whose pick (or nomination) timer has run out.
    /// The clock starts when a turn is first observed here; an auction in
    /// progress stops it.
    pub fn pick_clock_expired(&mut self, now: Instant) -> Option<String> {
        let Some((turn, team_id)) = self.on_clock() else {
            self.pick_clock = None;
            return None;
        };
        let limit = Duration::from_secs(self.store.draft()?.settings.pick_timer_seconds as u64);
        match self.pick_clock {
            Some((timed, started)) if timed == turn => {
                (now.saturating_duration_since(started) >= limit).then_some(team_id)
            }
            _ => {
                self.pick_clock = Some((turn, now));
                None
            }
        }
    }

    /// Give the team on the clock a fresh pick timer.
    pub fn restart_pick_clock(&mut self, now: Instant) {
        self.pick_clock = self
            .store
            .draft()
            .map(|d| (d.current_turn, now));
    }

    /// The team on the clock, if its owner has not been seen recently.
    pub fn absent_on_clock(&self) -> Option<String> {
        let (_, team_id) = self.on_clock()?;
        let owner = self.store.owner_of(&team_id)?;
        owner
            .is_absent(Utc::now(), self.settings.absent_after)
            .then_some(team_id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub async fn start(&mut self, participant_id: &str) -> Result<(), RepoError> {
        self.transition(participant_id, DraftStatus::Setup, DraftStatus::Active, "start the draft", &new_id())
            .await
    }

    pub async fn pause(&mut self, participant_id: &str) -> Result<(), RepoError> {
        self.transition(participant_id, DraftStatus::Active, DraftStatus::Paused, "pause the draft", &new_id())
            .await
    }

    pub async fn resume(&mut self, participant_id: &str) -> Result<(), RepoError> {
        self.transition(participant_id, DraftStatus::Paused, DraftStatus::Active, "resume the draft", &new_id())
            .await
    }

    async fn transition(
        &mut self,
        participant_id: &str,
        from: DraftStatus,
        to: DraftStatus,
        action: &str,
        key: &str,
    ) -> Result<(), RepoError> {
        let actor = participant(&self.store, participant_id)?;
        if !actor.can_administer() {
            return Err(Rejection::NotPermitted {
                action: action.to_string(),
            }
            .into());
        }
        let status = self.store.draft().ok_or(Rejection::StaleState)?.status;
        if status != from {
            return Err(Rejection::InvalidTransition {
                action: action.to_string(),
                status,
            }
            .into());
        }
        if from == DraftStatus::Setup && self.store.team_count() < 2 {
            return Err(Rejection::InvalidTransition {
                action: "start a draft with fewer than two teams".to_string(),
                status,
            }
            .into());
        }
        let batch = self.repo.set_status(&self.draft_id, from, to, key).await?;
        self.after_commit(&batch);
        self.pick_clock = None;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Membership and wishlists
    // -----------------------------------------------------------------------

    /// Join this session's draft by its room code.
    pub async fn admit(&mut self, request: JoinRequest) -> Result<JoinOutcome, RepoError> {
        let code = self
            .store
            .draft()
            .map(|d| d.room_code.clone())
            .ok_or(Rejection::StaleState)?;
        let outcome = self.repo.join_draft(&code, request).await?;
        if let Some(batch) = &outcome.batch {
            self.after_commit(batch);
        }
        Ok(outcome)
    }

    /// Record that a participant is present.
    pub async fn touch(&mut self, participant_id: &str) -> Result<(), RepoError> {
        let batch = self.repo.touch_participant(participant_id, Utc::now()).await?;
        self.after_commit(&batch);
        Ok(())
    }

    async fn save_wishlist(&mut self, participant_id: &str, entries: Vec<WishlistItem>) -> Result<(), RepoError> {
        let batch = self
            .repo
            .upsert_wishlist(&self.draft_id, participant_id, &entries)
            .await?;
        self.after_commit(&batch);
        Ok(())
    }

    pub async fn wishlist_add(&mut self, participant_id: &str, item_id: ItemId) -> Result<(), RepoError> {
        let entries = wishlist::add_entry(&self.store, &self.resolver, participant_id, item_id)?;
        self.save_wishlist(participant_id, entries).await
    }

    pub async fn wishlist_remove(&mut self, participant_id: &str, item_id: ItemId) -> Result<(), RepoError> {
        let entries = wishlist::remove_entry(&self.store, participant_id, item_id)?;
        self.save_wishlist(participant_id, entries).await
    }

    pub async fn wishlist_reorder(&mut self, participant_id: &str, order: &[ItemId]) -> Result<(), RepoError> {
        let entries = wishlist::reorder(&self.store, participant_id, order)?;
        self.save_wishlist(participant_id, entries).await
    }

    /// Recompute availability and cost on every wishlist and persist the
    /// ones that changed. Returns how many lists were rewritten.
    pub async fn refresh_wishlists(&mut self) -> Result<usize, RepoError> {
        let owners: Vec<String> = self.store.participants().map(|p| p.id.clone()).collect();
        let mut rewritten = 0;
        for participant_id in owners {
            let mut entries: Vec<WishlistItem> = self
                .store
                .wishlist_for(&participant_id)
                .into_iter()
                .cloned()
                .collect();
            if entries.is_empty()
                || !wishlist::refresh_availability(&mut entries, &self.store, &self.resolver)
            {
                continue;
            }
            self.save_wishlist(&participant_id, entries).await?;
            rewritten += 1;
        }
        Ok(rewritten)
    }

    // -----------------------------------------------------------------------
    // Actions and the offline queue
    // -----------------------------------------------------------------------

    /// Run one client intent under an idempotency key. A key that already
    /// committed is acknowledged without re-validation. A stale-state refusal
    /// triggers a refetch and one retry against fresh state.
    pub async fn execute(&mut self, participant_id: &str, action: &DraftAction, key: &str) -> Result<(), RepoError> {
        if let Some(batch) = self.repo.find_attempt(key).await? {
            debug!("{} ({}) already committed as seq {}", action.label(), key, batch.seq);
            self.after_commit(&batch);
            return Ok(());
        }
        match self.dispatch(participant_id, action, key).await {
            Err(RepoError::Rejected(Rejection::StaleState)) => {
                debug!("{} hit stale state; refetching before retry", action.label());
                self.refetch().await?;
                self.dispatch(participant_id, action, key).await
            }
            other => other,
        }
    }

    async fn dispatch(&mut self, participant_id: &str, action: &DraftAction, key: &str) -> Result<(), RepoError> {
        match action {
            DraftAction::Pick { item_id } => self.pick_keyed(participant_id, *item_id, key).await.map(drop),
            DraftAction::Nominate {
                item_id,
                starting_bid,
            } => self
                .nominate_keyed(participant_id, *item_id, *starting_bid, key)
                .await
                .map(drop),
            DraftAction::Bid { amount } => self.bid_keyed(participant_id, *amount, key).await.map(drop),
            DraftAction::UndoLastPick => self.undo_keyed(participant_id, key).await.map(drop),
            DraftAction::CancelAuction => self.cancel_keyed(participant_id, key).await,
            DraftAction::Start => {
                self.transition(participant_id, DraftStatus::Setup, DraftStatus::Active, "start the draft", key)
                    .await
            }
            DraftAction::Pause => {
                self.transition(participant_id, DraftStatus::Active, DraftStatus::Paused, "pause the draft", key)
                    .await
            }
            DraftAction::Resume => {
                self.transition(participant_id, DraftStatus::Paused, DraftStatus::Active, "resume the draft", key)
                    .await
            }
            DraftAction::AddToWishlist { item_id } => self.wishlist_add(participant_id, *item_id).await,
            DraftAction::RemoveFromWishlist { item_id } => self.wishlist_remove(participant_id, *item_id).await,
            DraftAction::ReorderWishlist { item_ids } => self.wishlist_reorder(participant_id, item_ids).await,
        }
    }

    /// Execute an intent now, or queue it when the backend is unreachable.
    pub async fn submit(&mut self, participant_id: &str, action: DraftAction) -> Result<Submission, RepoError> {
        let key = new_id();
        if !self.monitor.is_online() {
            self.queue.enqueue(key.clone(), participant_id, action);
            return Ok(Submission::Queued { key });
        }
        match self.execute(participant_id, &action, &key).await {
            Ok(()) => Ok(Submission::Applied),
            Err(e) if e.is_backend() => {
                warn!("{} failed against the backend: {}", action.label(), e);
                self.monitor.connection_lost();
                self.queue.enqueue(key.clone(), participant_id, action);
                Ok(Submission::Queued { key })
            }
            Err(e) => Err(e),
        }
    }

    /// Replay queued intents, highest priority first. Each keeps its key, so
    /// one that already landed before the disconnect is not applied twice.
    pub async fn replay_offline(&mut self) -> ReplayReport {
        let mut report = ReplayReport::default();
        let mut pending = self.queue.drain_ordered().into_iter();
        while let Some(queued) = pending.next() {
            match self
                .execute(&queued.participant_id, &queued.action, &queued.key)
                .await
            {
                Ok(()) => report.applied.push(queued.key),
                Err(e) if e.is_backend() => {
                    warn!("replay interrupted: {}", e);
                    self.monitor.connection_lost();
                    self.queue.restore(queued);
                    for rest in pending.by_ref() {
                        self.queue.restore(rest);
                    }
                    report.interrupted = true;
                    break;
                }
                Err(e) => self.requeue(queued, &e.to_string(), &mut report),
            }
        }
        if !report.applied.is_empty() || !report.dropped.is_empty() {
            info!(
                "offline replay: {} applied, {} requeued, {} dropped",
                report.applied.len(),
                report.requeued.len(),
                report.dropped.len()
            );
        }
        report
    }

    fn requeue(&mut self, queued: QueuedAction, reason: &str, report: &mut ReplayReport) {
        let key = queued.key.clone();
        match self.queue.requeue_failed(queued, reason) {
            Ok(()) => report.requeued.push(key),
            Err(dropped) => report.dropped.push(dropped),
        }
    }
}
