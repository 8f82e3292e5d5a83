// Applies change batches to the local draft store and decides when to fall
// back to a full refetch.
//
// The hot path patches the store batch by batch. A refetch is scheduled
// (debounced) when a sequence gap, an undecodable row, a lagged
// subscription or a burst of events is observed; while one is pending,
// incoming batches are deferred to it.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::event::ChangeBatch;
use crate::draft::store::{ApplyOutcome, DraftStore, Snapshot};
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// More than this many events inside `burst_window` counts as a burst.
    pub burst_threshold: usize,
    pub burst_window: Duration,
    pub refetch_debounce: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            burst_threshold: 50,
            burst_window: Duration::from_millis(500),
            refetch_debounce: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionHealth {
    Subscribed,
    /// Patching is suspended until a refetch lands.
    Degraded,
    Failed,
}

/// What happened to an offered batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirective {
    Applied,
    Duplicate,
    Ignored,
    /// Not applied; a refetch is pending and will cover it.
    Deferred,
}

#[derive(Debug)]
pub struct RealtimeSync {
    settings: SyncSettings,
    health: SubscriptionHealth,
    arrivals: VecDeque<(Instant, usize)>,
    refetch_due: Option<Instant>,
    refetch_first_requested: Option<Instant>,
    last_error: Option<SyncError>,
}

impl RealtimeSync {
    pub fn new(settings: SyncSettings) -> Self {
        RealtimeSync {
            settings,
            health: SubscriptionHealth::Subscribed,
            arrivals: VecDeque::new(),
            refetch_due: None,
            refetch_first_requested: None,
            last_error: None,
        }
    }

    pub fn health(&self) -> SubscriptionHealth {
        self.health
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn refetch_pending(&self) -> bool {
        self.refetch_due.is_some()
    }

    /// Deadline of the pending refetch, if any.
    pub fn refetch_deadline(&self) -> Option<Instant> {
        self.refetch_due
    }

    pub fn refetch_due(&self, now: Instant) -> bool {
        self.refetch_due.is_some_and(|due| now >= due)
    }

    /// Offer a batch to the store.
    pub fn ingest(&mut self, store: &mut DraftStore, batch: &ChangeBatch, now: Instant) -> SyncDirective {
        if batch.seq <= store.last_seq() {
            return SyncDirective::Duplicate;
        }
        if self.record_arrival(batch.len(), now) {
            info!(
                "burst of change events on draft {}; falling back to refetch",
                batch.draft_id
            );
            self.schedule_refetch(now);
        }
        if self.refetch_pending() {
            return SyncDirective::Deferred;
        }

        match store.apply_batch(batch) {
            Ok(ApplyOutcome::Applied) => SyncDirective::Applied,
            Ok(ApplyOutcome::Duplicate) => SyncDirective::Duplicate,
            Ok(ApplyOutcome::Ignored) => SyncDirective::Ignored,
            Ok(ApplyOutcome::Gap { expected, got }) => {
                warn!("change sequence gap: expected {}, got {}", expected, got);
                self.schedule_refetch(now);
                SyncDirective::Deferred
            }
            Err(e) => {
                warn!("could not apply change batch {}: {}", batch.seq, e);
                self.schedule_refetch(now);
                SyncDirective::Deferred
            }
        }
    }

    /// The subscription dropped `skipped` batches.
    pub fn record_lag(&mut self, skipped: u64, now: Instant) {
        warn!("change subscription lagged by {} batches", skipped);
        self.schedule_refetch(now);
    }

    /// The subscription itself failed; reads continue from cached state.
    pub fn record_error(&mut self, error: SyncError, now: Instant) {
        warn!("{}", error);
        self.last_error = Some(error);
        self.schedule_refetch(now);
        self.health = SubscriptionHealth::Failed;
    }

    /// Request a debounced refetch. Repeated requests push the deadline out,
    /// but never beyond four debounce periods after the first request.
    pub fn schedule_refetch(&mut self, now: Instant) {
        let debounce = self.settings.refetch_debounce;
        let first = *self.refetch_first_requested.get_or_insert(now);
        let due = (now + debounce).min(first + debounce * 4);
        self.refetch_due = Some(due);
        if self.health == SubscriptionHealth::Subscribed {
            self.health = SubscriptionHealth::Degraded;
        }
        debug!("refetch scheduled in {:?}", due.saturating_duration_since(now));
    }

    /// Install a freshly fetched snapshot and resume patching.
    pub fn complete_refetch(&mut self, store: &mut DraftStore, snapshot: Snapshot) {
        store.replace_snapshot(snapshot);
        self.refetch_due = None;
        self.refetch_first_requested = None;
        self.arrivals.clear();
        self.health = SubscriptionHealth::Subscribed;
        self.last_error = None;
        info!("store resynchronized at seq {}", store.last_seq());
    }

    // Returns true when the arrival pushes the window over the threshold.
    fn record_arrival(&mut self, events: usize, now: Instant) -> bool {
        self.arrivals.push_back((now, events));
        while let Some(&(at, _)) = self.arrivals.front() {
            if now.saturating_duration_since(at) > self.settings.burst_window {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
        let total: usize = self.arrivals.iter().map(|&(_, n)| n).sum();
        total > self.settings.burst_threshold
    }
}
