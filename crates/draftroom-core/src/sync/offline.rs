// Queue of draft actions attempted while disconnected.
//
// Each action keeps its idempotency key across replays so a retry that races
// a delayed original can never apply twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::draft::model::ItemId;
use crate::error::SyncError;

/// Replay priority; higher replays first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    Low,
    Normal,
    High,
}

/// A client intent, as sent over the wire and as queued offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DraftAction {
    Pick { item_id: ItemId },
    Nominate { item_id: ItemId, starting_bid: u32 },
    Bid { amount: u32 },
    UndoLastPick,
    CancelAuction,
    Start,
    Pause,
    Resume,
    AddToWishlist { item_id: ItemId },
    RemoveFromWishlist { item_id: ItemId },
    ReorderWishlist { item_ids: Vec<ItemId> },
}

impl DraftAction {
    pub fn default_priority(&self) -> ActionPriority {
        match self {
            DraftAction::Pick { .. } | DraftAction::Nominate { .. } | DraftAction::Bid { .. } => {
                ActionPriority::High
            }
            DraftAction::UndoLastPick
            | DraftAction::CancelAuction
            | DraftAction::Start
            | DraftAction::Pause
            | DraftAction::Resume => ActionPriority::Normal,
            DraftAction::AddToWishlist { .. }
            | DraftAction::RemoveFromWishlist { .. }
            | DraftAction::ReorderWishlist { .. } => ActionPriority::Low,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            DraftAction::Pick { .. } => "pick",
            DraftAction::Nominate { .. } => "nominate",
            DraftAction::Bid { .. } => "bid",
            DraftAction::UndoLastPick => "undo",
            DraftAction::CancelAuction => "cancel auction",
            DraftAction::Start => "start",
            DraftAction::Pause => "pause",
            DraftAction::Resume => "resume",
            DraftAction::AddToWishlist { .. } => "wishlist add",
            DraftAction::RemoveFromWishlist { .. } => "wishlist remove",
            DraftAction::ReorderWishlist { .. } => "wishlist reorder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Idempotency key, reused on every replay.
    pub key: String,
    pub participant_id: String,
    pub action: DraftAction,
    pub priority: ActionPriority,
    pub queued_at: DateTime<Utc>,
    /// Failed replays so far.
    pub attempts: u32,
}

/// Outcome of one replay pass.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub applied: Vec<String>,
    pub requeued: Vec<String>,
    pub dropped: Vec<SyncError>,
    /// Replay stopped early because the connection dropped again.
    pub interrupted: bool,
}

#[derive(Debug)]
pub struct OfflineQueue {
    items: Vec<QueuedAction>,
    max_retries: u32,
}

impl OfflineQueue {
    pub fn new(max_retries: u32) -> Self {
        OfflineQueue {
            items: Vec::new(),
            max_retries: max_retries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pending(&self) -> &[QueuedAction] {
        &self.items
    }

    pub fn enqueue(&mut self, key: String, participant_id: &str, action: DraftAction) -> &QueuedAction {
        self.enqueue_at(key, participant_id, action, Utc::now())
    }

    pub fn enqueue_at(
        &mut self,
        key: String,
        participant_id: &str,
        action: DraftAction,
        at: DateTime<Utc>,
    ) -> &QueuedAction {
        info!("queued offline {} ({})", action.label(), key);
        let queued = QueuedAction {
            key,
            participant_id: participant_id.to_string(),
            priority: action.default_priority(),
            action,
            queued_at: at,
            attempts: 0,
        };
        self.items.push(queued);
        let last = self.items.len() - 1;
        &self.items[last]
    }

    /// Take every queued action, highest priority first and oldest first
    /// within a priority. Ties keep insertion order.
    pub fn drain_ordered(&mut self) -> Vec<QueuedAction> {
        let mut items = std::mem::take(&mut self.items);
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.queued_at.cmp(&b.queued_at))
        });
        items
    }

    /// Put back an action whose replay failed validation. Once it has failed
    /// `max_retries` times it is dropped and reported instead.
    pub fn requeue_failed(&mut self, mut action: QueuedAction, reason: &str) -> Result<(), SyncError> {
        action.attempts += 1;
        if action.attempts >= self.max_retries {
            warn!(
                "dropping offline {} ({}) after {} attempts: {}",
                action.action.label(),
                action.key,
                action.attempts,
                reason
            );
            return Err(SyncError::OfflineQueueReplayFailed {
                key: action.key,
                attempts: action.attempts,
                reason: reason.to_string(),
            });
        }
        self.items.push(action);
        Ok(())
    }

    /// Put back an action that was not attempted (connection dropped).
    pub fn restore(&mut self, action: QueuedAction) {
        self.items.push(action);
    }
}
