// Draft records: drafts, teams, participants, picks, auctions, bids and
// wishlist entries. These are the row shapes persisted by the repository and
// carried inside change events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog item identifier (national dex number).
pub type ItemId = u32;

/// Generate a fresh record identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// How turns are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftMode {
    Snake,
    Auction,
}

impl DraftMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftMode::Snake => "snake",
            DraftMode::Auction => "auction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "snake" => Some(DraftMode::Snake),
            "auction" => Some(DraftMode::Auction),
            _ => None,
        }
    }
}

impl fmt::Display for DraftMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Draft lifecycle. `Completed` is terminal except through undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Setup,
    Active,
    Paused,
    Completed,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Setup => "setup",
            DraftStatus::Active => "active",
            DraftStatus::Paused => "paused",
            DraftStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "setup" => Some(DraftStatus::Setup),
            "active" => Some(DraftStatus::Active),
            "paused" => Some(DraftStatus::Paused),
            "completed" => Some(DraftStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Active,
    Completed,
    Cancelled,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Active => "active",
            AuctionStatus::Completed => "completed",
            AuctionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AuctionStatus::Active),
            "completed" => Some(AuctionStatus::Completed),
            "cancelled" => Some(AuctionStatus::Cancelled),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Per-draft tunables, stored as a JSON column on the draft row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSettings {
    pub pick_timer_seconds: u32,
    pub auction_timer_seconds: u32,
    /// Picks per team; also the number of snake rounds.
    pub roster_size: u32,
    pub allow_undo: bool,
    /// Lowest opening bid a nomination may carry (never below 1).
    #[serde(default = "default_min_starting_bid")]
    pub min_starting_bid: u32,
}

fn default_min_starting_bid() -> u32 {
    1
}

impl DraftSettings {
    /// The effective minimum opening bid.
    pub fn starting_bid_floor(&self) -> u32 {
        self.min_starting_bid.max(1)
    }
}

impl Default for DraftSettings {
    fn default() -> Self {
        DraftSettings {
            pick_timer_seconds: 60,
            auction_timer_seconds: 30,
            roster_size: 6,
            allow_undo: true,
            min_starting_bid: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub name: String,
    pub host_id: String,
    /// Format/ruleset identifier resolved by the `FormatResolver`.
    pub format: String,
    pub budget_per_team: u32,
    pub max_teams: u32,
    pub mode: DraftMode,
    pub status: DraftStatus,
    /// 1-based index into the turn sequence (snake) or nomination counter
    /// (auction).
    pub current_turn: u32,
    pub current_round: u32,
    pub settings: DraftSettings,
    pub room_code: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub draft_id: String,
    pub name: String,
    /// Participant id of the owner.
    pub owner_id: String,
    pub budget_remaining: u32,
    /// 1..N, assigned in join order.
    pub draft_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub draft_id: String,
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub team_id: Option<String>,
    pub is_host: bool,
    #[serde(default)]
    pub is_admin: bool,
    /// Liveness hint only; never consulted for turn logic.
    pub last_seen: DateTime<Utc>,
}

impl Participant {
    /// Host and admins may run lifecycle actions and undo.
    pub fn can_administer(&self) -> bool {
        self.is_host || self.is_admin
    }

    /// Whether the participant has not been seen for longer than `threshold`.
    pub fn is_absent(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_seen) > threshold
    }
}

/// A committed pick. Immutable except through undo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pick {
    pub id: String,
    pub draft_id: String,
    pub team_id: String,
    pub item_id: ItemId,
    pub item_name: String,
    pub cost: u32,
    /// Global, monotonically increasing within a draft (1-based).
    pub pick_order: u32,
    pub round: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub id: String,
    pub draft_id: String,
    pub item_id: ItemId,
    pub item_name: String,
    pub starting_bid: u32,
    pub current_bid: u32,
    /// Team id of the high bidder (the nominator until someone outbids).
    pub current_bidder_id: String,
    pub time_remaining: u32,
    pub status: AuctionStatus,
    /// Team id of the nominator.
    pub nominated_by: String,
}

impl Auction {
    pub fn is_active(&self) -> bool {
        self.status == AuctionStatus::Active
    }
}

/// Append-only bid ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: String,
    pub auction_id: String,
    pub team_id: String,
    pub amount: u32,
    pub bidder_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishlistItem {
    pub id: String,
    pub draft_id: String,
    pub participant_id: String,
    pub item_id: ItemId,
    /// Contiguous from 1 per participant.
    pub priority: u32,
    pub is_available: bool,
    pub cost: u32,
}
