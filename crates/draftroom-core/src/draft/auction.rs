// Auction state machine: nomination rotation, bid acceptance, countdown and
// settlement.
//
// Phases are derived from the store rather than kept separately:
//   Idle       draft not active
//   Nominating draft active, no active auction
//   Bidding    active auction with time remaining
//   Settling   active auction whose timer reached zero
// Every transition is produced as a plan and committed by the repository
// with a conditional write.

use super::ledger::{check_item, participant, team_of};
use super::model::{new_id, Auction, AuctionStatus, Bid, DraftMode, DraftStatus, ItemId, Pick, Team};
use super::store::DraftStore;
use crate::catalog::FormatResolver;
use crate::error::Rejection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionPhase {
    Idle,
    Nominating,
    Bidding,
    Settling,
}

pub fn phase(store: &DraftStore) -> AuctionPhase {
    let Some(draft) = store.draft() else {
        return AuctionPhase::Idle;
    };
    if draft.mode != DraftMode::Auction || draft.status != DraftStatus::Active {
        return AuctionPhase::Idle;
    }
    match store.active_auction() {
        Some(a) if a.time_remaining > 0 => AuctionPhase::Bidding,
        Some(_) => AuctionPhase::Settling,
        None => AuctionPhase::Nominating,
    }
}

/// A team may nominate (and win) while it has open roster slots and can
/// afford the minimum opening bid.
pub fn is_eligible(store: &DraftStore, team: &Team) -> bool {
    let Some(draft) = store.draft() else {
        return false;
    };
    store.team_pick_count(&team.id) < draft.settings.roster_size
        && team.budget_remaining >= draft.settings.starting_bid_floor()
}

/// The team whose nomination it is, with its distance (in draft-order
/// positions) from the nominal rotation slot at `current_turn`. Ineligible
/// teams are skipped.
pub fn nominator(store: &DraftStore) -> Option<(&Team, u32)> {
    let draft = store.draft()?;
    let teams = store.teams_in_order();
    let n = teams.len();
    if n == 0 || draft.current_turn == 0 {
        return None;
    }
    let start = (draft.current_turn as usize - 1) % n;
    (0..n)
        .map(|offset| (teams[(start + offset) % n], offset as u32))
        .find(|(team, _)| is_eligible(store, team))
}

/// Whether at least one legal item is still unpicked.
pub fn has_open_items(store: &DraftStore, resolver: &FormatResolver) -> bool {
    let Some(draft) = store.draft() else {
        return false;
    };
    resolver
        .legal_ids(&draft.format)
        .into_iter()
        .any(|id| !store.is_picked(id))
}

/// The auction draft is finished when nobody can nominate or nothing legal
/// remains.
pub fn is_finished(store: &DraftStore, resolver: &FormatResolver) -> bool {
    nominator(store).is_none() || !has_open_items(store, resolver)
}

// ---------------------------------------------------------------------------
// Nomination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NominationPlan {
    pub draft_id: String,
    pub expected_turn: u32,
    pub auction: Auction,
}

pub fn plan_nomination(
    store: &DraftStore,
    resolver: &FormatResolver,
    participant_id: &str,
    item_id: ItemId,
    starting_bid: u32,
) -> Result<NominationPlan, Rejection> {
    participant(store, participant_id)?;
    let draft = store.draft().ok_or(Rejection::DraftNotActive {
        status: DraftStatus::Setup,
    })?;
    if draft.status != DraftStatus::Active {
        return Err(Rejection::DraftNotActive {
            status: draft.status,
        });
    }
    if draft.mode != DraftMode::Auction {
        return Err(Rejection::WrongMode { mode: draft.mode });
    }
    if store.active_auction().is_some() {
        return Err(Rejection::AuctionInProgress);
    }

    let team = team_of(store, participant_id)?;
    match nominator(store) {
        Some((up, _)) if up.id == team.id => {}
        _ => return Err(Rejection::NotInRotation),
    }

    let (item_name, _format_cost) = check_item(resolver, &draft.format, item_id)?;
    if store.is_picked(item_id) {
        return Err(Rejection::AlreadyTaken { item_id });
    }
    let minimum = draft.settings.starting_bid_floor();
    if starting_bid < minimum {
        return Err(Rejection::StartingBidTooLow {
            amount: starting_bid,
            minimum,
        });
    }
    if starting_bid > team.budget_remaining {
        return Err(Rejection::InsufficientBudget {
            cost: starting_bid,
            remaining: team.budget_remaining,
        });
    }

    Ok(NominationPlan {
        draft_id: draft.id.clone(),
        expected_turn: draft.current_turn,
        auction: Auction {
            id: new_id(),
            draft_id: draft.id.clone(),
            item_id,
            item_name,
            starting_bid,
            current_bid: starting_bid,
            current_bidder_id: team.id.clone(),
            time_remaining: draft.settings.auction_timer_seconds,
            status: AuctionStatus::Active,
            nominated_by: team.id.clone(),
        },
    })
}

// ---------------------------------------------------------------------------
// Bidding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidPlan {
    pub draft_id: String,
    pub auction_id: String,
    /// High bid and bidder the plan was validated against.
    pub expected_bid: u32,
    pub expected_bidder: String,
    pub bid: Bid,
    /// Anti-snipe: the timer always returns to the full duration.
    pub reset_to: u32,
}

/// Validate a bid. Rejection order: no open auction, self-outbid, amount not
/// above the high bid, over budget, roster full.
pub fn plan_bid(store: &DraftStore, participant_id: &str, amount: u32) -> Result<BidPlan, Rejection> {
    participant(store, participant_id)?;
    let draft = store.draft().ok_or(Rejection::AuctionNotActive)?;
    if draft.mode != DraftMode::Auction {
        return Err(Rejection::WrongMode { mode: draft.mode });
    }
    if draft.status != DraftStatus::Active {
        return Err(Rejection::DraftNotActive {
            status: draft.status,
        });
    }
    let auction = store
        .active_auction()
        .filter(|a| a.time_remaining > 0)
        .ok_or(Rejection::AuctionNotActive)?;

    let team = team_of(store, participant_id)?;
    if auction.current_bidder_id == team.id {
        return Err(Rejection::BidderIsCurrentHighBidder);
    }
    if amount <= auction.current_bid {
        return Err(Rejection::BidTooLow {
            amount,
            current: auction.current_bid,
        });
    }
    if amount > team.budget_remaining {
        return Err(Rejection::InsufficientBudget {
            cost: amount,
            remaining: team.budget_remaining,
        });
    }
    if store.team_pick_count(&team.id) >= draft.settings.roster_size {
        return Err(Rejection::RosterFull {
            size: draft.settings.roster_size,
        });
    }

    Ok(BidPlan {
        draft_id: draft.id.clone(),
        auction_id: auction.id.clone(),
        expected_bid: auction.current_bid,
        expected_bidder: auction.current_bidder_id.clone(),
        bid: Bid {
            id: new_id(),
            auction_id: auction.id.clone(),
            team_id: team.id.clone(),
            amount,
            bidder_name: team.name.clone(),
        },
        reset_to: draft.settings.auction_timer_seconds,
    })
}

// ---------------------------------------------------------------------------
// Countdown and settlement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running { time_remaining: u32 },
    Expired,
}

/// Advance an auction's countdown by `elapsed_secs`.
pub fn tick(auction: &Auction, elapsed_secs: u32) -> TickOutcome {
    match auction.time_remaining.saturating_sub(elapsed_secs) {
        0 => TickOutcome::Expired,
        left => TickOutcome::Running {
            time_remaining: left,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub draft_id: String,
    pub auction_id: String,
    pub expected_bid: u32,
    pub expected_bidder: String,
    pub expected_turn: u32,
    /// Winner's pick at the high bid.
    pub pick: Pick,
    pub next_turn: u32,
    pub next_round: u32,
    /// Nobody can nominate after this settlement, or nothing legal remains.
    pub completes: bool,
}

/// Plan settlement of the active auction to its high bidder. Zero-bid
/// auctions settle to the nominator at the starting price.
pub fn plan_settlement(store: &DraftStore, resolver: &FormatResolver) -> Result<SettlementPlan, Rejection> {
    let draft = store.draft().ok_or(Rejection::AuctionNotActive)?;
    let auction = store.active_auction().ok_or(Rejection::AuctionNotActive)?;
    let winner = store
        .team(&auction.current_bidder_id)
        .ok_or(Rejection::StaleState)?;

    let teams = store.teams_in_order();
    let n = teams.len().max(1) as u32;
    let offset = nominator(store).map_or(0, |(_, offset)| offset);
    let next_turn = draft.current_turn + offset + 1;

    // Eligibility once this pick lands.
    let floor = draft.settings.starting_bid_floor();
    let roster_size = draft.settings.roster_size;
    let anyone_eligible = teams.iter().any(|t| {
        let (picks, budget) = if t.id == winner.id {
            (
                store.team_pick_count(&t.id) + 1,
                t.budget_remaining.saturating_sub(auction.current_bid),
            )
        } else {
            (store.team_pick_count(&t.id), t.budget_remaining)
        };
        picks < roster_size && budget >= floor
    });
    let items_left = resolver
        .legal_ids(&draft.format)
        .into_iter()
        .any(|id| id != auction.item_id && !store.is_picked(id));

    Ok(SettlementPlan {
        draft_id: draft.id.clone(),
        auction_id: auction.id.clone(),
        expected_bid: auction.current_bid,
        expected_bidder: auction.current_bidder_id.clone(),
        expected_turn: draft.current_turn,
        pick: Pick {
            id: new_id(),
            draft_id: draft.id.clone(),
            team_id: winner.id.clone(),
            item_id: auction.item_id,
            item_name: auction.item_name.clone(),
            cost: auction.current_bid,
            pick_order: store.next_pick_order(),
            round: store.team_pick_count(&winner.id) + 1,
        },
        next_turn,
        next_round: (next_turn - 1) / n + 1,
        completes: !anyone_eligible || !items_left,
    })
}

/// Host-only cancellation of the active auction. Returns its id.
pub fn plan_cancel(store: &DraftStore, participant_id: &str) -> Result<String, Rejection> {
    let actor = participant(store, participant_id)?;
    if !actor.can_administer() {
        return Err(Rejection::NotPermitted {
            action: "cancel auctions".to_string(),
        });
    }
    store
        .active_auction()
        .map(|a| a.id.clone())
        .ok_or(Rejection::AuctionNotActive)
}
