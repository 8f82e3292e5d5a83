// Normalized in-memory model of one draft.
//
// Entity maps are keyed by id; the ordered views (teams by draft order,
// picks by pick order, picked item set, team -> picks) and the snake turn
// order are derived and rebuilt after every applied batch. The store is only
// mutated through `apply_batch`, `apply_event` and `replace_snapshot`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::model::{Auction, Bid, Draft, DraftMode, ItemId, Participant, Pick, Team, WishlistItem};
use super::turn_order::TurnOrder;
use crate::sync::event::{ChangeBatch, ChangeEvent, Operation, Table};

/// Full state of one draft at change sequence `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub seq: u64,
    pub draft: Draft,
    pub teams: Vec<Team>,
    pub participants: Vec<Participant>,
    pub picks: Vec<Pick>,
    pub auctions: Vec<Auction>,
    pub bids: Vec<Bid>,
    pub wishlist: Vec<WishlistItem>,
}

/// Result of offering a batch to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Already reflected (`seq <= last_seq`).
    Duplicate,
    /// One or more batches are missing; the store was not touched.
    Gap { expected: u64, got: u64 },
    /// Belongs to a different draft.
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to decode {table} row: {source}")]
    Decode {
        table: &'static str,
        source: serde_json::Error,
    },
}

// Typed form of a change event, decoded before anything is mutated so a bad
// row leaves the store untouched.
enum RowChange {
    Draft(Operation, Draft),
    Team(Operation, Team),
    Participant(Operation, Participant),
    Pick(Operation, Pick),
    Auction(Operation, Auction),
    Bid(Operation, Bid),
    Wishlist(Operation, WishlistItem),
}

fn decode<T: for<'de> Deserialize<'de>>(event: &ChangeEvent) -> Result<T, StoreError> {
    serde_json::from_value(event.row.clone()).map_err(|source| StoreError::Decode {
        table: event.table.as_str(),
        source,
    })
}

impl RowChange {
    fn decode(event: &ChangeEvent) -> Result<Self, StoreError> {
        let op = event.operation;
        Ok(match event.table {
            Table::Drafts => RowChange::Draft(op, decode(event)?),
            Table::Teams => RowChange::Team(op, decode(event)?),
            Table::Participants => RowChange::Participant(op, decode(event)?),
            Table::Picks => RowChange::Pick(op, decode(event)?),
            Table::Auctions => RowChange::Auction(op, decode(event)?),
            Table::Bids => RowChange::Bid(op, decode(event)?),
            Table::WishlistItems => RowChange::Wishlist(op, decode(event)?),
        })
    }
}

fn upsert_or_remove<T>(map: &mut HashMap<String, T>, op: Operation, id: String, row: T) {
    match op {
        Operation::Insert | Operation::Update => {
            map.insert(id, row);
        }
        Operation::Delete => {
            map.remove(&id);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DraftStore {
    draft: Option<Draft>,
    teams: HashMap<String, Team>,
    participants: HashMap<String, Participant>,
    picks: HashMap<String, Pick>,
    auctions: HashMap<String, Auction>,
    bids: HashMap<String, Bid>,
    wishlist: HashMap<String, WishlistItem>,

    team_order: Vec<String>,
    pick_order: Vec<String>,
    picked_items: HashSet<ItemId>,
    team_picks: HashMap<String, Vec<String>>,
    turn_order: TurnOrder,
    last_seq: u64,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut store = Self::new();
        store.replace_snapshot(snapshot);
        store
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Replace all state with `snapshot` (initial load and refetch).
    pub fn replace_snapshot(&mut self, snapshot: Snapshot) {
        fn keyed<T>(rows: Vec<T>, id: impl Fn(&T) -> String) -> HashMap<String, T> {
            rows.into_iter().map(|r| (id(&r), r)).collect()
        }
        self.teams = keyed(snapshot.teams, |t| t.id.clone());
        self.participants = keyed(snapshot.participants, |p| p.id.clone());
        self.picks = keyed(snapshot.picks, |p| p.id.clone());
        self.auctions = keyed(snapshot.auctions, |a| a.id.clone());
        self.bids = keyed(snapshot.bids, |b| b.id.clone());
        self.wishlist = keyed(snapshot.wishlist, |w| w.id.clone());
        self.draft = Some(snapshot.draft);
        self.last_seq = snapshot.seq;
        self.reindex();
        debug!("store replaced from snapshot at seq {}", self.last_seq);
    }

    /// Apply a batch if it is the next one in sequence.
    pub fn apply_batch(&mut self, batch: &ChangeBatch) -> Result<ApplyOutcome, StoreError> {
        if let Some(draft) = &self.draft {
            if draft.id != batch.draft_id {
                return Ok(ApplyOutcome::Ignored);
            }
        }
        if batch.seq <= self.last_seq {
            return Ok(ApplyOutcome::Duplicate);
        }
        if batch.seq != self.last_seq + 1 {
            return Ok(ApplyOutcome::Gap {
                expected: self.last_seq + 1,
                got: batch.seq,
            });
        }

        let changes = batch
            .events
            .iter()
            .map(RowChange::decode)
            .collect::<Result<Vec<_>, _>>()?;
        for change in changes {
            self.apply_change(change);
        }
        self.last_seq = batch.seq;
        self.reindex();
        Ok(ApplyOutcome::Applied)
    }

    /// Apply a single event outside of sequencing.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> Result<(), StoreError> {
        let change = RowChange::decode(event)?;
        self.apply_change(change);
        self.reindex();
        Ok(())
    }

    fn apply_change(&mut self, change: RowChange) {
        match change {
            RowChange::Draft(Operation::Delete, row) => {
                if self.draft.as_ref().is_some_and(|d| d.id == row.id) {
                    warn!("draft {} deleted remotely", row.id);
                    self.draft = None;
                }
            }
            RowChange::Draft(_, row) => self.draft = Some(row),
            RowChange::Team(op, row) => upsert_or_remove(&mut self.teams, op, row.id.clone(), row),
            RowChange::Participant(op, row) => {
                upsert_or_remove(&mut self.participants, op, row.id.clone(), row)
            }
            RowChange::Pick(op, row) => upsert_or_remove(&mut self.picks, op, row.id.clone(), row),
            RowChange::Auction(op, row) => {
                upsert_or_remove(&mut self.auctions, op, row.id.clone(), row)
            }
            RowChange::Bid(op, row) => upsert_or_remove(&mut self.bids, op, row.id.clone(), row),
            RowChange::Wishlist(op, row) => {
                upsert_or_remove(&mut self.wishlist, op, row.id.clone(), row)
            }
        }
    }

    fn reindex(&mut self) {
        let mut teams: Vec<&Team> = self.teams.values().collect();
        teams.sort_by(|a, b| a.draft_order.cmp(&b.draft_order).then_with(|| a.id.cmp(&b.id)));
        self.team_order = teams.into_iter().map(|t| t.id.clone()).collect();

        let mut picks: Vec<&Pick> = self.picks.values().collect();
        picks.sort_by_key(|p| p.pick_order);
        self.pick_order = picks.iter().map(|p| p.id.clone()).collect();
        self.picked_items = picks.iter().map(|p| p.item_id).collect();

        self.team_picks.clear();
        for p in picks {
            self.team_picks
                .entry(p.team_id.clone())
                .or_default()
                .push(p.id.clone());
        }

        let team_count = self.team_order.len() as u32;
        let roster_size = self.draft.as_ref().map_or(0, |d| d.settings.roster_size);
        if !self.turn_order.matches(team_count, roster_size) {
            debug!("turn order rebuilt for {} teams x {} rounds", team_count, roster_size);
            self.turn_order = TurnOrder::new(team_count, roster_size);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn turn_order(&self) -> &TurnOrder {
        &self.turn_order
    }

    pub fn team(&self, team_id: &str) -> Option<&Team> {
        self.teams.get(team_id)
    }

    /// Teams sorted by draft-order position.
    pub fn teams_in_order(&self) -> Vec<&Team> {
        self.team_order
            .iter()
            .filter_map(|id| self.teams.get(id))
            .collect()
    }

    pub fn team_count(&self) -> usize {
        self.team_order.len()
    }

    pub fn team_at_position(&self, draft_order: u32) -> Option<&Team> {
        self.teams_in_order()
            .into_iter()
            .find(|t| t.draft_order == draft_order)
    }

    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.get(participant_id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn participant_by_user(&self, user_id: &str) -> Option<&Participant> {
        self.participants.values().find(|p| p.user_id == user_id)
    }

    /// The team a participant drafts for.
    pub fn team_of(&self, participant_id: &str) -> Option<&Team> {
        self.participants
            .get(participant_id)
            .and_then(|p| p.team_id.as_deref())
            .and_then(|id| self.teams.get(id))
    }

    /// The participant who owns a team.
    pub fn owner_of(&self, team_id: &str) -> Option<&Participant> {
        let team = self.teams.get(team_id)?;
        self.participants.get(&team.owner_id)
    }

    /// The team on the clock in a snake draft.
    pub fn current_team(&self) -> Option<&Team> {
        let draft = self.draft.as_ref()?;
        if draft.mode != DraftMode::Snake {
            return None;
        }
        let position = self.turn_order.team_order_at(draft.current_turn)?;
        self.team_at_position(position)
    }

    pub fn picks_in_order(&self) -> Vec<&Pick> {
        self.pick_order
            .iter()
            .filter_map(|id| self.picks.get(id))
            .collect()
    }

    pub fn last_pick(&self) -> Option<&Pick> {
        self.pick_order.last().and_then(|id| self.picks.get(id))
    }

    pub fn pick_count(&self) -> usize {
        self.pick_order.len()
    }

    pub fn team_picks(&self, team_id: &str) -> Vec<&Pick> {
        self.team_picks
            .get(team_id)
            .map(|ids| ids.iter().filter_map(|id| self.picks.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn team_pick_count(&self, team_id: &str) -> u32 {
        self.team_picks.get(team_id).map_or(0, |ids| ids.len() as u32)
    }

    pub fn is_picked(&self, item_id: ItemId) -> bool {
        self.picked_items.contains(&item_id)
    }

    pub fn next_pick_order(&self) -> u32 {
        self.last_pick().map_or(1, |p| p.pick_order + 1)
    }

    pub fn auction(&self, auction_id: &str) -> Option<&Auction> {
        self.auctions.get(auction_id)
    }

    pub fn active_auction(&self) -> Option<&Auction> {
        self.auctions.values().find(|a| a.is_active())
    }

    pub fn active_auction_count(&self) -> usize {
        self.auctions.values().filter(|a| a.is_active()).count()
    }

    /// Bids for an auction, lowest first.
    pub fn bids_for(&self, auction_id: &str) -> Vec<&Bid> {
        let mut bids: Vec<&Bid> = self
            .bids
            .values()
            .filter(|b| b.auction_id == auction_id)
            .collect();
        bids.sort_by_key(|b| b.amount);
        bids
    }

    /// A participant's wishlist in priority order.
    pub fn wishlist_for(&self, participant_id: &str) -> Vec<&WishlistItem> {
        let mut entries: Vec<&WishlistItem> = self
            .wishlist
            .values()
            .filter(|w| w.participant_id == participant_id)
            .collect();
        entries.sort_by_key(|w| w.priority);
        entries
    }

    /// Copy the current state out as a snapshot.
    pub fn snapshot(&self) -> Option<Snapshot> {
        let draft = self.draft.clone()?;
        Some(Snapshot {
            seq: self.last_seq,
            draft,
            teams: self.teams_in_order().into_iter().cloned().collect(),
            participants: self.participants.values().cloned().collect(),
            picks: self.picks_in_order().into_iter().cloned().collect(),
            auctions: self.auctions.values().cloned().collect(),
            bids: self.bids.values().cloned().collect(),
            wishlist: self.wishlist.values().cloned().collect(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::draft::model::{AuctionStatus, DraftSettings, DraftStatus};
    use chrono::Utc;

    pub(crate) fn draft(mode: DraftMode, roster_size: u32) -> Draft {
        Draft {
            id: "d1".into(),
            name: "Test Draft".into(),
            host_id: "u1".into(),
            format: "ou".into(),
            budget_per_team: 100,
            max_teams: 8,
            mode,
            status: DraftStatus::Active,
            current_turn: 1,
            current_round: 1,
            settings: DraftSettings {
                roster_size,
                ..DraftSettings::default()
            },
            room_code: "ABC234".into(),
            password: None,
        }
    }

    pub(crate) fn team(n: u32) -> Team {
        Team {
            id: format!("t{n}"),
            draft_id: "d1".into(),
            name: format!("Team {n}"),
            owner_id: format!("p{n}"),
            budget_remaining: 100,
            draft_order: n,
        }
    }

    pub(crate) fn participant(n: u32) -> Participant {
        Participant {
            id: format!("p{n}"),
            draft_id: "d1".into(),
            user_id: format!("u{n}"),
            display_name: format!("Player {n}"),
            team_id: Some(format!("t{n}")),
            is_host: n == 1,
            is_admin: false,
            last_seen: Utc::now(),
        }
    }

    /// A store with `teams` teams in `mode` and the given roster size.
    pub(crate) fn store_with(mode: DraftMode, teams: u32, roster_size: u32) -> DraftStore {
        DraftStore::from_snapshot(Snapshot {
            seq: 1,
            draft: draft(mode, roster_size),
            teams: (1..=teams).map(team).collect(),
            participants: (1..=teams).map(participant).collect(),
            picks: vec![],
            auctions: vec![],
            bids: vec![],
            wishlist: vec![],
        })
    }

    pub(crate) fn pick(n: u32, team_id: &str, item_id: ItemId, cost: u32) -> Pick {
        Pick {
            id: format!("pk{n}"),
            draft_id: "d1".into(),
            team_id: team_id.into(),
            item_id,
            item_name: format!("Mon {item_id}"),
            cost,
            pick_order: n,
            round: 1,
        }
    }

    fn batch(seq: u64, events: Vec<ChangeEvent>) -> ChangeBatch {
        ChangeBatch {
            seq,
            draft_id: "d1".into(),
            events,
        }
    }

    #[test]
    fn snapshot_builds_indexes_and_turn_order() {
        let store = store_with(DraftMode::Snake, 4, 2);
        assert_eq!(store.team_count(), 4);
        assert_eq!(store.turn_order().sequence(), &[1, 2, 3, 4, 4, 3, 2, 1]);
        assert_eq!(store.current_team().unwrap().id, "t1");
        assert_eq!(store.last_seq(), 1);
        assert_eq!(store.team_of("p3").unwrap().id, "t3");
        assert_eq!(store.owner_of("t2").unwrap().id, "p2");
    }

    #[test]
    fn batch_applies_picks_and_updates() {
        let mut store = store_with(DraftMode::Snake, 2, 2);
        let mut t1 = team(1);
        t1.budget_remaining = 90;
        let mut d = draft(DraftMode::Snake, 2);
        d.current_turn = 2;

        let b = batch(
            2,
            vec![
                ChangeEvent::insert(Table::Picks, &pick(1, "t1", 25, 10)).unwrap(),
                ChangeEvent::update(Table::Teams, &t1).unwrap(),
                ChangeEvent::update(Table::Drafts, &d).unwrap(),
            ],
        );
        assert_eq!(store.apply_batch(&b).unwrap(), ApplyOutcome::Applied);
        assert!(store.is_picked(25));
        assert_eq!(store.team("t1").unwrap().budget_remaining, 90);
        assert_eq!(store.current_team().unwrap().id, "t2");
        assert_eq!(store.next_pick_order(), 2);
        assert_eq!(store.team_pick_count("t1"), 1);
        assert_eq!(store.last_seq(), 2);
    }

    #[test]
    fn duplicate_gap_and_foreign_batches() {
        let mut store = store_with(DraftMode::Snake, 2, 2);
        let b = batch(1, vec![]);
        assert_eq!(store.apply_batch(&b).unwrap(), ApplyOutcome::Duplicate);

        let b = batch(4, vec![ChangeEvent::insert(Table::Picks, &pick(1, "t1", 25, 10)).unwrap()]);
        assert_eq!(
            store.apply_batch(&b).unwrap(),
            ApplyOutcome::Gap { expected: 2, got: 4 }
        );
        assert!(!store.is_picked(25));

        let mut other = batch(2, vec![]);
        other.draft_id = "d9".into();
        assert_eq!(store.apply_batch(&other).unwrap(), ApplyOutcome::Ignored);
    }

    #[test]
    fn undecodable_row_leaves_store_untouched() {
        let mut store = store_with(DraftMode::Snake, 2, 2);
        let b = batch(
            2,
            vec![
                ChangeEvent::insert(Table::Picks, &pick(1, "t1", 25, 10)).unwrap(),
                ChangeEvent {
                    table: Table::Teams,
                    operation: Operation::Update,
                    row: serde_json::json!({"id": "t1"}),
                },
            ],
        );
        assert!(store.apply_batch(&b).is_err());
        assert!(!store.is_picked(25));
        assert_eq!(store.last_seq(), 1);
    }

    #[test]
    fn delete_removes_rows_and_reindexes() {
        let mut store = store_with(DraftMode::Snake, 2, 2);
        let p = pick(1, "t1", 25, 10);
        store
            .apply_event(&ChangeEvent::insert(Table::Picks, &p).unwrap())
            .unwrap();
        assert!(store.is_picked(25));
        store
            .apply_event(&ChangeEvent::delete(Table::Picks, &p).unwrap())
            .unwrap();
        assert!(!store.is_picked(25));
        assert!(store.last_pick().is_none());
    }

    #[test]
    fn turn_order_follows_team_count() {
        let mut store = store_with(DraftMode::Snake, 2, 3);
        assert_eq!(store.turn_order().len(), 6);
        store
            .apply_event(&ChangeEvent::insert(Table::Teams, &team(3)).unwrap())
            .unwrap();
        assert_eq!(store.turn_order().len(), 9);
        assert_eq!(store.turn_order().sequence()[..3], [1, 2, 3]);
    }

    #[test]
    fn active_auction_and_bids() {
        let mut store = store_with(DraftMode::Auction, 2, 2);
        let auction = Auction {
            id: "a1".into(),
            draft_id: "d1".into(),
            item_id: 25,
            item_name: "Pikachu".into(),
            starting_bid: 5,
            current_bid: 5,
            current_bidder_id: "t1".into(),
            time_remaining: 30,
            status: AuctionStatus::Active,
            nominated_by: "t1".into(),
        };
        store
            .apply_event(&ChangeEvent::insert(Table::Auctions, &auction).unwrap())
            .unwrap();
        for (i, amount) in [(1, 12), (2, 8)] {
            let bid = Bid {
                id: format!("b{i}"),
                auction_id: "a1".into(),
                team_id: "t2".into(),
                amount,
                bidder_name: "Team 2".into(),
            };
            store
                .apply_event(&ChangeEvent::insert(Table::Bids, &bid).unwrap())
                .unwrap();
        }
        assert_eq!(store.active_auction().unwrap().id, "a1");
        let amounts: Vec<u32> = store.bids_for("a1").iter().map(|b| b.amount).collect();
        assert_eq!(amounts, vec![8, 12]);
        assert!(store.current_team().is_none());
    }

    #[test]
    fn snapshot_round_trips_through_store() {
        let store = store_with(DraftMode::Snake, 3, 2);
        let snap = store.snapshot().unwrap();
        let copy = DraftStore::from_snapshot(snap.clone());
        assert_eq!(copy.snapshot().unwrap().teams, snap.teams);
        assert_eq!(copy.last_seq(), 1);
    }
}
