// Wishlist auto-pick resolution and wishlist editing.
//
// Editing functions return the participant's complete new list with
// priorities resequenced to 1..=len; the repository persists that list as a
// whole.

use super::ledger::participant;
use super::model::{new_id, DraftMode, ItemId, WishlistItem};
use super::store::DraftStore;
use crate::catalog::FormatResolver;
use crate::error::Rejection;

/// First wishlist entry of the team's owner that is legal, unpicked and
/// affordable, in ascending priority. Entries that fail are skipped, never
/// removed.
///
/// Affordability is the resolved cost in snake drafts and the minimum
/// opening bid in auction drafts.
pub fn next_pick(store: &DraftStore, resolver: &FormatResolver, team_id: &str) -> Option<ItemId> {
    let draft = store.draft()?;
    let team = store.team(team_id)?;
    store
        .wishlist_for(&team.owner_id)
        .into_iter()
        .find(|entry| {
            let v = resolver.validate(entry.item_id, &draft.format);
            let price = match draft.mode {
                DraftMode::Snake => v.cost,
                DraftMode::Auction => draft.settings.starting_bid_floor(),
            };
            v.legal && !store.is_picked(entry.item_id) && price <= team.budget_remaining
        })
        .map(|entry| entry.item_id)
}

/// Sort by priority and renumber from 1.
pub fn resequence(entries: &mut [WishlistItem]) {
    entries.sort_by_key(|e| e.priority);
    for (i, e) in entries.iter_mut().enumerate() {
        e.priority = i as u32 + 1;
    }
}

/// Priorities form exactly `1..=len`.
pub fn is_contiguous(entries: &[WishlistItem]) -> bool {
    let mut priorities: Vec<u32> = entries.iter().map(|e| e.priority).collect();
    priorities.sort_unstable();
    priorities
        .iter()
        .enumerate()
        .all(|(i, &p)| p == i as u32 + 1)
}

/// Recompute `is_available` and `cost`. Returns whether anything changed.
pub fn refresh_availability(
    entries: &mut [WishlistItem],
    store: &DraftStore,
    resolver: &FormatResolver,
) -> bool {
    let Some(draft) = store.draft() else {
        return false;
    };
    let mut changed = false;
    for e in entries.iter_mut() {
        let v = resolver.validate(e.item_id, &draft.format);
        let available = v.legal && !store.is_picked(e.item_id);
        if e.is_available != available || e.cost != v.cost {
            e.is_available = available;
            e.cost = v.cost;
            changed = true;
        }
    }
    changed
}

fn current_entries(store: &DraftStore, participant_id: &str) -> Vec<WishlistItem> {
    store
        .wishlist_for(participant_id)
        .into_iter()
        .cloned()
        .collect()
}

/// Append an item at the lowest priority.
pub fn add_entry(
    store: &DraftStore,
    resolver: &FormatResolver,
    participant_id: &str,
    item_id: ItemId,
) -> Result<Vec<WishlistItem>, Rejection> {
    let p = participant(store, participant_id)?;
    let draft = store.draft().ok_or(Rejection::NoTeam)?;
    if resolver.item(item_id).is_none() {
        return Err(Rejection::UnknownItem { item_id });
    }
    let mut entries = current_entries(store, participant_id);
    if entries.iter().any(|e| e.item_id == item_id) {
        return Err(Rejection::DuplicateWishlistEntry { item_id });
    }

    let v = resolver.validate(item_id, &draft.format);
    entries.push(WishlistItem {
        id: new_id(),
        draft_id: draft.id.clone(),
        participant_id: p.id.clone(),
        item_id,
        priority: entries.len() as u32 + 1,
        is_available: v.legal && !store.is_picked(item_id),
        cost: v.cost,
    });
    resequence(&mut entries);
    Ok(entries)
}

pub fn remove_entry(
    store: &DraftStore,
    participant_id: &str,
    item_id: ItemId,
) -> Result<Vec<WishlistItem>, Rejection> {
    participant(store, participant_id)?;
    let mut entries = current_entries(store, participant_id);
    let before = entries.len();
    entries.retain(|e| e.item_id != item_id);
    if entries.len() == before {
        return Err(Rejection::UnknownItem { item_id });
    }
    resequence(&mut entries);
    Ok(entries)
}

/// Reorder to match `order`, which must list every current item exactly
/// once.
pub fn reorder(
    store: &DraftStore,
    participant_id: &str,
    order: &[ItemId],
) -> Result<Vec<WishlistItem>, Rejection> {
    participant(store, participant_id)?;
    let mut entries = current_entries(store, participant_id);
    if order.len() != entries.len() {
        return Err(Rejection::InvalidReorder);
    }
    for e in entries.iter_mut() {
        let position = order
            .iter()
            .position(|&id| id == e.item_id)
            .ok_or(Rejection::InvalidReorder)?;
        e.priority = position as u32 + 1;
    }
    if !is_contiguous(&entries) {
        return Err(Rejection::InvalidReorder);
    }
    resequence(&mut entries);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::ledger::tests::resolver;
    use crate::draft::store::tests::{pick, store_with};
    use crate::sync::event::{ChangeEvent, Table};

    fn with_wishlist(store: &mut DraftStore, participant_id: &str, items: &[ItemId]) {
        for (i, &item_id) in items.iter().enumerate() {
            let entry = WishlistItem {
                id: format!("w-{participant_id}-{item_id}"),
                draft_id: "d1".into(),
                participant_id: participant_id.into(),
                item_id,
                priority: i as u32 + 1,
                is_available: true,
                cost: 10,
            };
            store
                .apply_event(&ChangeEvent::insert(Table::WishlistItems, &entry).unwrap())
                .unwrap();
        }
    }

    #[test]
    fn next_pick_skips_illegal_taken_and_unaffordable() {
        let mut store = store_with(DraftMode::Snake, 2, 2);
        // 133 banned, 143 costs 150, 25 taken, 7 fine.
        with_wishlist(&mut store, "p1", &[133, 143, 25, 7, 4]);
        store
            .apply_event(&ChangeEvent::insert(Table::Picks, &pick(1, "t2", 25, 10)).unwrap())
            .unwrap();
        assert_eq!(next_pick(&store, &resolver(), "t1"), Some(7));
        // Skipped entries stay on the list.
        assert_eq!(store.wishlist_for("p1").len(), 5);
    }

    #[test]
    fn next_pick_none_when_nothing_qualifies() {
        let mut store = store_with(DraftMode::Snake, 2, 2);
        assert_eq!(next_pick(&store, &resolver(), "t1"), None);
        with_wishlist(&mut store, "p1", &[133]);
        assert_eq!(next_pick(&store, &resolver(), "t1"), None);
    }

    #[test]
    fn add_remove_and_reorder_keep_priorities_contiguous() {
        let mut store = store_with(DraftMode::Snake, 2, 2);
        with_wishlist(&mut store, "p1", &[1, 4, 7]);
        let r = resolver();

        let added = add_entry(&store, &r, "p1", 25).unwrap();
        assert!(is_contiguous(&added));
        assert_eq!(added.last().unwrap().item_id, 25);
        assert_eq!(added.last().unwrap().priority, 4);

        let removed = remove_entry(&store, "p1", 4).unwrap();
        assert!(is_contiguous(&removed));
        let ids: Vec<ItemId> = removed.iter().map(|e| e.item_id).collect();
        assert_eq!(ids, vec![1, 7]);

        let reordered = reorder(&store, "p1", &[7, 1, 4]).unwrap();
        assert!(is_contiguous(&reordered));
        let ids: Vec<ItemId> = reordered.iter().map(|e| e.item_id).collect();
        assert_eq!(ids, vec![7, 1, 4]);
    }

    #[test]
    fn editing_rejections() {
        let mut store = store_with(DraftMode::Snake, 2, 2);
        with_wishlist(&mut store, "p1", &[1, 4]);
        let r = resolver();
        assert_eq!(
            add_entry(&store, &r, "p1", 4),
            Err(Rejection::DuplicateWishlistEntry { item_id: 4 })
        );
        assert_eq!(
            add_entry(&store, &r, "p1", 9999),
            Err(Rejection::UnknownItem { item_id: 9999 })
        );
        assert_eq!(
            remove_entry(&store, "p1", 7),
            Err(Rejection::UnknownItem { item_id: 7 })
        );
        assert_eq!(reorder(&store, "p1", &[1]), Err(Rejection::InvalidReorder));
        assert_eq!(reorder(&store, "p1", &[1, 1]), Err(Rejection::InvalidReorder));
        assert_eq!(reorder(&store, "p1", &[1, 7]), Err(Rejection::InvalidReorder));
    }

    #[test]
    fn resequence_closes_gaps() {
        let mut store = store_with(DraftMode::Snake, 2, 2);
        with_wishlist(&mut store, "p1", &[1, 4, 7]);
        let mut entries: Vec<WishlistItem> =
            store.wishlist_for("p1").into_iter().cloned().collect();
        entries[0].priority = 3;
        entries[1].priority = 9;
        entries[2].priority = 5;
        assert!(!is_contiguous(&entries));
        resequence(&mut entries);
        assert!(is_contiguous(&entries));
        let ids: Vec<ItemId> = entries.iter().map(|e| e.item_id).collect();
        assert_eq!(ids, vec![1, 7, 4]);
    }

    #[test]
    fn refresh_marks_taken_items_unavailable() {
        let mut store = store_with(DraftMode::Snake, 2, 2);
        with_wishlist(&mut store, "p1", &[1, 25]);
        store
            .apply_event(&ChangeEvent::insert(Table::Picks, &pick(1, "t2", 25, 10)).unwrap())
            .unwrap();
        let mut entries: Vec<WishlistItem> =
            store.wishlist_for("p1").into_iter().cloned().collect();
        assert!(refresh_availability(&mut entries, &store, &resolver()));
        assert!(entries[0].is_available);
        assert!(!entries[1].is_available);
        assert!(!refresh_availability(&mut entries, &store, &resolver()));
    }
}
