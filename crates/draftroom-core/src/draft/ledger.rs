// Pick validation and budget accounting for snake drafts.
//
// Validation runs against the local store and produces a plan; nothing is
// mutated here. The repository applies a plan as one conditional
// transaction, so a plan built from stale state is refused at write time.

use super::model::{new_id, DraftMode, DraftStatus, ItemId, Participant, Pick, Team};
use super::store::DraftStore;
use crate::catalog::FormatResolver;
use crate::error::Rejection;

/// The four effects of a committed pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickCommit {
    pub draft_id: String,
    /// `current_turn` the plan was validated against.
    pub expected_turn: u32,
    pub pick: Pick,
    pub next_turn: u32,
    pub next_round: u32,
    /// The pick exhausts the turn sequence.
    pub completes: bool,
}

/// Reversal of the most recent pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoPlan {
    pub draft_id: String,
    pub expected_turn: u32,
    pub pick: Pick,
    pub restore_turn: u32,
    pub restore_round: u32,
    /// The draft had completed and goes back to `active`.
    pub reopen: bool,
}

/// A team whose remaining budget disagrees with its committed picks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetDrift {
    pub team_id: String,
    pub expected: i64,
    pub actual: u32,
}

pub(crate) fn participant<'a>(
    store: &'a DraftStore,
    participant_id: &str,
) -> Result<&'a Participant, Rejection> {
    store
        .participant(participant_id)
        .ok_or_else(|| Rejection::UnknownParticipant {
            participant_id: participant_id.to_string(),
        })
}

pub(crate) fn team_of<'a>(store: &'a DraftStore, participant_id: &str) -> Result<&'a Team, Rejection> {
    participant(store, participant_id)?;
    store.team_of(participant_id).ok_or(Rejection::NoTeam)
}

/// Legality of an item under the draft's format, as a rejection.
pub(crate) fn check_item(
    resolver: &FormatResolver,
    format: &str,
    item_id: ItemId,
) -> Result<(String, u32), Rejection> {
    let item = resolver
        .item(item_id)
        .ok_or(Rejection::UnknownItem { item_id })?;
    let v = resolver.validate(item_id, format);
    if !v.legal {
        return Err(Rejection::IllegalItem {
            item_id,
            reason: v.reason.unwrap_or_else(|| "not legal".to_string()),
        });
    }
    Ok((item.name.clone(), v.cost))
}

/// Validate a pick by `participant_id` and plan its commit.
///
/// Check order: draft active, snake mode, turn, legality, availability,
/// budget.
pub fn plan_pick(
    store: &DraftStore,
    resolver: &FormatResolver,
    participant_id: &str,
    item_id: ItemId,
) -> Result<PickCommit, Rejection> {
    participant(store, participant_id)?;
    let draft = store.draft().ok_or(Rejection::DraftNotActive {
        status: DraftStatus::Setup,
    })?;
    if draft.status != DraftStatus::Active {
        return Err(Rejection::DraftNotActive {
            status: draft.status,
        });
    }
    if draft.mode != DraftMode::Snake {
        return Err(Rejection::WrongMode { mode: draft.mode });
    }

    let team = team_of(store, participant_id)?;
    let on_clock = store.current_team().ok_or(Rejection::StaleState)?;
    if on_clock.id != team.id {
        return Err(Rejection::NotYourTurn {
            on_clock: on_clock.name.clone(),
        });
    }

    let (item_name, cost) = check_item(resolver, &draft.format, item_id)?;
    if store.is_picked(item_id) {
        return Err(Rejection::AlreadyTaken { item_id });
    }
    if cost > team.budget_remaining {
        return Err(Rejection::InsufficientBudget {
            cost,
            remaining: team.budget_remaining,
        });
    }

    let order = store.turn_order();
    let next_turn = draft.current_turn + 1;
    let completes = order.is_exhausted(next_turn);
    Ok(PickCommit {
        draft_id: draft.id.clone(),
        expected_turn: draft.current_turn,
        pick: Pick {
            id: new_id(),
            draft_id: draft.id.clone(),
            team_id: team.id.clone(),
            item_id,
            item_name,
            cost,
            pick_order: store.next_pick_order(),
            round: order.round_of(draft.current_turn),
        },
        next_turn,
        next_round: if completes {
            draft.current_round
        } else {
            order.round_of(next_turn)
        },
        completes,
    })
}

/// Plan the reversal of the most recent pick. Host/admin only, snake only,
/// and only when the draft allows undo.
pub fn plan_undo(store: &DraftStore, participant_id: &str) -> Result<UndoPlan, Rejection> {
    let actor = participant(store, participant_id)?;
    if !actor.can_administer() {
        return Err(Rejection::NotPermitted {
            action: "undo picks".to_string(),
        });
    }
    let draft = store.draft().ok_or(Rejection::NothingToUndo)?;
    if draft.mode != DraftMode::Snake {
        return Err(Rejection::WrongMode { mode: draft.mode });
    }
    if !draft.settings.allow_undo {
        return Err(Rejection::UndoNotAllowed);
    }
    if draft.status == DraftStatus::Setup {
        return Err(Rejection::InvalidTransition {
            action: "undo a pick".to_string(),
            status: draft.status,
        });
    }
    let pick = store.last_pick().ok_or(Rejection::NothingToUndo)?;
    let restore_turn = draft.current_turn.saturating_sub(1).max(1);

    Ok(UndoPlan {
        draft_id: draft.id.clone(),
        expected_turn: draft.current_turn,
        pick: pick.clone(),
        restore_turn,
        restore_round: store.turn_order().round_of(restore_turn),
        reopen: draft.status == DraftStatus::Completed,
    })
}

/// Check `budget_remaining == budget_per_team - sum(pick costs)` for every
/// team and report the ones that disagree.
pub fn audit_budgets(store: &DraftStore) -> Vec<BudgetDrift> {
    let Some(draft) = store.draft() else {
        return Vec::new();
    };
    store
        .teams_in_order()
        .into_iter()
        .filter_map(|team| {
            let spent: i64 = store.team_picks(&team.id).iter().map(|p| p.cost as i64).sum();
            let expected = draft.budget_per_team as i64 - spent;
            (expected != team.budget_remaining as i64).then(|| BudgetDrift {
                team_id: team.id.clone(),
                expected,
                actual: team.budget_remaining,
            })
        })
        .collect()
}
