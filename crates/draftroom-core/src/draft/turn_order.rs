// Snake turn order.
//
// Round k (1-based) runs through draft positions 1..N when k is odd and
// N..1 when k is even. `current_turn` on the draft is a 1-based index into
// the flattened sequence.

/// Build the full snake sequence of draft-order positions for `team_count`
/// teams picking `roster_size` items each.
pub fn snake_order(team_count: u32, roster_size: u32) -> Vec<u32> {
    let mut sequence = Vec::with_capacity((team_count as usize) * (roster_size as usize));
    for round in 1..=roster_size {
        if round % 2 == 1 {
            sequence.extend(1..=team_count);
        } else {
            sequence.extend((1..=team_count).rev());
        }
    }
    sequence
}

/// A precomputed, immutable turn sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TurnOrder {
    team_count: u32,
    roster_size: u32,
    sequence: Vec<u32>,
}

impl TurnOrder {
    pub fn new(team_count: u32, roster_size: u32) -> Self {
        TurnOrder {
            team_count,
            roster_size,
            sequence: snake_order(team_count, roster_size),
        }
    }

    /// Whether this sequence was built for the given shape.
    pub fn matches(&self, team_count: u32, roster_size: u32) -> bool {
        self.team_count == team_count && self.roster_size == roster_size
    }

    pub fn team_count(&self) -> u32 {
        self.team_count
    }

    pub fn roster_size(&self) -> u32 {
        self.roster_size
    }

    pub fn sequence(&self) -> &[u32] {
        &self.sequence
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Draft-order position on the clock at `turn` (1-based). `None` once the
    /// sequence is exhausted.
    pub fn team_order_at(&self, turn: u32) -> Option<u32> {
        if turn == 0 {
            return None;
        }
        self.sequence.get(turn as usize - 1).copied()
    }

    /// Round containing `turn` (1-based).
    pub fn round_of(&self, turn: u32) -> u32 {
        if self.team_count == 0 || turn == 0 {
            return 1;
        }
        (turn - 1) / self.team_count + 1
    }

    /// True once `turn` has moved past the last slot.
    pub fn is_exhausted(&self, turn: u32) -> bool {
        turn as usize > self.sequence.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_teams_two_rounds() {
        assert_eq!(snake_order(4, 2), vec![1, 2, 3, 4, 4, 3, 2, 1]);
    }

    #[test]
    fn length_and_round_direction_hold_for_all_shapes() {
        for n in 1..=10u32 {
            for r in 1..=8u32 {
                let seq = snake_order(n, r);
                assert_eq!(seq.len(), (n * r) as usize);
                for (k, round) in seq.chunks(n as usize).enumerate() {
                    let forward: Vec<u32> = (1..=n).collect();
                    if (k + 1) % 2 == 1 {
                        assert_eq!(round, forward.as_slice(), "n={n} r={r} round={}", k + 1);
                    } else {
                        let backward: Vec<u32> = (1..=n).rev().collect();
                        assert_eq!(round, backward.as_slice(), "n={n} r={r} round={}", k + 1);
                    }
                }
            }
        }
    }

    #[test]
    fn empty_shapes_produce_empty_sequence() {
        assert!(snake_order(0, 5).is_empty());
        assert!(snake_order(5, 0).is_empty());
        assert!(TurnOrder::new(0, 0).is_exhausted(1));
    }

    #[test]
    fn team_lookup_and_rounds() {
        let order = TurnOrder::new(3, 3);
        assert_eq!(order.team_order_at(0), None);
        assert_eq!(order.team_order_at(1), Some(1));
        assert_eq!(order.team_order_at(3), Some(3));
        assert_eq!(order.team_order_at(4), Some(3));
        assert_eq!(order.team_order_at(6), Some(1));
        assert_eq!(order.team_order_at(7), Some(1));
        assert_eq!(order.team_order_at(10), None);

        assert_eq!(order.round_of(1), 1);
        assert_eq!(order.round_of(3), 1);
        assert_eq!(order.round_of(4), 2);
        assert_eq!(order.round_of(9), 3);
    }

    #[test]
    fn exhaustion_starts_after_last_slot() {
        let order = TurnOrder::new(2, 2);
        assert!(!order.is_exhausted(4));
        assert!(order.is_exhausted(5));
        assert!(order.matches(2, 2));
        assert!(!order.matches(3, 2));
    }
}
