use crate::admission::{ResolvedPlayer, ResolvedPossession, Side};
use crate::rosters::ARCHETYPE_COUNT;

/// Per-side feature vector: entry = sum of side-appropriate skill z-scores of
/// the players sharing that archetype. Always exactly `ARCHETYPE_COUNT` wide;
/// a slot with no contributing players is exactly 0.
pub type ZRow = [f64; ARCHETYPE_COUNT];

/// Aggregation is a sum, not an average: a lineup stacking several high-skill
/// players of one archetype accumulates weight in that slot, so saturation
/// effects are left for the estimation stage to detect.
pub fn side_zrow(players: &[ResolvedPlayer; 5], side: Side) -> ZRow {
    let mut row = [0.0; ARCHETYPE_COUNT];
    for p in players {
        let z = match side {
            Side::Offense => p.off_z,
            Side::Defense => p.def_z,
        };
        row[usize::from(p.archetype)] += z;
    }
    row
}

/// Offense and defense Z-rows for an admitted possession. Pure and
/// deterministic: the same input always yields identical rows.
pub fn zrows(poss: &ResolvedPossession) -> (ZRow, ZRow) {
    (
        side_zrow(&poss.offense, Side::Offense),
        side_zrow(&poss.defense, Side::Defense),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: u32, archetype: u8, off_z: f64, def_z: f64) -> ResolvedPlayer {
        ResolvedPlayer {
            player: id,
            archetype,
            off_z,
            def_z,
            imputed: false,
        }
    }

    fn possession() -> ResolvedPossession {
        ResolvedPossession {
            poss_id: 1,
            season: "s".into(),
            y: 2.0,
            offense: [
                player(1, 0, 1.5, 0.0),
                player(2, 0, 0.5, 0.0),
                player(3, 3, -0.25, 0.0),
                player(4, 5, 0.75, 0.0),
                player(5, 7, 0.0, 0.0),
            ],
            defense: [
                player(6, 1, 0.0, 0.8),
                player(7, 1, 0.0, 0.2),
                player(8, 2, 0.0, -0.4),
                player(9, 4, 0.0, 1.1),
                player(10, 6, 0.0, 0.0),
            ],
        }
    }

    #[test]
    fn shared_archetypes_accumulate_by_sum() {
        let (off, def) = zrows(&possession());
        assert_eq!(off.len(), ARCHETYPE_COUNT);
        assert_eq!(off[0], 2.0);
        assert_eq!(off[3], -0.25);
        assert_eq!(off[5], 0.75);
        assert_eq!(off[1], 0.0);
        assert_eq!(def[1], 1.0);
        assert_eq!(def[2], -0.4);
        assert_eq!(def[0], 0.0);
    }

    #[test]
    fn unrepresented_slots_are_exactly_zero() {
        let (off, _) = zrows(&possession());
        for slot in [1usize, 2, 4, 6] {
            assert_eq!(off[slot], 0.0);
        }
    }

    #[test]
    fn aggregation_is_idempotent() {
        let poss = possession();
        let first = zrows(&poss);
        let second = zrows(&poss);
        assert_eq!(first.0, second.0);
        assert_eq!(first.1, second.1);
    }
}
