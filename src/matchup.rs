use crate::admission::{RejectReason, Side};
use crate::rosters::{MATCHUP_COUNT, PlayerId, RosterRegistry, SUPERCLUSTER_COUNT};

/// Matchup id in `[0, MATCHUP_COUNT)`: offensive supercluster crossed with
/// the defensive one.
pub fn matchup_id(off_sc: u8, def_sc: u8) -> u16 {
    u16::from(off_sc) * SUPERCLUSTER_COUNT as u16 + u16::from(def_sc)
}

pub fn split_matchup(id: u16) -> (u8, u8) {
    (
        (usize::from(id) / SUPERCLUSTER_COUNT) as u8,
        (usize::from(id) % SUPERCLUSTER_COUNT) as u8,
    )
}

pub fn is_valid_matchup(id: u16) -> bool {
    usize::from(id) < MATCHUP_COUNT
}

/// Resolve both 5-player identity sets to superclusters and combine. A set
/// absent from the lookup is an aggregate-lineup gap, distinct from the
/// single-player rejections of the admission filter.
pub fn classify(
    offense: &[PlayerId; 5],
    defense: &[PlayerId; 5],
    registry: &RosterRegistry,
) -> Result<u16, RejectReason> {
    let off_sc = registry
        .supercluster_for(offense)
        .ok_or(RejectReason::UnmappedLineup { side: Side::Offense })?;
    let def_sc = registry
        .supercluster_for(defense)
        .ok_or(RejectReason::UnmappedLineup { side: Side::Defense })?;
    Ok(matchup_id(off_sc, def_sc))
}
