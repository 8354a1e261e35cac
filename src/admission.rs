use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::possessions::Possession;
use crate::rosters::{PlayerId, RosterRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Offense,
    Defense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingKind {
    Archetype,
    Skill,
}

/// Typed rejection. `UnmappedLineup` comes from the matchup classifier and is
/// reported apart from single-player gaps: it indicates an aggregate-lineup
/// gap in the supercluster lookup, not a missing player row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    MissingPlayerData {
        side: Side,
        kind: MissingKind,
        player: PlayerId,
    },
    UnmappedLineup {
        side: Side,
    },
}

/// Admission policy as one named, swappable predicate. The choice has
/// first-order effects on coverage: with strict intersection, admission
/// probability shrinks combinatorially with the 10 required participants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AdmissionPolicy {
    /// Admit only if every one of the 10 players resolves both an archetype
    /// assignment and a skill rating for the season. Default.
    StrictIntersection,
    /// Substitute a fixed archetype/skill for unresolved players instead of
    /// dropping the possession. Explicitly opt-in; never the default.
    ImputeMissing {
        archetype: u8,
        off_z: f64,
        def_z: f64,
    },
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        AdmissionPolicy::StrictIntersection
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedPlayer {
    pub player: PlayerId,
    pub archetype: u8,
    pub off_z: f64,
    pub def_z: f64,
    pub imputed: bool,
}

/// An admitted possession: the raw exchange plus resolved archetype and skill
/// for all 10 participants.
#[derive(Debug, Clone)]
pub struct ResolvedPossession {
    pub poss_id: i64,
    pub season: String,
    pub y: f64,
    pub offense: [ResolvedPlayer; 5],
    pub defense: [ResolvedPlayer; 5],
}

impl ResolvedPossession {
    pub fn imputed_players(&self) -> usize {
        self.offense
            .iter()
            .chain(self.defense.iter())
            .filter(|p| p.imputed)
            .count()
    }
}

impl AdmissionPolicy {
    /// Pure predicate: no mutation of the input possession.
    pub fn admit(
        &self,
        poss: &Possession,
        registry: &RosterRegistry,
    ) -> Result<ResolvedPossession, RejectReason> {
        let offense = self.resolve_side(&poss.offense, Side::Offense, &poss.season, registry)?;
        let defense = self.resolve_side(&poss.defense, Side::Defense, &poss.season, registry)?;
        Ok(ResolvedPossession {
            poss_id: poss.poss_id,
            season: poss.season.clone(),
            y: poss.y,
            offense,
            defense,
        })
    }

    fn resolve_side(
        &self,
        players: &[PlayerId; 5],
        side: Side,
        season: &str,
        registry: &RosterRegistry,
    ) -> Result<[ResolvedPlayer; 5], RejectReason> {
        let mut out = [ResolvedPlayer {
            player: 0,
            archetype: 0,
            off_z: 0.0,
            def_z: 0.0,
            imputed: false,
        }; 5];
        for (slot, &player) in players.iter().enumerate() {
            out[slot] = self.resolve_player(player, side, season, registry)?;
        }
        Ok(out)
    }

    fn resolve_player(
        &self,
        player: PlayerId,
        side: Side,
        season: &str,
        registry: &RosterRegistry,
    ) -> Result<ResolvedPlayer, RejectReason> {
        let archetype = registry.archetype_for(player, season);
        let skill = registry.skill_for(player, season);
        match (archetype, skill) {
            (Some(archetype), Some(skill)) => Ok(ResolvedPlayer {
                player,
                archetype,
                off_z: skill.off_z,
                def_z: skill.def_z,
                imputed: false,
            }),
            (missing_archetype, _) => match *self {
                AdmissionPolicy::StrictIntersection => {
                    let kind = if missing_archetype.is_none() {
                        MissingKind::Archetype
                    } else {
                        MissingKind::Skill
                    };
                    Err(RejectReason::MissingPlayerData { side, kind, player })
                }
                AdmissionPolicy::ImputeMissing {
                    archetype: fill_archetype,
                    off_z,
                    def_z,
                } => {
                    // Partial data still wins over the fill values.
                    let archetype = missing_archetype.unwrap_or(fill_archetype);
                    let (off_z, def_z) = match skill {
                        Some(s) => (s.off_z, s.def_z),
                        None => (off_z, def_z),
                    };
                    Ok(ResolvedPlayer {
                        player,
                        archetype,
                        off_z,
                        def_z,
                        imputed: true,
                    })
                }
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeasonCoverage {
    pub seen: usize,
    pub admitted: usize,
    pub admitted_with_imputation: usize,
    pub rejected_offense_archetype: usize,
    pub rejected_offense_skill: usize,
    pub rejected_defense_archetype: usize,
    pub rejected_defense_skill: usize,
    pub rejected_unmapped_offense_lineup: usize,
    pub rejected_unmapped_defense_lineup: usize,
}

impl SeasonCoverage {
    pub fn rejected(&self) -> usize {
        self.rejected_offense_archetype
            + self.rejected_offense_skill
            + self.rejected_defense_archetype
            + self.rejected_defense_skill
            + self.rejected_unmapped_offense_lineup
            + self.rejected_unmapped_defense_lineup
    }

    pub fn coverage_ratio(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.admitted as f64 / self.seen as f64
        }
    }
}

/// Per-season admission telemetry, reused by training, validation and
/// reporting. Failures carry counts, never a bare boolean.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionReport {
    pub policy: Option<AdmissionPolicy>,
    pub per_season: BTreeMap<String, SeasonCoverage>,
}

impl AdmissionReport {
    pub fn new(policy: AdmissionPolicy) -> Self {
        AdmissionReport {
            policy: Some(policy),
            per_season: BTreeMap::new(),
        }
    }

    pub fn record_admitted(&mut self, season: &str, imputed_players: usize) {
        let entry = self.season_mut(season);
        entry.seen += 1;
        entry.admitted += 1;
        if imputed_players > 0 {
            entry.admitted_with_imputation += 1;
        }
    }

    pub fn record_rejected(&mut self, season: &str, reason: RejectReason) {
        let entry = self.season_mut(season);
        entry.seen += 1;
        match reason {
            RejectReason::MissingPlayerData { side, kind, .. } => match (side, kind) {
                (Side::Offense, MissingKind::Archetype) => entry.rejected_offense_archetype += 1,
                (Side::Offense, MissingKind::Skill) => entry.rejected_offense_skill += 1,
                (Side::Defense, MissingKind::Archetype) => entry.rejected_defense_archetype += 1,
                (Side::Defense, MissingKind::Skill) => entry.rejected_defense_skill += 1,
            },
            RejectReason::UnmappedLineup { side } => match side {
                Side::Offense => entry.rejected_unmapped_offense_lineup += 1,
                Side::Defense => entry.rejected_unmapped_defense_lineup += 1,
            },
        }
    }

    pub fn total_seen(&self) -> usize {
        self.per_season.values().map(|s| s.seen).sum()
    }

    pub fn total_admitted(&self) -> usize {
        self.per_season.values().map(|s| s.admitted).sum()
    }

    pub fn overall_coverage(&self) -> f64 {
        let seen = self.total_seen();
        if seen == 0 {
            0.0
        } else {
            self.total_admitted() as f64 / seen as f64
        }
    }

    fn season_mut(&mut self, season: &str) -> &mut SeasonCoverage {
        self.per_season.entry(season.to_string()).or_default()
    }

    /// Loud failure when overall coverage falls below the configured floor:
    /// training on a tiny or biased sample is worse than not training.
    pub fn enforce_coverage_floor(&self, floor: f64) -> anyhow::Result<()> {
        let coverage = self.overall_coverage();
        if coverage < floor {
            return Err(anyhow::anyhow!(
                "coverage {:.2}% below floor {:.2}%: admitted {} of {} possessions",
                coverage * 100.0,
                floor * 100.0,
                self.total_admitted(),
                self.total_seen()
            ));
        }
        Ok(())
    }
}
