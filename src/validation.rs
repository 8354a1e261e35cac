use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::admission::{AdmissionPolicy, AdmissionReport, ResolvedPlayer, Side};
use crate::features::{ZRow, side_zrow};
use crate::matchup;
use crate::model::{CoefficientSet, predict_value};
use crate::possessions::Possession;
use crate::rosters::{
    ARCHETYPE_COUNT, ArchetypeEntry, RosterArtifact, RosterRegistry, SkillEntry,
    SuperclusterEntry,
};

/// One basketball-logic property check: pass/fail plus the measured quantity
/// that decided it, never a bare boolean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyCheck {
    pub name: String,
    pub pass: bool,
    pub measured: f64,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    pub checks: Vec<PropertyCheck>,
}

impl HarnessReport {
    pub fn passed_all(&self) -> bool {
        self.checks.iter().all(|c| c.pass)
    }

    pub fn failed_names(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| !c.pass)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.pass).count()
    }

    pub fn failed(&self) -> usize {
        self.checks.len() - self.passed()
    }
}

const TOL: f64 = 1e-9;

/// The primary defense against "converged but wrong": ideal diagnostics can
/// coexist with broken sign conventions or feature bugs. Every prediction in
/// here goes through `model::predict_value`, the same routine production
/// consumers use.
pub fn run_harness(set: &CoefficientSet) -> Result<HarnessReport> {
    if matches!(set, CoefficientSet::Unavailable) {
        return Err(anyhow!("cannot validate an unavailable coefficient set"));
    }
    let matchups = set.evaluable_matchups();
    if matchups.is_empty() {
        return Err(anyhow!("coefficient set exposes no evaluable matchups"));
    }

    let mut checks = Vec::new();
    checks.push(zrow_width_and_sign());
    checks.push(offense_monotonicity(set, &matchups)?);
    checks.push(defense_sign(set, &matchups)?);
    checks.push(diminishing_returns(set, matchups[0])?);
    checks.push(aggregation_idempotence()?);
    checks.push(serialization_round_trip(set, &matchups)?);
    checks.push(exact_stack_scenario(set, matchups[0])?);
    checks.push(admission_counting());
    Ok(HarnessReport { checks })
}

fn resolved(player: u32, archetype: u8, off_z: f64, def_z: f64) -> ResolvedPlayer {
    ResolvedPlayer {
        player,
        archetype,
        off_z,
        def_z,
        imputed: false,
    }
}

fn baseline_zrow() -> ZRow {
    // Mild positive signal in every archetype slot so coefficient signs are
    // actually exercised.
    [0.5; ARCHETYPE_COUNT]
}

fn zrow_width_and_sign() -> PropertyCheck {
    let players = [
        resolved(1, 0, 1.5, 0.5),
        resolved(2, 0, 0.25, 0.0),
        resolved(3, 2, 0.75, 1.0),
        resolved(4, 5, 0.0, 0.25),
        resolved(5, 7, 2.0, 0.125),
    ];
    let row = side_zrow(&players, Side::Offense);
    let min_entry = row.iter().copied().fold(f64::INFINITY, f64::min);
    PropertyCheck {
        name: "zrow-width-and-sign".into(),
        pass: row.len() == ARCHETYPE_COUNT && min_entry >= 0.0,
        measured: min_entry,
        detail: format!(
            "width {} (expected {ARCHETYPE_COUNT}), min entry {min_entry:.6} from non-negative inputs",
            row.len()
        ),
    }
}

/// Replacing an offensive player with a strictly better same-archetype player
/// must not decrease predicted value.
fn offense_monotonicity(set: &CoefficientSet, matchups: &[u16]) -> Result<PropertyCheck> {
    let def = baseline_zrow();
    let mut min_delta = f64::INFINITY;
    for &m in matchups {
        for j in 0..ARCHETYPE_COUNT {
            let base = baseline_zrow();
            let mut upgraded = base;
            upgraded[j] += 1.0;
            let before = predict_value(set, m, &base, &def)?;
            let after = predict_value(set, m, &upgraded, &def)?;
            min_delta = min_delta.min(after - before);
        }
    }
    Ok(PropertyCheck {
        name: "offense-monotonicity".into(),
        pass: min_delta >= -TOL,
        measured: min_delta,
        detail: format!(
            "min value change over {} matchup(s) x {ARCHETYPE_COUNT} archetypes when upgrading an offensive player by +1 z",
            matchups.len()
        ),
    })
}

/// Replacing a defensive player with a strictly better same-archetype
/// defender must not decrease the defending lineup's net value, i.e. must
/// not raise the offense's predicted value.
fn defense_sign(set: &CoefficientSet, matchups: &[u16]) -> Result<PropertyCheck> {
    let off = baseline_zrow();
    let mut min_net_gain = f64::INFINITY;
    for &m in matchups {
        for j in 0..ARCHETYPE_COUNT {
            let base = baseline_zrow();
            let mut upgraded = base;
            upgraded[j] += 1.0;
            let before = predict_value(set, m, &off, &base)?;
            let after = predict_value(set, m, &off, &upgraded)?;
            min_net_gain = min_net_gain.min(before - after);
        }
    }
    Ok(PropertyCheck {
        name: "defense-sign".into(),
        pass: min_net_gain >= -TOL,
        measured: min_net_gain,
        detail: format!(
            "min net gain to the defense over {} matchup(s) x {ARCHETYPE_COUNT} archetypes when upgrading a defender by +1 z",
            matchups.len()
        ),
    })
}

/// Stacking several high-skill players of one archetype: the marginal gain
/// of the fifth such player must not exceed the marginal gain of the first.
fn diminishing_returns(set: &CoefficientSet, m: u16) -> Result<PropertyCheck> {
    let skill = 1.5;
    let def = baseline_zrow();
    let value_with_stack = |count: usize| -> Result<f64> {
        let mut off = [0.0; ARCHETYPE_COUNT];
        off[0] = count as f64 * skill;
        predict_value(set, m, &off, &def)
    };
    let first = value_with_stack(1)? - value_with_stack(0)?;
    let fifth = value_with_stack(5)? - value_with_stack(4)?;
    let margin = first - fifth;
    Ok(PropertyCheck {
        name: "diminishing-returns".into(),
        pass: margin >= -TOL,
        measured: margin,
        detail: format!(
            "first marginal {first:.6} minus fifth marginal {fifth:.6} for stacked same-archetype scorers"
        ),
    })
}

/// Re-running aggregation and classification on the same admitted possession
/// must be bit-identical.
fn aggregation_idempotence() -> Result<PropertyCheck> {
    let registry = synthetic_registry(None)?;
    let offense_ids = [1u32, 2, 3, 4, 5];
    let defense_ids = [6u32, 7, 8, 9, 10];
    let poss = Possession {
        poss_id: 42,
        season: SEASON.into(),
        y: 2.0,
        offense: offense_ids,
        defense: defense_ids,
    };
    let admitted = AdmissionPolicy::StrictIntersection
        .admit(&poss, &registry)
        .map_err(|r| anyhow!("synthetic possession unexpectedly rejected: {r:?}"))?;

    let first = crate::features::zrows(&admitted);
    let second = crate::features::zrows(&admitted);
    let m1 = matchup::classify(&offense_ids, &defense_ids, &registry)
        .map_err(|r| anyhow!("synthetic lineups unmapped: {r:?}"))?;
    let m2 = matchup::classify(&offense_ids, &defense_ids, &registry)
        .map_err(|r| anyhow!("synthetic lineups unmapped: {r:?}"))?;

    let identical = first.0 == second.0 && first.1 == second.1 && m1 == m2;
    Ok(PropertyCheck {
        name: "aggregation-idempotence".into(),
        pass: identical,
        measured: if identical { 0.0 } else { 1.0 },
        detail: format!("two aggregation passes over possession 42, matchup {m1}"),
    })
}

/// A coefficient set serialized and reloaded must reproduce identical
/// predictions for a fixed battery of synthetic lineups.
fn serialization_round_trip(set: &CoefficientSet, matchups: &[u16]) -> Result<PropertyCheck> {
    let raw = serde_json::to_string(set).context("serialize coefficient set")?;
    let reloaded: CoefficientSet =
        serde_json::from_str(&raw).context("reload coefficient set")?;

    let mut max_diff = 0.0f64;
    for &m in matchups {
        for j in 0..ARCHETYPE_COUNT {
            let mut off = baseline_zrow();
            off[j] += 1.25;
            let mut def = baseline_zrow();
            def[(j + 3) % ARCHETYPE_COUNT] -= 0.75;
            let a = predict_value(set, m, &off, &def)?;
            let b = predict_value(&reloaded, m, &off, &def)?;
            max_diff = max_diff.max((a - b).abs());
        }
    }
    Ok(PropertyCheck {
        name: "store-round-trip".into(),
        pass: max_diff == 0.0,
        measured: max_diff,
        detail: format!(
            "max prediction difference across {} synthetic lineups after reload",
            matchups.len() * ARCHETYPE_COUNT
        ),
    })
}

/// Offense: five players of archetype 0, each with skill z-score `s`;
/// defense: five players of archetype 1, skill 0. Predicted value must equal
/// intercept + 5s * beta_off[0] exactly.
fn exact_stack_scenario(set: &CoefficientSet, m: u16) -> Result<PropertyCheck> {
    let s = 1.0;
    let offense = [
        resolved(1, 0, s, 0.0),
        resolved(2, 0, s, 0.0),
        resolved(3, 0, s, 0.0),
        resolved(4, 0, s, 0.0),
        resolved(5, 0, s, 0.0),
    ];
    let defense = [
        resolved(6, 1, 0.0, 0.0),
        resolved(7, 1, 0.0, 0.0),
        resolved(8, 1, 0.0, 0.0),
        resolved(9, 1, 0.0, 0.0),
        resolved(10, 1, 0.0, 0.0),
    ];
    let off = side_zrow(&offense, Side::Offense);
    let def = side_zrow(&defense, Side::Defense);
    let predicted = predict_value(set, m, &off, &def)?;

    let row = match set {
        CoefficientSet::Global { row, .. } => row.clone(),
        CoefficientSet::MatchupSpecific { rows, .. } => rows
            .get(&m)
            .cloned()
            .ok_or_else(|| anyhow!("matchup {m} missing from set"))?,
        CoefficientSet::Unavailable => return Err(anyhow!("unavailable set")),
    };
    let expected = row.intercept + 5.0 * s * row.off[0];
    let diff = (predicted - expected).abs();
    Ok(PropertyCheck {
        name: "exact-stack-scenario".into(),
        pass: diff <= 1e-12,
        measured: diff,
        detail: format!("predicted {predicted:.9} vs intercept + 5s*beta_off[0] = {expected:.9}"),
    })
}

/// Ten possessions where exactly one has a defender without an archetype
/// assignment: the filter must admit exactly nine and report exactly one
/// rejection tagged missing defensive archetype.
fn admission_counting() -> PropertyCheck {
    let registry = match synthetic_registry(Some(9)) {
        Ok(r) => r,
        Err(err) => {
            return PropertyCheck {
                name: "admission-counting".into(),
                pass: false,
                measured: f64::NAN,
                detail: format!("failed to build synthetic registry: {err}"),
            };
        }
    };

    let policy = AdmissionPolicy::StrictIntersection;
    let mut report = AdmissionReport::new(policy);
    for poss_id in 0..10i64 {
        let poss = Possession {
            poss_id,
            season: SEASON.into(),
            y: 1.0,
            offense: [1, 2, 3, 4, 5],
            // Possession 0 uses the defender with no archetype assignment.
            defense: if poss_id == 0 {
                [6, 7, 8, 9, 10]
            } else {
                [6, 7, 8, 11, 10]
            },
        };
        match policy.admit(&poss, &registry) {
            Ok(admitted) => report.record_admitted(SEASON, admitted.imputed_players()),
            Err(reason) => report.record_rejected(SEASON, reason),
        }
    }

    let cov = report.per_season.get(SEASON).cloned().unwrap_or_default();
    let pass = cov.seen == 10
        && cov.admitted == 9
        && cov.rejected_defense_archetype == 1
        && cov.rejected() == 1;
    PropertyCheck {
        name: "admission-counting".into(),
        pass,
        measured: cov.admitted as f64,
        detail: format!(
            "admitted {}/10, missing-defensive-archetype rejections {}",
            cov.admitted, cov.rejected_defense_archetype
        ),
    }
}

const SEASON: &str = "2023-24";

/// In-memory registry for harness scenarios. `archetype_gap` names one player
/// that gets a skill rating but no archetype assignment.
fn synthetic_registry(archetype_gap: Option<u32>) -> Result<RosterRegistry> {
    let mut artifact = RosterArtifact {
        version: 1,
        generated_at: "harness".into(),
        source: Some("synthetic".into()),
        archetypes: Vec::new(),
        skills: Vec::new(),
        superclusters: vec![
            SuperclusterEntry {
                players: vec![1, 2, 3, 4, 5],
                supercluster: 0,
            },
            SuperclusterEntry {
                players: vec![6, 7, 8, 9, 10],
                supercluster: 3,
            },
            SuperclusterEntry {
                players: vec![6, 7, 8, 11, 10],
                supercluster: 3,
            },
        ],
    };
    for id in 1..=11u32 {
        if archetype_gap != Some(id) {
            artifact.archetypes.push(ArchetypeEntry {
                player: id,
                season: SEASON.into(),
                archetype: (id % ARCHETYPE_COUNT as u32) as u8,
            });
        }
        artifact.skills.push(SkillEntry {
            player: id,
            season: SEASON.into(),
            off_z: 0.25 * (id as f64 % 4.0),
            def_z: 0.125 * (id as f64 % 3.0),
        });
    }
    RosterRegistry::from_artifact(artifact)
}
