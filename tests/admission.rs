use lineup_lab::admission::{
    AdmissionPolicy, AdmissionReport, MissingKind, RejectReason, Side,
};
use lineup_lab::possessions::Possession;
use lineup_lab::rosters::{ArchetypeEntry, RosterArtifact, RosterRegistry, SkillEntry};

const SEASON: &str = "2023-24";

/// Players 1..=10 fully resolved except `gap`, which keeps a skill rating
/// but has no archetype assignment for the season.
fn registry_with_archetype_gap(gap: u32) -> RosterRegistry {
    let mut artifact = RosterArtifact {
        version: 1,
        generated_at: "fixture".into(),
        source: None,
        archetypes: Vec::new(),
        skills: Vec::new(),
        superclusters: Vec::new(),
    };
    for id in 1..=10u32 {
        if id != gap {
            artifact.archetypes.push(ArchetypeEntry {
                player: id,
                season: SEASON.into(),
                archetype: (id % 8) as u8,
            });
        }
        artifact.skills.push(SkillEntry {
            player: id,
            season: SEASON.into(),
            off_z: 0.1 * id as f64,
            def_z: -0.05 * id as f64,
        });
    }
    RosterRegistry::from_artifact(artifact).unwrap()
}

fn possession(poss_id: i64, defense: [u32; 5]) -> Possession {
    Possession {
        poss_id,
        season: SEASON.into(),
        y: 1.1,
        offense: [1, 2, 3, 4, 5],
        defense,
    }
}

#[test]
fn ten_possessions_with_one_missing_defensive_archetype() {
    // Exactly one possession fields the defender with no archetype
    // assignment; the other nine use a clean unit.
    let registry = registry_with_archetype_gap(8);
    let policy = AdmissionPolicy::StrictIntersection;
    let mut report = AdmissionReport::new(policy);

    for poss_id in 0..10i64 {
        let defense = if poss_id == 4 {
            [6, 7, 8, 9, 10]
        } else {
            [6, 7, 9, 10, 6]
        };
        let poss = possession(poss_id, defense);
        match policy.admit(&poss, &registry) {
            Ok(resolved) => report.record_admitted(SEASON, resolved.imputed_players()),
            Err(reason) => report.record_rejected(SEASON, reason),
        }
    }

    let cov = report.per_season.get(SEASON).unwrap();
    assert_eq!(cov.seen, 10);
    assert_eq!(cov.admitted, 9);
    assert_eq!(cov.rejected(), 1);
    assert_eq!(cov.rejected_defense_archetype, 1);
    assert_eq!(cov.rejected_defense_skill, 0);
    assert_eq!(cov.rejected_offense_archetype, 0);
}

#[test]
fn rejection_identifies_the_missing_player() {
    let registry = registry_with_archetype_gap(8);
    let err = AdmissionPolicy::StrictIntersection
        .admit(&possession(1, [6, 7, 8, 9, 10]), &registry)
        .unwrap_err();
    assert_eq!(
        err,
        RejectReason::MissingPlayerData {
            side: Side::Defense,
            kind: MissingKind::Archetype,
            player: 8,
        }
    );
}

#[test]
fn imputation_policy_recovers_the_dropped_possession() {
    let registry = registry_with_archetype_gap(8);
    let strict = AdmissionPolicy::StrictIntersection;
    let impute = AdmissionPolicy::ImputeMissing {
        archetype: 2,
        off_z: 0.0,
        def_z: 0.0,
    };
    let poss = possession(1, [6, 7, 8, 9, 10]);

    assert!(strict.admit(&poss, &registry).is_err());
    let resolved = impute.admit(&poss, &registry).unwrap();
    assert_eq!(resolved.imputed_players(), 1);
    let filled = resolved.defense.iter().find(|p| p.player == 8).unwrap();
    assert_eq!(filled.archetype, 2);
    // The skill rating existed; only the archetype came from the fill.
    assert!((filled.def_z - (-0.05 * 8.0)).abs() < 1e-12);
}

#[test]
fn admission_never_mutates_the_input() {
    let registry = registry_with_archetype_gap(99);
    let poss = possession(1, [6, 7, 8, 9, 10]);
    let before = (poss.offense, poss.defense, poss.y);
    let _ = AdmissionPolicy::StrictIntersection.admit(&poss, &registry);
    assert_eq!(before, (poss.offense, poss.defense, poss.y));
}

#[test]
fn coverage_report_serializes_with_its_policy() {
    let mut report = AdmissionReport::new(AdmissionPolicy::StrictIntersection);
    report.record_admitted(SEASON, 0);
    report.record_rejected(
        SEASON,
        RejectReason::MissingPlayerData {
            side: Side::Offense,
            kind: MissingKind::Skill,
            player: 3,
        },
    );
    let raw = serde_json::to_string(&report).unwrap();
    let back: AdmissionReport = serde_json::from_str(&raw).unwrap();
    assert_eq!(back.total_seen(), 2);
    assert_eq!(back.total_admitted(), 1);
    assert_eq!(
        back.per_season.get(SEASON).unwrap().rejected_offense_skill,
        1
    );
}
