use std::collections::BTreeMap;

use lineup_lab::diagnostics::DiagnosticsReport;
use lineup_lab::model::{
    ARTIFACT_VERSION, AcceptanceVerdict, CoefficientArtifact, CoefficientRow, CoefficientSet,
    ConstraintMode, ParameterizationKind, predict_value,
};
use lineup_lab::rosters::ARCHETYPE_COUNT;
use lineup_lab::store::CoefficientStore;

fn scratch_store(tag: &str) -> CoefficientStore {
    let dir = std::env::temp_dir().join(format!(
        "lineup_lab_it_store_{}_{tag}",
        std::process::id()
    ));
    std::fs::remove_dir_all(&dir).ok();
    CoefficientStore::open(&dir).unwrap()
}

fn diagnostics() -> DiagnosticsReport {
    DiagnosticsReport {
        params: Vec::new(),
        worst_rhat: 1.004,
        min_ess: 410.0,
        divergences: 1,
        divergence_fraction: 0.0005,
        depth_exhaustions: 0,
        depth_exhaustion_fraction: 0.0,
        chains_requested: 4,
        chains_completed: 4,
        total_draws: 2000,
        incomplete: false,
        wall_clock_secs: 3.4,
    }
}

fn matchup_specific_artifact(verdict: AcceptanceVerdict) -> CoefficientArtifact {
    let mut rows = BTreeMap::new();
    for (idx, matchup) in [0u16, 7, 19, 35].iter().enumerate() {
        let mut row = CoefficientRow {
            intercept: 1.0 + 0.03 * idx as f64,
            off: [0.0; ARCHETYPE_COUNT],
            def: [0.0; ARCHETYPE_COUNT],
        };
        for j in 0..ARCHETYPE_COUNT {
            row.off[j] = 0.04 + 0.011 * (idx + j) as f64;
            row.def[j] = 0.03 + 0.009 * (idx + j) as f64;
        }
        rows.insert(*matchup, row);
    }
    CoefficientArtifact {
        version: ARTIFACT_VERSION,
        generated_at: "2026-08-01T00:00:00+00:00".into(),
        kind: ParameterizationKind::MatchupSpecific,
        constraint: ConstraintMode::Constrained,
        seed: 12,
        training_rows: 4200,
        per_matchup_rows: [(0u16, 900usize), (7, 1400), (19, 1100), (35, 800)]
            .into_iter()
            .collect(),
        coefficients: CoefficientSet::MatchupSpecific {
            rows,
            sigma: 1.18,
        },
        diagnostics: diagnostics(),
        verdict,
    }
}

/// Fixed battery of synthetic lineups for prediction comparison.
fn lineup_battery() -> Vec<(u16, [f64; ARCHETYPE_COUNT], [f64; ARCHETYPE_COUNT])> {
    let mut out = Vec::new();
    for (idx, matchup) in [0u16, 7, 19, 35].iter().enumerate() {
        for j in 0..ARCHETYPE_COUNT {
            let mut off = [0.25; ARCHETYPE_COUNT];
            let mut def = [0.25; ARCHETYPE_COUNT];
            off[j] = 1.5 + idx as f64 * 0.125;
            def[(j + 2) % ARCHETYPE_COUNT] = -0.5;
            out.push((*matchup, off, def));
        }
    }
    out
}

#[test]
fn reloaded_runs_reproduce_identical_predictions() {
    let store = scratch_store("predictions");
    let artifact = matchup_specific_artifact(AcceptanceVerdict::Accepted);
    let run_id = store.append_run(&artifact).unwrap();
    let reloaded = store.load_run(&run_id).unwrap();

    for (matchup, off, def) in lineup_battery() {
        let before = predict_value(&artifact.coefficients, matchup, &off, &def).unwrap();
        let after = predict_value(&reloaded.coefficients, matchup, &off, &def).unwrap();
        assert_eq!(
            before.to_bits(),
            after.to_bits(),
            "matchup {matchup} prediction drifted through the store"
        );
    }
    assert_eq!(reloaded.training_rows, 4200);
    assert_eq!(reloaded.per_matchup_rows.get(&7), Some(&1400));
    assert!(!reloaded.diagnostics.incomplete);
}

#[test]
fn append_never_overwrites_and_promotion_is_explicit() {
    let store = scratch_store("promotion");
    let rejected = store
        .append_run(&matchup_specific_artifact(
            AcceptanceVerdict::RejectedValidation {
                failed_checks: vec!["defense-sign".into()],
            },
        ))
        .unwrap();
    let accepted = store
        .append_run(&matchup_specific_artifact(AcceptanceVerdict::Accepted))
        .unwrap();
    assert_ne!(rejected, accepted);
    assert_eq!(store.run_ids().unwrap().len(), 2);

    // Appending more runs never touches what is already stored.
    let before = store.load_run(&rejected).unwrap();
    store
        .append_run(&matchup_specific_artifact(AcceptanceVerdict::Accepted))
        .unwrap();
    let after = store.load_run(&rejected).unwrap();
    assert_eq!(before.generated_at, after.generated_at);
    assert_eq!(before.verdict, after.verdict);

    // Nothing is current until an explicit promote, and only accepted runs
    // can be promoted.
    assert!(store.current().unwrap().is_none());
    assert!(store.promote(&rejected).is_err());
    store.promote(&accepted).unwrap();
    assert_eq!(store.current().unwrap().unwrap().0, accepted);
}

#[test]
fn serialization_survives_with_diagnostics_attached() {
    let artifact = matchup_specific_artifact(AcceptanceVerdict::RejectedConvergence {
        worst_rhat: 1.31,
        divergence_fraction: 0.52,
    });
    let raw = artifact.to_json().unwrap();
    let back = CoefficientArtifact::from_json(&raw).unwrap();
    assert_eq!(back.diagnostics.total_draws, 2000);
    match back.verdict {
        AcceptanceVerdict::RejectedConvergence {
            worst_rhat,
            divergence_fraction,
        } => {
            assert!((worst_rhat - 1.31).abs() < 1e-12);
            assert!((divergence_fraction - 0.52).abs() < 1e-12);
        }
        other => panic!("verdict changed shape: {other:?}"),
    }
}
