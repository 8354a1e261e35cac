use std::collections::BTreeMap;

use lineup_lab::model::{CoefficientRow, CoefficientSet, predict_value};
use lineup_lab::rosters::ARCHETYPE_COUNT;
use lineup_lab::validation::run_harness;

fn sane_row(intercept: f64) -> CoefficientRow {
    let mut row = CoefficientRow {
        intercept,
        off: [0.0; ARCHETYPE_COUNT],
        def: [0.0; ARCHETYPE_COUNT],
    };
    for j in 0..ARCHETYPE_COUNT {
        row.off[j] = 0.06 + 0.008 * j as f64;
        row.def[j] = 0.05 + 0.006 * j as f64;
    }
    row
}

#[test]
fn sane_global_set_passes_every_check() {
    let set = CoefficientSet::Global {
        row: sane_row(1.08),
        sigma: 1.12,
    };
    let report = run_harness(&set).unwrap();
    for check in &report.checks {
        assert!(check.pass, "{} failed: {}", check.name, check.detail);
        assert!(check.measured.is_finite(), "{} measured NaN", check.name);
    }
    assert_eq!(report.failed(), 0);
    assert_eq!(report.checks.len(), 8);
}

#[test]
fn sane_matchup_specific_set_passes_every_check() {
    let rows: BTreeMap<u16, CoefficientRow> = [(3u16, sane_row(1.02)), (17u16, sane_row(1.15))]
        .into_iter()
        .collect();
    let set = CoefficientSet::MatchupSpecific { rows, sigma: 1.10 };
    let report = run_harness(&set).unwrap();
    assert!(report.passed_all(), "failed: {:?}", report.failed_names());
}

#[test]
fn flipped_defense_sign_is_caught_with_a_measured_quantity() {
    let mut row = sane_row(1.08);
    row.def[6] = -0.09;
    let set = CoefficientSet::Global { row, sigma: 1.1 };
    let report = run_harness(&set).unwrap();
    assert!(!report.passed_all());
    let failed = report.failed_names();
    assert!(failed.contains(&"defense-sign".to_string()), "{failed:?}");
    let check = report
        .checks
        .iter()
        .find(|c| c.name == "defense-sign")
        .unwrap();
    // The measured quantity is the worst net gain to the defense, here the
    // flipped coefficient itself.
    assert!((check.measured - (-0.09)).abs() < 1e-9, "{}", check.measured);
}

#[test]
fn exact_stack_scenario_matches_the_closed_form() {
    let row = sane_row(0.95);
    let set = CoefficientSet::Global {
        row: row.clone(),
        sigma: 1.0,
    };
    // Offense of five identical archetype-0 scorers at z = 1.0 against a
    // skill-0 defense collapses to intercept + 5 * beta_off[0].
    let mut off = [0.0; ARCHETYPE_COUNT];
    off[0] = 5.0;
    let def = [0.0; ARCHETYPE_COUNT];
    let value = predict_value(&set, 0, &off, &def).unwrap();
    assert_eq!(value, row.intercept + 5.0 * row.off[0]);
}

#[test]
fn harness_refuses_unavailable_sets() {
    assert!(run_harness(&CoefficientSet::Unavailable).is_err());
}
