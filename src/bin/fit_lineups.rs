use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};

use lineup_lab::diagnostics::{DIVERGENCE_FRACTION_LIMIT, RHAT_FLAG_THRESHOLD};
use lineup_lab::estimator::{self, EstimatorConfig};
use lineup_lab::model::{
    ARTIFACT_VERSION, AcceptanceVerdict, CoefficientArtifact, ConstraintMode,
    ParameterizationKind,
};
use lineup_lab::store::CoefficientStore;
use lineup_lab::validation;
use lineup_lab::zmatrix;

// Exit codes: estimation-level failure (non-convergence) is distinct from
// validation-level rejection (harness failure).
const EXIT_PIPELINE_ERROR: i32 = 1;
const EXIT_NOT_CONVERGED: i32 = 2;
const EXIT_VALIDATION_REJECTED: i32 = 3;

fn main() {
    dotenvy::dotenv().ok();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("[ERROR] {err:#}");
            EXIT_PIPELINE_ERROR
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let zmatrix_path = parse_path_arg("--zmatrix")
        .ok_or_else(|| anyhow!("--zmatrix <csv> is required"))?;
    let store_dir = parse_path_arg("--store").unwrap_or_else(|| PathBuf::from("coef_store"));

    let kind = match parse_string_arg("--kind") {
        Some(raw) => ParameterizationKind::parse(&raw)?,
        None => ParameterizationKind::Global,
    };
    let constraint = match parse_string_arg("--constraint") {
        Some(raw) => ConstraintMode::parse(&raw)?,
        None => ConstraintMode::Constrained,
    };

    let config = EstimatorConfig {
        kind,
        constraint,
        chains: parse_usize_arg("--chains").unwrap_or(4).max(2),
        warmup: parse_usize_arg("--warmup").unwrap_or(500),
        samples: parse_usize_arg("--samples").unwrap_or(500),
        target_accept: parse_f64_arg("--target-accept").unwrap_or(0.80),
        max_depth: parse_usize_arg("--max-depth").unwrap_or(10),
        seed: parse_u64_arg("--seed").unwrap_or(1),
        timeout: parse_u64_arg("--timeout-secs").map(Duration::from_secs),
    };

    let rows = zmatrix::read_zmatrix(&zmatrix_path)?;
    let summary = zmatrix::summarize(&rows);
    eprintln!(
        "[INFO] z-matrix {}: {} rows, {} matchup(s)",
        zmatrix_path.display(),
        summary.rows,
        summary.per_matchup.len()
    );
    eprintln!(
        "[INFO] fitting {} / {} with {} chains, warmup {}, samples {}, target accept {:.2}, seed {}",
        config.kind.label(),
        config.constraint.label(),
        config.chains,
        config.warmup,
        config.samples,
        config.target_accept,
        config.seed
    );

    let fit = estimator::run(&rows, &config)?;
    let diag = &fit.diagnostics;
    eprintln!(
        "[INFO] sampling done in {:.1}s: {} draws from {}/{} chains, worst rhat {:.4}, \
         min ess {:.0}, divergences {} ({:.1}%), depth exhaustions {} ({:.1}%){}",
        diag.wall_clock_secs,
        diag.total_draws,
        diag.chains_completed,
        diag.chains_requested,
        diag.worst_rhat,
        diag.min_ess,
        diag.divergences,
        diag.divergence_fraction * 100.0,
        diag.depth_exhaustions,
        diag.depth_exhaustion_fraction * 100.0,
        if diag.incomplete { " [INCOMPLETE]" } else { "" },
    );
    for p in diag.params.iter().filter(|p| p.rhat > RHAT_FLAG_THRESHOLD) {
        eprintln!(
            "[WARN] parameter {} not converged: rhat {:.4}, ess {:.0}",
            p.name, p.rhat, p.ess
        );
    }

    let converged = diag.converged();
    let harness = validation::run_harness(&fit.coefficients)?;
    for check in &harness.checks {
        let tag = if check.pass { "PASS" } else { "FAIL" };
        println!(
            "{tag} {:28} measured={:+.6} {}",
            check.name, check.measured, check.detail
        );
    }

    let verdict = if !converged {
        AcceptanceVerdict::RejectedConvergence {
            worst_rhat: diag.worst_rhat,
            divergence_fraction: diag.divergence_fraction,
        }
    } else if !harness.passed_all() {
        AcceptanceVerdict::RejectedValidation {
            failed_checks: harness.failed_names(),
        }
    } else {
        AcceptanceVerdict::Accepted
    };

    let artifact = CoefficientArtifact {
        version: ARTIFACT_VERSION,
        generated_at: chrono::Utc::now().to_rfc3339(),
        kind: config.kind,
        constraint: config.constraint,
        seed: config.seed,
        training_rows: summary.rows,
        per_matchup_rows: summary.per_matchup.iter().map(|(k, v)| (*k, *v)).collect(),
        coefficients: fit.coefficients.clone(),
        diagnostics: diag.clone(),
        verdict: verdict.clone(),
    };

    // Every run is appended, accepted or not: a poorly converged run is
    // surfaced, never silently discarded.
    let store = CoefficientStore::open(&store_dir)?;
    let run_id = store.append_run(&artifact)?;
    println!(
        "run {} stored in {} ({}, {})",
        run_id,
        store_dir.display(),
        config.kind.label(),
        verdict.label()
    );

    if !converged {
        eprintln!(
            "[WARN] estimation did not converge (worst rhat {:.4} vs {:.2}, divergence {:.1}% vs {:.0}%); \
             consider the {} constraint mode or the global parameterization",
            diag.worst_rhat,
            RHAT_FLAG_THRESHOLD,
            diag.divergence_fraction * 100.0,
            DIVERGENCE_FRACTION_LIMIT * 100.0,
            match config.constraint {
                ConstraintMode::Constrained => "unconstrained",
                ConstraintMode::Unconstrained => "constrained",
            }
        );
        return Ok(EXIT_NOT_CONVERGED);
    }
    if !harness.passed_all() {
        eprintln!(
            "[WARN] validation rejected the fit: {} of {} checks failed ({})",
            harness.failed(),
            harness.checks.len(),
            harness.failed_names().join(", ")
        );
        return Ok(EXIT_VALIDATION_REJECTED);
    }

    println!(
        "accepted; promote with: lineup_lab promote {} --store {}",
        run_id,
        store_dir.display()
    );
    Ok(0)
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_string_arg(name).map(PathBuf::from)
}

fn parse_string_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&format!("{name}="))
            && !v.trim().is_empty()
        {
            return Some(v.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    parse_string_arg(name).and_then(|raw| raw.parse::<usize>().ok())
}

fn parse_u64_arg(name: &str) -> Option<u64> {
    parse_string_arg(name).and_then(|raw| raw.parse::<u64>().ok())
}

fn parse_f64_arg(name: &str) -> Option<f64> {
    parse_string_arg(name).and_then(|raw| raw.parse::<f64>().ok())
}
