use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use rayon::prelude::*;

use lineup_lab::admission::{AdmissionPolicy, AdmissionReport, RejectReason};
use lineup_lab::features;
use lineup_lab::matchup;
use lineup_lab::possessions::{self, Possession};
use lineup_lab::rosters;
use lineup_lab::zmatrix::{self, TrainingRow};

const DEFAULT_COVERAGE_FLOOR: f64 = 0.05;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let possessions_path = parse_path_arg("--possessions")
        .ok_or_else(|| anyhow!("--possessions <sqlite-or-parquet> is required"))?;
    let rosters_path = parse_path_arg("--rosters")
        .ok_or_else(|| anyhow!("--rosters <json> is required"))?;
    let out_path = parse_path_arg("--out").unwrap_or_else(|| PathBuf::from("zmatrix.csv"));
    let season = parse_string_arg("--season");
    let coverage_floor = parse_f64_arg("--coverage-floor")
        .or_else(coverage_floor_from_env)
        .unwrap_or(DEFAULT_COVERAGE_FLOOR);
    let policy = parse_policy()?;

    let registry = rosters::load_registry(&rosters_path)?;
    eprintln!(
        "[INFO] rosters loaded: {} archetype entries, {} skill entries, {} supercluster entries",
        registry.archetype_entries(),
        registry.skill_entries(),
        registry.supercluster_entries()
    );

    let rows = load_possessions(&possessions_path, season.as_deref())?;
    let table_summary = possessions::summarize(&rows);
    eprintln!(
        "[INFO] possessions loaded: {} rows across {} season(s)",
        table_summary.rows,
        table_summary.per_season.len()
    );
    if rows.is_empty() {
        return Err(anyhow!(
            "no possessions found in {} (season filter: {:?})",
            possessions_path.display(),
            season
        ));
    }

    // Admission, classification and aggregation are per-possession pure work;
    // sweep them in parallel and fold the telemetry afterward.
    let outcomes: Vec<(String, Result<(TrainingRow, usize), RejectReason>)> = rows
        .par_iter()
        .map(|poss| (poss.season.clone(), resolve_one(poss, policy, &registry)))
        .collect();

    let mut report = AdmissionReport::new(policy);
    let mut training = Vec::with_capacity(outcomes.len());
    for (season_tag, outcome) in outcomes {
        match outcome {
            Ok((row, imputed_players)) => {
                report.record_admitted(&season_tag, imputed_players);
                training.push(row);
            }
            Err(reason) => report.record_rejected(&season_tag, reason),
        }
    }

    for (season_tag, cov) in &report.per_season {
        eprintln!(
            "[INFO] season {season_tag}: seen={} admitted={} ({:.1}%) rejected={} \
             [off arch={} off skill={} def arch={} def skill={} unmapped off={} unmapped def={}] imputed={}",
            cov.seen,
            cov.admitted,
            cov.coverage_ratio() * 100.0,
            cov.rejected(),
            cov.rejected_offense_archetype,
            cov.rejected_offense_skill,
            cov.rejected_defense_archetype,
            cov.rejected_defense_skill,
            cov.rejected_unmapped_offense_lineup,
            cov.rejected_unmapped_defense_lineup,
            cov.admitted_with_imputation,
        );
    }

    let coverage_path = coverage_report_path(&out_path);
    let raw = serde_json::to_string_pretty(&report).context("serialize coverage report")?;
    fs::write(&coverage_path, raw)
        .with_context(|| format!("write {}", coverage_path.display()))?;
    eprintln!("[INFO] coverage report written: {}", coverage_path.display());

    report.enforce_coverage_floor(coverage_floor)?;
    let coverage = report.overall_coverage();

    zmatrix::write_zmatrix(&out_path, &training)?;
    let matrix_summary = zmatrix::summarize(&training);
    println!(
        "z-matrix written: {} ({} rows, {} matchup(s), coverage {:.1}%)",
        out_path.display(),
        matrix_summary.rows,
        matrix_summary.per_matchup.len(),
        coverage * 100.0
    );
    Ok(())
}

fn resolve_one(
    poss: &Possession,
    policy: AdmissionPolicy,
    registry: &rosters::RosterRegistry,
) -> Result<(TrainingRow, usize), RejectReason> {
    let admitted = policy.admit(poss, registry)?;
    let matchup_id = matchup::classify(&poss.offense, &poss.defense, registry)?;
    let (off, def) = features::zrows(&admitted);
    Ok((
        TrainingRow {
            off,
            def,
            matchup: matchup_id,
            y: admitted.y,
        },
        admitted.imputed_players(),
    ))
}

fn load_possessions(path: &Path, season: Option<&str>) -> Result<Vec<Possession>> {
    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("parquet"));
    if is_parquet {
        possessions::read_possessions_parquet(path, season)
    } else {
        let conn = possessions::open_db(path)?;
        possessions::load_possessions(&conn, season)
    }
}

fn coverage_report_path(out: &Path) -> PathBuf {
    let stem = out
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "zmatrix".to_string());
    out.with_file_name(format!("{stem}_coverage.json"))
}

fn coverage_floor_from_env() -> Option<f64> {
    std::env::var("APP_COVERAGE_FLOOR")
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
}

/// `--impute-missing a:off_z:def_z` switches the filter from strict
/// intersection to the explicit imputation strategy.
fn parse_policy() -> Result<AdmissionPolicy> {
    let Some(raw) = parse_string_arg("--impute-missing") else {
        return Ok(AdmissionPolicy::StrictIntersection);
    };
    let parts = raw.split(':').collect::<Vec<_>>();
    if parts.len() != 3 {
        return Err(anyhow!(
            "--impute-missing expects archetype:off_z:def_z, got `{raw}`"
        ));
    }
    let archetype = parts[0]
        .trim()
        .parse::<u8>()
        .with_context(|| format!("bad archetype in --impute-missing `{raw}`"))?;
    if usize::from(archetype) >= rosters::ARCHETYPE_COUNT {
        return Err(anyhow!(
            "imputed archetype {archetype} out of range (expected < {})",
            rosters::ARCHETYPE_COUNT
        ));
    }
    let off_z = parts[1]
        .trim()
        .parse::<f64>()
        .with_context(|| format!("bad off_z in --impute-missing `{raw}`"))?;
    let def_z = parts[2]
        .trim()
        .parse::<f64>()
        .with_context(|| format!("bad def_z in --impute-missing `{raw}`"))?;
    Ok(AdmissionPolicy::ImputeMissing {
        archetype,
        off_z,
        def_z,
    })
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

fn parse_f64_arg(name: &str) -> Option<f64> {
    parse_string_arg(name).and_then(|raw| raw.parse::<f64>().ok())
}
