use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use lineup_lab::admission::AdmissionPolicy;
use lineup_lab::features;
use lineup_lab::matchup;
use lineup_lab::model::{CoefficientSet, predict_value};
use lineup_lab::possessions::Possession;
use lineup_lab::rosters::{self, PlayerId};
use lineup_lab::store::CoefficientStore;
use lineup_lab::validation;

fn main() {
    dotenvy::dotenv().ok();
    let code = match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("[ERROR] {err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let command = std::env::args().nth(1).unwrap_or_default();
    match command.as_str() {
        "status" => status(),
        "show" => show(),
        "validate" => validate(),
        "promote" => promote(),
        "evaluate" => evaluate(),
        _ => {
            usage();
            if command.is_empty() {
                Ok(())
            } else {
                Err(anyhow!("unknown command `{command}`"))
            }
        }
    }
}

fn usage() {
    println!("lineup_lab: lineup value estimation toolkit");
    println!();
    println!("USAGE:");
    println!("  lineup_lab status   [--store DIR]");
    println!("  lineup_lab show     RUN_ID [--store DIR]");
    println!("  lineup_lab validate RUN_ID [--store DIR]");
    println!("  lineup_lab promote  RUN_ID [--store DIR]");
    println!("  lineup_lab evaluate --off IDS --def IDS --season TAG");
    println!("                      [--rosters PATH] [--store DIR]");
    println!();
    println!("  IDS are five comma-separated player ids, e.g. 201939,201142,202691,203110,2738");
}

fn open_store() -> Result<CoefficientStore> {
    let dir = parse_path_arg("--store").unwrap_or_else(|| PathBuf::from("coef_store"));
    CoefficientStore::open(&dir)
}

fn status() -> Result<()> {
    let store = open_store()?;
    let runs = store.list_runs()?;
    if runs.is_empty() {
        println!("store is empty; run fit_lineups to append a training run");
        return Ok(());
    }
    let current_id = store.current()?.map(|(id, _)| id);
    for run in &runs {
        let marker = if Some(&run.run_id) == current_id.as_ref() {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {}  {:17} {:20} rows={:<7} rhat={:.4}  {}",
            run.run_id, run.kind, run.verdict, run.training_rows, run.worst_rhat, run.generated_at
        );
    }
    match current_id {
        Some(id) => println!("current: {id}"),
        None => println!("current: none promoted yet"),
    }
    Ok(())
}

fn show() -> Result<()> {
    let run_id = positional_arg().ok_or_else(|| anyhow!("show expects a RUN_ID"))?;
    let store = open_store()?;
    let artifact = store.load_run(&run_id)?;
    println!("{}", artifact.to_json()?);
    Ok(())
}

fn validate() -> Result<()> {
    let run_id = positional_arg().ok_or_else(|| anyhow!("validate expects a RUN_ID"))?;
    let store = open_store()?;
    let artifact = store.load_run(&run_id)?;
    let report = validation::run_harness(&artifact.coefficients)?;
    for check in &report.checks {
        let tag = if check.pass { "PASS" } else { "FAIL" };
        println!(
            "{tag} {:28} measured={:+.6} {}",
            check.name, check.measured, check.detail
        );
    }
    println!(
        "{} of {} checks passed (stored verdict: {})",
        report.passed(),
        report.checks.len(),
        artifact.verdict.label()
    );
    if !report.passed_all() {
        return Err(anyhow!(
            "validation failed: {}",
            report.failed_names().join(", ")
        ));
    }
    Ok(())
}

fn promote() -> Result<()> {
    let run_id = positional_arg().ok_or_else(|| anyhow!("promote expects a RUN_ID"))?;
    let store = open_store()?;
    store.promote(&run_id)?;
    println!("{run_id} promoted to current");
    Ok(())
}

/// Lineup what-if: resolve ten players through the same admission filter and
/// the same evaluation routine the harness uses, against the promoted set.
fn evaluate() -> Result<()> {
    let offense = parse_lineup_arg("--off")?;
    let defense = parse_lineup_arg("--def")?;
    let season =
        parse_string_arg("--season").ok_or_else(|| anyhow!("--season TAG is required"))?;

    let loaded;
    let registry = match parse_path_arg("--rosters") {
        Some(path) => {
            loaded = rosters::load_registry(&path)?;
            &loaded
        }
        None => rosters::global_registry().ok_or_else(|| {
            anyhow!("no roster registry: pass --rosters PATH or set LINEUP_ROSTERS_PATH")
        })?,
    };

    let store = open_store()?;
    // Absence of a promoted model is a visible state, never a substituted
    // heuristic.
    let coefficients = match store.current()? {
        Some((run_id, artifact)) => {
            eprintln!(
                "[INFO] evaluating with {run_id} ({}, {})",
                artifact.kind.label(),
                artifact.verdict.label()
            );
            artifact.coefficients
        }
        None => CoefficientSet::Unavailable,
    };

    let poss = Possession {
        poss_id: 0,
        season: season.clone(),
        y: 0.0,
        offense,
        defense,
    };
    let admitted = AdmissionPolicy::StrictIntersection
        .admit(&poss, registry)
        .map_err(|reason| anyhow!("lineup not evaluable: {reason:?}"))?;
    let matchup_id = matchup::classify(&poss.offense, &poss.defense, registry)
        .map_err(|reason| anyhow!("lineup not evaluable: {reason:?}"))?;
    let (off_row, def_row) = features::zrows(&admitted);

    let value = predict_value(&coefficients, matchup_id, &off_row, &def_row)?;
    println!("matchup {matchup_id}: predicted value {value:+.4} points per possession");
    Ok(())
}

fn positional_arg() -> Option<String> {
    std::env::args().nth(2).filter(|a| !a.starts_with("--"))
}

fn parse_lineup_arg(name: &str) -> Result<[PlayerId; 5]> {
    let raw = parse_string_arg(name)
        .ok_or_else(|| anyhow!("{name} with five comma-separated player ids is required"))?;
    let ids = raw
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<PlayerId>()
                .with_context(|| format!("bad player id `{part}` in {name}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let ids: [PlayerId; 5] = ids
        .try_into()
        .map_err(|v: Vec<PlayerId>| anyhow!("{name} expects 5 player ids, got {}", v.len()))?;
    Ok(ids)
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
