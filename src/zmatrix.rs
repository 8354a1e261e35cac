use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::features::ZRow;
use crate::rosters::ARCHETYPE_COUNT;

/// One admitted possession in estimator form. The Z-matrix file is the sole
/// interface the estimator consumes: it never reaches back into raw
/// possessions or lookup tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingRow {
    pub off: ZRow,
    pub def: ZRow,
    pub matchup: u16,
    pub y: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ZMatrixSummary {
    pub rows: usize,
    pub per_matchup: BTreeMap<u16, usize>,
}

pub fn summarize(rows: &[TrainingRow]) -> ZMatrixSummary {
    let mut per_matchup = BTreeMap::new();
    for row in rows {
        *per_matchup.entry(row.matchup).or_insert(0) += 1;
    }
    ZMatrixSummary {
        rows: rows.len(),
        per_matchup,
    }
}

/// An archetype column that is zero across every admitted row signals an
/// upstream feature-construction defect, not sparse-but-real data. Returns
/// the offending column names.
pub fn dead_columns(rows: &[TrainingRow]) -> Vec<String> {
    let mut off_support = [false; ARCHETYPE_COUNT];
    let mut def_support = [false; ARCHETYPE_COUNT];
    for row in rows {
        for j in 0..ARCHETYPE_COUNT {
            if row.off[j] != 0.0 {
                off_support[j] = true;
            }
            if row.def[j] != 0.0 {
                def_support[j] = true;
            }
        }
    }
    let mut dead = Vec::new();
    for j in 0..ARCHETYPE_COUNT {
        if !off_support[j] {
            dead.push(format!("off_z{j}"));
        }
    }
    for j in 0..ARCHETYPE_COUNT {
        if !def_support[j] {
            dead.push(format!("def_z{j}"));
        }
    }
    dead
}

fn validate(rows: &[TrainingRow]) -> Result<()> {
    if rows.is_empty() {
        return Err(anyhow!("z-matrix has no rows"));
    }
    for (idx, row) in rows.iter().enumerate() {
        if !row.y.is_finite() {
            return Err(anyhow!("z-matrix row {idx}: non-finite outcome"));
        }
        if usize::from(row.matchup) >= crate::rosters::MATCHUP_COUNT {
            return Err(anyhow!(
                "z-matrix row {idx}: matchup id {} out of range",
                row.matchup
            ));
        }
        for j in 0..ARCHETYPE_COUNT {
            if !row.off[j].is_finite() || !row.def[j].is_finite() {
                return Err(anyhow!("z-matrix row {idx}: non-finite feature value"));
            }
        }
    }
    let dead = dead_columns(rows);
    if !dead.is_empty() {
        return Err(anyhow!(
            "feature columns zero across all {} rows: {} (upstream feature-construction defect)",
            rows.len(),
            dead.join(", ")
        ));
    }
    Ok(())
}

fn header() -> String {
    let mut cols = Vec::with_capacity(2 * ARCHETYPE_COUNT + 2);
    for j in 0..ARCHETYPE_COUNT {
        cols.push(format!("off_z{j}"));
    }
    for j in 0..ARCHETYPE_COUNT {
        cols.push(format!("def_z{j}"));
    }
    cols.push("matchup".to_string());
    cols.push("y".to_string());
    cols.join(",")
}

/// Write the training file atomically (staging `.tmp` + rename). Refuses to
/// write a matrix that fails schema validation.
pub fn write_zmatrix(path: &Path, rows: &[TrainingRow]) -> Result<()> {
    validate(rows)?;

    let mut out = String::with_capacity(rows.len() * 128);
    out.push_str(&header());
    out.push('\n');
    for row in rows {
        for j in 0..ARCHETYPE_COUNT {
            out.push_str(&format!("{:.6},", row.off[j]));
        }
        for j in 0..ARCHETYPE_COUNT {
            out.push_str(&format!("{:.6},", row.def[j]));
        }
        out.push_str(&format!("{},{:.6}\n", row.matchup, row.y));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, out).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("publish {}", path.display()))?;
    Ok(())
}

pub fn read_zmatrix(path: &Path) -> Result<Vec<TrainingRow>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read z-matrix {}", path.display()))?;
    let mut lines = raw.lines();
    let head = lines.next().ok_or_else(|| anyhow!("z-matrix is empty"))?;
    if head.trim() != header() {
        return Err(anyhow!(
            "z-matrix header mismatch: expected `{}`, found `{}`",
            header(),
            head.trim()
        ));
    }

    let width = 2 * ARCHETYPE_COUNT + 2;
    let mut rows = Vec::new();
    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = line.split(',').collect::<Vec<_>>();
        if fields.len() != width {
            return Err(anyhow!(
                "z-matrix line {}: {} columns, expected {width}",
                line_no + 2,
                fields.len()
            ));
        }
        let mut row = TrainingRow {
            off: [0.0; ARCHETYPE_COUNT],
            def: [0.0; ARCHETYPE_COUNT],
            matchup: 0,
            y: 0.0,
        };
        for j in 0..ARCHETYPE_COUNT {
            row.off[j] = parse_f64(fields[j], line_no)?;
            row.def[j] = parse_f64(fields[ARCHETYPE_COUNT + j], line_no)?;
        }
        row.matchup = fields[2 * ARCHETYPE_COUNT]
            .trim()
            .parse::<u16>()
            .with_context(|| format!("z-matrix line {}: bad matchup id", line_no + 2))?;
        row.y = parse_f64(fields[2 * ARCHETYPE_COUNT + 1], line_no)?;
        rows.push(row);
    }

    validate(&rows)?;
    Ok(rows)
}

fn parse_f64(raw: &str, line_no: usize) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("z-matrix line {}: bad numeric field `{raw}`", line_no + 2))
}
