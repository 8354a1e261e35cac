use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticsReport;
use crate::features::ZRow;
use crate::matchup::is_valid_matchup;
use crate::rosters::ARCHETYPE_COUNT;

pub const ARTIFACT_VERSION: u32 = 1;

/// One intercept plus k offense and k defense coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub intercept: f64,
    pub off: [f64; ARCHETYPE_COUNT],
    pub def: [f64; ARCHETYPE_COUNT],
}

/// A trained coefficient set, or the explicit absence of one. `Unavailable`
/// exists so that callers must handle the untrained state; nothing in this
/// crate substitutes a placeholder heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoefficientSet {
    Global {
        row: CoefficientRow,
        sigma: f64,
    },
    MatchupSpecific {
        rows: BTreeMap<u16, CoefficientRow>,
        sigma: f64,
    },
    Unavailable,
}

impl CoefficientSet {
    pub fn kind_label(&self) -> &'static str {
        match self {
            CoefficientSet::Global { .. } => "global",
            CoefficientSet::MatchupSpecific { .. } => "matchup-specific",
            CoefficientSet::Unavailable => "unavailable",
        }
    }

    /// Matchup ids this set can evaluate. Global sets evaluate any valid id.
    pub fn evaluable_matchups(&self) -> Vec<u16> {
        match self {
            CoefficientSet::Global { .. } => vec![0],
            CoefficientSet::MatchupSpecific { rows, .. } => rows.keys().copied().collect(),
            CoefficientSet::Unavailable => Vec::new(),
        }
    }
}

/// The one shared lineup-evaluation routine. The validation harness, the
/// inspection CLI and any downstream consumer all call this; the prediction
/// formula lives nowhere else.
pub fn predict_value(
    set: &CoefficientSet,
    matchup: u16,
    off: &ZRow,
    def: &ZRow,
) -> Result<f64> {
    if !is_valid_matchup(matchup) {
        return Err(anyhow!("matchup id {matchup} out of range"));
    }
    let row = match set {
        CoefficientSet::Global { row, .. } => row,
        CoefficientSet::MatchupSpecific { rows, .. } => rows.get(&matchup).ok_or_else(|| {
            anyhow!(
                "no coefficients for matchup {matchup} ({} matchups trained)",
                rows.len()
            )
        })?,
        CoefficientSet::Unavailable => {
            return Err(anyhow!(
                "no trained coefficient set available; run fit_lineups and promote a run"
            ));
        }
    };

    let mut value = row.intercept;
    for j in 0..ARCHETYPE_COUNT {
        value += off[j] * row.off[j];
        value -= def[j] * row.def[j];
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterizationKind {
    Global,
    MatchupSpecific,
}

impl ParameterizationKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(ParameterizationKind::Global),
            "matchup" | "matchup-specific" => Ok(ParameterizationKind::MatchupSpecific),
            other => Err(anyhow!(
                "unknown parameterization `{other}` (expected global|matchup-specific)"
            )),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ParameterizationKind::Global => "global",
            ParameterizationKind::MatchupSpecific => "matchup-specific",
        }
    }
}

/// Positivity of skill coefficients is a configurable constraint, not a
/// baked-in model property. Constrained sampling is stable for the pooled
/// global parameterization and degenerate for thin per-matchup data; see
/// DESIGN.md for the tradeoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintMode {
    Constrained,
    Unconstrained,
}

impl ConstraintMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "constrained" => Ok(ConstraintMode::Constrained),
            "unconstrained" => Ok(ConstraintMode::Unconstrained),
            other => Err(anyhow!(
                "unknown constraint mode `{other}` (expected constrained|unconstrained)"
            )),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConstraintMode::Constrained => "constrained",
            ConstraintMode::Unconstrained => "unconstrained",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AcceptanceVerdict {
    Accepted,
    RejectedConvergence {
        worst_rhat: f64,
        divergence_fraction: f64,
    },
    RejectedValidation {
        failed_checks: Vec<String>,
    },
}

impl AcceptanceVerdict {
    pub fn accepted(&self) -> bool {
        matches!(self, AcceptanceVerdict::Accepted)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AcceptanceVerdict::Accepted => "accepted",
            AcceptanceVerdict::RejectedConvergence { .. } => "rejected-convergence",
            AcceptanceVerdict::RejectedValidation { .. } => "rejected-validation",
        }
    }
}

/// The persisted output of one training run: coefficients plus the metadata
/// a consumer needs to judge them. Diagnostics always travel with the
/// coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoefficientArtifact {
    pub version: u32,
    pub generated_at: String,
    pub kind: ParameterizationKind,
    pub constraint: ConstraintMode,
    pub seed: u64,
    pub training_rows: usize,
    #[serde(default)]
    pub per_matchup_rows: BTreeMap<u16, usize>,
    pub coefficients: CoefficientSet,
    pub diagnostics: DiagnosticsReport,
    pub verdict: AcceptanceVerdict,
}

impl CoefficientArtifact {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize coefficient artifact")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let artifact: CoefficientArtifact =
            serde_json::from_str(raw).context("parse coefficient artifact")?;
        if artifact.version != ARTIFACT_VERSION {
            return Err(anyhow!(
                "coefficient artifact version {} unsupported (expected {})",
                artifact.version,
                ARTIFACT_VERSION
            ));
        }
        Ok(artifact)
    }
}
