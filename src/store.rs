use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::model::CoefficientArtifact;

/// Append-only store of training runs. Writers never overwrite an accepted
/// artifact in place: every run lands under `runs/` as a new versioned file,
/// and promotion to "current" is a separate explicit step gated by the
/// validation verdict.
#[derive(Debug, Clone)]
pub struct CoefficientStore {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CurrentPointer {
    run_id: String,
    promoted_at: String,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub kind: String,
    pub verdict: String,
    pub generated_at: String,
    pub worst_rhat: f64,
    pub training_rows: usize,
}

impl CoefficientStore {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join("runs"))
            .with_context(|| format!("create store directory {}", root.display()))?;
        Ok(CoefficientStore {
            root: root.to_path_buf(),
        })
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    fn current_path(&self) -> PathBuf {
        self.root.join("current.json")
    }

    /// Append a run artifact under the next free id. Staging file plus
    /// rename keeps interrupted writes from leaving partial artifacts.
    pub fn append_run(&self, artifact: &CoefficientArtifact) -> Result<String> {
        let next = self
            .run_ids()?
            .iter()
            .filter_map(|id| id.strip_prefix("run_")?.parse::<u64>().ok())
            .max()
            .map_or(1, |n| n + 1);
        let run_id = format!("run_{next:06}");
        let path = self.run_path(&run_id);
        if path.exists() {
            return Err(anyhow!("refusing to overwrite existing {}", path.display()));
        }

        let raw = artifact.to_json()?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("publish {}", path.display()))?;
        Ok(run_id)
    }

    pub fn load_run(&self, run_id: &str) -> Result<CoefficientArtifact> {
        let path = self.run_path(run_id);
        let raw =
            fs::read_to_string(&path).with_context(|| format!("read run {}", path.display()))?;
        CoefficientArtifact::from_json(&raw)
    }

    pub fn run_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(self.runs_dir())
            .with_context(|| format!("list runs in {}", self.root.display()))?;
        for entry in entries {
            let entry = entry.context("read store dir entry")?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json")
                && stem.starts_with("run_")
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let mut out = Vec::new();
        for run_id in self.run_ids()? {
            let artifact = self.load_run(&run_id)?;
            out.push(RunSummary {
                run_id,
                kind: artifact.kind.label().to_string(),
                verdict: artifact.verdict.label().to_string(),
                generated_at: artifact.generated_at.clone(),
                worst_rhat: artifact.diagnostics.worst_rhat,
                training_rows: artifact.training_rows,
            });
        }
        Ok(out)
    }

    /// Promote a stored run to "current". Refuses anything the validation
    /// harness did not accept, regardless of convergence quality.
    pub fn promote(&self, run_id: &str) -> Result<()> {
        let artifact = self.load_run(run_id)?;
        if !artifact.verdict.accepted() {
            return Err(anyhow!(
                "run {run_id} is {} and cannot be promoted",
                artifact.verdict.label()
            ));
        }

        let pointer = CurrentPointer {
            run_id: run_id.to_string(),
            promoted_at: chrono::Utc::now().to_rfc3339(),
        };
        let raw = serde_json::to_string_pretty(&pointer).context("serialize current pointer")?;
        let path = self.current_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("publish {}", path.display()))?;
        Ok(())
    }

    /// The promoted artifact, if any run has been promoted yet.
    pub fn current(&self) -> Result<Option<(String, CoefficientArtifact)>> {
        let path = self.current_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read current pointer {}", path.display()))?;
        let pointer: CurrentPointer =
            serde_json::from_str(&raw).context("parse current pointer")?;
        let artifact = self.load_run(&pointer.run_id)?;
        Ok(Some((pointer.run_id, artifact)))
    }
}
