use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Number of player role archetypes produced by the upstream clustering.
pub const ARCHETYPE_COUNT: usize = 8;
/// Number of lineup superclusters produced by the upstream clustering.
pub const SUPERCLUSTER_COUNT: usize = 6;
/// Matchup categories: offensive supercluster crossed with defensive.
pub const MATCHUP_COUNT: usize = SUPERCLUSTER_COUNT * SUPERCLUSTER_COUNT;

pub type PlayerId = u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchetypeEntry {
    pub player: PlayerId,
    pub season: String,
    pub archetype: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    pub player: PlayerId,
    pub season: String,
    pub off_z: f64,
    pub def_z: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperclusterEntry {
    pub players: Vec<PlayerId>,
    pub supercluster: u8,
}

/// Pre-built lookup tables consumed read-only: player-season archetype
/// assignments, player-season skill z-scores, and 5-player-set superclusters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterArtifact {
    pub version: u32,
    pub generated_at: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub archetypes: Vec<ArchetypeEntry>,
    #[serde(default)]
    pub skills: Vec<SkillEntry>,
    #[serde(default)]
    pub superclusters: Vec<SuperclusterEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct SkillRating {
    pub off_z: f64,
    pub def_z: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RosterRegistry {
    archetypes: HashMap<String, u8>,
    skills: HashMap<String, SkillRating>,
    superclusters: HashMap<String, u8>,
}

impl RosterRegistry {
    pub fn from_artifact(artifact: RosterArtifact) -> Result<Self> {
        let mut out = RosterRegistry::default();
        for entry in &artifact.archetypes {
            if usize::from(entry.archetype) >= ARCHETYPE_COUNT {
                return Err(anyhow!(
                    "archetype id {} out of range for player {} season {} (expected < {})",
                    entry.archetype,
                    entry.player,
                    entry.season,
                    ARCHETYPE_COUNT
                ));
            }
            out.archetypes
                .insert(player_key(entry.player, &entry.season), entry.archetype);
        }
        for entry in &artifact.skills {
            if !entry.off_z.is_finite() || !entry.def_z.is_finite() {
                return Err(anyhow!(
                    "non-finite skill rating for player {} season {}",
                    entry.player,
                    entry.season
                ));
            }
            out.skills.insert(
                player_key(entry.player, &entry.season),
                SkillRating {
                    off_z: entry.off_z,
                    def_z: entry.def_z,
                },
            );
        }
        for entry in &artifact.superclusters {
            if entry.players.len() != 5 {
                return Err(anyhow!(
                    "supercluster entry has {} players, expected 5",
                    entry.players.len()
                ));
            }
            if usize::from(entry.supercluster) >= SUPERCLUSTER_COUNT {
                return Err(anyhow!(
                    "supercluster id {} out of range (expected < {})",
                    entry.supercluster,
                    SUPERCLUSTER_COUNT
                ));
            }
            out.superclusters
                .insert(lineup_key(&entry.players), entry.supercluster);
        }
        Ok(out)
    }

    pub fn archetype_for(&self, player: PlayerId, season: &str) -> Option<u8> {
        self.archetypes.get(&player_key(player, season)).copied()
    }

    pub fn skill_for(&self, player: PlayerId, season: &str) -> Option<SkillRating> {
        self.skills.get(&player_key(player, season)).copied()
    }

    /// Supercluster id for a 5-player identity set. Order-insensitive.
    pub fn supercluster_for(&self, players: &[PlayerId; 5]) -> Option<u8> {
        self.superclusters.get(&lineup_key(players)).copied()
    }

    pub fn archetype_entries(&self) -> usize {
        self.archetypes.len()
    }

    pub fn skill_entries(&self) -> usize {
        self.skills.len()
    }

    pub fn supercluster_entries(&self) -> usize {
        self.superclusters.len()
    }
}

pub fn load_registry(path: &PathBuf) -> Result<RosterRegistry> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read roster artifact {}", path.display()))?;
    let artifact = serde_json::from_str::<RosterArtifact>(&raw)
        .with_context(|| format!("parse roster artifact {}", path.display()))?;
    RosterRegistry::from_artifact(artifact)
}

pub fn load_registry_from_env() -> Result<RosterRegistry> {
    let path = registry_path_override()
        .ok_or_else(|| anyhow!("LINEUP_ROSTERS_PATH is not set and no --rosters path given"))?;
    load_registry(&path)
}

pub fn global_registry() -> Option<&'static RosterRegistry> {
    static REGISTRY: OnceLock<Option<RosterRegistry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| load_registry_from_env().ok())
        .as_ref()
}

fn registry_path_override() -> Option<PathBuf> {
    env::var("LINEUP_ROSTERS_PATH")
        .ok()
        .map(|s| PathBuf::from(s.trim()))
        .filter(|p| !p.as_os_str().is_empty())
}

fn player_key(player: PlayerId, season: &str) -> String {
    format!("{player}|{season}")
}

/// Identity-set key: sorted ids joined so that lineup order never matters.
fn lineup_key(players: &[PlayerId]) -> String {
    let mut ids = players.to_vec();
    ids.sort_unstable();
    let mut out = String::with_capacity(ids.len() * 6);
    for (idx, id) in ids.iter().enumerate() {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(&id.to_string());
    }
    out
}
