use std::collections::BTreeMap;

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use lineup_lab::admission::AdmissionPolicy;
use lineup_lab::features::zrows;
use lineup_lab::matchup::classify;
use lineup_lab::model::{CoefficientRow, CoefficientSet, predict_value};
use lineup_lab::possessions::Possession;
use lineup_lab::rosters::{
    ARCHETYPE_COUNT, ArchetypeEntry, RosterArtifact, RosterRegistry, SkillEntry,
    SuperclusterEntry,
};

const SEASON: &str = "2023-24";
const SQUAD: u32 = 40;

fn bench_registry() -> RosterRegistry {
    let mut artifact = RosterArtifact {
        version: 1,
        generated_at: "bench".into(),
        source: None,
        archetypes: Vec::new(),
        skills: Vec::new(),
        superclusters: Vec::new(),
    };
    for id in 1..=SQUAD {
        artifact.archetypes.push(ArchetypeEntry {
            player: id,
            season: SEASON.into(),
            archetype: (id % ARCHETYPE_COUNT as u32) as u8,
        });
        artifact.skills.push(SkillEntry {
            player: id,
            season: SEASON.into(),
            off_z: (id as f64 * 0.37).sin(),
            def_z: (id as f64 * 0.61).cos(),
        });
    }
    for start in 0..(SQUAD - 4) {
        let players = (start + 1..=start + 5).collect::<Vec<_>>();
        artifact.superclusters.push(SuperclusterEntry {
            players,
            supercluster: (start % 6) as u8,
        });
    }
    RosterRegistry::from_artifact(artifact).unwrap()
}

fn bench_possessions(n: usize) -> Vec<Possession> {
    (0..n)
        .map(|i| {
            let off_start = (i as u32 % (SQUAD - 9)) + 1;
            let def_start = off_start + 5;
            Possession {
                poss_id: i as i64,
                season: SEASON.into(),
                y: (i % 4) as f64,
                offense: [
                    off_start,
                    off_start + 1,
                    off_start + 2,
                    off_start + 3,
                    off_start + 4,
                ],
                defense: [
                    def_start,
                    def_start + 1,
                    def_start + 2,
                    def_start + 3,
                    def_start + 4,
                ],
            }
        })
        .collect()
}

fn bench_admit_and_aggregate(c: &mut Criterion) {
    let registry = bench_registry();
    let possessions = bench_possessions(1000);
    let policy = AdmissionPolicy::StrictIntersection;

    c.bench_function("admit_aggregate_classify_1000", |b| {
        b.iter(|| {
            let mut admitted = 0usize;
            for poss in &possessions {
                if let Ok(resolved) = policy.admit(black_box(poss), &registry)
                    && let Ok(m) = classify(&poss.offense, &poss.defense, &registry)
                {
                    let (off, def) = zrows(&resolved);
                    black_box((off, def, m));
                    admitted += 1;
                }
            }
            black_box(admitted);
        })
    });
}

fn bench_predict(c: &mut Criterion) {
    let mut rows = BTreeMap::new();
    for m in 0..36u16 {
        let mut row = CoefficientRow {
            intercept: 1.0 + 0.01 * m as f64,
            off: [0.0; ARCHETYPE_COUNT],
            def: [0.0; ARCHETYPE_COUNT],
        };
        for j in 0..ARCHETYPE_COUNT {
            row.off[j] = 0.05 + 0.01 * j as f64;
            row.def[j] = 0.04 + 0.01 * j as f64;
        }
        rows.insert(m, row);
    }
    let set = CoefficientSet::MatchupSpecific { rows, sigma: 1.1 };

    let off = [0.8; ARCHETYPE_COUNT];
    let def = [0.4; ARCHETYPE_COUNT];
    c.bench_function("predict_value_all_matchups", |b| {
        b.iter(|| {
            let mut total = 0.0;
            for m in 0..36u16 {
                total += predict_value(black_box(&set), m, &off, &def).unwrap();
            }
            black_box(total);
        })
    });
}

criterion_group!(perf, bench_admit_and_aggregate, bench_predict);
criterion_main!(perf);
