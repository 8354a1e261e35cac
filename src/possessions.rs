use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::RowAccessor;
use rusqlite::{Connection, params};

use crate::rosters::PlayerId;

/// One offense-vs-defense exchange. Immutable once recorded; produced by an
/// external ingester and consumed read-only here.
#[derive(Debug, Clone)]
pub struct Possession {
    pub poss_id: i64,
    pub season: String,
    /// Points scored by the offense on the possession (free throws included).
    pub y: f64,
    pub offense: [PlayerId; 5],
    pub defense: [PlayerId; 5],
}

#[derive(Debug, Clone, Default)]
pub struct PossessionTableSummary {
    pub rows: usize,
    pub per_season: BTreeMap<String, usize>,
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS possessions (
            poss_id INTEGER PRIMARY KEY,
            season TEXT NOT NULL,
            y REAL NOT NULL,
            off1 INTEGER NOT NULL,
            off2 INTEGER NOT NULL,
            off3 INTEGER NOT NULL,
            off4 INTEGER NOT NULL,
            off5 INTEGER NOT NULL,
            def1 INTEGER NOT NULL,
            def2 INTEGER NOT NULL,
            def3 INTEGER NOT NULL,
            def4 INTEGER NOT NULL,
            def5 INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_possessions_season ON possessions(season);
        "#,
    )
    .context("create possessions schema")?;
    Ok(())
}

pub fn insert_possessions(conn: &mut Connection, rows: &[Possession]) -> Result<usize> {
    let tx = conn.transaction().context("begin possession insert")?;
    let mut inserted = 0usize;
    {
        let mut stmt = tx
            .prepare(
                "INSERT OR REPLACE INTO possessions
                 (poss_id, season, y, off1, off2, off3, off4, off5, def1, def2, def3, def4, def5)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )
            .context("prepare possession insert")?;
        for p in rows {
            stmt.execute(params![
                p.poss_id,
                p.season,
                p.y,
                p.offense[0],
                p.offense[1],
                p.offense[2],
                p.offense[3],
                p.offense[4],
                p.defense[0],
                p.defense[1],
                p.defense[2],
                p.defense[3],
                p.defense[4],
            ])
            .with_context(|| format!("insert possession {}", p.poss_id))?;
            inserted += 1;
        }
    }
    tx.commit().context("commit possession insert")?;
    Ok(inserted)
}

pub fn load_possessions(conn: &Connection, season: Option<&str>) -> Result<Vec<Possession>> {
    let sql = "SELECT poss_id, season, y, off1, off2, off3, off4, off5,
                      def1, def2, def3, def4, def5
               FROM possessions WHERE (?1 IS NULL OR season = ?1)
               ORDER BY poss_id";
    let mut stmt = conn.prepare(sql).context("prepare possession select")?;
    let rows = stmt
        .query_map(params![season], |row| {
            Ok(Possession {
                poss_id: row.get(0)?,
                season: row.get(1)?,
                y: row.get(2)?,
                offense: [row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?],
                defense: [
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                    row.get(11)?,
                    row.get(12)?,
                ],
            })
        })
        .context("query possessions")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode possession row")?);
    }
    Ok(out)
}

/// Positional parquet layout: poss_id, season, y, off1..off5, def1..def5.
pub fn read_possessions_parquet(path: &Path, season: Option<&str>) -> Result<Vec<Possession>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("open parquet reader possessions")?;
    let iter = reader.get_row_iter(None).context("iterate possession rows")?;

    let mut out = Vec::new();
    for (idx, row) in iter.enumerate() {
        let row = row.with_context(|| format!("decode parquet row {idx}"))?;

        let poss_id = row
            .get_long(0)
            .or_else(|_| row.get_int(0).map(i64::from))
            .with_context(|| format!("parquet row {idx}: missing poss_id"))?;
        let row_season = row
            .get_string(1)
            .map(|s| s.to_string())
            .with_context(|| format!("parquet row {idx}: missing season"))?;
        if let Some(want) = season
            && row_season != want
        {
            continue;
        }

        let y = read_num(&row, 2);
        if !y.is_finite() {
            return Err(anyhow!("parquet row {idx}: non-finite outcome value"));
        }

        let mut offense = [0u32; 5];
        let mut defense = [0u32; 5];
        for slot in 0..5 {
            offense[slot] = read_player(&row, 3 + slot)
                .with_context(|| format!("parquet row {idx}: offense slot {slot}"))?;
            defense[slot] = read_player(&row, 8 + slot)
                .with_context(|| format!("parquet row {idx}: defense slot {slot}"))?;
        }

        out.push(Possession {
            poss_id,
            season: row_season,
            y,
            offense,
            defense,
        });
    }
    Ok(out)
}

pub fn summarize(rows: &[Possession]) -> PossessionTableSummary {
    let mut per_season = BTreeMap::new();
    for p in rows {
        *per_season.entry(p.season.clone()).or_insert(0) += 1;
    }
    PossessionTableSummary {
        rows: rows.len(),
        per_season,
    }
}

fn read_player(row: &parquet::record::Row, idx: usize) -> Result<PlayerId> {
    let raw = row
        .get_long(idx)
        .or_else(|_| row.get_int(idx).map(i64::from))
        .map_err(|err| anyhow!("column {idx}: {err}"))?;
    u32::try_from(raw).map_err(|_| anyhow!("column {idx}: player id {raw} out of range"))
}

fn read_num(row: &parquet::record::Row, idx: usize) -> f64 {
    if let Ok(v) = row.get_double(idx) {
        return v;
    }
    if let Ok(v) = row.get_long(idx) {
        return v as f64;
    }
    if let Ok(v) = row.get_int(idx) {
        return v as f64;
    }
    f64::NAN
}
