use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::error::StorageError;

pub mod models;
use models::*;

type DbResult<T> = Result<T, StorageError>;

/// Thread-safe SQLite handle (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database for tests
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Race ingest ───────────────────────────────────────────────────────────

    /// Upsert a race keyed by (race_time_uk, scraped_date) and replace its
    /// runner set, all inside one transaction. Re-scraping the same broadcast
    /// slot on the same day updates the existing row; the key fields stay
    /// immutable, only runner_count / race_signature / scraped_at move.
    pub fn upsert_race_with_runners(
        &self,
        race: &NewRace,
        runners: &[NewRunner],
    ) -> DbResult<Race> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let race_id: i64 = tx.query_row(
            "INSERT INTO races (
                race_time_ist, race_time_uk, runner_count,
                scraped_at, scraped_date, race_signature
             ) VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(race_time_uk, scraped_date) DO UPDATE SET
                runner_count = excluded.runner_count,
                race_signature = excluded.race_signature,
                scraped_at = excluded.scraped_at
             RETURNING id",
            params![
                race.race_time_ist,
                race.race_time_uk,
                race.runner_count,
                race.scraped_at,
                race.scraped_date,
                race.race_signature,
            ],
            |row| row.get(0),
        )?;

        tx.execute(
            "DELETE FROM race_runners WHERE race_id = ?1",
            params![race_id],
        )?;

        for r in runners {
            tx.execute(
                "INSERT INTO race_runners (race_id, runner_number, horse_name, jockey_name, odds)
                 VALUES (?1,?2,?3,?4,?5)",
                params![race_id, r.runner_number, r.horse_name, r.jockey_name, r.odds],
            )?;
        }

        tx.commit()?;

        let persisted = conn.query_row(
            "SELECT id, race_time_ist, race_time_uk, runner_count,
                    scraped_at, scraped_date, race_signature
             FROM races WHERE id = ?1",
            params![race_id],
            map_race,
        )?;
        Ok(persisted)
    }

    // ── Race lookups ──────────────────────────────────────────────────────────

    /// Fetch a race by id
    pub fn get_race(&self, id: i64) -> DbResult<Option<Race>> {
        let conn = self.conn.lock().unwrap();
        let race = conn
            .query_row(
                "SELECT id, race_time_ist, race_time_uk, runner_count,
                        scraped_at, scraped_date, race_signature
                 FROM races WHERE id = ?1",
                params![id],
                map_race,
            )
            .optional()?;
        Ok(race)
    }

    /// Runners for a race, ordered by cloth number
    pub fn runners_for_race(&self, race_id: i64) -> DbResult<Vec<Runner>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, race_id, runner_number, horse_name, jockey_name, odds
             FROM race_runners WHERE race_id = ?1 ORDER BY runner_number",
        )?;
        let runners = stmt
            .query_map(params![race_id], map_runner)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runners)
    }

    /// Results for a race, ordered by finishing position
    pub fn results_for_race(&self, race_id: i64) -> DbResult<Vec<RaceResult>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, race_id, position, horse_number, raw_text,
                    race_time_capture, video_race_time_uk, scraped_at
             FROM race_results WHERE race_id = ?1 ORDER BY position",
        )?;
        let results = stmt
            .query_map(params![race_id], map_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    /// The most recently scraped race carrying the given broadcast time.
    /// Result captures are keyed off this clock, so ties go to the newest scrape.
    pub fn latest_race_by_uk_time(&self, race_time_uk: &str) -> DbResult<Option<Race>> {
        let conn = self.conn.lock().unwrap();
        let race = conn
            .query_row(
                "SELECT id, race_time_ist, race_time_uk, runner_count,
                        scraped_at, scraped_date, race_signature
                 FROM races WHERE race_time_uk = ?1
                 ORDER BY scraped_at DESC LIMIT 1",
                params![race_time_uk],
                map_race,
            )
            .optional()?;
        Ok(race)
    }

    // ── Live selection ────────────────────────────────────────────────────────

    /// The latest-scheduled race of `date` whose schedule clock is at or
    /// before `clock` ("HH:MM" on the display zone). None when the day's
    /// first race is still ahead.
    pub fn current_race(&self, date: NaiveDate, clock: &str) -> DbResult<Option<Race>> {
        let conn = self.conn.lock().unwrap();
        let race = conn
            .query_row(
                "SELECT id, race_time_ist, race_time_uk, runner_count,
                        scraped_at, scraped_date, race_signature
                 FROM races
                 WHERE scraped_date = ?1 AND race_time_ist <= ?2
                 ORDER BY race_time_ist DESC, scraped_at DESC
                 LIMIT 1",
                params![date, clock],
                map_race,
            )
            .optional()?;
        Ok(race)
    }

    /// Races of `date` scheduled strictly after `clock`, soonest first
    pub fn upcoming_races(&self, date: NaiveDate, clock: &str, limit: i64) -> DbResult<Vec<Race>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, race_time_ist, race_time_uk, runner_count,
                    scraped_at, scraped_date, race_signature
             FROM races
             WHERE scraped_date = ?1 AND race_time_ist > ?2
             ORDER BY race_time_ist
             LIMIT ?3",
        )?;
        let races = stmt
            .query_map(params![date, clock, limit], map_race)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(races)
    }

    // ── Duplicate detection ───────────────────────────────────────────────────

    /// All races sharing a signature, newest first (includes the subject race)
    pub fn races_with_signature(&self, signature: &str) -> DbResult<Vec<Race>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, race_time_ist, race_time_uk, runner_count,
                    scraped_at, scraped_date, race_signature
             FROM races WHERE race_signature = ?1
             ORDER BY scraped_at DESC",
        )?;
        let races = stmt
            .query_map(params![signature], map_race)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(races)
    }

    /// How many persisted races carry this signature
    pub fn count_signature(&self, signature: &str) -> DbResult<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM races WHERE race_signature = ?1",
            params![signature],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Latest same-signature capture strictly before `before`, if any
    pub fn last_seen_before(
        &self,
        signature: &str,
        before: DateTime<Utc>,
    ) -> DbResult<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let seen = conn
            .query_row(
                "SELECT scraped_at FROM races
                 WHERE race_signature = ?1 AND scraped_at < ?2
                 ORDER BY scraped_at DESC LIMIT 1",
                params![signature, before],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seen)
    }

    /// Prior airings of a signature (excluding `exclude_id`), newest first,
    /// each with the winner's horse name when a position-1 result maps back
    /// to a runner number on that card.
    pub fn history_for_signature(
        &self,
        signature: &str,
        exclude_id: i64,
    ) -> DbResult<Vec<HistoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.race_time_uk, r.scraped_at,
                    (SELECT rr.horse_name
                     FROM race_results res
                     JOIN race_runners rr
                       ON rr.race_id = r.id AND rr.runner_number = res.horse_number
                     WHERE res.race_id = r.id AND res.position = 1
                     LIMIT 1) AS winner
             FROM races r
             WHERE r.race_signature = ?1 AND r.id <> ?2
             ORDER BY r.scraped_at DESC",
        )?;
        let history = stmt
            .query_map(params![signature, exclude_id], |row| {
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    race_time_uk: row.get(1)?,
                    scraped_at: row.get(2)?,
                    winner: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(history)
    }

    // ── Results ingest ────────────────────────────────────────────────────────

    /// Append a batch of finishing positions for a race. Duplicate rows on
    /// (race_id, position, race_time_capture) are ignored; the returned count
    /// reflects rows actually written.
    pub fn insert_results(
        &self,
        race_id: i64,
        batch: &[NewResult],
        race_time_capture: Option<&str>,
        video_race_time_uk: Option<&str>,
        scraped_at: DateTime<Utc>,
    ) -> DbResult<usize> {
        let conn = self.conn.lock().unwrap();
        let mut inserted = 0;
        for entry in batch {
            inserted += conn.execute(
                "INSERT OR IGNORE INTO race_results (
                    race_id, position, horse_number, raw_text,
                    race_time_capture, video_race_time_uk, scraped_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    race_id,
                    entry.position,
                    entry.horse_number,
                    entry.raw_text,
                    race_time_capture,
                    video_race_time_uk,
                    scraped_at,
                ],
            )?;
        }
        Ok(inserted)
    }

    // ── Export ────────────────────────────────────────────────────────────────

    /// Flat dump of every race joined with its runners and their finishing
    /// positions, newest race first. Feeds the spreadsheet export.
    pub fn export_rows(&self) -> DbResult<Vec<ExportRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.race_time_uk, r.race_time_ist,
                    rr.runner_number, rr.horse_name, rr.jockey_name, rr.odds,
                    res.position
             FROM races r
             LEFT JOIN race_runners rr ON rr.race_id = r.id
             LEFT JOIN race_results res
               ON res.race_id = r.id AND res.horse_number = rr.runner_number
             ORDER BY r.id DESC, rr.runner_number",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ExportRow {
                    race_id: row.get(0)?,
                    race_time_uk: row.get(1)?,
                    race_time_ist: row.get(2)?,
                    runner_number: row.get(3)?,
                    horse_name: row.get(4)?,
                    jockey_name: row.get(5)?,
                    odds: row.get(6)?,
                    position: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_race(row: &rusqlite::Row) -> rusqlite::Result<Race> {
    Ok(Race {
        id: row.get(0)?,
        race_time_ist: row.get(1)?,
        race_time_uk: row.get(2)?,
        runner_count: row.get(3)?,
        scraped_at: row.get(4)?,
        scraped_date: row.get(5)?,
        race_signature: row.get(6)?,
    })
}

fn map_runner(row: &rusqlite::Row) -> rusqlite::Result<Runner> {
    Ok(Runner {
        id: row.get(0)?,
        race_id: row.get(1)?,
        runner_number: row.get(2)?,
        horse_name: row.get(3)?,
        jockey_name: row.get(4)?,
        odds: row.get(5)?,
    })
}

fn map_result(row: &rusqlite::Row) -> rusqlite::Result<RaceResult> {
    Ok(RaceResult {
        id: row.get(0)?,
        race_id: row.get(1)?,
        position: row.get(2)?,
        horse_number: row.get(3)?,
        raw_text: row.get(4)?,
        race_time_capture: row.get(5)?,
        video_race_time_uk: row.get(6)?,
        scraped_at: row.get(7)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS races (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    race_time_ist  TEXT    NOT NULL,
    race_time_uk   TEXT    NOT NULL,
    runner_count   INTEGER NOT NULL,
    scraped_at     TEXT    NOT NULL,
    scraped_date   TEXT    NOT NULL,
    race_signature TEXT    NOT NULL,
    UNIQUE (race_time_uk, scraped_date)
);

CREATE TABLE IF NOT EXISTS race_runners (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    race_id       INTEGER NOT NULL REFERENCES races(id) ON DELETE CASCADE,
    runner_number INTEGER NOT NULL,
    horse_name    TEXT    NOT NULL,
    jockey_name   TEXT,
    odds          TEXT,
    UNIQUE (race_id, runner_number)
);

CREATE TABLE IF NOT EXISTS race_results (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    race_id            INTEGER NOT NULL REFERENCES races(id) ON DELETE CASCADE,
    position           INTEGER NOT NULL,
    horse_number       INTEGER,
    raw_text           TEXT,
    race_time_capture  TEXT,
    video_race_time_uk TEXT,
    scraped_at         TEXT    NOT NULL,
    UNIQUE (race_id, position, race_time_capture)
);

CREATE INDEX IF NOT EXISTS idx_races_signature ON races(race_signature);
CREATE INDEX IF NOT EXISTS idx_races_date_time ON races(scraped_date, race_time_ist);
CREATE INDEX IF NOT EXISTS idx_results_race ON race_results(race_id);
"#;

/// One line of the spreadsheet export: a runner with its race context and
/// finishing position when known
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRow {
    pub race_id: i64,
    pub race_time_uk: String,
    pub race_time_ist: String,
    pub runner_number: Option<i64>,
    pub horse_name: Option<String>,
    pub jockey_name: Option<String>,
    pub odds: Option<String>,
    pub position: Option<i64>,
}
