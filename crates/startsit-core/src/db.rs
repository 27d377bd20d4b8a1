// SQLite persistence for job state and the result cache.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{
    AnalysisJob, CacheEntry, Fingerprint, JobId, JobStatus, PlayerAnalysisResult, TtlClass,
};

/// SQLite-backed persistence for analysis jobs, per-player results, and
/// completed cache entries.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS analysis_jobs (
                job_id           TEXT PRIMARY KEY,
                roster_id        TEXT NOT NULL,
                opponent_team_id TEXT NOT NULL,
                week             INTEGER NOT NULL,
                season           INTEGER NOT NULL,
                player_ids       TEXT NOT NULL,
                status           TEXT NOT NULL,
                error            TEXT,
                created_at       TEXT NOT NULL,
                completed_at     TEXT
            );

            CREATE TABLE IF NOT EXISTS player_results (
                job_id     TEXT NOT NULL REFERENCES analysis_jobs(job_id),
                player_id  TEXT NOT NULL,
                status     TEXT NOT NULL,
                result     TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (job_id, player_id)
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                player_id        TEXT NOT NULL,
                opponent_team_id TEXT NOT NULL,
                week             INTEGER NOT NULL,
                season           INTEGER NOT NULL,
                result           TEXT NOT NULL,
                computed_at      TEXT NOT NULL,
                ttl_class        TEXT NOT NULL,
                PRIMARY KEY (player_id, opponent_team_id, week, season)
            );

            CREATE INDEX IF NOT EXISTS idx_analysis_jobs_status ON analysis_jobs(status);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Insert a job or overwrite its mutable columns (status, error,
    /// completed_at) if it already exists.
    pub fn save_job(&self, job: &AnalysisJob) -> Result<()> {
        let conn = self.conn();
        let player_ids =
            serde_json::to_string(&job.player_ids).context("failed to serialize player_ids")?;
        conn.execute(
            "INSERT INTO analysis_jobs
                (job_id, roster_id, opponent_team_id, week, season, player_ids, status, error, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(job_id) DO UPDATE SET
                status       = excluded.status,
                error        = excluded.error,
                completed_at = excluded.completed_at",
            params![
                job.job_id.to_string(),
                job.roster_id,
                job.opponent_team_id,
                job.week,
                job.season,
                player_ids,
                job.status.as_str(),
                job.error,
                job.created_at.to_rfc3339(),
                job.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .context("failed to save analysis job")?;
        Ok(())
    }

    pub fn load_job(&self, job_id: JobId) -> Result<Option<AnalysisJob>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT job_id, roster_id, opponent_team_id, week, season, player_ids, status, error, created_at, completed_at
                 FROM analysis_jobs WHERE job_id = ?1",
            )
            .context("failed to prepare load_job query")?;

        let raw = stmt
            .query_row(params![job_id.to_string()], RawJob::from_row)
            .optional()
            .context("failed to query analysis job")?;

        raw.map(RawJob::into_job).transpose()
    }

    /// Jobs that were queued or running when the process last stopped.
    pub fn load_unfinished_jobs(&self) -> Result<Vec<AnalysisJob>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT job_id, roster_id, opponent_team_id, week, season, player_ids, status, error, created_at, completed_at
                 FROM analysis_jobs WHERE status IN ('queued', 'running') ORDER BY created_at",
            )
            .context("failed to prepare load_unfinished_jobs query")?;

        let raws = stmt
            .query_map([], RawJob::from_row)
            .context("failed to query unfinished jobs")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map job rows")?;

        raws.into_iter().map(RawJob::into_job).collect()
    }

    // ------------------------------------------------------------------
    // Player results
    // ------------------------------------------------------------------

    pub fn save_player_result(&self, job_id: JobId, result: &PlayerAnalysisResult) -> Result<()> {
        let conn = self.conn();
        let json = serde_json::to_string(result).context("failed to serialize player result")?;
        conn.execute(
            "INSERT OR REPLACE INTO player_results (job_id, player_id, status, result, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job_id.to_string(),
                result.player_id(),
                result.status.as_str(),
                json,
                result.updated_at.to_rfc3339(),
            ],
        )
        .context("failed to save player result")?;
        Ok(())
    }

    pub fn load_player_results(&self, job_id: JobId) -> Result<Vec<PlayerAnalysisResult>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT result FROM player_results WHERE job_id = ?1")
            .context("failed to prepare load_player_results query")?;

        let rows = stmt
            .query_map(params![job_id.to_string()], |row| row.get::<_, String>(0))
            .context("failed to query player results")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map player result rows")?;

        rows.iter()
            .map(|json| {
                serde_json::from_str(json).context("failed to deserialize player result")
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Cache entries
    // ------------------------------------------------------------------

    /// Store a completed cache entry. The fingerprint is the primary key, so
    /// a recomputed (expired) entry replaces the stale row.
    pub fn put_cache_entry(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.conn();
        let fp = &entry.result.fingerprint;
        let json =
            serde_json::to_string(&entry.result).context("failed to serialize cached result")?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries
                (player_id, opponent_team_id, week, season, result, computed_at, ttl_class)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                fp.player_id,
                fp.opponent_team_id,
                fp.week,
                fp.season,
                json,
                entry.computed_at.to_rfc3339(),
                entry.ttl.as_str(),
            ],
        )
        .context("failed to save cache entry")?;
        Ok(())
    }

    pub fn get_cache_entry(&self, fp: &Fingerprint) -> Result<Option<CacheEntry>> {
        let conn = self.conn();
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT result, computed_at, ttl_class FROM cache_entries
                 WHERE player_id = ?1 AND opponent_team_id = ?2 AND week = ?3 AND season = ?4",
                params![fp.player_id, fp.opponent_team_id, fp.week, fp.season],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("failed to query cache entry")?;

        let Some((json, computed_at, ttl)) = row else {
            return Ok(None);
        };

        let result: PlayerAnalysisResult =
            serde_json::from_str(&json).context("failed to deserialize cached result")?;
        let ttl = TtlClass::parse(&ttl)
            .with_context(|| format!("unknown ttl class in cache_entries: {ttl}"))?;
        Ok(Some(CacheEntry {
            result,
            computed_at: parse_timestamp(&computed_at)?,
            ttl,
        }))
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Column values of an `analysis_jobs` row before parsing.
struct RawJob {
    job_id: String,
    roster_id: String,
    opponent_team_id: String,
    week: u8,
    season: u16,
    player_ids: String,
    status: String,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl RawJob {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawJob {
            job_id: row.get(0)?,
            roster_id: row.get(1)?,
            opponent_team_id: row.get(2)?,
            week: row.get(3)?,
            season: row.get(4)?,
            player_ids: row.get(5)?,
            status: row.get(6)?,
            error: row.get(7)?,
            created_at: row.get(8)?,
            completed_at: row.get(9)?,
        })
    }

    fn into_job(self) -> Result<AnalysisJob> {
        let job_id = JobId::parse(&self.job_id)
            .with_context(|| format!("invalid job id in analysis_jobs: {}", self.job_id))?;
        let status = JobStatus::parse(&self.status)
            .with_context(|| format!("invalid job status in analysis_jobs: {}", self.status))?;
        let player_ids: Vec<String> =
            serde_json::from_str(&self.player_ids).context("failed to deserialize player_ids")?;
        Ok(AnalysisJob {
            job_id,
            roster_id: self.roster_id,
            opponent_team_id: self.opponent_team_id,
            week: self.week,
            season: self.season,
            player_ids,
            status,
            created_at: parse_timestamp(&self.created_at)?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
            error: self.error,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp: {s}"))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
