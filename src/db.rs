use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::counters::OutcomeCounters;
use crate::providers::Candidate;
use crate::scheduler::{RunState, SchedulerStatus};
use crate::timeparse::canonical;

/// Shared handle to the SQLite database. Cheap to clone; every call holds
/// the connection only for the duration of the closure.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {:?}", dir))?;
        }
        let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))?;
        f(&conn)
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS search_profiles (
            id         INTEGER PRIMARY KEY,
            provider   TEXT NOT NULL,
            location   TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS search_terms (
            id         INTEGER PRIMARY KEY,
            profile_id INTEGER NOT NULL REFERENCES search_profiles(id) ON DELETE CASCADE,
            term       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_terms_profile ON search_terms(profile_id);

        CREATE TABLE IF NOT EXISTS provider_credentials (
            provider   TEXT PRIMARY KEY,
            data       TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS postings (
            id           INTEGER PRIMARY KEY,
            provider     TEXT NOT NULL,
            term         TEXT NOT NULL,
            title        TEXT NOT NULL,
            company      TEXT,
            location     TEXT,
            url          TEXT,
            snippet      TEXT,
            posting_time TEXT NOT NULL,
            scrape_time  TEXT NOT NULL,
            scrape_epoch INTEGER NOT NULL,
            is_repeat    BOOLEAN NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_postings_identity ON postings(title, posting_time);
        CREATE INDEX IF NOT EXISTS idx_postings_scraped ON postings(scrape_epoch);

        CREATE TABLE IF NOT EXISTS scheduler_state (
            id               INTEGER PRIMARY KEY CHECK(id = 1),
            state            TEXT NOT NULL CHECK(state IN ('idle','running','paused')),
            is_job_running   BOOLEAN NOT NULL DEFAULT 0,
            interval_minutes INTEGER NOT NULL DEFAULT 60,
            last_run_at      TEXT,
            next_run_at      TEXT
        );
        INSERT OR IGNORE INTO scheduler_state (id, state) VALUES (1, 'idle');

        CREATE TABLE IF NOT EXISTS outcome_counters (
            id             INTEGER PRIMARY KEY CHECK(id = 1),
            total_attempts INTEGER NOT NULL DEFAULT 0,
            success_count  INTEGER NOT NULL DEFAULT 0,
            failure_count  INTEGER NOT NULL DEFAULT 0,
            last_reset_at  TEXT
        );
        INSERT OR IGNORE INTO outcome_counters (id) VALUES (1);
        ",
    )?;
    Ok(())
}

// ── Search profiles ──

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRow {
    pub id: i64,
    pub provider: String,
    pub location: String,
    pub terms: Vec<String>,
}

/// Insert a profile, or replace an existing one together with its terms.
/// Blank terms are dropped.
pub fn upsert_profile(
    conn: &Connection,
    id: Option<i64>,
    provider: &str,
    location: &str,
    terms: &[String],
) -> Result<i64> {
    let tx = conn.unchecked_transaction()?;
    let profile_id = match id {
        Some(id) => {
            let updated = tx.execute(
                "UPDATE search_profiles SET provider = ?1, location = ?2 WHERE id = ?3",
                params![provider, location, id],
            )?;
            if updated == 0 {
                bail!("search profile {} does not exist", id);
            }
            tx.execute("DELETE FROM search_terms WHERE profile_id = ?1", params![id])?;
            id
        }
        None => {
            tx.execute(
                "INSERT INTO search_profiles (provider, location) VALUES (?1, ?2)",
                params![provider, location],
            )?;
            tx.last_insert_rowid()
        }
    };
    {
        let mut stmt = tx.prepare("INSERT INTO search_terms (profile_id, term) VALUES (?1, ?2)")?;
        for term in terms.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            stmt.execute(params![profile_id, term])?;
        }
    }
    tx.commit()?;
    Ok(profile_id)
}

pub fn fetch_profiles(conn: &Connection) -> Result<Vec<ProfileRow>> {
    let mut stmt = conn.prepare("SELECT id, provider, location FROM search_profiles ORDER BY id")?;
    let mut profiles = stmt
        .query_map([], |row| {
            Ok(ProfileRow {
                id: row.get(0)?,
                provider: row.get(1)?,
                location: row.get(2)?,
                terms: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare("SELECT profile_id, term FROM search_terms ORDER BY id")?;
    let terms = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (profile_id, term) in terms {
        if let Some(p) = profiles.iter_mut().find(|p| p.id == profile_id) {
            p.terms.push(term);
        }
    }
    Ok(profiles)
}

pub fn delete_profile(conn: &Connection, id: i64) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM search_terms WHERE profile_id = ?1", params![id])?;
    let deleted = tx.execute("DELETE FROM search_profiles WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(deleted > 0)
}

// ── Credentials ──

#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRow {
    pub provider: String,
    pub data: BTreeMap<String, String>,
    pub updated_at: String,
}

pub fn upsert_credential(
    conn: &Connection,
    provider: &str,
    data: &BTreeMap<String, String>,
    updated_at: &str,
) -> Result<()> {
    let payload = serde_json::to_string(data)?;
    conn.execute(
        "INSERT INTO provider_credentials (provider, data, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(provider) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        params![provider, payload, updated_at],
    )?;
    Ok(())
}

pub fn fetch_credential(conn: &Connection, provider: &str) -> Result<Option<CredentialRow>> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT provider, data, updated_at FROM provider_credentials WHERE provider = ?1",
            params![provider],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    Ok(row.map(|(provider, data, updated_at)| CredentialRow {
        provider,
        data: parse_bundle(&data),
        updated_at,
    }))
}

pub fn fetch_credentials(conn: &Connection) -> Result<Vec<CredentialRow>> {
    let mut stmt = conn.prepare(
        "SELECT provider, data, updated_at FROM provider_credentials ORDER BY provider",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let data: String = row.get(1)?;
            Ok(CredentialRow {
                provider: row.get(0)?,
                data: parse_bundle(&data),
                updated_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Unreadable bundles read as empty; non-string values are kept in their JSON form.
fn parse_bundle(raw: &str) -> BTreeMap<String, String> {
    let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(raw).unwrap_or_default();
    parsed
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect()
}

// ── Postings ──

pub fn insert_posting(
    conn: &Connection,
    candidate: &Candidate,
    scrape_time: &DateTime<Tz>,
    is_repeat: bool,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO postings
         (provider, term, title, company, location, url, snippet,
          posting_time, scrape_time, scrape_epoch, is_repeat)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            candidate.provider.as_str(),
            candidate.term,
            candidate.title,
            candidate.company.as_deref().filter(|s| !s.is_empty()),
            candidate.location.as_deref().filter(|s| !s.is_empty()),
            candidate.url,
            candidate.snippet,
            canonical(&candidate.posting_time),
            canonical(scrape_time),
            scrape_time.timestamp_millis(),
            is_repeat,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Is there a posting with this identity scraped at or after `since_epoch_ms`?
pub fn posting_seen_since(
    conn: &Connection,
    candidate: &Candidate,
    since_epoch_ms: i64,
) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM postings
             WHERE title = ?1
               AND ifnull(company, '') = ?2
               AND ifnull(location, '') = ?3
               AND posting_time = ?4
               AND scrape_epoch >= ?5
             LIMIT 1",
            params![
                candidate.title,
                candidate.company.as_deref().unwrap_or(""),
                candidate.location.as_deref().unwrap_or(""),
                canonical(&candidate.posting_time),
                since_epoch_ms,
            ],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn delete_postings_before(conn: &Connection, epoch_ms: i64) -> Result<usize> {
    let n = conn.execute("DELETE FROM postings WHERE scrape_epoch < ?1", params![epoch_ms])?;
    Ok(n)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostingRow {
    pub id: i64,
    pub provider: String,
    pub term: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub snippet: Option<String>,
    pub posting_time: String,
    pub scrape_time: String,
    pub is_repeat: bool,
}

pub struct PostingQuery<'a> {
    pub from_epoch_ms: i64,
    pub to_epoch_ms: i64,
    pub term: Option<&'a str>,
    pub location: Option<&'a str>,
    pub repeats: bool,
    pub limit: usize,
    pub offset: usize,
}

pub fn fetch_postings(conn: &Connection, q: &PostingQuery) -> Result<Vec<PostingRow>> {
    let mut conditions = vec![
        "scrape_epoch BETWEEN ?1 AND ?2".to_string(),
        "is_repeat = ?3".to_string(),
    ];
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
        Box::new(q.from_epoch_ms),
        Box::new(q.to_epoch_ms),
        Box::new(q.repeats),
    ];
    if let Some(t) = q.term {
        conditions.push(format!("term = ?{}", params.len() + 1));
        params.push(Box::new(t.to_string()));
    }
    if let Some(l) = q.location {
        conditions.push(format!("location = ?{}", params.len() + 1));
        params.push(Box::new(l.to_string()));
    }

    let sql = format!(
        "SELECT id, provider, term, title, company, location, url, snippet,
                posting_time, scrape_time, is_repeat
         FROM postings
         WHERE {}
         ORDER BY scrape_epoch DESC, id DESC
         LIMIT {} OFFSET {}",
        conditions.join(" AND "),
        q.limit,
        q.offset
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(PostingRow {
                id: row.get(0)?,
                provider: row.get(1)?,
                term: row.get(2)?,
                title: row.get(3)?,
                company: row.get(4)?,
                location: row.get(5)?,
                url: row.get(6)?,
                snippet: row.get(7)?,
                posting_time: row.get(8)?,
                scrape_time: row.get(9)?,
                is_repeat: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_postings_between(conn: &Connection, from_epoch_ms: i64, to_epoch_ms: i64) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM postings WHERE scrape_epoch BETWEEN ?1 AND ?2",
        params![from_epoch_ms, to_epoch_ms],
        |r| r.get(0),
    )?;
    Ok(n as usize)
}

/// Distinct non-empty values of `column` among postings scraped since `since_epoch_ms`.
pub fn distinct_posting_values(conn: &Connection, column: PostingColumn, since_epoch_ms: i64) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT DISTINCT {col} FROM postings
         WHERE scrape_epoch >= ?1 AND {col} IS NOT NULL AND {col} != ''
         ORDER BY {col} ASC",
        col = column.as_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let values = stmt
        .query_map(params![since_epoch_ms], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(values)
}

#[derive(Debug, Clone, Copy)]
pub enum PostingColumn {
    Term,
    Location,
}

impl PostingColumn {
    fn as_sql(&self) -> &'static str {
        match self {
            PostingColumn::Term => "term",
            PostingColumn::Location => "location",
        }
    }
}

// ── Scheduler state ──

pub fn load_scheduler_state(conn: &Connection) -> Result<SchedulerStatus> {
    let (state, is_running, interval_minutes, last_run_at, next_run_at): (
        String,
        bool,
        i64,
        Option<String>,
        Option<String>,
    ) = conn.query_row(
        "SELECT state, is_job_running, interval_minutes, last_run_at, next_run_at
         FROM scheduler_state WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
    )?;
    let state = RunState::parse(&state)
        .ok_or_else(|| anyhow!("unknown scheduler state {:?}", state))?;
    Ok(SchedulerStatus {
        state,
        is_running,
        interval_minutes,
        last_run_at,
        next_run_at,
    })
}

/// Boot-time reset. Returns the state that was persisted before recovery.
pub fn recover_scheduler_state(conn: &Connection, interval_minutes: i64) -> Result<RunState> {
    let tx = conn.unchecked_transaction()?;
    let previous = load_scheduler_state(&tx)?.state;
    if previous == RunState::Running {
        tx.execute(
            "UPDATE scheduler_state
             SET state = 'idle', next_run_at = NULL, is_job_running = 0, interval_minutes = ?1
             WHERE id = 1",
            params![interval_minutes],
        )?;
    } else {
        tx.execute(
            "UPDATE scheduler_state SET is_job_running = 0, interval_minutes = ?1 WHERE id = 1",
            params![interval_minutes],
        )?;
    }
    tx.commit()?;
    Ok(previous)
}

/// Single statement so a failed transition leaves the row untouched.
pub fn set_run_state(conn: &Connection, state: RunState, next_run_at: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE scheduler_state SET state = ?1, next_run_at = ?2 WHERE id = 1",
        params![state.as_str(), next_run_at],
    )?;
    Ok(())
}

pub fn mark_job_started(conn: &Connection) -> Result<()> {
    conn.execute("UPDATE scheduler_state SET is_job_running = 1 WHERE id = 1", [])?;
    Ok(())
}

/// End-of-run bookkeeping. `last_run_at` is only overwritten when given.
pub fn mark_job_finished(
    conn: &Connection,
    last_run_at: Option<&str>,
    next_run_at: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE scheduler_state
         SET is_job_running = 0,
             last_run_at = COALESCE(?1, last_run_at),
             next_run_at = ?2
         WHERE id = 1",
        params![last_run_at, next_run_at],
    )?;
    Ok(())
}

// ── Outcome counters ──

pub fn bump_counters(conn: &Connection, attempts: i64, successes: i64, failures: i64) -> Result<()> {
    conn.execute(
        "UPDATE outcome_counters
         SET total_attempts = total_attempts + ?1,
             success_count = success_count + ?2,
             failure_count = failure_count + ?3
         WHERE id = 1",
        params![attempts, successes, failures],
    )?;
    Ok(())
}

pub fn fetch_counters(conn: &Connection) -> Result<OutcomeCounters> {
    let counters = conn.query_row(
        "SELECT total_attempts, success_count, failure_count, last_reset_at
         FROM outcome_counters WHERE id = 1",
        [],
        |row| {
            Ok(OutcomeCounters {
                total_attempts: row.get(0)?,
                success_count: row.get(1)?,
                failure_count: row.get(2)?,
                last_reset_at: row.get(3)?,
            })
        },
    )?;
    Ok(counters)
}

pub fn reset_counters(conn: &Connection, at: &str) -> Result<()> {
    conn.execute(
        "UPDATE outcome_counters
         SET total_attempts = 0, success_count = 0, failure_count = 0, last_reset_at = ?1
         WHERE id = 1",
        params![at],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent_and_seeds_singletons() {
        let store = Store::open_in_memory().unwrap();
        store.with(|c| init_schema(c)).unwrap();
        let status = store.with(|c| load_scheduler_state(c)).unwrap();
        assert_eq!(status.state, RunState::Idle);
        assert!(!status.is_running);
        assert_eq!(status.interval_minutes, 60);
        let counters = store.with(|c| fetch_counters(c)).unwrap();
        assert_eq!(counters.total_attempts, 0);
        assert_eq!(counters.last_reset_at, None);
    }

    #[test]
    fn profile_upsert_replaces_terms() {
        let store = Store::open_in_memory().unwrap();
        store
            .with(|c| {
                let id = upsert_profile(c, None, "LinkedIn", "Berlin", &["rust".into(), "  ".into(), " go ".into()])?;
                let profiles = fetch_profiles(c)?;
                assert_eq!(profiles.len(), 1);
                assert_eq!(profiles[0].terms, vec!["rust", "go"]);

                upsert_profile(c, Some(id), "LinkedIn", "Hamburg", &["zig".into()])?;
                let profiles = fetch_profiles(c)?;
                assert_eq!(profiles[0].location, "Hamburg");
                assert_eq!(profiles[0].terms, vec!["zig"]);

                assert!(upsert_profile(c, Some(id + 100), "LinkedIn", "X", &[]).is_err());
                assert!(delete_profile(c, id)?);
                assert!(!delete_profile(c, id)?);
                assert!(fetch_profiles(c)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn credential_upsert_keeps_one_row() {
        let store = Store::open_in_memory().unwrap();
        store
            .with(|c| {
                let mut data = BTreeMap::new();
                data.insert("LINKEDIN_LI_AT".to_string(), "a".to_string());
                upsert_credential(c, "LinkedIn", &data, "2024-01-01T00:00:00.000+01:00")?;
                data.insert("LINKEDIN_LI_AT".to_string(), "b".to_string());
                upsert_credential(c, "LinkedIn", &data, "2024-01-02T00:00:00.000+01:00")?;
                let all = fetch_credentials(c)?;
                assert_eq!(all.len(), 1);
                assert_eq!(all[0].data["LINKEDIN_LI_AT"], "b");
                assert_eq!(all[0].updated_at, "2024-01-02T00:00:00.000+01:00");
                assert!(fetch_credential(c, "Glassdoor")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn malformed_bundle_reads_empty() {
        assert!(parse_bundle("not json").is_empty());
        let parsed = parse_bundle(r#"{"recencyHours": 1, "K": "v"}"#);
        assert_eq!(parsed["recencyHours"], "1");
        assert_eq!(parsed["K"], "v");
    }

    #[test]
    fn finished_run_keeps_last_run_when_failed() {
        let store = Store::open_in_memory().unwrap();
        store
            .with(|c| {
                mark_job_started(c)?;
                mark_job_finished(c, Some("2024-01-01T10:00:00.000+01:00"), None)?;
                mark_job_started(c)?;
                mark_job_finished(c, None, Some("2024-01-01T12:00:00.000+01:00"))?;
                let s = load_scheduler_state(c)?;
                assert!(!s.is_running);
                assert_eq!(s.last_run_at.as_deref(), Some("2024-01-01T10:00:00.000+01:00"));
                assert_eq!(s.next_run_at.as_deref(), Some("2024-01-01T12:00:00.000+01:00"));
                Ok(())
            })
            .unwrap();
    }
}
