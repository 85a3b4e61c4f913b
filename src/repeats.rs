use anyhow::Result;
use chrono::{DateTime, TimeDelta};
use chrono_tz::Tz;
use rusqlite::Connection;
use tracing::debug;

use crate::db;
use crate::providers::Candidate;

/// How long a posting identity counts as "seen", and how long rows are kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepeatPolicy {
    pub window: TimeDelta,
    pub retention: TimeDelta,
}

impl Default for RepeatPolicy {
    fn default() -> Self {
        RepeatPolicy {
            window: TimeDelta::days(60),
            retention: TimeDelta::days(60),
        }
    }
}

impl RepeatPolicy {
    /// True when the same (title, company, location, posting time) was scraped
    /// within the window ending at `now`.
    pub fn classify(&self, conn: &Connection, candidate: &Candidate, now: &DateTime<Tz>) -> Result<bool> {
        let since = now.timestamp_millis() - self.window.num_milliseconds();
        db::posting_seen_since(conn, candidate, since)
    }

    /// Delete postings scraped before `now - retention`.
    pub fn purge(&self, conn: &Connection, now: &DateTime<Tz>) -> Result<usize> {
        let cutoff = now.timestamp_millis() - self.retention.num_milliseconds();
        let purged = db::delete_postings_before(conn, cutoff)?;
        debug!(purged, cutoff, "purged expired postings");
        Ok(purged)
    }

    /// Classify then insert in one step. Returns the repeat flag.
    pub fn store(&self, conn: &Connection, candidate: &Candidate, now: &DateTime<Tz>) -> Result<bool> {
        let is_repeat = self.classify(conn, candidate, now)?;
        db::insert_posting(conn, candidate, now, is_repeat)?;
        Ok(is_repeat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::providers::Provider;
    use chrono::TimeZone;
    use chrono_tz::Europe::Berlin;

    fn t0() -> DateTime<Tz> {
        Berlin.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn posting(title: &str, company: Option<&str>) -> Candidate {
        Candidate {
            provider: Provider::LinkedIn,
            term: "rust".to_string(),
            title: title.to_string(),
            company: company.map(String::from),
            location: Some("Berlin".to_string()),
            url: None,
            snippet: None,
            posting_time: t0(),
        }
    }

    #[test]
    fn repeat_within_window_then_fresh_after_purge() {
        let store = Store::open_in_memory().unwrap();
        let policy = RepeatPolicy::default();
        let job = posting("Backend Engineer", Some("Acme"));

        store
            .with(|c| {
                assert!(!policy.store(c, &job, &t0())?);

                let ten_days = t0() + TimeDelta::days(10);
                assert!(policy.store(c, &job, &ten_days)?);

                let seventy_days = t0() + TimeDelta::days(70) + TimeDelta::hours(1);
                assert_eq!(policy.purge(c, &seventy_days)?, 2);
                assert!(!policy.classify(c, &job, &seventy_days)?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn missing_company_matches_empty_company() {
        let store = Store::open_in_memory().unwrap();
        let policy = RepeatPolicy::default();
        store
            .with(|c| {
                policy.store(c, &posting("Ops", None), &t0())?;
                assert!(policy.classify(c, &posting("Ops", Some("")), &t0())?);
                assert!(!policy.classify(c, &posting("Ops", Some("Acme")), &t0())?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn different_posting_time_is_new() {
        let store = Store::open_in_memory().unwrap();
        let policy = RepeatPolicy::default();
        store
            .with(|c| {
                let first = posting("SRE", Some("Acme"));
                policy.store(c, &first, &t0())?;
                let mut later = first.clone();
                later.posting_time = t0() + TimeDelta::minutes(1);
                assert!(!policy.classify(c, &later, &t0())?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn purge_keeps_rows_inside_retention() {
        let store = Store::open_in_memory().unwrap();
        let policy = RepeatPolicy::default();
        store
            .with(|c| {
                policy.store(c, &posting("Old", None), &t0())?;
                policy.store(c, &posting("New", None), &(t0() + TimeDelta::days(30)))?;
                let now = t0() + TimeDelta::days(61);
                assert_eq!(policy.purge(c, &now)?, 1);
                assert_eq!(db::count_postings_between(c, 0, i64::MAX)?, 1);
                Ok(())
            })
            .unwrap();
    }
}
