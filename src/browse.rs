use std::str::FromStr;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use rusqlite::Connection;
use serde::Serialize;

use crate::db::{self, PostingColumn, PostingQuery, PostingRow};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;
const HIGHLIGHT_DAYS: i64 = 7;
const FILTER_DAYS: i64 = 60;

/// Calendar range of a posting listing, in the configured zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    #[default]
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Period::Today),
            "yesterday" => Ok(Period::Yesterday),
            "7" | "7d" | "week" => Ok(Period::Last7Days),
            "30" | "30d" | "month" => Ok(Period::Last30Days),
            other => bail!("unknown period {:?} (expected today, yesterday, 7 or 30)", other),
        }
    }
}

impl Period {
    /// Inclusive epoch-millisecond bounds, whole days.
    pub fn range(&self, now: &DateTime<Tz>) -> (i64, i64) {
        let today = now.date_naive();
        let (first, last) = match self {
            Period::Today => (today, today),
            Period::Yesterday => {
                let y = today.pred_opt().unwrap_or(today);
                (y, y)
            }
            Period::Last7Days => (days_before(today, 6), today),
            Period::Last30Days => (days_before(today, 29), today),
        };
        day_span(first, last, now.timezone())
    }
}

fn days_before(day: NaiveDate, n: i64) -> NaiveDate {
    day.checked_sub_signed(TimeDelta::days(n)).unwrap_or(day)
}

fn local_midnight(day: NaiveDate, zone: Tz) -> DateTime<Tz> {
    let naive = day.and_time(NaiveTime::MIN);
    zone.from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| zone.from_utc_datetime(&naive))
}

/// Start of `first` to the last millisecond of `last`.
fn day_span(first: NaiveDate, last: NaiveDate, zone: Tz) -> (i64, i64) {
    let start = local_midnight(first, zone).timestamp_millis();
    let end = match last.succ_opt() {
        Some(next) => local_midnight(next, zone).timestamp_millis() - 1,
        None => i64::MAX,
    };
    (start, end)
}

#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub period: Period,
    pub keyword: Option<String>,
    pub location: Option<String>,
    pub page: usize,
    /// Zero selects the default page size.
    pub page_size: usize,
}

/// Postings scraped within one clock hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourGroup {
    pub hour_label: String,
    pub jobs: Vec<PostingRow>,
}

/// First-seen postings for a period, newest first, grouped by scrape hour.
pub fn list_postings(conn: &Connection, now: &DateTime<Tz>, filter: &ListingFilter) -> Result<Vec<HourGroup>> {
    let (from, to) = filter.period.range(now);
    let page = filter.page.max(1);
    let page_size = match filter.page_size {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    };
    let rows = db::fetch_postings(
        conn,
        &PostingQuery {
            from_epoch_ms: from,
            to_epoch_ms: to,
            term: filter.keyword.as_deref().filter(|k| !k.is_empty()),
            location: filter.location.as_deref().filter(|l| !l.is_empty()),
            repeats: false,
            limit: page_size,
            offset: (page - 1) * page_size,
        },
    )?;
    Ok(group_by_hour(rows, now.timezone()))
}

fn group_by_hour(rows: Vec<PostingRow>, zone: Tz) -> Vec<HourGroup> {
    let mut groups: Vec<HourGroup> = Vec::new();
    for row in rows {
        let label = DateTime::parse_from_rfc3339(&row.scrape_time)
            .map(|t| t.with_timezone(&zone).format("%Y-%m-%d %H:00").to_string())
            .unwrap_or_else(|_| row.scrape_time.clone());
        match groups.last_mut() {
            Some(g) if g.hour_label == label => g.jobs.push(row),
            _ => groups.push(HourGroup {
                hour_label: label,
                jobs: vec![row],
            }),
        }
    }
    groups
}

/// Repeats scraped since the start of the day a week ago.
pub fn highlighted(conn: &Connection, now: &DateTime<Tz>) -> Result<Vec<PostingRow>> {
    let since = local_midnight(days_before(now.date_naive(), HIGHLIGHT_DAYS), now.timezone());
    db::fetch_postings(
        conn,
        &PostingQuery {
            from_epoch_ms: since.timestamp_millis(),
            to_epoch_ms: i64::MAX,
            term: None,
            location: None,
            repeats: true,
            limit: MAX_PAGE_SIZE,
            offset: 0,
        },
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterValues {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
}

/// Keywords and locations seen in the retained data, for filter pickers.
pub fn filter_values(conn: &Connection, now: &DateTime<Tz>) -> Result<FilterValues> {
    let since = local_midnight(days_before(now.date_naive(), FILTER_DAYS), now.timezone()).timestamp_millis();
    Ok(FilterValues {
        keywords: db::distinct_posting_values(conn, PostingColumn::Term, since)?,
        locations: db::distinct_posting_values(conn, PostingColumn::Location, since)?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayCount {
    pub date: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub jobs_last_hour: usize,
    pub jobs_today: usize,
    pub trend_last_7_days: Vec<DayCount>,
}

pub fn dashboard(conn: &Connection, now: &DateTime<Tz>) -> Result<Dashboard> {
    let zone = now.timezone();
    let today = now.date_naive();
    let hour_ago = (*now - TimeDelta::hours(1)).timestamp_millis();
    let jobs_last_hour = db::count_postings_between(conn, hour_ago, i64::MAX)?;

    let (start, end) = day_span(today, today, zone);
    let jobs_today = db::count_postings_between(conn, start, end)?;

    let mut trend = Vec::with_capacity(7);
    for offset in (0..7).rev() {
        let day = days_before(today, offset);
        let (start, end) = day_span(day, day, zone);
        trend.push(DayCount {
            date: day.format("%Y-%m-%d").to_string(),
            count: db::count_postings_between(conn, start, end)?,
        });
    }

    Ok(Dashboard {
        jobs_last_hour,
        jobs_today,
        trend_last_7_days: trend,
    })
}
