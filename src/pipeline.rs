use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::TimeDelta;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::counters::Accountant;
use crate::db::{self, Store};
use crate::fetch::Fetch;
use crate::providers::Provider;
use crate::repeats::RepeatPolicy;
use crate::scheduler::ScrapeJob;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 1,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub repeats: RepeatPolicy,
    /// Postings older than this are dropped for providers whose search
    /// filter is coarser.
    pub recency_window: TimeDelta,
    pub retry: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            repeats: RepeatPolicy::default(),
            recency_window: TimeDelta::minutes(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Totals for one full pass over every profile and term.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub pairs: usize,
    pub fetched: usize,
    pub failed: usize,
    pub extracted: usize,
    pub filtered_out: usize,
    pub inserted: usize,
    pub repeats: usize,
    pub store_failed: usize,
    pub purged: usize,
}

pub struct Pipeline {
    store: Store,
    fetcher: Arc<dyn Fetch>,
    clock: Arc<dyn Clock>,
    accountant: Accountant,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        store: Store,
        fetcher: Arc<dyn Fetch>,
        clock: Arc<dyn Clock>,
        options: PipelineOptions,
    ) -> Self {
        let accountant = Accountant::new(store.clone(), clock.clone());
        Pipeline {
            store,
            fetcher,
            clock,
            accountant,
            options,
        }
    }

    /// One pass. Fetch and per-posting store failures are counted and skipped;
    /// only failing to load profiles or to purge aborts the pass.
    pub async fn run_once(&self) -> Result<PassSummary> {
        let profiles = self
            .store
            .with(db::fetch_profiles)
            .context("Failed to load search profiles")?;
        let credentials: HashMap<Provider, _> = self
            .store
            .with(db::fetch_credentials)
            .context("Failed to load provider credentials")?
            .into_iter()
            .filter_map(|row| Provider::parse(&row.provider).map(|p| (p, row.data)))
            .collect();

        let mut summary = PassSummary::default();

        for profile in &profiles {
            let Some(provider) = Provider::parse(&profile.provider) else {
                debug!(provider = %profile.provider, profile = profile.id, "skipping unsupported provider");
                continue;
            };
            let cookie = credentials
                .get(&provider)
                .and_then(|bundle| provider.credential_header(bundle));

            for term in &profile.terms {
                summary.pairs += 1;
                self.accountant.record_attempt(1);

                let url = provider.search_url(term, &profile.location);
                let body = match self.fetcher.fetch(&url, cookie.as_deref()).await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(%provider, term = %term, location = %profile.location, url = %url, error = %e, "fetch failed");
                        self.accountant.record_failure(1);
                        summary.failed += 1;
                        continue;
                    }
                };
                self.accountant.record_success(1);
                summary.fetched += 1;

                let now = self.clock.now();
                let mut candidates = provider.extract(&body, term, now);
                summary.extracted += candidates.len();

                if provider.recency().span() > self.options.recency_window {
                    let cutoff = now - self.options.recency_window;
                    let before = candidates.len();
                    candidates.retain(|c| c.posting_time >= cutoff);
                    summary.filtered_out += before - candidates.len();
                }

                let (mut inserted, mut repeats) = (0, 0);
                for candidate in &candidates {
                    match self.store.with(|c| self.options.repeats.store(c, candidate, &now)) {
                        Ok(is_repeat) => {
                            inserted += 1;
                            repeats += usize::from(is_repeat);
                        }
                        Err(e) => {
                            warn!(%provider, term = %term, title = %candidate.title, "failed to store posting: {:#}", e);
                            summary.store_failed += 1;
                        }
                    }
                }
                summary.inserted += inserted;
                summary.repeats += repeats;

                info!(
                    %provider,
                    term = %term,
                    location = %profile.location,
                    inserted,
                    repeats,
                    "stored postings"
                );
            }
        }

        let now = self.clock.now();
        summary.purged = self
            .store
            .with(|c| self.options.repeats.purge(c, &now))
            .context("Failed to purge expired postings")?;

        info!(
            pairs = summary.pairs,
            fetched = summary.fetched,
            failed = summary.failed,
            extracted = summary.extracted,
            filtered_out = summary.filtered_out,
            inserted = summary.inserted,
            repeats = summary.repeats,
            store_failed = summary.store_failed,
            purged = summary.purged,
            "scrape pass complete"
        );
        Ok(summary)
    }

    pub async fn run_with_retry(&self) -> Result<PassSummary> {
        with_retry(&self.options.retry, || self.run_once()).await
    }
}

#[async_trait]
impl ScrapeJob for Pipeline {
    async fn run(&self) -> Result<()> {
        self.run_with_retry().await.map(|_| ())
    }
}

/// Run `op`, retrying up to `policy.max_retries` times with a fixed cooldown.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    "Scrape pass failed (attempt {}/{}), retrying in {:.0}s: {:#}",
                    attempt,
                    policy.max_retries + 1,
                    policy.cooldown.as_secs_f64(),
                    e
                );
                tokio::time::sleep(policy.cooldown).await;
            }
            Err(e) => return Err(e.context(format!("Scrape pass failed after {} attempts", attempt + 1))),
        }
    }
}
