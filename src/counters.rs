use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::warn;

use crate::clock::Clock;
use crate::db::{self, Store};
use crate::timeparse::canonical;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounters {
    pub total_attempts: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_reset_at: Option<String>,
}

/// Durable attempt/success/failure tally. Recording never fails the caller.
#[derive(Clone)]
pub struct Accountant {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl Accountant {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Accountant { store, clock }
    }

    pub fn record_attempt(&self, n: i64) {
        self.bump("attempt", n, 0, 0);
    }

    pub fn record_success(&self, n: i64) {
        self.bump("success", 0, n, 0);
    }

    pub fn record_failure(&self, n: i64) {
        self.bump("failure", 0, 0, n);
    }

    fn bump(&self, kind: &str, attempts: i64, successes: i64, failures: i64) {
        if let Err(e) = self
            .store
            .with(|c| db::bump_counters(c, attempts, successes, failures))
        {
            warn!(kind, error = %e, "failed to record outcome");
        }
    }

    pub fn snapshot(&self) -> Result<OutcomeCounters> {
        self.store.with(db::fetch_counters)
    }

    pub fn reset(&self) -> Result<OutcomeCounters> {
        let at = canonical(&self.clock.now());
        self.store.with(|c| db::reset_counters(c, &at))?;
        self.snapshot()
    }
}
