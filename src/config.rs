use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::TimeDelta;
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::warn;

use crate::pipeline::{PipelineOptions, RetryPolicy};
use crate::repeats::RepeatPolicy;

const CONFIG_FILE: &str = "job_scraper";
const ENV_PREFIX: &str = "JOBSCRAPER";

/// Runtime settings. Defaults, then `job_scraper.toml`, then `JOBSCRAPER_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub timezone: String,
    pub interval_minutes: u64,
    pub fetch_timeout_secs: u64,
    pub retry_cooldown_secs: u64,
    pub max_retries: u32,
    pub repeat_window_days: i64,
    pub retention_days: i64,
    pub recency_window_minutes: i64,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/jobs.sqlite"),
            timezone: "Europe/Berlin".to_string(),
            interval_minutes: 60,
            fetch_timeout_secs: 20,
            retry_cooldown_secs: 300,
            max_retries: 1,
            repeat_window_days: 60,
            retention_days: 60,
            recency_window_minutes: 60,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124 Safari/537.36".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        self.zone()?;
        if self.interval_minutes == 0 {
            bail!("interval_minutes must be at least 1");
        }
        if self.fetch_timeout_secs == 0 {
            bail!("fetch_timeout_secs must be at least 1");
        }
        if self.repeat_window_days <= 0 || self.retention_days <= 0 {
            bail!("repeat_window_days and retention_days must be positive");
        }
        if self.recency_window_minutes <= 0 {
            bail!("recency_window_minutes must be positive");
        }
        if self.repeat_window_days != self.retention_days {
            warn!(
                repeat_window_days = self.repeat_window_days,
                retention_days = self.retention_days,
                "repeat window and retention differ; repeats older than retention can no longer be detected"
            );
        }
        Ok(())
    }

    pub fn zone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Unknown timezone {:?}: {}", self.timezone, e))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            repeats: RepeatPolicy {
                window: TimeDelta::days(self.repeat_window_days),
                retention: TimeDelta::days(self.retention_days),
            },
            recency_window: TimeDelta::minutes(self.recency_window_minutes),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                cooldown: Duration::from_secs(self.retry_cooldown_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.zone().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(s.interval(), Duration::from_secs(3600));
        let opts = s.pipeline_options();
        assert_eq!(opts.repeats.window, opts.repeats.retention);
        assert_eq!(opts.retry.max_retries, 1);
        assert_eq!(opts.retry.cooldown, Duration::from_secs(300));
    }

    #[test]
    fn rejects_unknown_zone() {
        let s = Settings {
            timezone: "Mars/Olympus".to_string(),
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        let s = Settings {
            interval_minutes: 0,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }
}
