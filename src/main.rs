use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use job_scraper::browse::{self, ListingFilter, Period};
use job_scraper::clock::{Clock, SystemClock};
use job_scraper::config::Settings;
use job_scraper::control;
use job_scraper::counters::Accountant;
use job_scraper::db::{self, Store};
use job_scraper::fetch::HttpFetcher;
use job_scraper::pipeline::Pipeline;
use job_scraper::providers::Provider;
use job_scraper::scheduler::Scheduler;
use job_scraper::timeparse::canonical;

#[derive(Parser)]
#[command(name = "job_scraper", about = "Scheduled job-posting scraper for LinkedIn, Glassdoor and Stepstone")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the scheduler and read control commands from stdin
    Serve {
        /// Start the hourly schedule immediately
        #[arg(long)]
        start: bool,
    },
    /// Run a single scrape pass (with retry) and exit
    RunOnce,
    /// Show persisted scheduler state
    Status,
    /// Show outcome counters
    Counters {
        /// Zero the counters first
        #[arg(long)]
        reset: bool,
    },
    /// Manage search profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Manage provider credentials
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },
    /// Browse first-seen postings, or repeats
    Jobs {
        /// today, yesterday, 7 or 30
        #[arg(short, long, default_value = "today")]
        period: String,
        /// Filter by search term
        #[arg(short, long)]
        keyword: Option<String>,
        /// Filter by location
        #[arg(short, long)]
        location: Option<String>,
        /// Show repeats from the last week instead
        #[arg(long)]
        repeats: bool,
        /// Page number
        #[arg(long, default_value = "1")]
        page: usize,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Known keywords and locations
    Filters,
    /// Posting volume: last hour, today, last 7 days
    Stats,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Add a profile, or replace one with --id
    Add {
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        location: String,
        /// Search term (repeatable)
        #[arg(short, long = "term", required = true)]
        terms: Vec<String>,
    },
    List,
    Remove { id: i64 },
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Replace a provider's credential bundle
    Set {
        provider: String,
        /// KEY=VALUE pairs
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Show key names, or values with --reveal
    Show {
        provider: String,
        #[arg(long)]
        reveal: bool,
    },
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(settings.zone()?));
    let store = Store::open(&settings.db_path)?;

    let result = match cli.command {
        Commands::Serve { start } => {
            let scheduler = Scheduler::boot(
                store.clone(),
                Arc::new(build_pipeline(&settings, &store, &clock)?),
                clock.clone(),
                settings.interval(),
            )?;
            if start {
                let status = scheduler.start().await?;
                info!(next_run_at = ?status.next_run_at, "schedule started");
            }
            control::serve(scheduler, Accountant::new(store, clock)).await
        }
        Commands::RunOnce => {
            let summary = build_pipeline(&settings, &store, &clock)?
                .run_with_retry()
                .await?;
            println!(
                "Done: {} searches ({} fetched, {} failed), {} extracted, {} filtered, {} stored ({} repeats, {} rejected), {} purged.",
                summary.pairs,
                summary.fetched,
                summary.failed,
                summary.extracted,
                summary.filtered_out,
                summary.inserted,
                summary.repeats,
                summary.store_failed,
                summary.purged
            );
            Ok(())
        }
        Commands::Status => {
            let s = store.with(db::load_scheduler_state)?;
            println!("State:     {}", s.state);
            println!("Running:   {}", if s.is_running { "yes" } else { "no" });
            println!("Interval:  {} min", s.interval_minutes);
            println!("Last run:  {}", s.last_run_at.as_deref().unwrap_or("-"));
            println!("Next run:  {}", s.next_run_at.as_deref().unwrap_or("-"));
            Ok(())
        }
        Commands::Counters { reset } => {
            let accountant = Accountant::new(store, clock);
            let c = if reset {
                accountant.reset()?
            } else {
                accountant.snapshot()?
            };
            println!("Attempts:   {}", c.total_attempts);
            println!("Successes:  {}", c.success_count);
            println!("Failures:   {}", c.failure_count);
            println!("Last reset: {}", c.last_reset_at.as_deref().unwrap_or("never"));
            Ok(())
        }
        Commands::Profile { action } => run_profile(&store, action),
        Commands::Credential { action } => run_credential(&store, clock.as_ref(), action),
        Commands::Jobs {
            period,
            keyword,
            location,
            repeats,
            page,
            limit,
        } => {
            let now = clock.now();
            store.with(|conn| {
                if repeats {
                    let rows = browse::highlighted(conn, &now)?;
                    for r in rows.iter().take(limit) {
                        print_posting(r);
                    }
                    println!("\n{} repeats in the last week", rows.len());
                    return Ok(());
                }
                let filter = ListingFilter {
                    period: period.parse::<Period>()?,
                    keyword,
                    location,
                    page,
                    page_size: limit,
                };
                let groups = browse::list_postings(conn, &now, &filter)?;
                if groups.is_empty() {
                    println!("No postings found.");
                    return Ok(());
                }
                for g in &groups {
                    println!("\n── {} ──", g.hour_label);
                    for r in &g.jobs {
                        print_posting(r);
                    }
                }
                Ok(())
            })
        }
        Commands::Filters => {
            let now = clock.now();
            let f = store.with(|c| browse::filter_values(c, &now))?;
            println!("Keywords:  {}", f.keywords.join(", "));
            println!("Locations: {}", f.locations.join(", "));
            Ok(())
        }
        Commands::Stats => {
            let now = clock.now();
            let d = store.with(|c| browse::dashboard(c, &now))?;
            println!("Last hour: {}", d.jobs_last_hour);
            println!("Today:     {}", d.jobs_today);
            println!("\nLast 7 days:");
            for day in &d.trend_last_7_days {
                println!("  {} {:>5}", day.date, day.count);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    result
}

fn build_pipeline(settings: &Settings, store: &Store, clock: &Arc<dyn Clock>) -> anyhow::Result<Pipeline> {
    let fetcher = HttpFetcher::new(&settings.user_agent, settings.fetch_timeout())?;
    Ok(Pipeline::new(
        store.clone(),
        Arc::new(fetcher),
        clock.clone(),
        settings.pipeline_options(),
    ))
}

fn parse_provider(name: &str) -> anyhow::Result<Provider> {
    Provider::parse(name).ok_or_else(|| {
        let known: Vec<_> = Provider::ALL.iter().map(|p| p.as_str()).collect();
        anyhow!("Unsupported provider {:?} (supported: {})", name, known.join(", "))
    })
}

fn run_profile(store: &Store, action: ProfileAction) -> anyhow::Result<()> {
    match action {
        ProfileAction::Add {
            id,
            provider,
            location,
            terms,
        } => {
            let provider = parse_provider(&provider)?;
            let location = location.trim();
            if location.is_empty() {
                bail!("Location must not be empty");
            }
            let id = store.with(|c| db::upsert_profile(c, id, provider.as_str(), location, &terms))?;
            println!("Saved profile {} ({} @ {})", id, provider, location);
            Ok(())
        }
        ProfileAction::List => {
            let profiles = store.with(db::fetch_profiles)?;
            if profiles.is_empty() {
                println!("No search profiles. Add one with 'profile add'.");
                return Ok(());
            }
            println!("{:>4} | {:<10} | {:<20} | Terms", "ID", "Provider", "Location");
            println!("{}", "-".repeat(60));
            for p in &profiles {
                println!(
                    "{:>4} | {:<10} | {:<20} | {}",
                    p.id,
                    p.provider,
                    truncate(&p.location, 20),
                    p.terms.join(", ")
                );
            }
            Ok(())
        }
        ProfileAction::Remove { id } => {
            if store.with(|c| db::delete_profile(c, id))? {
                println!("Removed profile {}", id);
            } else {
                println!("No profile with id {}", id);
            }
            Ok(())
        }
    }
}

fn run_credential(store: &Store, clock: &dyn Clock, action: CredentialAction) -> anyhow::Result<()> {
    match action {
        CredentialAction::Set { provider, pairs } => {
            let provider = parse_provider(&provider)?;
            let raw = pairs
                .iter()
                .map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                        .with_context(|| format!("Expected KEY=VALUE, got {:?}", pair))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            let bundle = provider.sanitize_bundle(raw);
            if bundle.is_empty() {
                bail!(
                    "No usable values; accepted keys for {}: {}",
                    provider,
                    provider.credential_keys().join(", ")
                );
            }
            let updated_at = canonical(&clock.now());
            store.with(|c| db::upsert_credential(c, provider.as_str(), &bundle, &updated_at))?;
            println!("Saved {} credential ({} keys)", provider, bundle.len());
            Ok(())
        }
        CredentialAction::Show { provider, reveal } => {
            let provider = parse_provider(&provider)?;
            match store.with(|c| db::fetch_credential(c, provider.as_str()))? {
                None => println!("{}: no credential stored", provider),
                Some(row) => {
                    println!("{} (updated {})", row.provider, row.updated_at);
                    for (key, value) in &row.data {
                        if reveal {
                            println!("  {} = {}", key, value);
                        } else {
                            println!("  {}", key);
                        }
                    }
                }
            }
            Ok(())
        }
        CredentialAction::List => {
            for row in store.with(db::fetch_credentials)? {
                let keys: Vec<_> = row.data.keys().map(String::as_str).collect();
                println!("{:<10} {} (updated {})", row.provider, keys.join(", "), row.updated_at);
            }
            Ok(())
        }
    }
}

fn print_posting(r: &db::PostingRow) {
    println!(
        "  {:<40} | {:<20} | {:<16} | {}",
        truncate(&r.title, 40),
        truncate(r.company.as_deref().unwrap_or("-"), 20),
        truncate(r.location.as_deref().unwrap_or("-"), 16),
        r.url.as_deref().unwrap_or("")
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
