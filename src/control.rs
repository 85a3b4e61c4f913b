use anyhow::{bail, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::counters::Accountant;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status,
    Start,
    Stop,
    Pause,
    Resume,
    Counters,
    ResetCounters,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command> {
        Ok(match line.trim().to_ascii_lowercase().as_str() {
            "status" => Command::Status,
            "start" => Command::Start,
            "stop" => Command::Stop,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "counters" | "metrics" => Command::Counters,
            "reset-counters" | "reset" => Command::ResetCounters,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command {:?}", other),
        })
    }
}

const HELP: &str = "status | start | stop | pause | resume | counters | reset-counters | quit";

/// Run one command. `None` means the loop should end.
pub async fn execute(scheduler: &Scheduler, accountant: &Accountant, command: Command) -> Result<Option<Value>> {
    let reply = match command {
        Command::Status => serde_json::to_value(scheduler.status()?)?,
        Command::Start => serde_json::to_value(scheduler.start().await?)?,
        Command::Stop => serde_json::to_value(scheduler.stop().await?)?,
        Command::Pause => serde_json::to_value(scheduler.pause().await?)?,
        Command::Resume => serde_json::to_value(scheduler.resume().await?)?,
        Command::Counters => serde_json::to_value(accountant.snapshot()?)?,
        Command::ResetCounters => serde_json::to_value(accountant.reset()?)?,
        Command::Help => json!({ "commands": HELP }),
        Command::Quit => return Ok(None),
    };
    Ok(Some(reply))
}

/// Read commands from stdin, one per line, and print a JSON reply for each.
/// Ends on `quit`, end of input, or Ctrl-C.
pub async fn serve(scheduler: Scheduler, accountant: Accountant) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("control loop ready ({})", HELP);

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let outcome = match Command::parse(&line) {
            Ok(command) => execute(&scheduler, &accountant, command).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(Some(reply)) => println!("{}", reply),
            Ok(None) => break,
            Err(e) => {
                warn!("command {:?} failed: {:#}", line.trim(), e);
                println!("{}", json!({ "error": format!("{:#}", e) }));
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::Store;
    use crate::scheduler::ScrapeJob;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use chrono_tz::Europe::Berlin;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoopJob;

    #[async_trait]
    impl ScrapeJob for NoopJob {
        async fn run(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse(" START ").unwrap(), Command::Start);
        assert_eq!(Command::parse("reset").unwrap(), Command::ResetCounters);
        assert_eq!(Command::parse("exit").unwrap(), Command::Quit);
        assert!(Command::parse("launch").is_err());
    }

    #[tokio::test]
    async fn replies_are_json() {
        let store = Store::open_in_memory().unwrap();
        let clock = Arc::new(FixedClock::new(Berlin.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap()));
        let scheduler = Scheduler::boot(store.clone(), Arc::new(NoopJob), clock.clone(), Duration::from_secs(3600)).unwrap();
        let accountant = Accountant::new(store, clock);

        let status = execute(&scheduler, &accountant, Command::Status).await.unwrap().unwrap();
        assert_eq!(status["state"], "idle");

        let paused = execute(&scheduler, &accountant, Command::Pause).await.unwrap().unwrap();
        assert_eq!(paused["state"], "idle");

        let started = execute(&scheduler, &accountant, Command::Start).await.unwrap().unwrap();
        assert_eq!(started["state"], "running");
        assert_eq!(started["nextRunAt"], "2024-01-05T11:00:00.000+01:00");

        let counters = execute(&scheduler, &accountant, Command::ResetCounters).await.unwrap().unwrap();
        assert_eq!(counters["totalAttempts"], 0);
        assert_eq!(counters["lastResetAt"], "2024-01-05T10:00:00.000+01:00");

        assert!(execute(&scheduler, &accountant, Command::Quit).await.unwrap().is_none());
        scheduler.shutdown().await;
    }
}
