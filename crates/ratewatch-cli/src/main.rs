//! Command-line frontend: map rating regions, fetch rate surfaces, and
//! spot-check stored rates against live quotes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Datelike, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use ratewatch_core::{CarrierId, Jurisdiction, RateKey, rates_to_document};
use ratewatch_store::RateStore;
use ratewatch_sync::{
    ChangeDetector, FetchLimiter, FetchOrchestrator, FetchPolicy, LimiterConfig, MapperConfig,
    QuoteClient, RatingAxes, RegionMapper, StaticLocationIndex, Verdict,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ratewatch", version, about = "Track carrier premium rates and detect changes")]
struct Cli {
    /// SQLite database path.
    #[arg(long, env = "RATEWATCH_DB", default_value = "ratewatch.db")]
    db: PathBuf,

    /// Quoting API base URL.
    #[arg(long, env = "RATEWATCH_BASE_URL", default_value = "http://localhost:8080")]
    base_url: String,

    /// Location reference file: `{"TX": {"75201": "DALLAS", ...}}`.
    #[arg(long, env = "RATEWATCH_LOCATIONS")]
    locations: PathBuf,

    /// Concurrent requests allowed against the quoting API.
    #[arg(long, default_value_t = 20)]
    max_in_flight: usize,

    /// Requests allowed per second against the quoting API.
    #[arg(long, default_value_t = 50)]
    calls_per_second: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the rating-region partition for a carrier in a jurisdiction.
    Map {
        #[arg(long)]
        carrier: u32,
        #[arg(long)]
        jurisdiction: String,
        /// Quote effective date; defaults to the first of next month.
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Probe one location per administrative grouping instead of every
        /// location.
        #[arg(long)]
        coarse: bool,
    },
    /// Fetch and store the full rate surface for every mapped region.
    Fetch {
        #[arg(long)]
        carrier: u32,
        #[arg(long)]
        jurisdiction: String,
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Carry the latest stored rates forward to the fetch date before
        /// writing, so unfetched keys keep a record at this date.
        #[arg(long)]
        carry_forward: bool,
    },
    /// Compare live probe quotes against the most recent stored rates.
    Detect {
        #[arg(long)]
        carrier: u32,
        #[arg(long)]
        jurisdiction: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn load_index(path: &PathBuf) -> anyhow::Result<StaticLocationIndex> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading location reference file {}", path.display()))?;
    let map: HashMap<String, HashMap<String, String>> =
        serde_json::from_str(&raw).context("parsing location reference file")?;
    Ok(StaticLocationIndex::from_map(map))
}

/// Default effective date for quoting: the first of next month.
fn first_of_next_month(today: NaiveDate) -> NaiveDate {
    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(today)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let index = load_index(&cli.locations)?;
    let store = RateStore::open(&cli.db)?;
    let client = QuoteClient::new(cli.base_url.clone());
    let limiter = Arc::new(FetchLimiter::new(LimiterConfig {
        max_in_flight: cli.max_in_flight,
        max_per_window: cli.calls_per_second,
        window: std::time::Duration::from_secs(1),
    }));
    let axes = RatingAxes::default();
    let today = Utc::now().date_naive();

    match cli.command {
        Command::Map {
            carrier,
            jurisdiction,
            date,
            coarse,
        } => {
            let carrier = CarrierId(carrier);
            let jurisdiction = Jurisdiction::new(&jurisdiction);
            let date = date.unwrap_or_else(|| first_of_next_month(today));
            let config = if coarse {
                MapperConfig::coarse([jurisdiction.as_str()])
            } else {
                MapperConfig::default()
            };
            let mapper = RegionMapper::new(&client, &index, config, axes);
            let regions = mapper.map_regions(carrier, &jurisdiction, date).await?;
            store.replace_regions(carrier, &jurisdiction, &regions)?;
            println!("mapped {} region(s) for {carrier} in {jurisdiction}", regions.len());
            for region in &regions {
                println!(
                    "  region {}: {} location(s)",
                    region.region_number,
                    region.locations.len()
                );
            }
        }
        Command::Fetch {
            carrier,
            jurisdiction,
            date,
            carry_forward,
        } => {
            let carrier = CarrierId(carrier);
            let jurisdiction = Jurisdiction::new(&jurisdiction);
            let date = date.unwrap_or_else(|| first_of_next_month(today));
            let regions = store.regions(carrier, &jurisdiction)?;
            if regions.is_empty() {
                anyhow::bail!(
                    "no region mapping stored for {carrier} in {jurisdiction}; run `ratewatch map` first"
                );
            }
            if carry_forward {
                let copied = store.carry_forward_prefix(carrier, &jurisdiction, date)?;
                info!(copied, "carried stored rates forward");
            }

            let orchestrator = FetchOrchestrator::new(
                &client,
                &index,
                limiter,
                axes,
                FetchPolicy::default(),
            );
            let outcome = orchestrator
                .fetch_all(carrier, &jurisdiction, &regions, date)
                .await;
            for (region_number, rates) in &outcome.rates_by_region {
                let key = RateKey::region(carrier, jurisdiction.clone(), *region_number);
                let doc = rates_to_document(rates)?;
                store.put(&key, date, &doc)?;
            }
            println!(
                "stored rates for {} region(s) effective {date}",
                outcome.rates_by_region.len()
            );
            if !outcome.failures.is_empty() {
                println!("{} task(s) failed:", outcome.failures.len());
                for failure in &outcome.failures {
                    println!(
                        "  region {} params {} at {}: {}",
                        failure.region_number, failure.params, failure.location, failure.reason
                    );
                }
            }
        }
        Command::Detect {
            carrier,
            jurisdiction,
            date,
        } => {
            let carrier = CarrierId(carrier);
            let jurisdiction = Jurisdiction::new(&jurisdiction);
            let date = date.unwrap_or(today);
            let detector = ChangeDetector::new(&client, &store, &index, axes);
            let report = detector.detect(carrier, &jurisdiction, date).await?;
            match report.verdict {
                Verdict::Unchanged => println!("unchanged: stored rates match live quotes"),
                Verdict::Unavailable => {
                    println!("unavailable: no live quotes could be compared")
                }
                Verdict::Changed => {
                    println!("changed: {} key(s) differ", report.changed_keys.len());
                    for key in &report.changed_keys {
                        println!("  {key}");
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_month_rolls_over_year() {
        let dec = NaiveDate::from_ymd_opt(2026, 12, 15).unwrap();
        assert_eq!(
            first_of_next_month(dec),
            NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()
        );
        let jun = NaiveDate::from_ymd_opt(2026, 6, 30).unwrap();
        assert_eq!(
            first_of_next_month(jun),
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
        );
    }

    #[test]
    fn cli_parses_fetch_subcommand() {
        let cli = Cli::parse_from([
            "ratewatch",
            "--locations",
            "locations.json",
            "fetch",
            "--carrier",
            "60984",
            "--jurisdiction",
            "tx",
            "--date",
            "2026-10-01",
        ]);
        match cli.command {
            Command::Fetch { carrier, date, .. } => {
                assert_eq!(carrier, 60984);
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 10, 1));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
