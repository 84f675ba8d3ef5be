//! RateLab CLI: listing, rate, price, and cache commands.
//!
//! Commands:
//! - `pairs` / `assets`: instrument availability across configured sources
//! - `funding`: historical or predicted funding rates, one column per source
//! - `borrow`: historical or current borrow rates
//! - `prices`: OHLC candles for spot or perpetual instruments
//! - `cache status`: cached range and row count per dataset
//! - `sources`: reachability ping per configured source

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use ratelab_core::{
    AvailabilityMatrix, InstrumentKind, Interval, MarketData, RatelabConfig, WideTable,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ratelab",
    about = "Multi-exchange funding, borrow, and price aggregation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file. Without one, all venues run with
    /// defaults and no credentials.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cache directory when no config file is given.
    #[arg(long, default_value = "cache")]
    cache_dir: PathBuf,

    /// Print results as JSON instead of a table.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List pair availability across configured sources.
    Pairs {
        /// Instrument kind: spot or perp.
        #[arg(long, default_value = "perp")]
        kind: String,

        /// Only pairs with these base symbols.
        #[arg(long)]
        filter: Vec<String>,
    },
    /// List borrowable-asset availability across configured sources.
    Assets {
        /// Only these asset symbols.
        #[arg(long)]
        filter: Vec<String>,
    },
    /// Fetch funding rates merged across sources.
    Funding {
        /// Fetch the upcoming rate per pair instead of history.
        #[arg(long, default_value_t = false)]
        predicted: bool,

        /// Start date (YYYY-MM-DD). Required unless --predicted.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, exclusive). Defaults to now.
        #[arg(long)]
        end: Option<String>,

        /// Only pairs with these base symbols.
        #[arg(long)]
        filter: Vec<String>,

        /// Serve the query from the cache instead of the venues.
        #[arg(long, default_value_t = false)]
        cached: bool,

        /// Save the fetched result into the cache.
        #[arg(long, default_value_t = false)]
        save: bool,
    },
    /// Fetch borrow rates merged across sources.
    Borrow {
        /// Fetch the latest rate per asset instead of history.
        #[arg(long, default_value_t = false)]
        current: bool,

        /// Start date (YYYY-MM-DD). Required unless --current.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, exclusive). Defaults to now.
        #[arg(long)]
        end: Option<String>,

        /// Only these asset symbols.
        #[arg(long)]
        filter: Vec<String>,

        /// Serve the query from the cache instead of the venues.
        #[arg(long, default_value_t = false)]
        cached: bool,

        /// Save the fetched result into the cache.
        #[arg(long, default_value_t = false)]
        save: bool,
    },
    /// Fetch OHLC candles merged across sources.
    Prices {
        /// Instrument kind: spot or perp.
        #[arg(long, default_value = "spot")]
        kind: String,

        /// Candle interval (e.g. 1h, 4h, 1d).
        #[arg(long, default_value = "1d")]
        interval: String,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, exclusive). Defaults to now.
        #[arg(long)]
        end: Option<String>,

        /// Only pairs with these base symbols.
        #[arg(long)]
        filter: Vec<String>,

        /// Only pairs with these quote symbols.
        #[arg(long)]
        quote: Vec<String>,

        /// Serve the query from the cache instead of the venues.
        #[arg(long, default_value_t = false)]
        cached: bool,

        /// Save the fetched result into the cache.
        #[arg(long, default_value_t = false)]
        save: bool,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Ping every configured source.
    Sources,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached range and row count per dataset.
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RatelabConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RatelabConfig::default_venues(&cli.cache_dir),
    };
    let data = config.build().context("failed to build the query engine")?;

    match cli.command {
        Commands::Pairs { kind, filter } => run_pairs(&data, &kind, &filter, cli.json),
        Commands::Assets { filter } => run_assets(&data, &filter, cli.json),
        Commands::Funding {
            predicted,
            start,
            end,
            filter,
            cached,
            save,
        } => run_funding(&data, predicted, start, end, filter, cached, save, cli.json),
        Commands::Borrow {
            current,
            start,
            end,
            filter,
            cached,
            save,
        } => run_borrow(&data, current, start, end, filter, cached, save, cli.json),
        Commands::Prices {
            kind,
            interval,
            start,
            end,
            filter,
            quote,
            cached,
            save,
        } => run_prices(
            &data, &kind, &interval, start, end, filter, quote, cached, save, cli.json,
        ),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&data, cli.json),
        },
        Commands::Sources => run_sources(&data, cli.json),
    }
}

fn run_pairs(data: &MarketData, kind: &str, filter: &[String], json: bool) -> Result<()> {
    let matrix = match parse_kind(kind)? {
        InstrumentKind::Spot => data.spot_pairs(),
        InstrumentKind::Perp => data.perp_pairs(),
    };
    print_matrix(&matrix, filter, json)
}

fn run_assets(data: &MarketData, filter: &[String], json: bool) -> Result<()> {
    print_matrix(&data.borrowable_assets(), filter, json)
}

#[allow(clippy::too_many_arguments)]
fn run_funding(
    data: &MarketData,
    predicted: bool,
    start: Option<String>,
    end: Option<String>,
    filter: Vec<String>,
    cached: bool,
    save: bool,
    json: bool,
) -> Result<()> {
    if predicted && cached {
        bail!("--predicted and --cached are mutually exclusive");
    }
    if save && (predicted || cached) {
        bail!("--save applies to a fresh historical fetch only");
    }

    let table = if predicted {
        data.predicted_funding_rates(&filter, None)
    } else {
        let (start, end) = parse_range(start.as_deref(), end.as_deref())?;
        if cached {
            data.load_funding_rates(start, end, &filter)
                .context("failed to load funding rates from the cache")?
        } else {
            data.historical_funding_rates(start, end, &filter, None)
        }
    };

    if save && !table.is_empty() {
        data.save_funding_rates(&table)
            .context("failed to save funding rates")?;
        eprintln!("Saved {} row(s) to the cache.", table.len());
    }

    print_table(&table, json)
}

#[allow(clippy::too_many_arguments)]
fn run_borrow(
    data: &MarketData,
    current: bool,
    start: Option<String>,
    end: Option<String>,
    filter: Vec<String>,
    cached: bool,
    save: bool,
    json: bool,
) -> Result<()> {
    if current && cached {
        bail!("--current and --cached are mutually exclusive");
    }
    if save && (current || cached) {
        bail!("--save applies to a fresh historical fetch only");
    }

    let table = if current {
        data.current_borrow_rates(&filter, None)
    } else {
        let (start, end) = parse_range(start.as_deref(), end.as_deref())?;
        if cached {
            data.load_borrow_rates(start, end, &filter)
                .context("failed to load borrow rates from the cache")?
        } else {
            data.historical_borrow_rates(start, end, &filter, None)
        }
    };

    if save && !table.is_empty() {
        data.save_borrow_rates(&table)
            .context("failed to save borrow rates")?;
        eprintln!("Saved {} row(s) to the cache.", table.len());
    }

    print_table(&table, json)
}

#[allow(clippy::too_many_arguments)]
fn run_prices(
    data: &MarketData,
    kind: &str,
    interval: &str,
    start: Option<String>,
    end: Option<String>,
    filter: Vec<String>,
    quote: Vec<String>,
    cached: bool,
    save: bool,
    json: bool,
) -> Result<()> {
    if save && cached {
        bail!("--save applies to a fresh fetch only");
    }
    let kind = parse_kind(kind)?;
    let interval = parse_interval(interval)?;
    let (start, end) = parse_range(start.as_deref(), end.as_deref())?;

    let table = if cached {
        data.load_prices(start, end, kind, &interval, &filter)
            .context("failed to load prices from the cache")?
    } else {
        data.historical_prices(kind, &interval, start, end, &filter, &quote, None)
    };

    if save && !table.is_empty() {
        data.save_prices(&table, kind, &interval)
            .context("failed to save prices")?;
        eprintln!("Saved {} row(s) to the cache.", table.len());
    }

    print_table(&table, json)
}

fn run_cache_status(data: &MarketData, json: bool) -> Result<()> {
    let statuses = data.cache_status();
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    if statuses.iter().all(|s| !s.cached) {
        println!("Cache is empty.");
        return Ok(());
    }

    println!(
        "{:<22} {:<8} {:<26} {:>10}",
        "Dataset", "Cached", "Range", "Rows"
    );
    println!("{}", "-".repeat(68));
    for status in &statuses {
        let range = match (status.start, status.end) {
            (Some(start), Some(end)) => {
                format!("{} to {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
            }
            _ => "-".to_string(),
        };
        let rows = status
            .row_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<22} {:<8} {:<26} {:>10}",
            status.dataset,
            if status.cached { "yes" } else { "no" },
            range,
            rows
        );
    }
    Ok(())
}

fn run_sources(data: &MarketData, json: bool) -> Result<()> {
    let health = data.source_health();
    if json {
        let rows: Vec<serde_json::Value> = health
            .iter()
            .map(|(id, up)| serde_json::json!({ "source": id.as_str(), "reachable": up }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:<10} {:>9}", "Source", "Reachable");
    println!("{}", "-".repeat(20));
    for (id, up) in &health {
        println!("{:<10} {:>9}", id.as_str(), if *up { "yes" } else { "no" });
    }
    Ok(())
}

fn parse_kind(s: &str) -> Result<InstrumentKind> {
    s.parse().map_err(|e: String| anyhow!(e))
}

fn parse_interval(s: &str) -> Result<Interval> {
    let interval = Interval::new(s);
    if interval.seconds().is_none() {
        bail!("unrecognized interval '{s}' (expected forms like 15m, 1h, 4h, 1d)");
    }
    Ok(interval)
}

fn parse_range(start: Option<&str>, end: Option<&str>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let Some(start) = start else {
        bail!("--start is required for a historical query");
    };
    let start = parse_day(start)?;
    let end = match end {
        Some(s) => parse_day(s)?,
        None => Utc::now(),
    };
    if start > end {
        bail!("--start is after --end");
    }
    Ok((start, end))
}

fn parse_day(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

fn print_matrix(matrix: &AvailabilityMatrix, filter: &[String], json: bool) -> Result<()> {
    let filter: Vec<String> = filter.iter().map(|s| s.to_uppercase()).collect();
    let rows: Vec<_> = matrix
        .rows()
        .filter(|(id, _)| filter.is_empty() || filter.iter().any(|f| f == id.base_symbol()))
        .collect();

    if json {
        let out: Vec<serde_json::Value> = rows
            .iter()
            .map(|(id, flags)| {
                let mut obj = serde_json::Map::new();
                obj.insert("instrument".into(), id.to_string().into());
                for (source, avail) in matrix.sources().iter().zip(flags.iter()) {
                    obj.insert(source.as_str().to_string(), (*avail).into());
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No instruments.");
        return Ok(());
    }

    let mut header = format!("{:<16}", "Instrument");
    for source in matrix.sources() {
        header.push_str(&format!(" {:>9}", source.as_str()));
    }
    println!("{header}");
    println!("{}", "-".repeat(header.len()));
    for (id, flags) in &rows {
        let mut line = format!("{:<16}", id.to_string());
        for avail in *flags {
            line.push_str(&format!(" {:>9}", if *avail { "yes" } else { "-" }));
        }
        println!("{line}");
    }
    println!();
    println!("{} instrument(s)", rows.len());
    Ok(())
}

fn print_table(table: &WideTable, json: bool) -> Result<()> {
    let columns = table.column_names();

    if json {
        let rows: Vec<serde_json::Value> = table
            .rows()
            .map(|((timestamp, identity), cells)| {
                let mut obj = serde_json::Map::new();
                obj.insert("timestamp".into(), timestamp.to_rfc3339().into());
                obj.insert("instrument".into(), identity.to_string().into());
                for (name, cell) in columns.iter().zip(cells.iter()) {
                    let value = match cell {
                        Some(v) => serde_json::Value::from(*v),
                        None => serde_json::Value::Null,
                    };
                    obj.insert(name.clone(), value);
                }
                serde_json::Value::Object(obj)
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if table.is_empty() {
        println!("No data.");
        return Ok(());
    }

    let mut header = format!("{:<17} {:<14}", "Timestamp", "Instrument");
    for name in &columns {
        header.push_str(&format!(" {:>14}", name));
    }
    println!("{header}");
    println!("{}", "-".repeat(header.len()));
    for ((timestamp, identity), cells) in table.rows() {
        let mut line = format!(
            "{:<17} {:<14}",
            timestamp.format("%Y-%m-%d %H:%M").to_string(),
            identity.to_string()
        );
        for cell in cells {
            match cell {
                Some(v) => line.push_str(&format!(" {:>14.8}", v)),
                None => line.push_str(&format!(" {:>14}", "-")),
            }
        }
        println!("{line}");
    }
    println!();
    println!("{} row(s)", table.len());
    Ok(())
}
