//! Quotebatch CLI: bulk quote refresh through the adaptive batch engine.
//!
//! Commands:
//! - `refresh` - refresh quotes for a symbol list against a simulated upstream
//! - `config` - print the effective engine configuration and its fingerprint

mod export;
mod quotes;
mod universe;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quotebatch_core::{
    BatchConfig, BatchEngine, RecordingSleeper, Sleeper, ThreadSleeper,
};

use crate::export::{export_json, export_outcomes_csv, write_file, RefreshReport};
use crate::quotes::{SimulatedQuotes, SourceSettings};
use crate::universe::Universe;

#[derive(Parser)]
#[command(name = "quotebatch", about = "Bulk quote refresh with retries, rate-limit backoff and circuit breaking")]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins when set).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh quotes for the given symbols (or a universe file).
    Refresh {
        /// Symbols to refresh (e.g., SPY QQQ AAPL).
        symbols: Vec<String>,

        /// TOML universe file with a [sectors] table. Defaults to the built-in US universe.
        #[arg(long)]
        universe: Option<PathBuf>,

        /// Restrict the universe to one sector.
        #[arg(long)]
        sector: Option<String>,

        /// Engine configuration TOML file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the cache-aware variant.
        #[arg(long, default_value_t = false)]
        smart: bool,

        /// Share of symbols already cached before the run.
        #[arg(long, default_value_t = 0.5)]
        cache_ratio: f64,

        /// Simulated fetch latency for cache misses, in milliseconds.
        #[arg(long, default_value_t = 150)]
        latency_ms: u64,

        /// Rate-limit every Nth fresh fetch.
        #[arg(long)]
        rate_limit_every: Option<u32>,

        /// Time out every Nth fresh fetch.
        #[arg(long)]
        fail_every: Option<u32>,

        /// Seed for the simulated source and the backoff jitter.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Record pauses instead of sleeping.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Write the JSON report here.
        #[arg(long)]
        json: Option<PathBuf>,

        /// Write per-item outcomes as CSV here.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config {
        /// Engine configuration TOML file. Defaults are used without it.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Refresh {
            symbols,
            universe,
            sector,
            config,
            smart,
            cache_ratio,
            latency_ms,
            rate_limit_every,
            fail_every,
            seed,
            dry_run,
            json,
            csv,
        } => {
            let symbols = resolve_symbols(symbols, universe.as_deref(), sector.as_deref())?;
            let settings = SourceSettings {
                cache_ratio,
                fetch_latency: Duration::from_millis(latency_ms),
                rate_limit_every,
                fail_every,
                seed,
            };
            run_refresh(RefreshArgs {
                symbols,
                config,
                smart,
                settings,
                dry_run,
                json,
                csv,
            })
        }
        Commands::Config { config } => run_config(config.as_deref()),
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("quotebatch=debug,quotebatch_core=debug")
        } else {
            EnvFilter::new("quotebatch=info,quotebatch_core=info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<BatchConfig> {
    match path {
        Some(path) => BatchConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(BatchConfig::default()),
    }
}

fn resolve_symbols(
    symbols: Vec<String>,
    universe: Option<&Path>,
    sector: Option<&str>,
) -> Result<Vec<String>> {
    if !symbols.is_empty() {
        if universe.is_some() || sector.is_some() {
            bail!("pass either symbols or --universe/--sector, not both");
        }
        return Ok(symbols.into_iter().map(|s| s.trim().to_uppercase()).collect());
    }
    let universe = match universe {
        Some(path) => Universe::from_file(path)?,
        None => Universe::default_us(),
    };
    let symbols = match sector {
        Some(name) => match universe.sector(name) {
            Some(tickers) => tickers,
            None => bail!("unknown sector '{name}'"),
        },
        None => universe.symbols(),
    };
    if symbols.is_empty() {
        bail!("no symbols to refresh");
    }
    Ok(symbols)
}

struct RefreshArgs {
    symbols: Vec<String>,
    config: Option<PathBuf>,
    smart: bool,
    settings: SourceSettings,
    dry_run: bool,
    json: Option<PathBuf>,
    csv: Option<PathBuf>,
}

fn run_refresh(args: RefreshArgs) -> Result<()> {
    args.settings.validate().context("invalid --cache-ratio")?;
    let mut config = load_config(args.config.as_deref())?;
    if config.jitter_seed.is_none() {
        config = config.with_jitter_seed(args.settings.seed);
    }

    let recorder = RecordingSleeper::new();
    let sleeper: Arc<dyn Sleeper> = if args.dry_run {
        Arc::new(recorder.clone())
    } else {
        Arc::new(ThreadSleeper)
    };

    let mut engine = BatchEngine::new(config)
        .context("invalid engine configuration")?
        .with_sleeper(Arc::clone(&sleeper));

    let mut source = SimulatedQuotes::new(args.settings, sleeper);
    source.warm(&args.symbols);
    info!(
        symbols = args.symbols.len(),
        cached = source.cached_count(),
        smart = args.smart,
        dry_run = args.dry_run,
        "refreshing quotes"
    );

    let fetch = |symbol: &String| source.fetch(symbol);
    let records = if args.smart {
        engine.process_batch_smart(args.symbols, fetch, "refresh")
    } else {
        engine.process_batch(args.symbols, fetch, "refresh")
    };

    info!(fresh_fetches = source.fresh_fetches(), "refresh finished");

    let stats = engine.statistics();
    println!("{stats}");
    if args.dry_run {
        println!(
            "Dry run: {} pauses recorded, {:.1}s total",
            recorder.count(),
            recorder.total().as_secs_f64()
        );
    }

    if let Some(path) = &args.json {
        let report = RefreshReport::new("refresh", args.smart, &stats, &records);
        write_file(path, &export_json(&report)?)?;
        info!(path = %path.display(), "wrote JSON report");
    }
    if let Some(path) = &args.csv {
        write_file(path, &export_outcomes_csv(&records)?)?;
        info!(path = %path.display(), "wrote CSV outcomes");
    }
    Ok(())
}

fn run_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    config.validate().context("invalid engine configuration")?;
    println!("# fingerprint: {}", config.fingerprint());
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_refresh_flags() {
        let cli = Cli::try_parse_from([
            "quotebatch",
            "refresh",
            "AAPL",
            "MSFT",
            "--smart",
            "--cache-ratio",
            "0.9",
            "--rate-limit-every",
            "5",
            "--dry-run",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Refresh {
                symbols,
                smart,
                cache_ratio,
                rate_limit_every,
                dry_run,
                seed,
                ..
            } => {
                assert_eq!(symbols, vec!["AAPL", "MSFT"]);
                assert!(smart);
                assert_eq!(cache_ratio, 0.9);
                assert_eq!(rate_limit_every, Some(5));
                assert!(dry_run);
                assert_eq!(seed, 42);
            }
            Commands::Config { .. } => panic!("expected refresh"),
        }
    }

    #[test]
    fn explicit_symbols_are_normalized() {
        let symbols = resolve_symbols(vec![" spy".into(), "qqq".into()], None, None).unwrap();
        assert_eq!(symbols, vec!["SPY", "QQQ"]);
    }

    #[test]
    fn symbols_and_universe_conflict() {
        assert!(resolve_symbols(vec!["SPY".into()], None, Some("ETFs")).is_err());
    }

    #[test]
    fn sector_selection_uses_default_universe() {
        let symbols = resolve_symbols(vec![], None, Some("ETFs")).unwrap();
        assert_eq!(symbols.len(), 8);
        assert!(resolve_symbols(vec![], None, Some("Crypto")).is_err());
    }

    #[test]
    fn dry_run_refresh_writes_exports() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("report.json");
        let csv = dir.path().join("outcomes.csv");
        run_refresh(RefreshArgs {
            symbols: vec!["AAPL".into(), "MSFT".into(), "SPY".into()],
            config: None,
            smart: true,
            settings: SourceSettings {
                cache_ratio: 0.0,
                rate_limit_every: Some(2),
                ..SourceSettings::default()
            },
            dry_run: true,
            json: Some(json.clone()),
            csv: Some(csv.clone()),
        })
        .unwrap();

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
        assert_eq!(report["statistics"]["total_items"], 3);
        assert_eq!(std::fs::read_to_string(csv).unwrap().lines().count(), 4);
    }

    #[test]
    fn nan_cache_ratio_is_rejected() {
        let err = run_refresh(RefreshArgs {
            symbols: vec!["AAPL".into()],
            config: None,
            smart: false,
            settings: SourceSettings {
                cache_ratio: f64::NAN,
                ..SourceSettings::default()
            },
            dry_run: true,
            json: None,
            csv: None,
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("cache ratio"));
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "batch_size = 7\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().batch_size, 7);
        assert!(load_config(Some(Path::new("/missing.toml"))).is_err());
    }
}
