//! netzoom CLI
//!
//! Drives the resolution manager against a synthetic capture or a packet
//! CSV export:
//! - Replay a zoom sequence and report tier, cache hits and latency
//! - Inspect a CSV export and query a window
//! - Print the default config file

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use netzoom::config::{generate_default_config, Config, LoggingConfig};
use netzoom::{
    CsvPacketLoader, DataProvider, InMemoryProvider, ManagerConfig, Resolution, ResolutionManager,
    TimeDomain, TimestampUnit, MICROS_PER_HOUR, MICROS_PER_SEC,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "netzoom")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-resolution timeline manager for packet captures")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,

    /// Override the configured log level
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a zoom sequence against a synthetic capture
    Simulate {
        /// Capture length in hours
        #[arg(long, default_value = "1")]
        hours: i64,
        /// Packet interval in milliseconds
        #[arg(long, default_value = "10")]
        interval_ms: i64,
        /// Simulated provider latency in milliseconds
        #[arg(long, default_value = "20")]
        latency_ms: u64,
        /// Pause between zoom steps in milliseconds
        #[arg(long, default_value = "150")]
        step_ms: u64,
        /// Wait for every request instead of using stand-in data
        #[arg(long)]
        blocking: bool,
    },

    /// Load a packet CSV and query a window
    Inspect {
        /// Path to CSV file
        path: PathBuf,
        /// Timestamp unit (us, ms, s)
        #[arg(long, default_value = "us")]
        unit: String,
        /// Window start (µs, default: dataset start)
        #[arg(long)]
        start: Option<i64>,
        /// Window end (µs, default: dataset end)
        #[arg(long)]
        end: Option<i64>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// One replayed zoom step
#[derive(Debug, Serialize)]
struct StepReport {
    step: usize,
    start: i64,
    end: i64,
    span_us: i64,
    resolution: Resolution,
    shown: Resolution,
    items: usize,
    from_cache: bool,
    refined: bool,
    latency_ms: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let template = generate_default_config();
        match output {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &template)?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {:?}", path))?,
        None => Config::load_default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    init_logging(&config.logging)?;

    tracing::info!("netzoom v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Simulate {
            hours,
            interval_ms,
            latency_ms,
            step_ms,
            blocking,
        } => {
            if hours <= 0 || interval_ms <= 0 {
                bail!("hours and interval must be positive");
            }
            let provider = InMemoryProvider::synthetic(0, hours * MICROS_PER_HOUR, interval_ms * 1_000)
                .with_name("synthetic")
                .with_latency(Duration::from_millis(latency_ms));
            tracing::info!(packets = provider.records().len(), "Generated synthetic capture");

            let manager = ResolutionManager::init(Arc::new(provider), config.manager_config()).await?;
            let reports = simulate(&manager, hours * MICROS_PER_HOUR, step_ms, blocking).await?;

            match cli.format.as_str() {
                "json" => {
                    let output = serde_json::json!({
                        "steps": reports,
                        "stats": manager.memory_stats(),
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                _ => {
                    print_steps(&reports);
                    println!();
                    println!("{}", manager.memory_stats());
                }
            }
        }

        Commands::Inspect {
            path,
            unit,
            start,
            end,
        } => {
            let unit = match unit.as_str() {
                "us" | "micros" => TimestampUnit::Micros,
                "ms" | "millis" => TimestampUnit::Millis,
                "s" | "seconds" => TimestampUnit::Seconds,
                other => bail!("unknown timestamp unit: {}", other),
            };
            if !path.exists() {
                bail!("file not found: {:?}", path);
            }

            let loaded = CsvPacketLoader::new().with_timestamp_unit(unit).load(&path)?;
            println!("Import results:");
            println!("  Rows loaded: {}", loaded.rows_loaded);
            println!("  Rows failed: {}", loaded.rows_failed);
            if !loaded.errors.is_empty() {
                println!();
                println!("Errors (first 10):");
                for error in loaded.errors.iter().take(10) {
                    println!("  {}", error);
                }
            }

            let provider = Arc::new(loaded.provider);
            let (min_time, max_time) = provider.time_extent().await?;
            println!();
            println!("Extent: {} .. {}", format_micros(min_time), format_micros(max_time));

            let manager_config = config.manager_config();
            let manager = ResolutionManager::init(provider, manager_config.clone()).await?;
            println!("Coarse bins: {}", manager.coarse_bins().len());

            let start = start.unwrap_or(min_time);
            let end = end.unwrap_or(max_time.max(min_time + 1));
            let domain = TimeDomain::try_new(start, end)
                .with_context(|| format!("window start {} must be before end {}", start, end))?;

            inspect_window(&manager, &manager_config, domain, &cli.format).await?;
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("netzoom={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);
    let json = logging.format == "json";

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            let writer = std::sync::Mutex::new(file);
            if json {
                registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                    .init();
            } else {
                registry
                    .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                    .init();
            }
        }
        None => {
            if json {
                registry
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            } else {
                registry
                    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                    .init();
            }
        }
    }
    Ok(())
}

/// Zoom from the full extent into the middle of the capture and back out
async fn simulate(
    manager: &ResolutionManager,
    extent: i64,
    step_ms: u64,
    blocking: bool,
) -> Result<Vec<StepReport>> {
    let centre = extent / 2;
    let fractions = [1.0, 0.5, 0.1, 0.02, 0.012, 0.008, 0.005, 0.008, 0.02, 0.5, 1.0];
    let mut reports = Vec::with_capacity(fractions.len());

    for (step, fraction) in fractions.iter().enumerate() {
        let span = ((extent as f64 * fraction) as i64).max(MICROS_PER_SEC);
        let start = (centre - span / 2).max(0);
        let domain = TimeDomain::new(start, (start + span).min(extent).max(start + 1));
        let started = Instant::now();

        let report = if blocking {
            let result = manager.get_data_for_domain(domain).await?;
            StepReport {
                step,
                start: domain.start,
                end: domain.end,
                span_us: domain.span(),
                resolution: result.resolution,
                shown: result.resolution,
                items: result.data.len(),
                from_cache: result.from_cache,
                refined: false,
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            }
        } else {
            let view = manager.get_data_for_domain_non_blocking(domain);
            let mut report = StepReport {
                step,
                start: domain.start,
                end: domain.end,
                span_us: domain.span(),
                resolution: view.resolution,
                shown: view.data_resolution,
                items: view.data.len(),
                from_cache: !view.is_loading,
                refined: false,
                latency_ms: 0.0,
            };
            if let Some(future) = view.loading_future {
                if let Some(refined) = future.await {
                    report.shown = refined.resolution;
                    report.items = refined.data.len();
                    report.refined = true;
                }
            }
            report.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            report
        };

        tracing::debug!(step, resolution = %report.resolution, items = report.items, "Zoom step");
        reports.push(report);
        tokio::time::sleep(Duration::from_millis(step_ms)).await;
    }

    Ok(reports)
}

async fn inspect_window(
    manager: &ResolutionManager,
    config: &ManagerConfig,
    domain: TimeDomain,
    format: &str,
) -> Result<()> {
    let started = Instant::now();
    let result = manager.get_data_for_domain(domain).await?;
    let elapsed = started.elapsed();

    if format == "json" {
        let output = serde_json::json!({
            "domain": domain,
            "result": result,
            "stats": manager.memory_stats(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("Window: {} .. {}", format_micros(domain.start), format_micros(domain.end));
    println!(
        "Tier: {} ({} items, {}, {:.1} ms)",
        result.resolution,
        result.data.len(),
        if result.from_cache { "cached" } else { "loaded" },
        elapsed.as_secs_f64() * 1000.0
    );

    if let Some(records) = result.data.as_records() {
        println!();
        println!(
            "{:<28} {:>6} {:>6} {:>6} {:>6} {:>6}",
            "Timestamp", "Length", "Src", "Dst", "SPort", "DPort"
        );
        println!("{}", "-".repeat(64));
        for r in records.iter().take(20) {
            println!(
                "{:<28} {:>6} {:>6} {:>6} {:>6} {:>6}",
                format_micros(r.timestamp),
                r.length,
                r.src_id,
                r.dst_id,
                r.src_port,
                r.dst_port
            );
        }
        if records.len() >= config.detail_limit {
            println!("(chunks capped at {} records)", config.detail_limit);
        }
    } else if let Some(bins) = result.data.as_bins() {
        let packets: u64 = bins.iter().map(|b| b.count).sum();
        let bytes: u64 = bins.iter().map(|b| b.byte_total).sum();
        println!("Packets: {}  Bytes: {}", packets, bytes);
    }

    println!();
    println!("{}", manager.memory_stats());
    Ok(())
}

fn print_steps(reports: &[StepReport]) {
    println!(
        "{:<5} {:>16} {:<7} {:<7} {:>8} {:<6} {:<8} {:>10}",
        "Step", "Span (us)", "Tier", "Shown", "Items", "Hit", "Refined", "Latency"
    );
    println!("{}", "-".repeat(76));
    for r in reports {
        println!(
            "{:<5} {:>16} {:<7} {:<7} {:>8} {:<6} {:<8} {:>8.1}ms",
            r.step,
            r.span_us,
            r.resolution.to_string(),
            r.shown.to_string(),
            r.items,
            r.from_cache,
            r.refined,
            r.latency_ms
        );
    }
}

fn format_micros(micros: i64) -> String {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
        .unwrap_or_else(|| micros.to_string())
}
