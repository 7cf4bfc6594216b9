//! nodestatsd - Node telemetry agent.
//!
//! Samples CPU, memory, disk, network, GPU and selected processes at a fixed
//! period. Prints each sample, or pre-aggregates them and exports telemetry
//! envelopes when an instrumentation key is configured.
//!
//! Settings come from the environment (`AZ_BATCH_POOL_ID`, `AZ_BATCH_NODE_ID`,
//! `APP_INSIGHTS_INSTRUMENTATION_KEY`, `AZ_BATCH_MONITOR_PROCESSES`), and
//! command-line flags override them.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use nodestats_core::aggregate::{JsonLinesExporter, LogExporter};
use nodestats_core::collector::{ProcfsProbe, RealFs, watched_disk_paths};
use nodestats_core::config::{Config, UserConfig, validate_and_build};
use nodestats_core::gpu::GpuStatsCollector;
use nodestats_core::report::{AggregatingReporter, ConsoleFormat, ConsoleReporter, Reporter};
use nodestats_core::sampler::Sampler;
use nodestats_core::scheduler::Scheduler;

/// Node telemetry agent.
#[derive(Parser, Debug)]
#[command(name = "nodestatsd", about = "Node telemetry agent", version)]
struct Args {
    /// Pool the node belongs to (overrides AZ_BATCH_POOL_ID).
    #[arg(long)]
    pool_id: Option<String>,

    /// Identifier of this node (overrides AZ_BATCH_NODE_ID).
    #[arg(long)]
    node_id: Option<String>,

    /// Telemetry instrumentation key (overrides APP_INSIGHTS_INSTRUMENTATION_KEY).
    /// Without a key samples are only printed.
    #[arg(long)]
    instrumentation_key: Option<String>,

    /// Comma-separated process names to monitor
    /// (overrides AZ_BATCH_MONITOR_PROCESSES).
    #[arg(long, value_delimiter = ',')]
    processes: Vec<String>,

    /// Local aggregation window in minutes (default: 1).
    #[arg(long)]
    aggregation: Option<u64>,

    /// Comma-separated subsystems to disable
    /// (diskIO, diskUsage, networkIO, gpu, cpu, memory).
    #[arg(long, value_delimiter = ',')]
    disable: Vec<String>,

    /// Sampling interval in seconds (default: 5).
    #[arg(short, long)]
    interval: Option<u64>,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// File to append exported metrics to, one JSON document per line.
    /// Defaults to stdout.
    #[arg(long, value_name = "PATH")]
    metrics_output: Option<PathBuf>,

    /// Local output when no instrumentation key is set.
    #[arg(long, value_enum, default_value_t = LocalOutput::Text)]
    output: LocalOutput,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// What to do with samples when nothing is uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LocalOutput {
    /// Print a stats block per tick.
    Text,
    /// Print each snapshot as a JSON line.
    Json,
    /// Aggregate over the window and log the results.
    Log,
}

impl Args {
    /// The command-line layer; unset flags leave the environment layer alone.
    fn user_config(&self) -> UserConfig {
        UserConfig {
            pool_id: self.pool_id.clone(),
            node_id: self.node_id.clone(),
            instrumentation_key: self.instrumentation_key.clone(),
            processes: trimmed(&self.processes),
            aggregation: self.aggregation,
            disable: trimmed(&self.disable),
        }
    }
}

/// Drops blanks left by stray commas and surrounding whitespace.
fn trimmed(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["nodestatsd", "nodestats_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn metrics_writer(path: Option<&PathBuf>) -> io::Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(Box::new(io::LineWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

fn build_reporter(
    config: &Config,
    local: LocalOutput,
    output: Option<&PathBuf>,
) -> io::Result<Box<dyn Reporter>> {
    if config.instrumentation_key.is_empty() {
        info!("No instrumentation key set, metrics will only be printed");
        let reporter: Box<dyn Reporter> = match local {
            LocalOutput::Text => Box::new(ConsoleReporter::stdout()),
            LocalOutput::Json => {
                Box::new(ConsoleReporter::stdout().with_format(ConsoleFormat::Json))
            }
            LocalOutput::Log => Box::new(AggregatingReporter::new(config.aggregation, LogExporter)),
        };
        return Ok(reporter);
    }

    let exporter = JsonLinesExporter::new(
        metrics_writer(output)?,
        config.instrumentation_key.clone(),
        config.pool_id.clone(),
        config.node_id.clone(),
    );
    Ok(Box::new(AggregatingReporter::new(config.aggregation, exporter)))
}

fn main() {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("nodestatsd {} starting", env!("CARGO_PKG_VERSION"));
    info!("OS: {}", std::env::consts::OS);

    let user = UserConfig::from_env().merge(args.user_config());
    let mut config = match validate_and_build(user) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(secs) = args.interval.filter(|s| *s > 0) {
        config.sampling_rate = Duration::from_secs(secs);
    }
    config.log_summary();

    let fs = RealFs::new();
    let disk_paths = watched_disk_paths(&fs);
    let probe = ProcfsProbe::new(fs, &args.proc_path);

    let subsystems = config.disable.enabled();
    let mut sampler = Sampler::new(probe, subsystems)
        .with_disk_paths(disk_paths)
        .with_processes(config.processes.clone());
    if subsystems.gpu {
        sampler = sampler.with_gpu(GpuStatsCollector::for_host());
    }

    let reporter = match build_reporter(&config, args.output, args.metrics_output.as_ref()) {
        Ok(reporter) => reporter,
        Err(e) => {
            error!("Failed to open metrics output: {}", e);
            std::process::exit(1);
        }
    };

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut scheduler = Scheduler::new(sampler, reporter, config.sampling_rate);
    scheduler.run(&running);

    info!("nodestatsd stopped");
}
