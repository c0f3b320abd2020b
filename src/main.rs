/// Version injected at compile time via CLOUDSHARE_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDSHARE_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cloudshare::api::callback::{self, CallbackEnvelope, CustomResourceEvent};
use cloudshare::collect::{Collector, Dataset};
use cloudshare::config::Config;
use cloudshare::kind::{default_registry, schedule, KindRegistry};
use cloudshare::rebalance::{Grouping, Strategy};
use cloudshare::{share, CancelSignal, HttpApiClient};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Collect cloud inventory and plan stable resource shares
#[derive(Parser, Debug)]
#[command(name = "cloudshare", version = VERSION, about, long_about = None)]
struct Args {
    /// Credentials profile to use
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Region used for global kinds
    #[arg(short = 'r', long, global = true)]
    home_region: Option<String>,

    /// Base URL of the RPC gateway
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Cache directory (defaults to the system temp directory)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Ignore and do not write the cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Concurrent calls per kind
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Per-call timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Kind table to use instead of the built-in one (JSON or YAML)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Custom-resource event to answer when the command finishes
    #[arg(long, global = true)]
    callback_event: Option<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect every kind and print the dataset as JSON
    Collect,
    /// Print the order in which kinds are collected
    Schedule,
    /// Look up one object by its match field
    Find {
        kind: String,
        value: String,
        /// Restrict regional kinds to this region
        #[arg(long)]
        region: Option<String>,
    },
    /// Compute the share grouping for a region
    Plan {
        #[arg(long)]
        region: String,
        #[arg(long)]
        strategy: Option<Strategy>,
        /// Maximum members per share
        #[arg(long)]
        capacity: Option<usize>,
        /// Share name prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Domain names to share, one per line (default: the region's resolver rules)
        #[arg(long)]
        universe: Option<PathBuf>,
        /// Principal ids to share with, one per line (default: current principals)
        #[arg(long)]
        principals: Option<PathBuf>,
    },
    /// Remove the profile's cached entries
    ClearCache,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudshare {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudshare").join("cloudshare.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudshare").join("cloudshare.log");
    }
    PathBuf::from("cloudshare.log")
}

impl Args {
    fn overrides(&self) -> Config {
        let (strategy, capacity, share_prefix) = match &self.command {
            Command::Plan {
                strategy,
                capacity,
                prefix,
                ..
            } => (*strategy, *capacity, prefix.clone()),
            _ => (None, None, None),
        };

        Config {
            profile: self.profile.clone(),
            home_region: self.home_region.clone(),
            endpoint: self.endpoint.clone(),
            cache_dir: self.cache_dir.clone(),
            concurrency: self.concurrency,
            call_timeout_secs: self.timeout,
            capacity,
            strategy,
            share_prefix,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let event = match &args.callback_event {
        Some(path) => Some(read_event(path)?),
        None => None,
    };

    let result = run(&args).await;

    if let Some(event) = event {
        let envelope = match &result {
            Ok(data) => CallbackEnvelope::success(&event, data.clone()),
            Err(err) => CallbackEnvelope::failure(&event, &**err),
        };
        let client = reqwest::Client::new();
        if !callback::send_response(&client, &event, &envelope).await {
            eprintln!("Warning: callback to orchestrator was not acknowledged");
        }
    }

    let output = result?;
    if !output.is_null() {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

fn read_event(path: &Path) -> Result<CustomResourceEvent> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read callback event {:?}", path))?;
    serde_json::from_str(&content).context("Invalid callback event")
}

fn load_registry(path: Option<&Path>) -> Result<KindRegistry> {
    let registry = match path {
        Some(path) => KindRegistry::from_file(path)?,
        None => default_registry()?,
    };
    tracing::info!("Loaded {} kinds", registry.len());
    Ok(registry)
}

/// Run the selected command; the result is printed and echoed to the callback
async fn run(args: &Args) -> Result<Value> {
    let config = Config::load().merge(args.overrides());
    let registry = load_registry(args.registry.as_deref())?;

    match &args.command {
        Command::Schedule => {
            let order = schedule(&registry)?;
            Ok(json!(order))
        }
        Command::ClearCache => {
            let profile = config.effective_profile()?;
            let removed = config.cache_store().clear(&profile)?;
            tracing::info!("Cleared cache for {}: {}", profile, removed);
            Ok(json!({ "profile": profile, "removed": removed }))
        }
        Command::Collect => {
            let dataset = collect(args, &config, &registry).await?;
            Ok(dataset.to_json())
        }
        Command::Find {
            kind,
            value,
            region,
        } => {
            let dataset = collect(args, &config, &registry).await?;
            match dataset.find(&registry, kind, region.as_deref(), value) {
                Some(item) => Ok(item.clone()),
                None => {
                    tracing::warn!("{} {} not found", kind, value);
                    eprintln!("{} {} not found", kind, value);
                    Ok(Value::Null)
                }
            }
        }
        Command::Plan {
            region,
            universe,
            principals,
            ..
        } => {
            let dataset = collect(args, &config, &registry).await?;
            plan(
                &config,
                &dataset,
                region,
                universe.as_deref(),
                principals.as_deref(),
            )
        }
    }
}

async fn collect(args: &Args, config: &Config, registry: &KindRegistry) -> Result<Dataset> {
    let options = config.collect_options()?;
    let client = HttpApiClient::new(&config.effective_endpoint(), &options.profile)?;
    let cache = (!args.no_cache).then(|| config.cache_store());

    let (handle, signal) = CancelSignal::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling collection");
            handle.cancel();
        }
    });

    let collector = Collector::new(Arc::new(client), cache, options).with_cancel(signal);
    let dataset = collector
        .collect(registry)
        .await
        .context("Collection failed")?;
    Ok(dataset)
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn plan(
    config: &Config,
    dataset: &Dataset,
    region: &str,
    universe: Option<&Path>,
    principals: Option<&Path>,
) -> Result<Value> {
    let prefix = config.effective_share_prefix();
    let capacity = config.effective_capacity();
    let strategy = config.effective_strategy();

    let domains = match universe {
        Some(path) => share::rule_universe(read_lines(path)?),
        None => share::rule_universe(share::complete_rule_domains(dataset, region)),
    };
    let principal_ids: BTreeSet<String> = match principals {
        Some(path) => read_lines(path)?.into_iter().collect(),
        None => share::previous_principals(dataset, region, &prefix)
            .into_values()
            .flatten()
            .collect(),
    };

    let rebalancer = strategy.rebalancer();
    let zones = rebalancer.rebalance(
        &share::previous_grouping(dataset, region, &prefix),
        &domains,
        capacity,
    )?;
    let principal_groups: Grouping = rebalancer.rebalance(
        &share::previous_principals(dataset, region, &prefix),
        &principal_ids,
        capacity,
    )?;
    let shares = share::share_plan(&prefix, &principal_groups, &zones)?;

    tracing::info!(
        "Planned {} shares in {} ({} domains, {} principals, strategy {})",
        shares.len(),
        region,
        domains.len(),
        principal_ids.len(),
        strategy
    );

    Ok(json!({
        "region": region,
        "strategy": strategy,
        "capacity": capacity,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "zones": zones,
        "principals": principal_groups,
        "shares": shares,
    }))
}
