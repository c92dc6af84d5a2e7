/*!
 * renterd-mirror CLI
 *
 * Flags override values from `--config`; anything left unset falls back to the
 * built-in defaults.
 */

use clap::{Parser, ValueEnum};
use renterd_mirror::{
    allowlist::{AllowlistReconciler, HostFilter, HttpHostDirectory},
    config::{
        parse_health_threshold, AllowlistConfig, BackoffConfig, FailurePolicy, LogLevel, MirrorConfig,
    },
    error::{MirrorError, Result, EXIT_SUCCESS},
    logging,
    size::format_byte_string,
    Mirror, ObjectSource, RenterdClient, S3Source,
};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "renterd-mirror")]
#[command(version, about = "Mirror an S3 bucket into a renterd node, skipping objects already stored", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log file path, appended to [default: mirror.log]
    #[arg(long = "log.path", value_name = "PATH")]
    log_path: Option<PathBuf>,

    /// Log level (RUST_LOG overrides) [default: info]
    #[arg(long = "log.level", value_enum)]
    log_level: Option<LogLevelArg>,

    /// Bucket to mirror
    #[arg(long = "aws.bucket", value_name = "BUCKET")]
    bucket: Option<String>,

    /// AWS region [default: us-west-2]
    #[arg(long = "aws.region", value_name = "REGION")]
    region: Option<String>,

    /// Custom endpoint for S3-compatible services
    #[arg(long = "aws.endpoint", value_name = "URL")]
    endpoint: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long = "aws.path-style")]
    path_style: bool,

    /// Sign requests with the default AWS credential chain instead of reading anonymously
    #[arg(long = "aws.credentials")]
    use_credentials: bool,

    /// Worker API address [default: http://localhost:9980/api/worker]
    #[arg(long = "worker.address", value_name = "URL")]
    worker_address: Option<String>,

    /// Worker API password
    #[arg(
        long = "worker.password",
        env = "RENTERD_WORKER_PASSWORD",
        hide_env_values = true
    )]
    worker_password: Option<String>,

    /// Contract set to upload to [default: autopilot]
    #[arg(long = "worker.contractset", value_name = "NAME")]
    contract_set: Option<String>,

    /// Minimum shards per object [default: 10]
    #[arg(long = "worker.minshards", value_name = "N")]
    min_shards: Option<u32>,

    /// Total shards per object [default: 30]
    #[arg(long = "worker.totalshards", value_name = "N")]
    total_shards: Option<u32>,

    /// Bus API address [default: http://localhost:9980/api/bus]
    #[arg(long = "bus.address", value_name = "URL")]
    bus_address: Option<String>,

    /// Bus API password
    #[arg(long = "bus.password", env = "RENTERD_BUS_PASSWORD", hide_env_values = true)]
    bus_password: Option<String>,

    /// Number of upload workers [default: 2]
    #[arg(long = "threads", value_name = "N")]
    threads: Option<usize>,

    /// Work queue capacity [default: same as --threads]
    #[arg(long = "queue", value_name = "N")]
    queue: Option<usize>,

    /// Read every object back after upload and compare checksums
    #[arg(long = "verify")]
    verify: bool,

    /// What to do with an object that keeps failing [default: abort]
    #[arg(long = "on-failure", value_enum)]
    on_failure: Option<FailurePolicyArg>,

    /// Retry backoff between failed attempts [default: fixed]
    #[arg(long = "backoff", value_enum)]
    backoff: Option<BackoffArg>,

    /// Re-upload stored objects at or below this health percentage, or "off" [default: 25]
    #[arg(long = "health.threshold", value_name = "PERCENT")]
    health_threshold: Option<String>,

    /// Host directory URL; enables allow-list reconciliation
    #[arg(long = "allowlist.directory", value_name = "URL")]
    allowlist_directory: Option<String>,

    /// Seconds between allow-list reconcile passes [default: 3600]
    #[arg(long = "allowlist.interval", value_name = "SECS")]
    allowlist_interval: Option<u64>,

    /// Minimum host score kept on the allow-list [default: 0]
    #[arg(long = "allowlist.min-score", value_name = "SCORE")]
    allowlist_min_score: Option<f64>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum FailurePolicyArg {
    Abort,
    Skip,
}

impl From<FailurePolicyArg> for FailurePolicy {
    fn from(policy: FailurePolicyArg) -> Self {
        match policy {
            FailurePolicyArg::Abort => FailurePolicy::Abort,
            FailurePolicyArg::Skip => FailurePolicy::Skip,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum BackoffArg {
    Fixed,
    Exponential,
}

impl From<BackoffArg> for BackoffConfig {
    fn from(backoff: BackoffArg) -> Self {
        match backoff {
            BackoffArg::Fixed => BackoffConfig::fixed(),
            BackoffArg::Exponential => BackoffConfig::exponential(),
        }
    }
}

fn secret(value: String) -> SecretString {
    SecretString::new(value.into_boxed_str())
}

/// Layer CLI flags over the config file (or defaults)
fn build_config(cli: Cli) -> Result<MirrorConfig> {
    let mut config = match &cli.config {
        Some(path) => MirrorConfig::from_file(path)?,
        None => MirrorConfig::default(),
    };

    if let Some(path) = cli.log_path {
        config.logging.log_path = path;
    }
    if let Some(level) = cli.log_level {
        config.logging.log_level = level.into();
    }

    let source = &mut config.source;
    if let Some(bucket) = cli.bucket {
        source.bucket = bucket;
    }
    if let Some(region) = cli.region {
        source.region = region;
    }
    if cli.endpoint.is_some() {
        source.endpoint = cli.endpoint;
    }
    if cli.path_style {
        source.force_path_style = true;
    }
    if cli.use_credentials {
        source.anonymous = false;
    }

    let destination = &mut config.destination;
    if let Some(address) = cli.worker_address {
        destination.worker_address = address;
    }
    if let Some(password) = cli.worker_password {
        destination.worker_password = secret(password);
    }
    if let Some(contract_set) = cli.contract_set {
        destination.contract_set = contract_set;
    }
    if let Some(min_shards) = cli.min_shards {
        destination.min_shards = min_shards;
    }
    if let Some(total_shards) = cli.total_shards {
        destination.total_shards = total_shards;
    }
    if let Some(address) = cli.bus_address {
        destination.bus_address = address;
    }
    if let Some(password) = cli.bus_password {
        destination.bus_password = secret(password);
    }

    let pipeline = &mut config.pipeline;
    if let Some(threads) = cli.threads {
        pipeline.workers = threads;
    }
    if cli.queue.is_some() {
        pipeline.queue_capacity = cli.queue;
    }
    if cli.verify {
        pipeline.verify_uploads = true;
    }
    if let Some(policy) = cli.on_failure {
        pipeline.failure_policy = policy.into();
    }
    if let Some(backoff) = cli.backoff {
        pipeline.backoff = backoff.into();
    }
    if let Some(threshold) = cli.health_threshold {
        pipeline.degraded_health_threshold =
            parse_health_threshold(&threshold).map_err(MirrorError::Config)?;
    }

    if let Some(url) = cli.allowlist_directory {
        let allowlist = config
            .allowlist
            .get_or_insert_with(|| AllowlistConfig::new(url.clone()));
        allowlist.directory_url = url;
    }
    if let Some(allowlist) = config.allowlist.as_mut() {
        if let Some(interval) = cli.allowlist_interval {
            allowlist.interval_secs = interval;
        }
        if let Some(min_score) = cli.allowlist_min_score {
            allowlist.min_score = min_score;
        }
    }

    config.validate()?;
    Ok(config)
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(cli)?;
    logging::init_logging(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(mirror(config))
}

async fn mirror(config: MirrorConfig) -> Result<()> {
    let source: Arc<dyn ObjectSource> = Arc::new(S3Source::new(&config.source).await);
    let renterd = Arc::new(RenterdClient::new(&config.destination)?);

    let shutdown = CancellationToken::new();
    let interrupt = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing queued uploads");
                shutdown.cancel();
            }
        })
    };

    let allowlist_stop = CancellationToken::new();
    let allowlist_task = match &config.allowlist {
        Some(allowlist) => {
            let directory = Arc::new(HttpHostDirectory::new(&allowlist.directory_url)?);
            let reconciler =
                AllowlistReconciler::new(renterd.clone(), directory, HostFilter::from(allowlist));
            let interval = allowlist.interval();
            let stop = allowlist_stop.clone();
            info!(directory = %allowlist.directory_url, ?interval, "allowlist reconciliation enabled");
            Some(tokio::spawn(async move { reconciler.run(interval, stop).await }))
        }
        None => None,
    };

    let mirror = Mirror::new(source, renterd, &config);
    let result = mirror.run(shutdown).await;

    allowlist_stop.cancel();
    if let Some(task) = allowlist_task {
        task.await?;
    }
    interrupt.abort();

    let report = result?;
    info!(
        objects = report.counters.objects_completed,
        uploaded = %format_byte_string(report.counters.logical_bytes_completed),
        redundant = %format_byte_string(report.counters.redundant_bytes_completed),
        total = %format_byte_string(report.counters.redundant_bytes_total),
        "mirror summary"
    );
    report.into_result().map(|_| ()).map_err(|err: MirrorError| {
        error!(error = %err, "mirror finished with failures");
        err
    })
}
