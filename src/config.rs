use crate::{models::subscription::subscription_name, stores::archive_store::DiskArchiveStore};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub archive_dir: String,
    pub archive_bucket: String,
    pub filestore: String,
    pub labeled_topic: String,
    pub target_label: String,
    pub pod_name: String,
    pub poll_interval_ms: u64,
    pub pull_batch_size: usize,
}

/// The slice of configuration the pipeline runs with. Built once, never
/// mutated.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub target_label: String,
    pub archive_bucket: String,
    pub subscription_name: String,
    pub topic: String,
    pub pull_batch_size: usize,
    pub poll_interval: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Archives labeled images that match a target label")]
pub struct Args {
    /// Host for the probe endpoints (overrides ARCHIVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the probe endpoints (overrides ARCHIVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL for archive metadata and the broker (overrides ARCHIVER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory where archived payloads are stored (overrides ARCHIVER_ARCHIVE_DIR)
    #[arg(long)]
    pub archive_dir: Option<String>,

    /// Archive bucket (overrides ARCHIVER_ARCHIVE_BUCKET, required)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Endpoint for uploaded files (overrides ARCHIVER_FILESTORE, required)
    #[arg(long)]
    pub filestore: Option<String>,

    /// Topic for labeled notifications (overrides ARCHIVER_LABELED_TOPIC, required)
    #[arg(long)]
    pub labeled_topic: Option<String>,

    /// Target label for images to archive (overrides ARCHIVER_TARGET_LABEL)
    #[arg(long)]
    pub target_label: Option<String>,

    /// Stable instance identifier used in the subscription name (overrides POD_NAME, required)
    #[arg(long)]
    pub pod_name: Option<String>,

    /// Wait between empty pulls, in milliseconds (overrides ARCHIVER_POLL_INTERVAL_MS)
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Maximum messages per pull (overrides ARCHIVER_PULL_BATCH_SIZE)
    #[arg(long)]
    pub pull_batch_size: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI values over values from `lookup`, over defaults.
    pub fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let string = |arg: Option<String>, var: &str, default: Option<&str>| -> Result<String> {
            match arg.or_else(|| lookup(var)).or(default.map(String::from)) {
                Some(value) if !value.is_empty() => Ok(value),
                _ => bail!("{} must be set", var),
            }
        };

        let cfg = Self {
            host: string(args.host, "ARCHIVER_HOST", Some("0.0.0.0"))?,
            port: parsed(args.port, "ARCHIVER_PORT", 8080, &lookup)?,
            database_url: string(
                args.database_url,
                "ARCHIVER_DATABASE_URL",
                Some("sqlite://./data/meta/archiver.db"),
            )?,
            archive_dir: string(args.archive_dir, "ARCHIVER_ARCHIVE_DIR", Some("./data/archive"))?,
            archive_bucket: string(args.bucket, "ARCHIVER_ARCHIVE_BUCKET", None)?,
            filestore: string(args.filestore, "ARCHIVER_FILESTORE", None)?,
            labeled_topic: string(args.labeled_topic, "ARCHIVER_LABELED_TOPIC", None)?,
            target_label: string(args.target_label, "ARCHIVER_TARGET_LABEL", Some("cat"))?,
            pod_name: string(args.pod_name, "POD_NAME", None)?,
            poll_interval_ms: parsed(
                args.poll_interval_ms,
                "ARCHIVER_POLL_INTERVAL_MS",
                500,
                &lookup,
            )?,
            pull_batch_size: parsed(args.pull_batch_size, "ARCHIVER_PULL_BATCH_SIZE", 16, &lookup)?,
        };

        if cfg.pull_batch_size == 0 {
            bail!("ARCHIVER_PULL_BATCH_SIZE must be at least 1");
        }
        DiskArchiveStore::ensure_bucket_name_safe(&cfg.archive_bucket)
            .context("ARCHIVER_ARCHIVE_BUCKET is not a valid bucket name")?;
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            target_label: self.target_label.clone(),
            archive_bucket: self.archive_bucket.clone(),
            subscription_name: subscription_name(&self.pod_name, &self.target_label),
            topic: self.labeled_topic.clone(),
            pull_batch_size: self.pull_batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

fn parsed<T>(
    arg: Option<T>,
    var: &str,
    default: T,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = arg {
        return Ok(value);
    }
    match lookup(var) {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", var, value)),
        None => Ok(default),
    }
}
