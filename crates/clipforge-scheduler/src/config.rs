//! Scheduler configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Scheduler and worker configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum concurrent running jobs in this process
    pub worker_concurrency: usize,
    /// Maximum concurrent running jobs per principal
    pub per_principal_concurrency: u32,
    /// Maximum processing attempts per job
    pub max_attempts: u32,
    /// Base delay for retry backoff
    pub retry_base: Duration,
    /// Multiplier applied per attempt
    pub retry_factor: f64,
    /// Jitter fraction applied to retry delays (0.25 = ±25%)
    pub retry_jitter: f64,
    /// Global wall-clock deadline per job attempt
    pub job_deadline: Duration,
    /// Worker lease time-to-live
    pub lease_ttl: Duration,
    /// Interval between lease heartbeats
    pub heartbeat_interval: Duration,
    /// Directory for per-attempt intermediate files
    pub work_dir: PathBuf,
    /// Clips selected per job
    pub default_clip_count: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            per_principal_concurrency: 2,
            max_attempts: 3,
            retry_base: Duration::from_secs(30),
            retry_factor: 2.0,
            retry_jitter: 0.25,
            job_deadline: Duration::from_secs(1800),
            lease_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(20),
            work_dir: PathBuf::from("/tmp/clipforge"),
            default_clip_count: 3,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_concurrency: env_parse("WORKER_CONCURRENCY", defaults.worker_concurrency),
            per_principal_concurrency: env_parse(
                "PER_PRINCIPAL_CONCURRENCY",
                defaults.per_principal_concurrency,
            ),
            max_attempts: env_parse("MAX_ATTEMPTS", defaults.max_attempts),
            retry_base: Duration::from_secs(env_parse("RETRY_BASE_SECONDS", 30)),
            retry_factor: env_parse("RETRY_FACTOR", defaults.retry_factor),
            retry_jitter: env_parse("RETRY_JITTER", defaults.retry_jitter),
            job_deadline: Duration::from_secs(env_parse("JOB_DEADLINE_SECONDS", 1800)),
            lease_ttl: Duration::from_secs(env_parse("LEASE_TTL_SECONDS", 60)),
            heartbeat_interval: Duration::from_secs(env_parse("HEARTBEAT_SECONDS", 20)),
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            default_clip_count: env_parse("DEFAULT_CLIP_COUNT", defaults.default_clip_count),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
