use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;
        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// Configuration read by the producer/consumer loops.
///
/// `job_polling_interval_ms` is accepted as an alias for `polling_interval_ms`
/// (the job-manager-flavored name some deployments use); when set, it takes
/// precedence over `polling_interval_ms`. This is a supplemented behavior,
/// not part of the distilled configuration table.
#[derive(Envconfig, Clone)]
pub struct WorkerConfig {
    pub worker_id: Option<NonEmptyString>,

    #[envconfig(default = "10")]
    pub maximum_concurrency: usize,

    #[envconfig(default = "500")]
    pub polling_interval_ms: EnvMsDuration,

    pub job_polling_interval_ms: Option<EnvMsDuration>,

    #[envconfig(default = "1800000")]
    pub job_timeout_ms: EnvMsDuration,

    #[envconfig(default = "1")]
    pub batch_size: usize,

    #[envconfig(default = "1000")]
    pub maximum_queue_size: usize,

    #[envconfig(default = "5")]
    pub error_delay_seconds: u64,

    #[envconfig(default = "30")]
    pub shutdown_timeout_seconds: u64,
}

impl WorkerConfig {
    /// `polling_interval_ms` if set, falling back to the job-manager alias,
    /// falling back to the field default.
    pub fn effective_polling_interval(&self) -> Duration {
        self.job_polling_interval_ms
            .map(|value| value.0)
            .unwrap_or(self.polling_interval_ms.0)
    }

    pub fn job_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.job_timeout_ms.0).unwrap_or(chrono::Duration::zero())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_secs(self.error_delay_seconds)
    }
}

/// Configuration governing retry scheduling and the job manager's own
/// claim/batch behavior.
#[derive(Envconfig, Clone)]
pub struct ManagerRuntimeConfig {
    #[envconfig(default = "3")]
    pub default_max_retries: u32,

    #[envconfig(default = "2.0")]
    pub retry_delay_base_seconds: f64,

    #[envconfig(default = "1800000")]
    pub job_claim_timeout_ms: EnvMsDuration,

    #[envconfig(default = "10")]
    pub max_concurrent_jobs: usize,

    #[envconfig(default = "30000")]
    pub stale_job_claim_check_interval_ms: EnvMsDuration,
}

/// Configuration for the stuck-job recovery loop. Only meaningful against a
/// store that reports `supports_recovery() == true`.
#[derive(Envconfig, Clone)]
pub struct RecoveryConfig {
    #[envconfig(default = "true")]
    pub enable_distributed_job_recovery: bool,

    #[envconfig(default = "30")]
    pub job_timeout_minutes: i64,

    #[envconfig(default = "60")]
    pub recovery_check_interval_seconds: u64,

    #[envconfig(default = "3")]
    pub maximum_retries: u32,
}

impl RecoveryConfig {
    pub fn job_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.job_timeout_minutes)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_check_interval_seconds)
    }
}
