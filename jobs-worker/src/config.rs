use envconfig::Envconfig;
use jobs_common::config::{ManagerRuntimeConfig, RecoveryConfig, WorkerConfig};

/// Process-level configuration: bind address, storage backend selection, and
/// the nested worker/manager/recovery tables `jobs-common` defines.
#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    /// If set, jobs are persisted in the distributed (Redis-backed) store,
    /// shareable across processes and eligible for stuck-job recovery. If
    /// unset, the worker runs against a single-process in-memory store.
    pub redis_url: Option<String>,

    #[envconfig(nested = true)]
    pub worker: WorkerConfig,

    #[envconfig(nested = true)]
    pub manager: ManagerRuntimeConfig,

    #[envconfig(nested = true)]
    pub recovery: RecoveryConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
