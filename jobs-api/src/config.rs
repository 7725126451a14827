use envconfig::Envconfig;
use jobs_common::config::ManagerRuntimeConfig;

/// Process-level configuration: bind address and storage backend selection.
/// Submission goes through the same `ManagerRuntimeConfig` table the worker
/// uses, since `jobs-api` and `jobs-worker` share a `JobManager` over the
/// same store.
#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3300")]
    pub port: u16,

    /// If set, jobs are submitted to the distributed (Redis-backed) store
    /// shared with worker processes. If unset, this process runs against its
    /// own single-process in-memory store, useful for local development only.
    pub redis_url: Option<String>,

    #[envconfig(nested = true)]
    pub manager: ManagerRuntimeConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
