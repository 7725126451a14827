use envconfig::Envconfig;
use jobs_common::config::RecoveryConfig;

/// Process-level configuration for the standalone recovery binary: bind
/// address for its health/metrics surface, the distributed store it watches,
/// and the `RecoveryConfig` table `jobs-common` defines.
#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    /// Unlike `jobs-api`/`jobs-worker`, this binary has no useful in-memory
    /// fallback: recovery only matters for a store shared across processes,
    /// so it requires a distributed store to run at all.
    pub redis_url: String,

    #[envconfig(nested = true)]
    pub recovery: RecoveryConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
