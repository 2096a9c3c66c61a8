use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

const ENV_PREFIX: &str = "LAMELLAR_GEMM_";

const DEFAULT_DEADLOCK_TIMEOUT: f64 = 600.0;

/// Shortest interval between deadlock warnings
const MIN_DEADLOCK_TIMEOUT: f64 = 0.1;

fn default_deadlock_timeout() -> f64 {
    DEFAULT_DEADLOCK_TIMEOUT
}

fn default_backend() -> String {
    "threads".to_owned()
}

fn default_num_workers() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.into(),
        Err(_) => 4,
    }
}

fn default_strategy() -> String {
    "gather".to_owned()
}

fn default_sizes() -> Vec<usize> {
    vec![100, 1000]
}

fn default_worker_counts() -> Vec<usize> {
    vec![1, 2, 4, 8]
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Seconds a worker may block in a receive before a potential deadlock warning is logged, default: 600.0 seconds
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// The lamellae backend to use
    /// local -- single worker execution
    /// threads -- multi worker execution, one thread per worker, default
    #[serde(default = "default_backend")]
    pub backend: String, //local,threads

    /// The maximum number of workers a sweep may launch, default: available parallelism
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// The recombination strategy: gather, allreduce, pairwise, pairwise-sum, pairwise-legacy. Default: gather
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Matrix dimensions swept by the driver (comma separated), default: 100,1000
    #[serde(default = "default_sizes")]
    pub sizes: Vec<usize>,

    /// Worker counts swept by the driver (comma separated), default: 1,2,4,8
    /// The speedup baseline is taken from the first P=1 trial of each size, so list 1 first.
    #[serde(default = "default_worker_counts")]
    pub worker_counts: Vec<usize>,

    /// Master seed; when unset every worker draws its operands independently
    pub seed: Option<u64>,

    /// Check every distributed product against a sequential one. Default: false
    pub verify: Option<bool>,
}

impl Config {
    /// Parse the configuration from the process environment
    pub fn from_env() -> Result<Config, envy::Error> {
        envy::prefixed(ENV_PREFIX).from_env::<Config>()
    }

    /// Parse the configuration from an explicit list of `(NAME, value)` pairs (names include the prefix)
    pub fn from_iter<I>(vars: I) -> Result<Config, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter::<_, Config>(vars)
    }

    pub fn verify(&self) -> bool {
        self.verify.unwrap_or(false)
    }

    /// How long a receive blocks between deadlock warnings.
    ///
    /// Values that are not positive finite numbers fall back to the 600 second default; positive
    /// values below 0.1 seconds are raised to 0.1 seconds.
    pub fn deadlock_interval(&self) -> Duration {
        let secs = if self.deadlock_timeout.is_finite() && self.deadlock_timeout > 0.0 {
            self.deadlock_timeout.max(MIN_DEADLOCK_TIMEOUT)
        } else {
            DEFAULT_DEADLOCK_TIMEOUT
        };
        Duration::try_from_secs_f64(secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_DEADLOCK_TIMEOUT))
    }
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match Config::from_env() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}
