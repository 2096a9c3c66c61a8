//! The (n, P) sweep driver: one timed trial per matrix size and worker count, with speedup measured
//! against the single worker runtime of the same size.
use crate::collectives::Transport;
use crate::env_var::Config;
use crate::error::{DimensionError, GemmError, GemmResult};
use crate::lamellae::Backend;
use crate::lamellar_world::{WorkerContext, WorldBuilder};
use crate::matrix::Matrix;
use crate::distribution::RowAssignment;
use crate::multiplier::{
    distribute_seed, shared_seed, PartitionedMultiplier, SeedPolicy, Strategy,
};

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::*;

/// Largest relative error a verified product may show against the sequential product
pub const VERIFY_TOLERANCE: f64 = 1e-9;

/// Single worker runtimes keyed by matrix size.
///
/// A baseline for `n` only exists once a `P = 1` trial of size `n` has been recorded; trials for
/// other worker counts that run before it report no speedup.
#[derive(Debug, Clone, Default)]
pub struct SpeedupBaseline {
    sequential: HashMap<usize, Duration>,
}

impl SpeedupBaseline {
    pub fn new() -> SpeedupBaseline {
        SpeedupBaseline::default()
    }

    /// Record a trial runtime, returning `sequential / elapsed` when a baseline for `n` exists and `num_workers > 1`
    pub fn record(&mut self, n: usize, num_workers: usize, elapsed: Duration) -> Option<f64> {
        if num_workers == 1 {
            self.sequential.insert(n, elapsed);
            return None;
        }
        let sequential = self.sequential.get(&n)?;
        let parallel = elapsed.as_secs_f64();
        if parallel > 0.0 {
            Some(sequential.as_secs_f64() / parallel)
        } else {
            None
        }
    }

    pub fn sequential(&self, n: usize) -> Option<Duration> {
        self.sequential.get(&n).copied()
    }
}

/// What a single `(n, P)` trial measured
#[derive(Debug, Clone, PartialEq)]
pub struct TrialReport {
    pub n: usize,
    pub num_workers: usize,
    pub strategy: Strategy,
    /// wall clock time at the coordinator, from the starting barrier until the product was recombined
    pub runtime: Duration,
    pub speedup: Option<f64>,
    /// serialized payload sent by all workers together
    pub mb_sent: f64,
    /// set for verified trials
    pub max_relative_error: Option<f64>,
}

impl std::fmt::Display for TrialReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Runtime for n={}, num_procs={}: {} seconds ({}, {:.3} MB sent)",
            self.n,
            self.num_workers,
            self.runtime.as_secs_f64(),
            self.strategy,
            self.mb_sent
        )?;
        if let Some(err) = self.max_relative_error {
            write!(f, " [verified, max relative error {:e}]", err)?;
        }
        if let Some(speedup) = self.speedup {
            write!(
                f,
                "\n-----------Speedup for n={}, num_procs={}: {}-----------",
                self.n, self.num_workers, speedup
            )?;
        }
        Ok(())
    }
}

/// Everything a sweep needs, usually read from the environment via [SweepConfig::from_config]
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub sizes: Vec<usize>,
    pub worker_counts: Vec<usize>,
    /// worker counts above this are skipped
    pub max_workers: usize,
    pub strategy: Strategy,
    pub backend: Backend,
    pub seed: Option<u64>,
    pub verify: bool,
}

impl SweepConfig {
    pub fn from_config(config: &Config) -> GemmResult<SweepConfig> {
        let strategy = config.strategy.parse::<Strategy>()?;
        let backend = Backend::from_name(config.backend.as_str()).unwrap_or_else(|| {
            warn!(
                "unknown backend '{}', falling back to {:?}",
                config.backend,
                Backend::Threads
            );
            Backend::Threads
        });
        Ok(SweepConfig {
            sizes: config.sizes.clone(),
            worker_counts: config.worker_counts.clone(),
            max_workers: config.num_workers,
            strategy,
            backend,
            seed: config.seed,
            verify: config.verify(),
        })
    }

    /// The number of trials a sweep attempts: every size times every worker count within `max_workers`
    pub fn trial_count(&self) -> usize {
        let worker_counts = self
            .worker_counts
            .iter()
            .filter(|&&num_workers| num_workers <= self.max_workers)
            .count();
        self.sizes.len() * worker_counts
    }
}

struct WorkerOutcome {
    elapsed: Duration,
    mb_sent: f64,
    max_relative_error: Option<f64>,
}

// every worker draws the same full operands from the agreed master seed
fn verified_trial(
    ctx: &WorkerContext,
    multiplier: &PartitionedMultiplier,
    seed: Option<u64>,
) -> GemmResult<(Duration, Option<f64>)> {
    let master = distribute_seed(ctx, SeedPolicy::from_seed(seed))?;
    let mut rng = StdRng::seed_from_u64(shared_seed(ctx, master)?);
    let n = multiplier.n();
    let a = Matrix::random(n, n, &mut rng);
    let b = Matrix::random(n, n, &mut rng);
    ctx.barrier()?;
    let start = Instant::now();
    let product = multiplier.multiply(ctx, &a, &b)?;
    let elapsed = start.elapsed();
    match product {
        Some(product) if ctx.is_coordinator() => {
            let err = product.max_relative_error(&a.multiply(&b)?);
            if err > VERIFY_TOLERANCE {
                return Err(GemmError::VerificationFailed {
                    max_relative_error: err,
                });
            }
            Ok((elapsed, Some(err)))
        }
        _ => Ok((elapsed, None)),
    }
}

fn run_worker(
    ctx: &WorkerContext,
    multiplier: &PartitionedMultiplier,
    config: &SweepConfig,
) -> GemmResult<WorkerOutcome> {
    let (elapsed, max_relative_error) = if config.verify {
        verified_trial(ctx, multiplier, config.seed)?
    } else {
        ctx.barrier()?;
        let start = Instant::now();
        multiplier.run_trial(ctx, SeedPolicy::from_seed(config.seed))?;
        (start.elapsed(), None)
    };
    Ok(WorkerOutcome {
        elapsed,
        mb_sent: ctx.mb_sent(),
        max_relative_error,
    })
}

/// Run a single `(n, P)` trial in a freshly launched world, returning the coordinator's measurements
#[tracing::instrument(skip_all)]
pub fn run_trial(
    config: &SweepConfig,
    n: usize,
    num_workers: usize,
) -> GemmResult<(Duration, f64, Option<f64>)> {
    RowAssignment::new(n, num_workers)?;
    let multiplier = PartitionedMultiplier::new(n, config.strategy)?;
    let outcomes = WorldBuilder::new()
        .with_backend(config.backend)
        .with_num_workers(num_workers)
        .try_launch(|ctx| run_worker(ctx, &multiplier, config))?;
    let mb_sent = outcomes.iter().map(|o| o.mb_sent).sum();
    let coordinator = outcomes.first().ok_or(DimensionError::ZeroWorkers)?;
    Ok((coordinator.elapsed, mb_sent, coordinator.max_relative_error))
}

/// Sweep every configured size over every configured worker count.
///
/// Worker counts above `max_workers` are skipped. A failed trial is logged and the sweep moves on;
/// only the successful trials are reported.
#[tracing::instrument(skip_all)]
pub fn run_sweep(config: &SweepConfig) -> Vec<TrialReport> {
    let mut baseline = SpeedupBaseline::new();
    let mut reports = Vec::new();
    for &n in &config.sizes {
        for &num_workers in &config.worker_counts {
            if num_workers > config.max_workers {
                debug!(
                    "skipping num_procs={} for n={}: only {} workers available",
                    num_workers, n, config.max_workers
                );
                continue;
            }
            debug!(
                "trial n={} num_procs={} strategy={}",
                n, num_workers, config.strategy
            );
            match run_trial(config, n, num_workers) {
                Ok((runtime, mb_sent, max_relative_error)) => {
                    let speedup = baseline.record(n, num_workers, runtime);
                    reports.push(TrialReport {
                        n,
                        num_workers,
                        strategy: config.strategy,
                        runtime,
                        speedup,
                        mb_sent,
                        max_relative_error,
                    });
                }
                Err(err) => {
                    warn!("trial n={} num_procs={} failed: {}", n, num_workers, err);
                }
            }
        }
    }
    reports
}
