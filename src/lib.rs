//! Lamellar GEMM is a row-partitioned distributed dense matrix multiplication built on a small
//! Lamellar style communication layer.
//!
//! A computation runs on `P` workers, each holding a [WorkerContext]. Rows of the `n x n` output are
//! split into contiguous blocks ([compute_row_split]); every worker multiplies its share locally and
//! the partial products are recombined with one of three strategies:
//! - [Strategy::GatherConcat]: column blocks are gathered at worker 0 and concatenated.
//! - [Strategy::AllReduceSum]: zero padded row blocks are summed onto every worker.
//! - [Strategy::PairwiseExchange]: worker 0 sends rows and columns to the others and collects one scalar per entry.
//!
//! Data moves between workers through a lamellae backend ([Backend]): "local" for a single worker and
//! "threads" for a set of workers running as threads of the current process.
//!
//! EXAMPLES
//! --------
//!
//! # Multiplying two matrices on four workers
//! ```
//! use lamellar_gemm::{Backend, Matrix, PartitionedMultiplier, Strategy, WorldBuilder};
//!
//! fn main(){
//!     let a = Matrix::from_fn(6, 6, |i, j| (i + j) as f64);
//!     let b = Matrix::from_fn(6, 6, |i, j| (i * j) as f64);
//!     let multiplier = PartitionedMultiplier::new(6, Strategy::AllReduceSum).unwrap();
//!     let results = WorldBuilder::new()
//!         .with_backend(Backend::Threads)
//!         .with_num_workers(4)
//!         .try_launch(|ctx| multiplier.multiply(ctx, &a, &b))
//!         .unwrap();
//!     let c = results[0].as_ref().unwrap(); // all-reduce leaves the product on every worker
//!     assert!(c.approx_eq(&a.multiply(&b).unwrap(), 1e-9));
//! }
//! ```
//!
//! # Running the benchmark sweep described by the environment
//! ```
//! use lamellar_gemm::{config, run_sweep, SweepConfig};
//!
//! fn main(){
//!     let sweep = SweepConfig::from_config(config()).unwrap(); // LAMELLAR_GEMM_SIZES, LAMELLAR_GEMM_STRATEGY, ...
//!     for report in run_sweep(&sweep) {
//!         println!("{}", report);
//!     }
//! }
//! ```

#[macro_use]
extern crate lazy_static;

use bincode::Options;

mod benchmark;
mod collectives;
mod distribution;
mod env_var;
mod error;
mod lamellae;
mod lamellar_world;
mod matrix;
mod multiplier;

pub use crate::benchmark::{
    run_sweep, run_trial, SpeedupBaseline, SweepConfig, TrialReport, VERIFY_TOLERANCE,
};
pub use crate::collectives::Transport;
pub use crate::distribution::{compute_row_split, RowAssignment, RowSplit};
pub use crate::env_var::{config, Config};
pub use crate::error::{
    DimensionError, GemmError, GemmResult, TransportError, TransportResult,
};
pub use crate::lamellae::{Backend, Msg};
pub use crate::lamellar_world::{WorkerContext, WorldBuilder};
pub use crate::matrix::Matrix;
pub use crate::multiplier::{
    derive_seed, distribute_seed, generate_local_operands, local_multiply, pairwise_exchange,
    shared_seed, worker_rng, LocalOperands, PairwiseAccumulation, PartitionedMultiplier, SeedPolicy,
    Strategy,
};

lazy_static! {
    pub(crate) static ref BINCODE: bincode::config::WithOtherTrailing<bincode::DefaultOptions, bincode::config::AllowTrailing> =
        bincode::DefaultOptions::new().allow_trailing_bytes();
}
