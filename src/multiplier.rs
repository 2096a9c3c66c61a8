use crate::collectives::Transport;
use crate::distribution::{compute_row_split, RowAssignment, RowSplit};
use crate::error::{DimensionError, GemmError, GemmResult};
use crate::lamellar_world::WorkerContext;
use crate::matrix::{dot, Matrix};

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::*;

const COORDINATOR: usize = 0;

/// How the coordinator fills an output entry during a pairwise exchange
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairwiseAccumulation {
    /// the entry is the dot product computed and sent back by the owning worker
    ReceivedScalar,
    /// the coordinator recomputes the dot product itself; the received scalar is discarded
    ExplicitSum,
    /// received scalar plus the coordinator's own sum, reproducing the double counted legacy output
    Legacy,
}

/// The policy used to combine per-worker partial products into the global product
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// workers compute column blocks of C, the coordinator gathers and concatenates them
    GatherConcat,
    /// workers compute zero padded row blocks of C, an all-reduce sums them onto every worker
    AllReduceSum,
    /// the coordinator ships rows and columns to the other workers and collects scalar dot products
    PairwiseExchange(PairwiseAccumulation),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::GatherConcat => "gather",
            Strategy::AllReduceSum => "allreduce",
            Strategy::PairwiseExchange(PairwiseAccumulation::ReceivedScalar) => "pairwise",
            Strategy::PairwiseExchange(PairwiseAccumulation::ExplicitSum) => "pairwise-sum",
            Strategy::PairwiseExchange(PairwiseAccumulation::Legacy) => "pairwise-legacy",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Strategy {
    type Err = GemmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gather" => Ok(Strategy::GatherConcat),
            "allreduce" | "all-reduce" => Ok(Strategy::AllReduceSum),
            "pairwise" => Ok(Strategy::PairwiseExchange(
                PairwiseAccumulation::ReceivedScalar,
            )),
            "pairwise-sum" => Ok(Strategy::PairwiseExchange(PairwiseAccumulation::ExplicitSum)),
            "pairwise-legacy" => Ok(Strategy::PairwiseExchange(PairwiseAccumulation::Legacy)),
            other => Err(GemmError::StrategyMisconfiguration(format!(
                "unknown recombination strategy '{}', expected one of gather, allreduce, pairwise, pairwise-sum, pairwise-legacy",
                other
            ))),
        }
    }
}

/// Where each worker's random operands come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedPolicy {
    /// every worker seeds itself from OS entropy; runs are not reproducible
    Independent,
    /// the coordinator's master seed is broadcast and each worker derives its own seed from it
    Shared(u64),
}

impl SeedPolicy {
    pub fn from_seed(seed: Option<u64>) -> SeedPolicy {
        match seed {
            Some(master) => SeedPolicy::Shared(master),
            None => SeedPolicy::Independent,
        }
    }
}

/// Deterministic per-worker seed (a splitmix64 step keyed on the worker id)
pub fn derive_seed(master: u64, worker: usize) -> u64 {
    let mut z = master.wrapping_add((worker as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// The operand slices a worker multiplies locally
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOperands {
    /// `local_rows x n`
    pub a: Matrix,
    /// `n x local_rows`
    pub b: Matrix,
}

/// Draw a `local_rows x n` slice of A and an `n x local_rows` slice of B, entries uniform in `[0, 1)`
pub fn generate_local_operands<R: Rng + ?Sized>(
    n: usize,
    local_rows: usize,
    rng: &mut R,
) -> GemmResult<LocalOperands> {
    if n == 0 {
        return Err(DimensionError::ZeroSize.into());
    }
    let a = Matrix::random(local_rows, n, rng);
    let b = Matrix::random(n, local_rows, rng);
    Ok(LocalOperands { a, b })
}

/// `(m x k) * (k x p) -> (m x p)` via the dense multiply kernel
pub fn local_multiply(a: &Matrix, b: &Matrix) -> GemmResult<Matrix> {
    a.multiply(b)
}

fn check_square(n: usize, m: &Matrix) -> GemmResult<()> {
    if m.shape() != (n, n) {
        return Err(DimensionError::ShapeMismatch {
            expected: (n, n),
            found: m.shape(),
        }
        .into());
    }
    Ok(())
}

/// Computes `C = A * B` for `n x n` operands across the workers of a [WorkerContext].
///
/// Every worker constructs an identical multiplier and calls the same methods in the same order;
/// the product ends up on the coordinator (worker 0) for gather and pairwise recombination, and on
/// every worker for all-reduce recombination. Workers that do not hold the result get `Ok(None)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedMultiplier {
    n: usize,
    strategy: Strategy,
    slot_order: Option<Vec<usize>>,
}

impl PartitionedMultiplier {
    pub fn new(n: usize, strategy: Strategy) -> GemmResult<PartitionedMultiplier> {
        if n == 0 {
            return Err(DimensionError::ZeroSize.into());
        }
        Ok(PartitionedMultiplier {
            n,
            strategy,
            slot_order: None,
        })
    }

    /// Reassign row ranges: worker `w` takes the range normally owned by worker `order[w]`.
    ///
    /// Applies to gather and all-reduce recombination; the result does not depend on the order.
    pub fn with_slot_order(mut self, order: Vec<usize>) -> PartitionedMultiplier {
        self.slot_order = Some(order);
        self
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn slot(&self, worker: usize, num_workers: usize) -> GemmResult<usize> {
        match &self.slot_order {
            None => Ok(worker),
            Some(order) => {
                let is_permutation = order.len() == num_workers
                    && order.iter().sorted().copied().eq(0..num_workers);
                if !is_permutation {
                    return Err(DimensionError::InvalidSlotOrder(order.clone()).into());
                }
                Ok(order[worker])
            }
        }
    }

    /// The rows (and, for the gather strategy, columns) owned by this worker
    pub fn row_split(&self, ctx: &WorkerContext) -> GemmResult<RowSplit> {
        let slot = self.slot(ctx.worker_id(), ctx.num_workers())?;
        compute_row_split(self.n, ctx.num_workers(), slot)
    }

    /// Combine this worker's local product with everyone else's.
    ///
    /// * gather: `local` is a column block of C; blocks are concatenated in row-split order at the coordinator
    /// * all-reduce: `local` must be `n x n`; the elementwise sum is returned on every worker
    #[tracing::instrument(skip_all)]
    pub fn recombine(&self, ctx: &WorkerContext, local: Matrix) -> GemmResult<Option<Matrix>> {
        match self.strategy {
            Strategy::GatherConcat => {
                // validate the slot order on every worker before anyone communicates
                self.slot(ctx.worker_id(), ctx.num_workers())?;
                let blocks = ctx.gather(&local, COORDINATOR)?;
                match blocks {
                    Some(blocks) => {
                        let mut ordered = Vec::with_capacity(blocks.len());
                        for (worker, block) in blocks.into_iter().enumerate() {
                            ordered.push((self.slot(worker, ctx.num_workers())?, block));
                        }
                        ordered.sort_by_key(|(slot, _)| *slot);
                        let product = Matrix::concat_cols(ordered.iter().map(|(_, block)| block))?;
                        debug!("gathered {:?} product", product.shape());
                        Ok(Some(product))
                    }
                    None => Ok(None),
                }
            }
            Strategy::AllReduceSum => {
                check_square(self.n, &local)?;
                Ok(Some(ctx.all_reduce_sum(local)?))
            }
            Strategy::PairwiseExchange(_) => Err(GemmError::StrategyMisconfiguration(
                "pairwise exchange multiplies the operands entry by entry and has no local products to recombine"
                    .to_owned(),
            )),
        }
    }

    /// Multiply two `n x n` matrices that every worker holds a copy of.
    ///
    /// Each worker only touches its own share: a column block of `b` (gather), a row block of
    /// `a` (all-reduce), or nothing at all outside the coordinator (pairwise).
    #[tracing::instrument(skip_all)]
    pub fn multiply(
        &self,
        ctx: &WorkerContext,
        a: &Matrix,
        b: &Matrix,
    ) -> GemmResult<Option<Matrix>> {
        check_square(self.n, a)?;
        check_square(self.n, b)?;
        match self.strategy {
            Strategy::GatherConcat => {
                let split = self.row_split(ctx)?;
                let b_cols = b.col_slice(split.range())?;
                let local = local_multiply(a, &b_cols)?;
                self.recombine(ctx, local)
            }
            Strategy::AllReduceSum => {
                let split = self.row_split(ctx)?;
                let a_rows = a.row_slice(split.range())?;
                let partial = local_multiply(&a_rows, b)?;
                let local = Matrix::embed_rows(self.n, split.row_offset, &partial)?;
                self.recombine(ctx, local)
            }
            Strategy::PairwiseExchange(accumulation) => {
                pairwise_exchange(ctx, self.n, Some((a, b)), accumulation)
            }
        }
    }

    /// One benchmark trial on freshly drawn random operands.
    ///
    /// * gather: [generate_local_operands] slices, `(r x n) * (n x r)` local products, requires `n % P == 0`
    /// * all-reduce: a random `r x n` row slice of A times a full `n x n` B, zero padded to `n x n`;
    ///   B is drawn from a [shared_seed] so every worker multiplies by the same matrix
    /// * pairwise: the coordinator draws full `n x n` operands
    #[tracing::instrument(skip_all)]
    pub fn run_trial(
        &self,
        ctx: &WorkerContext,
        seeds: SeedPolicy,
    ) -> GemmResult<Option<Matrix>> {
        let n = self.n;
        let split = self.row_split(ctx)?;
        if self.strategy == Strategy::GatherConcat {
            let assignment = RowAssignment::new(n, ctx.num_workers())?;
            if !assignment.is_even() {
                return Err(DimensionError::UnevenSplit {
                    n,
                    num_workers: ctx.num_workers(),
                }
                .into());
            }
        }
        let master = distribute_seed(ctx, seeds)?;
        let mut rng = worker_rng(ctx.worker_id(), master);
        debug!(
            "[{:?}] trial n={} strategy={} rows={:?}",
            ctx.worker_id(),
            n,
            self.strategy,
            split.range()
        );
        match self.strategy {
            Strategy::GatherConcat => {
                let operands = generate_local_operands(n, split.local_rows, &mut rng)?;
                let local = local_multiply(&operands.a, &operands.b)?;
                self.recombine(ctx, local)
            }
            Strategy::AllReduceSum => {
                let a_rows = Matrix::random(split.local_rows, n, &mut rng);
                let b_seed = shared_seed(ctx, master)?;
                let b = Matrix::random(n, n, &mut StdRng::seed_from_u64(b_seed));
                let partial = local_multiply(&a_rows, &b)?;
                let local = Matrix::embed_rows(n, split.row_offset, &partial)?;
                self.recombine(ctx, local)
            }
            Strategy::PairwiseExchange(accumulation) => {
                if ctx.is_coordinator() {
                    let a = Matrix::random(n, n, &mut rng);
                    let b = Matrix::random(n, n, &mut rng);
                    pairwise_exchange(ctx, n, Some((&a, &b)), accumulation)
                } else {
                    pairwise_exchange(ctx, n, None, accumulation)
                }
            }
        }
    }
}

/// Agree on a master seed: under [SeedPolicy::Shared] the coordinator's seed is broadcast, so only
/// its configuration matters. [SeedPolicy::Independent] needs no communication.
pub fn distribute_seed(ctx: &WorkerContext, seeds: SeedPolicy) -> GemmResult<Option<u64>> {
    match seeds {
        SeedPolicy::Independent => Ok(None),
        SeedPolicy::Shared(master) => {
            let value = if ctx.is_coordinator() {
                Some(master)
            } else {
                None
            };
            Ok(Some(ctx.broadcast(value, COORDINATOR)?))
        }
    }
}

/// A seed every worker holds the same copy of: the distributed `master` when there is one,
/// otherwise a seed drawn by the coordinator and broadcast.
pub fn shared_seed(ctx: &WorkerContext, master: Option<u64>) -> GemmResult<u64> {
    match master {
        Some(master) => Ok(master),
        None => {
            let drawn = if ctx.is_coordinator() {
                Some(rand::thread_rng().gen::<u64>())
            } else {
                None
            };
            Ok(ctx.broadcast(drawn, COORDINATOR)?)
        }
    }
}

/// The random number generator a worker draws its operands from
pub fn worker_rng(worker: usize, master: Option<u64>) -> StdRng {
    match master {
        Some(master) => StdRng::seed_from_u64(derive_seed(master, worker)),
        None => StdRng::from_entropy(),
    }
}

/// Point-to-point reference multiply.
///
/// Rows of C are split across workers `1..P` (the coordinator only coordinates). For each owned row
/// the coordinator sends the row of A, then every column of B one at a time, and after each column
/// receives the dot product back from the worker. With a single worker the coordinator computes
/// every entry itself. Only the coordinator needs `operands`; it returns `Some(C)`, everyone else `None`.
#[tracing::instrument(skip_all)]
pub fn pairwise_exchange(
    ctx: &WorkerContext,
    n: usize,
    operands: Option<(&Matrix, &Matrix)>,
    accumulation: PairwiseAccumulation,
) -> GemmResult<Option<Matrix>> {
    if n == 0 {
        return Err(DimensionError::ZeroSize.into());
    }
    let num_remote = ctx.num_workers() - 1;
    if !ctx.is_coordinator() {
        let split = compute_row_split(n, num_remote, ctx.worker_id() - 1)?;
        for _row in split.range() {
            let a_row: Vec<f64> = ctx.recv(COORDINATOR)?;
            if a_row.len() != n {
                return Err(DimensionError::ShapeMismatch {
                    expected: (1, n),
                    found: (1, a_row.len()),
                }
                .into());
            }
            for _col in 0..n {
                let b_col: Vec<f64> = ctx.recv(COORDINATOR)?;
                ctx.send(&dot(&a_row, &b_col), COORDINATOR)?;
            }
        }
        return Ok(None);
    }

    let (a, b) = operands.ok_or_else(|| {
        GemmError::StrategyMisconfiguration(
            "the coordinator must supply both operands for a pairwise exchange".to_owned(),
        )
    })?;
    check_square(n, a)?;
    check_square(n, b)?;
    let columns = (0..n).map(|col| b.column(col)).collect::<Vec<_>>();
    let mut c = Matrix::zeros(n, n);
    if num_remote == 0 {
        for row in 0..n {
            for (col, b_col) in columns.iter().enumerate() {
                c.set(row, col, dot(a.row(row), b_col));
            }
        }
        return Ok(Some(c));
    }
    for worker in 1..ctx.num_workers() {
        let split = compute_row_split(n, num_remote, worker - 1)?;
        trace!("pairwise rows {:?} -> worker {:?}", split.range(), worker);
        for row in split.range() {
            ctx.send(a.row(row), worker)?;
            for (col, b_col) in columns.iter().enumerate() {
                ctx.send(b_col, worker)?;
                let received: f64 = ctx.recv(worker)?;
                let entry = match accumulation {
                    PairwiseAccumulation::ReceivedScalar => received,
                    PairwiseAccumulation::ExplicitSum => dot(a.row(row), b_col),
                    PairwiseAccumulation::Legacy => received + dot(a.row(row), b_col),
                };
                c.set(row, col, entry);
            }
        }
    }
    Ok(Some(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_parse_and_print() {
        for name in [
            "gather",
            "allreduce",
            "pairwise",
            "pairwise-sum",
            "pairwise-legacy",
        ] {
            let strategy: Strategy = name.parse().unwrap();
            assert_eq!(strategy.to_string(), name);
        }
        assert_eq!(
            "All-Reduce".parse::<Strategy>().unwrap(),
            Strategy::AllReduceSum
        );
    }

    #[test]
    fn unknown_strategy_is_misconfiguration() {
        match "scatter".parse::<Strategy>() {
            Err(GemmError::StrategyMisconfiguration(msg)) => assert!(msg.contains("scatter")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn local_operands_have_slice_shapes() {
        let mut rng = StdRng::seed_from_u64(3);
        let ops = generate_local_operands(4, 2, &mut rng).unwrap();
        assert_eq!(ops.a.shape(), (2, 4));
        assert_eq!(ops.b.shape(), (4, 2));
        assert_eq!(local_multiply(&ops.a, &ops.b).unwrap().shape(), (2, 2));
        assert!(generate_local_operands(0, 0, &mut rng).is_err());
    }

    #[test]
    fn derived_seeds_differ_per_worker() {
        let seeds = (0..16).map(|w| derive_seed(42, w)).collect::<Vec<_>>();
        assert_eq!(seeds.iter().unique().count(), 16);
        assert_eq!(derive_seed(42, 3), derive_seed(42, 3));
        assert_ne!(derive_seed(42, 3), derive_seed(43, 3));
    }

    #[test]
    fn shared_seed_rngs_reproduce() {
        let a = Matrix::random(3, 3, &mut worker_rng(1, Some(9)));
        let b = Matrix::random(3, 3, &mut worker_rng(1, Some(9)));
        assert_eq!(a, b);
    }

    #[test]
    fn shared_seed_is_agreed_without_a_master() {
        use crate::lamellae::Backend;
        use crate::lamellar_world::WorldBuilder;

        let seeds = WorldBuilder::new()
            .with_backend(Backend::Threads)
            .with_num_workers(4)
            .try_launch(|ctx| {
                let master = distribute_seed(ctx, SeedPolicy::Independent)?;
                shared_seed(ctx, master)
            })
            .unwrap();
        assert!(seeds.iter().all_equal());
        let bs = seeds
            .iter()
            .map(|&seed| Matrix::random(4, 4, &mut StdRng::seed_from_u64(seed)))
            .collect::<Vec<_>>();
        assert!(bs.iter().all_equal());

        let ctx = WorkerContext::local();
        assert_eq!(shared_seed(&ctx, Some(17)), Ok(17));
    }

    #[test]
    fn zero_size_is_invalid() {
        assert_eq!(
            PartitionedMultiplier::new(0, Strategy::GatherConcat),
            Err(GemmError::InvalidDimension(DimensionError::ZeroSize))
        );
    }

    #[test]
    fn all_reduce_requires_full_size_partials() {
        let ctx = WorkerContext::local();
        let multiplier = PartitionedMultiplier::new(3, Strategy::AllReduceSum).unwrap();
        assert_eq!(
            multiplier.recombine(&ctx, Matrix::zeros(2, 3)),
            Err(GemmError::InvalidDimension(DimensionError::ShapeMismatch {
                expected: (3, 3),
                found: (2, 3)
            }))
        );
    }

    #[test]
    fn pairwise_has_nothing_to_recombine() {
        let ctx = WorkerContext::local();
        let multiplier = PartitionedMultiplier::new(
            2,
            Strategy::PairwiseExchange(PairwiseAccumulation::ReceivedScalar),
        )
        .unwrap();
        assert!(matches!(
            multiplier.recombine(&ctx, Matrix::zeros(2, 2)),
            Err(GemmError::StrategyMisconfiguration(_))
        ));
    }

    #[test]
    fn multiply_rejects_non_square_operands() {
        let ctx = WorkerContext::local();
        let multiplier = PartitionedMultiplier::new(2, Strategy::GatherConcat).unwrap();
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(3, 2);
        assert!(matches!(
            multiplier.multiply(&ctx, &a, &b),
            Err(GemmError::InvalidDimension(DimensionError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn slot_order_must_be_a_permutation() {
        let ctx = WorkerContext::local();
        let multiplier = PartitionedMultiplier::new(2, Strategy::AllReduceSum)
            .unwrap()
            .with_slot_order(vec![1]);
        assert_eq!(
            multiplier.row_split(&ctx),
            Err(GemmError::InvalidDimension(DimensionError::InvalidSlotOrder(
                vec![1]
            )))
        );
    }

    #[test]
    fn single_worker_pairwise_computes_locally() {
        let ctx = WorkerContext::local();
        let mut rng = StdRng::seed_from_u64(5);
        let a = Matrix::random(3, 3, &mut rng);
        let b = Matrix::random(3, 3, &mut rng);
        let expected = a.multiply(&b).unwrap();
        for acc in [
            PairwiseAccumulation::ReceivedScalar,
            PairwiseAccumulation::ExplicitSum,
            PairwiseAccumulation::Legacy,
        ] {
            let c = pairwise_exchange(&ctx, 3, Some((&a, &b)), acc)
                .unwrap()
                .unwrap();
            assert!(c.approx_eq(&expected, 1e-12));
        }
        assert!(matches!(
            pairwise_exchange(&ctx, 3, None, PairwiseAccumulation::ReceivedScalar),
            Err(GemmError::StrategyMisconfiguration(_))
        ));
    }
}
