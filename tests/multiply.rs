use lamellar_gemm::{
    compute_row_split, generate_local_operands, local_multiply, worker_rng, Backend,
    DimensionError, GemmError, Matrix, PairwiseAccumulation, PartitionedMultiplier, SeedPolicy,
    Strategy, Transport, WorldBuilder,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

const TOLERANCE: f64 = 1e-9;

fn operands(n: usize, seed: u64) -> (Matrix, Matrix) {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = Matrix::random(n, n, &mut rng);
    let b = Matrix::random(n, n, &mut rng);
    (a, b)
}

fn world(num_workers: usize) -> WorldBuilder {
    WorldBuilder::new()
        .with_backend(Backend::Threads)
        .with_num_workers(num_workers)
}

fn distributed(
    multiplier: &PartitionedMultiplier,
    num_workers: usize,
    a: &Matrix,
    b: &Matrix,
) -> Vec<Option<Matrix>> {
    world(num_workers)
        .try_launch(|ctx| multiplier.multiply(ctx, a, b))
        .unwrap()
}

macro_rules! create_test {
    ( $name:ident, $strategy:expr, $n:expr, $num_pes:expr) => {
        paste::paste! {
            #[test]
            #[allow(non_snake_case)]
            fn [<$name _ $n _ $num_pes _ round_trip>](){
                let strategy: Strategy = $strategy;
                let (a, b) = operands($n, ($n * 31 + $num_pes) as u64);
                let expected = a.multiply(&b).unwrap();
                let multiplier = PartitionedMultiplier::new($n, strategy).unwrap();
                let results = distributed(&multiplier, $num_pes, &a, &b);
                assert_eq!(results.len(), $num_pes);
                let c = results[0].as_ref().expect("coordinator holds the product");
                assert_eq!(c.shape(), ($n, $n));
                assert!(c.approx_eq(&expected, TOLERANCE), "max relative error {}", c.max_relative_error(&expected));
                for (pe, res) in results.iter().enumerate().skip(1) {
                    match strategy {
                        Strategy::AllReduceSum => assert_eq!(res.as_ref(), Some(c), "worker {}", pe),
                        _ => assert!(res.is_none(), "worker {}", pe),
                    }
                }
            }
        }
    };
}

macro_rules! iter_sizes {
    ( $name:ident, $strategy:expr, ($(($n:expr, $num_pes:expr)),*)) => {
        $(
            create_test!($name, $strategy, $n, $num_pes);
        )*
    };
}

macro_rules! iter_strategies {
    ( ($(($name:ident, $strategy:expr)),*), $sizes:tt) => {
        $(
            iter_sizes!($name, $strategy, $sizes);
        )*
    };
}

iter_strategies!(
    (
        (gather, Strategy::GatherConcat),
        (allreduce, Strategy::AllReduceSum),
        (pairwise, Strategy::PairwiseExchange(PairwiseAccumulation::ReceivedScalar)),
        (pairwise_sum, Strategy::PairwiseExchange(PairwiseAccumulation::ExplicitSum))
    ),
    ((4, 2), (7, 3), (1, 1), (8, 4), (10, 3), (3, 5), (16, 1))
);

#[test]
fn single_worker_gather_equals_direct_multiply() {
    let (a, b) = operands(9, 1);
    let multiplier = PartitionedMultiplier::new(9, Strategy::GatherConcat).unwrap();
    let results = world(1)
        .with_backend(Backend::Local)
        .try_launch(|ctx| multiplier.multiply(ctx, &a, &b))
        .unwrap();
    assert_eq!(results[0].as_ref(), Some(&a.multiply(&b).unwrap()));
}

#[test]
fn all_reduce_is_invariant_under_row_permutation() {
    let (a, b) = operands(10, 2);
    let expected = a.multiply(&b).unwrap();
    for order in [vec![0, 1, 2, 3], vec![3, 2, 1, 0], vec![1, 3, 0, 2]] {
        let multiplier = PartitionedMultiplier::new(10, Strategy::AllReduceSum)
            .unwrap()
            .with_slot_order(order.clone());
        for c in distributed(&multiplier, 4, &a, &b) {
            assert!(c.unwrap().approx_eq(&expected, TOLERANCE), "{:?}", order);
        }
    }
}

#[test]
fn gather_assembles_blocks_in_row_split_order() {
    let (a, b) = operands(7, 3);
    let multiplier = PartitionedMultiplier::new(7, Strategy::GatherConcat)
        .unwrap()
        .with_slot_order(vec![2, 0, 1]);
    let results = distributed(&multiplier, 3, &a, &b);
    assert!(results[0]
        .as_ref()
        .unwrap()
        .approx_eq(&a.multiply(&b).unwrap(), TOLERANCE));
}

#[test]
fn legacy_pairwise_double_counts_remote_entries() {
    let (a, b) = operands(5, 4);
    let expected = a.multiply(&b).unwrap();
    let multiplier =
        PartitionedMultiplier::new(5, Strategy::PairwiseExchange(PairwiseAccumulation::Legacy))
            .unwrap();
    let c = distributed(&multiplier, 3, &a, &b).remove(0).unwrap();
    let doubled = Matrix::from_fn(5, 5, |i, j| 2.0 * expected.get(i, j));
    assert!(c.approx_eq(&doubled, TOLERANCE));
}

#[test]
fn invalid_dimensions_are_rejected() {
    assert_eq!(
        compute_row_split(4, 0, 0),
        Err(GemmError::InvalidDimension(DimensionError::ZeroWorkers))
    );
    assert_eq!(
        compute_row_split(4, 2, 2),
        Err(GemmError::InvalidDimension(DimensionError::WorkerOutOfRange {
            worker: 2,
            num_workers: 2
        }))
    );
    assert_eq!(
        local_multiply(&Matrix::zeros(2, 3), &Matrix::zeros(2, 3)),
        Err(GemmError::InvalidDimension(DimensionError::InnerMismatch {
            lhs: (2, 3),
            rhs: (2, 3)
        }))
    );
}

#[test]
fn mismatched_operands_fail_before_communicating() {
    let multiplier = PartitionedMultiplier::new(4, Strategy::AllReduceSum).unwrap();
    let a = Matrix::zeros(4, 4);
    let b = Matrix::zeros(3, 4);
    let results = world(3)
        .launch(|ctx| {
            let res = multiplier.multiply(ctx, &a, &b);
            (res, ctx.mb_sent())
        })
        .unwrap();
    for (res, mb_sent) in results {
        assert!(matches!(
            res,
            Err(GemmError::InvalidDimension(DimensionError::ShapeMismatch { .. }))
        ));
        assert_eq!(mb_sent, 0.0);
    }
}

#[test]
fn four_by_two_scenario_shapes() {
    let n = 4;
    let results = world(2)
        .try_launch(|ctx| {
            let multiplier = PartitionedMultiplier::new(n, Strategy::GatherConcat)?;
            let split = multiplier.row_split(ctx)?;
            let mut rng = StdRng::seed_from_u64(ctx.worker_id() as u64);
            let ops = generate_local_operands(n, split.local_rows, &mut rng)?;
            let local = local_multiply(&ops.a, &ops.b)?;
            let shapes = (split.range(), ops.a.shape(), ops.b.shape(), local.shape());
            let gathered = multiplier.recombine(ctx, local)?;
            Ok((shapes, gathered.map(|c| c.shape())))
        })
        .unwrap();
    assert_eq!(results[0].0, (0..2, (2, 4), (4, 2), (2, 2)));
    assert_eq!(results[1].0, (2..4, (2, 4), (4, 2), (2, 2)));
    assert_eq!(results[0].1, Some((2, 4)));
    assert_eq!(results[1].1, None);
}

#[test]
fn benchmark_trials_produce_full_products() {
    for strategy in [
        Strategy::AllReduceSum,
        Strategy::PairwiseExchange(PairwiseAccumulation::ReceivedScalar),
    ] {
        let multiplier = PartitionedMultiplier::new(6, strategy).unwrap();
        let results = world(3)
            .try_launch(|ctx| multiplier.run_trial(ctx, SeedPolicy::Shared(11)))
            .unwrap();
        assert_eq!(results[0].as_ref().map(|c| c.shape()), Some((6, 6)));
    }
}

#[test]
fn shared_seed_trials_are_reproducible() {
    let multiplier = PartitionedMultiplier::new(6, Strategy::AllReduceSum).unwrap();
    let run = || {
        world(2)
            .try_launch(|ctx| multiplier.run_trial(ctx, SeedPolicy::Shared(5)))
            .unwrap()
            .remove(0)
    };
    assert_eq!(run(), run());
}

#[test]
fn only_the_coordinator_seed_counts() {
    let seeds = world(3)
        .try_launch(|ctx| {
            let mine = SeedPolicy::Shared(100 + ctx.worker_id() as u64);
            lamellar_gemm::distribute_seed(ctx, mine)
        })
        .unwrap();
    assert_eq!(seeds, vec![Some(100); 3]);
    let a = Matrix::random(2, 2, &mut worker_rng(0, Some(100)));
    let b = Matrix::random(2, 2, &mut worker_rng(1, Some(100)));
    assert_ne!(a, b);
}

#[test]
fn collectives_compose_with_the_multiplier() {
    let (a, b) = operands(6, 8);
    let multiplier = PartitionedMultiplier::new(6, Strategy::GatherConcat).unwrap();
    let results = world(3)
        .try_launch(|ctx| {
            let c = multiplier.multiply(ctx, &a, &b)?;
            let c = ctx.broadcast(c, 0)?;
            ctx.barrier()?;
            Ok(c)
        })
        .unwrap();
    let expected = a.multiply(&b).unwrap();
    for c in results {
        assert!(c.approx_eq(&expected, TOLERANCE));
    }
}
