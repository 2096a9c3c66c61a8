use crate::config;
use crate::error::{DimensionError, GemmResult, TransportError};
use crate::lamellae::local_lamellae::Local;
use crate::lamellae::{create_lamellae, Backend, Lamellae, LamellaeComm};

use tracing::*;

/// The explicit handle a worker passes to every distributed operation.
///
/// Holds the worker's id, the number of workers, and the worker's lamellae endpoint. A context is
/// owned by exactly one worker; dropping it disconnects the worker from its peers.
#[derive(Debug)]
pub struct WorkerContext {
    my_pe: usize,
    num_pes: usize,
    pub(crate) lamellae: Lamellae,
}

impl WorkerContext {
    pub(crate) fn new(lamellae: Lamellae) -> WorkerContext {
        WorkerContext {
            my_pe: lamellae.my_pe(),
            num_pes: lamellae.num_pes(),
            lamellae,
        }
    }

    /// A standalone single worker context using the [Local][Backend::Local] backend
    pub fn local() -> WorkerContext {
        WorkerContext::new(Local::new().into())
    }

    /// The id of this worker, in `0..num_workers()`
    pub fn worker_id(&self) -> usize {
        self.my_pe
    }

    pub fn num_workers(&self) -> usize {
        self.num_pes
    }

    /// Worker 0 coordinates gathers, reductions, and pairwise exchanges
    pub fn is_coordinator(&self) -> bool {
        self.my_pe == 0
    }

    pub fn backend(&self) -> Backend {
        self.lamellae.backend()
    }

    /// Megabytes of serialized payload this worker has sent so far
    pub fn mb_sent(&self) -> f64 {
        self.lamellae.MB_sent()
    }
}

/// An implementation of the Builder design pattern, used to launch a set of workers.
///
/// Every worker runs the same closure with its own [WorkerContext]; the closures are expected to
/// call the same sequence of collective operations.
///
/// # Examples
///
///```
/// use lamellar_gemm::{Backend, WorldBuilder};
///
/// let ids = WorldBuilder::new()
///     .with_backend(Backend::Threads)
///     .with_num_workers(4)
///     .launch(|ctx| ctx.worker_id())
///     .unwrap();
/// assert_eq!(ids, vec![0, 1, 2, 3]);
///```
#[derive(Debug, Clone)]
pub struct WorldBuilder {
    backend: Backend,
    num_workers: usize,
}

impl Default for WorldBuilder {
    fn default() -> Self {
        WorldBuilder::new()
    }
}

impl WorldBuilder {
    /// Construct a new builder using the backend and worker count from the environment
    #[tracing::instrument(skip_all)]
    pub fn new() -> WorldBuilder {
        let backend = Backend::default();
        let num_workers = match backend {
            Backend::Local => 1,
            Backend::Threads => config().num_workers,
        };
        WorldBuilder {
            backend,
            num_workers,
        }
    }

    /// Specify the lamellae backend to use
    pub fn with_backend(mut self, backend: Backend) -> WorldBuilder {
        self.backend = backend;
        self
    }

    /// Specify how many workers to launch
    pub fn with_num_workers(mut self, num_workers: usize) -> WorldBuilder {
        self.num_workers = num_workers;
        self
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Run `f` once per worker, each on its own thread, and return the results in worker id order.
    ///
    /// Fails with [DimensionError::ZeroWorkers] before spawning anything when no workers were requested,
    /// and with a transport failure if the backend cannot host the worker count or any worker panics.
    #[tracing::instrument(skip_all)]
    pub fn launch<F, R>(self, f: F) -> GemmResult<Vec<R>>
    where
        F: Fn(&WorkerContext) -> R + Sync,
        R: Send,
    {
        if self.num_workers == 0 {
            return Err(DimensionError::ZeroWorkers.into());
        }
        let lamellae = create_lamellae(self.backend, self.num_workers)?;
        debug!(
            "launching {} workers on the {:?} backend",
            self.num_workers, self.backend
        );
        let f = &f;
        let joined = crossbeam::scope(|s| {
            let handles = lamellae
                .into_iter()
                .enumerate()
                .map(|(pe, lamellae)| {
                    s.builder()
                        .name(format!("gemm_worker_{}", pe))
                        .spawn(move |_| {
                            let ctx = WorkerContext::new(lamellae);
                            trace_span!("worker", pe).in_scope(|| f(&ctx))
                        })
                        .map_err(|e| TransportError::Spawn(e.to_string()))
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .enumerate()
                .map(|(pe, handle)| {
                    handle?
                        .join()
                        .map_err(|_| TransportError::WorkerPanicked { pe })
                })
                .collect::<Vec<_>>()
        })
        .map_err(|_| TransportError::Spawn("worker scope panicked".to_owned()))?;
        let mut results = Vec::with_capacity(joined.len());
        for res in joined {
            results.push(res?);
        }
        Ok(results)
    }

    /// Like [launch][WorldBuilder::launch] for fallible worker closures; returns the first error in worker id order
    pub fn try_launch<F, R>(self, f: F) -> GemmResult<Vec<R>>
    where
        F: Fn(&WorkerContext) -> GemmResult<R> + Sync,
        R: Send,
    {
        self.launch(f)?.into_iter().collect()
    }
}
