//! Blocking collective and point-to-point operations over a worker's lamellae.
//!
//! Every collective is rooted at a single worker and built from point-to-point messages tagged with
//! the [Msg] kind of the operation. All workers must call the same collectives in the same order;
//! a worker that never arrives blocks the others (with a periodic deadlock warning), and a worker that
//! exits early surfaces as [TransportError::Disconnected] on its peers.
use crate::error::{TransportError, TransportResult};
use crate::lamellae::{LamellaeComm, Msg, SerializedData};
use crate::lamellar_world::WorkerContext;
use crate::matrix::Matrix;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// The transport contract the partitioned multiplier is written against
pub trait Transport {
    /// Blocking point-to-point send of `value` to worker `dst`
    fn send<T: Serialize + ?Sized>(&self, value: &T, dst: usize) -> TransportResult<()>;

    /// Blocking point-to-point receive of the next value sent by worker `src`
    fn recv<T: DeserializeOwned>(&self, src: usize) -> TransportResult<T>;

    /// Collect `local` from every worker at `root`.
    ///
    /// Returns `Some` (ordered by worker id) at the root and `None` everywhere else.
    fn gather<T>(&self, local: &T, root: usize) -> TransportResult<Option<Vec<T>>>
    where
        T: Serialize + DeserializeOwned + Clone;

    /// Distribute the root's `value` to every worker; non-root workers pass `None`
    fn broadcast<T>(&self, value: Option<T>, root: usize) -> TransportResult<T>
    where
        T: Serialize + DeserializeOwned;

    /// Elementwise sum of every worker's matrix, returned to every worker
    fn all_reduce_sum(&self, local: Matrix) -> TransportResult<Matrix>;

    /// Block until every worker has entered the barrier
    fn barrier(&self) -> TransportResult<()>;
}

impl WorkerContext {
    fn check_root(&self, root: usize) -> TransportResult<()> {
        if root >= self.num_workers() {
            return Err(TransportError::InvalidPe {
                pe: root,
                num_pes: self.num_workers(),
            });
        }
        Ok(())
    }

    fn send_msg<T: Serialize + ?Sized>(&self, msg: Msg, value: &T, dst: usize) -> TransportResult<()> {
        let data = SerializedData::new(msg, self.worker_id(), value)?;
        self.lamellae.send_to_pe(dst, data)
    }

    fn recv_msg<T: DeserializeOwned>(&self, msg: Msg, src: usize) -> TransportResult<T> {
        self.lamellae.recv_from_pe(src)?.deserialize_data(msg)
    }

    fn gather_msg<T>(&self, msg: Msg, local: &T, root: usize) -> TransportResult<Option<Vec<T>>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        self.check_root(root)?;
        if self.worker_id() != root {
            self.send_msg(msg, local, root)?;
            return Ok(None);
        }
        let mut all = Vec::with_capacity(self.num_workers());
        for pe in 0..self.num_workers() {
            if pe == root {
                all.push(local.clone());
            } else {
                all.push(self.recv_msg(msg, pe)?);
            }
        }
        Ok(Some(all))
    }

    fn broadcast_msg<T>(&self, msg: Msg, value: Option<T>, root: usize) -> TransportResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.check_root(root)?;
        if self.worker_id() != root {
            return self.recv_msg(msg, root);
        }
        let value = value.ok_or(TransportError::MissingRootValue { root })?;
        for pe in 0..self.num_workers() {
            if pe != root {
                self.send_msg(msg, &value, pe)?;
            }
        }
        Ok(value)
    }
}

impl Transport for WorkerContext {
    fn send<T: Serialize + ?Sized>(&self, value: &T, dst: usize) -> TransportResult<()> {
        self.send_msg(Msg::Data, value, dst)
    }

    fn recv<T: DeserializeOwned>(&self, src: usize) -> TransportResult<T> {
        self.recv_msg(Msg::Data, src)
    }

    #[tracing::instrument(skip_all)]
    fn gather<T>(&self, local: &T, root: usize) -> TransportResult<Option<Vec<T>>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        self.gather_msg(Msg::Gather, local, root)
    }

    #[tracing::instrument(skip_all)]
    fn broadcast<T>(&self, value: Option<T>, root: usize) -> TransportResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        self.broadcast_msg(Msg::Broadcast, value, root)
    }

    // reduce at worker 0 in worker id order, then fan the sum back out
    #[tracing::instrument(skip_all)]
    fn all_reduce_sum(&self, local: Matrix) -> TransportResult<Matrix> {
        let root = 0;
        let sum = match self.gather_msg(Msg::AllReduce, &local, root)? {
            Some(parts) => {
                let mut parts = parts.into_iter();
                let mut sum = parts.next().unwrap_or(local);
                for part in parts {
                    let expected = sum.shape();
                    sum.add_assign(&part)
                        .map_err(|_| TransportError::ReduceShapeMismatch {
                            expected,
                            found: part.shape(),
                        })?;
                }
                Some(sum)
            }
            None => None,
        };
        self.broadcast_msg(Msg::AllReduce, sum, root)
    }

    #[tracing::instrument(skip_all)]
    fn barrier(&self) -> TransportResult<()> {
        let arrived = self.gather_msg(Msg::Barrier, &(), 0)?;
        self.broadcast_msg(Msg::Barrier, arrived.map(|_| ()), 0)
    }
}
