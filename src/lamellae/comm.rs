use super::SerializedData;
use crate::config;
use crate::error::{TransportError, TransportResult};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{trace, warn};

/// One worker's view of a full mesh of point-to-point channels.
///
/// `senders[pe]` delivers to `pe`, `receivers[pe]` yields what `pe` sent us. Each ordered pair of
/// workers owns a dedicated channel, so messages between two workers arrive in the order they were sent.
/// Dropping an endpoint disconnects every channel it sends on, which is how peers blocked in a
/// receive find out that this worker is gone.
#[derive(Debug)]
pub(crate) struct ChannelComm {
    my_pe: usize,
    num_pes: usize,
    senders: Vec<Sender<SerializedData>>,
    receivers: Vec<Receiver<SerializedData>>,
    bytes_sent: AtomicUsize,
}

impl ChannelComm {
    /// Create the endpoints of a `num_pes` wide mesh, index `i` belonging to pe `i`
    pub(crate) fn mesh(num_pes: usize) -> Vec<ChannelComm> {
        let mut senders: Vec<Vec<Sender<SerializedData>>> =
            (0..num_pes).map(|_| Vec::with_capacity(num_pes)).collect();
        let mut receivers: Vec<Vec<Receiver<SerializedData>>> =
            (0..num_pes).map(|_| Vec::with_capacity(num_pes)).collect();
        for src in 0..num_pes {
            for dst in 0..num_pes {
                let (tx, rx) = unbounded();
                senders[src].push(tx);
                // receivers[dst] is indexed by src, built in src order
                receivers[dst].push(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(my_pe, (senders, receivers))| ChannelComm {
                my_pe,
                num_pes,
                senders,
                receivers,
                bytes_sent: AtomicUsize::new(0),
            })
            .collect()
    }

    pub(crate) fn my_pe(&self) -> usize {
        self.my_pe
    }

    pub(crate) fn num_pes(&self) -> usize {
        self.num_pes
    }

    fn check_pe(&self, pe: usize) -> TransportResult<()> {
        if pe >= self.num_pes {
            return Err(TransportError::InvalidPe {
                pe,
                num_pes: self.num_pes,
            });
        }
        Ok(())
    }

    pub(crate) fn send(&self, pe: usize, data: SerializedData) -> TransportResult<()> {
        self.check_pe(pe)?;
        let len = data.len();
        trace!(
            "[{:?}] send {:?} ({} bytes) to {:?}",
            self.my_pe,
            data.header.msg,
            len,
            pe
        );
        self.senders[pe]
            .send(data)
            .map_err(|_| TransportError::Disconnected { pe })?;
        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn recv(&self, pe: usize) -> TransportResult<SerializedData> {
        self.check_pe(pe)?;
        let timeout = config().deadlock_interval();
        let start = Instant::now();
        loop {
            match self.receivers[pe].recv_timeout(timeout) {
                Ok(data) => {
                    trace!(
                        "[{:?}] recv {:?} ({} bytes) from {:?}",
                        self.my_pe,
                        data.header.msg,
                        data.len(),
                        data.header.src
                    );
                    return Ok(data);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "[{:?}] potential deadlock detected: blocked for {:.1}s waiting on pe {:?}. \
                        Collective operations require every worker to participate. \
                        The timeout can be set via the LAMELLAR_GEMM_DEADLOCK_TIMEOUT environment variable",
                        self.my_pe,
                        start.elapsed().as_secs_f64(),
                        pe
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Disconnected { pe });
                }
            }
        }
    }

    pub(crate) fn mb_sent(&self) -> f64 {
        self.bytes_sent.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}
