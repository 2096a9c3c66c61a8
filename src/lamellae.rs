use crate::config;
use crate::error::{TransportError, TransportResult};
use crate::BINCODE;

use bincode::Options;
use enum_dispatch::enum_dispatch;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub(crate) mod comm;
use comm::ChannelComm;

pub(crate) mod local_lamellae;
use local_lamellae::Local;

pub(crate) mod thread_lamellae;
use thread_lamellae::Threads;

/// The list of available lamellae backends, used to specify how data is transfered between workers
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy)]
pub enum Backend {
    /// The Local backend -- a single worker talking to itself
    Local,
    /// The Threads backend -- every worker is a thread of this process, connected by a full mesh of channels
    Threads,
}

impl Backend {
    /// Parse a backend name as it appears in `LAMELLAR_GEMM_BACKEND`
    pub fn from_name(name: &str) -> Option<Backend> {
        match name {
            "local" => Some(Backend::Local),
            "threads" => Some(Backend::Threads),
            _ => None,
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::from_name(config().backend.as_str()).unwrap_or(Backend::Threads)
    }
}

/// The operation a message belongs to, checked on receipt so a protocol mismatch surfaces as an error
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Msg {
    Gather,
    AllReduce,
    Broadcast,
    Barrier,
    Data,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct SerializeHeader {
    pub(crate) msg: Msg,
    pub(crate) src: usize,
}

/// A bincode encoded payload plus the header describing it
#[derive(Clone, Debug)]
pub(crate) struct SerializedData {
    pub(crate) header: SerializeHeader,
    data: Vec<u8>,
}

impl SerializedData {
    pub(crate) fn new<T: Serialize + ?Sized>(
        msg: Msg,
        src: usize,
        obj: &T,
    ) -> TransportResult<SerializedData> {
        Ok(SerializedData {
            header: SerializeHeader { msg, src },
            data: BINCODE.serialize(obj)?,
        })
    }

    /// Decode the payload, first checking the message belongs to the `expected` operation
    pub(crate) fn deserialize_data<T: DeserializeOwned>(&self, expected: Msg) -> TransportResult<T> {
        if self.header.msg != expected {
            return Err(TransportError::UnexpectedMessage {
                expected,
                found: self.header.msg,
            });
        }
        Ok(BINCODE.deserialize(&self.data)?)
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }
}

#[enum_dispatch]
pub(crate) trait LamellaeComm {
    fn my_pe(&self) -> usize;
    fn num_pes(&self) -> usize;
    fn backend(&self) -> Backend;
    /// Enqueue `data` for `pe`; never blocks
    fn send_to_pe(&self, pe: usize, data: SerializedData) -> TransportResult<()>;
    /// Block until the next message from `pe` arrives
    fn recv_from_pe(&self, pe: usize) -> TransportResult<SerializedData>;
    #[allow(non_snake_case)]
    fn MB_sent(&self) -> f64;
}

#[enum_dispatch(LamellaeComm)]
#[derive(Debug)]
pub(crate) enum Lamellae {
    Local,
    Threads,
}

/// Build one lamellae endpoint per worker, index `i` belonging to worker `i`
pub(crate) fn create_lamellae(
    backend: Backend,
    num_workers: usize,
) -> TransportResult<Vec<Lamellae>> {
    match backend {
        Backend::Local => {
            if num_workers != 1 {
                return Err(TransportError::UnsupportedWorkerCount {
                    backend,
                    num_workers,
                });
            }
            Ok(vec![Local::new().into()])
        }
        Backend::Threads => {
            if num_workers == 0 {
                return Err(TransportError::UnsupportedWorkerCount {
                    backend,
                    num_workers,
                });
            }
            Ok(ChannelComm::mesh(num_workers)
                .into_iter()
                .map(|comm| Threads::new(comm).into())
                .collect())
        }
    }
}
