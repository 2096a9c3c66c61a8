use super::comm::ChannelComm;
use super::{Backend, LamellaeComm, SerializedData};
use crate::error::TransportResult;

/// Multi worker lamellae where each worker is a thread of the current process
pub(crate) struct Threads {
    my_pe: usize,
    num_pes: usize,
    thread_comm: ChannelComm,
}

impl std::fmt::Debug for Threads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Threads {{ my_pe: {}, num_pes: {} }}",
            self.my_pe, self.num_pes
        )
    }
}

impl Threads {
    pub(crate) fn new(thread_comm: ChannelComm) -> Threads {
        Threads {
            my_pe: thread_comm.my_pe(),
            num_pes: thread_comm.num_pes(),
            thread_comm,
        }
    }
}

impl LamellaeComm for Threads {
    fn my_pe(&self) -> usize {
        self.my_pe
    }
    fn num_pes(&self) -> usize {
        self.num_pes
    }
    fn backend(&self) -> Backend {
        Backend::Threads
    }
    fn send_to_pe(&self, pe: usize, data: SerializedData) -> TransportResult<()> {
        self.thread_comm.send(pe, data)
    }
    fn recv_from_pe(&self, pe: usize) -> TransportResult<SerializedData> {
        self.thread_comm.recv(pe)
    }
    #[allow(non_snake_case)]
    fn MB_sent(&self) -> f64 {
        self.thread_comm.mb_sent()
    }
}
