use super::comm::ChannelComm;
use super::{Backend, LamellaeComm, SerializedData};
use crate::error::TransportResult;

/// Single worker lamellae; sends to pe 0 loop back to the caller
pub(crate) struct Local {
    local_comm: ChannelComm,
}

impl std::fmt::Debug for Local {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Local")
    }
}

impl Local {
    pub(crate) fn new() -> Local {
        let mut mesh = ChannelComm::mesh(1);
        Local {
            local_comm: mesh.remove(0),
        }
    }
}

impl LamellaeComm for Local {
    fn my_pe(&self) -> usize {
        0
    }
    fn num_pes(&self) -> usize {
        1
    }
    fn backend(&self) -> Backend {
        Backend::Local
    }
    fn send_to_pe(&self, pe: usize, data: SerializedData) -> TransportResult<()> {
        self.local_comm.send(pe, data)
    }
    fn recv_from_pe(&self, pe: usize) -> TransportResult<SerializedData> {
        self.local_comm.recv(pe)
    }
    #[allow(non_snake_case)]
    fn MB_sent(&self) -> f64 {
        self.local_comm.mb_sent()
    }
}
