//! Collective communication between the processes of a grid.
//!
//! Every operation here is a blocking collective: all members of the
//! communicator must call it, in the same order. Payloads are plain byte
//! buffers produced by [`crate::core::wire`].

use crate::core::wire::{WireReader, WireWriter};

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
    /// Every rank receives every rank's buffer, indexed by rank.
    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>>;
    /// `outgoing[d]` is delivered to rank `d`; the result is indexed by sender.
    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>>;
    /// Replace `data` on every rank with the root's copy.
    fn broadcast_bytes(&self, data: &mut Vec<u8>, root: usize);
    /// Partition the communicator; ranks with equal `color` form a group,
    /// ordered by `key` (ties broken by the parent rank).
    fn split(&self, color: usize, key: usize) -> Self
    where
        Self: Sized;

    /// Gather every rank's buffer on `root`; other ranks receive nothing.
    fn gather_bytes(&self, local: &[u8], root: usize) -> Vec<Vec<u8>> {
        let all = self.all_gather_bytes(local);
        if self.rank() == root { all } else { Vec::new() }
    }

    fn all_reduce_sum(&self, x: f64) -> f64 {
        // rank order keeps the sum bitwise identical on every member
        self.all_gather_bytes(&x.to_le_bytes())
            .iter()
            .map(|b| decode_f64(b))
            .sum()
    }

    fn all_reduce_max(&self, x: f64) -> f64 {
        self.all_gather_bytes(&x.to_le_bytes())
            .iter()
            .map(|b| decode_f64(b))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Elementwise sum of equally sized vectors.
    fn all_reduce_sum_vec(&self, local: &mut [f64]) {
        let mut w = WireWriter::with_capacity(local.len() * 8);
        for &v in local.iter() {
            w.put_f64(v);
        }
        let parts = self.all_gather_bytes(&w.into_bytes());
        local.iter_mut().for_each(|v| *v = 0.0);
        for part in &parts {
            let mut r = WireReader::new(part);
            for v in local.iter_mut() {
                *v += r.get_f64().unwrap_or(0.0);
            }
        }
    }

    fn broadcast_u64(&self, value: u64, root: usize) -> u64 {
        let mut data = value.to_le_bytes().to_vec();
        self.broadcast_bytes(&mut data, root);
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&data[..8]);
        u64::from_le_bytes(arr)
    }
}

fn decode_f64(b: &[u8]) -> f64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&b[..8]);
    f64::from_le_bytes(arr)
}

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

pub mod thread_comm;
pub use thread_comm::{run_threads, ThreadComm};

/// Backend-agnostic communicator handed to a process grid.
pub enum UniverseComm {
    #[cfg(feature = "mpi")]
    Mpi(MpiComm),
    Thread(ThreadComm),
    Serial,
}

impl UniverseComm {
    /// Single-process communicator.
    pub fn serial() -> Self {
        UniverseComm::Serial
    }

    /// Short backend name for log output.
    pub fn backend(&self) -> &'static str {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(_) => "mpi",
            UniverseComm::Thread(_) => "thread",
            UniverseComm::Serial => "serial",
        }
    }
}

impl Comm for UniverseComm {
    fn rank(&self) -> usize {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.rank(),
            UniverseComm::Thread(comm) => comm.rank(),
            UniverseComm::Serial => 0,
        }
    }
    fn size(&self) -> usize {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.size(),
            UniverseComm::Thread(comm) => comm.size(),
            UniverseComm::Serial => 1,
        }
    }
    fn barrier(&self) {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.barrier(),
            UniverseComm::Thread(comm) => comm.barrier(),
            UniverseComm::Serial => {}
        }
    }
    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>> {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.all_gather_bytes(local),
            UniverseComm::Thread(comm) => comm.all_gather_bytes(local),
            UniverseComm::Serial => vec![local.to_vec()],
        }
    }
    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.all_to_all_bytes(outgoing),
            UniverseComm::Thread(comm) => comm.all_to_all_bytes(outgoing),
            UniverseComm::Serial => outgoing,
        }
    }
    fn broadcast_bytes(&self, data: &mut Vec<u8>, root: usize) {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.broadcast_bytes(data, root),
            UniverseComm::Thread(comm) => comm.broadcast_bytes(data, root),
            UniverseComm::Serial => {}
        }
    }
    fn split(&self, color: usize, key: usize) -> Self {
        match self {
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => UniverseComm::Mpi(comm.split(color, key)),
            UniverseComm::Thread(comm) => UniverseComm::Thread(comm.split(color, key)),
            UniverseComm::Serial => UniverseComm::Serial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_collectives_are_identity() {
        let comm = UniverseComm::serial();
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.all_reduce_sum(2.5), 2.5);
        assert_eq!(comm.all_reduce_max(-1.0), -1.0);
        assert_eq!(comm.all_gather_bytes(&[1, 2]), vec![vec![1, 2]]);
        let mut v = vec![1.0, 2.0];
        comm.all_reduce_sum_vec(&mut v);
        assert_eq!(v, vec![1.0, 2.0]);
        assert_eq!(comm.broadcast_u64(9, 0), 9);
    }
}
