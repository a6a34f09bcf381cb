//! MPI backend of [`Comm`](super::Comm), enabled by the `mpi` feature.
//!
//! Variable-length byte buffers travel through the `*_varcount` collectives
//! after their lengths have been exchanged. Scalar reductions and the seed
//! broadcast use the typed collectives directly.
//!
//! # Example
//! ```no_run
//! use sparsefn::parallel::{Comm, MpiComm};
//! let comm = MpiComm::new().expect("MPI already initialized");
//! println!("Rank: {} / {}", comm.rank(), comm.size());
//! comm.barrier();
//! ```

use std::rc::Rc;

use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::environment::Universe;
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;
use mpi::Count;

use crate::error::SpError;

/// MPI communicator wrapper for distributed parallelism.
pub struct MpiComm {
    comm: SimpleCommunicator,
    rank: usize,
    size: usize,
    // finalizes MPI when the last communicator derived from it is dropped
    _universe: Rc<Universe>,
}

impl MpiComm {
    /// Initialize MPI and wrap the world communicator.
    pub fn new() -> Result<Self, SpError> {
        let universe = mpi::initialize()
            .ok_or(SpError::Config("MPI was already initialized".to_string()))?;
        let comm = universe.world();
        Ok(Self::wrap(comm, Rc::new(universe)))
    }

    fn wrap(comm: SimpleCommunicator, universe: Rc<Universe>) -> Self {
        let rank = comm.rank() as usize;
        let size = comm.size() as usize;
        MpiComm { comm, rank, size, _universe: universe }
    }
}

fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |acc, &c| {
            let d = *acc;
            *acc += c;
            Some(d)
        })
        .collect()
}

fn unpack(buf: &[u8], counts: &[Count], displs: &[Count]) -> Vec<Vec<u8>> {
    counts
        .iter()
        .zip(displs)
        .map(|(&c, &d)| buf[d as usize..(d + c) as usize].to_vec())
        .collect()
}

impl super::Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.comm.barrier();
    }

    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>> {
        let mine = local.len() as Count;
        let mut counts = vec![0 as Count; self.size];
        self.comm.all_gather_into(&mine, &mut counts[..]);
        let displs = displacements(&counts);
        let total: Count = counts.iter().sum();
        let mut buf = vec![0u8; total as usize];
        {
            let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
            self.comm.all_gather_varcount_into(local, &mut partition);
        }
        unpack(&buf, &counts, &displs)
    }

    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        assert_eq!(outgoing.len(), self.size, "all_to_all needs one buffer per rank");
        let send_counts: Vec<Count> = outgoing.iter().map(|b| b.len() as Count).collect();
        let mut recv_counts = vec![0 as Count; self.size];
        self.comm.all_to_all_into(&send_counts[..], &mut recv_counts[..]);

        let send_displs = displacements(&send_counts);
        let recv_displs = displacements(&recv_counts);
        let send: Vec<u8> = outgoing.concat();
        let total: Count = recv_counts.iter().sum();
        let mut recv = vec![0u8; total as usize];
        {
            let partition = Partition::new(&send[..], &send_counts[..], &send_displs[..]);
            let mut recv_partition =
                PartitionMut::new(&mut recv[..], &recv_counts[..], &recv_displs[..]);
            self.comm.all_to_all_varcount_into(&partition, &mut recv_partition);
        }
        unpack(&recv, &recv_counts, &recv_displs)
    }

    fn broadcast_bytes(&self, data: &mut Vec<u8>, root: usize) {
        let root_process = self.comm.process_at_rank(root as i32);
        let mut len = data.len() as u64;
        root_process.broadcast_into(&mut len);
        data.resize(len as usize, 0);
        root_process.broadcast_into(&mut data[..]);
    }

    fn all_reduce_sum(&self, x: f64) -> f64 {
        let mut y = x;
        self.comm.all_reduce_into(&x, &mut y, &SystemOperation::sum());
        y
    }

    fn all_reduce_max(&self, x: f64) -> f64 {
        let mut y = x;
        self.comm.all_reduce_into(&x, &mut y, &SystemOperation::max());
        y
    }

    fn all_reduce_sum_vec(&self, local: &mut [f64]) {
        let send = local.to_vec();
        self.comm.all_reduce_into(&send[..], local, &SystemOperation::sum());
    }

    fn broadcast_u64(&self, value: u64, root: usize) -> u64 {
        let mut value = value;
        self.comm.process_at_rank(root as i32).broadcast_into(&mut value);
        value
    }

    fn split(&self, color: usize, key: usize) -> Self {
        let comm = self
            .comm
            .split_by_color_with_key(Color::with_value(color as i32), key as i32)
            .unwrap_or_else(|| panic!("MPI split with a defined color returned no communicator"));
        MpiComm::wrap(comm, self._universe.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::Comm;

    // MPI can be initialized once per process, so everything runs in one test.
    #[test]
    fn typed_collectives_match_the_trait() {
        let comm = MpiComm::new().unwrap();
        let size = comm.size() as f64;
        assert_eq!(comm.all_reduce_sum(1.5), 1.5 * size);
        assert_eq!(comm.all_reduce_max(comm.rank() as f64), size - 1.0);
        let mut v = [1.0, -2.0, 0.25];
        comm.all_reduce_sum_vec(&mut v);
        assert_eq!(v, [size, -2.0 * size, 0.25 * size]);
        let seed = comm.broadcast_u64(if comm.rank() == 0 { 42 } else { 7 }, 0);
        assert_eq!(seed, 42);
        let gathered = comm.all_gather_bytes(&[comm.rank() as u8]);
        assert_eq!(gathered.len(), comm.size());
    }
}
