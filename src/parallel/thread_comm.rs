//! In-process communicator: one rank per OS thread.
//!
//! Every collective is a rendezvous on a shared [`Group`]. Ranks deposit their
//! outgoing buffers, wait for the last arrival, pick up what is addressed to
//! them and leave; the last rank to leave resets the round. A rank that panics
//! raises the shared abort flag so its peers fail instead of waiting forever.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use super::Comm;

const POLL: Duration = Duration::from_millis(20);

#[derive(PartialEq, Eq, Clone, Copy)]
enum Phase {
    Filling,
    Draining,
}

struct Round {
    phase: Phase,
    arrived: usize,
    departed: usize,
    // deposits[src][dst]
    deposits: Vec<Vec<Vec<u8>>>,
}

struct Group {
    size: usize,
    round: Mutex<Round>,
    cond: Condvar,
    children: Mutex<HashMap<(u64, usize), (Arc<Group>, usize)>>,
    aborted: Arc<AtomicBool>,
}

impl Group {
    fn new(size: usize, aborted: Arc<AtomicBool>) -> Self {
        Self {
            size,
            round: Mutex::new(Round {
                phase: Phase::Filling,
                arrived: 0,
                departed: 0,
                deposits: vec![Vec::new(); size],
            }),
            cond: Condvar::new(),
            children: Mutex::new(HashMap::new()),
            aborted,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Round> {
        self.round.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Round>) -> MutexGuard<'a, Round> {
        if self.aborted.load(Ordering::Acquire) {
            drop(guard);
            panic!("thread communicator aborted: a peer rank panicked");
        }
        match self.cond.wait_timeout(guard, POLL) {
            Ok((g, _)) => g,
            Err(e) => e.into_inner().0,
        }
    }

    fn exchange(&self, rank: usize, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        debug_assert_eq!(outgoing.len(), self.size);
        let mut round = self.lock();
        while round.phase == Phase::Draining {
            round = self.wait(round);
        }
        round.deposits[rank] = outgoing;
        round.arrived += 1;
        if round.arrived == self.size {
            round.phase = Phase::Draining;
            self.cond.notify_all();
        } else {
            while round.phase == Phase::Filling {
                round = self.wait(round);
            }
        }
        let incoming: Vec<Vec<u8>> = (0..self.size)
            .map(|src| std::mem::take(&mut round.deposits[src][rank]))
            .collect();
        round.departed += 1;
        if round.departed == self.size {
            round.arrived = 0;
            round.departed = 0;
            round.deposits.iter_mut().for_each(Vec::clear);
            round.phase = Phase::Filling;
            self.cond.notify_all();
        }
        incoming
    }
}

/// Communicator for one rank of an in-process thread group.
pub struct ThreadComm {
    group: Arc<Group>,
    rank: usize,
    splits: Cell<u64>,
}

impl ThreadComm {
    /// Create the communicators of a fresh group of `size` ranks, one per
    /// rank, to be moved onto their threads.
    pub fn create(size: usize) -> Vec<ThreadComm> {
        let group = Arc::new(Group::new(size, Arc::new(AtomicBool::new(false))));
        (0..size)
            .map(|rank| ThreadComm { group: group.clone(), rank, splits: Cell::new(0) })
            .collect()
    }

    fn abort_flag(&self) -> Arc<AtomicBool> {
        self.group.aborted.clone()
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.group.size
    }

    fn barrier(&self) {
        self.group.exchange(self.rank, vec![Vec::new(); self.group.size]);
    }

    fn all_gather_bytes(&self, local: &[u8]) -> Vec<Vec<u8>> {
        self.group.exchange(self.rank, vec![local.to_vec(); self.group.size])
    }

    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        assert_eq!(outgoing.len(), self.group.size, "all_to_all needs one buffer per rank");
        self.group.exchange(self.rank, outgoing)
    }

    fn broadcast_bytes(&self, data: &mut Vec<u8>, root: usize) {
        let outgoing = if self.rank == root {
            vec![data.clone(); self.group.size]
        } else {
            vec![Vec::new(); self.group.size]
        };
        let mut incoming = self.group.exchange(self.rank, outgoing);
        *data = std::mem::take(&mut incoming[root]);
    }

    fn split(&self, color: usize, key: usize) -> Self {
        let epoch = self.splits.get();
        self.splits.set(epoch + 1);

        let mut mine = Vec::with_capacity(16);
        mine.extend_from_slice(&(color as u64).to_le_bytes());
        mine.extend_from_slice(&(key as u64).to_le_bytes());
        let all = self.all_gather_bytes(&mine);

        let mut members: Vec<(usize, usize)> = all
            .iter()
            .enumerate()
            .filter_map(|(r, b)| {
                let c = u64::from_le_bytes(b[0..8].try_into().ok()?) as usize;
                let k = u64::from_le_bytes(b[8..16].try_into().ok()?) as usize;
                (c == color).then_some((k, r))
            })
            .collect();
        members.sort_unstable();
        let new_rank = members
            .iter()
            .position(|&(_, r)| r == self.rank)
            .unwrap_or_default();
        let n = members.len();

        let child = {
            let mut children = self.group.children.lock().unwrap_or_else(|e| e.into_inner());
            let entry = children
                .entry((epoch, color))
                .or_insert_with(|| (Arc::new(Group::new(n, self.abort_flag())), 0));
            entry.1 += 1;
            let group = entry.0.clone();
            if entry.1 == n {
                children.remove(&(epoch, color));
            }
            group
        };
        ThreadComm { group: child, rank: new_rank, splits: Cell::new(0) }
    }
}

struct AbortOnPanic(Arc<AtomicBool>);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(true, Ordering::Release);
        }
    }
}

/// Run `f` on `n` threads, each holding rank `i` of a fresh group, and
/// return the per-rank results in rank order. A panic on any rank is
/// re-raised on the caller after every thread has stopped.
pub fn run_threads<F, R>(n: usize, f: F) -> Vec<R>
where
    F: Fn(ThreadComm) -> R + Sync,
    R: Send,
{
    let comms = ThreadComm::create(n);
    let f = &f;
    let outcomes: Vec<std::thread::Result<R>> = std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let guard = AbortOnPanic(comm.abort_flag());
                scope.spawn(move || {
                    let _guard = guard;
                    f(comm)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });

    let mut results = Vec::with_capacity(n);
    let mut original = None;
    let mut aborted = None;
    for outcome in outcomes {
        match outcome {
            Ok(r) => results.push(r),
            Err(payload) => {
                let is_abort = payload
                    .downcast_ref::<&str>()
                    .is_some_and(|s| s.starts_with("thread communicator aborted"));
                if is_abort {
                    aborted.get_or_insert(payload);
                } else {
                    original.get_or_insert(payload);
                }
            }
        }
    }
    // re-raise the originating panic rather than a peer's abort
    if let Some(payload) = original.or(aborted) {
        std::panic::resume_unwind(payload);
    }
    results
}
