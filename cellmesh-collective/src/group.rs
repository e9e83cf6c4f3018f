//! The process-group abstraction collectives are built on.
//!
//! `ProcessGroup` is a handle every rank holds, offering the blocking
//! primitives a distributed-memory job needs (all-gather, all-to-all,
//! broadcast, barrier) plus a scoped `split` for carving out I/O-rank
//! sub-groups.
//!
//! `LocalGroup` is the one implementation shipped here: a same-process SPMD
//! simulation that spawns one OS thread per rank and exchanges byte buffers
//! through a shared, barrier-guarded slot table. It is enough to exercise
//! every collective invariant without a cluster; a real MPI binding would
//! implement the same trait without touching any algorithm built on top of
//! it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

/// The blocking collective operations every cellmesh algorithm is built on.
/// Derived groups (via `split`) fail a call rather than abort the process;
/// in this simulation that manifests as the panics below being confined to
/// the owning thread, which `LocalGroup::run` turns into an `Err` for the
/// caller instead of poisoning the whole group.
pub trait ProcessGroup: Sized + Send {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Blocks until every rank in the group has called `barrier`.
    fn barrier(&self);

    /// Every rank contributes `local`; all ranks receive every contribution,
    /// ordered by rank.
    fn all_gather_bytes(&self, local: Vec<u8>) -> Vec<Vec<u8>>;

    /// `send[j]` is this rank's payload for rank `j`. Returns, for every
    /// rank `i`, the payload rank `i` addressed to this rank.
    fn all_to_all_bytes(&self, send: Vec<Vec<u8>>) -> Vec<Vec<u8>>;

    /// `root` supplies `Some(data)`; every rank (including `root`) receives
    /// a copy of it.
    fn broadcast_bytes(&self, root: usize, data: Option<Vec<u8>>) -> Vec<u8>;

    /// Splits the group by `color`: ranks sharing the same `Some(color)`
    /// form a new group, re-ranked from 0; ranks passing `None` are excluded
    /// and receive `None`. Collective over the *parent* group — every rank,
    /// including excluded ones, must call this the same number of times in
    /// the same order.
    fn split(&self, color: Option<usize>) -> Option<Self>;
}

/// Typed convenience built on the raw byte collectives — no group needs to
/// implement these separately.
pub trait ProcessGroupExt: ProcessGroup {
    fn all_gather_u64(&self, local: u64) -> Vec<u64> {
        self.all_gather_bytes(local.to_le_bytes().to_vec())
            .into_iter()
            .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
            .collect()
    }

    fn broadcast_u64(&self, root: usize, data: Option<u64>) -> u64 {
        let bytes = self.broadcast_bytes(root, data.map(|v| v.to_le_bytes().to_vec()));
        u64::from_le_bytes(bytes.try_into().unwrap())
    }
}

impl<G: ProcessGroup> ProcessGroupExt for G {}

struct Shared {
    size: usize,
    barrier: Barrier,
    gather_buf: Mutex<Vec<Vec<u8>>>,
    alltoall_buf: Mutex<Vec<Vec<Vec<u8>>>>,
    split_registry: Mutex<HashMap<(i64, u64), Arc<Shared>>>,
}

impl Shared {
    fn new(size: usize) -> Self {
        Self {
            size,
            barrier: Barrier::new(size),
            gather_buf: Mutex::new(vec![Vec::new(); size]),
            alltoall_buf: Mutex::new(vec![vec![Vec::new(); size]; size]),
            split_registry: Mutex::new(HashMap::new()),
        }
    }
}

/// One rank's handle into a simulated process group.
pub struct LocalGroup {
    shared: Arc<Shared>,
    rank: usize,
    split_calls: AtomicU64,
}

impl LocalGroup {
    /// Spawns `size` threads, each running `f` with its own `LocalGroup`
    /// handle, and returns the per-rank results in rank order. Panics inside
    /// `f` on any rank propagate as an `Err` for that rank's slot rather
    /// than poisoning the whole run.
    pub fn run<T, F>(size: usize, f: F) -> Vec<thread::Result<T>>
    where
        T: Send + 'static,
        F: Fn(LocalGroup) -> T + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared::new(size));
        let f = Arc::new(f);
        let handles: Vec<_> = (0..size)
            .map(|rank| {
                let shared = shared.clone();
                let f = f.clone();
                let group = LocalGroup {
                    shared,
                    rank,
                    split_calls: AtomicU64::new(0),
                };
                thread::Builder::new()
                    .name(format!("cellmesh-rank-{rank}"))
                    .spawn(move || f(group))
                    .expect("failed to spawn rank thread")
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn all_gather_bytes(&self, local: Vec<u8>) -> Vec<Vec<u8>> {
        {
            let mut buf = self.shared.gather_buf.lock().unwrap();
            buf[self.rank] = local;
        }
        self.shared.barrier.wait();
        let result = self.shared.gather_buf.lock().unwrap().clone();
        self.shared.barrier.wait();
        result
    }

    fn all_to_all_bytes(&self, send: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        assert_eq!(send.len(), self.size(), "all_to_all needs one payload per rank");
        {
            let mut buf = self.shared.alltoall_buf.lock().unwrap();
            for (dst, payload) in send.into_iter().enumerate() {
                buf[self.rank][dst] = payload;
            }
        }
        self.shared.barrier.wait();
        let result: Vec<Vec<u8>> = {
            let buf = self.shared.alltoall_buf.lock().unwrap();
            (0..self.size()).map(|src| buf[src][self.rank].clone()).collect()
        };
        self.shared.barrier.wait();
        result
    }

    fn broadcast_bytes(&self, root: usize, data: Option<Vec<u8>>) -> Vec<u8> {
        let local = if self.rank == root {
            data.expect("broadcast root must supply data")
        } else {
            Vec::new()
        };
        let gathered = self.all_gather_bytes(local);
        gathered[root].clone()
    }

    fn split(&self, color: Option<usize>) -> Option<Self> {
        let nth = self.split_calls.fetch_add(1, Ordering::SeqCst);
        let my_color: i64 = color.map(|c| c as i64).unwrap_or(-1);
        let colors = self.all_gather_bytes(my_color.to_le_bytes().to_vec());
        let colors: Vec<i64> = colors
            .into_iter()
            .map(|b| i64::from_le_bytes(b.try_into().unwrap()))
            .collect();

        let color = color?;
        let members: Vec<usize> = (0..self.size())
            .filter(|&r| colors[r] == color as i64)
            .collect();
        let new_rank = members.iter().position(|&r| r == self.rank).unwrap();
        let new_size = members.len();
        let leader = members[0];
        let key = (color as i64, nth);

        if self.rank == leader {
            let shared = Arc::new(Shared::new(new_size));
            self.shared.split_registry.lock().unwrap().insert(key, shared);
        }
        // Fence: every rank of the *parent* group, including excluded ones,
        // must reach here before an included rank looks the entry up.
        self.barrier();

        let shared = self
            .shared
            .split_registry
            .lock()
            .unwrap()
            .get(&key)
            .expect("split leader must have published the new group state")
            .clone();

        Some(LocalGroup {
            shared,
            rank: new_rank,
            split_calls: AtomicU64::new(0),
        })
    }
}
