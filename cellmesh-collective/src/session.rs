//! Bundles a process group and a block store into the one value every
//! collective operation needs, replacing the hidden global state a
//! process-wide communicator context would otherwise require.

use crate::group::ProcessGroup;
use cellmesh_io::BlockStore;
use std::sync::Arc;

/// An explicit, non-global handle to "this rank's view of the job": which
/// group it belongs to, and which dataset store it reads and writes
/// through. Cheap to clone — `group` is owned, `store` is reference
/// counted.
#[derive(Clone)]
pub struct Session<G: ProcessGroup> {
    pub group: G,
    pub store: Arc<dyn BlockStore>,
}

impl<G: ProcessGroup> Session<G> {
    pub fn new(group: G, store: Arc<dyn BlockStore>) -> Self {
        Self { group, store }
    }

    pub fn rank(&self) -> usize {
        self.group.rank()
    }

    pub fn size(&self) -> usize {
        self.group.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::LocalGroup;
    use cellmesh_io::MemBlockStore;

    #[test]
    fn session_exposes_rank_and_size() {
        let results = LocalGroup::run(3, |g| {
            let session = Session::new(g, Arc::new(MemBlockStore::new()) as Arc<dyn BlockStore>);
            (session.rank(), session.size())
        });
        let got: Vec<(usize, usize)> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(got.iter().map(|(_, s)| *s).collect::<Vec<_>>(), vec![3, 3, 3]);
        let mut ranks: Vec<usize> = got.into_iter().map(|(r, _)| r).collect();
        ranks.sort();
        assert_eq!(ranks, vec![0, 1, 2]);
    }
}
