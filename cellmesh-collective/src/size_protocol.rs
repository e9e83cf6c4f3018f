//! An all-gather of per-rank local sizes, turned into each rank's offset
//! (prefix sum) and the global total. Every caller (attribute engine, tree
//! codec, projection codec) must use this — never a scan — because several
//! datasets carry "+1 tail" semantics: the last contributing rank's
//! effective length is `local + 1` (the closing pointer entry), everyone
//! else contributes `local`.

use crate::group::{ProcessGroup, ProcessGroupExt};

/// Result of negotiating one rank's slice of a globally-growing dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub global_offset: u64,
    pub global_total: u64,
}

/// Negotiate this rank's offset into a dataset all ranks are extending by
/// `local_size` elements. If `contributes_tail` is set for this rank (by
/// convention, the highest-ranked contributor), one extra element — the
/// closing offset of a `+1`-tailed array — is added to its contribution
/// before computing offsets and the total.
pub fn negotiate<G: ProcessGroup>(group: &G, local_size: u64, contributes_tail: bool) -> Negotiated {
    let effective = local_size + u64::from(contributes_tail);
    let all_sizes = group.all_gather_u64(effective);
    let my_rank = group.rank();
    let global_offset: u64 = all_sizes[..my_rank].iter().sum();
    let global_total: u64 = all_sizes.iter().sum();
    tracing::debug!(
        rank = my_rank,
        local_size,
        contributes_tail,
        global_offset,
        global_total,
        "negotiated offsets"
    );
    Negotiated {
        global_offset,
        global_total,
    }
}

/// Convenience for the common "only the last rank carries the tail" pattern
/// used by `dst_blk_ptr`, `dst_ptr` and `attr_ptr`.
pub fn negotiate_with_last_rank_tail<G: ProcessGroup>(group: &G, local_size: u64) -> Negotiated {
    let is_last = group.rank() + 1 == group.size();
    negotiate(group, local_size, is_last)
}
