//! Block-sparse edge storage: `dst_blk_ptr`/`dst_blk_idx` locate the blocks
//! of contiguous destinations that actually have incoming edges, `dst_ptr`
//! delimits each destination's slice of `src_idx`. Reads and writes rebase
//! these four arrays between absolute (on-disk) and zero-based (per-rank)
//! offsets; a `+1` tail on the pointer arrays joins adjacent ranks' decoded
//! regions without a gap.

use cellmesh_collective::{negotiate_with_last_rank_tail, range_partition_rank, ProcessGroup, ProcessGroupExt};
use cellmesh_common::{Error, Result};
use cellmesh_io::{path, BlockStore};
use cellmesh_model::{AttributeDescriptor, EdgeMap};

/// One rank's decoded slice of a projection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProjectionSlice {
    pub dst_blk_ptr: Vec<u64>,
    pub dst_blk_idx: Vec<u32>,
    pub dst_ptr: Vec<u64>,
    pub src_idx: Vec<u32>,
    /// Global index of this rank's first block.
    pub block_base: u64,
    /// Global offset of this rank's first edge in `src_idx`.
    pub edge_base: u64,
}

/// Read this rank's slice of the `dst_pop ← src_pop` projection.
pub fn read<G: ProcessGroup>(group: &G, store: &dyn BlockStore, dst_pop: &str, src_pop: &str) -> Result<ProjectionSlice> {
    let _span = tracing::debug_span!("projection::read", rank = group.rank(), dst_pop, src_pop).entered();
    let blk_ptr_path = path::projection_dataset(dst_pop, src_pop, path::DST_BLK_PTR);
    let blk_idx_path = path::projection_dataset(dst_pop, src_pop, path::DST_BLK_IDX);
    let dst_ptr_path = path::projection_dataset(dst_pop, src_pop, path::DST_PTR);
    let src_idx_path = path::projection_dataset(dst_pop, src_pop, path::SRC_IDX);

    let b_total = if group.rank() == 0 {
        store.dataset_len(&blk_ptr_path)?.saturating_sub(1)
    } else {
        0
    };
    let b_total = group.broadcast_u64(0, if group.rank() == 0 { Some(b_total) } else { None });

    let bin = range_partition_rank(b_total, group.size(), group.rank());
    let blk_ptr_count = bin.len + 1;
    let raw_blk_ptr = store.read_block(&blk_ptr_path, bin.offset, blk_ptr_count, 8)?;
    let mut dst_blk_ptr: Vec<u64> = raw_blk_ptr.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect();
    let block_rebase = *dst_blk_ptr.first().unwrap_or(&0);
    for p in dst_blk_ptr.iter_mut() {
        *p -= block_rebase;
    }

    // Unlike `dst_blk_ptr`/`dst_ptr`, `dst_blk_idx` carries no shared
    // boundary entry between ranks: every block index appears exactly once
    // across the whole dataset, so each rank reads exactly its `bin.len`.
    let raw_blk_idx = store.read_block(&blk_idx_path, bin.offset, bin.len, 4)?;
    let dst_blk_idx: Vec<u32> = raw_blk_idx.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();

    // `dst_blk_ptr` is already rebased to start at 0, so its last entry is
    // exactly this rank's destination count; like `dst_ptr` itself, every
    // rank reads one more entry than that to get its final upper bound.
    let dst_ptr_count = dst_blk_ptr.last().copied().unwrap_or(0) + 1;
    let raw_dst_ptr = store.read_block(&dst_ptr_path, block_rebase, dst_ptr_count, 8)?;
    let mut dst_ptr: Vec<u64> = raw_dst_ptr.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect();
    let dst_rebase = *dst_ptr.first().unwrap_or(&0);
    for p in dst_ptr.iter_mut() {
        *p -= dst_rebase;
    }
    let edge_base = dst_rebase;

    let src_idx_count = dst_ptr.last().copied().unwrap_or(0) - dst_ptr.first().copied().unwrap_or(0);
    let raw_src_idx = store.read_block(&src_idx_path, dst_rebase, src_idx_count, 4)?;
    let src_idx: Vec<u32> = raw_src_idx.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();

    tracing::debug!(block_base = bin.offset, edge_base, edges = src_idx.len(), "projection slice read");
    Ok(ProjectionSlice {
        dst_blk_ptr,
        dst_blk_idx,
        dst_ptr,
        src_idx,
        block_base: bin.offset,
        edge_base,
    })
}

/// Encodes an in-memory edge map for one rank's contiguous destination
/// range `[dst_start, dst_start + dst_span)` into the four local arrays,
/// opening a new block whenever a destination with edges skips more than
/// one past the previous one.
pub fn encode_local(edges: &EdgeMap, dst_start: u64, dst_span: u64) -> (Vec<u64>, Vec<u32>, Vec<u64>, Vec<u32>) {
    let mut dst_blk_ptr = Vec::new();
    let mut dst_blk_idx = Vec::new();
    let mut dst_ptr = vec![0u64];
    let mut src_idx = Vec::new();

    let mut last_dst: Option<u64> = None;
    for local_dst in 0..dst_span {
        let global_dst = dst_start + local_dst;
        let Some(edge) = edges.get(&(global_dst as u32)) else { continue };
        if edge.src_ids.is_empty() {
            continue;
        }
        if last_dst.map(|d| local_dst > d + 1).unwrap_or(true) {
            dst_blk_idx.push(local_dst as u32);
            dst_blk_ptr.push((dst_ptr.len() - 1) as u64);
        }
        let mut sorted = edge.src_ids.clone();
        sorted.sort_unstable();
        src_idx.extend(sorted);
        let prev = *dst_ptr.last().unwrap();
        dst_ptr.push(prev + edge.src_ids.len() as u64);
        last_dst = Some(local_dst);
    }
    // Close the block-pointer array with a sentinel equal to the total
    // destination-with-edges count, mirroring `dst_ptr`'s own leading-zero
    // and trailing-total convention.
    dst_blk_ptr.push((dst_ptr.len() - 1) as u64);
    (dst_blk_ptr, dst_blk_idx, dst_ptr, src_idx)
}

/// Encodes one declared edge attribute's values into the same per-rank,
/// per-destination order `encode_local` lays `src_idx` out in: each
/// destination's source ids are sorted ascending before being written, so
/// this pairs every value with its source id and sorts by the same key,
/// keeping value `i` aligned with `src_idx[i]`.
///
/// Every destination in `edges` with a non-empty `src_ids` must carry a
/// `(attr_name, values)` entry in `attrs` with one value per source id;
/// this mirrors the invariant `encode_local` itself relies on (every
/// `EdgeRecord` in the map is fully formed before encoding).
pub fn encode_local_attr(edges: &EdgeMap, dst_start: u64, dst_span: u64, attr_name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for local_dst in 0..dst_span {
        let global_dst = dst_start + local_dst;
        let Some(edge) = edges.get(&(global_dst as u32)) else { continue };
        if edge.src_ids.is_empty() {
            continue;
        }
        let values = edge
            .attrs
            .iter()
            .find(|(name, _)| name == attr_name)
            .map(|(_, values)| values)
            .ok_or_else(|| Error::InvalidArgument(format!("destination {global_dst} is missing edge attribute {attr_name:?}")))?;
        if values.len() != edge.src_ids.len() {
            return Err(Error::InvalidArgument(format!(
                "destination {global_dst}: edge attribute {attr_name:?} has {} values for {} edges",
                values.len(),
                edge.src_ids.len()
            )));
        }
        let mut paired: Vec<(u32, cellmesh_common::ElementValue)> =
            edge.src_ids.iter().copied().zip(values.iter().copied()).collect();
        paired.sort_unstable_by_key(|(src_id, _)| *src_id);
        for (_, value) in paired {
            out.extend(value.to_le_bytes());
        }
    }
    Ok(out)
}

/// Writes one rank's local arrays (from `encode_local`) to the
/// `dst_pop ← src_pop` projection, rebasing them forward by the global
/// prefix sums negotiated across the group.
pub fn write<G: ProcessGroup>(
    group: &G,
    store: &dyn BlockStore,
    dst_pop: &str,
    src_pop: &str,
    dst_pop_index: u16,
    src_pop_index: u16,
    local_blk_ptr: &[u64],
    local_blk_idx: &[u32],
    local_dst_ptr: &[u64],
    local_src_idx: &[u32],
    edge_attrs: &[(AttributeDescriptor, Vec<u8>)],
) -> Result<()> {
    let _span = tracing::debug_span!("projection::write", rank = group.rank(), dst_pop, src_pop).entered();
    let blk_ptr_path = path::projection_dataset(dst_pop, src_pop, path::DST_BLK_PTR);
    let blk_idx_path = path::projection_dataset(dst_pop, src_pop, path::DST_BLK_IDX);
    let dst_ptr_path = path::projection_dataset(dst_pop, src_pop, path::DST_PTR);
    let src_idx_path = path::projection_dataset(dst_pop, src_pop, path::SRC_IDX);
    let src_pop_path = path::projection_dataset(dst_pop, src_pop, path::SRC_POP);
    let dst_pop_path = path::projection_dataset(dst_pop, src_pop, path::DST_POP);

    let blk_neg = negotiate_with_last_rank_tail(group, local_blk_ptr.len() as u64 - 1);
    let edge_neg = negotiate_with_last_rank_tail(group, local_dst_ptr.len() as u64 - 1);

    let rebased_blk_ptr: Vec<u64> = local_blk_ptr.iter().map(|p| p + blk_neg.global_offset).collect();
    let rebased_dst_ptr: Vec<u64> = local_dst_ptr.iter().map(|p| p + edge_neg.global_offset).collect();

    store.write_block(
        &blk_ptr_path,
        blk_neg.global_total,
        blk_neg.global_offset,
        rebased_blk_ptr.len() as u64,
        &rebased_blk_ptr.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>(),
        8,
    )?;
    store.write_block(
        &blk_idx_path,
        blk_neg.global_total - 1,
        blk_neg.global_offset,
        local_blk_idx.len() as u64,
        &local_blk_idx.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>(),
        4,
    )?;
    store.write_block(
        &dst_ptr_path,
        edge_neg.global_total,
        edge_neg.global_offset,
        rebased_dst_ptr.len() as u64,
        &rebased_dst_ptr.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>(),
        8,
    )?;

    let src_neg = cellmesh_collective::negotiate(group, local_src_idx.len() as u64, false);
    store.write_block(
        &src_idx_path,
        src_neg.global_total,
        src_neg.global_offset,
        local_src_idx.len() as u64,
        &local_src_idx.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>(),
        4,
    )?;

    // Edge attributes are purely positional, aligned 1:1 with `src_idx`, so
    // they are written using the exact same negotiated prefix sum rather
    // than their own independent one.
    for (descriptor, bytes) in edge_attrs {
        let width = descriptor.element_kind.byte_width();
        if bytes.len() != local_src_idx.len() * width {
            return Err(Error::InvalidArgument(format!(
                "edge attribute {:?}: {} bytes given for {} edges at width {width}",
                descriptor.name,
                bytes.len(),
                local_src_idx.len()
            )));
        }
        let attr_path = path::projection_attribute_dataset(dst_pop, src_pop, &descriptor.namespace, &descriptor.name);
        store.write_block(&attr_path, src_neg.global_total, src_neg.global_offset, local_src_idx.len() as u64, bytes, width)?;
    }

    tracing::debug!(
        blk_offset = blk_neg.global_offset,
        edge_offset = edge_neg.global_offset,
        bytes_moved = local_src_idx.len() * 4 + local_dst_ptr.len() * 8 + local_blk_ptr.len() * 8,
        "projection slice written"
    );

    if group.rank() == 0 {
        store.write_block(&src_pop_path, 1, 0, 1, &(src_pop_index as u32).to_le_bytes(), 4)?;
        store.write_block(&dst_pop_path, 1, 0, 1, &(dst_pop_index as u32).to_le_bytes(), 4)?;
    }

    Ok(())
}

/// Reads one declared edge attribute's values for this rank's window,
/// aligned 1:1 with `slice.src_idx` (same `edge_base`/count), per the
/// negotiated prefix sum `write` used to lay it out.
pub fn read_edge_attribute(
    store: &dyn BlockStore,
    dst_pop: &str,
    src_pop: &str,
    descriptor: &AttributeDescriptor,
    slice: &ProjectionSlice,
) -> Result<Vec<u8>> {
    let attr_path = path::projection_attribute_dataset(dst_pop, src_pop, &descriptor.namespace, &descriptor.name);
    store.read_block(&attr_path, slice.edge_base, slice.src_idx.len() as u64, descriptor.element_kind.byte_width())
}

/// Resolves each query id's half-open `src_idx` interval, one entry per id
/// in query order — a destination with no incoming edges (or no block at
/// all) resolves to an empty `(x, x)` interval rather than being dropped,
/// so callers can always zip the result 1:1 against `dst_local_ids`.
fn resolve_dst_intervals(
    store: &dyn BlockStore,
    dst_pop: &str,
    src_pop: &str,
    dst_local_ids: &[u64],
) -> Result<Vec<(u64, u64)>> {
    let blk_idx_path = path::projection_dataset(dst_pop, src_pop, path::DST_BLK_IDX);
    let blk_ptr_path = path::projection_dataset(dst_pop, src_pop, path::DST_BLK_PTR);
    let dst_ptr_path = path::projection_dataset(dst_pop, src_pop, path::DST_PTR);

    let n_blocks = store.dataset_len(&blk_idx_path)?;
    let blk_idx_raw = store.read_block(&blk_idx_path, 0, n_blocks, 4)?;
    let blk_idx: Vec<u32> = blk_idx_raw.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();
    let blk_ptr_raw = store.read_block(&blk_ptr_path, 0, n_blocks + 1, 8)?;
    let blk_ptr: Vec<u64> = blk_ptr_raw.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect();
    let n_dst_ptr = store.dataset_len(&dst_ptr_path)?;

    let mut intervals = Vec::with_capacity(dst_local_ids.len());
    for &local_id in dst_local_ids {
        let block = match blk_idx.binary_search(&(local_id as u32)) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        };
        // A block only covers `[blk_idx[b], blk_idx[b] + block_size)`; past
        // that, `local_id` falls in the gap before the next block (if any)
        // and must not be read as if it belonged to this one.
        let dst_index = block
            .filter(|&b| {
                let within = local_id.saturating_sub(blk_idx[b] as u64);
                let block_size = blk_ptr[b + 1] - blk_ptr[b];
                blk_idx[b] as u64 <= local_id && within < block_size
            })
            .map(|b| blk_ptr[b] + (local_id - blk_idx[b] as u64));

        let interval = match dst_index {
            Some(idx) if idx + 1 <= n_dst_ptr => {
                let ptr_raw = store.read_block(&dst_ptr_path, idx, 2, 8)?;
                let lo = u64::from_le_bytes(ptr_raw[0..8].try_into().unwrap());
                let hi = u64::from_le_bytes(ptr_raw[8..16].try_into().unwrap());
                (lo, hi)
            }
            _ => (0, 0),
        };
        intervals.push(interval);
    }
    Ok(intervals)
}

/// Locates the half-open `src_idx` intervals covering a selection of
/// destination-local ids and returns a zero-based `selection_dst_ptr` over
/// their concatenation, one entry per id in `dst_local_ids` plus a final
/// upper bound — so `selection_dst_ptr[i]..selection_dst_ptr[i + 1]` is
/// always exactly query `i`'s own slice of the returned `src_idx`.
pub fn selection_read(
    store: &dyn BlockStore,
    dst_pop: &str,
    src_pop: &str,
    dst_local_ids: &[u64],
) -> Result<(Vec<u64>, Vec<u32>)> {
    let intervals = resolve_dst_intervals(store, dst_pop, src_pop, dst_local_ids)?;
    let src_idx_path = path::projection_dataset(dst_pop, src_pop, path::SRC_IDX);

    let mut selection_dst_ptr = vec![0u64];
    let mut src_idx = Vec::new();
    for (lo, hi) in intervals {
        if hi > lo {
            let bytes = store.read_block(&src_idx_path, lo, hi - lo, 4)?;
            src_idx.extend(bytes.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())));
        }
        let prev = *selection_dst_ptr.last().unwrap();
        selection_dst_ptr.push(prev + (hi - lo));
    }
    Ok((selection_dst_ptr, src_idx))
}

/// The [`selection_read`] counterpart for one declared edge attribute: the
/// returned bytes are positionally aligned with `selection_read`'s
/// `src_idx`, so the same `selection_dst_ptr` bounds each query's slice of
/// either array.
pub fn selection_read_edge_attribute(
    store: &dyn BlockStore,
    dst_pop: &str,
    src_pop: &str,
    descriptor: &AttributeDescriptor,
    dst_local_ids: &[u64],
) -> Result<Vec<u8>> {
    let intervals = resolve_dst_intervals(store, dst_pop, src_pop, dst_local_ids)?;
    let attr_path = path::projection_attribute_dataset(dst_pop, src_pop, &descriptor.namespace, &descriptor.name);
    let width = descriptor.element_kind.byte_width();

    let mut values = Vec::new();
    for (lo, hi) in intervals {
        if hi > lo {
            values.extend(store.read_block(&attr_path, lo, hi - lo, width)?);
        }
    }
    Ok(values)
}
