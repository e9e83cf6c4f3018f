//! Collective append/read of `(cell_index, attr_ptr, attr_val)` triples,
//! the rebase transforms that keep pointers valid across ranks, and the
//! selection-read and grouped-append variants built on top.

use cellmesh_collective::{negotiate, negotiate_with_last_rank_tail, range_partition_rank, ProcessGroup};
use cellmesh_common::{Error, Result};
use cellmesh_io::{path, BlockStore};
use cellmesh_model::{AttributeDescriptor, Ownership};
use std::collections::HashMap;

/// The decoded, rebased slice one rank holds after a read.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrTriple {
    /// Global cell identifiers (local index + population start).
    pub cell_index: Vec<u32>,
    /// Zero-based over `attr_val` (rebased). `None` for a scalar-per-cell
    /// attribute with no pointer dataset.
    pub attr_ptr: Option<Vec<u64>>,
    pub attr_val: Vec<u8>,
}

fn paths(descriptor: &AttributeDescriptor) -> (String, String, String) {
    (
        path::cell_attribute_dataset(&descriptor.namespace, &descriptor.population, &descriptor.index_group, path::CELL_INDEX),
        path::cell_attribute_dataset(&descriptor.namespace, &descriptor.population, &descriptor.index_group, path::ATTR_PTR),
        path::cell_attribute_dataset(&descriptor.namespace, &descriptor.population, &descriptor.name, path::ATTR_VAL),
    )
}

/// Read this rank's window of the attribute triple. `window` is
/// `(offset, per_rank_count)`; `per_rank_count == 0` means "the rest of the
/// dataset, partitioned evenly". `None` reads the whole dataset from 0.
pub fn read<G: ProcessGroup>(
    group: &G,
    store: &dyn BlockStore,
    descriptor: &AttributeDescriptor,
    pop_start: u64,
    window: Option<(u64, u64)>,
) -> Result<AttrTriple> {
    let _span = tracing::debug_span!("attribute::read", rank = group.rank(), namespace = %descriptor.namespace, name = %descriptor.name).entered();
    let (index_path, ptr_path, val_path) = paths(descriptor);
    if !store.dataset_exists(&index_path) {
        return Err(Error::NotFound(index_path));
    }
    let has_ptr = store.dataset_exists(&ptr_path);
    let dataset_size = store.dataset_len(&index_path)?;
    let (offset, per_rank_count) = window.unwrap_or((0, 0));

    if offset >= dataset_size {
        return Ok(AttrTriple {
            cell_index: Vec::new(),
            attr_ptr: if has_ptr { Some(vec![0]) } else { None },
            attr_val: Vec::new(),
        });
    }

    let remaining = dataset_size - offset;
    let n = if per_rank_count > 0 {
        per_rank_count.saturating_mul(group.size() as u64).min(remaining)
    } else {
        remaining
    };
    let bin = range_partition_rank(n, group.size(), group.rank());
    let idx_start = offset + bin.offset;
    let idx_count = bin.len;

    let raw_index = store.read_block(&index_path, idx_start, idx_count, 4)?;
    let cell_index: Vec<u32> = raw_index
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()) + pop_start as u32)
        .collect();

    let (attr_ptr, value_start, value_len) = if has_ptr {
        let ptr_raw = store.read_block(&ptr_path, idx_start, idx_count + 1, 8)?;
        let mut ptr: Vec<u64> = ptr_raw.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect();
        let value_start = *ptr.first().unwrap_or(&0);
        let value_len = ptr.last().copied().unwrap_or(value_start) - value_start;
        for p in ptr.iter_mut() {
            *p -= value_start;
        }
        (Some(ptr), value_start, value_len)
    } else {
        (None, idx_start, idx_count)
    };

    let val_dataset_len = store.dataset_len(&val_path)?;
    if value_start + value_len > val_dataset_len {
        return Err(Error::Truncated(format!(
            "{val_path}: pointer range [{value_start}, {}) exceeds value dataset size {val_dataset_len}",
            value_start + value_len
        )));
    }
    let attr_val = store.read_block(&val_path, value_start, value_len, descriptor.element_kind.byte_width())?;

    tracing::debug!(idx_start, idx_count, value_start, value_len, "attribute slice read");
    Ok(AttrTriple { cell_index, attr_ptr, attr_val })
}

/// Read the attribute values for an explicit, ordered list of global cell
/// ids. A missing id is fatal. Returns a zero-based `selection_ptr` of
/// `selection.len() + 1` entries and the concatenated values.
pub fn selection_read(
    store: &dyn BlockStore,
    descriptor: &AttributeDescriptor,
    pop_start: u64,
    selection: &[u64],
) -> Result<(Vec<u64>, Vec<u8>)> {
    let (index_path, ptr_path, val_path) = paths(descriptor);
    if !store.dataset_exists(&index_path) {
        return Err(Error::NotFound(index_path));
    }
    let n = store.dataset_len(&index_path)?;
    let index_raw = store.read_block(&index_path, 0, n, 4)?;
    let index: Vec<u32> = index_raw.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();

    let has_ptr = store.dataset_exists(&ptr_path);
    let ptr: Option<Vec<u64>> = if has_ptr {
        let ptr_raw = store.read_block(&ptr_path, 0, n + 1, 8)?;
        Some(ptr_raw.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect())
    } else {
        None
    };

    let width = descriptor.element_kind.byte_width();
    let mut selection_ptr = vec![0u64];
    let mut values = Vec::new();
    for &global_id in selection {
        let local = global_id
            .checked_sub(pop_start)
            .ok_or_else(|| Error::NotFound(format!("cell {global_id} precedes this attribute's population")))?;
        let pos = index
            .iter()
            .position(|&v| v as u64 == local)
            .ok_or_else(|| Error::NotFound(format!("cell {global_id} missing from attribute index")))?;
        let (lo, hi) = match &ptr {
            Some(p) => (p[pos], p[pos + 1]),
            None => (pos as u64, pos as u64 + 1),
        };
        let bytes = store.read_block(&val_path, lo, hi - lo, width)?;
        values.extend_from_slice(&bytes);
        let prev = *selection_ptr.last().unwrap();
        selection_ptr.push(prev + (hi - lo));
    }
    Ok((selection_ptr, values))
}

/// Extends the three datasets of the triple. `local_index.len() + 1 ==
/// local_ptr.len()` when the attribute has a pointer (`local_ptr` in the
/// caller's canonical zero-based form); `local_val.len()` must equal the
/// element-width-scaled `local_ptr.back()`, or `local_index.len()` when
/// there is no pointer.
pub fn append<G: ProcessGroup>(
    group: &G,
    store: &dyn BlockStore,
    descriptor: &AttributeDescriptor,
    local_index: &[u32],
    local_ptr: Option<&[u64]>,
    local_val: &[u8],
) -> Result<()> {
    let _span = tracing::debug_span!("attribute::append", rank = group.rank(), namespace = %descriptor.namespace, name = %descriptor.name).entered();
    let (index_path, ptr_path, val_path) = paths(descriptor);
    let width = descriptor.element_kind.byte_width();
    if local_val.len() % width != 0 {
        return Err(Error::InvalidArgument(format!(
            "{val_path}: value buffer length {} is not a multiple of element width {width}",
            local_val.len()
        )));
    }

    let index_neg = negotiate(group, local_index.len() as u64, false);
    let value_neg = negotiate(group, (local_val.len() / width) as u64, false);
    let existing_value_size = store.dataset_len(&val_path)?;

    if descriptor.index_ownership == Ownership::Owner {
        let existing_index_size = store.dataset_len(&index_path)?;
        let index_bytes: Vec<u8> = local_index.iter().flat_map(|v| v.to_le_bytes()).collect();
        store.write_block(
            &index_path,
            existing_index_size + index_neg.global_total,
            existing_index_size + index_neg.global_offset,
            local_index.len() as u64,
            &index_bytes,
            4,
        )?;
    }

    if descriptor.ptr_ownership == Ownership::Owner {
        let local_ptr = local_ptr.ok_or_else(|| Error::InvalidArgument(format!("{ptr_path}: owner attribute requires a pointer array")))?;
        let local_ptr_size = local_ptr.len() as u64 - 1;
        let ptr_neg = negotiate_with_last_rank_tail(group, local_ptr_size);
        let existing_ptr_size = store.dataset_len(&ptr_path)?;

        let rebased: Vec<u64> = local_ptr.iter().map(|p| p + ptr_neg.global_offset + existing_value_size).collect();
        let (write_offset, write_slice): (u64, &[u64]) = if existing_ptr_size > 0 {
            (existing_ptr_size - 1, &rebased[1..])
        } else {
            (0, &rebased[..])
        };
        let ptr_bytes: Vec<u8> = write_slice.iter().flat_map(|v| v.to_le_bytes()).collect();
        let new_ptr_size = if existing_ptr_size > 0 {
            existing_ptr_size + write_slice.len() as u64
        } else {
            ptr_neg.global_total
        };
        store.write_block(&ptr_path, new_ptr_size, write_offset, write_slice.len() as u64, &ptr_bytes, 8)?;
    }

    store.write_block(
        &val_path,
        existing_value_size + value_neg.global_total,
        existing_value_size + value_neg.global_offset,
        (local_val.len() / width) as u64,
        local_val,
        width,
    )?;

    tracing::debug!(
        index_offset = index_neg.global_offset,
        value_offset = value_neg.global_offset,
        bytes_moved = local_val.len(),
        "attribute append written"
    );
    Ok(())
}

/// Compacts a `cell_id → values` mapping into local `(index, ptr, value)`
/// arrays in iteration order and appends it via `append`. This is the
/// single-rank half of the grouped-append algorithm; the I/O-rank
/// selection and the all-to-all-v redistribution live in the facade and
/// `cellmesh-collective::scatter`.
pub fn append_map<G: ProcessGroup>(
    group: &G,
    store: &dyn BlockStore,
    descriptor: &AttributeDescriptor,
    pop_start: u64,
    values: &HashMap<u32, Vec<u8>>,
) -> Result<()> {
    let width = descriptor.element_kind.byte_width();
    let mut local_index = Vec::with_capacity(values.len());
    let mut local_ptr = vec![0u64];
    let mut local_val = Vec::new();
    for (&cell_id, bytes) in values {
        if bytes.len() % width != 0 {
            return Err(Error::InvalidArgument(format!(
                "cell {cell_id}: value buffer length {} is not a multiple of element width {width}",
                bytes.len()
            )));
        }
        local_index.push(
            (cell_id as u64)
                .checked_sub(pop_start)
                .ok_or_else(|| Error::InvalidArgument(format!("cell {cell_id} precedes population start {pop_start}")))? as u32,
        );
        local_val.extend_from_slice(bytes);
        let prev = *local_ptr.last().unwrap();
        local_ptr.push(prev + (bytes.len() / width) as u64);
    }
    append(group, store, descriptor, &local_index, Some(&local_ptr), &local_val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_collective::LocalGroup;
    use cellmesh_common::ElementKind;
    use cellmesh_io::MemBlockStore;

    #[test]
    fn append_then_read_round_trips_across_ranks() {
        let store = MemBlockStore::new();
        let descriptor = AttributeDescriptor::owner("Synapse Attributes", "GC", "weight", ElementKind::F32);

        LocalGroup::run(3, {
            let store = store.clone();
            let descriptor = descriptor.clone();
            move |g| {
                let local_index = vec![g.rank() as u32];
                let local_ptr = vec![0u64, 1];
                let local_val = (g.rank() as f32).to_le_bytes().to_vec();
                append(&g, &store, &descriptor, &local_index, Some(&local_ptr), &local_val).unwrap();
            }
        })
        .into_iter()
        .for_each(|r| r.unwrap());

        let results = LocalGroup::run(2, {
            let store = store.clone();
            let descriptor = descriptor.clone();
            move |g| read(&g, &store, &descriptor, 0, None).unwrap()
        });
        let got: Vec<AttrTriple> = results.into_iter().map(|r| r.unwrap()).collect();
        let total_cells: usize = got.iter().map(|t| t.cell_index.len()).sum();
        assert_eq!(total_cells, 3);
        for t in &got {
            assert_eq!(t.attr_ptr.as_ref().unwrap()[0], 0);
        }
    }

    #[test]
    fn second_append_overwrites_shared_closing_offset() {
        let store = MemBlockStore::new();
        let descriptor = AttributeDescriptor::owner("Synapse Attributes", "GC", "weight", ElementKind::F32);

        LocalGroup::run(1, {
            let store = store.clone();
            let descriptor = descriptor.clone();
            move |g| {
                append(&g, &store, &descriptor, &[0], Some(&[0, 1]), &1.0f32.to_le_bytes()).unwrap();
                append(&g, &store, &descriptor, &[1], Some(&[0, 1]), &2.0f32.to_le_bytes()).unwrap();
            }
        })[0]
            .as_ref()
            .unwrap();

        let (_, ptr_path, _) = paths(&descriptor);
        assert_eq!(store.dataset_len(&ptr_path).unwrap(), 3);
        let ptr_bytes = store.read_block(&ptr_path, 0, 3, 8).unwrap();
        let ptr: Vec<u64> = ptr_bytes.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect();
        assert_eq!(ptr, vec![0, 1, 2]);
    }

    #[test]
    fn selection_read_preserves_query_order() {
        let store = MemBlockStore::new();
        let descriptor = AttributeDescriptor::owner("Synapse Attributes", "GC", "weight", ElementKind::F32);
        LocalGroup::run(1, {
            let store = store.clone();
            let descriptor = descriptor.clone();
            move |g| {
                let vals: Vec<u8> = [10.0f32, 20.0, 30.0].iter().flat_map(|v| v.to_le_bytes()).collect();
                append(&g, &store, &descriptor, &[5, 6, 7], Some(&[0, 1, 2, 3]), &vals).unwrap();
            }
        });

        let (sel_ptr, values) = selection_read(&store, &descriptor, 0, &[7, 5]).unwrap();
        assert_eq!(sel_ptr, vec![0, 1, 2]);
        let floats: Vec<f32> = values.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect();
        assert_eq!(floats, vec![30.0, 10.0]);
    }

    #[test]
    fn read_past_dataset_end_is_empty_not_fatal() {
        let store = MemBlockStore::new();
        let descriptor = AttributeDescriptor::owner("Synapse Attributes", "GC", "weight", ElementKind::F32);
        LocalGroup::run(1, {
            let store = store.clone();
            let descriptor = descriptor.clone();
            move |g| append(&g, &store, &descriptor, &[0], Some(&[0, 1]), &1.0f32.to_le_bytes()).unwrap()
        });

        let results = LocalGroup::run(1, {
            let store = store.clone();
            let descriptor = descriptor.clone();
            move |g| read(&g, &store, &descriptor, 0, Some((5, 1))).unwrap()
        });
        let t = results[0].as_ref().unwrap();
        assert!(t.cell_index.is_empty());
    }

    #[test]
    fn append_map_round_trips_through_grouped_form() {
        let store = MemBlockStore::new();
        let descriptor = AttributeDescriptor::owner("Synapse Attributes", "GC", "weight", ElementKind::F32);
        let mut values = HashMap::new();
        values.insert(3u32, 1.5f32.to_le_bytes().to_vec());
        values.insert(7u32, 2.5f32.to_le_bytes().to_vec());

        LocalGroup::run(1, {
            let store = store.clone();
            let descriptor = descriptor.clone();
            let values = values.clone();
            move |g| append_map(&g, &store, &descriptor, 0, &values).unwrap()
        });

        let results = LocalGroup::run(1, {
            let store = store.clone();
            let descriptor = descriptor.clone();
            move |g| read(&g, &store, &descriptor, 0, None).unwrap()
        });
        let t = results[0].as_ref().unwrap();
        assert_eq!(t.cell_index.len(), 2);
    }
}
