//! Builds an in-memory `EdgeMap` from a decoded projection slice, validating
//! every edge against the population registry as it goes. A validation
//! failure is fatal: malformed graph data should stop the job rather than
//! silently drop edges.

use crate::projection::ProjectionSlice;
use cellmesh_common::{ElementValue, Error, Result};
use cellmesh_model::{AttributeDescriptor, EdgeMap, EdgeRecord, PopulationRegistry};

/// Walks one rank's projection slice and assembles the edges it describes,
/// checking each source/destination pair against `registry`.
///
/// `dst_pop`/`src_pop` are the expected population indices for every edge in
/// this projection; `dst_start`/`src_start` translate the codec's
/// population-local ids back to global ids for the registry lookups and for
/// the keys of the returned map. `edge_attrs` is each declared edge
/// attribute's raw bytes for this rank's window, positionally aligned 1:1
/// with `slice.src_idx` (as produced by `projection::read_edge_attribute`);
/// each attribute's values are sliced out per destination and decoded
/// alongside that destination's `src_ids`.
pub fn assemble(
    slice: &ProjectionSlice,
    registry: &PopulationRegistry,
    dst_pop: u16,
    src_pop: u16,
    dst_start: u64,
    src_start: u64,
    edge_attrs: &[(AttributeDescriptor, Vec<u8>)],
) -> Result<EdgeMap> {
    if !registry.is_valid_pair(src_pop, dst_pop) {
        return Err(Error::ValidationFailed {
            src_global: src_pop as u32,
            dst_global: dst_pop as u32,
            reason: "population pair is not declared as a valid projection".into(),
        });
    }

    let decoded_attrs: Vec<(String, Vec<ElementValue>)> = edge_attrs
        .iter()
        .map(|(descriptor, bytes)| {
            let values = bytes
                .chunks_exact(descriptor.element_kind.byte_width())
                .map(|chunk| ElementValue::from_le_bytes(descriptor.element_kind, chunk))
                .collect();
            (descriptor.name.clone(), values)
        })
        .collect();

    let mut edges = EdgeMap::new();
    for (block, &local_block_start) in slice.dst_blk_idx.iter().enumerate() {
        let blk_ptr_lo = slice.dst_blk_ptr[block];
        let blk_ptr_hi = slice.dst_blk_ptr[block + 1];
        for (offset, ptr_index) in (blk_ptr_lo..blk_ptr_hi).enumerate() {
            let local_dst = local_block_start as u64 + offset as u64;
            let global_dst = dst_start + local_dst;

            let actual_dst_pop = registry.locate(global_dst)?;
            if actual_dst_pop != dst_pop {
                return Err(Error::ValidationFailed {
                    src_global: 0,
                    dst_global: global_dst as u32,
                    reason: format!("destination belongs to population {actual_dst_pop}, expected {dst_pop}"),
                });
            }

            let lo = slice.dst_ptr[ptr_index as usize] as usize;
            let hi = slice.dst_ptr[ptr_index as usize + 1] as usize;
            let mut src_ids = Vec::with_capacity(hi - lo);
            for &local_src in &slice.src_idx[lo..hi] {
                let global_src = src_start + local_src as u64;
                let actual_src_pop = registry.locate(global_src)?;
                if actual_src_pop != src_pop {
                    return Err(Error::ValidationFailed {
                        src_global: global_src as u32,
                        dst_global: global_dst as u32,
                        reason: format!("source belongs to population {actual_src_pop}, expected {src_pop}"),
                    });
                }
                src_ids.push(global_src as u32);
            }

            let attrs = decoded_attrs
                .iter()
                .map(|(name, values)| (name.clone(), values[lo..hi].to_vec()))
                .collect();

            edges.insert(global_dst as u32, EdgeRecord { src_ids, attrs });
        }
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_collective::LocalGroup;
    use cellmesh_io::{path, MemBlockStore};
    use cellmesh_model::PopulationRegistry;

    fn seeded_registry() -> (MemBlockStore, PopulationRegistry) {
        let store = MemBlockStore::new();
        let mut pops = Vec::new();
        for (pop, start, count) in [(0u16, 0u64, 10u32), (1, 10, 10)] {
            pops.extend_from_slice(&start.to_le_bytes());
            pops.extend_from_slice(&count.to_le_bytes());
            pops.extend_from_slice(&pop.to_le_bytes());
        }
        store.write_block(path::H5TYPES_POPULATIONS, 2, 0, 2, &pops, 14).unwrap();
        let mut labels = Vec::new();
        for (pop, label) in [(0u16, "MC"), (1, "GC")] {
            labels.extend_from_slice(&pop.to_le_bytes());
            labels.extend_from_slice(&(label.len() as u32).to_le_bytes());
            labels.extend_from_slice(label.as_bytes());
        }
        store.write_block(path::H5TYPES_POPULATION_LABELS, labels.len() as u64, 0, labels.len() as u64, &labels, 1).unwrap();
        let mut pairs = Vec::new();
        pairs.extend_from_slice(&0u16.to_le_bytes());
        pairs.extend_from_slice(&1u16.to_le_bytes());
        store.write_block(path::H5TYPES_POPULATION_PAIRS, 1, 0, 1, &pairs, 4).unwrap();

        let reg = LocalGroup::run(1, {
            let store = store.clone();
            move |g| PopulationRegistry::load(&g, &store).unwrap()
        })
        .pop()
        .unwrap()
        .unwrap();
        (store, reg)
    }

    fn sample_slice() -> ProjectionSlice {
        // one block starting at local dst 0, two destinations (0, 1), edges
        // from local src 0 and 1.
        ProjectionSlice {
            dst_blk_ptr: vec![0, 2],
            dst_blk_idx: vec![0],
            dst_ptr: vec![0, 1, 2],
            src_idx: vec![0, 1],
            block_base: 0,
            edge_base: 0,
        }
    }

    #[test]
    fn valid_projection_assembles_without_error() {
        // pop 0 = MC (source), pop 1 = GC (destination); the registry only
        // declares (src=0, dst=1) as a valid pair.
        let (_store, reg) = seeded_registry();
        let slice = sample_slice();
        let edges = assemble(&slice, &reg, 1, 0, 10, 0, &[]).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[&10].src_ids, vec![0]);
        assert_eq!(edges[&11].src_ids, vec![1]);
    }

    #[test]
    fn source_outside_declared_population_is_fatal() {
        let (_store, reg) = seeded_registry();
        let slice = sample_slice();
        // src_start=10 makes "source" ids collide with the destination (GC) population.
        let err = assemble(&slice, &reg, 1, 0, 10, 10, &[]).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed { .. }));
    }

    #[test]
    fn undeclared_population_pair_is_fatal() {
        let (_store, reg) = seeded_registry();
        let slice = sample_slice();
        let err = assemble(&slice, &reg, 0, 1, 0, 10, &[]).unwrap_err();
        assert!(matches!(err, Error::ValidationFailed { .. }));
    }

    #[test]
    fn edge_attribute_values_slice_out_per_destination() {
        use cellmesh_common::ElementKind;
        use cellmesh_model::AttributeDescriptor;

        let (_store, reg) = seeded_registry();
        let slice = sample_slice();
        let descriptor = AttributeDescriptor::owner("Connections", "GC", "weight", ElementKind::F32);
        let bytes: Vec<u8> = [1.0f32, 2.0f32].iter().flat_map(|v| v.to_le_bytes()).collect();
        let edges = assemble(&slice, &reg, 1, 0, 10, 0, &[(descriptor, bytes)]).unwrap();
        assert_eq!(edges[&10].attrs, vec![("weight".to_string(), vec![ElementValue::F32(1.0)])]);
        assert_eq!(edges[&11].attrs, vec![("weight".to_string(), vec![ElementValue::F32(2.0)])]);
    }
}
