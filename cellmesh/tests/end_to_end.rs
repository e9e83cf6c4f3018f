//! The six end-to-end scenarios covering the full read/write/scatter
//! surface: the smallest possible projection, a rebase-boundary crossing,
//! an empty-selection scatter, an attribute-map round trip, a population
//! validation failure, and the size-protocol's "+1 tail" rule.

use cellmesh_collective::{negotiate_with_last_rank_tail, LocalGroup};
use cellmesh_common::{Error, ElementKind};
use cellmesh_graph::attribute;
use cellmesh_io::{path, MemBlockStore};
use cellmesh_model::{AttributeDescriptor, EdgeMap, EdgeRecord, PopulationRegistry};
use std::collections::HashMap;
use std::sync::Arc;

fn seed_registry(store: &MemBlockStore, populations: &[(u16, u64, u32, &str)], pairs: &[(u16, u16)]) {
    let mut pops = Vec::new();
    for &(pop, start, count, _) in populations {
        pops.extend_from_slice(&start.to_le_bytes());
        pops.extend_from_slice(&count.to_le_bytes());
        pops.extend_from_slice(&pop.to_le_bytes());
    }
    store
        .write_block(path::H5TYPES_POPULATIONS, populations.len() as u64, 0, populations.len() as u64, &pops, 14)
        .unwrap();

    let mut labels = Vec::new();
    for &(pop, _, _, label) in populations {
        labels.extend_from_slice(&pop.to_le_bytes());
        labels.extend_from_slice(&(label.len() as u32).to_le_bytes());
        labels.extend_from_slice(label.as_bytes());
    }
    store
        .write_block(path::H5TYPES_POPULATION_LABELS, labels.len() as u64, 0, labels.len() as u64, &labels, 1)
        .unwrap();

    let mut pair_bytes = Vec::new();
    for &(src, dst) in pairs {
        pair_bytes.extend_from_slice(&src.to_le_bytes());
        pair_bytes.extend_from_slice(&dst.to_le_bytes());
    }
    store
        .write_block(path::H5TYPES_POPULATION_PAIRS, pairs.len() as u64, 0, pairs.len() as u64, &pair_bytes, 4)
        .unwrap();
}

fn load_registry(store: &MemBlockStore) -> PopulationRegistry {
    LocalGroup::run(1, {
        let store = store.clone();
        move |g| PopulationRegistry::load(&g, &store).unwrap()
    })
    .pop()
    .unwrap()
    .unwrap()
}

#[test]
fn smallest_projection_round_trips_and_matches_exact_arrays() {
    // dst = GC [0,5), src = MC [4,8). Global edges 4->1, 4->2, 6->4: dst 1
    // and 2 are adjacent (one block), dst 3 is empty so dst 4 opens a new
    // block even though it immediately follows the first block's end.
    let store = MemBlockStore::new();
    seed_registry(
        &store,
        &[(0u16, 4u64, 4u32, "MC"), (1, 0, 5, "GC")],
        &[(0, 1)],
    );
    let registry = load_registry(&store);

    let mut edges = EdgeMap::new();
    edges.insert(1, EdgeRecord { src_ids: vec![4], attrs: vec![] });
    edges.insert(2, EdgeRecord { src_ids: vec![4], attrs: vec![] });
    edges.insert(4, EdgeRecord { src_ids: vec![6], attrs: vec![] });

    LocalGroup::run(1, {
        let store = store.clone();
        let local_edges = edges.clone();
        move |g| {
            let session = cellmesh_collective::Session::new(g, Arc::new(store.clone()) as Arc<dyn cellmesh_io::BlockStore>);
            cellmesh::write_graph(&session, &load_registry(&store), "GC", "MC", &local_edges, &[]).unwrap();
        }
    });

    // Low-level codec check: exact arrays as specified.
    let slices = LocalGroup::run(1, {
        let store = store.clone();
        move |g| cellmesh_graph::projection::read(&g, &store, "GC", "MC").unwrap()
    });
    let slice = slices[0].as_ref().unwrap();
    assert_eq!(slice.dst_blk_idx, vec![1, 4]);
    assert_eq!(slice.dst_blk_ptr, vec![0, 2, 3]);
    assert_eq!(slice.dst_ptr, vec![0, 1, 2, 3]);
    assert_eq!(slice.src_idx, vec![0, 0, 2]);

    // Facade-level check: decoded map equals the input regardless of rank.
    let results = LocalGroup::run(2, {
        let store = store.clone();
        let registry = registry.clone();
        move |g| {
            let session = cellmesh_collective::Session::new(g, Arc::new(store.clone()) as Arc<dyn cellmesh_io::BlockStore>);
            cellmesh::read_graph(&session, &registry, "GC", "MC", &[]).unwrap()
        }
    });
    for r in results {
        let map = r.unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map[&1].src_ids, vec![4]);
        assert_eq!(map[&2].src_ids, vec![4]);
        assert_eq!(map[&4].src_ids, vec![6]);
    }
}

#[test]
fn edge_attributes_round_trip_through_write_and_read_graph() {
    let store = MemBlockStore::new();
    seed_registry(
        &store,
        &[(0u16, 4u64, 4u32, "MC"), (1, 0, 5, "GC")],
        &[(0, 1)],
    );
    let registry = load_registry(&store);
    let weight = AttributeDescriptor::owner("Connections", "GC", "weight", ElementKind::F32);

    let mut edges = EdgeMap::new();
    edges.insert(
        1,
        EdgeRecord {
            src_ids: vec![4, 6],
            attrs: vec![("weight".into(), vec![cellmesh_common::ElementValue::F32(1.5), cellmesh_common::ElementValue::F32(2.5)])],
        },
    );
    edges.insert(
        2,
        EdgeRecord {
            src_ids: vec![7],
            attrs: vec![("weight".into(), vec![cellmesh_common::ElementValue::F32(9.0)])],
        },
    );

    LocalGroup::run(1, {
        let store = store.clone();
        let registry = registry.clone();
        let weight = weight.clone();
        let edges = edges.clone();
        move |g| {
            let session = cellmesh_collective::Session::new(g, Arc::new(store.clone()) as Arc<dyn cellmesh_io::BlockStore>);
            cellmesh::write_graph(&session, &registry, "GC", "MC", &edges, std::slice::from_ref(&weight)).unwrap();
        }
    });

    let results = LocalGroup::run(2, {
        let store = store.clone();
        let registry = registry.clone();
        let weight = weight.clone();
        move |g| {
            let session = cellmesh_collective::Session::new(g, Arc::new(store.clone()) as Arc<dyn cellmesh_io::BlockStore>);
            cellmesh::read_graph(&session, &registry, "GC", "MC", std::slice::from_ref(&weight)).unwrap()
        }
    });
    for r in results {
        let map = r.unwrap();
        // `src_ids` and `attrs` are sorted together by source id on write,
        // so dst 1's pair comes back as (4, 1.5), (6, 2.5) regardless of
        // the order the caller declared them in.
        assert_eq!(map[&1].src_ids, vec![4, 6]);
        assert_eq!(
            map[&1].attrs,
            vec![("weight".to_string(), vec![cellmesh_common::ElementValue::F32(1.5), cellmesh_common::ElementValue::F32(2.5)])]
        );
        assert_eq!(map[&2].src_ids, vec![7]);
        assert_eq!(map[&2].attrs, vec![("weight".to_string(), vec![cellmesh_common::ElementValue::F32(9.0)])]);
    }
}

#[test]
fn scatter_read_edges_delivers_selected_destinations_with_attributes() {
    let store = MemBlockStore::new();
    seed_registry(
        &store,
        &[(0u16, 4u64, 4u32, "MC"), (1, 0, 5, "GC")],
        &[(0, 1)],
    );
    let registry = load_registry(&store);
    let weight = AttributeDescriptor::owner("Connections", "GC", "weight", ElementKind::F32);

    let mut edges = EdgeMap::new();
    edges.insert(
        1,
        EdgeRecord {
            src_ids: vec![4, 6],
            attrs: vec![("weight".into(), vec![cellmesh_common::ElementValue::F32(1.5), cellmesh_common::ElementValue::F32(2.5)])],
        },
    );
    edges.insert(
        2,
        EdgeRecord {
            src_ids: vec![7],
            attrs: vec![("weight".into(), vec![cellmesh_common::ElementValue::F32(9.0)])],
        },
    );

    LocalGroup::run(1, {
        let store = store.clone();
        let registry = registry.clone();
        let weight = weight.clone();
        let edges = edges.clone();
        move |g| {
            let session = cellmesh_collective::Session::new(g, Arc::new(store.clone()) as Arc<dyn cellmesh_io::BlockStore>);
            cellmesh::write_graph(&session, &registry, "GC", "MC", &edges, std::slice::from_ref(&weight)).unwrap();
        }
    });

    // a single rank acts as both the lone I/O rank and the sole owner of
    // both destinations, so the all-to-all in `scatter_after_read` is a
    // no-op exchange with itself.
    let mut node_rank_map = HashMap::new();
    node_rank_map.insert(1u32, vec![0usize]);
    node_rank_map.insert(2u32, vec![0usize]);

    let results = LocalGroup::run(1, {
        let store = store.clone();
        let registry = registry.clone();
        let weight = weight.clone();
        let node_rank_map = node_rank_map.clone();
        move |g| {
            let session = cellmesh_collective::Session::new(g, Arc::new(store.clone()) as Arc<dyn cellmesh_io::BlockStore>);
            cellmesh::scatter_read_edges(
                &session,
                &registry,
                "GC",
                "MC",
                1,
                &[1, 2],
                std::slice::from_ref(&weight),
                &node_rank_map,
            )
            .unwrap()
        }
    });
    for r in results {
        let map = r.unwrap();
        assert_eq!(map[&1].src_ids, vec![4, 6]);
        assert_eq!(
            map[&1].attrs,
            vec![("weight".to_string(), vec![cellmesh_common::ElementValue::F32(1.5), cellmesh_common::ElementValue::F32(2.5)])]
        );
        assert_eq!(map[&2].src_ids, vec![7]);
        assert_eq!(map[&2].attrs, vec![("weight".to_string(), vec![cellmesh_common::ElementValue::F32(9.0)])]);
    }
}

#[test]
fn rebase_boundary_splits_blocks_and_edges_across_two_ranks() {
    let store = MemBlockStore::new();
    let mut edges = EdgeMap::new();
    edges.insert(0, EdgeRecord { src_ids: vec![100, 101], attrs: vec![] });
    edges.insert(2, EdgeRecord { src_ids: vec![102], attrs: vec![] });
    edges.insert(5, EdgeRecord { src_ids: vec![103, 104, 105, 106], attrs: vec![] });
    edges.insert(8, EdgeRecord { src_ids: vec![107, 108, 109], attrs: vec![] });

    let (blk_ptr, blk_idx, dst_ptr, src_idx) = cellmesh_graph::projection::encode_local(&edges, 0, 10);
    assert_eq!(blk_idx, vec![0, 2, 5, 8]);

    LocalGroup::run(1, {
        let store = store.clone();
        move |g| cellmesh_graph::projection::write(&g, &store, "GC", "MC", 1, 0, &blk_ptr, &blk_idx, &dst_ptr, &src_idx, &[]).unwrap()
    });

    let slices = LocalGroup::run(2, {
        let store = store.clone();
        move |g| cellmesh_graph::projection::read(&g, &store, "GC", "MC").unwrap()
    });
    let results: Vec<_> = slices.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(results[0].edge_base, 0);
    assert_eq!(results[1].edge_base, 3);

    let mut concatenated = results[0].src_idx.clone();
    concatenated.extend(results[1].src_idx.clone());
    assert_eq!(concatenated, vec![100, 101, 102, 103, 104, 105, 106, 107, 108, 109]);
}

#[test]
fn empty_selection_excludes_rank_from_the_collective_read() {
    let store = MemBlockStore::new();
    seed_registry(
        &store,
        &[(0u16, 10u64, 10u32, "MC"), (1, 0, 10, "GC")],
        &[(0, 1)],
    );
    let registry = load_registry(&store);

    let mut edges = EdgeMap::new();
    edges.insert(5, EdgeRecord { src_ids: vec![10, 11], attrs: vec![] });
    edges.insert(6, EdgeRecord { src_ids: vec![12], attrs: vec![] });
    LocalGroup::run(1, {
        let store = store.clone();
        let registry = registry.clone();
        let edges = edges.clone();
        move |g| {
            let session = cellmesh_collective::Session::new(g, Arc::new(store.clone()) as Arc<dyn cellmesh_io::BlockStore>);
            cellmesh::write_graph(&session, &registry, "GC", "MC", &edges, &[]).unwrap();
        }
    });

    let results = LocalGroup::run(2, {
        let store = store.clone();
        let registry = registry.clone();
        move |g| {
            let selection: Vec<u64> = if g.rank() == 0 { vec![] } else { vec![5, 6] };
            let session = cellmesh_collective::Session::new(g, Arc::new(store.clone()) as Arc<dyn cellmesh_io::BlockStore>);
            cellmesh::scatter_read_graph(&session, &registry, "GC", "MC", &selection, &[]).unwrap()
        }
    });
    let got: Vec<EdgeMap> = results.into_iter().map(|r| r.unwrap()).collect();
    assert!(got[0].is_empty());
    assert_eq!(got[1].len(), 2);
    assert_eq!(got[1][&5].src_ids, vec![10, 11]);
    assert_eq!(got[1][&6].src_ids, vec![12]);
}

#[test]
fn attribute_map_round_trips_through_grouped_append() {
    let store = MemBlockStore::new();
    let descriptor = AttributeDescriptor::owner("Synapse Attributes", "GC", "weight", ElementKind::F32);
    let mut per_rank: HashMap<usize, HashMap<u32, Vec<u8>>> = HashMap::new();
    per_rank.insert(0, HashMap::from([(3u32, [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>())]));
    per_rank.insert(1, HashMap::from([(5u32, Vec::new())]));
    per_rank.insert(2, HashMap::from([(7u32, 9.0f32.to_le_bytes().to_vec())]));
    per_rank.insert(3, HashMap::new());

    LocalGroup::run(4, {
        let store = store.clone();
        let descriptor = descriptor.clone();
        let per_rank = per_rank.clone();
        move |g| {
            let session = cellmesh_collective::Session::new(g, Arc::new(store.clone()) as Arc<dyn cellmesh_io::BlockStore>);
            let local = per_rank[&session.rank()].clone();
            cellmesh::append_cell_attribute_map(&session, &descriptor, 0, 2, &local).unwrap();
        }
    })
    .into_iter()
    .for_each(|r| r.unwrap());

    let triples = LocalGroup::run(1, {
        let store = store.clone();
        let descriptor = descriptor.clone();
        move |g| attribute::read(&g, &store, &descriptor, 0, None).unwrap()
    });
    let triple = triples[0].as_ref().unwrap();
    let ptr = triple.attr_ptr.as_ref().unwrap();

    let mut observed: HashMap<u32, Vec<u8>> = HashMap::new();
    for (i, &cell_id) in triple.cell_index.iter().enumerate() {
        let lo = ptr[i] as usize * 4;
        let hi = ptr[i + 1] as usize * 4;
        observed.insert(cell_id, triple.attr_val[lo..hi].to_vec());
    }

    let mut expected: HashMap<u32, Vec<u8>> = HashMap::new();
    expected.insert(3, [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect());
    expected.insert(5, Vec::new());
    expected.insert(7, 9.0f32.to_le_bytes().to_vec());
    assert_eq!(observed, expected);
}

#[test]
fn out_of_population_source_is_a_fatal_validation_error_on_every_rank() {
    let store = MemBlockStore::new();
    // MC [0,10), GC [10,20); (src=MC, dst=GC) is the only declared pair.
    seed_registry(&store, &[(0u16, 0u64, 10u32, "MC"), (1, 10, 10, "GC")], &[(0, 1)]);
    let registry = load_registry(&store);

    // Edge src global 15 (inside GC, not MC) -> dst global 10 (GC local 0).
    let mut edges = EdgeMap::new();
    edges.insert(0, EdgeRecord { src_ids: vec![15], attrs: vec![] });
    let (blk_ptr, blk_idx, dst_ptr, src_idx) = cellmesh_graph::projection::encode_local(&edges, 0, 1);
    LocalGroup::run(1, {
        let store = store.clone();
        move |g| cellmesh_graph::projection::write(&g, &store, "GC", "MC", 1, 0, &blk_ptr, &blk_idx, &dst_ptr, &src_idx, &[]).unwrap()
    });

    let results = LocalGroup::run(2, {
        let store = store.clone();
        let registry = registry.clone();
        move |g| {
            let session = cellmesh_collective::Session::new(g, Arc::new(store.clone()) as Arc<dyn cellmesh_io::BlockStore>);
            cellmesh::read_graph(&session, &registry, "GC", "MC", &[])
        }
    });
    for r in results {
        let err = r.unwrap().unwrap_err();
        assert!(matches!(err, Error::ValidationFailed { .. }));
    }
}

#[test]
fn size_protocol_tail_produces_expected_global_size_and_local_starts() {
    let local_sizes = [2u64, 0, 3];
    let results = LocalGroup::run(3, move |g| negotiate_with_last_rank_tail(&g, local_sizes[g.rank()]));
    let got: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(got[0].global_offset, 0);
    assert_eq!(got[1].global_offset, 2);
    assert_eq!(got[2].global_offset, 2);
    for g in &got {
        assert_eq!(g.global_total, 6);
    }

    // Same scenario through the actual attribute append path.
    let store = MemBlockStore::new();
    let descriptor = AttributeDescriptor::owner("Synapse Attributes", "GC", "weight", ElementKind::F32);
    LocalGroup::run(3, {
        let store = store.clone();
        let descriptor = descriptor.clone();
        move |g| {
            let local_ptr_sizes = [2u64, 0, 3];
            let local_index: Vec<u32> = (0..local_ptr_sizes[g.rank()] as u32).collect();
            let local_ptr: Vec<u64> = (0..=local_ptr_sizes[g.rank()]).collect();
            let local_val: Vec<u8> = vec![0u8; (local_ptr_sizes[g.rank()] * 4) as usize];
            attribute::append(&g, &store, &descriptor, &local_index, Some(&local_ptr), &local_val).unwrap();
        }
    })
    .into_iter()
    .for_each(|r| r.unwrap());

    let (_, ptr_path, _) = (String::new(), path::cell_attribute_dataset("Synapse Attributes", "GC", "weight", path::ATTR_PTR), String::new());
    assert_eq!(store.dataset_len(&ptr_path).unwrap(), 6);
}
