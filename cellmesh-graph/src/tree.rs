//! Persists and reconstructs morphologies by treating a tree's per-array
//! fields as attribute triples, sharing one index/pointer pair wherever the
//! arrays genuinely share a length pattern.
//!
//! Only seven of a tree's ten arrays are indexed by node and have identical
//! length (`coords` split into three scalar arrays, `radii`, `layers`,
//! `parents`, `swc_types`); those share one `"Tree Nodes"` index/pointer
//! pair. `sections` (length `section_count + 1`) and the two halves of
//! `section_pairs` (length `edge_count`) each have their own length
//! pattern and so each keep their own index/pointer pair — sharing a
//! pointer dataset across arrays of different per-cell length would
//! silently misalign every read after the first cell.

use crate::attribute::{self, AttrTriple};
use cellmesh_collective::ProcessGroup;
use cellmesh_common::{ElementKind, Error, Result};
use cellmesh_io::BlockStore;
use cellmesh_model::{AttributeDescriptor, Tree};

const NODE_GROUP: &str = "Tree Nodes";

const COORDS_X: &str = "coords_x";
const COORDS_Y: &str = "coords_y";
const COORDS_Z: &str = "coords_z";
const RADII: &str = "radii";
const LAYERS: &str = "layers";
const PARENTS: &str = "parents";
const SWC_TYPES: &str = "swc_types";
const SECTIONS: &str = "sections";
const SECTION_PAIRS_A: &str = "section_pairs_a";
const SECTION_PAIRS_B: &str = "section_pairs_b";

fn node_descriptor(namespace: &str, population: &str, name: &str, kind: ElementKind) -> AttributeDescriptor {
    if name == COORDS_X {
        AttributeDescriptor::owner(namespace, population, name, kind)
    } else {
        AttributeDescriptor::sharing(namespace, population, name, NODE_GROUP, kind)
    }
}

fn node_descriptors(namespace: &str, population: &str) -> Vec<(&'static str, AttributeDescriptor)> {
    vec![
        (COORDS_X, node_descriptor(namespace, population, COORDS_X, ElementKind::F32)),
        (COORDS_Y, node_descriptor(namespace, population, COORDS_Y, ElementKind::F32)),
        (COORDS_Z, node_descriptor(namespace, population, COORDS_Z, ElementKind::F32)),
        (RADII, node_descriptor(namespace, population, RADII, ElementKind::F32)),
        (LAYERS, node_descriptor(namespace, population, LAYERS, ElementKind::U16)),
        (PARENTS, node_descriptor(namespace, population, PARENTS, ElementKind::I32)),
        (SWC_TYPES, node_descriptor(namespace, population, SWC_TYPES, ElementKind::U8)),
    ]
}

fn topology_descriptors(namespace: &str, population: &str) -> Vec<(&'static str, AttributeDescriptor)> {
    vec![
        (SECTIONS, AttributeDescriptor::owner(namespace, population, SECTIONS, ElementKind::U32)),
        (SECTION_PAIRS_A, AttributeDescriptor::owner(namespace, population, SECTION_PAIRS_A, ElementKind::U32)),
        (SECTION_PAIRS_B, AttributeDescriptor::owner(namespace, population, SECTION_PAIRS_B, ElementKind::U32)),
    ]
}

/// Appends one rank's tree to the backing store. `local_id` is the tree's
/// cell index local to `population` (global id minus population start).
pub fn write_tree<G: ProcessGroup>(group: &G, store: &dyn BlockStore, namespace: &str, population: &str, local_id: u32, tree: &Tree) -> Result<()> {
    tree.validate()?;

    let node_count = tree.coords.len() as u64;
    let node_ptr = vec![0u64, node_count];
    let xs: Vec<u8> = tree.coords.iter().flat_map(|(x, _, _)| x.to_le_bytes()).collect();
    let ys: Vec<u8> = tree.coords.iter().flat_map(|(_, y, _)| y.to_le_bytes()).collect();
    let zs: Vec<u8> = tree.coords.iter().flat_map(|(_, _, z)| z.to_le_bytes()).collect();
    let radii: Vec<u8> = tree.radii.iter().flat_map(|v| v.to_le_bytes()).collect();
    let layers: Vec<u8> = tree.layers.iter().flat_map(|v| v.to_le_bytes()).collect();
    let parents: Vec<u8> = tree.parents.iter().flat_map(|v| v.to_le_bytes()).collect();
    let swc_types: Vec<u8> = tree.swc_types.clone();

    for (name, bytes) in [
        (COORDS_X, &xs),
        (COORDS_Y, &ys),
        (COORDS_Z, &zs),
        (RADII, &radii),
        (LAYERS, &layers),
        (PARENTS, &parents),
        (SWC_TYPES, &swc_types),
    ] {
        let descriptor = node_descriptors(namespace, population).into_iter().find(|(n, _)| *n == name).unwrap().1;
        attribute::append(group, store, &descriptor, &[local_id], Some(&node_ptr), bytes)?;
    }

    let section_count = tree.sections.len() as u64;
    let edge_count = tree.section_pairs.len() as u64;
    let topology_ptr_sections = vec![0u64, section_count];
    let topology_ptr_edges = vec![0u64, edge_count];
    let sections: Vec<u8> = tree.sections.iter().flat_map(|v| v.to_le_bytes()).collect();
    let pairs_a: Vec<u8> = tree.section_pairs.iter().flat_map(|(a, _)| a.to_le_bytes()).collect();
    let pairs_b: Vec<u8> = tree.section_pairs.iter().flat_map(|(_, b)| b.to_le_bytes()).collect();

    let sections_descriptor = topology_descriptors(namespace, population).into_iter().find(|(n, _)| *n == SECTIONS).unwrap().1;
    attribute::append(group, store, &sections_descriptor, &[local_id], Some(&topology_ptr_sections), &sections)?;

    for (name, ptr, bytes) in [(SECTION_PAIRS_A, &topology_ptr_edges, &pairs_a), (SECTION_PAIRS_B, &topology_ptr_edges, &pairs_b)] {
        let descriptor = topology_descriptors(namespace, population).into_iter().find(|(n, _)| *n == name).unwrap().1;
        attribute::append(group, store, &descriptor, &[local_id], Some(ptr), bytes)?;
    }

    Ok(())
}

fn assemble(cell_id: u32, node: &std::collections::HashMap<&str, AttrTriple>, topo: &std::collections::HashMap<&str, AttrTriple>) -> Result<Tree> {
    let node_count = node[COORDS_X].attr_val.len() / 4;
    let xs: Vec<f32> = node[COORDS_X].attr_val.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect();
    let ys: Vec<f32> = node[COORDS_Y].attr_val.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect();
    let zs: Vec<f32> = node[COORDS_Z].attr_val.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect();
    if ys.len() != node_count || zs.len() != node_count {
        return Err(Error::Truncated(format!("tree {cell_id}: coordinate arrays disagree on length")));
    }
    let coords: Vec<(f32, f32, f32)> = xs.into_iter().zip(ys).zip(zs).map(|((x, y), z)| (x, y, z)).collect();
    let radii: Vec<f32> = node[RADII].attr_val.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect();
    let layers: Vec<u16> = node[LAYERS].attr_val.chunks_exact(2).map(|c| u16::from_le_bytes(c.try_into().unwrap())).collect();
    let parents: Vec<i32> = node[PARENTS].attr_val.chunks_exact(4).map(|c| i32::from_le_bytes(c.try_into().unwrap())).collect();
    let swc_types = node[SWC_TYPES].attr_val.clone();

    let sections: Vec<u32> = topo[SECTIONS].attr_val.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();
    let pairs_a: Vec<u32> = topo[SECTION_PAIRS_A].attr_val.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();
    let pairs_b: Vec<u32> = topo[SECTION_PAIRS_B].attr_val.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();
    if pairs_a.len() != pairs_b.len() {
        return Err(Error::Truncated(format!("tree {cell_id}: section-pair arrays disagree on length")));
    }
    let section_pairs: Vec<(u32, u32)> = pairs_a.into_iter().zip(pairs_b).collect();

    let tree = Tree {
        cell_id,
        section_pairs,
        sections,
        coords,
        radii,
        layers,
        parents,
        swc_types,
    };
    tree.validate()?;
    Ok(tree)
}

/// Fetches a single tree by global cell id via selection reads against all
/// ten underlying datasets, one read per dataset.
pub fn selection_read_tree(store: &dyn BlockStore, namespace: &str, population: &str, pop_start: u64, global_id: u64) -> Result<Tree> {
    let mut node_triples = std::collections::HashMap::new();
    for (name, descriptor) in node_descriptors(namespace, population) {
        let (ptr, val) = attribute::selection_read(store, &descriptor, pop_start, &[global_id])?;
        node_triples.insert(name, AttrTriple { cell_index: vec![], attr_ptr: Some(ptr), attr_val: val });
    }
    let mut topo_triples = std::collections::HashMap::new();
    for (name, descriptor) in topology_descriptors(namespace, population) {
        let (ptr, val) = attribute::selection_read(store, &descriptor, pop_start, &[global_id])?;
        topo_triples.insert(name, AttrTriple { cell_index: vec![], attr_ptr: Some(ptr), attr_val: val });
    }
    assemble(global_id as u32, &node_triples, &topo_triples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmesh_collective::LocalGroup;
    use cellmesh_io::MemBlockStore;

    fn sample() -> Tree {
        Tree {
            cell_id: 5,
            section_pairs: vec![(0, 1)],
            sections: vec![0, 2, 4],
            coords: vec![(0.0, 0.0, 0.0), (1.0, 1.0, 1.0), (2.0, 2.0, 2.0), (3.0, 3.0, 3.0)],
            radii: vec![0.5, 0.5, 0.4, 0.4],
            layers: vec![1, 1, 2, 2],
            parents: vec![-1, 0, 1, 2],
            swc_types: vec![1, 3, 3, 3],
        }
    }

    #[test]
    fn write_then_selection_read_round_trips() {
        let store = MemBlockStore::new();
        let tree = sample();
        LocalGroup::run(1, {
            let store = store.clone();
            let tree = tree.clone();
            move |g| write_tree(&g, &store, "Trees", "GC", 5, &tree).unwrap()
        });

        let back = selection_read_tree(&store, "Trees", "GC", 0, 5).unwrap();
        assert_eq!(back.coords, tree.coords);
        assert_eq!(back.section_pairs, tree.section_pairs);
        assert_eq!(back.sections, tree.sections);
        assert_eq!(back.swc_types, tree.swc_types);
    }

    #[test]
    fn two_trees_share_index_and_pointer_datasets() {
        let store = MemBlockStore::new();
        LocalGroup::run(1, {
            let store = store.clone();
            move |g| {
                write_tree(&g, &store, "Trees", "GC", 0, &Tree { cell_id: 0, ..sample() }).unwrap();
                write_tree(&g, &store, "Trees", "GC", 1, &Tree { cell_id: 1, ..sample() }).unwrap();
            }
        });

        let index_path = cellmesh_io::path::cell_attribute_dataset("Trees", "GC", COORDS_X, cellmesh_io::path::CELL_INDEX);
        assert_eq!(store.dataset_len(&index_path).unwrap(), 2);
        let t0 = selection_read_tree(&store, "Trees", "GC", 0, 0).unwrap();
        let t1 = selection_read_tree(&store, "Trees", "GC", 0, 1).unwrap();
        assert_eq!(t0.coords, t1.coords);
    }
}
