//! The seven cooperative operations a caller drives a distributed-memory
//! read/write job through: full and selection-scoped graph reads, a graph
//! write, cell-attribute read and grouped append, and a scatter-read of
//! morphologies or of edges. Each wires a [`Session`] (process group +
//! dataset store) through the attribute engine, projection codec, tree
//! codec, and scatter/gather machinery in `cellmesh-graph` and
//! `cellmesh-collective`.

pub mod logging;

use cellmesh_collective::{
    gather_before_write, io_group_bins, io_group_of, is_io_rank, range_partition,
    range_partition_rank, scatter_after_read, PackedAttrEntry, PackedEdgeRecord, PackedTree,
    ProcessGroup, Record, Session,
};
use cellmesh_common::{ElementValue, Error, Result};
use cellmesh_graph::{attribute, projection, tree as tree_codec, AttrTriple};
use cellmesh_model::{AttributeDescriptor, EdgeMap, EdgeRecord, PopulationRegistry, Tree};
use std::collections::HashMap;

pub use cellmesh_io::StoreConfig;
pub use cellmesh_model::Ownership;

/// Reads the whole `dst_pop ← src_pop` projection cooperatively across
/// every rank in `session.group` and assembles it into an `EdgeMap`,
/// validating every edge against `registry` as it goes. `edge_attrs` names
/// the declared edge-attribute namespaces to read back alongside each
/// edge; pass an empty slice if the projection carries none.
pub fn read_graph<G: ProcessGroup>(
    session: &Session<G>,
    registry: &PopulationRegistry,
    dst_pop: &str,
    src_pop: &str,
    edge_attrs: &[AttributeDescriptor],
) -> Result<EdgeMap> {
    let dst_pop_index = registry.pop_by_label(dst_pop)?;
    let src_pop_index = registry.pop_by_label(src_pop)?;
    let (dst_start, _) = registry.range(dst_pop_index)?;
    let (src_start, _) = registry.range(src_pop_index)?;

    let slice = projection::read(&session.group, session.store.as_ref(), dst_pop, src_pop)?;

    let mut attr_payload = Vec::with_capacity(edge_attrs.len());
    for descriptor in edge_attrs {
        let bytes = projection::read_edge_attribute(session.store.as_ref(), dst_pop, src_pop, descriptor, &slice)?;
        attr_payload.push((descriptor.clone(), bytes));
    }

    cellmesh_graph::assemble(&slice, registry, dst_pop_index, src_pop_index, dst_start, src_start, &attr_payload)
}

/// The selection-scoped variant of [`read_graph`]: ranks with an empty
/// `selection` are excluded (via `group.split`) from the collective
/// destination lookups entirely, so an idle rank neither issues reads nor
/// risks a mismatched collective with the ranks that do have work.
pub fn scatter_read_graph<G: ProcessGroup>(
    session: &Session<G>,
    registry: &PopulationRegistry,
    dst_pop: &str,
    src_pop: &str,
    selection: &[u64],
    edge_attrs: &[AttributeDescriptor],
) -> Result<EdgeMap> {
    let color = if selection.is_empty() { None } else { Some(0) };
    let sub = session.group.split(color);
    let Some(_sub) = sub else {
        return Ok(EdgeMap::new());
    };

    let dst_pop_index = registry.pop_by_label(dst_pop)?;
    let src_pop_index = registry.pop_by_label(src_pop)?;
    let (dst_start, _) = registry.range(dst_pop_index)?;
    let (src_start, _) = registry.range(src_pop_index)?;

    let dst_local_ids: Vec<u64> = selection
        .iter()
        .map(|&global_dst| global_dst - dst_start)
        .collect();
    let (sel_ptr, sel_src) =
        projection::selection_read(session.store.as_ref(), dst_pop, src_pop, &dst_local_ids)?;

    let mut attr_payload = Vec::with_capacity(edge_attrs.len());
    for descriptor in edge_attrs {
        let bytes = projection::selection_read_edge_attribute(session.store.as_ref(), dst_pop, src_pop, descriptor, &dst_local_ids)?;
        attr_payload.push((descriptor, bytes));
    }

    let mut edges = EdgeMap::new();
    for (i, &global_dst) in selection.iter().enumerate() {
        let actual_dst_pop = registry.locate(global_dst)?;
        if actual_dst_pop != dst_pop_index {
            return Err(Error::ValidationFailed {
                src_global: 0,
                dst_global: global_dst as u32,
                reason: format!("destination belongs to population {actual_dst_pop}, expected {dst_pop_index}"),
            });
        }
        let lo = sel_ptr[i] as usize;
        let hi = sel_ptr[i + 1] as usize;
        let src_ids: Vec<u32> = sel_src[lo..hi]
            .iter()
            .map(|&local_src| (src_start + local_src as u64) as u32)
            .collect();

        let attrs = attr_payload
            .iter()
            .map(|(descriptor, bytes)| {
                let width = descriptor.element_kind.byte_width();
                let values: Vec<ElementValue> = bytes[lo * width..hi * width]
                    .chunks_exact(width)
                    .map(|chunk| ElementValue::from_le_bytes(descriptor.element_kind, chunk))
                    .collect();
                (descriptor.name.clone(), values)
            })
            .collect();

        edges.insert(global_dst as u32, EdgeRecord { src_ids, attrs });
    }
    Ok(edges)
}

/// Writes this rank's contiguous share of the `dst_pop ← src_pop`
/// projection, partitioned over the destination population the same way
/// every other collective in this workspace partitions: `range_partition`.
/// `local_edges` is keyed and valued by global cell id, the same
/// representation [`read_graph`] returns; each edge's `attrs` must carry
/// one entry (same length as its `src_ids`) per namespace named in
/// `edge_attrs`.
pub fn write_graph<G: ProcessGroup>(
    session: &Session<G>,
    registry: &PopulationRegistry,
    dst_pop: &str,
    src_pop: &str,
    local_edges: &EdgeMap,
    edge_attrs: &[AttributeDescriptor],
) -> Result<()> {
    let dst_pop_index = registry.pop_by_label(dst_pop)?;
    let src_pop_index = registry.pop_by_label(src_pop)?;
    if !registry.is_valid_pair(src_pop_index, dst_pop_index) {
        return Err(Error::InvalidArgument(format!(
            "{src_pop} -> {dst_pop} is not a declared projection pair"
        )));
    }
    let (dst_start, dst_count) = registry.range(dst_pop_index)?;
    let (src_start, _) = registry.range(src_pop_index)?;

    let bin = range_partition_rank(dst_count as u64, session.size(), session.rank());

    // `encode_local` keys its edge map by `dst_start_param + local_dst`, so
    // the population-local form it expects uses this rank's partition
    // offset as the base, not the registry's global population start.
    // Source ids are left in the caller's original order here (not sorted)
    // so `encode_local`/`encode_local_attr` can pair each attr value with
    // its source id before sorting both together.
    let mut population_local = EdgeMap::new();
    for local_dst in 0..bin.len {
        let global_dst = dst_start + bin.offset + local_dst;
        let Some(edge) = local_edges.get(&(global_dst as u32)) else { continue };
        let src_ids: Vec<u32> = edge
            .src_ids
            .iter()
            .map(|&global_src| {
                (global_src as u64)
                    .checked_sub(src_start)
                    .unwrap_or(global_src as u64) as u32
            })
            .collect();
        population_local.insert((bin.offset + local_dst) as u32, EdgeRecord { src_ids, attrs: edge.attrs.clone() });
    }

    let (blk_ptr, blk_idx, dst_ptr, src_idx) = projection::encode_local(&population_local, bin.offset, bin.len);

    let mut attr_payload = Vec::with_capacity(edge_attrs.len());
    for descriptor in edge_attrs {
        let bytes = projection::encode_local_attr(&population_local, bin.offset, bin.len, &descriptor.name)?;
        attr_payload.push((descriptor.clone(), bytes));
    }

    projection::write(
        &session.group,
        session.store.as_ref(),
        dst_pop,
        src_pop,
        dst_pop_index,
        src_pop_index,
        &blk_ptr,
        &blk_idx,
        &dst_ptr,
        &src_idx,
        &attr_payload,
    )
}

/// Reads this rank's window of a named cell attribute. `window` is
/// `(offset, per_rank_count)`, `None` reads the whole dataset partitioned
/// evenly across the group.
pub fn read_cell_attributes<G: ProcessGroup>(
    session: &Session<G>,
    descriptor: &AttributeDescriptor,
    pop_start: u64,
    window: Option<(u64, u64)>,
) -> Result<AttrTriple> {
    attribute::read(&session.group, session.store.as_ref(), descriptor, pop_start, window)
}

/// Appends a `cell_id → value` map via the grouped-append path: every
/// rank's local map is routed to its assigned I/O rank with
/// `gather_before_write`, then only the I/O ranks — re-grouped with
/// `group.split` — perform the collective attribute append.
pub fn append_cell_attribute_map<G: ProcessGroup>(
    session: &Session<G>,
    descriptor: &AttributeDescriptor,
    pop_start: u64,
    io_size: usize,
    local_values: &HashMap<u32, Vec<u8>>,
) -> Result<()> {
    let records: Vec<(u32, Record)> = local_values
        .iter()
        .map(|(&cell_id, bytes)| {
            (
                cell_id,
                Record::AttrMap(PackedAttrEntry {
                    cell_id,
                    values: vec![(descriptor.element_kind, bytes.clone())],
                }),
            )
        })
        .collect();

    let gathered = gather_before_write(&session.group, io_size, &records)?;
    let bins = io_group_bins(session.size(), io_size);
    let color = if is_io_rank(session.rank(), &bins) { Some(0) } else { None };

    if let Some(sub) = session.group.split(color) {
        let mut merged = HashMap::new();
        for (cell_id, record) in gathered {
            if let Record::AttrMap(entry) = record {
                if let Some((_, bytes)) = entry.values.into_iter().next() {
                    merged.insert(cell_id, bytes);
                }
            }
        }
        attribute::append_map(&sub, session.store.as_ref(), descriptor, pop_start, &merged)?;
    }
    Ok(())
}

/// Reads the morphologies named by `cell_ids` on the I/O ranks (`io_size`
/// of them, chosen by [`io_group_bins`]) and scatters each tree to the
/// compute ranks `node_rank_map` names as its owners.
pub fn scatter_read_trees<G: ProcessGroup>(
    session: &Session<G>,
    namespace: &str,
    population: &str,
    pop_start: u64,
    io_size: usize,
    cell_ids: &[u64],
    node_rank_map: &HashMap<u32, Vec<usize>>,
) -> Result<HashMap<u32, Tree>> {
    let bins = io_group_bins(session.size(), io_size);
    let my_group = io_group_of(session.rank(), &bins);
    let tree_bins = range_partition(cell_ids.len() as u64, bins.len());

    let local_records: Vec<(u32, Record)> = if is_io_rank(session.rank(), &bins) {
        let tb = tree_bins[my_group];
        let mut out = Vec::with_capacity(tb.len as usize);
        for &global_id in &cell_ids[tb.offset as usize..(tb.offset + tb.len) as usize] {
            let tree = tree_codec::selection_read_tree(session.store.as_ref(), namespace, population, pop_start, global_id)?;
            out.push((
                global_id as u32,
                Record::Tree(PackedTree {
                    cell_id: tree.cell_id,
                    section_pairs: tree.section_pairs,
                    sections: tree.sections,
                    coords: tree.coords,
                    radii: tree.radii,
                    layers: tree.layers,
                    parents: tree.parents,
                    swc_types: tree.swc_types,
                }),
            ));
        }
        out
    } else {
        Vec::new()
    };

    let scattered = scatter_after_read(&session.group, &local_records, node_rank_map)?;
    let mut out = HashMap::new();
    for (cell_id, record) in scattered {
        if let Record::Tree(t) = record {
            out.insert(
                cell_id,
                Tree {
                    cell_id: t.cell_id,
                    section_pairs: t.section_pairs,
                    sections: t.sections,
                    coords: t.coords,
                    radii: t.radii,
                    layers: t.layers,
                    parents: t.parents,
                    swc_types: t.swc_types,
                },
            );
        }
    }
    Ok(out)
}

/// Reads the `dst_pop ← src_pop` edges for `dst_ids` on the I/O ranks
/// (`io_size` of them, chosen by [`io_group_bins`]) and scatters each
/// destination's edges to the compute ranks `node_rank_map` names as its
/// owners, the same division of labor [`scatter_read_trees`] uses for
/// morphologies. `edge_attrs` names the declared edge-attribute namespaces
/// to read and scatter alongside each edge.
pub fn scatter_read_edges<G: ProcessGroup>(
    session: &Session<G>,
    registry: &PopulationRegistry,
    dst_pop: &str,
    src_pop: &str,
    io_size: usize,
    dst_ids: &[u64],
    edge_attrs: &[AttributeDescriptor],
    node_rank_map: &HashMap<u32, Vec<usize>>,
) -> Result<EdgeMap> {
    let dst_pop_index = registry.pop_by_label(dst_pop)?;
    let src_pop_index = registry.pop_by_label(src_pop)?;
    let (dst_start, _) = registry.range(dst_pop_index)?;
    let (src_start, _) = registry.range(src_pop_index)?;

    let bins = io_group_bins(session.size(), io_size);
    let my_group = io_group_of(session.rank(), &bins);
    let dst_bins = range_partition(dst_ids.len() as u64, bins.len());

    let local_records: Vec<(u32, Record)> = if is_io_rank(session.rank(), &bins) {
        let db = dst_bins[my_group];
        let my_dst_globals = &dst_ids[db.offset as usize..(db.offset + db.len) as usize];
        let my_dst_local: Vec<u64> = my_dst_globals.iter().map(|&g| g - dst_start).collect();

        let (sel_ptr, sel_src) = projection::selection_read(session.store.as_ref(), dst_pop, src_pop, &my_dst_local)?;

        let mut attr_bytes = Vec::with_capacity(edge_attrs.len());
        for descriptor in edge_attrs {
            let bytes = projection::selection_read_edge_attribute(session.store.as_ref(), dst_pop, src_pop, descriptor, &my_dst_local)?;
            attr_bytes.push((descriptor, bytes));
        }

        let mut out = Vec::with_capacity(my_dst_globals.len());
        for (i, &global_dst) in my_dst_globals.iter().enumerate() {
            let lo = sel_ptr[i] as usize;
            let hi = sel_ptr[i + 1] as usize;
            let src_ids: Vec<u32> = sel_src[lo..hi]
                .iter()
                .map(|&local_src| (src_start + local_src as u64) as u32)
                .collect();
            let attrs = attr_bytes
                .iter()
                .map(|(descriptor, bytes)| {
                    let width = descriptor.element_kind.byte_width();
                    (descriptor.element_kind, bytes[lo * width..hi * width].to_vec())
                })
                .collect();
            out.push((
                global_dst as u32,
                Record::EdgeMap(PackedEdgeRecord { dst_id: global_dst as u32, src_ids, attrs }),
            ));
        }
        out
    } else {
        Vec::new()
    };

    let scattered = scatter_after_read(&session.group, &local_records, node_rank_map)?;
    let mut edges = EdgeMap::new();
    for (dst_id, record) in scattered {
        if let Record::EdgeMap(e) = record {
            let attrs = e
                .attrs
                .into_iter()
                .zip(edge_attrs.iter())
                .map(|((kind, bytes), descriptor)| {
                    let values: Vec<ElementValue> = bytes
                        .chunks_exact(kind.byte_width())
                        .map(|c| ElementValue::from_le_bytes(kind, c))
                        .collect();
                    (descriptor.name.clone(), values)
                })
                .collect();
            edges.insert(dst_id, EdgeRecord { src_ids: e.src_ids, attrs });
        }
    }
    Ok(edges)
}
