//! The in-memory edge adjacency map a graph read produces: destination cell
//! id keyed, each entry holding its source cells and per-namespace
//! attribute values in declaration order.

use cellmesh_common::ElementValue;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EdgeRecord {
    pub src_ids: Vec<u32>,
    /// One entry per declared edge-attribute namespace, in the order the
    /// caller declared them; each inner vector has `src_ids.len()` values.
    pub attrs: Vec<(String, Vec<ElementValue>)>,
}

pub type EdgeMap = HashMap<u32, EdgeRecord>;
