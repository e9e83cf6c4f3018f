//! The on-disk hierarchical path scheme for projections, cell attributes,
//! and population metadata.
//!
//! ```text
//! /H5Types/Populations
//! /H5Types/Population labels
//! /H5Types/Population pairs
//! /Populations/<pop>/<namespace>/<attr>/{Cell Index, Attribute Pointer, Attribute Value}
//! /Projections/<dst>/<src>/{Destination Block Pointer, Destination Block Index, Destination Pointer, Source Index, Source Population, Destination Population}
//! /Projections/<dst>/<src>/<namespace>/<attr>
//! ```

pub const H5TYPES_POPULATIONS: &str = "/H5Types/Populations";
pub const H5TYPES_POPULATION_LABELS: &str = "/H5Types/Population labels";
pub const H5TYPES_POPULATION_PAIRS: &str = "/H5Types/Population pairs";

pub const CELL_INDEX: &str = "Cell Index";
pub const ATTR_PTR: &str = "Attribute Pointer";
pub const ATTR_VAL: &str = "Attribute Value";

pub const DST_BLK_PTR: &str = "Destination Block Pointer";
pub const DST_BLK_IDX: &str = "Destination Block Index";
pub const DST_PTR: &str = "Destination Pointer";
pub const SRC_IDX: &str = "Source Index";
pub const SRC_POP: &str = "Source Population";
pub const DST_POP: &str = "Destination Population";

pub fn cell_attribute_group(namespace: &str, population: &str, attr: &str) -> String {
    format!("/Populations/{population}/{namespace}/{attr}")
}

pub fn cell_attribute_dataset(namespace: &str, population: &str, attr: &str, which: &str) -> String {
    format!("{}/{which}", cell_attribute_group(namespace, population, attr))
}

pub fn projection_group(dst_pop: &str, src_pop: &str) -> String {
    format!("/Projections/{dst_pop}/{src_pop}")
}

pub fn projection_dataset(dst_pop: &str, src_pop: &str, which: &str) -> String {
    format!("{}/{which}", projection_group(dst_pop, src_pop))
}

pub fn projection_attribute_dataset(
    dst_pop: &str,
    src_pop: &str,
    namespace: &str,
    attr: &str,
) -> String {
    format!("{}/{namespace}/{attr}", projection_group(dst_pop, src_pop))
}
