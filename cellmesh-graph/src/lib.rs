//! Attribute engine, block-sparse projection codec, tree codec, and edge
//! assembler: the pieces that turn raw `BlockStore` bytes into typed graph
//! and attribute data, and back.

pub mod assemble;
pub mod attribute;
pub mod projection;
pub mod tree;

pub use assemble::assemble;
pub use attribute::{append, append_map, read, selection_read, AttrTriple};
pub use projection::{encode_local, encode_local_attr, read_edge_attribute, selection_read_edge_attribute, write, ProjectionSlice};
pub use tree::{selection_read_tree, write_tree};
