//! Population registry and graph/attribute data model for cellmesh.

pub mod attribute;
pub mod edge;
pub mod registry;
pub mod tree;

pub use attribute::{AttributeDescriptor, Ownership};
pub use edge::{EdgeMap, EdgeRecord};
pub use registry::{PopulationInfo, PopulationRegistry};
pub use tree::Tree;
