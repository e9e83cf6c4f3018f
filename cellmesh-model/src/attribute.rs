//! Descriptors for named attribute datasets: which element kind an attribute
//! stores, and whether it owns or shares the index/pointer pair its triple
//! sits on.

use cellmesh_common::ElementKind;

/// Whether an attribute creates and owns its `Cell Index`/`Attribute
/// Pointer` datasets, or shares them with sibling attributes under the same
/// namespace (the tree codec's ten arrays all share one pair, one of them
/// marked `Owner`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owner,
    Shared,
}

#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    pub namespace: String,
    pub population: String,
    /// Names the value dataset (`.../<name>/Attribute Value`).
    pub name: String,
    /// Names the `Cell Index`/`Attribute Pointer` pair this attribute reads
    /// and writes through. Equal to `name` for an owner; a common group
    /// name shared by every sibling attribute for `Shared` attributes (the
    /// tree codec's ten arrays all set this to the same value).
    pub index_group: String,
    pub element_kind: ElementKind,
    pub index_ownership: Ownership,
    pub ptr_ownership: Ownership,
}

impl AttributeDescriptor {
    pub fn owner(namespace: impl Into<String>, population: impl Into<String>, name: impl Into<String>, element_kind: ElementKind) -> Self {
        let name = name.into();
        Self {
            namespace: namespace.into(),
            population: population.into(),
            index_group: name.clone(),
            name,
            element_kind,
            index_ownership: Ownership::Owner,
            ptr_ownership: Ownership::Owner,
        }
    }

    pub fn sharing(
        namespace: impl Into<String>,
        population: impl Into<String>,
        name: impl Into<String>,
        shared_group: impl Into<String>,
        element_kind: ElementKind,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            population: population.into(),
            name: name.into(),
            index_group: shared_group.into(),
            element_kind,
            index_ownership: Ownership::Shared,
            ptr_ownership: Ownership::Shared,
        }
    }
}
