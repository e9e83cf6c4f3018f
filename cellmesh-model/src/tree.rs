//! A cell morphology: ten parallel per-cell arrays sharing one length
//! pattern, persisted as ten attribute triples under one shared index/
//! pointer pair.

use cellmesh_common::{Error, Result};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tree {
    pub cell_id: u32,
    pub section_pairs: Vec<(u32, u32)>,
    pub sections: Vec<u32>,
    pub coords: Vec<(f32, f32, f32)>,
    pub radii: Vec<f32>,
    pub layers: Vec<u16>,
    pub parents: Vec<i32>,
    pub swc_types: Vec<u8>,
}

impl Tree {
    /// The sum of per-section node counts equals the coordinate array
    /// length, and every section node index lies in `[0, node_count)`.
    pub fn validate(&self) -> Result<()> {
        let node_count = self.coords.len();
        if self.radii.len() != node_count || self.layers.len() != node_count || self.parents.len() != node_count || self.swc_types.len() != node_count {
            return Err(Error::InvalidArgument(format!(
                "tree {}: per-node arrays disagree on length",
                self.cell_id
            )));
        }
        if !self.sections.is_empty() && self.sections[0] != 0 {
            return Err(Error::InvalidArgument(format!("tree {}: sections descriptor must start at 0", self.cell_id)));
        }
        if let Some(&last) = self.sections.last() {
            if last as usize != node_count {
                return Err(Error::InvalidArgument(format!(
                    "tree {}: sections describe {last} nodes but coords has {node_count}",
                    self.cell_id
                )));
            }
        }
        for &(a, b) in &self.section_pairs {
            let max_section = (self.sections.len().saturating_sub(1)) as u32;
            if a > max_section || b > max_section {
                return Err(Error::InvalidArgument(format!(
                    "tree {}: section-topology pair ({a}, {b}) references an out-of-range section",
                    self.cell_id
                )));
            }
        }
        Ok(())
    }
}
