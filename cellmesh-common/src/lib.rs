//! Common types for the cellmesh workspace

pub mod element;
pub mod error;

pub use element::{ElementKind, ElementValue};
pub use error::{Error, Result};
