//! Block-primitive storage for cellmesh.
//!
//! The parallel attribute engine and projection codec treat the underlying
//! dataset store as a black box offering collective-cooperating
//! `read_block`/`write_block` primitives; this crate is that box. It does
//! not know about MPI or HDF5 — callers (the collective layer) are
//! responsible for making sure every rank issues matching calls.

pub mod config;
pub mod crc64;
pub mod path;
pub mod store;

pub use config::StoreConfig;
pub use store::{BlockStore, FileBlockStore, MemBlockStore};
