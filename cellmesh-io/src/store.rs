//! The `BlockStore` trait: the black-box collective dataset primitive
//! (`read_block(path, offset, count) -> bytes`,
//! `write_block(path, global_size, offset, count, bytes)`).
//!
//! Two implementations ship here: `MemBlockStore` for unit tests that don't
//! need real files, and `FileBlockStore`, a real little-endian flat-file
//! layout (one file per dataset path) used by the facade crate's
//! integration tests. Both are internally locked — every rank in a
//! `LocalGroup` simulation holds its own handle to the same
//! `Arc<dyn BlockStore>`.

use cellmesh_common::{Error, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A named, element-typed dataset store cooperating collectively with a
/// process group. All offsets/counts are in elements, not bytes; `elem_width`
/// tells the store how many bytes each element occupies.
pub trait BlockStore: Send + Sync {
    /// Current length of the dataset in elements, or 0 if it does not exist.
    fn dataset_len(&self, path: &str) -> Result<u64>;

    /// True if the dataset has been created, even if currently empty.
    fn dataset_exists(&self, path: &str) -> bool;

    /// Read `count` elements starting at `offset`. `offset + count` must not
    /// exceed `dataset_len`.
    fn read_block(&self, path: &str, offset: u64, count: u64, elem_width: usize) -> Result<Vec<u8>>;

    /// Extend (or create) the dataset to `global_size` elements if it is
    /// smaller, then write `bytes` (`count` elements) at `offset`.
    fn write_block(
        &self,
        path: &str,
        global_size: u64,
        offset: u64,
        count: u64,
        bytes: &[u8],
        elem_width: usize,
    ) -> Result<()>;
}

#[derive(Default)]
struct MemDataset {
    bytes: Vec<u8>,
    created: bool,
    elem_width: usize,
}

/// In-memory dataset store, useful for tests and for a single-process
/// `LocalGroup` simulation that wants to skip the filesystem entirely.
#[derive(Default, Clone)]
pub struct MemBlockStore {
    datasets: Arc<Mutex<HashMap<String, MemDataset>>>,
}

impl MemBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemBlockStore {
    fn dataset_len(&self, path: &str) -> Result<u64> {
        let map = self.datasets.lock().unwrap();
        Ok(map
            .get(path)
            .map(|d| (d.bytes.len() / d.elem_width.max(1)) as u64)
            .unwrap_or(0))
    }

    fn dataset_exists(&self, path: &str) -> bool {
        self.datasets.lock().unwrap().get(path).map(|d| d.created).unwrap_or(false)
    }

    fn read_block(&self, path: &str, offset: u64, count: u64, elem_width: usize) -> Result<Vec<u8>> {
        let map = self.datasets.lock().unwrap();
        let dataset = map
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let start = offset as usize * elem_width;
        let len = count as usize * elem_width;
        if start + len > dataset.bytes.len() {
            return Err(Error::RangeOutOfBounds(format!(
                "{path}: requested [{start}, {}) but dataset holds {} bytes",
                start + len,
                dataset.bytes.len()
            )));
        }
        Ok(dataset.bytes[start..start + len].to_vec())
    }

    fn write_block(
        &self,
        path: &str,
        global_size: u64,
        offset: u64,
        count: u64,
        bytes: &[u8],
        elem_width: usize,
    ) -> Result<()> {
        let mut map = self.datasets.lock().unwrap();
        let dataset = map.entry(path.to_string()).or_default();
        dataset.created = true;
        dataset.elem_width = elem_width;
        let needed = global_size as usize * elem_width;
        if dataset.bytes.len() < needed {
            dataset.bytes.resize(needed, 0);
        }
        let start = offset as usize * elem_width;
        let len = count as usize * elem_width;
        if bytes.len() != len {
            return Err(Error::InvalidArgument(format!(
                "{path}: write_block given {} bytes for {count} elements of width {elem_width}",
                bytes.len()
            )));
        }
        if start + len > dataset.bytes.len() {
            dataset.bytes.resize(start + len, 0);
        }
        dataset.bytes[start..start + len].copy_from_slice(bytes);
        Ok(())
    }
}

/// A real flat-file dataset store: one file per dataset path under a root
/// directory, sanitized by replacing `/` with `_`. Intended for the facade
/// crate's end-to-end tests, not for production HDF5 interop (that remains
/// an external collaborator).
pub struct FileBlockStore {
    root: PathBuf,
    handles: Mutex<HashMap<String, Arc<Mutex<File>>>>,
    elem_widths: Mutex<HashMap<String, usize>>,
}

impl FileBlockStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            handles: Mutex::new(HashMap::new()),
            elem_widths: Mutex::new(HashMap::new()),
        })
    }

    fn file_path(&self, path: &str) -> PathBuf {
        let sanitized = path.trim_start_matches('/').replace(['/', ' '], "_");
        self.root.join(sanitized)
    }

    fn handle(&self, path: &str) -> Result<Arc<Mutex<File>>> {
        let mut handles = self.handles.lock().unwrap();
        if let Some(h) = handles.get(path) {
            return Ok(h.clone());
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.file_path(path))?;
        let handle = Arc::new(Mutex::new(file));
        handles.insert(path.to_string(), handle.clone());
        Ok(handle)
    }
}

impl BlockStore for FileBlockStore {
    fn dataset_len(&self, path: &str) -> Result<u64> {
        if !self.file_path(path).exists() {
            return Ok(0);
        }
        let handle = self.handle(path)?;
        let file = handle.lock().unwrap();
        let byte_len = file.metadata()?.len();
        let elem_width = self.elem_widths.lock().unwrap().get(path).copied().unwrap_or(1);
        Ok(byte_len / elem_width as u64)
    }

    fn dataset_exists(&self, path: &str) -> bool {
        self.file_path(path).exists()
    }

    fn read_block(&self, path: &str, offset: u64, count: u64, elem_width: usize) -> Result<Vec<u8>> {
        let handle = self.handle(path)?;
        let mut file = handle.lock().unwrap();
        let start = offset * elem_width as u64;
        let len = count * elem_width as u64;
        let file_len = file.metadata()?.len();
        if start + len > file_len {
            return Err(Error::RangeOutOfBounds(format!(
                "{path}: requested [{start}, {}) but file holds {file_len} bytes",
                start + len
            )));
        }
        let mut buf = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_block(
        &self,
        path: &str,
        global_size: u64,
        offset: u64,
        count: u64,
        bytes: &[u8],
        elem_width: usize,
    ) -> Result<()> {
        self.elem_widths.lock().unwrap().insert(path.to_string(), elem_width);
        let handle = self.handle(path)?;
        let mut file = handle.lock().unwrap();
        let needed = global_size * elem_width as u64;
        let current = file.metadata()?.len();
        if current < needed {
            file.set_len(needed)?;
        }
        let start = offset * elem_width as u64;
        let len = count * elem_width as u64;
        if bytes.len() as u64 != len {
            return Err(Error::InvalidArgument(format!(
                "{path}: write_block given {} bytes for {count} elements of width {elem_width}",
                bytes.len()
            )));
        }
        let end = start + len;
        if end > file.metadata()?.len() {
            file.set_len(end)?;
        }
        file.seek(SeekFrom::Start(start))?;
        file.write_all(bytes)?;
        Ok(())
    }
}
