//! Loads and validates node-population ranges, labels, and the permitted
//! source→destination projection pairs. Loaded once per open, immutable
//! thereafter, and freely shared read-only across a rank's operations.

use cellmesh_collective::ProcessGroup;
use cellmesh_common::{Error, Result};
use cellmesh_io::{path, BlockStore};
use std::collections::HashMap;

/// One population's on-disk metadata: a half-open id range, tag, and label.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationInfo {
    pub pop: u16,
    pub start: u64,
    pub count: u32,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct PopulationRegistry {
    /// Sorted by `start`, for predecessor search in `locate`.
    by_start: Vec<PopulationInfo>,
    by_label: HashMap<String, u16>,
    valid_pairs: std::collections::HashSet<(u16, u16)>,
}

const TAG_OK: u8 = 0;
const TAG_SCHEMA_MISSING: u8 = 1;
const TAG_BAD_SCHEMA: u8 = 2;

impl PopulationRegistry {
    /// Collective load: rank 0 reads the population, label, and valid-pair
    /// datasets and broadcasts a length-prefixed encoded buffer to the rest
    /// of the group. Every rank returns the same registry or the same
    /// error.
    pub fn load<G: ProcessGroup>(group: &G, store: &dyn BlockStore) -> Result<Self> {
        let _span = tracing::debug_span!("registry::load", rank = group.rank()).entered();
        let payload = if group.rank() == 0 {
            Some(match Self::read_and_encode(store) {
                Ok(buf) => {
                    let mut v = vec![TAG_OK];
                    v.extend(buf);
                    v
                }
                Err(Error::SchemaMissing(msg)) => {
                    let mut v = vec![TAG_SCHEMA_MISSING];
                    v.extend(msg.into_bytes());
                    v
                }
                Err(Error::BadSchema(msg)) => {
                    let mut v = vec![TAG_BAD_SCHEMA];
                    v.extend(msg.into_bytes());
                    v
                }
                Err(other) => return Err(other),
            })
        } else {
            None
        };

        let bytes = group.broadcast_bytes(0, payload);
        tracing::debug!(bytes_moved = bytes.len(), "registry payload broadcast");
        match bytes[0] {
            TAG_OK => Self::decode(&bytes[1..]),
            TAG_SCHEMA_MISSING => Err(Error::SchemaMissing(String::from_utf8_lossy(&bytes[1..]).into_owned())),
            TAG_BAD_SCHEMA => Err(Error::BadSchema(String::from_utf8_lossy(&bytes[1..]).into_owned())),
            other => Err(Error::BadSchema(format!("unknown registry load tag {other}"))),
        }
    }

    fn read_and_encode(store: &dyn BlockStore) -> Result<Vec<u8>> {
        if !store.dataset_exists(path::H5TYPES_POPULATIONS) {
            return Err(Error::SchemaMissing("types group is absent".into()));
        }

        const POP_RECORD: usize = 14; // u64 start + u32 count + u16 pop
        let n_pops = store.dataset_len(path::H5TYPES_POPULATIONS)? as u32;
        let pop_bytes = store.read_block(path::H5TYPES_POPULATIONS, 0, n_pops as u64, POP_RECORD)?;

        if !store.dataset_exists(path::H5TYPES_POPULATION_LABELS) {
            return Err(Error::BadSchema("population labels dataset is missing".into()));
        }
        let labels_len = store.dataset_len(path::H5TYPES_POPULATION_LABELS)?;
        let labels_bytes = store.read_block(path::H5TYPES_POPULATION_LABELS, 0, labels_len, 1)?;

        if !store.dataset_exists(path::H5TYPES_POPULATION_PAIRS) {
            return Err(Error::BadSchema("population pairs dataset is missing".into()));
        }
        const PAIR_RECORD: usize = 4; // u16 src + u16 dst
        let n_pairs = store.dataset_len(path::H5TYPES_POPULATION_PAIRS)? as u32;
        let pairs_bytes = store.read_block(path::H5TYPES_POPULATION_PAIRS, 0, n_pairs as u64, PAIR_RECORD)?;

        let mut buf = Vec::new();
        buf.extend_from_slice(&n_pops.to_le_bytes());
        buf.extend_from_slice(&pop_bytes);
        buf.extend_from_slice(&(labels_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&labels_bytes);
        buf.extend_from_slice(&n_pairs.to_le_bytes());
        buf.extend_from_slice(&pairs_bytes);
        Ok(buf)
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let n_pops = read_u32(buf, &mut pos)?;
        let mut entries: Vec<(u16, u64, u32)> = Vec::with_capacity(n_pops as usize);
        for _ in 0..n_pops {
            let start = read_u64(buf, &mut pos)?;
            let count = read_u32(buf, &mut pos)?;
            let pop = read_u16(buf, &mut pos)?;
            entries.push((pop, start, count));
        }

        let labels_len = read_u32(buf, &mut pos)? as usize;
        let labels_end = pos + labels_len;
        if labels_end > buf.len() {
            return Err(Error::Truncated("registry labels section overruns buffer".into()));
        }
        let mut labels: HashMap<u16, String> = HashMap::new();
        let mut lpos = pos;
        while lpos < labels_end {
            let pop = read_u16(buf, &mut lpos)?;
            let len = read_u32(buf, &mut lpos)? as usize;
            if lpos + len > labels_end {
                return Err(Error::Truncated("registry label entry overruns section".into()));
            }
            let label = String::from_utf8_lossy(&buf[lpos..lpos + len]).into_owned();
            lpos += len;
            labels.insert(pop, label);
        }
        pos = labels_end;

        let n_pairs = read_u32(buf, &mut pos)?;
        let mut valid_pairs = std::collections::HashSet::with_capacity(n_pairs as usize);
        for _ in 0..n_pairs {
            let src = read_u16(buf, &mut pos)?;
            let dst = read_u16(buf, &mut pos)?;
            valid_pairs.insert((src, dst));
        }

        let mut by_start: Vec<PopulationInfo> = entries
            .into_iter()
            .map(|(pop, start, count)| PopulationInfo {
                pop,
                start,
                count,
                label: labels.get(&pop).cloned().unwrap_or_default(),
            })
            .collect();
        by_start.sort_by_key(|p| p.start);

        let mut by_label = HashMap::new();
        for p in &by_start {
            by_label.insert(p.label.clone(), p.pop);
        }

        Ok(Self {
            by_start,
            by_label,
            valid_pairs,
        })
    }

    pub fn pop_by_label(&self, label: &str) -> Result<u16> {
        self.by_label
            .get(label)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("no population labeled {label:?}")))
    }

    pub fn range(&self, pop: u16) -> Result<(u64, u32)> {
        self.by_start
            .iter()
            .find(|p| p.pop == pop)
            .map(|p| (p.start, p.count))
            .ok_or_else(|| Error::NotFound(format!("no population with index {pop}")))
    }

    /// Predecessor search over the sorted `start` index: the population
    /// owning `global_id` is the last entry whose `start <= global_id`.
    pub fn locate(&self, global_id: u64) -> Result<u16> {
        let mut found: Option<&PopulationInfo> = None;
        for p in &self.by_start {
            if p.start <= global_id {
                found = Some(p);
            } else {
                break;
            }
        }
        match found {
            Some(p) if global_id < p.start + p.count as u64 => Ok(p.pop),
            _ => Err(Error::NotFound(format!("no population contains id {global_id}"))),
        }
    }

    pub fn is_valid_pair(&self, src: u16, dst: u16) -> bool {
        self.valid_pairs.contains(&(src, dst))
    }
}

fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16> {
    if *pos + 2 > buf.len() {
        return Err(Error::Truncated("registry buffer: expected u16".into()));
    }
    let v = u16::from_le_bytes(buf[*pos..*pos + 2].try_into().unwrap());
    *pos += 2;
    Ok(v)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    if *pos + 4 > buf.len() {
        return Err(Error::Truncated("registry buffer: expected u32".into()));
    }
    let v = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}

fn read_u64(buf: &[u8], pos: &mut usize) -> Result<u64> {
    if *pos + 8 > buf.len() {
        return Err(Error::Truncated("registry buffer: expected u64".into()));
    }
    let v = u64::from_le_bytes(buf[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(v)
}
