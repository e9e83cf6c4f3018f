//! Frames heterogeneous records into one linear byte buffer so a single
//! all-to-all-v moves each logical record, instead of one exchange per
//! attribute.
//!
//! Dispatch happens once, at the boundary of each record; inside a record,
//! only primitive little-endian element packs are used.

use cellmesh_common::{ElementKind, Error, Result};

/// A morphology's ten parallel arrays, framed for transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedTree {
    pub cell_id: u32,
    pub section_pairs: Vec<(u32, u32)>,
    pub sections: Vec<u32>,
    pub coords: Vec<(f32, f32, f32)>,
    pub radii: Vec<f32>,
    pub layers: Vec<u16>,
    pub parents: Vec<i32>,
    pub swc_types: Vec<u8>,
}

/// One destination's edges plus its attribute tuple, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedEdgeRecord {
    pub dst_id: u32,
    pub src_ids: Vec<u32>,
    /// Already-serialized attribute value blocks, one per declared namespace
    /// attribute, each `src_ids.len()` elements wide in its own kind.
    pub attrs: Vec<(ElementKind, Vec<u8>)>,
}

/// A single cell's named-attribute map entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedAttrEntry {
    pub cell_id: u32,
    pub values: Vec<(ElementKind, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Tree(PackedTree),
    EdgeMap(PackedEdgeRecord),
    AttrMap(PackedAttrEntry),
}

const TAG_TREE: u8 = 0;
const TAG_EDGE: u8 = 1;
const TAG_ATTR: u8 = 2;

fn kind_tag(k: ElementKind) -> u8 {
    match k {
        ElementKind::U8 => 0,
        ElementKind::I8 => 1,
        ElementKind::U16 => 2,
        ElementKind::I16 => 3,
        ElementKind::U32 => 4,
        ElementKind::I32 => 5,
        ElementKind::F32 => 6,
        ElementKind::Enum8 => 7,
    }
}

fn tag_kind(tag: u8) -> Result<ElementKind> {
    Ok(match tag {
        0 => ElementKind::U8,
        1 => ElementKind::I8,
        2 => ElementKind::U16,
        3 => ElementKind::I16,
        4 => ElementKind::U32,
        5 => ElementKind::I32,
        6 => ElementKind::F32,
        7 => ElementKind::Enum8,
        other => return Err(Error::BadSchema(format!("unknown element-kind tag {other}"))),
    })
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_blob(buf: &mut Vec<u8>, kind: ElementKind, bytes: &[u8]) {
    buf.push(kind_tag(kind));
    put_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn get_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    if *pos + 4 > buf.len() {
        return Err(Error::Truncated("packed buffer: expected u32".into()));
    }
    let v = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(v)
}
fn get_blob(buf: &[u8], pos: &mut usize) -> Result<(ElementKind, Vec<u8>)> {
    if *pos + 1 > buf.len() {
        return Err(Error::Truncated("packed buffer: expected kind tag".into()));
    }
    let kind = tag_kind(buf[*pos])?;
    *pos += 1;
    let len = get_u32(buf, pos)? as usize;
    if *pos + len > buf.len() {
        return Err(Error::Truncated("packed buffer: blob overruns buffer".into()));
    }
    let bytes = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok((kind, bytes))
}

/// Pack a sequence of records into one buffer, in order.
pub fn pack(records: &[Record]) -> Vec<u8> {
    let mut buf = Vec::new();
    for record in records {
        pack_one(&mut buf, record);
    }
    buf
}

fn pack_one(buf: &mut Vec<u8>, record: &Record) {
    match record {
        Record::Tree(t) => {
            buf.push(TAG_TREE);
            put_u32(buf, t.cell_id);
            put_u32(buf, t.section_pairs.len() as u32);
            put_u32(buf, t.sections.len() as u32);
            put_u32(buf, t.coords.len() as u32);
            for (a, b) in &t.section_pairs {
                put_u32(buf, *a);
                put_u32(buf, *b);
            }
            for s in &t.sections {
                put_u32(buf, *s);
            }
            for (x, y, z) in &t.coords {
                buf.extend_from_slice(&x.to_le_bytes());
                buf.extend_from_slice(&y.to_le_bytes());
                buf.extend_from_slice(&z.to_le_bytes());
            }
            for r in &t.radii {
                buf.extend_from_slice(&r.to_le_bytes());
            }
            for l in &t.layers {
                buf.extend_from_slice(&l.to_le_bytes());
            }
            for p in &t.parents {
                buf.extend_from_slice(&p.to_le_bytes());
            }
            buf.extend_from_slice(&t.swc_types);
        }
        Record::EdgeMap(e) => {
            buf.push(TAG_EDGE);
            put_u32(buf, e.dst_id);
            put_u32(buf, e.src_ids.len() as u32);
            for s in &e.src_ids {
                put_u32(buf, *s);
            }
            put_u32(buf, e.attrs.len() as u32);
            for (kind, bytes) in &e.attrs {
                put_blob(buf, *kind, bytes);
            }
        }
        Record::AttrMap(a) => {
            buf.push(TAG_ATTR);
            put_u32(buf, a.cell_id);
            put_u32(buf, a.values.len() as u32);
            for (kind, bytes) in &a.values {
                put_blob(buf, *kind, bytes);
            }
        }
    }
}

/// Unpack every record in `buf`. Reads while `pos < buf.len()`; after each
/// record `pos` must not exceed `buf.len()` — any overrun is fatal
/// corruption.
pub fn unpack(buf: &[u8]) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        let tag = buf[pos];
        pos += 1;
        let record = match tag {
            TAG_TREE => {
                let cell_id = get_u32(buf, &mut pos)?;
                let edges_len = get_u32(buf, &mut pos)? as usize;
                let sections_len = get_u32(buf, &mut pos)? as usize;
                let coords_len = get_u32(buf, &mut pos)? as usize;

                let mut section_pairs = Vec::with_capacity(edges_len);
                for _ in 0..edges_len {
                    let a = get_u32(buf, &mut pos)?;
                    let b = get_u32(buf, &mut pos)?;
                    section_pairs.push((a, b));
                }
                let mut sections = Vec::with_capacity(sections_len);
                for _ in 0..sections_len {
                    sections.push(get_u32(buf, &mut pos)?);
                }
                let mut coords = Vec::with_capacity(coords_len);
                for _ in 0..coords_len {
                    if pos + 12 > buf.len() {
                        return Err(Error::Truncated("packed tree: coords overrun".into()));
                    }
                    let x = f32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
                    let y = f32::from_le_bytes(buf[pos + 4..pos + 8].try_into().unwrap());
                    let z = f32::from_le_bytes(buf[pos + 8..pos + 12].try_into().unwrap());
                    pos += 12;
                    coords.push((x, y, z));
                }
                let mut radii = Vec::with_capacity(coords_len);
                for _ in 0..coords_len {
                    if pos + 4 > buf.len() {
                        return Err(Error::Truncated("packed tree: radii overrun".into()));
                    }
                    radii.push(f32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()));
                    pos += 4;
                }
                let mut layers = Vec::with_capacity(coords_len);
                for _ in 0..coords_len {
                    if pos + 2 > buf.len() {
                        return Err(Error::Truncated("packed tree: layers overrun".into()));
                    }
                    layers.push(u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap()));
                    pos += 2;
                }
                let mut parents = Vec::with_capacity(coords_len);
                for _ in 0..coords_len {
                    if pos + 4 > buf.len() {
                        return Err(Error::Truncated("packed tree: parents overrun".into()));
                    }
                    parents.push(i32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()));
                    pos += 4;
                }
                if pos + coords_len > buf.len() {
                    return Err(Error::Truncated("packed tree: swc types overrun".into()));
                }
                let swc_types = buf[pos..pos + coords_len].to_vec();
                pos += coords_len;

                Record::Tree(PackedTree {
                    cell_id,
                    section_pairs,
                    sections,
                    coords,
                    radii,
                    layers,
                    parents,
                    swc_types,
                })
            }
            TAG_EDGE => {
                let dst_id = get_u32(buf, &mut pos)?;
                let n_src = get_u32(buf, &mut pos)? as usize;
                let mut src_ids = Vec::with_capacity(n_src);
                for _ in 0..n_src {
                    src_ids.push(get_u32(buf, &mut pos)?);
                }
                let n_attrs = get_u32(buf, &mut pos)? as usize;
                let mut attrs = Vec::with_capacity(n_attrs);
                for _ in 0..n_attrs {
                    attrs.push(get_blob(buf, &mut pos)?);
                }
                Record::EdgeMap(PackedEdgeRecord {
                    dst_id,
                    src_ids,
                    attrs,
                })
            }
            TAG_ATTR => {
                let cell_id = get_u32(buf, &mut pos)?;
                let n_values = get_u32(buf, &mut pos)? as usize;
                let mut values = Vec::with_capacity(n_values);
                for _ in 0..n_values {
                    values.push(get_blob(buf, &mut pos)?);
                }
                Record::AttrMap(PackedAttrEntry { cell_id, values })
            }
            other => return Err(Error::BadSchema(format!("unknown record tag {other}"))),
        };
        if pos > buf.len() {
            return Err(Error::Truncated("packed record overran buffer".into()));
        }
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_round_trips() {
        let tree = PackedTree {
            cell_id: 7,
            section_pairs: vec![(0, 1), (1, 2)],
            sections: vec![0, 3, 6],
            coords: vec![(0.0, 0.0, 0.0), (1.0, 1.0, 1.0)],
            radii: vec![0.5, 0.5],
            layers: vec![1, 2],
            parents: vec![-1, 0],
            swc_types: vec![1, 3],
        };
        let buf = pack(&[Record::Tree(tree.clone())]);
        let back = unpack(&buf).unwrap();
        assert_eq!(back, vec![Record::Tree(tree)]);
    }

    #[test]
    fn edge_and_attr_records_round_trip_mixed() {
        let edge = Record::EdgeMap(PackedEdgeRecord {
            dst_id: 3,
            src_ids: vec![10, 11, 12],
            attrs: vec![(ElementKind::F32, 3.0f32.to_le_bytes().to_vec())],
        });
        let attr = Record::AttrMap(PackedAttrEntry {
            cell_id: 9,
            values: vec![(ElementKind::U16, 42u16.to_le_bytes().to_vec())],
        });
        let buf = pack(&[edge.clone(), attr.clone()]);
        let back = unpack(&buf).unwrap();
        assert_eq!(back, vec![edge, attr]);
    }

    #[test]
    fn empty_buffer_yields_no_records() {
        assert_eq!(unpack(&[]).unwrap(), vec![]);
    }

    #[test]
    fn truncated_buffer_is_fatal() {
        let edge = Record::EdgeMap(PackedEdgeRecord {
            dst_id: 1,
            src_ids: vec![1, 2],
            attrs: vec![],
        });
        let mut buf = pack(&[edge]);
        buf.truncate(buf.len() - 1);
        assert!(unpack(&buf).is_err());
    }
}
