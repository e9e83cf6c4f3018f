//! Redistributes per-cell data between the partitioning a read leaves data
//! in (roughly equal file offsets per rank) and the partitioning compute
//! wants (a user-supplied cell → rank map), and the symmetric direction for
//! writes. Built on this crate's `pack` module for the wire format and
//! `partition::range_partition` for I/O-group sizing.

use crate::group::ProcessGroup;
use crate::pack::{pack, unpack, Record};
use crate::partition::{range_partition, Bin};
use cellmesh_common::Result;
use std::collections::HashMap;

/// Partitions the rank range `[0, world_size)` into `io_size` contiguous
/// groups. Group `i`'s I/O rank is, by convention, the first rank in its
/// bin.
pub fn io_group_bins(world_size: usize, io_size: usize) -> Vec<Bin> {
    range_partition(world_size as u64, io_size.max(1))
}

/// Which I/O group rank `r` belongs to.
pub fn io_group_of(rank: usize, bins: &[Bin]) -> usize {
    bins.iter()
        .position(|b| (b.offset as usize) <= rank && rank < (b.offset + b.len) as usize)
        .expect("rank must fall in exactly one I/O group bin")
}

/// The actual world rank that performs I/O on behalf of group `group_index`.
pub fn io_rank_of_group(group_index: usize, bins: &[Bin]) -> usize {
    bins[group_index].offset as usize
}

/// True if `rank` is the I/O rank for its own group (i.e. it is the first
/// member of its bin).
pub fn is_io_rank(rank: usize, bins: &[Bin]) -> bool {
    bins.iter().any(|b| b.offset as usize == rank)
}

/// The destination-rank send order, starting at the sender's own rank and
/// wrapping around rather than starting from 0, to diffuse congestion when
/// every rank begins sending at once.
pub fn rank_sequence(self_rank: usize, world_size: usize) -> Vec<usize> {
    (0..world_size).map(|i| (self_rank + i) % world_size).collect()
}

/// Scatter after read: each rank holds zero or more `(cell_id, Record)`
/// pairs (I/O ranks hold the decoded file slice, non-I/O ranks hold
/// nothing) and a map from cell id to the set of ranks that own it. Every
/// owning rank receives a copy of the record. A single all-to-all-v does
/// the exchange; this function builds its send buffers in `rank_sequence`
/// order.
pub fn scatter_after_read<G: ProcessGroup>(
    group: &G,
    local_records: &[(u32, Record)],
    node_rank_map: &HashMap<u32, Vec<usize>>,
) -> Result<Vec<(u32, Record)>> {
    let world_size = group.size();
    let mut send: Vec<Vec<(u32, Record)>> = vec![Vec::new(); world_size];
    for (cell, record) in local_records {
        if let Some(owners) = node_rank_map.get(cell) {
            for &owner in owners {
                send[owner].push((*cell, record.clone()));
            }
        }
    }

    let ordered_dests = rank_sequence(group.rank(), world_size);
    let mut send_bytes = vec![Vec::new(); world_size];
    for dest in ordered_dests {
        let recs: Vec<Record> = send[dest].iter().map(|(_, r)| r.clone()).collect();
        let ids: Vec<u32> = send[dest].iter().map(|(c, _)| *c).collect();
        send_bytes[dest] = encode_id_record_pairs(&ids, &recs);
    }

    let bytes_sent: usize = send_bytes.iter().map(Vec::len).sum();
    let recv_bytes = group.all_to_all_bytes(send_bytes);
    let bytes_received: usize = recv_bytes.iter().map(Vec::len).sum();
    tracing::debug!(rank = group.rank(), bytes_sent, bytes_received, "scatter_after_read exchange");

    let mut out = Vec::new();
    for buf in recv_bytes {
        out.extend(decode_id_record_pairs(&buf)?);
    }
    Ok(out)
}

fn encode_id_record_pairs(ids: &[u32], records: &[Record]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(ids.len() as u32).to_le_bytes());
    for id in ids {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    buf.extend_from_slice(&pack(records));
    buf
}

fn decode_id_record_pairs(buf: &[u8]) -> Result<Vec<(u32, Record)>> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let mut ids = Vec::with_capacity(count);
    let mut pos = 4usize;
    for _ in 0..count {
        ids.push(u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()));
        pos += 4;
    }
    let records = unpack(&buf[pos..])?;
    Ok(ids.into_iter().zip(records).collect())
}

/// Gather before write (symmetric to scatter): compute ranks bucket their
/// records by I/O-rank assignment and a single all-to-all-v moves them to
/// the rank that will issue the write. `io_size` groups are computed with
/// `io_group_bins`.
pub fn gather_before_write<G: ProcessGroup>(
    group: &G,
    io_size: usize,
    local_records: &[(u32, Record)],
) -> Result<Vec<(u32, Record)>> {
    let bins = io_group_bins(group.size(), io_size);
    let my_group = io_group_of(group.rank(), &bins);
    let my_io_rank = io_rank_of_group(my_group, &bins);

    let world_size = group.size();
    let mut send = vec![Vec::new(); world_size];
    send[my_io_rank] = local_records.to_vec();

    let send_bytes: Vec<Vec<u8>> = send
        .iter()
        .map(|recs| {
            let ids: Vec<u32> = recs.iter().map(|(c, _)| *c).collect();
            let only_records: Vec<Record> = recs.iter().map(|(_, r)| r.clone()).collect();
            encode_id_record_pairs(&ids, &only_records)
        })
        .collect();

    let bytes_sent: usize = send_bytes.iter().map(Vec::len).sum();
    let recv_bytes = group.all_to_all_bytes(send_bytes);
    let bytes_received: usize = recv_bytes.iter().map(Vec::len).sum();
    tracing::debug!(rank = group.rank(), my_io_rank, bytes_sent, bytes_received, "gather_before_write exchange");

    let mut out = Vec::new();
    for buf in recv_bytes {
        out.extend(decode_id_record_pairs(&buf)?);
    }
    Ok(out)
}
