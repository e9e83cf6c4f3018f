//! Process-group collectives, partitioning, and wire framing used to
//! distribute graph data across a distributed-memory job.

pub mod group;
pub mod pack;
pub mod partition;
pub mod scatter;
pub mod session;
pub mod size_protocol;

pub use group::{LocalGroup, ProcessGroup, ProcessGroupExt};
pub use pack::{pack, unpack, PackedAttrEntry, PackedEdgeRecord, PackedTree, Record};
pub use partition::{range_partition, range_partition_rank, Bin};
pub use scatter::{
    gather_before_write, io_group_bins, io_group_of, io_rank_of_group, is_io_rank, rank_sequence,
    scatter_after_read,
};
pub use session::Session;
pub use size_protocol::{negotiate, negotiate_with_last_rank_tail, Negotiated};
