//! Order-preserving diff and three-way merge over playlist sequences.

pub mod diff;
pub mod three_way;

pub use three_way::{
    ConcurrentInserts, ConflictRegion, MergeOptions, MergeResult, Segment, merge_with,
};
