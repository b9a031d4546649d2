//! A Linda-style tuple space living in one named shared memory segment.
//!
//! Any number of unrelated processes attach to the same segment by name and
//! use it as a concurrent multiset of tuples: producers `output`, consumers
//! `input` (take) or `read` tuples matching a query, blocking up to a timeout.
//! The in-use tuples form a doubly linked list of slot indices kept entirely
//! inside the segment and edited with per-slot lock coupling.

mod core;
mod errors;
pub mod query;
mod reader;
pub mod tuple;
mod writer;

#[cfg(test)]
mod tests;

pub use crate::core::dump::SlotReport;
pub use crate::core::{
    Buffer, Index, Retrieval, ShmemConfig, Status, DEFAULT_CAPACITY, DEFAULT_SHMEM_NAME, TUPLE_SIZE,
};
pub use crate::errors::{
    SegmentError, SpaceError, EXIT_INVALID, EXIT_NOT_FOUND, EXIT_OUT_OF_MEMORY, EXIT_TIMEOUT,
};
pub use crate::query::{Matcher, Query, QueryError};
pub use crate::tuple::{Tuple, Value, ValueKind};
