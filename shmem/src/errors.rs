use std::{fmt, io};

use crate::query::QueryError;

/// Failure to create, open, size, map or tear down the shared segment.
#[derive(Debug)]
pub enum SegmentError {
    Shmem(shared_memory::ShmemError),
    Lock(String),
    Io(io::Error),
    Layout(String),
    Config(String),
}

impl SegmentError {
    /// The OS error code behind this failure, if there is one.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            SegmentError::Shmem(e) => match e {
                shared_memory::ShmemError::MapCreateFailed(code)
                | shared_memory::ShmemError::MapOpenFailed(code)
                | shared_memory::ShmemError::UnknownOsError(code) => Some(*code as i32),
                _ => None,
            },
            SegmentError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Opening failed because no segment carries the requested name.
    pub fn is_not_found(&self) -> bool {
        match self {
            SegmentError::Shmem(shared_memory::ShmemError::MapOpenFailed(code)) => {
                *code as i32 == libc::ENOENT
            }
            SegmentError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::Shmem(e) => write!(f, "Shared memory error: {}", e),
            SegmentError::Lock(s) => write!(f, "Lock setup error: {}", s),
            SegmentError::Io(e) => write!(f, "IO error: {}", e),
            SegmentError::Layout(s) => write!(f, "Segment layout error: {}", s),
            SegmentError::Config(s) => write!(f, "Invalid configuration: {}", s),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SegmentError::Shmem(e) => Some(e),
            SegmentError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<shared_memory::ShmemError> for SegmentError {
    fn from(err: shared_memory::ShmemError) -> Self {
        SegmentError::Shmem(err)
    }
}

impl From<io::Error> for SegmentError {
    fn from(err: io::Error) -> Self {
        SegmentError::Io(err)
    }
}

pub const EXIT_TIMEOUT: i32 = 2;
pub const EXIT_OUT_OF_MEMORY: i32 = 3;
pub const EXIT_INVALID: i32 = 4;
/// The named segment does not exist.
pub const EXIT_NOT_FOUND: i32 = 5;

/// Everything an operation on an attached tuple space can report.
#[derive(Debug)]
pub enum SpaceError {
    Segment(SegmentError),
    Lock(String),
    OutOfMemory,
    Timeout,
    InvalidQuery(QueryError),
    Encode(String),
    Decode(String),
    Corrupted(String),
}

impl SpaceError {
    /// Expected operational outcomes a caller can retry or report; the rest
    /// mean the segment (or this handle to it) is unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SpaceError::OutOfMemory
                | SpaceError::Timeout
                | SpaceError::InvalidQuery(_)
                | SpaceError::Encode(_)
        )
    }

    /// Process exit status for the command line front ends. Codes up to
    /// `EXIT_NOT_FOUND` are reserved, so an OS error code in that range is
    /// reported as 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            SpaceError::Timeout => EXIT_TIMEOUT,
            SpaceError::OutOfMemory => EXIT_OUT_OF_MEMORY,
            SpaceError::InvalidQuery(_) | SpaceError::Encode(_) => EXIT_INVALID,
            SpaceError::Segment(e) if e.is_not_found() => EXIT_NOT_FOUND,
            SpaceError::Segment(e) => e.os_code().filter(|code| *code > EXIT_NOT_FOUND).unwrap_or(1),
            SpaceError::Lock(_) | SpaceError::Decode(_) | SpaceError::Corrupted(_) => 1,
        }
    }

    pub(crate) fn lock(err: Box<dyn std::error::Error>) -> SpaceError {
        SpaceError::Lock(err.to_string())
    }
}

impl fmt::Display for SpaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpaceError::Segment(e) => write!(f, "{}", e),
            SpaceError::Lock(s) => write!(f, "Lock error: {}", s),
            SpaceError::OutOfMemory => write!(f, "No free slot left in the tuple space"),
            SpaceError::Timeout => write!(f, "Timed out waiting for a matching tuple"),
            SpaceError::InvalidQuery(e) => write!(f, "Invalid query: {}", e),
            SpaceError::Encode(s) => write!(f, "Cannot encode tuple: {}", s),
            SpaceError::Decode(s) => write!(f, "Cannot decode tuple: {}", s),
            SpaceError::Corrupted(s) => write!(f, "Corrupted segment: {}", s),
        }
    }
}

impl std::error::Error for SpaceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpaceError::Segment(e) => Some(e),
            SpaceError::InvalidQuery(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SegmentError> for SpaceError {
    fn from(err: SegmentError) -> Self {
        SpaceError::Segment(err)
    }
}

impl From<QueryError> for SpaceError {
    fn from(err: QueryError) -> Self {
        SpaceError::InvalidQuery(err)
    }
}
