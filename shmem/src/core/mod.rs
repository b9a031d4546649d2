use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ::shared_memory::{Shmem, ShmemConf};
use raw_sync::locks::{LockGuard, LockImpl, LockInit, Mutex};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::errors::{SegmentError, SpaceError};

pub mod dump;
pub mod layout;
pub mod sync;

pub use layout::{Header, Index, Slot, Status, TUPLE_SIZE};

pub const DEFAULT_SHMEM_NAME: &str = "linda";
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmemConfig {
    /// OS identifier of the segment; every process using the same name sees
    /// the same tuple space.
    pub name: String,
    /// Number of slots. Only read by `Buffer::init`.
    pub capacity: usize,
}

impl Default for ShmemConfig {
    fn default() -> Self {
        ShmemConfig {
            name: DEFAULT_SHMEM_NAME.to_string(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ShmemConfig {
    pub fn new(name: impl Into<String>, capacity: usize) -> ShmemConfig {
        ShmemConfig {
            name: name.into(),
            capacity,
        }
    }

    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.name.is_empty() {
            return Err(SegmentError::Config("segment name is empty".to_string()));
        }
        if self.capacity == 0 || self.capacity > i32::MAX as usize {
            return Err(SegmentError::Config(format!(
                "capacity must be between 1 and {}, got {}",
                i32::MAX,
                self.capacity
            )));
        }
        Ok(())
    }
}

/// Which kind of retrieval a walk performs once it finds a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retrieval {
    /// Unlink the matched slot and hand it back to the free pool.
    Take,
    /// Leave the matched slot where it is.
    Read,
}

/// One process's handle onto a shared tuple space.
///
/// The lock handles only point into the mapping, so they are declared (and
/// dropped) before `shmem`.
pub struct Buffer {
    head_lock: Box<dyn LockImpl>,
    tail_lock: Box<dyn LockImpl>,
    slot_locks: Vec<Box<dyn LockImpl>>,
    pub(crate) alloc_cursor: AtomicUsize,
    poisoned: AtomicBool,
    capacity: usize,
    shmem: Shmem,
}

// SAFETY: every lock behind the handles is a process-shared pthread mutex and
// is therefore usable from any thread; the mapping itself is only touched
// through atomics or under those locks.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

fn lock_err(err: Box<dyn std::error::Error>) -> SegmentError {
    SegmentError::Lock(err.to_string())
}

impl Buffer {
    /// Creates the named segment and lays out an empty list with every slot free.
    pub fn init(cfg: &ShmemConfig) -> Result<Buffer, SegmentError> {
        cfg.validate()?;
        let size = layout::segment_size(cfg.capacity);
        let mut shmem = match ShmemConf::new().size(size).os_id(&cfg.name).create() {
            Ok(v) => v,
            Err(e) => {
                error!(name = %cfg.name, error = %e, "cannot create segment");
                return Err(e.into());
            }
        };
        let base = shmem.as_ptr();
        // SAFETY: the mapping is at least `size` bytes and page aligned, and no
        // other process can know about it before `init` returns.
        let header = unsafe { &*(base as *const Header) };
        header.set_head(Index::End);
        header.set_tail(Index::End);
        let head_lock = unsafe { Self::new_lock(header.head_lock.as_mut_ptr(), base) }?;
        let tail_lock = unsafe { Self::new_lock(header.tail_lock.as_mut_ptr(), base) }?;
        unsafe { header.not_empty.init() }?;

        let mut slot_locks = Vec::with_capacity(cfg.capacity);
        for i in 0..cfg.capacity {
            let slot = unsafe { &*(base.add(layout::slot_offset(i)) as *const Slot) };
            slot.set_status(Status::Free);
            slot.set_next(Index::End);
            slot.set_prev(Index::End);
            slot_locks.push(unsafe { Self::new_lock(slot.lock.as_mut_ptr(), slot as *const Slot as *mut u8) }?);
        }
        // The segment outlives this process until someone calls `destroy`.
        shmem.set_owner(false);
        debug!(name = %cfg.name, capacity = cfg.capacity, size, "segment initialized");

        Ok(Buffer {
            head_lock,
            tail_lock,
            slot_locks,
            alloc_cursor: AtomicUsize::new(0),
            poisoned: AtomicBool::new(false),
            capacity: cfg.capacity,
            shmem,
        })
    }

    /// Maps a segment some other process initialized. The data is not touched.
    pub fn attach(cfg: &ShmemConfig) -> Result<Buffer, SegmentError> {
        let shmem = match ShmemConf::new().os_id(&cfg.name).open() {
            Ok(v) => v,
            Err(e) => {
                error!(name = %cfg.name, error = %e, "cannot open segment");
                return Err(e.into());
            }
        };
        let capacity = layout::capacity_of(shmem.len()).ok_or_else(|| {
            SegmentError::Layout(format!(
                "segment '{}' is {} bytes, not a header plus whole slots",
                cfg.name,
                shmem.len()
            ))
        })?;

        let base = shmem.as_ptr();
        let header = unsafe { &*(base as *const Header) };
        let head_lock = unsafe { Self::existing_lock(header.head_lock.as_mut_ptr(), base) }?;
        let tail_lock = unsafe { Self::existing_lock(header.tail_lock.as_mut_ptr(), base) }?;
        let mut slot_locks = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let slot_ptr = unsafe { base.add(layout::slot_offset(i)) };
            let slot = unsafe { &*(slot_ptr as *const Slot) };
            slot_locks.push(unsafe { Self::existing_lock(slot.lock.as_mut_ptr(), slot_ptr) }?);
        }
        debug!(name = %cfg.name, capacity, "segment attached");

        Ok(Buffer {
            head_lock,
            tail_lock,
            slot_locks,
            alloc_cursor: AtomicUsize::new(0),
            poisoned: AtomicBool::new(false),
            capacity,
            shmem,
        })
    }

    /// Releases every lock and the condition variable, unmaps the region and
    /// removes the name. Every other process must have detached already. The
    /// name is removed even when releasing a primitive fails.
    pub fn destroy(self) -> Result<(), SegmentError> {
        let Buffer {
            head_lock,
            tail_lock,
            slot_locks,
            capacity,
            mut shmem,
            ..
        } = self;
        drop(slot_locks);
        drop(head_lock);
        drop(tail_lock);

        let base = shmem.as_ptr();
        let header = unsafe { &*(base as *const Header) };
        // SAFETY: the handles above were the only users of these cells in
        // this process, and every other process has detached.
        let mut released = unsafe { header.not_empty.destroy() };
        let cells = [&header.head_lock, &header.tail_lock].into_iter().chain(
            (0..capacity).map(|i| unsafe { &(*(base.add(layout::slot_offset(i)) as *const Slot)).lock }),
        );
        for cell in cells {
            let rc = unsafe { cell.destroy() };
            if released.is_ok() {
                released = rc;
            }
        }

        let name = shmem.get_os_id().to_string();
        // Dropping an owning mapping unmaps it and unlinks the name.
        shmem.set_owner(true);
        drop(shmem);
        released?;
        debug!(name = %name, "segment destroyed");
        Ok(())
    }

    unsafe fn new_lock(mem: *mut u8, data: *mut u8) -> Result<Box<dyn LockImpl>, SegmentError> {
        Self::check_lock_size(mem)?;
        let (lock, _) = Mutex::new(mem, data).map_err(lock_err)?;
        Ok(lock)
    }

    unsafe fn existing_lock(mem: *mut u8, data: *mut u8) -> Result<Box<dyn LockImpl>, SegmentError> {
        Self::check_lock_size(mem)?;
        let (lock, _) = Mutex::from_existing(mem, data).map_err(lock_err)?;
        Ok(lock)
    }

    fn check_lock_size(mem: *mut u8) -> Result<(), SegmentError> {
        let needed = Mutex::size_of(Some(mem));
        if needed > layout::LOCK_SIZE {
            return Err(SegmentError::Layout(format!(
                "a process-shared mutex needs {} bytes, the segment reserves {}",
                needed,
                layout::LOCK_SIZE
            )));
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &str {
        self.shmem.get_os_id()
    }

    #[inline]
    pub(crate) fn header(&self) -> &Header {
        // SAFETY: the mapping starts with a header initialized by `init`.
        unsafe { &*(self.shmem.as_ptr() as *const Header) }
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &Slot {
        debug_assert!(index < self.capacity);
        // SAFETY: `index < capacity` and the mapping holds `capacity` slots.
        unsafe { &*(self.shmem.as_ptr().add(layout::slot_offset(index)) as *const Slot) }
    }

    #[inline]
    pub(crate) fn lock_head(&self) -> Result<LockGuard<'_>, SpaceError> {
        self.head_lock.lock().map_err(SpaceError::lock)
    }

    #[inline]
    pub(crate) fn lock_tail(&self) -> Result<LockGuard<'_>, SpaceError> {
        self.tail_lock.lock().map_err(SpaceError::lock)
    }

    #[inline]
    pub(crate) fn lock_slot(&self, index: usize) -> Result<LockGuard<'_>, SpaceError> {
        self.slot_locks[index].lock().map_err(SpaceError::lock)
    }

    /// Resolves a link read from the segment into an in-range slot index.
    pub(crate) fn resolve(&self, index: Index, what: &str) -> Result<Option<usize>, SpaceError> {
        match index {
            Index::End => Ok(None),
            Index::Slot(i) if i < self.capacity => Ok(Some(i)),
            other => Err(self.corrupted(format!("{} holds link {}", what, other))),
        }
    }

    pub(crate) fn ensure_healthy(&self) -> Result<(), SpaceError> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(SpaceError::Corrupted(format!(
                "handle to '{}' was poisoned by an earlier invariant violation",
                self.name()
            )));
        }
        Ok(())
    }

    /// Aborts in debug builds; in release builds poisons this handle.
    pub(crate) fn corrupted(&self, message: String) -> SpaceError {
        error!(name = %self.name(), "{}", message);
        self.poisoned.store(true, Ordering::Release);
        if cfg!(debug_assertions) {
            panic!("tuple space invariant violated: {}", message);
        }
        SpaceError::Corrupted(message)
    }

    pub(crate) fn check(&self, holds: bool, message: impl FnOnce() -> String) -> Result<(), SpaceError> {
        if holds {
            Ok(())
        } else {
            Err(self.corrupted(message()))
        }
    }
}
