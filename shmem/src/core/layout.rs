use std::cell::UnsafeCell;
use std::fmt;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use super::sync::{check, Condvar};

/// Payload bytes available to one serialized tuple.
pub const TUPLE_SIZE: usize = 256;
/// Bytes reserved in the segment for each process-shared exclusive lock.
pub const LOCK_SIZE: usize = 64;

const RAW_END: i32 = -1;
const RAW_REND: i32 = -2;
const RAW_INVALID: i32 = -3;

/// A link stored in the segment: either a slot index or a sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Index {
    Slot(usize),
    /// No successor, or an empty list when stored in `head`/`tail`.
    End,
    /// No predecessor; only the true list head carries it.
    REnd,
    /// Never stored on purpose. Anything else that decodes here is damage.
    Invalid,
}

impl Index {
    #[inline]
    pub fn from_raw(raw: i32) -> Index {
        match raw {
            RAW_END => Index::End,
            RAW_REND => Index::REnd,
            n if n >= 0 => Index::Slot(n as usize),
            _ => Index::Invalid,
        }
    }

    #[inline]
    pub fn to_raw(self) -> i32 {
        match self {
            Index::Slot(n) => n as i32,
            Index::End => RAW_END,
            Index::REnd => RAW_REND,
            Index::Invalid => RAW_INVALID,
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Slot(n) => write!(f, "{}", n),
            Index::End => write!(f, "END"),
            Index::REnd => write!(f, "REND"),
            Index::Invalid => write!(f, "INVALID"),
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Free = 0,
    Valid = 1,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Free => write!(f, "free"),
            Status::Valid => write!(f, "valid"),
        }
    }
}

/// Raw storage a `raw_sync` mutex is initialized into.
#[repr(C, align(8))]
pub struct LockCell(UnsafeCell<[u8; LOCK_SIZE]>);

impl LockCell {
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.0.get() as *mut u8
    }

    /// Tears down the pthread mutex `raw_sync` placed in this cell, which
    /// sits at the first pointer-aligned byte.
    ///
    /// # Safety
    /// The mutex must be initialized, unlocked, and no lock handle may use it
    /// afterwards.
    pub unsafe fn destroy(&self) -> io::Result<()> {
        let mem = self.as_mut_ptr();
        let mutex = mem.add(mem.align_offset(mem::size_of::<*mut u8>())) as *mut libc::pthread_mutex_t;
        check(libc::pthread_mutex_destroy(mutex))
    }
}

/// Segment-wide metadata at offset 0 of the mapping.
#[repr(C)]
pub struct Header {
    head: AtomicI32,
    _reserved0: u32,
    pub head_lock: LockCell,
    tail: AtomicI32,
    _reserved1: u32,
    pub tail_lock: LockCell,
    pub not_empty: Condvar,
}

impl Header {
    #[inline]
    pub fn head(&self) -> Index {
        Index::from_raw(self.head.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_head(&self, index: Index) {
        self.head.store(index.to_raw(), Ordering::Release)
    }

    #[inline]
    pub fn tail(&self) -> Index {
        Index::from_raw(self.tail.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_tail(&self, index: Index) {
        self.tail.store(index.to_raw(), Ordering::Release)
    }
}

/// One storage cell. `N` of them follow the header back to back.
#[repr(C)]
pub struct Slot {
    status: AtomicU32,
    next: AtomicI32,
    prev: AtomicI32,
    _reserved: u32,
    pub lock: LockCell,
    payload: UnsafeCell<[u8; TUPLE_SIZE]>,
}

impl Slot {
    /// Anything but `Valid` reads as free; a fresh segment is all zeroes.
    #[inline]
    pub fn status(&self) -> Status {
        match self.status.load(Ordering::Acquire) {
            1 => Status::Valid,
            _ => Status::Free,
        }
    }

    #[inline]
    pub fn set_status(&self, status: Status) {
        self.status.store(status as u32, Ordering::Release)
    }

    #[inline]
    pub fn next(&self) -> Index {
        Index::from_raw(self.next.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_next(&self, index: Index) {
        self.next.store(index.to_raw(), Ordering::Release)
    }

    #[inline]
    pub fn prev(&self) -> Index {
        Index::from_raw(self.prev.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_prev(&self, index: Index) {
        self.prev.store(index.to_raw(), Ordering::Release)
    }

    /// # Safety
    /// The caller must hold this slot's lock.
    #[inline]
    pub unsafe fn payload(&self) -> &[u8; TUPLE_SIZE] {
        &*self.payload.get()
    }

    /// Copies `bytes` in and zero-fills the remainder.
    ///
    /// # Safety
    /// The caller must hold this slot's lock and `bytes.len() <= TUPLE_SIZE`.
    #[inline]
    pub unsafe fn write_payload(&self, bytes: &[u8]) {
        let dest = &mut *self.payload.get();
        dest[..bytes.len()].copy_from_slice(bytes);
        dest[bytes.len()..].fill(0);
    }
}

pub const HEADER_SIZE: usize = mem::size_of::<Header>();
pub const SLOT_SIZE: usize = mem::size_of::<Slot>();

const _: () = assert!(HEADER_SIZE % 8 == 0);
const _: () = assert!(SLOT_SIZE % 8 == 0);
const _: () = assert!(mem::align_of::<Header>() <= 8);
const _: () = assert!(mem::align_of::<Slot>() <= 8);

/// Total mapping size for `capacity` slots.
#[inline]
pub fn segment_size(capacity: usize) -> usize {
    HEADER_SIZE + capacity * SLOT_SIZE
}

/// Slot count of a mapping of `len` bytes, if `len` is a whole segment.
pub fn capacity_of(len: usize) -> Option<usize> {
    let body = len.checked_sub(HEADER_SIZE)?;
    if body % SLOT_SIZE != 0 || body == 0 {
        return None;
    }
    Some(body / SLOT_SIZE)
}

#[inline]
pub fn slot_offset(index: usize) -> usize {
    HEADER_SIZE + index * SLOT_SIZE
}

#[cfg(test)]
mod tests {
    use raw_sync::locks::{LockInit, Mutex};

    use super::*;

    #[test]
    fn lock_cell_destroys_its_mutex() {
        let cell = LockCell(UnsafeCell::new([0; LOCK_SIZE]));
        let (lock, used) = unsafe { Mutex::new(cell.as_mut_ptr(), std::ptr::null_mut()) }.unwrap();
        assert!(used <= LOCK_SIZE);
        drop(lock.lock().unwrap());
        drop(lock);
        unsafe { cell.destroy() }.unwrap();
    }

    #[test]
    fn sentinels_round_trip() {
        for index in [Index::Slot(0), Index::Slot(41), Index::End, Index::REnd, Index::Invalid] {
            assert_eq!(Index::from_raw(index.to_raw()), index);
        }
        assert_eq!(Index::from_raw(-77), Index::Invalid);
    }

    #[test]
    fn slot_fields_in_order() {
        assert_eq!(lock_offset(), 16);
        assert_eq!(SLOT_SIZE, 16 + LOCK_SIZE + TUPLE_SIZE);
    }

    fn lock_offset() -> usize {
        let slot = mem::MaybeUninit::<Slot>::uninit();
        let base = slot.as_ptr() as usize;
        // SAFETY: only the field address is computed, nothing is read.
        let lock = unsafe { std::ptr::addr_of!((*slot.as_ptr()).lock) } as usize;
        lock - base
    }

    #[test]
    fn capacity_from_mapping_length() {
        assert_eq!(capacity_of(segment_size(1)), Some(1));
        assert_eq!(capacity_of(segment_size(300)), Some(300));
        assert_eq!(capacity_of(segment_size(3) + 1), None);
        assert_eq!(capacity_of(HEADER_SIZE), None);
        assert_eq!(capacity_of(8), None);
    }

    #[test]
    fn zeroed_slot_is_free() {
        let slot: Slot = unsafe { mem::zeroed() };
        assert_eq!(slot.status(), Status::Free);
        slot.set_status(Status::Valid);
        slot.set_next(Index::End);
        slot.set_prev(Index::REnd);
        assert_eq!(slot.status(), Status::Valid);
        assert_eq!(slot.next(), Index::End);
        assert_eq!(slot.prev(), Index::REnd);
        unsafe {
            slot.write_payload(b"abc");
            assert_eq!(&slot.payload()[..4], b"abc\0");
        }
    }
}
