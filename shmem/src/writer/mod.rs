use std::sync::atomic::Ordering;

use raw_sync::locks::LockGuard;
use tracing::trace;

use crate::core::layout::TUPLE_SIZE;
use crate::core::{Buffer, Index, Status};
use crate::errors::SpaceError;
use crate::tuple::Tuple;

/// The lock a new element is linked under: the current last slot, or the
/// head lock when the list is empty and there is no last slot to lock.
enum Anchor<'a> {
    Head { _guard: LockGuard<'a> },
    Last { index: usize, _guard: LockGuard<'a> },
}

impl Buffer {
    /// Serializes `tuple` and appends it to the tail of the list.
    pub fn output(&self, tuple: &Tuple) -> Result<usize, SpaceError> {
        let mut bytes = [0u8; TUPLE_SIZE];
        let len = tuple.encode_into(&mut bytes)?;
        self.insert_bytes(&bytes[..len])
    }

    /// Appends one payload and wakes every blocked consumer. Returns the slot
    /// the payload landed in.
    pub fn insert_bytes(&self, payload: &[u8]) -> Result<usize, SpaceError> {
        self.ensure_healthy()?;
        if payload.len() > TUPLE_SIZE {
            return Err(SpaceError::Encode(format!(
                "payload of {} bytes exceeds the {} byte slot",
                payload.len(),
                TUPLE_SIZE
            )));
        }
        let (index, new_guard) = match self.find_free_slot()? {
            Some(v) => v,
            None => return Err(SpaceError::OutOfMemory),
        };

        let header = self.header();
        let anchor = self.lock_last()?;
        let tail_guard = self.lock_tail()?;

        let slot = self.slot(index);
        match &anchor {
            Anchor::Head { .. } => {
                header.set_head(Index::Slot(index));
                slot.set_prev(Index::REnd);
            }
            Anchor::Last { index: last, .. } => {
                self.slot(*last).set_next(Index::Slot(index));
                slot.set_prev(Index::Slot(*last));
            }
        }
        // SAFETY: `new_guard` holds this slot's lock and the length was checked.
        unsafe { slot.write_payload(payload) };
        slot.set_status(Status::Valid);
        header.set_tail(Index::Slot(index));

        drop(anchor);
        drop(tail_guard);
        drop(new_guard);
        trace!(slot = index, "tuple inserted");

        let not_empty = &header.not_empty;
        let guard = not_empty.lock().map_err(|e| SpaceError::Lock(e.to_string()))?;
        not_empty
            .broadcast(&guard)
            .map_err(|e| SpaceError::Lock(e.to_string()))?;
        Ok(index)
    }

    /// Locks whatever the new element must be linked after.
    ///
    /// The tail index is read optimistically and then verified under the
    /// candidate's own lock; losing a race to another producer just means
    /// another round against the new tail.
    fn lock_last(&self) -> Result<Anchor<'_>, SpaceError> {
        let header = self.header();
        loop {
            let tail = {
                let _tail_guard = self.lock_tail()?;
                header.tail()
            };
            match self.resolve(tail, "tail")? {
                None => {
                    let guard = self.lock_head()?;
                    if header.head() == Index::End {
                        return Ok(Anchor::Head { _guard: guard });
                    }
                }
                Some(last) => {
                    let guard = self.lock_slot(last)?;
                    let slot = self.slot(last);
                    if slot.status() == Status::Valid && slot.next() == Index::End {
                        return Ok(Anchor::Last { index: last, _guard: guard });
                    }
                }
            }
        }
    }

    /// Round-robin scan for a free slot, starting where the previous scan of
    /// this handle stopped. The slot comes back locked and marked as the end
    /// of a list; it stays `Free` until the caller links it in.
    pub(crate) fn find_free_slot(&self) -> Result<Option<(usize, LockGuard<'_>)>, SpaceError> {
        for _ in 0..self.capacity() {
            let index = self.alloc_cursor.fetch_add(1, Ordering::Relaxed) % self.capacity();
            let guard = self.lock_slot(index)?;
            let slot = self.slot(index);
            if slot.status() == Status::Free {
                slot.set_next(Index::End);
                return Ok(Some((index, guard)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::unique_config;
    use crate::tuple::Value;

    #[test]
    fn first_insert_sets_head_and_tail() -> Result<(), Box<dyn std::error::Error>> {
        let buffer = Buffer::init(&unique_config(3))?;
        let index = buffer.insert_bytes(b"one")?;
        assert_eq!(buffer.header().head(), Index::Slot(index));
        assert_eq!(buffer.header().tail(), Index::Slot(index));
        assert_eq!(buffer.slot(index).prev(), Index::REnd);
        assert_eq!(buffer.slot(index).next(), Index::End);
        assert_eq!(buffer.slot(index).status(), Status::Valid);
        buffer.destroy()?;
        Ok(())
    }

    #[test]
    fn inserts_link_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let buffer = Buffer::init(&unique_config(4))?;
        let a = buffer.insert_bytes(b"a")?;
        let b = buffer.insert_bytes(b"b")?;
        let c = buffer.insert_bytes(b"c")?;
        assert_eq!(buffer.header().head(), Index::Slot(a));
        assert_eq!(buffer.slot(a).next(), Index::Slot(b));
        assert_eq!(buffer.slot(b).prev(), Index::Slot(a));
        assert_eq!(buffer.slot(b).next(), Index::Slot(c));
        assert_eq!(buffer.slot(c).prev(), Index::Slot(b));
        assert_eq!(buffer.header().tail(), Index::Slot(c));
        buffer.destroy()?;
        Ok(())
    }

    #[test]
    fn full_buffer_reports_out_of_memory() -> Result<(), Box<dyn std::error::Error>> {
        let buffer = Buffer::init(&unique_config(2))?;
        buffer.insert_bytes(b"a")?;
        buffer.insert_bytes(b"b")?;
        let tail = buffer.header().tail();
        assert!(matches!(buffer.insert_bytes(b"c"), Err(SpaceError::OutOfMemory)));
        assert_eq!(buffer.header().tail(), tail);
        buffer.destroy()?;
        Ok(())
    }

    #[test]
    fn oversized_payload_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let buffer = Buffer::init(&unique_config(2))?;
        let big = vec![1u8; TUPLE_SIZE + 1];
        assert!(matches!(buffer.insert_bytes(&big), Err(SpaceError::Encode(_))));
        let tuple = Tuple::new(vec![Value::String("x".repeat(TUPLE_SIZE))]);
        assert!(matches!(buffer.output(&tuple), Err(SpaceError::Encode(_))));
        assert_eq!(buffer.header().head(), Index::End);
        buffer.destroy()?;
        Ok(())
    }

    #[test]
    fn allocator_skips_valid_slots() -> Result<(), Box<dyn std::error::Error>> {
        let buffer = Buffer::init(&unique_config(3))?;
        assert_eq!(buffer.insert_bytes(b"a")?, 0);
        buffer.alloc_cursor.store(0, Ordering::Relaxed);
        let (index, guard) = buffer.find_free_slot()?.expect("two slots are free");
        assert_eq!(index, 1);
        drop(guard);
        buffer.destroy()?;
        Ok(())
    }
}
