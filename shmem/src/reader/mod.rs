use std::time::Duration;

use raw_sync::locks::LockGuard;
use tracing::trace;

use crate::core::sync::Deadline;
use crate::core::{Buffer, Index, Retrieval, Status};
use crate::errors::SpaceError;
use crate::query::{Matcher, Query};
use crate::tuple::Tuple;

/// Lock on whatever links to the visited slot: the head index for the first
/// element, otherwise the preceding slot.
enum Pred<'a> {
    Head { _guard: LockGuard<'a> },
    Slot { index: usize, _guard: LockGuard<'a> },
}

impl Pred<'_> {
    fn index(&self) -> Index {
        match self {
            Pred::Head { .. } => Index::REnd,
            Pred::Slot { index, .. } => Index::Slot(*index),
        }
    }
}

/// Position of a walk: the visited slot and its predecessor, both locked.
struct Cursor<'a> {
    pred: Pred<'a>,
    cur: usize,
    cur_guard: LockGuard<'a>,
}

fn cond_err(err: std::io::Error) -> SpaceError {
    SpaceError::Lock(err.to_string())
}

impl Buffer {
    /// Removes and returns the first tuple matching `query`, waiting up to
    /// `timeout` for one to show up.
    pub fn input(&self, query: &str, timeout: Duration) -> Result<Tuple, SpaceError> {
        let query: Query = query.parse()?;
        let payload = self.retrieve(&query, timeout, Retrieval::Take)?;
        Tuple::decode(&payload)
    }

    /// Like `input` but leaves the tuple in place.
    pub fn read(&self, query: &str, timeout: Duration) -> Result<Tuple, SpaceError> {
        let query: Query = query.parse()?;
        let payload = self.retrieve(&query, timeout, Retrieval::Read)?;
        Tuple::decode(&payload)
    }

    /// Walks the list from the head until `matcher` accepts a payload.
    ///
    /// Every wait inside one call draws from the same `timeout` budget. Only
    /// the visited slot and its predecessor are locked at any time.
    pub fn retrieve(
        &self,
        matcher: &dyn Matcher,
        timeout: Duration,
        mode: Retrieval,
    ) -> Result<Vec<u8>, SpaceError> {
        self.ensure_healthy()?;
        let deadline = Deadline::after(timeout);
        let mut cursor = self.first_elem(&deadline)?;
        loop {
            let slot = self.slot(cursor.cur);
            self.check(slot.status() == Status::Valid, || {
                format!("slot {} is linked into the list but free", cursor.cur)
            })?;
            // SAFETY: `cursor.cur_guard` holds this slot's lock.
            let payload = unsafe { slot.payload() };
            if matcher.matches(payload) {
                let found = payload.to_vec();
                if mode == Retrieval::Take {
                    self.unlink(cursor)?;
                } else {
                    trace!(slot = cursor.cur, "tuple read");
                }
                return Ok(found);
            }
            cursor = self.advance(cursor, &deadline)?;
        }
    }

    /// Locks the head index and the first slot, waiting for the list to
    /// become non-empty.
    fn first_elem(&self, deadline: &Deadline) -> Result<Cursor<'_>, SpaceError> {
        let header = self.header();
        loop {
            let head_guard = self.lock_head()?;
            if let Some(first) = self.resolve(header.head(), "head")? {
                let cur_guard = self.lock_slot(first)?;
                return Ok(Cursor {
                    pred: Pred::Head { _guard: head_guard },
                    cur: first,
                    cur_guard,
                });
            }
            drop(head_guard);

            let mut cond = header.not_empty.lock().map_err(cond_err)?;
            // Producers broadcast under this mutex, so an insertion that lands
            // after this check cannot be missed.
            if header.head() != Index::End {
                continue;
            }
            let remaining = deadline.remaining().ok_or(SpaceError::Timeout)?;
            cond.wait_timeout(remaining).map_err(cond_err)?;
        }
    }

    /// Moves one step along the list, waiting for a successor when the
    /// visited slot is the tail.
    fn advance<'a>(&'a self, cursor: Cursor<'a>, deadline: &Deadline) -> Result<Cursor<'a>, SpaceError> {
        let Cursor { pred, cur, cur_guard } = cursor;
        let next = self.slot(cur).next();
        drop(pred);
        match self.resolve(next, "next link")? {
            Some(next) => {
                // `cur` stays locked, so nobody can unlink `next` meanwhile.
                let next_guard = self.lock_slot(next)?;
                Ok(Cursor {
                    pred: Pred::Slot { index: cur, _guard: cur_guard },
                    cur: next,
                    cur_guard: next_guard,
                })
            }
            None => {
                drop(cur_guard);
                self.wait_for_successor(cur, deadline)
            }
        }
    }

    /// Blocks until `tail` has a successor. If `tail` itself is taken while
    /// waiting, the walk starts over from the head.
    fn wait_for_successor(&self, tail: usize, deadline: &Deadline) -> Result<Cursor<'_>, SpaceError> {
        let not_empty = &self.header().not_empty;
        loop {
            let mut cond = not_empty.lock().map_err(cond_err)?;
            let guard = self.lock_slot(tail)?;
            let slot = self.slot(tail);
            if slot.status() != Status::Valid {
                drop(guard);
                drop(cond);
                trace!(slot = tail, "waited-on tail was taken, restarting walk");
                return self.first_elem(deadline);
            }
            match self.resolve(slot.next(), "next link")? {
                Some(next) => {
                    drop(cond);
                    let next_guard = self.lock_slot(next)?;
                    return Ok(Cursor {
                        pred: Pred::Slot { index: tail, _guard: guard },
                        cur: next,
                        cur_guard: next_guard,
                    });
                }
                None => {
                    drop(guard);
                    let remaining = deadline.remaining().ok_or(SpaceError::Timeout)?;
                    cond.wait_timeout(remaining).map_err(cond_err)?;
                }
            }
        }
    }

    /// Splices the visited slot out of the list and frees it.
    fn unlink(&self, cursor: Cursor<'_>) -> Result<(), SpaceError> {
        let Cursor { pred, cur, cur_guard } = cursor;
        let header = self.header();
        let slot = self.slot(cur);
        let pred_index = pred.index();
        self.check(slot.prev() == pred_index, || {
            format!("slot {} links back to {} instead of {}", cur, slot.prev(), pred_index)
        })?;

        let next = self.resolve(slot.next(), "next link")?;
        let next_guard = match next {
            Some(n) => Some(self.lock_slot(n)?),
            None => None,
        };
        let tail_guard = match next {
            Some(_) => None,
            None => Some(self.lock_tail()?),
        };

        let next_index = next.map(Index::Slot).unwrap_or(Index::End);
        match &pred {
            Pred::Head { .. } => header.set_head(next_index),
            Pred::Slot { index, .. } => self.slot(*index).set_next(next_index),
        }
        match next {
            Some(n) => self.slot(n).set_prev(pred_index),
            None => header.set_tail(match pred_index {
                Index::REnd => Index::End,
                other => other,
            }),
        }
        slot.set_status(Status::Free);
        slot.set_next(Index::End);
        slot.set_prev(Index::End);

        drop(tail_guard);
        drop(next_guard);
        drop(cur_guard);
        drop(pred);
        trace!(slot = cur, "tuple taken");
        Ok(())
    }
}
