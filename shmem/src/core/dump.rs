use std::fmt;

use crate::errors::SpaceError;
use crate::tuple::Tuple;

use super::{Buffer, Index, Status};

/// Point-in-time view of one slot, for operational inspection.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotReport {
    pub index: usize,
    pub status: Status,
    pub next: Index,
    pub prev: Index,
    /// Decoded payload of a valid slot, if it decodes.
    pub tuple: Option<Tuple>,
}

impl fmt::Display for SlotReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>4}] {:<5} prev={:<5} next={:<5}",
            self.index,
            self.status.to_string(),
            self.prev.to_string(),
            self.next.to_string()
        )?;
        if let Some(tuple) = &self.tuple {
            write!(f, " {}", tuple)?;
        }
        Ok(())
    }
}

impl Buffer {
    /// Must be called with the slot's lock held.
    fn report(&self, index: usize) -> SlotReport {
        let slot = self.slot(index);
        let status = slot.status();
        let tuple = match status {
            // SAFETY: the caller holds this slot's lock.
            Status::Valid => Tuple::decode(unsafe { slot.payload() }).ok(),
            Status::Free => None,
        };
        SlotReport {
            index,
            status,
            next: slot.next(),
            prev: slot.prev(),
            tuple,
        }
    }

    /// Every slot in index order, each read under its own lock.
    pub fn dump_slots(&self) -> Result<Vec<SlotReport>, SpaceError> {
        self.ensure_healthy()?;
        let mut reports = Vec::with_capacity(self.capacity());
        for index in 0..self.capacity() {
            let _guard = self.lock_slot(index)?;
            reports.push(self.report(index));
        }
        Ok(reports)
    }

    /// The live list from head to tail, walked hand over hand. Never blocks
    /// waiting for new elements.
    pub fn dump_list(&self) -> Result<Vec<SlotReport>, SpaceError> {
        self.ensure_healthy()?;
        let mut reports = Vec::new();
        let head_guard = self.lock_head()?;
        let mut cur = match self.resolve(self.header().head(), "head")? {
            Some(first) => first,
            None => return Ok(reports),
        };
        let mut cur_guard = self.lock_slot(cur)?;
        drop(head_guard);
        loop {
            let report = self.report(cur);
            self.check(report.status == Status::Valid, || {
                format!("slot {} is linked into the list but free", cur)
            })?;
            let next = self.resolve(report.next, "next link")?;
            reports.push(report);
            match next {
                Some(next) => {
                    let next_guard = self.lock_slot(next)?;
                    cur_guard = next_guard;
                    cur = next;
                }
                None => break,
            }
            // A list longer than the pool means a cycle.
            self.check(reports.len() <= self.capacity(), || "list links form a cycle".to_string())?;
        }
        drop(cur_guard);
        Ok(reports)
    }
}
