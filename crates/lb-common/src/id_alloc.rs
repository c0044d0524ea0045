//! Bounded identifier allocator.
//!
//! Hands out the smallest unused ID in `[1, max_id]`. ID 0 is reserved as
//! the "no ID" sentinel. Released IDs are reissued lowest-first.

use lb_map::{LbId, LbIdKind, RawLbId};
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

/// Error type for allocator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdAllocError {
    #[error("{kind} ID space exhausted (max {max_id})")]
    Exhausted { kind: &'static str, max_id: RawLbId },

    #[error("{kind} ID {id} out of range [1, {max_id}]")]
    OutOfRange {
        kind: &'static str,
        id: RawLbId,
        max_id: RawLbId,
    },

    #[error("{kind} ID {id} already allocated")]
    InUse { kind: &'static str, id: RawLbId },
}

/// Allocator for one kind of forwarding table identifier.
///
/// IDs below `next` are either in use or listed in `free`; IDs at or
/// above `next` have never been issued since the last reset.
pub struct IdAllocator<K: LbIdKind> {
    max_id: RawLbId,
    next: u32,
    free: BTreeSet<RawLbId>,
    _marker: PhantomData<K>,
}

impl<K: LbIdKind> IdAllocator<K> {
    /// Creates an empty allocator over `[1, max_id]`.
    pub fn new(max_id: RawLbId) -> Self {
        Self {
            max_id,
            next: 1,
            free: BTreeSet::new(),
            _marker: PhantomData,
        }
    }

    pub fn max_id(&self) -> RawLbId {
        self.max_id
    }

    /// Returns the number of IDs currently handed out.
    pub fn allocated_count(&self) -> usize {
        (self.next as usize - 1) - self.free.len()
    }

    pub fn is_allocated(&self, id: LbId<K>) -> bool {
        let raw = id.as_raw();
        raw != 0 && u32::from(raw) < self.next && !self.free.contains(&raw)
    }

    /// Allocates the smallest free ID.
    pub fn allocate(&mut self) -> Result<LbId<K>, IdAllocError> {
        let raw = match self.free.pop_first() {
            Some(raw) => raw,
            None if self.next <= u32::from(self.max_id) => {
                let raw = self.next as RawLbId;
                self.next += 1;
                raw
            }
            None => {
                return Err(IdAllocError::Exhausted {
                    kind: K::kind_name(),
                    max_id: self.max_id,
                })
            }
        };

        LbId::from_raw(raw).ok_or(IdAllocError::OutOfRange {
            kind: K::kind_name(),
            id: raw,
            max_id: self.max_id,
        })
    }

    /// Reserves a specific ID, e.g. one found in the forwarding table at
    /// startup.
    pub fn acquire(&mut self, id: LbId<K>) -> Result<(), IdAllocError> {
        let raw = id.as_raw();
        if raw == 0 || raw > self.max_id {
            return Err(IdAllocError::OutOfRange {
                kind: K::kind_name(),
                id: raw,
                max_id: self.max_id,
            });
        }
        if self.is_allocated(id) {
            return Err(IdAllocError::InUse {
                kind: K::kind_name(),
                id: raw,
            });
        }

        let raw32 = u32::from(raw);
        if raw32 >= self.next {
            // Skipped-over IDs stay available.
            for skipped in self.next..raw32 {
                self.free.insert(skipped as RawLbId);
            }
            self.next = raw32 + 1;
        } else {
            self.free.remove(&raw);
        }
        Ok(())
    }

    /// Returns an ID to the pool.
    ///
    /// Releasing a free, reserved or out-of-range ID does nothing. Returns
    /// true if the ID was in use.
    pub fn release(&mut self, id: LbId<K>) -> bool {
        if !self.is_allocated(id) {
            return false;
        }

        let raw = id.as_raw();
        if u32::from(raw) + 1 == self.next {
            self.next -= 1;
            // Keep `free` limited to IDs below the high-water mark.
            while self.next > 1 && self.free.remove(&((self.next - 1) as RawLbId)) {
                self.next -= 1;
            }
        } else {
            self.free.insert(raw);
        }
        true
    }

    /// Forgets every allocation.
    pub fn reset(&mut self) {
        self.next = 1;
        self.free.clear();
    }
}

impl<K: LbIdKind> fmt::Debug for IdAllocator<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAllocator")
            .field("kind", &K::kind_name())
            .field("max_id", &self.max_id)
            .field("allocated", &self.allocated_count())
            .finish()
    }
}
