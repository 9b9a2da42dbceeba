//! Bounded cache of segments believed to have free slots.
//!
//! A small fixed table of segment numbers mutated only by CAS, plus a
//! spin-mutex guarding the multi-step `get` path. Contexts probe starting
//! from `id % CACHE_SIZE`, giving different contexts a natural preference
//! for different segments.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::MemoryContext;
use crate::segment::Segment;
use crate::storage::table::SegmentTable;

/// Number of cache slots.
pub const CACHE_SIZE: usize = 32;

const EMPTY: u32 = 0;
const NO_OWNER: u64 = 0;

/// Encodes a segment number so that 0 stays free for "empty slot".
#[inline]
fn encode(num: u16) -> u32 {
    num as u32 + 1
}

#[inline]
fn decode(val: u32) -> Option<u16> {
    if val == EMPTY { None } else { Some((val - 1) as u16) }
}

pub(crate) struct SegmentCache {
    owner: AtomicU64,
    slots: [AtomicU32; CACHE_SIZE],
    count: AtomicI32,
}

impl SegmentCache {
    pub(crate) fn new() -> Self {
        Self {
            owner: AtomicU64::new(NO_OWNER),
            slots: std::array::from_fn(|_| AtomicU32::new(EMPTY)),
            count: AtomicI32::new(0),
        }
    }

    #[inline]
    fn bucket(ctx: &MemoryContext) -> usize {
        (ctx.id() % CACHE_SIZE as u64) as usize
    }

    /// Takes the cache-wide lock, spinning until held.
    fn lock(&self, ctx: &MemoryContext) {
        while self
            .owner
            .compare_exchange_weak(NO_OWNER, ctx.id(), Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    /// Releases the cache-wide lock; asserts ownership.
    fn unlock(&self, ctx: &MemoryContext) {
        let prev = self.owner.swap(NO_OWNER, Ordering::Release);
        assert_eq!(prev, ctx.id(), "segment cache unlocked by non-owner");
    }

    /// Inserts `seg` into the first empty slot from the caller's bucket.
    ///
    /// No-op when the segment is already cached or the table is full.
    pub(crate) fn append(&self, ctx: &MemoryContext, seg: &Segment) {
        let enc = encode(seg.num());
        let bucket = Self::bucket(ctx);
        for i in 0..CACHE_SIZE {
            let slot = &self.slots[(bucket + i) % CACHE_SIZE];
            let val = slot.load(Ordering::Relaxed);
            if val == enc {
                return;
            }
            if val == EMPTY
                && slot
                    .compare_exchange(EMPTY, enc, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
            {
                self.count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }

    /// Removes `seg` from the table if present.
    pub(crate) fn remove(&self, ctx: &MemoryContext, seg: &Segment) {
        let enc = encode(seg.num());
        let bucket = Self::bucket(ctx);
        for i in 0..CACHE_SIZE {
            let slot = &self.slots[(bucket + i) % CACHE_SIZE];
            if slot
                .compare_exchange(enc, EMPTY, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.count.fetch_sub(1, Ordering::Relaxed);
                return;
            }
        }
    }

    /// Refills the table from segments that still have free slots.
    fn update(&self, ctx: &MemoryContext, table: &SegmentTable) {
        for seg in table.iter() {
            if seg.has_empty_slot() {
                self.append(ctx, seg);
            }
            if self.count.load(Ordering::Relaxed) >= CACHE_SIZE as i32 {
                break;
            }
        }
    }

    fn probe(&self, ctx: &MemoryContext, table: &SegmentTable) -> Option<Arc<Segment>> {
        if self.count.load(Ordering::Relaxed) <= 0 {
            return None;
        }
        let bucket = Self::bucket(ctx);
        for i in 0..CACHE_SIZE {
            let val = self.slots[(bucket + i) % CACHE_SIZE].load(Ordering::Acquire);
            if let Some(num) = decode(val) {
                if let Some(seg) = table.get(num) {
                    return Some(Arc::clone(seg));
                }
            }
        }
        None
    }

    /// Returns a segment likely to accept a new element.
    ///
    /// Probes the table first, refills it from the segment array next, and
    /// finally grows the array; `None` only when the segment cap is reached
    /// and no cached segment remains.
    pub(crate) fn get(&self, ctx: &MemoryContext, table: &SegmentTable) -> Option<Arc<Segment>> {
        self.lock(ctx);
        let found = self.probe(ctx, table).or_else(|| {
            self.update(ctx, table);
            self.probe(ctx, table).or_else(|| {
                table.allocate().inspect(|seg| self.append(ctx, seg))
            })
        });
        self.unlock(ctx);
        found
    }

    /// Empties the table. Shutdown only.
    pub(crate) fn clear(&self) {
        for slot in &self.slots {
            slot.store(EMPTY, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
    }
}
