//! Fixed-capacity page of element slots with one spinlock per slot.
//!
//! Each slot pairs an owner-tagged spinlock with the element record it
//! guards. Lock owners are context ids; zero means unheld. The lock is
//! re-entrant per context: multi-element operations may reach the same
//! slot through aliased addresses (a self-loop's begin and end, or one
//! connector heading two incidence lists) and must be able to take it
//! again. Element data is only read or written while the slot lock is held
//! by the calling context, except during single-threaded construction
//! (`from_elements`) and shutdown.
//!
//! Segment 0 never hands out slot 0, keeping `(0, 0)` free to serve as the
//! empty address sentinel.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::context::MemoryContext;
use crate::element::Element;
use crate::types::{ElementsStat, SEG_CAPACITY};

const UNLOCKED: u64 = 0;

struct Slot {
    owner: AtomicU64,
    /// Holds by the owning context; only the owner touches this.
    depth: AtomicU32,
    el: UnsafeCell<Element>,
}

impl Slot {
    fn new() -> Self {
        Self {
            owner: AtomicU64::new(UNLOCKED),
            depth: AtomicU32::new(0),
            el: UnsafeCell::new(Element::default()),
        }
    }

    fn try_acquire(&self, id: u64) -> bool {
        if self.owner.load(Ordering::Relaxed) == id {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if self
            .owner
            .compare_exchange_weak(UNLOCKED, id, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.depth.store(1, Ordering::Relaxed);
            return true;
        }
        false
    }
}

pub struct Segment {
    num: u16,
    slots: Box<[Slot]>,
    free_count: AtomicU32,
}

// Element cells are only touched while the corresponding slot lock is held.
unsafe impl Sync for Segment {}
unsafe impl Send for Segment {}

impl Segment {
    pub fn new(num: u16) -> Self {
        let slots: Box<[Slot]> = (0..SEG_CAPACITY).map(|_| Slot::new()).collect();
        let reserved = if num == 0 { 1 } else { 0 };
        Self {
            num,
            slots,
            free_count: AtomicU32::new((SEG_CAPACITY - reserved) as u32),
        }
    }

    /// Rebuilds a segment from persisted `(offset, element)` records.
    pub fn from_elements(num: u16, elements: impl IntoIterator<Item = (u16, Element)>) -> Self {
        let mut seg = Self::new(num);
        let mut live = 0u32;
        for (offset, el) in elements {
            debug_assert!(el.is_live());
            *seg.slots[offset as usize].el.get_mut() = el;
            live += 1;
        }
        *seg.free_count.get_mut() -= live;
        seg
    }

    #[inline]
    pub fn num(&self) -> u16 {
        self.num
    }

    /// First slot ever handed out by this segment.
    #[inline]
    fn reserved_base(&self) -> usize {
        if self.num == 0 { 1 } else { 0 }
    }

    /// Acquires the slot lock, spinning until held. Re-entrant for the
    /// owning context.
    pub fn lock(&self, ctx: &MemoryContext, offset: u16) {
        let slot = &self.slots[offset as usize];
        while !slot.try_acquire(ctx.id()) {
            std::hint::spin_loop();
        }
    }

    /// Bounded-attempt acquisition; returns false if the lock was not taken.
    pub fn lock_try(&self, ctx: &MemoryContext, offset: u16, max_attempts: u16) -> bool {
        let slot = &self.slots[offset as usize];
        for _ in 0..max_attempts {
            if slot.try_acquire(ctx.id()) {
                return true;
            }
            std::hint::spin_loop();
        }
        false
    }

    /// Releases one hold of the slot lock; asserts the caller owns it.
    pub fn unlock(&self, ctx: &MemoryContext, offset: u16) {
        let slot = &self.slots[offset as usize];
        let owner = slot.owner.load(Ordering::Relaxed);
        assert_eq!(owner, ctx.id(), "slot {}:{} unlocked by non-owner", self.num, offset);
        if slot.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            slot.owner.store(UNLOCKED, Ordering::Release);
        }
    }

    #[inline]
    fn assert_owned(&self, ctx: &MemoryContext, offset: u16) {
        debug_assert_eq!(
            self.slots[offset as usize].owner.load(Ordering::Relaxed),
            ctx.id(),
            "slot {}:{} accessed without lock",
            self.num,
            offset
        );
    }

    /// Reads the element; the caller must hold the slot lock.
    pub fn element(&self, ctx: &MemoryContext, offset: u16) -> Element {
        self.assert_owned(ctx, offset);
        unsafe { *self.slots[offset as usize].el.get() }
    }

    /// Overwrites the element; the caller must hold the slot lock.
    pub fn set_element(&self, ctx: &MemoryContext, offset: u16, el: Element) {
        self.assert_owned(ctx, offset);
        unsafe { *self.slots[offset as usize].el.get() = el }
    }

    /// Locks the first empty slot found and returns its offset.
    ///
    /// The slot stays locked for the caller to fill; `None` means the
    /// segment had no free slot at scan time.
    pub fn lock_empty(&self, ctx: &MemoryContext) -> Option<u16> {
        if !self.has_empty_slot() {
            return None;
        }
        for offset in self.reserved_base()..SEG_CAPACITY {
            let slot = &self.slots[offset];
            if !slot.try_acquire(ctx.id()) {
                continue;
            }
            // The emptiness check only counts while we hold the lock.
            if unsafe { (*slot.el.get()).is_live() } {
                self.unlock(ctx, offset as u16);
                continue;
            }
            self.free_count.fetch_sub(1, Ordering::Relaxed);
            return Some(offset as u16);
        }
        None
    }

    /// Zeroes the slot's type, returning it to the free pool.
    ///
    /// The caller must hold the slot lock, or be running single-threaded
    /// during shutdown.
    pub fn erase(&self, offset: u16) {
        let slot = &self.slots[offset as usize];
        let was_live = unsafe {
            let live = (*slot.el.get()).is_live();
            *slot.el.get() = Element::default();
            live
        };
        if was_live {
            self.free_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Lock-free heuristic; never false while the segment has free slots
    /// accounted for.
    #[inline]
    pub fn has_empty_slot(&self) -> bool {
        self.free_count.load(Ordering::Relaxed) > 0
    }

    /// Accumulates per-kind counts, locking each slot briefly.
    pub fn collect_elements_stat(&self, ctx: &MemoryContext, stat: &mut ElementsStat) {
        for offset in 0..SEG_CAPACITY as u16 {
            self.lock(ctx, offset);
            let el = self.element(ctx, offset);
            self.unlock(ctx, offset);
            let ty = el.ty();
            if !el.is_live() {
                stat.empty_count += 1;
            } else if ty.is_node() {
                stat.node_count += 1;
            } else if ty.is_link() {
                stat.link_count += 1;
            } else if ty.contains(crate::types::ElementType::EDGE_COMMON) {
                stat.edge_count += 1;
            } else {
                stat.arc_count += 1;
            }
        }
    }

    /// Snapshots every live element, locking each slot briefly.
    pub fn collect_live(&self, ctx: &MemoryContext) -> Vec<(u16, Element)> {
        let mut out = Vec::new();
        for offset in 0..SEG_CAPACITY as u16 {
            self.lock(ctx, offset);
            let el = self.element(ctx, offset);
            self.unlock(ctx, offset);
            if el.is_live() {
                out.push((offset, el));
            }
        }
        out
    }
}
