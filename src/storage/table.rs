//! Process-wide segment table.
//!
//! A fixed array of `SEG_MAX` publish-once slots. Segment pointers are
//! published with release semantics, so a reader that observes a segment
//! also observes its initialized state; `count` is only advanced after the
//! pointer is visible.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use crate::segment::Segment;
use crate::types::SEG_MAX;

pub(crate) struct SegmentTable {
    slots: Box<[OnceLock<Arc<Segment>>]>,
    count: AtomicU32,
    max_segments: u32,
}

impl SegmentTable {
    pub(crate) fn new(max_segments: u32) -> Self {
        let slots: Box<[OnceLock<Arc<Segment>>]> =
            (0..SEG_MAX).map(|_| OnceLock::new()).collect();
        Self {
            slots,
            count: AtomicU32::new(0),
            max_segments: max_segments.min(SEG_MAX as u32),
        }
    }

    #[inline]
    pub(crate) fn get(&self, num: u16) -> Option<&Arc<Segment>> {
        self.slots[num as usize].get()
    }

    #[inline]
    pub(crate) fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn max_segments(&self) -> u32 {
        self.max_segments
    }

    /// Creates and publishes the next segment.
    ///
    /// Serialized by the segment-cache lock; returns `None` once the
    /// configured cap is reached.
    pub(crate) fn allocate(&self) -> Option<Arc<Segment>> {
        let num = self.count.load(Ordering::Relaxed);
        if num >= self.max_segments {
            return None;
        }
        let seg = Arc::new(Segment::new(num as u16));
        if self.slots[num as usize].set(Arc::clone(&seg)).is_err() {
            // Slot already taken: an init-time load raced us, which cannot
            // happen once the store is live.
            return None;
        }
        self.count.store(num + 1, Ordering::Release);
        tracing::debug!(segment = num, "storage.segment.allocate");
        Some(seg)
    }

    /// Publishes segments rebuilt from a persisted image. Init-time only.
    pub(crate) fn install_loaded(&self, segments: Vec<Arc<Segment>>) {
        let count = segments.len() as u32;
        for seg in segments {
            let num = seg.num() as usize;
            self.slots[num]
                .set(seg)
                .unwrap_or_else(|_| panic!("segment {num} installed twice"));
        }
        self.count.store(count, Ordering::Release);
    }

    /// Iterates published segments in numeric order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Segment>> {
        (0..self.count() as usize).filter_map(|num| self.slots[num].get())
    }
}
