//! The element store.
//!
//! `Storage` owns the segment table, the free-slot cache and the
//! persistence layer, and carries every public operation on addresses.
//! All mutations go through per-slot locks; multi-element mutations
//! (`arc_new`, `free`) acquire every lock they will need before touching
//! shared state.

mod free;
pub(crate) mod table;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::SegmentCache;
use crate::config::StoreConfig;
use crate::context::{ContextRegistry, MemoryContext};
use crate::element::Element;
use crate::error::{Result, StoreError};
use crate::events::{EventKind, EventSink, NullEventSink};
use crate::fs::FileStorage;
use crate::segment::Segment;
use crate::types::{Addr, Checksum, ElementType, ElementsStat, SEG_CAPACITY};

use table::SegmentTable;

/// Bounded spin attempts for the deadlock-avoiding lock path of `arc_new`.
pub const MAX_LOCK_ATTEMPTS: u16 = 100;

pub struct Storage {
    table: SegmentTable,
    cache: SegmentCache,
    fs: FileStorage,
    events: Arc<dyn EventSink>,
    contexts: ContextRegistry,
    initialized: AtomicBool,
}

impl Storage {
    /// Opens the store at the configured path, loading any persisted image.
    pub fn initialize(config: StoreConfig) -> Result<Self> {
        Self::initialize_with_events(config, Arc::new(NullEventSink))
    }

    /// Opens the store with a subscriber for mutation events.
    pub fn initialize_with_events(
        config: StoreConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let fs = FileStorage::initialize(&config.path, config.clear)?;
        let table = SegmentTable::new(config.max_segments);
        if !config.clear {
            table.install_loaded(fs.load_segments()?);
        }
        info!(
            path = %config.path.display(),
            segments = table.count(),
            max_segments = table.max_segments(),
            "storage.initialize"
        );
        Ok(Self {
            table,
            cache: SegmentCache::new(),
            fs,
            events,
            contexts: ContextRegistry::new(),
            initialized: AtomicBool::new(true),
        })
    }

    /// Flushes state if asked and tears the store down.
    pub fn shutdown(self, save_state: bool) -> Result<()> {
        if save_state {
            let ctx = self.contexts.create();
            self.fs.flush_segments(&ctx, &self.table)?;
        }
        self.initialized.store(false, Ordering::Release);
        self.cache.clear();
        info!(save_state, "storage.shutdown");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Mints a fresh context for a new logical accessor.
    pub fn context(&self) -> MemoryContext {
        self.contexts.create()
    }

    pub fn segments_count(&self) -> u32 {
        self.table.count()
    }

    // ----- element locks ---------------------------------------------------

    fn segment_for(&self, addr: Addr) -> Result<&Arc<Segment>> {
        if addr.offset as usize >= SEG_CAPACITY {
            return Err(StoreError::InvalidAddr);
        }
        self.table.get(addr.seg).ok_or(StoreError::InvalidAddr)
    }

    /// Acquires the element lock, spinning until held.
    pub fn element_lock(&self, ctx: &MemoryContext, addr: Addr) -> Result<()> {
        self.segment_for(addr)?.lock(ctx, addr.offset);
        Ok(())
    }

    /// Bounded-attempt acquisition; `Ok(false)` means contention, `Err`
    /// means the address does not name a loaded slot.
    pub fn element_lock_try(
        &self,
        ctx: &MemoryContext,
        addr: Addr,
        max_attempts: u16,
    ) -> Result<bool> {
        Ok(self.segment_for(addr)?.lock_try(ctx, addr.offset, max_attempts))
    }

    /// Releases the element lock; panics if the caller does not hold it.
    pub fn element_unlock(&self, ctx: &MemoryContext, addr: Addr) -> Result<()> {
        self.segment_for(addr)?.unlock(ctx, addr.offset);
        Ok(())
    }

    /// Reads the element at `addr`; the caller must hold its lock.
    pub(crate) fn element(&self, ctx: &MemoryContext, addr: Addr) -> Element {
        self.table
            .get(addr.seg)
            .expect("locked address must name a loaded segment")
            .element(ctx, addr.offset)
    }

    /// Read-modify-write of the element at `addr` under its held lock.
    pub(crate) fn update_element(
        &self,
        ctx: &MemoryContext,
        addr: Addr,
        mutate: impl FnOnce(&mut Element),
    ) {
        let seg = self
            .table
            .get(addr.seg)
            .expect("locked address must name a loaded segment");
        let mut el = seg.element(ctx, addr.offset);
        mutate(&mut el);
        seg.set_element(ctx, addr.offset, el);
    }

    // ----- allocation ------------------------------------------------------

    /// Finds a free slot, fills it with `el` and returns its address with
    /// the slot lock still held. `None` when the segment cap is reached and
    /// no cached segment has room.
    fn append_into_segments(&self, ctx: &MemoryContext, el: Element) -> Option<Addr> {
        loop {
            let seg = self.cache.get(ctx, &self.table)?;
            if let Some(offset) = seg.lock_empty(ctx) {
                seg.set_element(ctx, offset, el);
                return Some(Addr::new(seg.num(), offset));
            }
            self.cache.remove(ctx, &seg);
        }
    }

    /// Creates a node with the given subtype bits.
    ///
    /// Returns the empty address when the store is full.
    pub fn node_new(&self, ctx: &MemoryContext, ty: ElementType) -> Addr {
        debug_assert!(!ty.is_arc(), "node subtype must not carry connector bits");
        match self.append_into_segments(ctx, Element::node(ElementType::NODE | ty)) {
            Some(addr) => {
                self.element_unlock(ctx, addr).expect("fresh slot is loaded");
                addr
            }
            None => Addr::EMPTY,
        }
    }

    /// Creates a link with empty content.
    pub fn link_new(&self, ctx: &MemoryContext) -> Addr {
        match self.append_into_segments(ctx, Element::link()) {
            Some(addr) => {
                self.element_unlock(ctx, addr).expect("fresh slot is loaded");
                addr
            }
            None => Addr::EMPTY,
        }
    }

    // ----- arc creation ----------------------------------------------------

    /// Creates a connector from `begin` to `end` and splices it at the head
    /// of both incidence lists.
    ///
    /// Locks are taken in a fixed order (begin, end, current list heads)
    /// with bounded attempts; on contention everything acquired so far is
    /// released and the whole acquisition retried. Returns the empty
    /// address when either endpoint is invalid or the store is full.
    pub fn arc_new(
        &self,
        ctx: &MemoryContext,
        ty: ElementType,
        begin: Addr,
        end: Addr,
    ) -> Addr {
        debug_assert!(!ty.is_node(), "connector type must not carry the node bit");
        let arc_ty = if ty.is_arc() { ty } else { ElementType::ARC_COMMON | ty };

        loop {
            let (held, first_out, first_in) = match self.lock_for_arc_insert(ctx, begin, end) {
                Ok(Some(locks)) => locks,
                Ok(None) => continue,
                Err(_) => return Addr::EMPTY,
            };

            let Some(addr) = self.append_into_segments(ctx, Element::arc(arc_ty, begin, end))
            else {
                self.release_all(ctx, &held);
                return Addr::EMPTY;
            };
            debug_assert!(addr != first_out && addr != first_in);

            self.events.emit(begin, EventKind::AddOutputArc, addr);
            self.events.emit(end, EventKind::AddInputArc, addr);

            self.update_element(ctx, addr, |el| {
                let arc = el.arc_payload_mut().expect("freshly created connector");
                arc.next_out_arc = first_out;
                arc.next_in_arc = first_in;
            });
            if first_out.is_not_empty() {
                self.update_element(ctx, first_out, |el| {
                    if let Some(arc) = el.arc_payload_mut() {
                        arc.prev_out_arc = addr;
                    }
                });
            }
            if first_in.is_not_empty() {
                self.update_element(ctx, first_in, |el| {
                    if let Some(arc) = el.arc_payload_mut() {
                        arc.prev_in_arc = addr;
                    }
                });
            }
            self.update_element(ctx, begin, |el| el.set_first_out_arc(addr));
            self.update_element(ctx, end, |el| el.set_first_in_arc(addr));

            self.element_unlock(ctx, addr).expect("fresh slot is loaded");
            self.release_all(ctx, &held);
            debug!(%addr, %begin, %end, "storage.arc.new");
            return addr;
        }
    }

    /// Takes the lock set `arc_new` needs: begin, end, then the current
    /// list heads, each with bounded attempts.
    ///
    /// `Ok(None)` means a lock timed out and the caller should retry from
    /// scratch; `Err` means an endpoint is not a live element. Slot locks
    /// are re-entrant per context, so aliased addresses (begin == end, or
    /// one connector heading both lists) are simply held twice and
    /// released twice.
    fn lock_for_arc_insert(
        &self,
        ctx: &MemoryContext,
        begin: Addr,
        end: Addr,
    ) -> Result<Option<(Vec<Addr>, Addr, Addr)>> {
        let mut held: Vec<Addr> = Vec::with_capacity(4);
        match self.lock_for_arc_insert_inner(ctx, begin, end, &mut held) {
            Ok(Some((first_out, first_in))) => Ok(Some((held, first_out, first_in))),
            Ok(None) => {
                self.release_all(ctx, &held);
                Ok(None)
            }
            Err(err) => {
                self.release_all(ctx, &held);
                Err(err)
            }
        }
    }

    fn lock_for_arc_insert_inner(
        &self,
        ctx: &MemoryContext,
        begin: Addr,
        end: Addr,
        held: &mut Vec<Addr>,
    ) -> Result<Option<(Addr, Addr)>> {
        if !self.try_hold(ctx, begin, held)? {
            return Ok(None);
        }
        if !self.try_hold(ctx, end, held)? {
            return Ok(None);
        }

        let begin_el = self.element(ctx, begin);
        let end_el = self.element(ctx, end);
        if !begin_el.is_live() || !end_el.is_live() {
            return Err(StoreError::InvalidAddr);
        }

        let first_out = begin_el.first_out_arc();
        if first_out.is_not_empty() && !self.try_hold(ctx, first_out, held)? {
            return Ok(None);
        }
        let first_in = end_el.first_in_arc();
        if first_in.is_not_empty() && !self.try_hold(ctx, first_in, held)? {
            return Ok(None);
        }
        Ok(Some((first_out, first_in)))
    }

    fn try_hold(&self, ctx: &MemoryContext, addr: Addr, held: &mut Vec<Addr>) -> Result<bool> {
        let locked = self.element_lock_try(ctx, addr, MAX_LOCK_ATTEMPTS)?;
        if locked {
            held.push(addr);
        }
        Ok(locked)
    }

    /// Releases a lock set in reverse acquisition order.
    fn release_all(&self, ctx: &MemoryContext, held: &[Addr]) {
        for addr in held.iter().rev() {
            let _ = self.element_unlock(ctx, *addr);
        }
    }

    // ----- removal ---------------------------------------------------------

    /// Removes the element at `addr` and, transitively, every connector
    /// incident to anything removed.
    pub fn free(&self, ctx: &MemoryContext, addr: Addr) -> Result<()> {
        free::free_element(self, ctx, addr)
    }

    // ----- reads and subtype updates ---------------------------------------

    /// True when `addr` names a live element.
    pub fn is_element(&self, ctx: &MemoryContext, addr: Addr) -> bool {
        if self.element_lock(ctx, addr).is_err() {
            return false;
        }
        let live = self.element(ctx, addr).is_live();
        let _ = self.element_unlock(ctx, addr);
        live
    }

    pub fn get_element_type(&self, ctx: &MemoryContext, addr: Addr) -> Result<ElementType> {
        self.with_live_element(ctx, addr, |el| Ok(el.ty()))
    }

    /// Replaces the subtype bits, preserving the element kind.
    ///
    /// Rejects any `ty` that carries element-kind bits.
    pub fn change_element_subtype(
        &self,
        ctx: &MemoryContext,
        addr: Addr,
        ty: ElementType,
    ) -> Result<()> {
        if ty.intersects(ElementType::ELEMENT_MASK) {
            return Err(StoreError::InvalidParams(
                "subtype update must not touch element-kind bits",
            ));
        }
        self.element_lock(ctx, addr)?;
        let el = self.element(ctx, addr);
        if !el.is_live() {
            let _ = self.element_unlock(ctx, addr);
            return Err(StoreError::InvalidAddr);
        }
        self.update_element(ctx, addr, |el| {
            el.set_ty(el.ty().kind() | ty.subtype());
        });
        self.element_unlock(ctx, addr)
    }

    /// Head of the out-going incidence list of any element.
    pub fn get_first_out_arc(&self, ctx: &MemoryContext, addr: Addr) -> Result<Addr> {
        self.with_live_element(ctx, addr, |el| Ok(el.first_out_arc()))
    }

    /// Head of the in-coming incidence list of any element.
    pub fn get_first_in_arc(&self, ctx: &MemoryContext, addr: Addr) -> Result<Addr> {
        self.with_live_element(ctx, addr, |el| Ok(el.first_in_arc()))
    }

    /// Successor of a connector in its begin's out-list.
    pub fn get_next_out_arc(&self, ctx: &MemoryContext, addr: Addr) -> Result<Addr> {
        self.with_live_element(ctx, addr, |el| {
            el.arc_payload()
                .map(|arc| arc.next_out_arc)
                .ok_or(StoreError::InvalidType("list links exist only on connectors"))
        })
    }

    /// Successor of a connector in its end's in-list.
    pub fn get_next_in_arc(&self, ctx: &MemoryContext, addr: Addr) -> Result<Addr> {
        self.with_live_element(ctx, addr, |el| {
            el.arc_payload()
                .map(|arc| arc.next_in_arc)
                .ok_or(StoreError::InvalidType("list links exist only on connectors"))
        })
    }

    /// Predecessor of a connector in its begin's out-list.
    pub fn get_prev_out_arc(&self, ctx: &MemoryContext, addr: Addr) -> Result<Addr> {
        self.with_live_element(ctx, addr, |el| {
            el.arc_payload()
                .map(|arc| arc.prev_out_arc)
                .ok_or(StoreError::InvalidType("list links exist only on connectors"))
        })
    }

    /// Predecessor of a connector in its end's in-list.
    pub fn get_prev_in_arc(&self, ctx: &MemoryContext, addr: Addr) -> Result<Addr> {
        self.with_live_element(ctx, addr, |el| {
            el.arc_payload()
                .map(|arc| arc.prev_in_arc)
                .ok_or(StoreError::InvalidType("list links exist only on connectors"))
        })
    }

    pub fn get_arc_begin(&self, ctx: &MemoryContext, addr: Addr) -> Result<Addr> {
        self.with_live_element(ctx, addr, |el| {
            el.arc_payload()
                .map(|arc| arc.begin)
                .ok_or(StoreError::InvalidType("endpoints exist only on connectors"))
        })
    }

    pub fn get_arc_end(&self, ctx: &MemoryContext, addr: Addr) -> Result<Addr> {
        self.with_live_element(ctx, addr, |el| {
            el.arc_payload()
                .map(|arc| arc.end)
                .ok_or(StoreError::InvalidType("endpoints exist only on connectors"))
        })
    }

    /// Stores `data` as the link's content and records its digest in the
    /// element.
    pub fn set_link_content(
        &self,
        ctx: &MemoryContext,
        addr: Addr,
        data: &[u8],
    ) -> Result<()> {
        self.element_lock(ctx, addr)?;
        let result = (|| {
            let el = self.element(ctx, addr);
            if !el.is_live() {
                return Err(StoreError::InvalidAddr);
            }
            let Some(old) = el.checksum() else {
                return Err(StoreError::InvalidType("content exists only on links"));
            };
            let sum = Checksum::of(data);
            if *old != Checksum::default() && *old != sum {
                self.fs.remove_content_ref(addr, old);
            }
            self.fs.write_content(addr, &sum, data)?;
            self.update_element(ctx, addr, |el| el.set_checksum(sum));
            Ok(())
        })();
        let _ = self.element_unlock(ctx, addr);
        result
    }

    /// Reads back the content stream stored for the link.
    pub fn get_link_content(&self, ctx: &MemoryContext, addr: Addr) -> Result<Vec<u8>> {
        self.element_lock(ctx, addr)?;
        let result = (|| {
            let el = self.element(ctx, addr);
            if !el.is_live() {
                return Err(StoreError::InvalidAddr);
            }
            let Some(sum) = el.checksum() else {
                return Err(StoreError::InvalidType("content exists only on links"));
            };
            self.fs.read_content(sum)
        })();
        let _ = self.element_unlock(ctx, addr);
        result
    }

    /// All links whose content digests to the same value as `data`.
    pub fn find_links_with_content(&self, data: &[u8]) -> Result<Vec<Addr>> {
        self.fs.find_links(&Checksum::of(data))
    }

    /// Scans every segment, counting elements per kind.
    pub fn get_elements_stat(&self, ctx: &MemoryContext) -> Result<ElementsStat> {
        let mut stat = ElementsStat {
            segments_count: self.table.count(),
            ..ElementsStat::default()
        };
        for seg in self.table.iter() {
            seg.collect_elements_stat(ctx, &mut stat);
        }
        Ok(stat)
    }

    fn with_live_element<T>(
        &self,
        ctx: &MemoryContext,
        addr: Addr,
        read: impl FnOnce(&Element) -> Result<T>,
    ) -> Result<T> {
        self.element_lock(ctx, addr)?;
        let el = self.element(ctx, addr);
        let result = if el.is_live() { read(&el) } else { Err(StoreError::InvalidAddr) };
        let _ = self.element_unlock(ctx, addr);
        result
    }

    pub(crate) fn events(&self) -> &dyn EventSink {
        self.events.as_ref()
    }

    pub(crate) fn fs(&self) -> &FileStorage {
        &self.fs
    }

    pub(crate) fn cache_hint_free(&self, ctx: &MemoryContext, seg_num: u16) {
        if let Some(seg) = self.table.get(seg_num) {
            self.cache.append(ctx, seg);
        }
    }

    pub(crate) fn segment(&self, num: u16) -> Option<&Arc<Segment>> {
        self.table.get(num)
    }
}
