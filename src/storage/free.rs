//! Cascading element removal.
//!
//! Removing a node or link must also remove every connector incident to
//! it, transitively. The set of elements that need mutation is only
//! discovered while walking the graph, so removal runs in two phases:
//!
//! 1. **Discovery.** Starting from the target, walk incidence lists,
//!    locking every element that will be erased or rewired before anything
//!    is mutated. Discovery-phase locks are unbounded: at this point the
//!    operation must run to completion.
//! 2. **Rewire and erase.** With the whole closure held, unlink each
//!    removed connector from its neighbors' lists, erase every collected
//!    slot and hint the allocator cache that the segments have room again.
//!
//! All locks are released only after both phases finish, so no other
//! operation can observe a half-rewired incidence list.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::context::MemoryContext;
use crate::error::{Result, StoreError};
use crate::events::EventKind;
use crate::types::{Addr, Checksum};

use super::Storage;

pub(super) fn free_element(storage: &Storage, ctx: &MemoryContext, addr: Addr) -> Result<()> {
    storage.element_lock(ctx, addr)?;
    if !storage.element(ctx, addr).is_live() {
        let _ = storage.element_unlock(ctx, addr);
        return Err(StoreError::InvalidAddr);
    }

    let mut lock_set: HashSet<Addr> = HashSet::new();
    let mut remove_set: HashSet<Addr> = HashSet::new();
    let mut remove_order: Vec<Addr> = Vec::new();
    let mut queue: VecDeque<Addr> = VecDeque::new();

    lock_set.insert(addr);
    remove_set.insert(addr);
    remove_order.push(addr);
    queue.push_back(addr);

    // Every address entering the lock set is held exactly once.
    fn ensure_locked(
        storage: &Storage,
        ctx: &MemoryContext,
        lock_set: &mut HashSet<Addr>,
        addr: Addr,
    ) {
        if lock_set.insert(addr) {
            storage
                .element_lock(ctx, addr)
                .expect("closure member must name a loaded slot");
        }
    }

    // Phase 1: discover the closure and lock all of it.
    while let Some(current) = queue.pop_front() {
        ensure_locked(storage, ctx, &mut lock_set, current);
        let el = storage.element(ctx, current);
        debug_assert!(el.is_live(), "closure member already erased");

        storage.events().element_deleted(current);

        if let Some(arc) = el.arc_payload().copied() {
            storage
                .events()
                .emit(arc.begin, EventKind::RemoveOutputArc, current);
            storage
                .events()
                .emit(arc.end, EventKind::RemoveInputArc, current);

            ensure_locked(storage, ctx, &mut lock_set, arc.begin);
            ensure_locked(storage, ctx, &mut lock_set, arc.end);

            // Detach from the heads early; arcs deeper in the lists are
            // unlinked sibling-by-sibling in phase 2.
            storage.update_element(ctx, arc.begin, |el| {
                if el.first_out_arc() == current {
                    el.set_first_out_arc(arc.next_out_arc);
                }
            });
            storage.update_element(ctx, arc.end, |el| {
                if el.first_in_arc() == current {
                    el.set_first_in_arc(arc.next_in_arc);
                }
            });

            for sibling in [
                arc.prev_out_arc,
                arc.prev_in_arc,
                arc.next_out_arc,
                arc.next_in_arc,
            ] {
                if sibling.is_not_empty() {
                    ensure_locked(storage, ctx, &mut lock_set, sibling);
                }
            }
        }

        // Enqueue every connector incident to the removed element. Re-read
        // the element: the head detach above may have touched it when a
        // connector attaches to another connector.
        let el = storage.element(ctx, current);
        for chain in [true, false] {
            let mut cursor = if chain { el.first_out_arc() } else { el.first_in_arc() };
            while cursor.is_not_empty() {
                if !remove_set.contains(&cursor) {
                    ensure_locked(storage, ctx, &mut lock_set, cursor);
                    remove_set.insert(cursor);
                    remove_order.push(cursor);
                    queue.push_back(cursor);
                }
                let arc_el = storage.element(ctx, cursor);
                cursor = match arc_el.arc_payload() {
                    Some(arc) => {
                        if chain {
                            arc.next_out_arc
                        } else {
                            arc.next_in_arc
                        }
                    }
                    None => Addr::EMPTY,
                };
            }
        }
    }

    // Phase 2: every cross-reference is locked; rewire and erase.
    for &victim in &remove_order {
        let el = storage.element(ctx, victim);

        if let Some(arc) = el.arc_payload().copied() {
            let (prev, next) = (arc.prev_out_arc, arc.next_out_arc);
            if prev.is_not_empty() {
                storage.update_element(ctx, prev, |el| {
                    if let Some(p) = el.arc_payload_mut() {
                        p.next_out_arc = next;
                    }
                });
            }
            if next.is_not_empty() {
                storage.update_element(ctx, next, |el| {
                    if let Some(p) = el.arc_payload_mut() {
                        p.prev_out_arc = prev;
                    }
                });
            }
            storage.update_element(ctx, arc.begin, |el| {
                if el.first_out_arc() == victim {
                    el.set_first_out_arc(next);
                }
            });

            let (prev, next) = (arc.prev_in_arc, arc.next_in_arc);
            if prev.is_not_empty() {
                storage.update_element(ctx, prev, |el| {
                    if let Some(p) = el.arc_payload_mut() {
                        p.next_in_arc = next;
                    }
                });
            }
            if next.is_not_empty() {
                storage.update_element(ctx, next, |el| {
                    if let Some(p) = el.arc_payload_mut() {
                        p.prev_in_arc = prev;
                    }
                });
            }
            storage.update_element(ctx, arc.end, |el| {
                if el.first_in_arc() == victim {
                    el.set_first_in_arc(next);
                }
            });
        }

        if let Some(sum) = el.checksum() {
            if *sum != Checksum::default() {
                storage.fs().remove_content_ref(victim, sum);
            }
        }

        let seg = storage
            .segment(victim.seg)
            .expect("closure member must name a loaded segment");
        seg.erase(victim.offset);
        storage.cache_hint_free(ctx, victim.seg);
    }

    for &held in &lock_set {
        let _ = storage.element_unlock(ctx, held);
    }

    storage.events().emit(addr, EventKind::RemoveElement, addr);
    debug!(%addr, removed = remove_order.len(), locked = lock_set.len(), "storage.free.cascade");
    Ok(())
}
