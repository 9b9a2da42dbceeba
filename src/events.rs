//! Event emission seam.
//!
//! The store publishes named events at defined mutation points; dispatch,
//! subscription and delivery ordering are entirely the subscriber's
//! concern. Emission order from concurrent operations is unspecified.

use crate::types::Addr;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    AddOutputArc,
    AddInputArc,
    RemoveOutputArc,
    RemoveInputArc,
    RemoveElement,
}

/// Receiver of store events.
pub trait EventSink: Send + Sync {
    /// A named event on `subject`, with `object` as the affected connector
    /// or, for `RemoveElement`, the removed address itself.
    fn emit(&self, subject: Addr, kind: EventKind, object: Addr);

    /// Called once per element before a cascade erases it, so subscribers
    /// can release handles.
    fn element_deleted(&self, addr: Addr) {
        let _ = addr;
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _subject: Addr, _kind: EventKind, _object: Addr) {}
}
