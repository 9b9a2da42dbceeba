//! semagraph: a concurrent, segmented in-memory store for typed semantic
//! graphs.
//!
//! Elements (nodes, content-bearing links, and connectors) live in
//! fixed-capacity segments with one re-entrant spinlock per slot.
//! Connectors thread themselves through intrusive doubly-linked incidence
//! lists on their endpoints, so insertion and removal are O(1) under the
//! element locks alone. Removal cascades: freeing an element locks the
//! full closure of affected neighbors before rewiring anything.

mod cache;
pub mod config;
pub mod context;
pub mod element;
pub mod error;
pub mod events;
pub mod fs;
pub mod segment;
pub mod storage;
pub mod template;
pub mod types;

pub use crate::config::StoreConfig;
pub use crate::context::MemoryContext;
pub use crate::element::{ArcPayload, Element};
pub use crate::error::{Result, StoreError};
pub use crate::events::{EventKind, EventSink, NullEventSink};
pub use crate::storage::{Storage, MAX_LOCK_ATTEMPTS};
pub use crate::template::{Template, TemplateItem, TemplateLoader, TemplateParams, Triple};
pub use crate::types::{
    Addr, Checksum, ElementType, ElementsStat, CHECKSUM_LEN, SEG_CAPACITY, SEG_MAX,
};
