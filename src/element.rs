//! The fixed-size element record.
//!
//! One element is one vertex of the stored graph: a node, a link (a literal
//! whose content lives in the content store, identified here by checksum),
//! or a connector holding its two endpoints plus its position in both
//! incidence lists. Every element additionally carries the heads of its own
//! out- and in-incidence lists.

use crate::error::{Result, StoreError};
use crate::types::{Addr, Checksum, ElementType, CHECKSUM_LEN};

/// Encoded size of one element record.
/// type (2) + first_out_arc (4) + first_in_arc (4) + payload (32)
pub const ELEMENT_LEN: usize = 42;

/// Connector payload: endpoints plus intrusive list links.
///
/// `next_out_arc`/`prev_out_arc` chain this connector into `begin`'s
/// out-list, `next_in_arc`/`prev_in_arc` into `end`'s in-list.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ArcPayload {
    pub begin: Addr,
    pub end: Addr,
    pub next_out_arc: Addr,
    pub prev_out_arc: Addr,
    pub next_in_arc: Addr,
    pub prev_in_arc: Addr,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Payload {
    #[default]
    None,
    Link(Checksum),
    Arc(ArcPayload),
}

/// One slot-sized graph element.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    ty: ElementType,
    first_out_arc: Addr,
    first_in_arc: Addr,
    payload: Payload,
}

impl Element {
    /// A node element; `ty` must already carry the node kind bit.
    pub fn node(ty: ElementType) -> Self {
        debug_assert!(ty.is_node());
        Self { ty, ..Self::default() }
    }

    /// A link element with empty content.
    pub fn link() -> Self {
        Self {
            ty: ElementType::LINK,
            payload: Payload::Link(Checksum::default()),
            ..Self::default()
        }
    }

    /// A connector between `begin` and `end`, not yet spliced into any list.
    pub fn arc(ty: ElementType, begin: Addr, end: Addr) -> Self {
        debug_assert!(ty.is_arc());
        Self {
            ty,
            payload: Payload::Arc(ArcPayload { begin, end, ..ArcPayload::default() }),
            ..Self::default()
        }
    }

    /// True when the slot holds a live element.
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.ty.is_empty()
    }

    #[inline]
    pub fn ty(&self) -> ElementType {
        self.ty
    }

    #[inline]
    pub fn set_ty(&mut self, ty: ElementType) {
        self.ty = ty;
    }

    #[inline]
    pub fn first_out_arc(&self) -> Addr {
        self.first_out_arc
    }

    #[inline]
    pub fn set_first_out_arc(&mut self, addr: Addr) {
        self.first_out_arc = addr;
    }

    #[inline]
    pub fn first_in_arc(&self) -> Addr {
        self.first_in_arc
    }

    #[inline]
    pub fn set_first_in_arc(&mut self, addr: Addr) {
        self.first_in_arc = addr;
    }

    pub fn arc_payload(&self) -> Option<&ArcPayload> {
        match &self.payload {
            Payload::Arc(arc) => Some(arc),
            _ => None,
        }
    }

    pub fn arc_payload_mut(&mut self) -> Option<&mut ArcPayload> {
        match &mut self.payload {
            Payload::Arc(arc) => Some(arc),
            _ => None,
        }
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        match &self.payload {
            Payload::Link(sum) => Some(sum),
            _ => None,
        }
    }

    pub fn set_checksum(&mut self, sum: Checksum) {
        debug_assert!(self.ty.is_link());
        self.payload = Payload::Link(sum);
    }

    /// Encodes the record as big-endian bytes.
    pub fn encode(&self) -> [u8; ELEMENT_LEN] {
        let mut buf = [0u8; ELEMENT_LEN];
        buf[0..2].copy_from_slice(&self.ty.bits().to_be_bytes());
        buf[2..6].copy_from_slice(&self.first_out_arc.to_raw().to_be_bytes());
        buf[6..10].copy_from_slice(&self.first_in_arc.to_raw().to_be_bytes());
        match &self.payload {
            Payload::None => {}
            Payload::Link(sum) => buf[10..10 + CHECKSUM_LEN].copy_from_slice(&sum.0),
            Payload::Arc(arc) => {
                let mut offset = 10;
                for addr in [
                    arc.begin,
                    arc.end,
                    arc.next_out_arc,
                    arc.prev_out_arc,
                    arc.next_in_arc,
                    arc.prev_in_arc,
                ] {
                    buf[offset..offset + 4].copy_from_slice(&addr.to_raw().to_be_bytes());
                    offset += 4;
                }
            }
        }
        buf
    }

    /// Decodes a record; the payload variant follows the kind bits.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ELEMENT_LEN {
            return Err(StoreError::Corruption("element record truncated"));
        }
        let bits = u16::from_be_bytes([bytes[0], bytes[1]]);
        let ty = ElementType::from_bits(bits)
            .ok_or(StoreError::Corruption("unknown element type bits"))?;
        let first_out_arc = Addr::from_raw(u32::from_be_bytes(bytes[2..6].try_into().unwrap()));
        let first_in_arc = Addr::from_raw(u32::from_be_bytes(bytes[6..10].try_into().unwrap()));

        let payload = if ty.is_link() {
            let mut sum = [0u8; CHECKSUM_LEN];
            sum.copy_from_slice(&bytes[10..10 + CHECKSUM_LEN]);
            Payload::Link(Checksum(sum))
        } else if ty.is_arc() {
            let mut addrs = [Addr::EMPTY; 6];
            for (i, slot) in addrs.iter_mut().enumerate() {
                let at = 10 + i * 4;
                *slot = Addr::from_raw(u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap()));
            }
            Payload::Arc(ArcPayload {
                begin: addrs[0],
                end: addrs[1],
                next_out_arc: addrs[2],
                prev_out_arc: addrs[3],
                next_in_arc: addrs[4],
                prev_in_arc: addrs[5],
            })
        } else {
            Payload::None
        };

        Ok(Self { ty, first_out_arc, first_in_arc, payload })
    }
}
