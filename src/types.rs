//! Core value types shared across the store.
//!
//! An [`Addr`] is the stable identity of one element: the index of the
//! segment holding it plus the slot offset inside that segment. Both halves
//! are 16 bits, so an address packs into a `u32` and is cheap to copy,
//! compare and hash. `(0, 0)` is reserved as the empty sentinel; segment 0
//! never hands out slot 0.

use std::fmt;

use sha2::{Digest, Sha256};

/// Slots per segment.
pub const SEG_CAPACITY: usize = 1024;

/// Maximum number of segments addressable by a [`Addr`].
pub const SEG_MAX: usize = u16::MAX as usize + 1;

/// Byte width of a link content digest (SHA-256).
pub const CHECKSUM_LEN: usize = 32;

/// Stable (segment, offset) identity of an element.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Addr {
    pub seg: u16,
    pub offset: u16,
}

impl Addr {
    /// The distinguished empty address.
    pub const EMPTY: Addr = Addr { seg: 0, offset: 0 };

    #[inline]
    pub const fn new(seg: u16, offset: u16) -> Self {
        Self { seg, offset }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    #[inline]
    pub fn is_not_empty(&self) -> bool {
        !self.is_empty()
    }

    /// Packs the address into a single `u32`.
    #[inline]
    pub const fn to_raw(self) -> u32 {
        ((self.seg as u32) << 16) | self.offset as u32
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self { seg: (raw >> 16) as u16, offset: raw as u16 }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.seg, self.offset)
    }
}

bitflags::bitflags! {
    /// Type bits of an element.
    ///
    /// The low bits select the element kind (node, link, or one of the
    /// connector kinds) and are mutually exclusive across kinds; the
    /// remaining bits are subtype qualifiers that may be OR-ed freely with
    /// a kind. A live element always has a non-zero type; a freed slot has
    /// type zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ElementType: u16 {
        const NODE        = 0x0001;
        const LINK        = 0x0002;
        /// Undirected common edge.
        const EDGE_COMMON = 0x0004;
        /// Directed common arc.
        const ARC_COMMON  = 0x0008;
        /// Membership (access) arc.
        const ARC_ACCESS  = 0x0010;

        // constancy qualifiers
        const CONST = 0x0020;
        const VAR   = 0x0040;

        // access-arc qualifiers
        const POS  = 0x0080;
        const NEG  = 0x0100;
        const FUZ  = 0x0200;
        const TEMP = 0x0400;
        const PERM = 0x0800;

        // node qualifiers
        const TUPLE  = 0x1000;
        const STRUCT = 0x2000;
        const ROLE   = 0x4000;
        const CLASS  = 0x8000;
    }
}

impl ElementType {
    /// Bits identifying any connector variant.
    pub const ARC_MASK: ElementType = ElementType::EDGE_COMMON
        .union(ElementType::ARC_COMMON)
        .union(ElementType::ARC_ACCESS);

    /// Bits identifying the element kind; everything else is subtype.
    pub const ELEMENT_MASK: ElementType = ElementType::NODE
        .union(ElementType::LINK)
        .union(ElementType::ARC_MASK);

    #[inline]
    pub fn is_node(self) -> bool {
        self.contains(ElementType::NODE)
    }

    #[inline]
    pub fn is_link(self) -> bool {
        self.contains(ElementType::LINK)
    }

    #[inline]
    pub fn is_arc(self) -> bool {
        self.intersects(ElementType::ARC_MASK)
    }

    /// The kind bits of this type.
    #[inline]
    pub fn kind(self) -> ElementType {
        self & ElementType::ELEMENT_MASK
    }

    /// The subtype bits of this type.
    #[inline]
    pub fn subtype(self) -> ElementType {
        self & !ElementType::ELEMENT_MASK
    }
}

/// Fixed-width digest of link content.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Checksum(pub [u8; CHECKSUM_LEN]);

impl Checksum {
    /// Digests a content stream.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; CHECKSUM_LEN];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(CHECKSUM_LEN * 2);
        for b in self.0 {
            use fmt::Write;
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self([0u8; CHECKSUM_LEN])
    }
}

/// Per-kind element counts gathered by a storage scan.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementsStat {
    pub node_count: u64,
    pub link_count: u64,
    pub arc_count: u64,
    pub edge_count: u64,
    pub empty_count: u64,
    pub segments_count: u32,
}

impl ElementsStat {
    /// Total live elements.
    pub fn live_count(&self) -> u64 {
        self.node_count + self.link_count + self.arc_count + self.edge_count
    }
}
