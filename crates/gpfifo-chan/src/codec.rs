//! # Descriptor Codec
//!
//! Encoding of segment descriptors into descriptor table slots. The layout is
//! a strategy so that consumers with different slot formats can share the
//! table manager.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use gpfifo_core::{Error, GpuAddr, Result};

// =============================================================================
// SEGMENT DESCRIPTORS
// =============================================================================

bitflags! {
    /// Per-descriptor flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u32 {
        /// Segment lives outside the pushbuffer
        const SUBROUTINE = 1 << 0;
        /// Consumer waits for earlier work before fetching this segment
        const SYNC = 1 << 1;
    }
}

/// One contiguous span of commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Consumer address of the first byte
    pub addr: GpuAddr,
    /// Length in bytes
    pub length: u32,
    /// Descriptor flags
    pub flags: EntryFlags,
}

impl Segment {
    /// Create a segment without flags
    pub const fn new(addr: GpuAddr, length: u32) -> Self {
        Self {
            addr,
            length,
            flags: EntryFlags::empty(),
        }
    }

    /// Check whether this segment points outside the pushbuffer
    #[inline]
    pub fn is_subroutine(&self) -> bool {
        self.flags.contains(EntryFlags::SUBROUTINE)
    }
}

/// Raw descriptor table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct RawEntry {
    /// Low word
    pub lo: u32,
    /// High word
    pub hi: u32,
}

impl RawEntry {
    /// Size of one slot in bytes
    pub const SIZE: u32 = core::mem::size_of::<RawEntry>() as u32;

    /// Slot contents in memory order
    #[inline]
    pub fn words(self) -> [u32; 2] {
        bytemuck::cast(self)
    }

    /// Rebuild a slot from words in memory order
    #[inline]
    pub fn from_words(words: [u32; 2]) -> Self {
        bytemuck::cast(words)
    }
}

static_assertions::assert_eq_size!(RawEntry, u64);

// =============================================================================
// CODEC TRAIT
// =============================================================================

/// Descriptor slot format
pub trait DescriptorCodec: Send {
    /// Codec name
    fn name(&self) -> &'static str;

    /// Largest segment one descriptor can describe, in bytes
    fn max_length(&self) -> u32;

    /// Encode a segment
    fn encode(&self, segment: &Segment) -> Result<RawEntry>;

    /// Decode a slot
    fn decode(&self, raw: RawEntry) -> Segment;
}

// =============================================================================
// PACKED CODEC
// =============================================================================

/// Two-word slot layout
///
/// ```text
/// lo: [31:2] addr[31:2]                [1:0] zero
/// hi: [31:19] length in words  [18] SUBROUTINE  [17] SYNC  [16:0] addr[48:32]
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PackedCodec {
    max_length: u32,
}

impl PackedCodec {
    const ADDR_HI_BITS: u32 = 17;
    const ADDR_HI_MASK: u32 = (1 << Self::ADDR_HI_BITS) - 1;
    const SYNC_BIT: u32 = 1 << 17;
    const SUBROUTINE_BIT: u32 = 1 << 18;
    const LENGTH_SHIFT: u32 = 19;
    const LENGTH_WORDS_MAX: u32 = (1 << (32 - Self::LENGTH_SHIFT)) - 1;

    /// Largest length the layout can hold
    pub const MAX_LENGTH: u32 = Self::LENGTH_WORDS_MAX * 4;

    /// Highest encodable address (exclusive)
    pub const ADDR_LIMIT: u64 = 1 << (32 + Self::ADDR_HI_BITS);

    /// Create a codec using the full length field
    pub const fn new() -> Self {
        Self {
            max_length: Self::MAX_LENGTH,
        }
    }

    /// Create a codec that splits segments at `max_length` bytes
    pub fn with_max_length(max_length: u32) -> Result<Self> {
        if max_length < 4 || max_length % 4 != 0 || max_length > Self::MAX_LENGTH {
            return Err(Error::InvalidParameter);
        }
        Ok(Self { max_length })
    }
}

impl Default for PackedCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorCodec for PackedCodec {
    fn name(&self) -> &'static str {
        "packed"
    }

    fn max_length(&self) -> u32 {
        self.max_length
    }

    fn encode(&self, segment: &Segment) -> Result<RawEntry> {
        let addr = segment.addr.raw();
        if !segment.addr.is_aligned(4) {
            return Err(Error::MisalignedAddress);
        }
        if addr >= Self::ADDR_LIMIT
            || segment.length == 0
            || segment.length % 4 != 0
            || segment.length > self.max_length
        {
            return Err(Error::InvalidParameter);
        }

        let mut hi = ((addr >> 32) as u32) & Self::ADDR_HI_MASK;
        hi |= (segment.length / 4) << Self::LENGTH_SHIFT;
        if segment.flags.contains(EntryFlags::SYNC) {
            hi |= Self::SYNC_BIT;
        }
        if segment.flags.contains(EntryFlags::SUBROUTINE) {
            hi |= Self::SUBROUTINE_BIT;
        }

        Ok(RawEntry {
            lo: addr as u32,
            hi,
        })
    }

    fn decode(&self, raw: RawEntry) -> Segment {
        let addr = (raw.lo as u64 & !3) | (((raw.hi & Self::ADDR_HI_MASK) as u64) << 32);
        let mut flags = EntryFlags::empty();
        if raw.hi & Self::SYNC_BIT != 0 {
            flags |= EntryFlags::SYNC;
        }
        if raw.hi & Self::SUBROUTINE_BIT != 0 {
            flags |= EntryFlags::SUBROUTINE;
        }
        Segment {
            addr: GpuAddr::new(addr),
            length: (raw.hi >> Self::LENGTH_SHIFT) * 4,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_round_trip() {
        let codec = PackedCodec::new();
        let segment = Segment {
            addr: GpuAddr::new(0x0001_7fff_dead_bee0),
            length: 0x1000,
            flags: EntryFlags::SUBROUTINE,
        };
        let raw = codec.encode(&segment).unwrap();
        assert_eq!(codec.decode(raw), segment);
        assert!(codec.decode(raw).is_subroutine());
    }

    #[test]
    fn test_packed_limits() {
        let codec = PackedCodec::with_max_length(256).unwrap();
        let base = GpuAddr::new(0x1000);
        assert!(codec.encode(&Segment::new(base, 256)).is_ok());
        assert_eq!(
            codec.encode(&Segment::new(base, 260)),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            codec.encode(&Segment::new(base, 0)),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            codec.encode(&Segment::new(base.offset(2), 8)),
            Err(Error::MisalignedAddress)
        );
        assert_eq!(
            codec.encode(&Segment::new(GpuAddr::new(PackedCodec::ADDR_LIMIT), 8)),
            Err(Error::InvalidParameter)
        );
        assert!(PackedCodec::with_max_length(6).is_err());
        assert!(PackedCodec::with_max_length(PackedCodec::MAX_LENGTH + 4).is_err());
    }

    #[test]
    fn test_raw_entry_words() {
        let raw = RawEntry { lo: 1, hi: 2 };
        assert_eq!(raw.words(), [1, 2]);
        assert_eq!(RawEntry::from_words([1, 2]), raw);
        assert_eq!(RawEntry::SIZE, 8);
    }
}
