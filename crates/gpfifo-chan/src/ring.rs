//! # Ring Arithmetic
//!
//! Modulo arithmetic for the pushbuffer and the descriptor table.
//!
//! Pushbuffer positions are compared in a frame rotated around the end of
//! a pending write:
//!
//! ```text
//!   physical   0 ........ begin ==== end ........ size
//!   rotated    (p + size - end) mod size
//!
//!   end ─▶ 0        positions after the write ─▶ small values
//!   begin ─▶ size - len   positions inside the write ─▶ above size - len
//! ```
//!
//! In that frame the producer's own positions must stay ordered
//! `published <= open <= begin`, and a consumer is clear of the write when
//! its position is not above the published position.

use gpfifo_core::{Error, Result};

// =============================================================================
// BYTE RING
// =============================================================================

/// Byte offsets modulo the ring size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSpace {
    size: u32,
}

impl RingSpace {
    /// Create a ring of `size` bytes
    pub fn new(size: u32) -> Result<Self> {
        if size == 0 || size % 4 != 0 {
            return Err(Error::InvalidParameter);
        }
        Ok(Self { size })
    }

    /// Ring size in bytes
    #[inline]
    pub const fn size(self) -> u32 {
        self.size
    }

    /// Frame for a pending write of `[begin, end)`
    ///
    /// `end` may equal the ring size; a write never straddles it.
    #[inline]
    pub fn frame(self, begin: u32, end: u32) -> RingFrame {
        debug_assert!(begin < end && end <= self.size);
        RingFrame {
            size: self.size,
            end: end % self.size,
            len: end - begin,
        }
    }
}

// =============================================================================
// ROTATED FRAME
// =============================================================================

/// Comparison frame where the end of a pending write is the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingFrame {
    size: u32,
    end: u32,
    len: u32,
}

impl RingFrame {
    /// Rotate a position into the frame
    #[inline]
    pub const fn rotate(self, pos: u32) -> u32 {
        ((pos as u64 + self.size as u64 - self.end as u64) % self.size as u64) as u32
    }

    /// Rotated value of the write's start
    #[inline]
    pub const fn begin(self) -> u32 {
        self.size - self.len
    }

    /// Check the producer's positions are ordered `published <= open <= begin`
    #[inline]
    pub const fn producer_ordered(self, published: u32, open: u32) -> bool {
        let published = self.rotate(published);
        let open = self.rotate(open);
        published <= open && open <= self.begin()
    }

    /// Check a consumer position is clear of the write
    ///
    /// A consumer never reads past the published position, so a rotated
    /// position above it still owns bytes inside the write range.
    #[inline]
    pub const fn consumer_clear(self, get: u32, published: u32) -> bool {
        self.rotate(get) <= self.rotate(published)
    }
}

// =============================================================================
// DESCRIPTOR TABLE INDICES
// =============================================================================

/// Slot indices modulo a power-of-two capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpace {
    capacity: u32,
}

impl TableSpace {
    /// Create an index space with `capacity` slots
    pub fn new(capacity: u32) -> Result<Self> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(Error::InvalidParameter);
        }
        Ok(Self { capacity })
    }

    /// Number of slots
    #[inline]
    pub const fn capacity(self) -> u32 {
        self.capacity
    }

    /// Index following `index`
    #[inline]
    pub const fn next(self, index: u32) -> u32 {
        (index + 1) & (self.capacity - 1)
    }

    /// Forward distance from `from` to `to`
    #[inline]
    pub const fn distance(self, from: u32, to: u32) -> u32 {
        to.wrapping_sub(from) & (self.capacity - 1)
    }

    /// Mask an index into range
    #[inline]
    pub const fn wrap(self, index: u32) -> u32 {
        index & (self.capacity - 1)
    }
}
