//! # Segment Descriptor Table
//!
//! Circular table of descriptors ("GPFIFO entries"). The producer appends at
//! `put` and publishes by ringing the consumers' doorbells; each consumer
//! fetches from its own `table_get`.
//!
//! The slot after `put` must never be a slot a consumer is parked on: with
//! `put + 1 == get` a full table would be indistinguishable from an empty one.

use alloc::boxed::Box;

use gpfifo_core::{ConsumerId, ConsumerPosition, Error, GpuAddr, Result};
use gpfifo_hal::MappedRegion;

use crate::codec::{DescriptorCodec, RawEntry, Segment};
use crate::ring::TableSpace;

/// Descriptor table and its producer positions
pub struct SegmentTable {
    region: MappedRegion,
    space: TableSpace,
    codec: Box<dyn DescriptorCodec>,
    put: u32,
    published: u32,
}

impl core::fmt::Debug for SegmentTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegmentTable")
            .field("gpu_addr", &self.region.gpu_addr())
            .field("capacity", &self.space.capacity())
            .field("codec", &self.codec.name())
            .field("put", &self.put)
            .field("published", &self.published)
            .finish()
    }
}

impl SegmentTable {
    /// Create a table of `space.capacity()` slots over `region`
    pub fn new(region: MappedRegion, space: TableSpace, codec: Box<dyn DescriptorCodec>) -> Self {
        debug_assert!(
            u64::from(space.capacity()) * u64::from(RawEntry::SIZE) <= region.size().as_bytes()
        );
        Self {
            region,
            space,
            codec,
            put: 0,
            published: 0,
        }
    }

    /// Number of slots
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.space.capacity()
    }

    /// Consumer-visible base address
    #[inline]
    pub fn gpu_addr(&self) -> GpuAddr {
        self.region.gpu_addr()
    }

    /// Slot codec
    #[inline]
    pub fn codec(&self) -> &dyn DescriptorCodec {
        self.codec.as_ref()
    }

    /// Producer write position
    #[inline]
    pub fn put(&self) -> u32 {
        self.put
    }

    /// Position last published to consumers
    #[inline]
    pub fn published(&self) -> u32 {
        self.published
    }

    /// Descriptors written but not yet published
    #[inline]
    pub fn unpublished(&self) -> u32 {
        self.space.distance(self.published, self.put)
    }

    /// First consumer parked on the slot after `put`
    pub fn first_blocked<I>(&self, positions: I) -> Option<(ConsumerId, ConsumerPosition)>
    where
        I: IntoIterator<Item = (ConsumerId, ConsumerPosition)>,
    {
        let next = self.space.next(self.put);
        positions
            .into_iter()
            .find(|(_, pos)| self.space.wrap(pos.table_get) == next)
    }

    /// Check whether a consumer parked at `table_get` has run out of
    /// published work
    #[inline]
    pub fn drained(&self, table_get: u32) -> bool {
        self.space.wrap(table_get) == self.published
    }

    /// Append a descriptor at `put`
    ///
    /// The slot must have been reserved against every consumer.
    pub fn push(&mut self, segment: &Segment) -> Result<()> {
        let raw = self.codec.encode(segment)?;
        let offset = (self.put * RawEntry::SIZE) as usize;
        let [lo, hi] = raw.words();
        self.region.write_u32(offset, lo)?;
        self.region.write_u32(offset + 4, hi)?;
        self.put = self.space.next(self.put);
        Ok(())
    }

    /// Decode the descriptor stored at `index`
    pub fn read(&self, index: u32) -> Result<Segment> {
        if index >= self.capacity() {
            return Err(Error::OutOfBounds);
        }
        let offset = (index * RawEntry::SIZE) as usize;
        let raw = RawEntry::from_words([
            self.region.read_u32(offset)?,
            self.region.read_u32(offset + 4)?,
        ]);
        Ok(self.codec.decode(raw))
    }

    /// Record that `put` has been published
    ///
    /// Returns false when nothing changed since the last publish.
    pub fn mark_published(&mut self) -> bool {
        if self.published == self.put {
            return false;
        }
        self.published = self.put;
        true
    }

    /// Detach the backing region for release
    pub fn take_region(&mut self) -> MappedRegion {
        self.region.take()
    }
}
