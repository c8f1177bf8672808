//! # Pushbuffer
//!
//! Byte ring holding encoded commands, plus the producer cursors over it.
//!
//! ```text
//!   0        published_put     closed_end   open_start        put      size
//!   │ consumed? │ published but  │ closed,    │ open span      │ free   │
//!   │           │ maybe unread   │ unpublished│ (no descriptor)│        │
//! ```
//!
//! Writes never straddle the physical end. When a write does not fit in the
//! tail the open span is closed and the cursor wraps to zero.
//!
//! Ring offsets alone cannot tell an empty ring from a full lap, so the
//! writer also keeps monotonic stream offsets (bytes written plus tail bytes
//! skipped by wraps) for the cursor, the open span and the last publish.

use gpfifo_core::{ConsumerId, ConsumerPosition, Error, GpuAddr, Result};
use gpfifo_hal::MappedRegion;

use crate::ring::{RingFrame, RingSpace};

/// Pushbuffer ring and producer cursors
#[derive(Debug)]
pub struct Pushbuffer {
    region: MappedRegion,
    ring: RingSpace,
    /// Write cursor
    put: u32,
    /// Start of bytes not yet covered by a descriptor
    open_start: u32,
    /// End of the last closed descriptor
    closed_end: u32,
    /// `closed_end` as of the last publish
    published_put: u32,
    total_bytes: u64,
    wraps: u64,
    /// Stream offset of `put`
    stream_put: u64,
    /// Stream offset of `open_start`
    stream_open: u64,
    /// Stream offset of `published_put`
    stream_published: u64,
}

impl Pushbuffer {
    /// Create a pushbuffer of `ring.size()` bytes over `region`
    ///
    /// Accesses past the end of a short region fail with
    /// [`Error::OutOfBounds`].
    pub fn new(region: MappedRegion, ring: RingSpace) -> Self {
        debug_assert!(u64::from(ring.size()) <= region.size().as_bytes());
        Self {
            region,
            ring,
            put: 0,
            open_start: 0,
            closed_end: 0,
            published_put: 0,
            total_bytes: 0,
            wraps: 0,
            stream_put: 0,
            stream_open: 0,
            stream_published: 0,
        }
    }

    /// Ring size in bytes
    #[inline]
    pub fn size(&self) -> u32 {
        self.ring.size()
    }

    /// Consumer-visible base address
    #[inline]
    pub fn gpu_addr(&self) -> GpuAddr {
        self.region.gpu_addr()
    }

    /// Write cursor
    #[inline]
    pub fn put(&self) -> u32 {
        self.put
    }

    /// Start of the open span
    #[inline]
    pub fn open_start(&self) -> u32 {
        self.open_start
    }

    /// Length of the open span
    #[inline]
    pub fn open_len(&self) -> u32 {
        self.put - self.open_start
    }

    /// End of the last closed descriptor
    #[inline]
    pub fn closed_end(&self) -> u32 {
        self.closed_end
    }

    /// Position published to consumers
    #[inline]
    pub fn published_put(&self) -> u32 {
        self.published_put
    }

    /// Bytes written since creation
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Times the cursor wrapped to zero
    #[inline]
    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    /// Bytes between the last publish and the cursor, skipped tails included
    #[inline]
    pub fn unpublished_bytes(&self) -> u64 {
        self.stream_put - self.stream_published
    }

    /// Bytes left before the physical end
    #[inline]
    pub fn room_to_end(&self) -> u32 {
        self.size() - self.put
    }

    /// Wrap the cursor to the start of the buffer
    ///
    /// The open span must be empty.
    pub fn wrap(&mut self) {
        debug_assert_eq!(self.open_len(), 0);
        self.stream_put += u64::from(self.room_to_end());
        self.stream_open = self.stream_put;
        self.put = 0;
        self.open_start = 0;
        self.wraps += 1;
    }

    /// Frame for writing `bytes` at the cursor
    ///
    /// Fails with [`Error::PushbufferOverflow`] when the write would land on
    /// the producer's own unpublished data, including a full lap of it.
    pub fn reserve_frame(&self, bytes: u32) -> Result<RingFrame> {
        if bytes == 0 || bytes > self.room_to_end() {
            return Err(Error::InvalidParameter);
        }
        let frame = self.ring.frame(self.put, self.put + bytes);
        if !frame.producer_ordered(self.published_put, self.open_start)
            || self.unpublished_bytes() + u64::from(bytes) > u64::from(self.size())
        {
            return Err(Error::PushbufferOverflow);
        }
        Ok(frame)
    }

    /// First consumer still reading inside `frame`
    ///
    /// A consumer parked exactly on `published_put` that has not fetched
    /// every published descriptor (`table_published`) is a full lap behind.
    pub fn first_blocked<I>(
        &self,
        frame: RingFrame,
        table_published: u32,
        positions: I,
    ) -> Option<ConsumerId>
    where
        I: IntoIterator<Item = (ConsumerId, ConsumerPosition)>,
    {
        positions
            .into_iter()
            .find(|(_, pos)| {
                let lapped =
                    pos.pushbuffer_get == self.published_put && pos.table_get != table_published;
                lapped || !frame.consumer_clear(pos.pushbuffer_get, self.published_put)
            })
            .map(|(id, _)| id)
    }

    /// Store words at the cursor
    ///
    /// Room must have been reserved with [`Pushbuffer::reserve_frame`].
    pub fn store(&mut self, words: &[u32]) -> Result<()> {
        let bytes = u32::try_from(words.len() * 4).map_err(|_| Error::InvalidParameter)?;
        if bytes > self.room_to_end() {
            return Err(Error::OutOfBounds);
        }
        for (i, word) in words.iter().enumerate() {
            self.region.write_u32(self.put as usize + i * 4, *word)?;
        }
        self.put += bytes;
        self.stream_put += u64::from(bytes);
        self.total_bytes += u64::from(bytes);
        Ok(())
    }

    /// Mark `len` bytes at the start of the open span as described
    pub fn advance_open(&mut self, len: u32) {
        debug_assert!(len <= self.open_len());
        self.open_start += len;
        self.stream_open += u64::from(len);
        self.closed_end = self.open_start % self.size();
    }

    /// Record that everything closed so far has been published
    pub fn mark_published(&mut self) {
        self.published_put = self.closed_end;
        self.stream_published = self.stream_open;
    }

    /// Detach the backing region for release
    pub fn take_region(&mut self) -> MappedRegion {
        self.region.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpfifo_core::ByteSize;
    use gpfifo_hal::{AllocDesc, HostMemory, MemoryProvider};

    fn pushbuffer(mem: &mut HostMemory, size: u32) -> Pushbuffer {
        let region = mem
            .allocate(&AllocDesc::ring(ByteSize::from_bytes(u64::from(size)), "pb"))
            .unwrap();
        Pushbuffer::new(region, RingSpace::new(size).unwrap())
    }

    #[test]
    fn test_store_advances_cursor() {
        let mut mem = HostMemory::new();
        let mut pb = pushbuffer(&mut mem, 4096);
        pb.reserve_frame(12).unwrap();
        pb.store(&[1, 2, 3]).unwrap();
        assert_eq!(pb.put(), 12);
        assert_eq!(pb.open_len(), 12);
        assert_eq!(pb.total_bytes(), 12);
        assert_eq!(pb.region.read_u32(8).unwrap(), 3);
    }

    #[test]
    fn test_close_and_publish() {
        let mut mem = HostMemory::new();
        let mut pb = pushbuffer(&mut mem, 4096);
        pb.store(&[0; 16]).unwrap();
        pb.advance_open(64);
        assert_eq!(pb.open_len(), 0);
        assert_eq!(pb.closed_end(), 64);
        assert_eq!(pb.published_put(), 0);
        pb.mark_published();
        assert_eq!(pb.published_put(), 64);
    }

    #[test]
    fn test_reserve_detects_lap_over_published() {
        let mut mem = HostMemory::new();
        let mut pb = pushbuffer(&mut mem, 256);
        pb.store(&[0; 16]).unwrap();
        pb.advance_open(64);
        pb.mark_published();

        // Fill to the end without publishing, then wrap
        pb.store(&[0; 48]).unwrap();
        assert_eq!(pb.room_to_end(), 0);
        pb.advance_open(192);
        pb.wrap();
        assert_eq!(pb.wraps(), 1);

        // [0, 64) holds data the consumer has already been given
        assert!(pb.reserve_frame(64).is_ok());
        pb.store(&[0; 16]).unwrap();
        // [64, 68) would overwrite the unpublished span
        assert_eq!(pb.reserve_frame(4).err(), Some(Error::PushbufferOverflow));
    }

    #[test]
    fn test_reserve_detects_full_unpublished_lap() {
        let mut mem = HostMemory::new();
        let mut pb = pushbuffer(&mut mem, 256);
        // Never published: every position compares equal after the wrap
        pb.store(&[0; 64]).unwrap();
        pb.advance_open(256);
        assert_eq!(pb.closed_end(), 0);
        pb.wrap();
        assert_eq!(pb.unpublished_bytes(), 256);
        assert_eq!(pb.reserve_frame(4).err(), Some(Error::PushbufferOverflow));

        pb.mark_published();
        assert_eq!(pb.unpublished_bytes(), 0);
        assert!(pb.reserve_frame(4).is_ok());
    }

    #[test]
    fn test_first_blocked() {
        let mut mem = HostMemory::new();
        let mut pb = pushbuffer(&mut mem, 4096);
        pb.store(&[0; 65]).unwrap();
        pb.advance_open(260);
        pb.mark_published();
        pb.store(&[0; (4096 - 260) / 4]).unwrap();
        pb.advance_open(4096 - 260);
        pb.wrap();

        let frame = pb.reserve_frame(64).unwrap();
        let caught_up = (ConsumerId::new(0), ConsumerPosition::new(260, 1));
        let behind = (ConsumerId::new(1), ConsumerPosition::new(0, 0));
        assert_eq!(pb.first_blocked(frame, 1, [caught_up]), None);
        assert_eq!(
            pb.first_blocked(frame, 1, [caught_up, behind]),
            Some(ConsumerId::new(1))
        );
    }

    #[test]
    fn test_first_blocked_full_lap_behind() {
        let mut mem = HostMemory::new();
        let mut pb = pushbuffer(&mut mem, 256);
        pb.store(&[0; 64]).unwrap();
        pb.advance_open(256);
        pb.mark_published();
        pb.wrap();
        assert_eq!(pb.published_put(), 0);

        let frame = pb.reserve_frame(64).unwrap();
        // Same ring offset, but one unfetched descriptor means a lap behind
        let drained = (ConsumerId::new(0), ConsumerPosition::new(0, 1));
        let lapped = (ConsumerId::new(1), ConsumerPosition::new(0, 0));
        assert_eq!(pb.first_blocked(frame, 1, [drained]), None);
        assert_eq!(pb.first_blocked(frame, 1, [lapped]), Some(ConsumerId::new(1)));
    }
}
