//! # Host Memory
//!
//! Memory provider backed by the global allocator. Consumer addresses are
//! identical to CPU addresses, which is what software consumers (simulators,
//! CPU-side decoders) need to follow descriptors.

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::ptr::NonNull;

use gpfifo_core::{BufferHandle, Error, GpuAddr, Result};
use spin::Mutex;

use crate::region::{AllocDesc, MappedRegion, MemoryProvider};

#[derive(Debug, Default)]
struct HostMemoryState {
    next_handle: u64,
    /// handle -> (address, layout)
    live: BTreeMap<u64, (usize, Layout)>,
    total_allocations: u64,
}

/// Identity-mapped memory provider
///
/// Clones share the same allocation table, so a caller can keep one clone to
/// inspect live allocations after handing another to a channel.
#[derive(Debug, Clone, Default)]
pub struct HostMemory {
    state: Arc<Mutex<HostMemoryState>>,
}

impl HostMemory {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of regions allocated and not yet freed
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of regions ever allocated
    pub fn total_allocations(&self) -> u64 {
        self.state.lock().total_allocations
    }

    /// Run `access` on `addr` if `width` bytes there lie in a live allocation
    ///
    /// The allocation table stays locked during the access, so the memory
    /// cannot be freed underneath it.
    fn with_live<T>(
        &self,
        addr: GpuAddr,
        width: usize,
        access: impl FnOnce(usize) -> T,
    ) -> Result<T> {
        let raw = usize::try_from(addr.raw()).map_err(|_| Error::OutOfBounds)?;
        if raw % width != 0 {
            return Err(Error::MisalignedAddress);
        }
        let state = self.state.lock();
        let live = state.live.values().any(|&(base, layout)| {
            raw >= base && raw.checked_add(width).is_some_and(|end| end <= base + layout.size())
        });
        if !live {
            return Err(Error::OutOfBounds);
        }
        Ok(access(raw))
    }

    /// Read a word through its consumer address
    pub fn read_u32(&self, addr: GpuAddr) -> Result<u32> {
        // SAFETY: in bounds of a live allocation and 4-byte aligned
        self.with_live(addr, 4, |ptr| unsafe { core::ptr::read_volatile(ptr as *const u32) })
    }

    /// Write a 64-bit cell through its consumer address
    pub fn write_u64(&self, addr: GpuAddr, value: u64) -> Result<()> {
        // SAFETY: in bounds of a live allocation and 8-byte aligned
        self.with_live(addr, 8, |ptr| unsafe {
            core::ptr::write_volatile(ptr as *mut u64, value)
        })
    }
}

impl MemoryProvider for HostMemory {
    fn allocate(&mut self, desc: &AllocDesc) -> Result<MappedRegion> {
        desc.validate()?;

        let size = usize::try_from(desc.size.as_bytes()).map_err(|_| Error::InvalidParameter)?;
        let align = usize::try_from(desc.alignment.max(8)).map_err(|_| Error::InvalidParameter)?;
        let layout = Layout::from_size_align(size, align).map_err(|_| Error::InvalidParameter)?;

        // SAFETY: layout has a non-zero size (checked by validate)
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(Error::AllocationFailed)?;

        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = BufferHandle::new(state.next_handle);
        state
            .live
            .insert(handle.id(), (ptr.as_ptr() as usize, layout));
        state.total_allocations += 1;

        log::debug!(
            "HostMemory: allocated {} for {}",
            desc.size,
            desc.name.unwrap_or("<anon>")
        );

        // SAFETY: fresh allocation of `size` bytes aligned to at least 8,
        // released only through `free`
        Ok(unsafe {
            MappedRegion::from_raw_parts(
                handle,
                ptr,
                GpuAddr::new(ptr.as_ptr() as u64),
                desc.size,
                desc.flags,
            )
        })
    }

    fn free(&mut self, region: MappedRegion) -> Result<()> {
        let (addr, layout) = self
            .state
            .lock()
            .live
            .remove(&region.handle().id())
            .ok_or(Error::NotFound)?;
        // SAFETY: address and layout come from the matching alloc_zeroed call
        unsafe { dealloc(addr as *mut u8, layout) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpfifo_core::ByteSize;

    #[test]
    fn test_allocate_is_identity_mapped_and_zeroed() {
        let mut mem = HostMemory::new();
        let region = mem
            .allocate(&AllocDesc::ring(ByteSize::KIB_4, "test"))
            .unwrap();
        assert_eq!(mem.live_allocations(), 1);
        assert!(region.gpu_addr().is_aligned(4096));
        assert_eq!(region.read_u64(4088).unwrap(), 0);
        mem.free(region).unwrap();
        assert_eq!(mem.live_allocations(), 0);
        assert_eq!(mem.total_allocations(), 1);
    }

    #[test]
    fn test_region_bounds() {
        let mut mem = HostMemory::new();
        let mut region = mem
            .allocate(&AllocDesc::coherent(ByteSize::from_bytes(16), "cell"))
            .unwrap();
        region.write_u32(12, 0xdead_beef).unwrap();
        assert_eq!(region.read_u32(12).unwrap(), 0xdead_beef);
        assert_eq!(region.write_u32(16, 1), Err(Error::OutOfBounds));
        assert_eq!(region.read_u32(2), Err(Error::MisalignedAddress));
        assert_eq!(region.read_u64(12), Err(Error::MisalignedAddress));
        region.fill_zero();
        assert_eq!(region.read_u32(12).unwrap(), 0);
        mem.free(region).unwrap();
    }

    #[test]
    fn test_take_leaves_empty_region() {
        let mut mem = HostMemory::new();
        let mut region = mem
            .allocate(&AllocDesc::ring(ByteSize::KIB_4, "take"))
            .unwrap();
        let owned = region.take();
        assert!(region.is_empty());
        assert_eq!(region.read_u32(0), Err(Error::OutOfBounds));
        mem.free(owned).unwrap();
        assert_eq!(mem.free(region), Err(Error::NotFound));
    }

    #[test]
    fn test_access_by_address() {
        let mut mem = HostMemory::new();
        let mut region = mem
            .allocate(&AllocDesc::coherent(ByteSize::from_bytes(16), "cell"))
            .unwrap();
        let addr = region.gpu_addr();
        region.write_u32(4, 0x1234).unwrap();
        assert_eq!(mem.read_u32(addr.offset(4)).unwrap(), 0x1234);

        mem.write_u64(addr.offset(8), 0x1_0000_0040).unwrap();
        assert_eq!(region.read_u64(8).unwrap(), 0x1_0000_0040);

        assert_eq!(mem.read_u32(addr.offset(16)), Err(Error::OutOfBounds));
        assert_eq!(mem.write_u64(addr.offset(4), 0), Err(Error::MisalignedAddress));

        mem.free(region).unwrap();
        assert_eq!(mem.read_u32(addr), Err(Error::OutOfBounds));
    }

    #[test]
    fn test_invalid_desc() {
        let mut mem = HostMemory::new();
        assert_eq!(
            mem.allocate(&AllocDesc::default()).err(),
            Some(Error::InvalidParameter)
        );
    }
}
