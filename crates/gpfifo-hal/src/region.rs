//! # Mapped Regions
//!
//! CPU-mapped memory shared with a consumer, and the allocator contract that
//! hands it out.

use core::ptr::NonNull;

use bitflags::bitflags;
use gpfifo_core::{BufferHandle, ByteSize, Error, GpuAddr, Result};

// =============================================================================
// ALLOCATION DESCRIPTION
// =============================================================================

bitflags! {
    /// Memory allocation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocFlags: u32 {
        /// CPU accessible (mappable)
        const CPU_VISIBLE = 1 << 0;
        /// Coherent (no explicit flush needed)
        const COHERENT = 1 << 1;
        /// Write-combined (good for streaming)
        const WRITE_COMBINE = 1 << 2;
        /// Contents are zeroed before the region is returned
        const ZEROED = 1 << 3;
    }
}

/// Memory allocation descriptor
#[derive(Debug, Clone)]
pub struct AllocDesc {
    /// Size in bytes
    pub size: ByteSize,
    /// Alignment requirement
    pub alignment: u64,
    /// Allocation flags
    pub flags: AllocFlags,
    /// Debug name (for tools)
    pub name: Option<&'static str>,
}

impl Default for AllocDesc {
    fn default() -> Self {
        Self {
            size: ByteSize::ZERO,
            alignment: 4096,
            flags: AllocFlags::CPU_VISIBLE,
            name: None,
        }
    }
}

impl AllocDesc {
    /// Describe a write-combined ring buffer
    pub fn ring(size: ByteSize, name: &'static str) -> Self {
        Self {
            size,
            alignment: 4096,
            flags: AllocFlags::CPU_VISIBLE | AllocFlags::WRITE_COMBINE | AllocFlags::ZEROED,
            name: Some(name),
        }
    }

    /// Describe a coherent, zeroed cell read back by the CPU
    pub fn coherent(size: ByteSize, name: &'static str) -> Self {
        Self {
            size,
            alignment: 64,
            flags: AllocFlags::CPU_VISIBLE | AllocFlags::COHERENT | AllocFlags::ZEROED,
            name: Some(name),
        }
    }

    /// Validate the descriptor
    pub fn validate(&self) -> Result<()> {
        if self.size.as_bytes() == 0 || !self.alignment.is_power_of_two() {
            return Err(Error::InvalidParameter);
        }
        if !self.flags.contains(AllocFlags::CPU_VISIBLE) {
            return Err(Error::NotSupported);
        }
        Ok(())
    }
}

// =============================================================================
// MAPPED REGION
// =============================================================================

/// A region mapped both for the CPU and for the consumer
///
/// All accesses are volatile: the consumer reads and writes the same memory
/// behind the compiler's back.
#[derive(Debug)]
pub struct MappedRegion {
    handle: BufferHandle,
    cpu_ptr: NonNull<u8>,
    gpu_addr: GpuAddr,
    size: ByteSize,
    flags: AllocFlags,
}

// SAFETY: The region owns its mapping; access goes through &self/&mut self.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Wrap an existing mapping
    ///
    /// # Safety
    /// `cpu_ptr` must be valid for volatile reads and writes of `size` bytes,
    /// aligned to at least 8 bytes, until the region is freed through the
    /// provider that created it.
    pub unsafe fn from_raw_parts(
        handle: BufferHandle,
        cpu_ptr: NonNull<u8>,
        gpu_addr: GpuAddr,
        size: ByteSize,
        flags: AllocFlags,
    ) -> Self {
        Self {
            handle,
            cpu_ptr,
            gpu_addr,
            size,
            flags,
        }
    }

    /// Move the mapping out, leaving an empty region behind
    ///
    /// Every access to the empty region fails with [`Error::OutOfBounds`].
    pub fn take(&mut self) -> Self {
        let empty = Self {
            handle: BufferHandle::null(),
            cpu_ptr: NonNull::dangling(),
            gpu_addr: GpuAddr::null(),
            size: ByteSize::ZERO,
            flags: AllocFlags::empty(),
        };
        core::mem::replace(self, empty)
    }

    /// Check whether the region holds no mapping
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size.as_bytes() == 0
    }

    /// Get allocation handle
    #[inline]
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Get consumer-visible address
    #[inline]
    pub fn gpu_addr(&self) -> GpuAddr {
        self.gpu_addr
    }

    /// Get region size
    #[inline]
    pub fn size(&self) -> ByteSize {
        self.size
    }

    /// Get allocation flags
    #[inline]
    pub fn flags(&self) -> AllocFlags {
        self.flags
    }

    #[inline]
    fn check(&self, offset: usize, width: usize) -> Result<()> {
        if offset % width != 0 {
            return Err(Error::MisalignedAddress);
        }
        match offset.checked_add(width) {
            Some(end) if end as u64 <= self.size.as_bytes() => Ok(()),
            _ => Err(Error::OutOfBounds),
        }
    }

    /// Read a 32-bit word
    #[inline]
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4)?;
        // SAFETY: bounds and alignment checked above, mapping valid per constructor
        Ok(unsafe { self.cpu_ptr.as_ptr().add(offset).cast::<u32>().read_volatile() })
    }

    /// Write a 32-bit word
    #[inline]
    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, 4)?;
        // SAFETY: bounds and alignment checked above, mapping valid per constructor
        unsafe {
            self.cpu_ptr
                .as_ptr()
                .add(offset)
                .cast::<u32>()
                .write_volatile(value);
        }
        Ok(())
    }

    /// Read a 64-bit word as a single access
    #[inline]
    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        self.check(offset, 8)?;
        // SAFETY: bounds and alignment checked above, mapping valid per constructor
        Ok(unsafe { self.cpu_ptr.as_ptr().add(offset).cast::<u64>().read_volatile() })
    }

    /// Write a 64-bit word as a single access
    #[inline]
    pub fn write_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        self.check(offset, 8)?;
        // SAFETY: bounds and alignment checked above, mapping valid per constructor
        unsafe {
            self.cpu_ptr
                .as_ptr()
                .add(offset)
                .cast::<u64>()
                .write_volatile(value);
        }
        Ok(())
    }

    /// Zero the whole region
    pub fn fill_zero(&mut self) {
        let words = (self.size.as_bytes() / 4) as usize;
        for i in 0..words {
            // SAFETY: i * 4 + 4 <= size, pointer is 8-byte aligned
            unsafe {
                self.cpu_ptr
                    .as_ptr()
                    .add(i * 4)
                    .cast::<u32>()
                    .write_volatile(0);
            }
        }
    }

    /// Check whether `[addr, addr + len)` lies inside this region
    pub fn contains(&self, addr: GpuAddr, len: u64) -> bool {
        let start = self.gpu_addr.raw();
        let end = start + self.size.as_bytes();
        addr.raw() >= start && addr.raw().saturating_add(len) <= end
    }
}

// =============================================================================
// MEMORY PROVIDER
// =============================================================================

/// Allocator of regions shared with consumers
pub trait MemoryProvider {
    /// Allocate and map a region
    fn allocate(&mut self, desc: &AllocDesc) -> Result<MappedRegion>;

    /// Release a region previously returned by [`MemoryProvider::allocate`]
    fn free(&mut self, region: MappedRegion) -> Result<()>;
}

static_assertions::assert_obj_safe!(MemoryProvider);
static_assertions::assert_impl_all!(MappedRegion: Send);
