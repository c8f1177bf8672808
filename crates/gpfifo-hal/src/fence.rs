//! # Memory Barriers
//!
//! Ordering primitives between CPU stores to ring memory and the doorbell
//! that hands those stores to a consumer.

use core::sync::atomic::{Ordering, compiler_fence};

/// Compiler fence (prevents reordering)
#[inline(always)]
pub fn compiler() {
    compiler_fence(Ordering::SeqCst);
}

/// Memory barrier before a doorbell or MMIO write
#[inline(always)]
pub fn write_barrier() {
    #[cfg(target_arch = "x86_64")]
    {
        // x86_64 keeps store order for normal memory
        compiler();
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: This is a memory barrier instruction
        unsafe {
            core::arch::asm!("dmb st", options(nostack, preserves_flags));
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        core::sync::atomic::fence(Ordering::Release);
    }
}

/// Memory barrier after reading consumer-written memory
#[inline(always)]
pub fn read_barrier() {
    #[cfg(target_arch = "x86_64")]
    {
        compiler();
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: This is a memory barrier instruction
        unsafe {
            core::arch::asm!("dmb ld", options(nostack, preserves_flags));
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        core::sync::atomic::fence(Ordering::Acquire);
    }
}

/// Drain write-combining buffers
///
/// Stores to write-combined mappings may sit in CPU buffers and are not
/// ordered by a compiler fence. This must run after the last ring store and
/// before the doorbell.
#[inline(always)]
pub fn write_combine_flush() {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: sfence only orders stores; it has no other effect
        unsafe {
            core::arch::asm!("sfence", options(nostack, preserves_flags));
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: This is a memory barrier instruction
        unsafe {
            core::arch::asm!("dmb oshst", options(nostack, preserves_flags));
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}
