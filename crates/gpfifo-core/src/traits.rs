//! # GPFIFO Core Traits
//!
//! The contract between a channel and the hardware that consumes it.
//!
//! ```text
//! Channel (producer)
//!    │
//!    ├── bind / unbind ............ ring geometry + optional semaphore
//!    ├── publish_put .............. doorbell with the table write position
//!    ├── query_position ........... expensive read-back of consumer positions
//!    └── detect_fault / take_fault  asynchronous error reporting
//!              │
//!              ▼
//!        ConsumerPort (engine, simulator, ...)
//! ```

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::types::*;

// =============================================================================
// CONSUMER CAPABILITIES
// =============================================================================

bitflags! {
    /// Features a consumer port supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConsumerCaps: u32 {
        /// Consumer writes its positions into a bound semaphore cell
        const POSITION_SEMAPHORE = 1 << 0;
        /// Consumer executes descriptors pointing outside the pushbuffer
        const SUBROUTINES = 1 << 1;
    }
}

// =============================================================================
// CONSUMER BINDING
// =============================================================================

/// Ring geometry handed to a consumer when a channel attaches to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerBinding {
    /// GPU address of the pushbuffer
    pub pushbuffer_addr: GpuAddr,
    /// Pushbuffer size in bytes
    pub pushbuffer_size: u32,
    /// GPU address of the descriptor table
    pub table_addr: GpuAddr,
    /// Number of descriptor slots (power of two)
    pub table_entries: u32,
    /// Size of one descriptor in bytes
    pub entry_size: u32,
    /// Position semaphore cell, when the channel allocated one
    pub semaphore: Option<GpuAddr>,
}

// =============================================================================
// CONSUMER PORT
// =============================================================================

/// Hardware-side collaborator of a channel
///
/// Every method may be called from the channel's single writer only.
pub trait ConsumerPort {
    /// Number of consumers reading the ring
    fn consumer_count(&self) -> usize;

    /// Optional features supported by the consumers
    fn capabilities(&self) -> ConsumerCaps {
        ConsumerCaps::empty()
    }

    /// Attach a consumer to the ring
    ///
    /// The consumer starts at position zero in both rings.
    fn bind(&mut self, consumer: ConsumerId, binding: ConsumerBinding) -> Result<()>;

    /// Detach a consumer; the ring memory is released afterwards
    fn unbind(&mut self, _consumer: ConsumerId) {}

    /// Read back the consumer's current positions (expensive)
    fn query_position(&mut self, consumer: ConsumerId) -> Result<ConsumerPosition>;

    /// Write the producer's table position to the consumer's doorbell
    fn publish_put(&mut self, consumer: ConsumerId, table_put: u32) -> Result<()>;

    /// Check whether a fault has been reported and not yet taken
    fn detect_fault(&mut self) -> bool;

    /// Take the oldest reported fault
    fn take_fault(&mut self) -> Option<Error>;

    /// Check whether a global reset is running
    fn reset_in_progress(&self) -> bool {
        false
    }
}

static_assertions::assert_obj_safe!(ConsumerPort);
