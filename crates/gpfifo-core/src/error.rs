//! # GPFIFO Error Handling
//!
//! Error types shared by every layer of the submission stack.
//!
//! Errors fall into three groups:
//! - caller/configuration errors (bad parameters, ring overflow)
//! - wait errors (timeouts) that leave the channel usable
//! - consumer errors (faults, global reset) that the channel latches

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// GPFIFO Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// GPFIFO unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Operation timed out
    Timeout,
    /// Operation not supported by this channel variant or consumer
    NotSupported,
    /// Resource not found
    NotFound,

    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// Allocation failed
    AllocationFailed,
    /// Address not aligned
    MisalignedAddress,
    /// Access outside of a mapped region
    OutOfBounds,

    // =========================================================================
    // Ring Errors
    // =========================================================================
    /// Producer would overwrite its own unpublished pushbuffer data
    PushbufferOverflow,
    /// Descriptor table slot cannot be reserved without a publish
    TableOverflow,
    /// Writing the producer position to a consumer failed
    DoorbellFailed,

    // =========================================================================
    // Consumer Errors
    // =========================================================================
    /// Asynchronous fault reported by a consumer
    ConsumerFault(FaultCode),
    /// A global reset of the consumer is in progress
    ResetInProgress,
}

impl Error {
    /// Check if this error is a ring overflow
    #[inline]
    pub const fn is_overflow(self) -> bool {
        matches!(self, Self::PushbufferOverflow | Self::TableOverflow)
    }

    /// Check if this error is a global reset
    #[inline]
    pub const fn is_global_reset(self) -> bool {
        matches!(self, Self::ResetInProgress)
    }

    /// Check if this error came from the consumer side
    #[inline]
    pub const fn is_consumer_error(self) -> bool {
        matches!(self, Self::ConsumerFault(_) | Self::ResetInProgress)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Generic
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::NotSupported => write!(f, "operation not supported"),
            Self::NotFound => write!(f, "resource not found"),

            // Memory
            Self::AllocationFailed => write!(f, "allocation failed"),
            Self::MisalignedAddress => write!(f, "misaligned address"),
            Self::OutOfBounds => write!(f, "access outside mapped region"),

            // Ring
            Self::PushbufferOverflow => write!(f, "pushbuffer overflow"),
            Self::TableOverflow => write!(f, "descriptor table overflow"),
            Self::DoorbellFailed => write!(f, "doorbell write failed"),

            // Consumer
            Self::ConsumerFault(code) => write!(f, "consumer fault: {}", code),
            Self::ResetInProgress => write!(f, "global reset in progress"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

// =============================================================================
// SUB-ERROR TYPES
// =============================================================================

/// Fault codes reported asynchronously by a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    /// Consumer fetched from an unmapped or protected address
    PageFault,
    /// Consumer decoded an invalid method
    IllegalMethod,
    /// Engine raised an exception while executing
    EngineException,
    /// Consumer watchdog expired
    Watchdog,
    /// Vendor-specific code
    Other(u32),
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageFault => write!(f, "page fault"),
            Self::IllegalMethod => write!(f, "illegal method"),
            Self::EngineException => write!(f, "engine exception"),
            Self::Watchdog => write!(f, "watchdog expired"),
            Self::Other(code) => write!(f, "code 0x{:08x}", code),
        }
    }
}

// =============================================================================
// ERROR CONVERSION
// =============================================================================

impl From<FaultCode> for Error {
    fn from(e: FaultCode) -> Self {
        Error::ConsumerFault(e)
    }
}
