//! # Method Encoder
//!
//! Encode method headers for words written into the pushbuffer.

use gpfifo_core::{Error, Result};

// =============================================================================
// METHOD MODES
// =============================================================================

/// How the consumer applies the data words following a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMode {
    /// Each data word goes to the next method address
    Incrementing,
    /// Every data word goes to the same method address
    NonIncrementing,
    /// First word to the method, the rest to the following address
    IncrementOnce,
    /// Value carried inside the header, no data words
    Immediate,
}

// =============================================================================
// ENCODER TRAIT
// =============================================================================

/// Trait for method header encoders
pub trait MethodEncoder: Send {
    /// Get encoder name
    fn name(&self) -> &'static str;

    /// Maximum number of data words behind one header
    fn max_count(&self) -> u32;

    /// Largest value an immediate header can carry
    fn max_immediate(&self) -> u32;

    /// Encode a header for `count` data words
    ///
    /// For [`MethodMode::Immediate`] `count` is the inline value.
    fn header(&self, mode: MethodMode, subchannel: u32, method: u32, count: u32) -> Result<u32>;
}

// =============================================================================
// STANDARD ENCODER
// =============================================================================

/// Generic header layout
///
/// ```text
/// [31:29] mode   [28:16] count / immediate   [15:13] subchannel   [11:0] method >> 2
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardEncoder;

impl StandardEncoder {
    const MODE_SHIFT: u32 = 29;
    const COUNT_SHIFT: u32 = 16;
    const COUNT_MASK: u32 = 0x1fff;
    const SUBCHANNEL_SHIFT: u32 = 13;
    const SUBCHANNEL_MAX: u32 = 7;
    const METHOD_LIMIT: u32 = 0x4000;

    const fn mode_bits(mode: MethodMode) -> u32 {
        match mode {
            MethodMode::Incrementing => 1,
            MethodMode::NonIncrementing => 3,
            MethodMode::Immediate => 4,
            MethodMode::IncrementOnce => 5,
        }
    }

    /// Decode a header back into its fields
    pub const fn decode(header: u32) -> Option<(MethodMode, u32, u32, u32)> {
        let mode = match header >> Self::MODE_SHIFT {
            1 => MethodMode::Incrementing,
            3 => MethodMode::NonIncrementing,
            4 => MethodMode::Immediate,
            5 => MethodMode::IncrementOnce,
            _ => return None,
        };
        Some((
            mode,
            (header >> Self::SUBCHANNEL_SHIFT) & Self::SUBCHANNEL_MAX,
            (header & 0xfff) << 2,
            (header >> Self::COUNT_SHIFT) & Self::COUNT_MASK,
        ))
    }
}

impl MethodEncoder for StandardEncoder {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn max_count(&self) -> u32 {
        Self::COUNT_MASK
    }

    fn max_immediate(&self) -> u32 {
        Self::COUNT_MASK
    }

    fn header(&self, mode: MethodMode, subchannel: u32, method: u32, count: u32) -> Result<u32> {
        if subchannel > Self::SUBCHANNEL_MAX || method >= Self::METHOD_LIMIT {
            return Err(Error::InvalidParameter);
        }
        if method % 4 != 0 {
            return Err(Error::MisalignedAddress);
        }
        if count > Self::COUNT_MASK {
            return Err(Error::InvalidParameter);
        }
        Ok((Self::mode_bits(mode) << Self::MODE_SHIFT)
            | (count << Self::COUNT_SHIFT)
            | (subchannel << Self::SUBCHANNEL_SHIFT)
            | (method >> 2))
    }
}
