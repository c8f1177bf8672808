//! # GPFIFO Channels
//!
//! Producer side of the GPFIFO submission protocol: a pushbuffer of encoded
//! commands, a descriptor table naming spans of it, and the flow control
//! that keeps asynchronous consumers from ever reading overwritten data.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Channel (producer)                         │
//! │                                                                   │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────────┐     │
//! │  │    Method    │    │  Pushbuffer  │    │  Segment Table   │     │
//! │  │   Encoder    │───▶│  (byte ring) │───▶│ (GPFIFO entries) │     │
//! │  └──────────────┘    └──────┬───────┘    └────────┬─────────┘     │
//! │                             │                     │ publish       │
//! │  ┌──────────────┐    ┌──────▼───────┐    ┌────────▼─────────┐     │
//! │  │  Auto-flush  │    │    Shadow    │◀───│    Consumers     │     │
//! │  │  Controller  │    │  Positions   │    │ (port/semaphore) │     │
//! │  └──────────────┘    └──────────────┘    └──────────────────┘     │
//! │                                                                   │
//! │               Sticky error state + bounded polling                │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Submission Flow
//!
//! 1. A method header and its data are written at the pushbuffer cursor,
//!    after waiting for every consumer to leave the target range
//! 2. Closing the open span appends descriptors to the table
//! 3. Publishing flushes write-combined stores and rings each consumer's
//!    doorbell with the table position
//! 4. Consumers report progress through position semaphores or queries

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod autoflush;
pub mod channel;
pub mod codec;
pub mod config;
pub mod encoder;
pub mod gpfifo;
pub mod null;
pub mod poll;
pub mod pushbuf;
pub mod random;
pub mod registry;
pub mod ring;
pub mod ringbuf;
pub mod shadow;
pub mod sim;
pub mod sticky;

// Re-exports
pub use autoflush::{AutoFlush, ThresholdSpec};
pub use channel::{AnyChannel, Channel, ChannelStats};
pub use codec::{DescriptorCodec, EntryFlags, PackedCodec, RawEntry, Segment};
pub use config::ChannelConfig;
pub use encoder::{MethodEncoder, MethodMode, StandardEncoder};
pub use null::NullChannel;
pub use poll::{PollPolicy, poll_until};
pub use registry::{ChannelRegistry, SharedChannel};
pub use ringbuf::{ChannelParts, RingBufferChannel};
pub use sim::{SimEvent, SimPlatform, SimPort, Simulator};
pub use sticky::{ErrorState, StickyError, Transition};

static_assertions::assert_impl_all!(AnyChannel: Send);
static_assertions::assert_eq_size!(RawEntry, u64);
