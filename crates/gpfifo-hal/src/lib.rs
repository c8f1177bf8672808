//! # GPFIFO Hardware Abstraction Layer
//!
//! Memory and platform services beneath the submission protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        gpfifo-hal                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────┐   │
//! │  │ MappedRegion │  │   Platform   │  │      fence        │   │
//! │  │ MemoryProv.  │  │ (time/yield) │  │ (WC flush, dmb)   │   │
//! │  └──────┬───────┘  └──────────────┘  └───────────────────┘   │
//! │         │                                                    │
//! │  ┌──────▼───────┐                                            │
//! │  │  HostMemory  │  identity-mapped, global allocator         │
//! │  └──────────────┘                                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod fence;
pub mod host;
pub mod platform;
pub mod region;

// Re-exports
pub use host::HostMemory;
#[cfg(feature = "std")]
pub use platform::HostPlatform;
pub use platform::Platform;
pub use region::{AllocDesc, AllocFlags, MappedRegion, MemoryProvider};
