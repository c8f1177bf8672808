//! # GPFIFO Core
//!
//! Foundational types for the GPFIFO command submission stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      gpfifo-core                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Traits    │  │   Types     │  │     Error           │  │
//! │  │ (Consumer   │  │ (GpuAddr,   │  │   Handling          │  │
//! │  │   Port)     │  │  Position)  │  │                     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(any(feature = "std", test))]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod error;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use error::{Error, FaultCode, Result};
pub use traits::*;
pub use types::*;

static_assertions::assert_impl_all!(Error: Send, Sync, Copy);
static_assertions::assert_eq_size!(ConsumerPosition, u64);
