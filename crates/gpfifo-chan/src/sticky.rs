//! # Sticky Error State
//!
//! Per-channel error latch. The first error wins, except that a global reset
//! overrides whatever was latched before it. A permanent error stays
//! permanent when a reset overrides it.
//!
//! ```text
//!            latch(e)                 recover(): no faults pending
//!  Healthy ───────────▶ Errored(e) ─────────────────────────────▶ Healthy
//!                           │
//!                           │ recover(): faults pending
//!                           ▼
//!                PermanentlyErrored(last fault)
//! ```

use gpfifo_core::{ChannelId, Error, Result};

/// Channel error state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorState {
    /// No error latched
    #[default]
    Healthy,
    /// Error latched, recovery may clear it
    Errored(Error),
    /// Error latched and confirmed by the consumer, recovery keeps it
    PermanentlyErrored(Error),
}

impl ErrorState {
    /// Check if operations may proceed
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Latched error, if any
    pub const fn error(&self) -> Option<Error> {
        match self {
            Self::Healthy => None,
            Self::Errored(e) | Self::PermanentlyErrored(e) => Some(*e),
        }
    }
}

/// Result of feeding an error into the latch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The error became the latched error
    Latched,
    /// A global reset replaced an earlier error
    Overridden(Error),
    /// An error was already latched and this one was dropped
    Ignored,
}

/// Sticky error latch for one channel
#[derive(Debug)]
pub struct StickyError {
    channel: ChannelId,
    state: ErrorState,
    transitions: u32,
}

impl StickyError {
    /// Create a healthy latch for `channel`
    pub const fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            state: ErrorState::Healthy,
            transitions: 0,
        }
    }

    /// Channel named in diagnostics
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> ErrorState {
        self.state
    }

    /// Latched error, if any
    #[inline]
    pub fn error(&self) -> Option<Error> {
        self.state.error()
    }

    /// Number of state changes so far
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Short-circuit check used at the top of every operation
    #[inline]
    pub fn check(&self) -> Result<()> {
        match self.state.error() {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Feed an error into the latch and return the latched error
    pub fn latch(&mut self, error: Error) -> (Transition, Error) {
        let transition = self.apply(error);
        match transition {
            Transition::Latched => {
                log::error!("Channel {}: error latched: {}", self.channel, error);
            }
            Transition::Overridden(previous) => {
                log::error!(
                    "Channel {}: {} replaced by {}",
                    self.channel,
                    previous,
                    error
                );
            }
            Transition::Ignored => {}
        }
        let latched = self.state.error().unwrap_or(error);
        (transition, latched)
    }

    /// Latch `error` and return it as the sticky error
    #[inline]
    pub fn fail<T>(&mut self, error: Error) -> Result<T> {
        let (_, latched) = self.latch(error);
        Err(latched)
    }

    fn apply(&mut self, error: Error) -> Transition {
        match self.state {
            ErrorState::Healthy => {
                self.set(ErrorState::Errored(error));
                Transition::Latched
            }
            ErrorState::Errored(current)
                if error.is_global_reset() && !current.is_global_reset() =>
            {
                self.set(ErrorState::Errored(error));
                Transition::Overridden(current)
            }
            ErrorState::PermanentlyErrored(current)
                if error.is_global_reset() && !current.is_global_reset() =>
            {
                self.set(ErrorState::PermanentlyErrored(error));
                Transition::Overridden(current)
            }
            ErrorState::Errored(_) | ErrorState::PermanentlyErrored(_) => Transition::Ignored,
        }
    }

    /// Make the latched error terminal
    ///
    /// `fault` replaces whatever was latched, it is the consumer's own
    /// account of what went wrong.
    pub fn make_permanent(&mut self, fault: Error) {
        if self.state == ErrorState::PermanentlyErrored(fault) {
            return;
        }
        log::error!("Channel {}: permanently failed: {}", self.channel, fault);
        self.set(ErrorState::PermanentlyErrored(fault));
    }

    /// Return to healthy after a clean recovery
    ///
    /// A permanent error survives; the returned result reports it.
    pub fn recover(&mut self) -> Result<()> {
        match self.state {
            ErrorState::Healthy => Ok(()),
            ErrorState::Errored(previous) => {
                log::info!("Channel {}: recovered from {}", self.channel, previous);
                self.set(ErrorState::Healthy);
                Ok(())
            }
            ErrorState::PermanentlyErrored(e) => Err(e),
        }
    }

    /// Force the latch back to healthy
    pub fn clear(&mut self) {
        if !self.state.is_healthy() {
            log::warn!("Channel {}: error state cleared", self.channel);
            self.set(ErrorState::Healthy);
        }
    }

    fn set(&mut self, state: ErrorState) {
        self.state = state;
        self.transitions += 1;
    }
}
