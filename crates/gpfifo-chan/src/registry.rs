//! # Channel Registry
//!
//! Owns the live channels of a device. Each channel sits behind its own lock,
//! so channels can be driven from different threads independently.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use gpfifo_core::{ChannelId, Error, Result};
use spin::Mutex;

use crate::channel::{AnyChannel, Channel};

/// Channel shared between the registry and its users
pub type SharedChannel = Arc<Mutex<AnyChannel>>;

/// Registry of live channels
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: Mutex<BTreeMap<ChannelId, SharedChannel>>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a new channel ID
    pub fn alloc_id(&self) -> ChannelId {
        ChannelId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a channel under its own ID
    pub fn register(&self, channel: impl Into<AnyChannel>) -> Result<SharedChannel> {
        let channel = channel.into();
        let id = channel.id();
        let mut channels = self.channels.lock();
        if channels.contains_key(&id) {
            return Err(Error::InvalidParameter);
        }
        let shared = Arc::new(Mutex::new(channel));
        channels.insert(id, shared.clone());
        log::debug!("ChannelRegistry: registered channel {}", id);
        Ok(shared)
    }

    /// Get a channel
    pub fn get(&self, id: ChannelId) -> Option<SharedChannel> {
        self.channels.lock().get(&id).cloned()
    }

    /// Remove a channel
    ///
    /// The channel is torn down once the last handle to it is dropped.
    pub fn remove(&self, id: ChannelId) -> Option<SharedChannel> {
        self.channels.lock().remove(&id)
    }

    /// IDs of all registered channels, in ascending order
    pub fn ids(&self) -> Vec<ChannelId> {
        self.channels.lock().keys().copied().collect()
    }

    /// Number of registered channels
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    /// Check if no channel is registered
    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Channels with a latched error
    pub fn errored(&self) -> Vec<(ChannelId, Error)> {
        let snapshot: Vec<(ChannelId, SharedChannel)> = self
            .channels
            .lock()
            .iter()
            .map(|(id, chan)| (*id, chan.clone()))
            .collect();

        snapshot
            .into_iter()
            .filter_map(|(id, chan)| chan.lock().error().map(|e| (id, e)))
            .collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(ChannelRegistry: Send, Sync);
