//! # Shadow Position Cache
//!
//! Last-known read positions of every consumer. A cached position lags the
//! consumer, so it can only make the producer wait longer than needed, never
//! overwrite unread data. It is refreshed before it is trusted to block.

use alloc::vec::Vec;

use gpfifo_core::{ConsumerId, ConsumerPort, ConsumerPosition, GpuAddr, Result};
use gpfifo_hal::{MappedRegion, fence};

#[derive(Debug)]
struct ShadowEntry {
    cached: ConsumerPosition,
    /// Cell the consumer writes its positions into
    semaphore: Option<MappedRegion>,
}

/// Cached consumer positions
#[derive(Debug)]
pub struct ShadowPositions {
    entries: Vec<ShadowEntry>,
    queries: u64,
    semaphore_reads: u64,
}

impl ShadowPositions {
    /// Create a cache for `count` consumers, all at position zero
    pub fn new(count: usize) -> Self {
        let mut entries = Vec::with_capacity(count);
        entries.resize_with(count, || ShadowEntry {
            cached: ConsumerPosition::default(),
            semaphore: None,
        });
        Self {
            entries,
            queries: 0,
            semaphore_reads: 0,
        }
    }

    /// Number of consumers
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no consumers
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Use `region` as the consumer's position semaphore
    pub fn attach_semaphore(&mut self, consumer: ConsumerId, region: MappedRegion) {
        if let Some(entry) = self.entries.get_mut(consumer.index()) {
            entry.semaphore = Some(region);
        }
    }

    /// Address of the consumer's semaphore cell
    pub fn semaphore_addr(&self, consumer: ConsumerId) -> Option<GpuAddr> {
        self.entries
            .get(consumer.index())
            .and_then(|e| e.semaphore.as_ref())
            .map(MappedRegion::gpu_addr)
    }

    /// Check whether every consumer has a semaphore
    pub fn all_semaphores(&self) -> bool {
        self.entries.iter().all(|e| e.semaphore.is_some())
    }

    /// Cached position of one consumer
    #[inline]
    pub fn cached(&self, consumer: ConsumerId) -> ConsumerPosition {
        self.entries
            .get(consumer.index())
            .map(|e| e.cached)
            .unwrap_or_default()
    }

    /// Iterate cached positions
    pub fn iter(&self) -> impl Iterator<Item = (ConsumerId, ConsumerPosition)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (ConsumerId::new(i as u32), e.cached))
    }

    /// Port queries issued so far
    pub fn queries(&self) -> u64 {
        self.queries
    }

    /// Semaphore reads issued so far
    pub fn semaphore_reads(&self) -> u64 {
        self.semaphore_reads
    }

    /// Refresh one consumer from its semaphore, or from the port
    pub fn refresh_one(
        &mut self,
        port: &mut dyn ConsumerPort,
        consumer: ConsumerId,
    ) -> Result<ConsumerPosition> {
        let Some(entry) = self.entries.get_mut(consumer.index()) else {
            return Ok(ConsumerPosition::default());
        };

        entry.cached = match &entry.semaphore {
            Some(cell) => {
                let raw = cell.read_u64(0)?;
                fence::read_barrier();
                self.semaphore_reads += 1;
                ConsumerPosition::from_semaphore(raw)
            }
            None => {
                self.queries += 1;
                port.query_position(consumer)?
            }
        };
        Ok(entry.cached)
    }

    /// Refresh every consumer
    pub fn refresh(&mut self, port: &mut dyn ConsumerPort) -> Result<()> {
        for i in 0..self.entries.len() {
            self.refresh_one(port, ConsumerId::new(i as u32))?;
        }
        Ok(())
    }

    /// Refresh only consumers whose semaphore can be read cheaply
    pub fn refresh_semaphores(&mut self) -> Result<()> {
        for entry in &mut self.entries {
            if let Some(cell) = &entry.semaphore {
                let raw = cell.read_u64(0)?;
                fence::read_barrier();
                self.semaphore_reads += 1;
                entry.cached = ConsumerPosition::from_semaphore(raw);
            }
        }
        Ok(())
    }

    /// Refresh every consumer through the port, bypassing semaphores
    pub fn resync(&mut self, port: &mut dyn ConsumerPort) -> Result<()> {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            self.queries += 1;
            entry.cached = port.query_position(ConsumerId::new(i as u32))?;
        }
        Ok(())
    }

    /// Detach all semaphore cells for release
    pub fn take_semaphores(&mut self) -> Vec<MappedRegion> {
        self.entries
            .iter_mut()
            .filter_map(|e| e.semaphore.take())
            .collect()
    }
}
