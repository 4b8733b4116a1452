//! Shared-memory broadcast domain.
//!
//! A domain is a named region holding a fixed queue of fixed-size slots. Any
//! process on the host may append a message; every bound reader sees every
//! message appended after it bound, unless the queue wrapped around first.
//!
//! ```text
//! +--------------------+----------------------------------------------+
//! | u64 write_count    | slot 0: [u64 seq][u32 len][u32 pad][bytes..] |
//! | u32 queue_size     | slot 1: ...                                  |
//! | u32 slot_size      | ...                                          |
//! +--------------------+----------------------------------------------+
//! ```
//!
//! All accesses happen under the region lock.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::naming::sanitize;
use crate::region::{NamedRegion, RegionGuard};
use crate::wait::wait_until;
use crate::{TransportError, TransportResult};

const DOMAIN_HEADER: usize = 16;
const SLOT_HEADER: usize = 16;

struct DomainInner {
    region: NamedRegion,
    queue_size: u32,
    slot_size: u32,
    lock_timeout: Duration,
}

impl DomainInner {
    fn lock(&self) -> TransportResult<RegionGuard<'_>> {
        self.region
            .lock(self.lock_timeout)
            .ok_or_else(|| TransportError::LockTimeout(self.region.name().to_string()))
    }

    fn slot_offset(&self, seq: u64) -> usize {
        let index = (seq % u64::from(self.queue_size)) as usize;
        DOMAIN_HEADER + index * (SLOT_HEADER + self.slot_size as usize)
    }
}

/// Handle on a broadcast domain shared by every process of the host.
#[derive(Clone)]
pub struct BroadcastDomain {
    inner: Arc<DomainInner>,
}

impl BroadcastDomain {
    /// Joins the domain `name`, creating it with the given geometry if needed.
    ///
    /// A domain that already exists keeps the geometry it was created with.
    pub fn open_or_create(
        dir: &Path,
        name: &str,
        queue_size: u32,
        slot_size: u32,
        lock_timeout: Duration,
    ) -> TransportResult<Self> {
        if queue_size == 0 || slot_size == 0 {
            return Err(TransportError::InvalidLayout("empty broadcast geometry"));
        }
        let region_name = format!("{}_broadcast", sanitize(name));
        let data_len = DOMAIN_HEADER + queue_size as usize * (SLOT_HEADER + slot_size as usize);

        let inner = match NamedRegion::create_new(dir, &region_name, data_len)? {
            Some(region) => {
                {
                    let mut guard = region
                        .lock(lock_timeout)
                        .ok_or_else(|| TransportError::LockTimeout(region_name.clone()))?;
                    guard.write_at(0, &0u64.to_le_bytes())?;
                    guard.write_at(8, &queue_size.to_le_bytes())?;
                    guard.write_at(12, &slot_size.to_le_bytes())?;
                }
                debug!("created broadcast domain {region_name}");
                DomainInner {
                    region,
                    queue_size,
                    slot_size,
                    lock_timeout,
                }
            }
            None => Self::attach(dir, &region_name, lock_timeout)?,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    fn attach(dir: &Path, region_name: &str, lock_timeout: Duration) -> TransportResult<DomainInner> {
        let region = NamedRegion::open(dir, region_name)?;
        let mut geometry = (0u32, 0u32);
        let ready = wait_until(lock_timeout, || {
            let Some(guard) = region.lock(Duration::ZERO) else {
                return false;
            };
            geometry = (u32_at(guard.as_slice(), 8), u32_at(guard.as_slice(), 12));
            geometry.0 != 0 && geometry.1 != 0
        });
        if !ready.is_ok() {
            return Err(TransportError::InvalidLayout("broadcast domain not initialised"));
        }
        let (queue_size, slot_size) = geometry;
        let needed = DOMAIN_HEADER + queue_size as usize * (SLOT_HEADER + slot_size as usize);
        if needed > region.len() {
            return Err(TransportError::InvalidLayout("broadcast domain truncated"));
        }
        Ok(DomainInner {
            region,
            queue_size,
            slot_size,
            lock_timeout,
        })
    }

    pub fn name(&self) -> &str {
        self.inner.region.name()
    }

    pub fn queue_size(&self) -> u32 {
        self.inner.queue_size
    }

    /// Largest message a slot can hold.
    pub fn slot_size(&self) -> usize {
        self.inner.slot_size as usize
    }

    pub fn writer(&self) -> BroadcastWriter {
        BroadcastWriter {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Binds a reader at the current end of the queue; older messages are skipped.
    pub fn bind_reader(&self) -> TransportResult<BroadcastReader> {
        let next = {
            let guard = self.inner.lock()?;
            u64_at(guard.as_slice(), 0)
        };
        Ok(BroadcastReader {
            inner: Arc::clone(&self.inner),
            next,
        })
    }

    /// Removes the domain file; processes that already joined keep their mapping.
    pub fn unlink(&self) -> TransportResult<()> {
        self.inner.region.unlink()
    }
}

/// Appends messages to a broadcast domain.
#[derive(Clone)]
pub struct BroadcastWriter {
    inner: Arc<DomainInner>,
}

impl BroadcastWriter {
    /// Appends `message` and returns its sequence number.
    pub fn write(&self, message: &[u8]) -> TransportResult<u64> {
        if message.len() > self.inner.slot_size as usize {
            return Err(TransportError::PayloadTooLarge {
                requested: message.len(),
                capacity: self.inner.slot_size as usize,
            });
        }
        let mut guard = self.inner.lock()?;
        let seq = u64_at(guard.as_slice(), 0);
        let offset = self.inner.slot_offset(seq);
        guard.write_at(offset, &seq.to_le_bytes())?;
        guard.write_at(offset + 8, &(message.len() as u32).to_le_bytes())?;
        guard.write_at(offset + SLOT_HEADER, message)?;
        guard.write_at(0, &(seq + 1).to_le_bytes())?;
        Ok(seq)
    }
}

/// Drains messages appended since the previous read.
pub struct BroadcastReader {
    inner: Arc<DomainInner>,
    next: u64,
}

impl BroadcastReader {
    /// Copies out every pending message in append order.
    pub fn read(&mut self) -> TransportResult<Vec<Vec<u8>>> {
        let guard = self.inner.lock()?;
        let write_count = u64_at(guard.as_slice(), 0);
        if write_count < self.next {
            // The domain was recreated underneath us.
            self.next = write_count;
        }

        let queue_size = u64::from(self.inner.queue_size);
        if write_count - self.next > queue_size {
            let lost = write_count - self.next - queue_size;
            warn!("{}: reader overrun, {lost} messages lost", self.inner.region.name());
            self.next = write_count - queue_size;
        }

        let mut messages = Vec::with_capacity((write_count - self.next) as usize);
        for seq in self.next..write_count {
            let offset = self.inner.slot_offset(seq);
            let slot = guard.read_at(offset, SLOT_HEADER)?;
            if u64_at(slot, 0) != seq {
                debug!("{}: slot {seq} overwritten", self.inner.region.name());
                continue;
            }
            let len = (u32_at(slot, 8) as usize).min(self.inner.slot_size as usize);
            messages.push(guard.read_at(offset + SLOT_HEADER, len)?.to_vec());
        }
        self.next = write_count;
        Ok(messages)
    }
}

fn u64_at(bytes: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(word)
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}
