//! Synchronized shared-memory channel: one writer, many local readers.
//!
//! A channel owns one [`NamedRegion`] holding a [`ChannelHeader`] followed by
//! the latest payload. Every connected reader gets a [`SyncEventPair`]; a
//! write raises each reader's signal event and, when an acknowledge timeout is
//! set, waits for the acknowledgements under one shared deadline.
//!
//! The region is recreated under a fresh instance name whenever a payload
//! outgrows it or its lock looks abandoned. Readers keep their identity across
//! recreations but must learn the new instance name through registration.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, trace, warn};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::event::SyncEventPair;
use crate::header::{ChannelHeader, HEADER_SIZE};
use crate::identity::ProcessIdentity;
use crate::naming::{ack_event_name, random_instance_name, signal_event_name};
use crate::region::{default_shm_dir, NamedRegion, RegionGuard};
use crate::wait::remaining;
use crate::{TransportError, TransportResult};

/// Static channel configuration.
#[derive(Clone, Debug)]
pub struct ChannelAttr {
    /// Smallest payload capacity a region is created with.
    pub min_size: usize,
    /// Extra capacity, in percent of the requested size, added on growth.
    pub reserve_percent: u32,
    /// Bound for acquiring the region lock.
    pub open_timeout: Duration,
    /// Default acknowledge timeout; zero means fire-and-forget.
    pub ack_timeout_ms: i64,
    /// Directory holding regions and events.
    pub shm_dir: PathBuf,
}

impl Default for ChannelAttr {
    fn default() -> Self {
        Self {
            min_size: 4096,
            reserve_percent: 50,
            open_timeout: Duration::from_millis(50),
            ack_timeout_ms: 0,
            shm_dir: default_shm_dir(),
        }
    }
}

/// Per-write metadata copied into the header.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteAttr {
    pub id: u64,
    pub clock: u64,
    pub time: i64,
    pub hash: u64,
    pub zero_copy: bool,
    pub ack_timeout_ms: i64,
}

/// Result of a successful [`MemoryChannel::write`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Payload written into the existing region.
    Written,
    /// The region was recreated first; readers must be told the new instance name.
    Recreated,
}

/// Observable state of one reader's event handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionState {
    pub signal_valid: bool,
    pub ack_valid: bool,
}

/// Shared-memory channel owned by one publisher.
pub struct MemoryChannel {
    base_name: String,
    attr: ChannelAttr,
    ack_timeout_ms: AtomicI64,
    created: AtomicBool,
    region: RwLock<Option<Arc<NamedRegion>>>,
    readers: Mutex<HashMap<ProcessIdentity, SyncEventPair>>,
    // Serializes writers of this handle so a resize never races another write.
    writing: Mutex<()>,
}

impl MemoryChannel {
    /// Builds a channel and creates its first region.
    pub fn new(
        base_name: impl Into<String>,
        initial_size: usize,
        attr: ChannelAttr,
    ) -> TransportResult<Self> {
        let channel = Self {
            base_name: base_name.into(),
            ack_timeout_ms: AtomicI64::new(attr.ack_timeout_ms.max(0)),
            attr,
            created: AtomicBool::new(false),
            region: RwLock::new(None),
            readers: Mutex::new(HashMap::new()),
            writing: Mutex::new(()),
        };
        channel.create(initial_size)?;
        Ok(channel)
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Name of the current region, `None` while destroyed.
    pub fn instance_name(&self) -> Option<String> {
        self.region
            .read()
            .as_ref()
            .map(|region| region.name().to_string())
    }

    /// Bytes available for header plus payload.
    pub fn capacity(&self) -> usize {
        self.region.read().as_ref().map_or(0, |region| region.len())
    }

    pub fn shm_dir(&self) -> &Path {
        &self.attr.shm_dir
    }

    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }

    /// Acknowledge timeout used by the latest write.
    pub fn ack_timeout_ms(&self) -> i64 {
        self.ack_timeout_ms.load(Ordering::Relaxed)
    }

    pub fn reader_count(&self) -> usize {
        self.readers.lock().len()
    }

    pub fn is_connected(&self, reader: &ProcessIdentity) -> bool {
        self.readers.lock().contains_key(reader)
    }

    /// Reader identities currently in the table.
    pub fn readers(&self) -> Vec<ProcessIdentity> {
        self.readers.lock().keys().cloned().collect()
    }

    /// False for unknown readers and for readers whose ack timed out.
    pub fn ack_is_valid(&self, reader: &ProcessIdentity) -> bool {
        self.readers
            .lock()
            .get(reader)
            .is_some_and(|pair| pair.ack.is_valid())
    }

    pub fn connection_state(&self, reader: &ProcessIdentity) -> Option<ConnectionState> {
        self.readers.lock().get(reader).map(|pair| ConnectionState {
            signal_valid: pair.signal.is_valid(),
            ack_valid: pair.ack.is_valid(),
        })
    }

    /// Allocates a fresh region of `HEADER_SIZE + max(initial_size, min_size)` bytes.
    pub fn create(&self, initial_size: usize) -> TransportResult<()> {
        if self.is_created() {
            return Err(TransportError::AlreadyCreated(self.base_name.clone()));
        }

        let instance_name = random_instance_name(&self.base_name);
        let data_len = HEADER_SIZE + initial_size.max(self.attr.min_size);
        let region = NamedRegion::create(&self.attr.shm_dir, &instance_name, data_len)
            .map_err(|err| {
                error!("{}: creating region {instance_name} failed: {err}", self.base_name);
                err
            })?;

        if let Err(err) = self.write_empty_header(&region) {
            error!("{}: initialising {instance_name} failed: {err}", self.base_name);
            if let Err(unlink_err) = region.unlink() {
                debug!("{}: {unlink_err}", self.base_name);
            }
            return Err(err);
        }

        *self.region.write() = Some(Arc::new(region));
        self.created.store(true, Ordering::Release);
        debug!("{}: created {instance_name} ({data_len} bytes)", self.base_name);
        Ok(())
    }

    fn write_empty_header(&self, region: &NamedRegion) -> TransportResult<()> {
        let mut guard = region
            .lock(self.attr.open_timeout)
            .ok_or_else(|| TransportError::LockTimeout(region.name().to_string()))?;
        guard.write_at(0, &ChannelHeader::default().encode())
    }

    /// Adds `reader`, or reopens its acknowledge event if a timeout closed it.
    pub fn connect(&self, reader: &ProcessIdentity) -> TransportResult<()> {
        if !self.is_created() {
            return Err(TransportError::NotCreated(self.base_name.clone()));
        }
        let instance_name = self
            .instance_name()
            .ok_or_else(|| TransportError::NotCreated(self.base_name.clone()))?;

        let mut readers = self.readers.lock();
        match readers.entry(reader.clone()) {
            Entry::Vacant(slot) => {
                let pair = SyncEventPair::open(
                    &self.attr.shm_dir,
                    &signal_event_name(&instance_name, reader),
                    &ack_event_name(&instance_name, reader),
                )?;
                slot.insert(pair);
            }
            Entry::Occupied(mut entry) => {
                if !entry.get().ack.is_valid() {
                    entry.get_mut().reopen_ack()?;
                }
            }
        }
        Ok(())
    }

    /// Removes `reader` and closes its events.
    pub fn disconnect(&self, reader: &ProcessIdentity) -> TransportResult<()> {
        if !self.is_created() {
            return Err(TransportError::NotCreated(self.base_name.clone()));
        }
        let mut pair = self
            .readers
            .lock()
            .remove(reader)
            .ok_or_else(|| TransportError::UnknownReader(reader.clone()))?;
        pair.close();
        Ok(())
    }

    /// Recreates the region when `required` payload bytes would not fit.
    ///
    /// Returns `true` after a recreation: the caller must republish its
    /// registration before readers can see further writes.
    pub fn check_size(&self, required: usize) -> TransportResult<bool> {
        if !self.is_created() {
            return Err(TransportError::NotCreated(self.base_name.clone()));
        }
        let too_large = || TransportError::PayloadTooLarge {
            requested: required,
            capacity: self.capacity(),
        };
        if required.checked_add(HEADER_SIZE).ok_or_else(too_large)? <= self.capacity() {
            return Ok(false);
        }

        let reserve = required.saturating_mul(self.attr.reserve_percent as usize) / 100;
        let new_size = required
            .checked_add(reserve)
            .filter(|size| size.checked_add(HEADER_SIZE).is_some())
            .ok_or_else(too_large)?;
        debug!(
            "{}: {required} bytes do not fit, recreating with {new_size}",
            self.base_name
        );
        self.recreate(new_size)?;
        Ok(true)
    }

    /// Writes `payload` and notifies every connected reader.
    pub fn write(&self, payload: &[u8], attr: &WriteAttr) -> TransportResult<WriteOutcome> {
        if !self.is_created() {
            error!("{}: write on a channel that is not created", self.base_name);
            return Err(TransportError::NotCreated(self.base_name.clone()));
        }
        let _writing = self.writing.lock();

        let ack_timeout_ms = attr.ack_timeout_ms.max(0);
        self.ack_timeout_ms.store(ack_timeout_ms, Ordering::Relaxed);

        let mut recreated = self.check_size(payload.len())?;
        let header = ChannelHeader {
            data_size: payload.len() as u64,
            id: attr.id,
            clock: attr.clock,
            time: attr.time,
            hash: attr.hash,
            zero_copy: attr.zero_copy,
            ack_timeout_ms,
        };

        let region = self.current_region()?;
        let written = match region.lock(self.attr.open_timeout) {
            Some(mut guard) => write_content(&mut guard, &header, payload),
            None => {
                warn!(
                    "{}: lock of {} held by {:?}, recreating",
                    self.base_name,
                    region.name(),
                    region.lock_holder()
                );
                self.recreate(region.len().saturating_sub(HEADER_SIZE))?;
                recreated = true;

                let region = self.current_region()?;
                let Some(mut guard) = region.lock(self.attr.open_timeout) else {
                    error!("{}: lock of {} still unavailable", self.base_name, region.name());
                    return Err(TransportError::LockTimeout(region.name().to_string()));
                };
                write_content(&mut guard, &header, payload)
            }
        };

        match written {
            Ok(()) => {
                self.sync_content();
                trace!("{}: wrote {} bytes", self.base_name, payload.len());
                Ok(if recreated {
                    WriteOutcome::Recreated
                } else {
                    WriteOutcome::Written
                })
            }
            Err(err) => {
                error!("{}: write failed: {err}", self.base_name);
                Err(err)
            }
        }
    }

    fn current_region(&self) -> TransportResult<Arc<NamedRegion>> {
        self.region
            .read()
            .clone()
            .ok_or_else(|| TransportError::NotCreated(self.base_name.clone()))
    }

    /// Raises every reader's signal and collects acknowledgements.
    fn sync_content(&self) {
        if !self.is_created() {
            return;
        }
        let ack_timeout_ms = self.ack_timeout_ms.load(Ordering::Relaxed);
        let mut readers = self.readers.lock();

        // Drop acks left over from an earlier write.
        if ack_timeout_ms != 0 {
            for pair in readers.values() {
                if let Some(ack) = pair.ack.event() {
                    while ack.try_take() {}
                }
            }
        }

        for pair in readers.values() {
            pair.signal.set();
        }

        if ack_timeout_ms == 0 {
            return;
        }

        // One deadline for all readers: later entries get whatever budget is left.
        let budget = Duration::from_millis(ack_timeout_ms as u64);
        let start = Instant::now();
        for (reader, pair) in readers.iter_mut() {
            let Some(ack) = pair.ack.event() else {
                continue;
            };
            if !ack.wait(remaining(start, budget)) {
                pair.ack.invalidate();
                debug!("{}: ack timeout from {reader}", self.base_name);
            }
        }
    }

    /// Rebuilds the region at `new_size` and reconnects the known readers.
    pub fn recreate(&self, new_size: usize) -> TransportResult<()> {
        let readers: SmallVec<[ProcessIdentity; 8]> =
            self.readers.lock().keys().cloned().collect();

        // The old region is gone from this handle either way; carry on with the new one.
        if let Err(err) = self.destroy() {
            warn!("{}: releasing the old region failed: {err}", self.base_name);
        }
        self.create(new_size)?;

        for reader in &readers {
            if let Err(err) = self.connect(reader) {
                warn!("{}: reconnecting {reader} failed: {err}", self.base_name);
            }
        }
        Ok(())
    }

    /// Disconnects every reader and releases the region. Idempotent.
    pub fn destroy(&self) -> TransportResult<()> {
        if !self.created.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.disconnect_all();

        let Some(region) = self.region.write().take() else {
            return Ok(());
        };
        match region.unlink() {
            Ok(()) => {
                debug!("{}: destroyed {}", self.base_name, region.name());
                Ok(())
            }
            Err(err) => {
                debug!("{}: releasing {} failed: {err}", self.base_name, region.name());
                Err(err)
            }
        }
    }

    fn disconnect_all(&self) {
        let mut readers = self.readers.lock();

        // Wake writers still waiting on an acknowledgement.
        for pair in readers.values() {
            pair.ack.set();
        }
        for pair in readers.values_mut() {
            pair.close();
        }
        readers.clear();
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            debug!("{}: {err}", self.base_name);
        }
    }
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("base_name", &self.base_name)
            .field("instance_name", &self.instance_name())
            .field("capacity", &self.capacity())
            .field("readers", &self.reader_count())
            .finish()
    }
}

fn write_content(
    guard: &mut RegionGuard<'_>,
    header: &ChannelHeader,
    payload: &[u8],
) -> TransportResult<()> {
    guard.write_at(0, &header.encode())?;
    if !payload.is_empty() {
        guard.write_at(HEADER_SIZE, payload)?;
    }
    Ok(())
}
