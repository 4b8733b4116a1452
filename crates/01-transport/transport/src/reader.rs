//! Subscriber side of a [`MemoryChannel`](crate::MemoryChannel).

use std::path::Path;
use std::time::Duration;

use crate::event::SyncEvent;
use crate::header::{ChannelHeader, HEADER_SIZE};
use crate::identity::ProcessIdentity;
use crate::naming::{ack_event_name, signal_event_name};
use crate::region::NamedRegion;
use crate::{TransportError, TransportResult};

/// Copy of one payload taken out of a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedSample {
    pub header: ChannelHeader,
    pub payload: Vec<u8>,
}

/// Reads a channel instance on behalf of one local subscriber.
pub struct ChannelReader {
    identity: ProcessIdentity,
    region: NamedRegion,
    signal: SyncEvent,
    ack: SyncEvent,
    open_timeout: Duration,
}

impl ChannelReader {
    /// Maps `instance_name` and opens this reader's signal/ack events.
    pub fn open(
        dir: &Path,
        instance_name: &str,
        identity: ProcessIdentity,
        open_timeout: Duration,
    ) -> TransportResult<Self> {
        let region = NamedRegion::open(dir, instance_name)?;
        let signal = SyncEvent::open(dir, &signal_event_name(instance_name, &identity))?;
        let ack = SyncEvent::open(dir, &ack_event_name(instance_name, &identity))?;
        Ok(Self {
            identity,
            region,
            signal,
            ack,
            open_timeout,
        })
    }

    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    pub fn instance_name(&self) -> &str {
        self.region.name()
    }

    /// Waits up to `timeout` for new data, copies it and acknowledges it when asked to.
    pub fn receive(&self, timeout: Duration) -> TransportResult<Option<ReceivedSample>> {
        if !self.signal.wait(timeout) {
            return Ok(None);
        }
        let sample = self.read_current()?;
        if sample.header.ack_timeout_ms != 0 {
            self.ack.set();
        }
        Ok(Some(sample))
    }

    /// Copies the current header and payload without touching the events.
    pub fn read_current(&self) -> TransportResult<ReceivedSample> {
        let guard = self
            .region
            .lock(self.open_timeout)
            .ok_or_else(|| TransportError::LockTimeout(self.region.name().to_string()))?;
        let header = ChannelHeader::decode(guard.read_at(0, HEADER_SIZE)?)?;
        let payload = guard
            .read_at(HEADER_SIZE, header.data_size as usize)?
            .to_vec();
        Ok(ReceivedSample { header, payload })
    }
}

impl std::fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReader")
            .field("identity", &self.identity)
            .field("instance_name", &self.region.name())
            .finish()
    }
}
