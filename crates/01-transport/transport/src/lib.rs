//! Shared-memory transport primitives for same-host publish/subscribe.
//!
//! This crate exposes the pieces the registration layer and the data path
//! build on:
//! * [`MemoryChannel`] – named, lockable payload region plus one
//!   [`SyncEventPair`] per connected reader.
//! * [`ChannelReader`] – subscriber view that waits on its signal event and
//!   acknowledges when the writer asks for it.
//! * [`BroadcastDomain`] – host-wide queue used to exchange registration
//!   samples without the network.
//! * [`TransportError`] – error surface for mapping, locking and sizing failures.

mod broadcast;
mod channel;
mod error;
mod event;
mod header;
mod identity;
pub mod naming;
mod reader;
mod region;
pub mod wait;

pub use broadcast::{BroadcastDomain, BroadcastReader, BroadcastWriter};
pub use channel::{
    ChannelAttr, ConnectionState, MemoryChannel, WriteAttr, WriteOutcome,
};
pub use error::{TransportError, TransportResult};
pub use event::{EventSlot, SyncEvent, SyncEventPair};
pub use header::{ChannelHeader, HEADER_SIZE};
pub use identity::{current_host_name, ProcessIdentity};
pub use reader::{ChannelReader, ReceivedSample};
pub use region::{default_shm_dir, NamedRegion, RegionGuard, CONTROL_SIZE};
