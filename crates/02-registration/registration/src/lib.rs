//! Registration receiver for the shared-memory publish/subscribe layer.
//!
//! Discovery samples (publishers, subscribers, services, clients, processes)
//! arrive over UDP one sample per datagram, and over the host-local
//! [`transport::BroadcastDomain`] as batches. The [`RegistrationReceiver`]
//! normalizes every sample, applies locality and loop-back policy and forwards
//! it to the gates of this process and to registered observers.

mod callback;
pub mod codec;
pub mod compat;
mod config;
mod error;
mod gate;
mod local;
mod network;
mod receiver;
mod sample;

pub use callback::{ApplySampleCallback, RegistrationCallback, RegistrationEvent};
pub use config::{ChannelConfig, Config, MulticastConfig, ShmMonitoringConfig};
pub use error::{RegistrationError, RegistrationResult};
pub use gate::{PublisherGate, ServiceClientRegistry, SubscriberGate};
pub use local::RegistrationTransportLocal;
pub use network::{NetworkAttr, RegistrationTransportNetwork, RECEIVE_POLL};
pub use receiver::{Locality, RegistrationReceiver, RegistrationReceiverBuilder};
pub use sample::{
    ClientInfo, Command, ProcessInfo, RegistrationSample, SampleBatch, ServiceInfo, TopicInfo,
};
