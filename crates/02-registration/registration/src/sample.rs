//! Registration sample schema.
//!
//! Samples travel as rkyv archives (see [`crate::codec`]). The command is kept
//! as the raw wire value so that samples from newer peers still decode; use
//! [`RegistrationSample::command`] to classify it.

use rkyv::{Archive, Deserialize, Serialize};
use transport::ProcessIdentity;

/// Registration command carried by a sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    None,
    SetSample,
    RegisterPublisher,
    RegisterSubscriber,
    RegisterProcess,
    RegisterService,
    RegisterClient,
    UnregisterPublisher,
    UnregisterSubscriber,
    UnregisterProcess,
    UnregisterService,
    UnregisterClient,
    /// A wire value this build does not know.
    Unknown(u32),
}

impl Command {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Command::None,
            1 => Command::SetSample,
            2 => Command::RegisterPublisher,
            3 => Command::RegisterSubscriber,
            4 => Command::RegisterProcess,
            5 => Command::RegisterService,
            6 => Command::RegisterClient,
            12 => Command::UnregisterPublisher,
            13 => Command::UnregisterSubscriber,
            14 => Command::UnregisterProcess,
            15 => Command::UnregisterService,
            16 => Command::UnregisterClient,
            other => Command::Unknown(other),
        }
    }

    pub const fn to_raw(self) -> u32 {
        match self {
            Command::None => 0,
            Command::SetSample => 1,
            Command::RegisterPublisher => 2,
            Command::RegisterSubscriber => 3,
            Command::RegisterProcess => 4,
            Command::RegisterService => 5,
            Command::RegisterClient => 6,
            Command::UnregisterPublisher => 12,
            Command::UnregisterSubscriber => 13,
            Command::UnregisterProcess => 14,
            Command::UnregisterService => 15,
            Command::UnregisterClient => 16,
            Command::Unknown(raw) => raw,
        }
    }

    /// Commands whose topic part is subject to locality routing.
    pub const fn is_topic_command(self) -> bool {
        matches!(
            self,
            Command::RegisterPublisher
                | Command::UnregisterPublisher
                | Command::RegisterSubscriber
                | Command::UnregisterSubscriber
        )
    }
}

impl From<Command> for u32 {
    fn from(command: Command) -> Self {
        command.to_raw()
    }
}

/// Topic part of a publisher or subscriber registration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct TopicInfo {
    pub host_name: String,
    pub process_id: i32,
    pub topic_id: String,
    /// Topic name.
    pub entity_name: String,
    pub type_encoding: String,
    pub type_name: String,
    /// Deprecated combined `"encoding:name"` field still sent by older peers.
    pub legacy_type: String,
    pub topic_size: u64,
}

impl TopicInfo {
    /// Identity of the process that registered the topic.
    pub fn origin(&self) -> ProcessIdentity {
        ProcessIdentity::new(self.host_name.clone(), self.process_id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub host_name: String,
    pub process_id: i32,
    pub service_name: String,
    pub service_id: String,
    pub tcp_port: u16,
    pub methods: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ClientInfo {
    pub host_name: String,
    pub process_id: i32,
    pub service_name: String,
    pub client_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub host_name: String,
    pub process_id: i32,
    pub process_name: String,
    pub unit_name: String,
}

/// One discovery message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct RegistrationSample {
    /// Raw wire command, see [`Command::from_raw`].
    pub cmd_type: u32,
    pub topic: TopicInfo,
    pub service: Option<ServiceInfo>,
    pub client: Option<ClientInfo>,
    pub process: Option<ProcessInfo>,
}

impl RegistrationSample {
    pub fn new(command: Command) -> Self {
        Self {
            cmd_type: command.to_raw(),
            ..Self::default()
        }
    }

    /// Publisher or subscriber (un)registration for `topic`.
    pub fn for_topic(command: Command, topic: TopicInfo) -> Self {
        Self {
            cmd_type: command.to_raw(),
            topic,
            ..Self::default()
        }
    }

    pub fn command(&self) -> Command {
        Command::from_raw(self.cmd_type)
    }
}

/// Several samples shipped together over the local broadcast domain.
///
/// Each element is a separately encoded [`RegistrationSample`], so one bad
/// element does not prevent decoding the others.
#[derive(Clone, Debug, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct SampleBatch {
    pub samples: Vec<Vec<u8>>,
}
