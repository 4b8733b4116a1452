//! UDP ingestion of single registration samples.
//!
//! In network mode the socket joins the registration multicast group. Without
//! network mode it listens on the local broadcast address instead, which keeps
//! host-local traffic away from VPNs and firewalls.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use log::debug;
use socket2::{Domain, Protocol, Socket, Type};

use crate::codec::decode_sample;
use crate::config::Config;
use crate::sample::RegistrationSample;
use crate::{RegistrationError, RegistrationResult};

const MAX_DATAGRAM: usize = 64 * 1024;

/// Read timeout that lets the receive loop notice shutdown.
pub const RECEIVE_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkAttr {
    /// Multicast group, or the broadcast address when `broadcast` is set.
    pub address: Ipv4Addr,
    pub port: u16,
    pub broadcast: bool,
    /// Receive our own multicast traffic.
    pub loopback: bool,
    pub receive_buffer: usize,
}

impl NetworkAttr {
    pub fn from_config(config: &Config) -> Self {
        let broadcast = !config.network_enabled;
        Self {
            address: if broadcast {
                config.multicast.broadcast_address
            } else {
                config.multicast.group
            },
            port: config.multicast.registration_port(),
            broadcast,
            loopback: true,
            receive_buffer: config.multicast.receive_buffer,
        }
    }
}

/// Datagram endpoint yielding one decoded sample per datagram.
pub struct RegistrationTransportNetwork {
    socket: UdpSocket,
    buf: Vec<u8>,
}

impl RegistrationTransportNetwork {
    pub fn create(attr: &NetworkAttr) -> RegistrationResult<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|err| RegistrationError::io("create registration socket", err))?;
        socket
            .set_reuse_address(true)
            .map_err(|err| RegistrationError::io("set SO_REUSEADDR", err))?;
        #[cfg(unix)]
        socket
            .set_reuse_port(true)
            .map_err(|err| RegistrationError::io("set SO_REUSEPORT", err))?;
        if let Err(err) = socket.set_recv_buffer_size(attr.receive_buffer) {
            debug!("receive buffer of {} bytes refused: {err}", attr.receive_buffer);
        }

        let bind = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, attr.port);
        socket
            .bind(&bind.into())
            .map_err(|err| RegistrationError::io(format!("bind {bind}"), err))?;

        if attr.broadcast {
            socket
                .set_broadcast(true)
                .map_err(|err| RegistrationError::io("enable broadcast", err))?;
        } else {
            socket
                .join_multicast_v4(&attr.address, &Ipv4Addr::UNSPECIFIED)
                .map_err(|err| RegistrationError::io(format!("join {}", attr.address), err))?;
            socket
                .set_multicast_loop_v4(attr.loopback)
                .map_err(|err| RegistrationError::io("set multicast loop", err))?;
        }
        socket
            .set_read_timeout(Some(RECEIVE_POLL))
            .map_err(|err| RegistrationError::io("set read timeout", err))?;

        debug!(
            "registration socket on {bind} ({} {})",
            if attr.broadcast { "broadcast" } else { "multicast" },
            attr.address
        );
        Ok(Self {
            socket: socket.into(),
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> RegistrationResult<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|err| RegistrationError::io("query local address", err))
    }

    /// Waits up to [`RECEIVE_POLL`] for one datagram and decodes it.
    pub fn receive(&mut self) -> RegistrationResult<Option<RegistrationSample>> {
        let len = match self.socket.recv(&mut self.buf) {
            Ok(len) => len,
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(None)
            }
            Err(err) => return Err(RegistrationError::io("receive registration datagram", err)),
        };
        decode_sample(&self.buf[..len]).map(Some)
    }
}
