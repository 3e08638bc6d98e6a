//! UDP/TCP data plane for discovered services.
//!
//! Once a service has been resolved (client side) or registered with a
//! bound socket (server side), the actual payload exchange happens over
//! a plain UDP socket or TCP connection owned by the service handle.
//! This crate provides that socket layer: bind/listen, connect,
//! readiness polling, and blocking read/write. Service discovery itself
//! lives in `lanlink-discovery`.

pub mod error;
pub mod tcp;
pub mod udp;

pub use error::DataChannelError;
pub use tcp::TcpChannel;
pub use udp::UdpChannel;

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Timeout for outbound TCP connection attempts.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for accepting an inbound connection during a blocking read.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for an inbound connection.
pub(crate) const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Smallest read timeout handed to the OS; zero would mean "block forever".
pub(crate) const MIN_IO_TIMEOUT: Duration = Duration::from_millis(1);

/// Channel transport, mirroring the `._udp`/`._tcp` service type suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// A bound or connected data channel of either transport.
///
/// The variant a service handle carries is fixed by the service type's
/// transport suffix; the enum exists so registration can accept a
/// pre-bound channel of either kind.
pub enum Channel {
    Udp(UdpChannel),
    Tcp(TcpChannel),
}

impl Channel {
    pub fn transport(&self) -> Transport {
        match self {
            Channel::Udp(_) => Transport::Udp,
            Channel::Tcp(_) => Transport::Tcp,
        }
    }

    /// Returns the locally bound port, if any.
    pub fn local_port(&self) -> Option<u16> {
        match self {
            Channel::Udp(udp) => udp.local_port(),
            Channel::Tcp(tcp) => tcp.local_port(),
        }
    }

    /// True once a peer is set (UDP) or a stream is established (TCP).
    pub fn is_connected(&self) -> bool {
        match self {
            Channel::Udp(udp) => udp.is_connected(),
            Channel::Tcp(tcp) => tcp.is_connected(),
        }
    }

    /// Connects to `host:port`; for UDP this just fixes the peer address.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), DataChannelError> {
        match self {
            Channel::Udp(udp) => udp.connect(host, port),
            Channel::Tcp(tcp) => tcp.connect(host, port, CONNECT_TIMEOUT),
        }
    }

    /// Waits up to `timeout` for the channel to become ready.
    pub fn wait_until_ready(
        &mut self,
        for_reading: bool,
        timeout: Duration,
    ) -> Result<bool, DataChannelError> {
        match self {
            Channel::Udp(udp) => udp.wait_until_ready(for_reading, timeout),
            Channel::Tcp(tcp) => tcp.wait_until_ready(for_reading, timeout),
        }
    }

    /// Reads payload data: one datagram for UDP, stream bytes for TCP.
    pub fn read(&mut self, buf: &mut [u8], block_until_full: bool) -> Result<usize, DataChannelError> {
        match self {
            // A datagram arrives whole; there is nothing more to wait for.
            Channel::Udp(udp) => udp.recv(buf),
            Channel::Tcp(tcp) => tcp.read(buf, block_until_full),
        }
    }

    /// Writes payload data to the connected peer.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, DataChannelError> {
        match self {
            Channel::Udp(udp) => udp.send(buf),
            Channel::Tcp(tcp) => tcp.write(buf),
        }
    }
}

/// Resolves `host:port` to a socket address, preferring IPv4.
///
/// Tolerates the trailing dot of daemon-reported host targets
/// (`machine.local.`).
pub(crate) fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, DataChannelError> {
    let host = host.trim_end_matches('.');
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    addrs
        .iter()
        .copied()
        .find(SocketAddr::is_ipv4)
        .or_else(|| addrs.first().copied())
        .ok_or_else(|| DataChannelError::Resolve(format!("{host}:{port}")))
}
