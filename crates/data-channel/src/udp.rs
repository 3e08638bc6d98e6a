//! UDP data channel — datagram exchange for `._udp` services.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::debug;

use crate::error::DataChannelError;
use crate::{MIN_IO_TIMEOUT, resolve_addr};

/// A bound UDP socket with an optional default peer.
///
/// The registered side binds the advertised port and receives datagrams;
/// the resolving side binds an ephemeral port and sends to the resolved
/// endpoint.
pub struct UdpChannel {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl UdpChannel {
    /// Binds to `port` on all interfaces (0 for ephemeral).
    pub fn bind(port: u16) -> Result<Self, DataChannelError> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .map_err(|e| DataChannelError::Bind(format!("UDP port {port}: {e}")))?;
        if let Ok(addr) = socket.local_addr() {
            debug!(port = addr.port(), "UDP channel bound");
        }
        Ok(Self { socket, peer: None })
    }

    pub fn local_port(&self) -> Option<u16> {
        self.socket.local_addr().ok().map(|a| a.port())
    }

    /// Fixes the peer address for subsequent [`send`](Self::send) calls.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), DataChannelError> {
        self.peer = Some(resolve_addr(host, port)?);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    /// Sends one datagram to the default peer.
    pub fn send(&self, buf: &[u8]) -> Result<usize, DataChannelError> {
        let peer = self.peer.ok_or(DataChannelError::NotConnected)?;
        Ok(self.socket.send_to(buf, peer)?)
    }

    /// Receives a single datagram, blocking until one arrives.
    ///
    /// A datagram larger than `buf` is truncated by the OS; size the
    /// buffer for the expected payload.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, DataChannelError> {
        self.socket.set_read_timeout(None)?;
        let (n, _from) = self.socket.recv_from(buf)?;
        Ok(n)
    }

    /// Waits up to `timeout` for a datagram (reading) or returns
    /// immediately (writing — an unconnected datagram socket is always
    /// writable).
    pub fn wait_until_ready(
        &self,
        for_reading: bool,
        timeout: Duration,
    ) -> Result<bool, DataChannelError> {
        if !for_reading {
            return Ok(true);
        }
        self.socket.set_read_timeout(Some(timeout.max(MIN_IO_TIMEOUT)))?;
        let mut probe = [0u8; 1];
        match self.socket.peek_from(&mut probe) {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
