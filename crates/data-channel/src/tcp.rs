//! TCP data channel — listener/stream plumbing for `._tcp` services.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::DataChannelError;
use crate::{ACCEPT_POLL_INTERVAL, ACCEPT_TIMEOUT, MIN_IO_TIMEOUT, resolve_addr};

/// A TCP data channel, either listening (registered side) or outbound
/// (resolving side).
///
/// The listening side accepts the next inbound connection lazily, on
/// the first read; the outbound side connects lazily when the owning
/// service first writes.
pub struct TcpChannel {
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
}

impl TcpChannel {
    /// Binds a listening channel on `port` (0 for ephemeral).
    pub fn listen(port: u16) -> Result<Self, DataChannelError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| DataChannelError::Bind(format!("TCP port {port}: {e}")))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| DataChannelError::Bind(format!("TCP port {port}: {e}")))?;
        socket
            .bind(&addr.into())
            .map_err(|e| DataChannelError::Bind(format!("TCP port {port}: {e}")))?;
        socket
            .listen(8)
            .map_err(|e| DataChannelError::Bind(format!("TCP port {port}: {e}")))?;

        let listener: TcpListener = socket.into();
        // Accepts are polled against a deadline rather than blocking.
        listener.set_nonblocking(true)?;

        if let Ok(addr) = listener.local_addr() {
            debug!(port = addr.port(), "TCP channel listening");
        }
        Ok(Self {
            listener: Some(listener),
            stream: None,
        })
    }

    /// Creates an unbound channel for an outbound connection.
    pub fn outbound() -> Self {
        Self {
            listener: None,
            stream: None,
        }
    }

    /// Connects to `host:port` within `timeout`.
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), DataChannelError> {
        let addr = resolve_addr(host, port)?;
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            if e.kind() == ErrorKind::TimedOut {
                DataChannelError::Timeout
            } else {
                e.into()
            }
        })?;
        stream.set_nodelay(true)?;
        debug!(%addr, "TCP channel connected");
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Returns the listener's port, or the connected stream's local port.
    pub fn local_port(&self) -> Option<u16> {
        if let Some(listener) = &self.listener {
            return listener.local_addr().ok().map(|a| a.port());
        }
        self.stream
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .map(|a| a.port())
    }

    /// Accepts the next pending connection, polling until `timeout`.
    ///
    /// Returns `Ok(false)` when nothing connected in time.
    fn accept_next(&mut self, timeout: Duration) -> Result<bool, DataChannelError> {
        let Some(listener) = &self.listener else {
            return Err(DataChannelError::NotConnected);
        };
        let deadline = Instant::now() + timeout;
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    debug!(%addr, "TCP channel accepted connection");
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    self.stream = Some(stream);
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Waits up to `timeout` for the channel to become ready.
    ///
    /// Reading on a listening channel first waits for a connection to
    /// accept; readiness then means buffered data (or EOF) is available.
    /// Writing is ready as soon as a stream is established.
    pub fn wait_until_ready(
        &mut self,
        for_reading: bool,
        timeout: Duration,
    ) -> Result<bool, DataChannelError> {
        if !for_reading {
            return Ok(self.stream.is_some());
        }

        if self.stream.is_none() && self.listener.is_some() && !self.accept_next(timeout)? {
            return Ok(false);
        }
        let Some(stream) = &self.stream else {
            return Err(DataChannelError::NotConnected);
        };

        stream.set_read_timeout(Some(timeout.max(MIN_IO_TIMEOUT)))?;
        let mut probe = [0u8; 1];
        match stream.peek(&mut probe) {
            // 0 bytes peeked = orderly shutdown; a read would not block.
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads from the connected stream, accepting the next pending
    /// connection first when listening.
    ///
    /// With `block_until_full` the read loops until `buf` is filled.
    pub fn read(&mut self, buf: &mut [u8], block_until_full: bool) -> Result<usize, DataChannelError> {
        if self.stream.is_none() && self.listener.is_some() && !self.accept_next(ACCEPT_TIMEOUT)? {
            return Err(DataChannelError::Timeout);
        }
        let Some(stream) = &mut self.stream else {
            return Err(DataChannelError::NotConnected);
        };

        stream.set_read_timeout(None)?;
        if block_until_full {
            stream.read_exact(buf)?;
            Ok(buf.len())
        } else {
            Ok(stream.read(buf)?)
        }
    }

    /// Writes the whole buffer to the connected stream.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, DataChannelError> {
        let Some(stream) = &mut self.stream else {
            return Err(DataChannelError::NotConnected);
        };
        stream.write_all(buf)?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_ephemeral_reports_port() {
        let channel = TcpChannel::listen(0).unwrap();
        assert!(channel.is_listening());
        assert!(channel.local_port().unwrap() > 0);
    }

    #[test]
    fn write_without_stream_fails() {
        let mut channel = TcpChannel::outbound();
        assert!(matches!(
            channel.write(b"hi"),
            Err(DataChannelError::NotConnected)
        ));
    }

    #[test]
    fn read_without_listener_or_stream_fails() {
        let mut channel = TcpChannel::outbound();
        let mut buf = [0u8; 4];
        assert!(matches!(
            channel.read(&mut buf, false),
            Err(DataChannelError::NotConnected)
        ));
    }

    #[test]
    fn connect_write_accept_read() {
        let mut server = TcpChannel::listen(0).unwrap();
        let port = server.local_port().unwrap();

        let mut client = TcpChannel::outbound();
        client
            .connect("127.0.0.1", port, Duration::from_secs(2))
            .unwrap();
        assert!(client.is_connected());
        assert_eq!(client.write(b"hello").unwrap(), 5);

        // Read accepts the pending connection first.
        let mut buf = [0u8; 5];
        let n = server.read(&mut buf, true).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn wait_for_reading_accepts_then_sees_data() {
        let mut server = TcpChannel::listen(0).unwrap();
        let port = server.local_port().unwrap();

        let mut client = TcpChannel::outbound();
        client
            .connect("127.0.0.1", port, Duration::from_secs(2))
            .unwrap();
        client.write(b"x").unwrap();

        assert!(server
            .wait_until_ready(true, Duration::from_secs(2))
            .unwrap());
        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf, true).unwrap(), 1);
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn wait_for_reading_times_out_without_connection() {
        let mut server = TcpChannel::listen(0).unwrap();
        let ready = server
            .wait_until_ready(true, Duration::from_millis(50))
            .unwrap();
        assert!(!ready);
    }

    #[test]
    fn not_ready_for_writing_until_connected() {
        let mut client = TcpChannel::outbound();
        assert!(!client
            .wait_until_ready(false, Duration::from_millis(1))
            .unwrap());

        let server = TcpChannel::listen(0).unwrap();
        let port = server.local_port().unwrap();
        client
            .connect("127.0.0.1", port, Duration::from_secs(2))
            .unwrap();
        assert!(client
            .wait_until_ready(false, Duration::from_millis(1))
            .unwrap());
    }

    #[test]
    fn partial_read_returns_available_bytes() {
        let mut server = TcpChannel::listen(0).unwrap();
        let port = server.local_port().unwrap();

        let mut client = TcpChannel::outbound();
        client
            .connect("127.0.0.1", port, Duration::from_secs(2))
            .unwrap();
        client.write(b"abc").unwrap();

        assert!(server
            .wait_until_ready(true, Duration::from_secs(2))
            .unwrap());
        let mut buf = [0u8; 16];
        let n = server.read(&mut buf, false).unwrap();
        assert!(n >= 1 && n <= 3);
        assert_eq!(&buf[..3.min(n)], &b"abc"[..3.min(n)]);
    }
}
