//! Interface to the external DNS-SD daemon.
//!
//! The daemon owns the multicast-DNS wire protocol; this crate only
//! starts operations, drives the daemon's event loop and consumes its
//! reply callbacks. An implementation wraps a platform daemon
//! connection (Bonjour/Avahi over the dnssd socket); tests substitute
//! an in-memory daemon.

use std::io;
use std::time::Duration;

use crate::error::StatusCode;

/// Flags attached to each browse reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyFlags {
    /// Service appeared (`true`) or went away (`false`).
    pub added: bool,
    /// More replies for the same network event batch are pending;
    /// callers coalesce until this goes false.
    pub more_coming: bool,
}

/// One browse reply from the daemon.
#[derive(Debug, Clone)]
pub struct BrowseEvent {
    pub flags: ReplyFlags,
    pub interface_index: u32,
    pub status: StatusCode,
    pub name: String,
    pub regtype: String,
    pub domain: String,
}

/// One resolve reply from the daemon.
#[derive(Debug, Clone)]
pub struct ResolveEvent {
    pub status: StatusCode,
    pub interface_index: u32,
    pub host_target: String,
    /// Port in network byte order, as the daemon reports it.
    pub port_be: u16,
    /// Raw TXT wire bytes; only valid to borrow during the callback.
    pub txt: Vec<u8>,
}

/// One register reply from the daemon.
///
/// Name, type and domain are the daemon-authoritative values, which may
/// differ from what was requested (defaulted domain, uniquified name).
#[derive(Debug, Clone)]
pub struct RegisterEvent {
    pub status: StatusCode,
    pub name: String,
    pub regtype: String,
    pub domain: String,
}

pub type BrowseReply = Box<dyn FnMut(BrowseEvent) + Send>;
pub type ResolveReply = Box<dyn FnMut(ResolveEvent) + Send>;
pub type RegisterReply = Box<dyn FnMut(RegisterEvent) + Send>;

/// One live daemon connection, backing a single outstanding operation.
///
/// Dropping the connection releases the daemon handle. The event pump
/// guarantees the drop happens on its worker thread, strictly after the
/// last possible reply callback.
pub trait DaemonConnection: Send {
    /// Waits up to `timeout` for the connection's socket to become
    /// readable.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Processes one pending result, synchronously triggering at most
    /// one reply callback on the calling thread.
    fn process_result(&mut self);
}

/// Capability set consumed from the external discovery daemon.
///
/// Each operation either hands back the connection whose socket drives
/// the replies, or fails immediately with the daemon's status code.
pub trait Daemon: Send + Sync {
    /// Starts browsing for all instances of `regtype`.
    ///
    /// `domain` of `None` browses the daemon's default domain(s);
    /// `interface_index` 0 browses every interface.
    fn browse(
        &self,
        interface_index: u32,
        regtype: &str,
        domain: Option<&str>,
        reply: BrowseReply,
    ) -> Result<Box<dyn DaemonConnection>, StatusCode>;

    /// Resolves one named service instance to host/port/TXT.
    fn resolve(
        &self,
        interface_index: u32,
        name: &str,
        regtype: &str,
        domain: &str,
        reply: ResolveReply,
    ) -> Result<Box<dyn DaemonConnection>, StatusCode>;

    /// Registers a service advertisement.
    ///
    /// `name`/`domain` of `None` let the daemon pick defaults. `port`
    /// is in host byte order; the caller must already have a listening
    /// socket bound to it — the daemon advertises, it does not bind.
    fn register(
        &self,
        name: Option<&str>,
        regtype: &str,
        domain: Option<&str>,
        port: u16,
        txt: &[u8],
        reply: RegisterReply,
    ) -> Result<Box<dyn DaemonConnection>, StatusCode>;
}
