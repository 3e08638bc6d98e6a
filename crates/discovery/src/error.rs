//! Error taxonomy and the daemon status-code mapper.

use std::fmt;

use lanlink_data_channel::DataChannelError;

/// Raw status code as reported by the DNS-SD daemon
/// (`DNSServiceErrorType`).
pub type StatusCode = i32;

/// The daemon's "no error" status.
pub const STATUS_OK: StatusCode = 0;

/// Categories of daemon-reported failures (`kDNSServiceErr_*`).
///
/// Unrecognized codes map to [`DaemonFault::Unhandled`]; an unknown
/// nonzero status never counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonFault {
    Unknown,
    NoSuchName,
    NoMemory,
    BadParam,
    BadReference,
    BadState,
    BadFlags,
    Unsupported,
    NotInitialized,
    AlreadyRegistered,
    NameConflict,
    Invalid,
    Firewall,
    Incompatible,
    BadInterfaceIndex,
    Refused,
    NoSuchRecord,
    NoAuth,
    NoSuchKey,
    NatTraversal,
    DoubleNat,
    BadTime,
    BadSig,
    BadKey,
    Transient,
    ServiceNotRunning,
    NatPortMappingUnsupported,
    NatPortMappingDisabled,
    NoRouter,
    PollingMode,
    Timeout,
    Unhandled,
}

impl DaemonFault {
    /// Maps a raw daemon status code; `None` means success.
    pub fn from_status(code: StatusCode) -> Option<Self> {
        Some(match code {
            STATUS_OK => return None,
            -65537 => Self::Unknown,
            -65538 => Self::NoSuchName,
            -65539 => Self::NoMemory,
            -65540 => Self::BadParam,
            -65541 => Self::BadReference,
            -65542 => Self::BadState,
            -65543 => Self::BadFlags,
            -65544 => Self::Unsupported,
            -65545 => Self::NotInitialized,
            -65547 => Self::AlreadyRegistered,
            -65548 => Self::NameConflict,
            -65549 => Self::Invalid,
            -65550 => Self::Firewall,
            -65551 => Self::Incompatible,
            -65552 => Self::BadInterfaceIndex,
            -65553 => Self::Refused,
            -65554 => Self::NoSuchRecord,
            -65555 => Self::NoAuth,
            -65556 => Self::NoSuchKey,
            -65557 => Self::NatTraversal,
            -65558 => Self::DoubleNat,
            -65559 => Self::BadTime,
            -65560 => Self::BadSig,
            -65561 => Self::BadKey,
            -65562 => Self::Transient,
            -65563 => Self::ServiceNotRunning,
            -65564 => Self::NatPortMappingUnsupported,
            -65565 => Self::NatPortMappingDisabled,
            -65566 => Self::NoRouter,
            -65567 => Self::PollingMode,
            -65568 => Self::Timeout,
            _ => Self::Unhandled,
        })
    }

    /// Human-readable description matching the daemon's documentation.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::NoSuchName => "no such name",
            Self::NoMemory => "no memory",
            Self::BadParam => "bad parameter",
            Self::BadReference => "bad reference",
            Self::BadState => "bad state",
            Self::BadFlags => "bad flags",
            Self::Unsupported => "unsupported",
            Self::NotInitialized => "not initialized",
            Self::AlreadyRegistered => "already registered",
            Self::NameConflict => "name conflict",
            Self::Invalid => "invalid",
            Self::Firewall => "firewall",
            Self::Incompatible => "client library incompatible with daemon",
            Self::BadInterfaceIndex => "bad interface index",
            Self::Refused => "refused",
            Self::NoSuchRecord => "no such record",
            Self::NoAuth => "no auth",
            Self::NoSuchKey => "no such key",
            Self::NatTraversal => "NAT traversal",
            Self::DoubleNat => "double NAT",
            Self::BadTime => "bad time",
            Self::BadSig => "bad signature",
            Self::BadKey => "bad key",
            Self::Transient => "transient",
            Self::ServiceNotRunning => "background daemon not running",
            Self::NatPortMappingUnsupported => "NAT doesn't support PCP, NAT-PMP or UPnP",
            Self::NatPortMappingDisabled => "NAT port mapping disabled by the administrator",
            Self::NoRouter => "no router currently configured",
            Self::PollingMode => "polling mode",
            Self::Timeout => "timeout",
            Self::Unhandled => "unhandled",
        }
    }
}

impl fmt::Display for DaemonFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Converts a daemon status code into a result.
pub fn check_status(code: StatusCode) -> Result<(), DiscoveryError> {
    match DaemonFault::from_status(code) {
        None => Ok(()),
        Some(fault) => Err(DiscoveryError::Daemon(fault)),
    }
}

/// Builds the error for a status the daemon reported as an immediate
/// (synchronous) failure. A zero status on the failure path still maps
/// to a fault.
pub(crate) fn status_error(code: StatusCode) -> DiscoveryError {
    DiscoveryError::Daemon(DaemonFault::from_status(code).unwrap_or(DaemonFault::Unhandled))
}

/// Errors for discovery, registration, resolution and the data plane.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("daemon error: {0}")]
    Daemon(DaemonFault),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index {index} out of range for record with {len} items")]
    OutOfRange { index: usize, len: usize },

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("data channel error: {0}")]
    Channel(#[from] DataChannelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
