//! Core identity and endpoint types.

use lanlink_data_channel::Transport;
use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;

/// Interface index meaning "all interfaces" in browse calls.
pub const INTERFACE_ANY: u32 = 0;

/// Maximum TXT key length in bytes (DNS-SD convention).
pub const MAX_TXT_KEY_LEN: usize = 9;

/// Maximum TXT value length in bytes.
pub const MAX_TXT_VALUE_LEN: usize = 255;

/// Maximum encoded size of a whole TXT record in bytes (DNS rdata
/// length limit).
pub const MAX_TXT_RECORD_LEN: usize = u16::MAX as usize;

/// One key/value entry of a service's TXT record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxtItem {
    pub key: String,
    pub value: String,
}

impl TxtItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Host and port a service resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEndpoint {
    pub interface_index: u32,
    pub host: String,
    /// Port in host byte order.
    pub port: u16,
}

/// Returns the transport indicated by a service type's `._udp`/`._tcp`
/// suffix, or `None` for untyped/malformed types.
///
/// Tolerates the trailing-dot forms the daemon reports in browse
/// replies (`_test._tcp.` and `_test._tcp.local.`).
pub fn transport_of(service_type: &str) -> Option<Transport> {
    let ty = service_type.trim_end_matches('.');
    let ty = ty.strip_suffix(".local").unwrap_or(ty);
    if ty.ends_with("._udp") {
        Some(Transport::Udp)
    } else if ty.ends_with("._tcp") {
        Some(Transport::Tcp)
    } else {
        None
    }
}

/// Validates a caller-supplied service type.
pub(crate) fn validate_service_type(service_type: &str) -> Result<(), DiscoveryError> {
    if !service_type.starts_with('_') {
        return Err(DiscoveryError::InvalidArgument(format!(
            "service type must start with '_': {service_type:?}"
        )));
    }
    if transport_of(service_type).is_none() {
        return Err(DiscoveryError::InvalidArgument(format!(
            "service type must carry a '._udp' or '._tcp' suffix: {service_type:?}"
        )));
    }
    Ok(())
}
