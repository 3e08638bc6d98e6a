//! DNS-SD service discovery, registration and resolution client.
//!
//! Sits above an external multicast-DNS daemon, consumed through the
//! [`daemon`] traits: the daemon owns the wire protocol; this crate
//! owns the session lifecycle. A [`Service`] starts browse, resolve and
//! register calls against the daemon, pumps the daemon's event loop on
//! a background worker thread, translates reply callbacks into the
//! public async callback API, and carries the post-resolve data plane
//! over UDP or TCP (see `lanlink-data-channel`).
//!
//! Operation callbacks are invoked on the pump's worker thread — treat
//! them as running on an arbitrary background thread.

pub mod daemon;
pub mod error;
mod pump;
pub mod service;
pub mod txt;
pub mod types;

pub use error::{DaemonFault, DiscoveryError, StatusCode, check_status};
pub use service::{OperationResult, Service};
pub use txt::TxtRecord;
pub use types::{
    INTERFACE_ANY, MAX_TXT_KEY_LEN, MAX_TXT_RECORD_LEN, MAX_TXT_VALUE_LEN, ResolvedEndpoint,
    TxtItem, transport_of,
};

// The data plane types a service handle hands out and accepts.
pub use lanlink_data_channel::{Channel, TcpChannel, Transport, UdpChannel};
