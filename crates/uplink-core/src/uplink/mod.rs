//! Encrypted HTTP uplink to the remote collector
//!
//! One [`UplinkConnection`] drives exactly one transport handle from name
//! resolution to teardown. The network stack is reached only through the
//! [`Transport`], [`Resolver`] and [`Connector`] traits so the state machine
//! runs unchanged on the device, in the simulator and under test.

mod client;
mod connection;
mod status;
mod tls;
mod transport;

use thiserror_no_std::Error;

pub use client::UplinkClient;
pub use connection::{RESPONSE_PREFIX_LEN, UplinkConnection, UplinkState};
pub use status::{STATUS_LINE_LEN, classify_status, status_code};
pub use tls::{TlsContext, TlsContextProvider, TlsReusePolicy, TrustAnchors};
pub use transport::{
    Connector, LookupToken, Resolution, Resolver, Transport, TransportError, TransportEvent,
};

/// Failure outcome of one uplink. Success is `Ok(())`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkError {
    #[error("name resolution failed")]
    DnsFailure,
    #[error("could not establish the encrypted connection")]
    ConnectFailure,
    #[error("writing the request failed")]
    WriteFailure,
    #[error("no progress within the liveness window")]
    Timeout,
    #[error("collector rejected the API key (401)")]
    AuthFailure,
    #[error("feed not found (404)")]
    NotFound,
    #[error("unexpected response status")]
    UnexpectedStatus,
    #[error("request does not fit the request buffer")]
    RequestTooLarge,
    #[error("connection reset while awaiting the response")]
    ConnectionReset,
}
