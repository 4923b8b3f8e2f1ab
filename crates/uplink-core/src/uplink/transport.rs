use alloc::vec::Vec;
use core::net::IpAddr;

use thiserror_no_std::Error;

use super::tls::TlsContext;

/// Error reported by the network stack for a transport handle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Timeout")]
    Timeout,
    #[error("Routing problem")]
    Routing,
    #[error("Not connected")]
    NotConnected,
    #[error("Connection aborted")]
    Aborted,
    #[error("Connection reset")]
    Reset,
    #[error("Connection closed")]
    Closed,
    #[error("Unknown")]
    Other,
}

/// Event delivered by the network stack for one transport handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Outcome of the encrypted connect, including the handshake
    Connected(Result<(), TransportError>),
    /// One received fragment; must be acknowledged once consumed
    Data(Vec<u8>),
    /// The peer closed its side
    EndOfStream,
    /// Fatal error on the handle
    Error(TransportError),
}

/// An encrypted stream handle owned by exactly one connection.
///
/// Events are routed to the owning connection through [`Transport::next_event`]
/// until [`Transport::detach`] is called. After `close` or `abort` the handle
/// must not be used again.
pub trait Transport {
    /// Server name presented during the handshake.
    fn set_hostname(&mut self, host: &str) -> Result<(), TransportError>;

    /// Start connecting. Completion arrives as [`TransportEvent::Connected`].
    fn connect(&mut self, addr: IpAddr, port: u16) -> Result<(), TransportError>;

    /// Queue `data` for sending. The bytes are copied, the caller keeps its buffer.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Tell the stack that `len` received bytes were consumed.
    fn acknowledge(&mut self, len: usize);

    /// Next pending event, if any.
    fn next_event(&mut self) -> Option<TransportEvent>;

    /// Stop routing events to the owner.
    fn detach(&mut self);

    /// Graceful close.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Hard abort. Never fails.
    fn abort(&mut self);
}

/// Identifies an outstanding asynchronous name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupToken(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved(IpAddr),
    Pending(LookupToken),
    Failed,
}

/// Name resolution service.
pub trait Resolver {
    /// Answer from cache, fail immediately, or start an asynchronous lookup.
    fn resolve(&mut self, host: &str) -> Resolution;

    /// Check an outstanding lookup. Returns `Pending` until it settles.
    fn poll_lookup(&mut self, token: LookupToken) -> Resolution;
}

/// Allocates transport handles bound to a TLS context.
pub trait Connector {
    type Transport: Transport;

    /// `None` when the stack is out of handles.
    fn open(&mut self, tls: &TlsContext) -> Option<Self::Transport>;
}
