//! Event-driven state machine for one uplink connection

use alloc::rc::Rc;
use core::net::IpAddr;

use embassy_time::{Duration, Instant};
use heapless::Vec;
use log::{debug, error, info, warn};

use super::UplinkError;
use super::status::classify_status;
use super::tls::TlsContext;
use super::transport::{
    LookupToken, Resolution, Resolver, Transport, TransportError, TransportEvent,
};
use crate::telemetry::UplinkRequest;

/// Leading response bytes kept for inspection. The rest is acknowledged and
/// dropped.
pub const RESPONSE_PREFIX_LEN: usize = 511;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkState {
    Idle,
    ResolvingName,
    Connecting,
    Sending,
    AwaitingResponse,
    Closing,
    Done(Result<(), UplinkError>),
}

/// One in-flight uplink.
///
/// Owns its transport handle exclusively; the handle is `None` exactly when
/// the connection has been closed. Every external event enters through one of
/// the `on_*` handlers. A close requested inside a handler is carried out
/// once that handler has returned, so teardown never runs underneath a
/// handler that still expects the handle to exist.
pub struct UplinkConnection<T: Transport> {
    handle: Option<T>,
    tls: Option<Rc<TlsContext>>,
    request: UplinkRequest,
    port: u16,
    timeout: Duration,
    state: UplinkState,
    recorded: Option<Result<(), UplinkError>>,
    abort_on_close: bool,
    status: Option<Result<(), UplinkError>>,
    response: Vec<u8, RESPONSE_PREFIX_LEN>,
    response_len: usize,
    lookup: Option<LookupToken>,
    last_progress: Instant,
    in_handler: bool,
}

impl<T: Transport> UplinkConnection<T> {
    pub fn new(
        handle: T,
        tls: Rc<TlsContext>,
        request: UplinkRequest,
        port: u16,
        timeout: Duration,
        now: Instant,
    ) -> Self {
        Self {
            handle: Some(handle),
            tls: Some(tls),
            request,
            port,
            timeout,
            state: UplinkState::Idle,
            recorded: None,
            abort_on_close: false,
            status: None,
            response: Vec::new(),
            response_len: 0,
            lookup: None,
            last_progress: now,
            in_handler: false,
        }
    }

    pub fn state(&self) -> UplinkState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, UplinkState::Done(_))
    }

    /// Final outcome, once `Done`.
    pub fn outcome(&self) -> Option<Result<(), UplinkError>> {
        match self.state {
            UplinkState::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn holds_tls_context(&self) -> bool {
        self.tls.is_some()
    }

    pub fn request(&self) -> &UplinkRequest {
        &self.request
    }

    /// Leading bytes of the response, at most [`RESPONSE_PREFIX_LEN`].
    pub fn response_prefix(&self) -> &[u8] {
        &self.response
    }

    /// Total response bytes received, including the dropped tail.
    pub fn response_len(&self) -> usize {
        self.response_len
    }

    /// Tell the handle the server name, then resolve `host`.
    ///
    /// A cached answer connects immediately through the same path as an
    /// asynchronous one.
    pub fn start<R: Resolver>(&mut self, resolver: &mut R, host: &str, now: Instant) {
        if self.state != UplinkState::Idle {
            warn!("Uplink already started ({:?})", self.state);
            return;
        }
        if !self.begin(now, true) {
            return;
        }

        let sni = match self.handle.as_mut() {
            Some(handle) => handle.set_hostname(host),
            None => Err(TransportError::NotConnected),
        };

        match sni {
            Ok(()) => {
                info!("Resolving {}", host);
                self.state = UplinkState::ResolvingName;
                match resolver.resolve(host) {
                    Resolution::Resolved(addr) => self.connect_to(addr),
                    Resolution::Pending(token) => self.lookup = Some(token),
                    Resolution::Failed => {
                        error!("Error initiating DNS resolving for {}", host);
                        self.request_close(Some(Err(UplinkError::DnsFailure)), false);
                    }
                }
            }
            Err(e) => {
                error!("Failed to set server name {}: {}", host, e);
                self.request_close(Some(Err(UplinkError::ConnectFailure)), false);
            }
        }

        self.end();
    }

    /// Asynchronous answer to the name lookup.
    pub fn on_resolved(&mut self, addr: Option<IpAddr>, now: Instant) {
        if !self.begin(now, true) {
            return;
        }

        if self.state == UplinkState::ResolvingName {
            self.lookup = None;
            match addr {
                Some(addr) => {
                    info!("DNS resolved");
                    self.connect_to(addr);
                }
                None => {
                    error!("Error resolving hostname");
                    self.request_close(Some(Err(UplinkError::DnsFailure)), false);
                }
            }
        }

        self.end();
    }

    /// Connect (and handshake) finished.
    pub fn on_connected(&mut self, result: Result<(), TransportError>, now: Instant) {
        if !self.begin(now, true) {
            return;
        }

        if self.state == UplinkState::Connecting {
            match result {
                Ok(()) => self.send_request(),
                Err(e) => {
                    error!("Uplink connect failed ({})", e);
                    self.request_close(Some(Err(UplinkError::ConnectFailure)), false);
                }
            }
        }

        self.end();
    }

    /// One received fragment.
    pub fn on_data(&mut self, fragment: &[u8], now: Instant) {
        if !self.begin(now, true) {
            return;
        }

        if self.state == UplinkState::AwaitingResponse {
            let room = RESPONSE_PREFIX_LEN - self.response.len();
            let kept = &fragment[..fragment.len().min(room)];
            // Never exceeds capacity, `kept` is clamped to the free room
            let _ = self.response.extend_from_slice(kept);
            self.response_len += fragment.len();

            if self.status.is_none() {
                self.status = classify_status(&self.response);
                if let Some(status) = self.status {
                    debug!("Response status classified as {:?}", status);
                }
            }
        } else {
            debug!("Ignoring {} bytes received in {:?}", fragment.len(), self.state);
        }

        if let Some(handle) = self.handle.as_mut() {
            handle.acknowledge(fragment.len());
        }

        self.end();
    }

    /// The peer closed its side of the stream.
    pub fn on_end_of_stream(&mut self, now: Instant) {
        if !self.begin(now, true) {
            return;
        }

        match self.state {
            UplinkState::AwaitingResponse => {
                info!("Connection closed by server ({} bytes)", self.response_len);
                let outcome = if self.response_len == 0 {
                    None
                } else {
                    Some(self.status.unwrap_or(Err(UplinkError::UnexpectedStatus)))
                };
                self.request_close(outcome, false);
            }
            UplinkState::Idle | UplinkState::ResolvingName | UplinkState::Connecting => {
                warn!("Stream closed before the connection was established");
                self.request_close(Some(Err(UplinkError::ConnectFailure)), false);
            }
            UplinkState::Sending => {
                self.request_close(Some(Err(UplinkError::WriteFailure)), false);
            }
            UplinkState::Closing | UplinkState::Done(_) => {}
        }

        self.end();
    }

    /// Fatal error reported for the handle.
    pub fn on_error(&mut self, err: TransportError, now: Instant) {
        if !self.begin(now, true) {
            return;
        }

        error!("Uplink error ({}) in {:?}", err, self.state);
        let kind = match self.state {
            UplinkState::Sending => UplinkError::WriteFailure,
            UplinkState::AwaitingResponse => UplinkError::ConnectionReset,
            _ => UplinkError::ConnectFailure,
        };
        self.request_close(Some(Err(kind)), false);

        self.end();
    }

    /// Liveness check, called on every pass of the wait loop.
    pub fn on_poll(&mut self, now: Instant) {
        if !self.begin(now, false) {
            return;
        }

        let idle = now.saturating_duration_since(self.last_progress);
        if idle >= self.timeout * 2 {
            warn!("Uplink timed out in {:?} after {} ms", self.state, idle.as_millis());
            self.request_close(Some(Err(UplinkError::Timeout)), true);
        }

        self.end();
    }

    /// Route one transport event to its handler.
    pub fn dispatch(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Connected(result) => self.on_connected(result, now),
            TransportEvent::Data(fragment) => self.on_data(&fragment, now),
            TransportEvent::EndOfStream => self.on_end_of_stream(now),
            TransportEvent::Error(err) => self.on_error(err, now),
        }
    }

    /// Deliver everything that is ready: the lookup answer, queued transport
    /// events, then the liveness check.
    pub fn service<R: Resolver>(&mut self, resolver: &mut R, now: Instant) {
        if let Some(token) = self.lookup {
            match resolver.poll_lookup(token) {
                Resolution::Resolved(addr) => self.on_resolved(Some(addr), now),
                Resolution::Failed => self.on_resolved(None, now),
                Resolution::Pending(_) => {}
            }
        }

        while !self.is_complete() {
            let Some(event) = self.handle.as_mut().and_then(|h| h.next_event()) else {
                break;
            };
            self.dispatch(event, now);
        }

        self.on_poll(now);
    }

    /// Force a timeout teardown. Used when the caller's own wait budget runs
    /// out before the connection finished.
    pub fn expire(&mut self, now: Instant) {
        if !self.begin(now, false) {
            return;
        }
        self.request_close(Some(Err(UplinkError::Timeout)), true);
        self.end();
    }

    fn connect_to(&mut self, addr: IpAddr) {
        info!("Connecting to {} port {} (TLS)", addr, self.port);
        self.state = UplinkState::Connecting;

        let result = match self.handle.as_mut() {
            Some(handle) => handle.connect(addr, self.port),
            None => Err(TransportError::NotConnected),
        };

        if let Err(e) = result {
            error!("Error initiating connect: {}", e);
            self.request_close(Some(Err(UplinkError::ConnectFailure)), false);
        }
    }

    fn send_request(&mut self) {
        info!("TLS connected, sending POST request ({} bytes)", self.request.len());
        self.state = UplinkState::Sending;

        let result = match self.handle.as_mut() {
            Some(handle) => handle.write(self.request.as_bytes()),
            None => Err(TransportError::NotConnected),
        };

        match result {
            Ok(()) => {
                info!("POST request sent");
                self.state = UplinkState::AwaitingResponse;
            }
            Err(e) => {
                error!("Error writing request: {}", e);
                self.request_close(Some(Err(UplinkError::WriteFailure)), false);
            }
        }
    }

    /// Record the outcome and move to `Closing`. The first request wins.
    fn request_close(&mut self, outcome: Option<Result<(), UplinkError>>, abort: bool) {
        if matches!(self.state, UplinkState::Closing | UplinkState::Done(_)) {
            return;
        }

        self.recorded = outcome;
        self.abort_on_close = abort;
        self.state = UplinkState::Closing;

        if !self.in_handler {
            self.finish_close();
        }
    }

    fn finish_close(&mut self) {
        let closed_cleanly = match self.handle.take() {
            Some(mut handle) => {
                handle.detach();
                if self.abort_on_close {
                    handle.abort();
                    true
                } else {
                    match handle.close() {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("Close failed ({}), aborting", e);
                            handle.abort();
                            false
                        }
                    }
                }
            }
            None => true,
        };

        let outcome = match self.recorded {
            Some(outcome) => outcome,
            None if closed_cleanly => Ok(()),
            None => Err(UplinkError::ConnectionReset),
        };

        self.lookup = None;
        self.tls = None;
        self.state = UplinkState::Done(outcome);

        match outcome {
            Ok(()) => info!("Uplink to feed {} succeeded", self.request.feed_key()),
            Err(e) => warn!("Uplink to feed {} failed: {}", self.request.feed_key(), e),
        }
    }

    fn begin(&mut self, now: Instant, progress: bool) -> bool {
        if self.is_complete() {
            return false;
        }
        self.in_handler = true;
        if progress {
            self.last_progress = now;
        }
        true
    }

    fn end(&mut self) {
        self.in_handler = false;
        if self.state == UplinkState::Closing {
            self.finish_close();
        }
    }
}

impl<T: Transport> Drop for UplinkConnection<T> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            warn!(
                "Uplink to feed {} dropped in state {:?}, aborting",
                self.request.feed_key(),
                self.state
            );
            handle.detach();
            handle.abort();
        }
    }
}
