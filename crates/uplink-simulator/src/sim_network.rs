//! Simulated network stack and collector on a virtual clock.
//!
//! Everything the uplink needs from the platform is provided here: a
//! scheduler whose sleeps jump the clock to the next pending event, a
//! resolver with a cache and a lookup delay, a connector with a bounded
//! handle pool, and a fake collector that answers the feed API.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;

use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use log::{debug, info, trace, warn};

use uplink_core::scheduler::Scheduler;
use uplink_core::uplink::{
    Connector, LookupToken, Resolution, Resolver, TlsContext, Transport, TransportError,
    TransportEvent,
};

/// Address every lookup resolves to (TEST-NET-3)
const COLLECTOR_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10));

const DNS_LATENCY: Duration = Duration::from_millis(35);
const HANDSHAKE_LATENCY: Duration = Duration::from_millis(120);
const RESPONSE_LATENCY: Duration = Duration::from_millis(80);
const FRAGMENT_GAP: Duration = Duration::from_millis(2);

/// Size of the fragments the response is delivered in
const FRAGMENT_LEN: usize = 96;

// ---------------------------------------------------------------------------
// Fake collector
// ---------------------------------------------------------------------------

/// What the fake collector accepts.
pub struct CollectorModel {
    pub username: String,
    pub api_key: String,
    pub feeds: Vec<String>,
    /// Ignore every n-th request to exercise the liveness timeout (0 = never)
    pub drop_every: u32,
}

impl CollectorModel {
    /// Full response to `request`, or `None` if the request is swallowed.
    fn respond(&self, sequence: u32, request: &[u8]) -> Option<Vec<u8>> {
        if self.drop_every > 0 && sequence % self.drop_every == 0 {
            warn!("Collector sim: ignoring request #{}", sequence);
            return None;
        }

        let text = String::from_utf8_lossy(request);
        let (head, body) = text.split_once("\r\n\r\n").unwrap_or((text.as_ref(), ""));
        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or_default();

        let key_ok = lines
            .filter_map(|line| line.strip_prefix("X-AIO-Key: "))
            .any(|key| key == self.api_key);
        if !key_ok {
            return Some(status_only(401, "Unauthorized"));
        }

        let Some(feed) = self.target_feed(request_line) else {
            return Some(status_only(404, "Not Found"));
        };

        let value = body
            .split_once(r#""value":""#)
            .and_then(|(_, rest)| rest.split_once('"'))
            .map_or("", |(value, _)| value);

        // Large enough to overflow the client's response prefix
        let json = format!(
            r#"{{"id":"0F{:010}","value":"{}","feed_id":{},"feed_key":"{}","created_at":"2024-01-01T00:00:{:02}Z","created_epoch":{},"expiration":"2024-01-31T00:00:00Z","lat":null,"lon":null,"ele":null}}"#,
            sequence,
            value,
            2_000_000 + sequence,
            feed,
            sequence % 60,
            1_704_067_200 + sequence
        );
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             Server: nginx\r\n\
             Date: Mon, 01 Jan 2024 00:00:00 GMT\r\n\
             Strict-Transport-Security: max-age=31536000\r\n\
             Content-Type: application/json; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             Cache-Control: max-age=0, private, must-revalidate\r\n\
             X-AIO-Worker: sim-1\r\n\
             X-Request-Id: {:032x}\r\n\
             Access-Control-Allow-Origin: *\r\n\
             \r\n\
             {}",
            json.len(),
            sequence,
            json
        );
        Some(response.into_bytes())
    }

    fn target_feed<'r>(&self, request_line: &'r str) -> Option<&'r str> {
        let path = request_line
            .strip_prefix("POST ")?
            .strip_suffix(" HTTP/1.1")?;
        let rest = path.strip_prefix("/api/v2/")?;
        let (user, rest) = rest.split_once("/feeds/")?;
        let feed = rest.strip_suffix("/data")?;

        (user == self.username && self.feeds.iter().any(|f| f == feed)).then_some(feed)
    }
}

fn status_only(code: u16, reason: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        code, reason
    )
    .into_bytes()
}

// ---------------------------------------------------------------------------
// Shared network state
// ---------------------------------------------------------------------------

struct Scheduled {
    due: Instant,
    handle: u32,
    event: TransportEvent,
}

struct NetState {
    now: Instant,
    collector: CollectorModel,
    pending: Vec<Scheduled>,
    lookups: HashMap<u32, (String, Instant)>,
    dns_cache: HashMap<String, IpAddr>,
    next_handle: u32,
    next_lookup: u32,
    open_handles: usize,
    requests: u32,
}

impl NetState {
    fn schedule(&mut self, due: Instant, handle: u32, event: TransportEvent) {
        self.pending.push(Scheduled { due, handle, event });
    }

    /// Earliest future wake-up. Stale entries of finished uplinks never
    /// hold the clock back.
    fn next_due(&self) -> Option<Instant> {
        let events = self.pending.iter().map(|s| s.due);
        let lookups = self.lookups.values().map(|(_, due)| *due);
        events.chain(lookups).filter(|due| *due > self.now).min()
    }
}

/// Handle to the simulated network. Clones share one state.
#[derive(Clone)]
pub struct SimNetwork(Rc<RefCell<NetState>>);

impl SimNetwork {
    pub fn new(collector: CollectorModel) -> Self {
        Self(Rc::new(RefCell::new(NetState {
            now: Instant::from_secs(0),
            collector,
            pending: Vec::new(),
            lookups: HashMap::new(),
            dns_cache: HashMap::new(),
            next_handle: 1,
            next_lookup: 1,
            open_handles: 0,
            requests: 0,
        })))
    }

    pub fn platform(&self) -> SimPlatform {
        SimPlatform(self.clone())
    }

    pub fn connector(&self, max_handles: usize) -> SimConnector {
        SimConnector {
            net: self.clone(),
            max_handles,
        }
    }

    pub fn resolver(&self) -> SimResolver {
        SimResolver(self.clone())
    }

    pub fn open_handles(&self) -> usize {
        self.0.borrow().open_handles
    }

    pub fn requests(&self) -> u32 {
        self.0.borrow().requests
    }

    pub fn elapsed(&self) -> Duration {
        self.0.borrow().now - Instant::from_secs(0)
    }
}

// ---------------------------------------------------------------------------
// Scheduler and delays
// ---------------------------------------------------------------------------

/// The event loop: a virtual clock that skips idle time.
pub struct SimPlatform(SimNetwork);

impl Scheduler for SimPlatform {
    fn now(&self) -> Instant {
        self.0.0.borrow().now
    }

    fn poll(&mut self) {
        let state = self.0.0.borrow();
        let ready = state.pending.iter().filter(|s| s.due <= state.now).count();
        if ready > 0 {
            trace!("Network sim: {} events ready", ready);
        }
    }

    fn wait_for_work_until(&mut self, deadline: Instant) {
        let mut state = self.0.0.borrow_mut();
        let wake = match state.next_due() {
            Some(due) if due < deadline => due,
            _ => deadline,
        };
        if wake > state.now {
            state.now = wake;
        }
    }
}

impl DelayNs for SimPlatform {
    fn delay_ns(&mut self, ns: u32) {
        self.0.0.borrow_mut().now += Duration::from_nanos(ns as u64);
    }
}

// ---------------------------------------------------------------------------
// Name resolution
// ---------------------------------------------------------------------------

pub struct SimResolver(SimNetwork);

impl Resolver for SimResolver {
    fn resolve(&mut self, host: &str) -> Resolution {
        let mut state = self.0.0.borrow_mut();
        if let Some(addr) = state.dns_cache.get(host) {
            debug!("DNS sim: cache hit for {}", host);
            return Resolution::Resolved(*addr);
        }

        let token = state.next_lookup;
        state.next_lookup += 1;
        let due = state.now + DNS_LATENCY;
        state.lookups.insert(token, (host.to_string(), due));
        debug!("DNS sim: lookup #{} for {} started", token, host);
        Resolution::Pending(LookupToken(token))
    }

    fn poll_lookup(&mut self, token: LookupToken) -> Resolution {
        let mut state = self.0.0.borrow_mut();
        let due = match state.lookups.get(&token.0) {
            Some((_, due)) => *due,
            None => return Resolution::Failed,
        };
        if due > state.now {
            return Resolution::Pending(token);
        }

        if let Some((host, _)) = state.lookups.remove(&token.0) {
            debug!("DNS sim: {} resolved to {}", host, COLLECTOR_ADDRESS);
            state.dns_cache.insert(host, COLLECTOR_ADDRESS);
        }
        Resolution::Resolved(COLLECTOR_ADDRESS)
    }
}

// ---------------------------------------------------------------------------
// Transport handles
// ---------------------------------------------------------------------------

pub struct SimConnector {
    net: SimNetwork,
    max_handles: usize,
}

impl Connector for SimConnector {
    type Transport = SimTransport;

    fn open(&mut self, tls: &TlsContext) -> Option<SimTransport> {
        let mut state = self.net.0.borrow_mut();
        if state.open_handles >= self.max_handles {
            warn!("Network sim: out of handles ({} open)", state.open_handles);
            return None;
        }

        let id = state.next_handle;
        state.next_handle += 1;
        state.open_handles += 1;
        debug!("Network sim: handle #{} opened with TLS context #{}", id, tls.id());

        Some(SimTransport {
            net: self.net.clone(),
            id,
            released: false,
        })
    }
}

pub struct SimTransport {
    net: SimNetwork,
    id: u32,
    released: bool,
}

impl SimTransport {
    fn release(&mut self, how: &str) {
        if self.released {
            warn!("Network sim: handle #{} released twice", self.id);
            return;
        }
        self.released = true;
        let mut state = self.net.0.borrow_mut();
        state.open_handles -= 1;
        state.pending.retain(|s| s.handle != self.id);
        debug!("Network sim: handle #{} {}", self.id, how);
    }
}

impl Transport for SimTransport {
    fn set_hostname(&mut self, host: &str) -> Result<(), TransportError> {
        trace!("Network sim: handle #{} SNI {}", self.id, host);
        Ok(())
    }

    fn connect(&mut self, addr: IpAddr, port: u16) -> Result<(), TransportError> {
        let mut state = self.net.0.borrow_mut();
        let due = state.now + HANDSHAKE_LATENCY;
        let result = if addr == COLLECTOR_ADDRESS && port == 443 {
            Ok(())
        } else {
            Err(TransportError::Reset)
        };
        state.schedule(due, self.id, TransportEvent::Connected(result));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.net.0.borrow_mut();
        state.requests += 1;
        let sequence = state.requests;

        let Some(response) = state.collector.respond(sequence, data) else {
            return Ok(());
        };

        let mut due = state.now + RESPONSE_LATENCY;
        for fragment in response.chunks(FRAGMENT_LEN) {
            state.schedule(due, self.id, TransportEvent::Data(fragment.to_vec()));
            due += FRAGMENT_GAP;
        }
        state.schedule(due, self.id, TransportEvent::EndOfStream);
        info!(
            "Collector sim: request #{} answered with {} bytes",
            sequence,
            response.len()
        );
        Ok(())
    }

    fn acknowledge(&mut self, len: usize) {
        trace!("Network sim: handle #{} consumed {} bytes", self.id, len);
    }

    fn next_event(&mut self) -> Option<TransportEvent> {
        let mut state = self.net.0.borrow_mut();
        let now = state.now;
        let index = state
            .pending
            .iter()
            .position(|s| s.handle == self.id && s.due <= now)?;
        Some(state.pending.remove(index).event)
    }

    fn detach(&mut self) {
        trace!("Network sim: handle #{} detached", self.id);
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.release("closed");
        Ok(())
    }

    fn abort(&mut self) {
        self.release("aborted");
    }
}
