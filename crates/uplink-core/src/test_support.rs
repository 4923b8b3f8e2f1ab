//! Scripted collaborators shared by the unit tests

use alloc::collections::{BTreeMap, VecDeque};
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Ref, RefCell};
use core::net::{IpAddr, Ipv4Addr};

use embassy_time::{Duration, Instant};
use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, Operation};

use crate::compensation::{CalibrationParameters, RawSample};
use crate::scheduler::Scheduler;
use crate::sensors::BMP280_ADDR;
use crate::uplink::{
    Connector, LookupToken, Resolution, Resolver, TlsContext, TlsContextProvider, TlsReusePolicy,
    Transport, TransportError, TransportEvent, TrustAnchors,
};

/// Calibration from the BMP280 datasheet's worked example
pub const DATASHEET_PARAMS: CalibrationParameters = CalibrationParameters {
    dig_t1: 27504,
    dig_t2: 26435,
    dig_t3: -1000,
    dig_p1: 36477,
    dig_p2: -10685,
    dig_p3: 3024,
    dig_p4: 2855,
    dig_p5: 140,
    dig_p6: -7,
    dig_p7: 15500,
    dig_p8: -14600,
    dig_p9: 6000,
};

pub const DATASHEET_RAW: RawSample = RawSample {
    raw_temperature: 519888,
    raw_pressure: 415148,
};

pub fn test_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(52, 5, 86, 20))
}

pub fn test_context() -> Rc<TlsContext> {
    TlsContextProvider::new(TlsReusePolicy::Shared, TrustAnchors::BuiltIn).acquire()
}

// ----------------------------------------------------------------------------
// I2C
// ----------------------------------------------------------------------------

#[derive(Default)]
struct BusState {
    registers: BTreeMap<u8, u8>,
    fail_reads: bool,
    transactions: usize,
}

/// BMP280 register file behind an `embedded-hal` I2C bus.
///
/// Clones share the same registers, so a test can keep a handle for
/// inspection after giving one to the driver.
#[derive(Clone, Default)]
pub struct MockBmp280Bus(Rc<RefCell<BusState>>);

impl MockBmp280Bus {
    /// Registers loaded with [`DATASHEET_PARAMS`] and [`DATASHEET_RAW`].
    pub fn datasheet() -> Self {
        let bus = Self::default();
        {
            let mut state = bus.0.borrow_mut();
            let p = DATASHEET_PARAMS;
            let words: [u16; 12] = [
                p.dig_t1,
                p.dig_t2 as u16,
                p.dig_t3 as u16,
                p.dig_p1,
                p.dig_p2 as u16,
                p.dig_p3 as u16,
                p.dig_p4 as u16,
                p.dig_p5 as u16,
                p.dig_p6 as u16,
                p.dig_p7 as u16,
                p.dig_p8 as u16,
                p.dig_p9 as u16,
            ];
            for (i, word) in words.iter().enumerate() {
                let [lo, hi] = word.to_le_bytes();
                state.registers.insert(0x88 + (i as u8) * 2, lo);
                state.registers.insert(0x89 + (i as u8) * 2, hi);
            }

            // 415148 = 0x655AC, 519888 = 0x7EED0
            for (offset, byte) in [0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00].iter().enumerate() {
                state.registers.insert(0xF7 + offset as u8, *byte);
            }
        }
        bus
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.0.borrow().registers.get(&reg).copied().unwrap_or(0)
    }

    pub fn set_register(&self, reg: u8, value: u8) {
        self.0.borrow_mut().registers.insert(reg, value);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.0.borrow_mut().fail_reads = fail;
    }

    /// Number of bus transactions so far.
    pub fn transactions(&self) -> usize {
        self.0.borrow().transactions
    }
}

impl ErrorType for MockBmp280Bus {
    type Error = ErrorKind;
}

impl I2c for MockBmp280Bus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.0.borrow_mut();
        state.transactions += 1;

        if address != BMP280_ADDR {
            return Err(ErrorKind::NoAcknowledge(i2c::NoAcknowledgeSource::Address));
        }

        let mut pointer = None;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    let Some((&reg, values)) = bytes.split_first() else {
                        continue;
                    };
                    pointer = Some(reg);
                    for (offset, value) in values.iter().enumerate() {
                        state.registers.insert(reg.wrapping_add(offset as u8), *value);
                    }
                }
                Operation::Read(buf) => {
                    if state.fail_reads {
                        return Err(ErrorKind::Bus);
                    }
                    let start = pointer.unwrap_or(0);
                    for (offset, byte) in buf.iter_mut().enumerate() {
                        let reg = start.wrapping_add(offset as u8);
                        *byte = state.registers.get(&reg).copied().unwrap_or(0);
                    }
                }
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// Everything a [`MockTransport`] was asked to do, plus its script.
#[derive(Default)]
pub struct WireLog {
    pub hostname: Option<String>,
    pub connected_to: Option<(IpAddr, u16)>,
    pub written: Vec<u8>,
    pub acknowledged: usize,
    pub detached: bool,
    pub closed: bool,
    pub aborted: bool,
    pub close_calls: usize,
    /// Calls made on the handle after it was closed or aborted
    pub calls_after_release: usize,
    pub events: VecDeque<TransportEvent>,
    pub tls_context: Option<u32>,
    fail_connect: Option<TransportError>,
    fail_write: Option<TransportError>,
    fail_close: Option<TransportError>,
    on_connect: Vec<TransportEvent>,
    on_write: Vec<TransportEvent>,
}

impl WireLog {
    fn touch(&mut self) {
        if self.closed || self.aborted {
            self.calls_after_release += 1;
        }
    }
}

/// Test-side view of one transport handle.
#[derive(Clone, Default)]
pub struct MockWire(Rc<RefCell<WireLog>>);

impl MockWire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> MockTransport {
        MockTransport { wire: self.clone() }
    }

    pub fn log(&self) -> Ref<'_, WireLog> {
        self.0.borrow()
    }

    /// Queue an event for the connection.
    pub fn push(&self, event: TransportEvent) {
        self.0.borrow_mut().events.push_back(event);
    }

    /// Queue `Connected(result)` as soon as `connect` is called.
    pub fn reply_on_connect(&self, result: Result<(), TransportError>) {
        self.0
            .borrow_mut()
            .on_connect
            .push(TransportEvent::Connected(result));
    }

    /// Queue these fragments followed by end-of-stream once the request is written.
    pub fn reply_on_write(&self, fragments: &[&[u8]]) {
        let mut log = self.0.borrow_mut();
        log.on_write
            .extend(fragments.iter().map(|f| TransportEvent::Data(f.to_vec())));
        log.on_write.push(TransportEvent::EndOfStream);
    }

    pub fn fail_connect(&self, err: TransportError) {
        self.0.borrow_mut().fail_connect = Some(err);
    }

    pub fn fail_write(&self, err: TransportError) {
        self.0.borrow_mut().fail_write = Some(err);
    }

    pub fn fail_close(&self, err: TransportError) {
        self.0.borrow_mut().fail_close = Some(err);
    }
}

pub struct MockTransport {
    wire: MockWire,
}

impl Transport for MockTransport {
    fn set_hostname(&mut self, host: &str) -> Result<(), TransportError> {
        let mut log = self.wire.0.borrow_mut();
        log.touch();
        log.hostname = Some(String::from(host));
        Ok(())
    }

    fn connect(&mut self, addr: IpAddr, port: u16) -> Result<(), TransportError> {
        let mut log = self.wire.0.borrow_mut();
        log.touch();
        if let Some(err) = log.fail_connect {
            return Err(err);
        }
        log.connected_to = Some((addr, port));
        let replies: Vec<_> = log.on_connect.drain(..).collect();
        log.events.extend(replies);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut log = self.wire.0.borrow_mut();
        log.touch();
        if let Some(err) = log.fail_write {
            return Err(err);
        }
        log.written.extend_from_slice(data);
        let replies: Vec<_> = log.on_write.drain(..).collect();
        log.events.extend(replies);
        Ok(())
    }

    fn acknowledge(&mut self, len: usize) {
        let mut log = self.wire.0.borrow_mut();
        log.touch();
        log.acknowledged += len;
    }

    fn next_event(&mut self) -> Option<TransportEvent> {
        let mut log = self.wire.0.borrow_mut();
        if log.detached {
            return None;
        }
        log.events.pop_front()
    }

    fn detach(&mut self) {
        let mut log = self.wire.0.borrow_mut();
        log.touch();
        log.detached = true;
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut log = self.wire.0.borrow_mut();
        log.touch();
        log.close_calls += 1;
        if let Some(err) = log.fail_close {
            return Err(err);
        }
        log.closed = true;
        Ok(())
    }

    fn abort(&mut self) {
        let mut log = self.wire.0.borrow_mut();
        log.touch();
        log.aborted = true;
    }
}

/// Hands out scripted handles, one wire per `open`.
#[derive(Default)]
pub struct MockConnector {
    pub script: Vec<MockWire>,
    pub opened: Vec<MockWire>,
    pub exhausted: bool,
}

impl MockConnector {
    /// Every handle answers `Connected(Ok)` and then replies with `response`.
    pub fn replying(response: &'static [u8], count: usize) -> Self {
        let script = (0..count)
            .map(|_| {
                let wire = MockWire::new();
                wire.reply_on_connect(Ok(()));
                wire.reply_on_write(&[response]);
                wire
            })
            .collect();
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn exhausted() -> Self {
        Self {
            exhausted: true,
            ..Self::default()
        }
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn open(&mut self, tls: &TlsContext) -> Option<MockTransport> {
        if self.exhausted {
            return None;
        }
        let wire = if self.script.is_empty() {
            MockWire::new()
        } else {
            self.script.remove(0)
        };
        wire.0.borrow_mut().tls_context = Some(tls.id());
        self.opened.push(wire.clone());
        Some(wire.transport())
    }
}

// ----------------------------------------------------------------------------
// Name resolution and scheduling
// ----------------------------------------------------------------------------

pub struct MockResolver {
    answer: Option<IpAddr>,
    /// Polls before an asynchronous lookup settles; `None` answers from cache
    delay: Option<u32>,
    polls: u32,
    pub lookups: usize,
}

impl MockResolver {
    pub fn cached(addr: IpAddr) -> Self {
        Self {
            answer: Some(addr),
            delay: None,
            polls: 0,
            lookups: 0,
        }
    }

    pub fn pending(addr: IpAddr, polls: u32) -> Self {
        Self {
            answer: Some(addr),
            delay: Some(polls),
            polls: 0,
            lookups: 0,
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            delay: None,
            polls: 0,
            lookups: 0,
        }
    }
}

impl Resolver for MockResolver {
    fn resolve(&mut self, _host: &str) -> Resolution {
        self.lookups += 1;
        match (self.delay, self.answer) {
            (Some(_), _) => {
                self.polls = 0;
                Resolution::Pending(LookupToken(self.lookups as u32))
            }
            (None, Some(addr)) => Resolution::Resolved(addr),
            (None, None) => Resolution::Failed,
        }
    }

    fn poll_lookup(&mut self, token: LookupToken) -> Resolution {
        self.polls += 1;
        match (self.delay, self.answer) {
            (Some(delay), _) if self.polls < delay => Resolution::Pending(token),
            (_, Some(addr)) => Resolution::Resolved(addr),
            (_, None) => Resolution::Failed,
        }
    }
}

/// Virtual clock. Sleeping jumps straight to the deadline.
pub struct MockScheduler {
    start: Instant,
    now: Instant,
    pub polls: usize,
}

impl MockScheduler {
    pub fn new() -> Self {
        let start = Instant::from_secs(1_000);
        Self {
            start,
            now: start,
            polls: 0,
        }
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn elapsed(&self) -> Duration {
        self.now - self.start
    }
}

impl Scheduler for MockScheduler {
    fn now(&self) -> Instant {
        self.now
    }

    fn poll(&mut self) {
        self.polls += 1;
    }

    fn wait_for_work_until(&mut self, deadline: Instant) {
        self.now = self.now.max(deadline);
    }
}

impl embedded_hal::delay::DelayNs for MockScheduler {
    fn delay_ns(&mut self, ns: u32) {
        self.now += Duration::from_nanos(ns as u64);
    }
}
