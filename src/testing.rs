//! Fakes shared by the unit tests: a recording SPI bus and chip-select pin, a manually advanced
//! clock, and a scripted network stack.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;
use std::time::Duration;

use crate::net::{NetError, NetStack};
use crate::time::Clock;

/// Something that happened on the mock SPI bus or chip-select line, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    CsLow,
    CsHigh,
    Write(Vec<u8>),
    Read(usize),
    Flush,
}

/// An `embedded-hal` SPI bus that records every operation and serves reads from a queue.
#[derive(Clone)]
pub struct MockSpi {
    events: Rc<RefCell<Vec<BusEvent>>>,
    read_data: Rc<RefCell<VecDeque<u8>>>,
    fail_next_write: Rc<Cell<bool>>,
}

impl MockSpi {
    pub fn new(events: Rc<RefCell<Vec<BusEvent>>>) -> Self {
        MockSpi {
            events,
            read_data: Default::default(),
            fail_next_write: Default::default(),
        }
    }

    pub fn queue_read(&self, data: &[u8]) {
        self.read_data.borrow_mut().extend(data.iter().copied());
    }

    pub fn fail_next_write(&self) {
        self.fail_next_write.set(true);
    }
}

impl embedded_hal::spi::ErrorType for MockSpi {
    type Error = embedded_hal::spi::ErrorKind;
}

impl embedded_hal::spi::SpiBus<u8> for MockSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.events.borrow_mut().push(BusEvent::Read(words.len()));
        let mut queue = self.read_data.borrow_mut();
        for word in words.iter_mut() {
            *word = queue.pop_front().unwrap_or(0);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        if self.fail_next_write.replace(false) {
            return Err(embedded_hal::spi::ErrorKind::Other);
        }
        self.events.borrow_mut().push(BusEvent::Write(words.to_vec()));
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.write(write)?;
        self.read(read)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let out = words.to_vec();
        self.write(&out)?;
        self.read(words)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.events.borrow_mut().push(BusEvent::Flush);
        Ok(())
    }
}

/// A chip-select pin that records its level changes into the shared bus event log.
pub struct MockPin {
    events: Rc<RefCell<Vec<BusEvent>>>,
}

impl MockPin {
    pub fn new(events: Rc<RefCell<Vec<BusEvent>>>) -> Self {
        MockPin { events }
    }
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.events.borrow_mut().push(BusEvent::CsLow);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.events.borrow_mut().push(BusEvent::CsHigh);
        Ok(())
    }
}

/// A delay provider that only keeps count of how long it was asked to wait.
#[derive(Default)]
pub struct CountingDelay {
    pub total_ns: u64,
}

impl embedded_hal::delay::DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}

/// A clock that only moves when told to, or when something sleeps on it.
#[derive(Default)]
pub struct FakeClock {
    now: Cell<Duration>,
    pub sleeps: RefCell<Vec<Duration>>,
}

impl FakeClock {
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

/// The scripted behaviour of the peer at the other end of one mock stream connection.
#[derive(Default, Clone)]
pub struct MockPeer {
    /// Bytes the peer sends to us, delivered in order.
    pub incoming: Vec<u8>,
    /// The most bytes a single `recv` returns. 0 means unlimited.
    pub recv_chunk: usize,
    /// How far the clock moves on each successful `recv`.
    pub recv_delay: Duration,
    /// The most bytes a single `send` accepts. 0 means unlimited.
    pub send_limit: usize,
    /// Fail the connect attempt with this error instead of connecting.
    pub refuse: Option<NetError>,
    /// Once all of `incoming` is delivered, fail with this error instead of reporting EOF.
    pub error_after_data: Option<NetError>,
}

/// What a mock stream connection saw during its lifetime.
#[derive(Default, Clone, Debug)]
pub struct MockConnection {
    pub addr: Option<SocketAddrV4>,
    pub sent: Vec<u8>,
    pub closed: bool,
}

struct StreamState {
    peer: MockPeer,
    read_pos: usize,
}

/// The scripted outcome of one `recv_icmp` call.
pub enum IcmpReply {
    /// A reply arrives after the given round-trip time.
    After(Duration, Vec<u8>),
    /// Nothing arrives before the timeout.
    Timeout,
}

/// A [NetStack] whose peers follow a script. Each `connect` consumes the next [MockPeer].
pub struct MockStack<'c> {
    clock: Option<&'c FakeClock>,
    pub peers: VecDeque<MockPeer>,
    pub connections: Vec<MockConnection>,
    streams: Vec<StreamState>,
    pub icmp_supported: bool,
    /// Error returned by `open_icmp` in place of the one implied by `icmp_supported`.
    pub icmp_open_error: Option<NetError>,
    pub icmp_replies: VecDeque<IcmpReply>,
    pub icmp_sent: Vec<(Ipv4Addr, Vec<u8>)>,
    pub icmp_closed: bool,
}

/// Handle for a [MockStack] stream: an index into its connection list.
#[derive(Debug)]
pub struct MockStream(usize);

/// Handle for a [MockStack] raw socket.
#[derive(Debug)]
pub struct MockRaw;

impl<'c> MockStack<'c> {
    pub fn new(clock: Option<&'c FakeClock>) -> Self {
        MockStack {
            clock,
            peers: VecDeque::new(),
            connections: Vec::new(),
            streams: Vec::new(),
            icmp_supported: true,
            icmp_open_error: None,
            icmp_replies: VecDeque::new(),
            icmp_sent: Vec::new(),
            icmp_closed: false,
        }
    }

    pub fn with_peer(mut self, peer: MockPeer) -> Self {
        self.peers.push_back(peer);
        self
    }

    pub fn sent_text(&self, connection: usize) -> String {
        String::from_utf8_lossy(&self.connections[connection].sent).into_owned()
    }

    fn advance(&self, by: Duration) {
        if let Some(clock) = self.clock {
            clock.advance(by);
        }
    }
}

impl<'c> NetStack for MockStack<'c> {
    type Stream = MockStream;
    type Raw = MockRaw;

    fn resolve(&mut self, host: &str) -> Result<Ipv4Addr, NetError> {
        if host == "unresolvable.invalid" {
            return Err(NetError::Unresolvable);
        }
        Ok(host.parse().unwrap_or(Ipv4Addr::new(203, 0, 113, 7)))
    }

    fn connect(&mut self, addr: SocketAddrV4) -> Result<MockStream, NetError> {
        let Some(peer) = self.peers.pop_front() else {
            return Err(NetError::Refused);
        };
        if let Some(err) = peer.refuse {
            return Err(err);
        }
        self.connections.push(MockConnection {
            addr: Some(addr),
            ..Default::default()
        });
        self.streams.push(StreamState { peer, read_pos: 0 });
        Ok(MockStream(self.connections.len() - 1))
    }

    fn send(&mut self, stream: &mut MockStream, data: &[u8]) -> Result<usize, NetError> {
        let limit = self.streams[stream.0].peer.send_limit;
        let n = if limit == 0 { data.len() } else { data.len().min(limit) };
        self.connections[stream.0].sent.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn recv(&mut self, stream: &mut MockStream, buf: &mut [u8]) -> Result<usize, NetError> {
        let state = &mut self.streams[stream.0];
        let remaining = &state.peer.incoming[state.read_pos..];
        if remaining.is_empty() {
            return match state.peer.error_after_data {
                Some(err) => Err(err),
                None => Ok(0),
            };
        }
        let mut n = remaining.len().min(buf.len());
        if state.peer.recv_chunk > 0 {
            n = n.min(state.peer.recv_chunk);
        }
        buf[..n].copy_from_slice(&remaining[..n]);
        state.read_pos += n;
        let delay = state.peer.recv_delay;
        self.advance(delay);
        Ok(n)
    }

    fn close(&mut self, stream: MockStream) {
        self.connections[stream.0].closed = true;
    }

    fn open_icmp(&mut self) -> Result<MockRaw, NetError> {
        if let Some(err) = self.icmp_open_error {
            Err(err)
        } else if self.icmp_supported {
            Ok(MockRaw)
        } else {
            Err(NetError::Unsupported)
        }
    }

    fn send_icmp(
        &mut self,
        _socket: &mut MockRaw,
        dest: Ipv4Addr,
        message: &[u8],
    ) -> Result<(), NetError> {
        self.icmp_sent.push((dest, message.to_vec()));
        Ok(())
    }

    fn recv_icmp(
        &mut self,
        _socket: &mut MockRaw,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, NetError> {
        match self.icmp_replies.pop_front() {
            Some(IcmpReply::After(rtt, data)) => {
                self.advance(rtt);
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(IcmpReply::Timeout) | None => {
                self.advance(timeout);
                Err(NetError::TimedOut)
            }
        }
    }

    fn close_icmp(&mut self, _socket: MockRaw) {
        self.icmp_closed = true;
    }
}
