//! The socket abstraction the protocol engines are written against.
//!
//! A [NetStack] hands out socket *handles* and performs all operations on them itself, in the same
//! way a `smoltcp` `SocketSet` does. That keeps several sockets usable at once (the FTP engine
//! drives a control and a data connection side by side) without the handles borrowing the stack.
//!
//! Two implementations exist: [crate::eth_ctrl::ChipStack] on the controller's hardware sockets,
//! and an OS-socket stack in the host crate.

use core::net::{Ipv4Addr, SocketAddrV4};
use core::time::Duration;

use crate::bus::BusError;

/// Why a socket operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// The host name could not be turned into an IPv4 address.
    Unresolvable,
    /// The peer actively refused the connection.
    Refused,
    /// A connect, send or receive did not complete within its timeout.
    TimedOut,
    /// The connection was reset or closed underneath us.
    Reset,
    /// The stack cannot provide this kind of socket at all (e.g. raw sockets without privilege).
    Unsupported,
    /// Every socket the stack has is already in use.
    NoFreeSocket,
    /// The controller stopped responding correctly on the bus.
    HardwareFault(BusError),
    /// Any other failure reported by the underlying stack.
    Other,
}

impl NetError {
    /// Whether this failure is a connectivity problem (as opposed to a local one).
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            NetError::Unresolvable | NetError::Refused | NetError::TimedOut | NetError::Reset
        )
    }
}

impl core::fmt::Display for NetError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NetError::Unresolvable => write!(f, "host could not be resolved"),
            NetError::Refused => write!(f, "connection refused"),
            NetError::TimedOut => write!(f, "timed out"),
            NetError::Reset => write!(f, "connection reset"),
            NetError::Unsupported => write!(f, "operation not supported"),
            NetError::NoFreeSocket => write!(f, "no free socket"),
            NetError::HardwareFault(e) => write!(f, "hardware fault: {e}"),
            NetError::Other => write!(f, "network error"),
        }
    }
}

impl From<BusError> for NetError {
    fn from(e: BusError) -> Self {
        NetError::HardwareFault(e)
    }
}

/// Stream (TCP) and raw-datagram (ICMP) sockets.
///
/// Implementations enforce their own connect and receive timeouts: callers run on a single
/// cooperative thread and rely on every call returning in bounded time.
pub trait NetStack {
    /// A connected stream socket.
    type Stream;
    /// A raw socket carrying ICMP messages.
    type Raw;

    /// Resolves `host` (a name or a dotted-quad literal) to an IPv4 address.
    fn resolve(&mut self, host: &str) -> Result<Ipv4Addr, NetError>;

    /// Opens a stream connection to `addr`.
    fn connect(&mut self, addr: SocketAddrV4) -> Result<Self::Stream, NetError>;

    /// Queues as much of `data` as the stack accepts right now and returns how many bytes that
    /// was. This may be fewer than `data.len()`.
    fn send(&mut self, stream: &mut Self::Stream, data: &[u8]) -> Result<usize, NetError>;

    /// Receives up to `buf.len()` bytes. Returns `Ok(0)` once the peer has closed the connection
    /// and all data has been read.
    fn recv(&mut self, stream: &mut Self::Stream, buf: &mut [u8]) -> Result<usize, NetError>;

    /// Closes the connection and releases the socket.
    fn close(&mut self, stream: Self::Stream);

    /// Opens a raw socket for ICMP.
    fn open_icmp(&mut self) -> Result<Self::Raw, NetError>;

    /// Sends one ICMP message (header plus payload, no IP header) to `dest`.
    fn send_icmp(
        &mut self,
        socket: &mut Self::Raw,
        dest: Ipv4Addr,
        message: &[u8],
    ) -> Result<(), NetError>;

    /// Waits up to `timeout` for one incoming ICMP message and copies it (without IP header) into
    /// `buf`, returning its length.
    fn recv_icmp(
        &mut self,
        socket: &mut Self::Raw,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, NetError>;

    /// Closes a raw socket.
    fn close_icmp(&mut self, socket: Self::Raw);
}

/// Resolves `host` and connects to it on `port`.
pub fn connect_host<S: NetStack>(
    stack: &mut S,
    host: &str,
    port: u16,
) -> Result<S::Stream, NetError> {
    let ip = stack.resolve(host)?;
    stack.connect(SocketAddrV4::new(ip, port))
}

/// Sends all of `data`, looping over partial sends. A send that makes no progress at all is treated
/// as a dead connection.
pub fn send_all<S: NetStack>(
    stack: &mut S,
    stream: &mut S::Stream,
    mut data: &[u8],
) -> Result<(), NetError> {
    while !data.is_empty() {
        let sent = stack.send(stream, data)?;
        if sent == 0 {
            return Err(NetError::Reset);
        }
        data = &data[sent..];
    }
    Ok(())
}
