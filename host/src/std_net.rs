//! [NetStack] on the operating system's sockets.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, warn};
use netprobe::net::{NetError, NetStack};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// Largest ICMP datagram read back, IP header included.
const MAX_DATAGRAM: usize = 1500;

/// An ICMP socket. Raw sockets deliver the IPv4 header along with the message, ping (datagram)
/// sockets do not.
#[derive(Debug)]
pub struct IcmpSocket {
    socket: Socket,
    includes_ip_header: bool,
}

/// Stream sockets over `std::net` with connect, read and write timeouts, and ICMP over a raw
/// socket.
///
/// Raw sockets need privilege. Without it an unprivileged ping socket is tried, and if that is
/// not permitted either, [NetStack::open_icmp] fails with [NetError::Unsupported] and the ping
/// engine reports "not supported".
#[derive(Debug, Clone)]
pub struct StdStack {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl StdStack {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        StdStack {
            connect_timeout,
            io_timeout,
        }
    }
}

fn map_io_error(e: io::Error) -> NetError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => NetError::Refused,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => NetError::TimedOut,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotConnected => NetError::Reset,
        _ => {
            debug!("Unmapped socket error: {e}");
            NetError::Other
        }
    }
}

/// The ICMP message inside an IPv4 packet, or `None` if the packet is too short for its header.
pub fn strip_ipv4_header(packet: &[u8]) -> Option<&[u8]> {
    let header_len = usize::from(packet.first()? & 0x0F) * 4;
    if header_len < 20 {
        return None;
    }
    packet.get(header_len..)
}

impl NetStack for StdStack {
    type Stream = TcpStream;
    type Raw = IcmpSocket;

    fn resolve(&mut self, host: &str) -> Result<Ipv4Addr, NetError> {
        if let Ok(ip) = host.parse() {
            return Ok(ip);
        }
        let addrs = (host, 0).to_socket_addrs().map_err(|e| {
            debug!("Resolving {host} failed: {e}");
            NetError::Unresolvable
        })?;
        addrs
            .filter_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .next()
            .ok_or(NetError::Unresolvable)
    }

    fn connect(&mut self, addr: SocketAddrV4) -> Result<TcpStream, NetError> {
        let stream = TcpStream::connect_timeout(&SocketAddr::V4(addr), self.connect_timeout)
            .map_err(map_io_error)?;
        stream
            .set_read_timeout(Some(self.io_timeout))
            .and_then(|()| stream.set_write_timeout(Some(self.io_timeout)))
            .map_err(map_io_error)?;
        debug!("Connected to {addr}");
        Ok(stream)
    }

    fn send(&mut self, stream: &mut TcpStream, data: &[u8]) -> Result<usize, NetError> {
        stream.write(data).map_err(map_io_error)
    }

    fn recv(&mut self, stream: &mut TcpStream, buf: &mut [u8]) -> Result<usize, NetError> {
        loop {
            match stream.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result.map_err(map_io_error),
            }
        }
    }

    fn close(&mut self, stream: TcpStream) {
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            // The peer may well have closed first.
            debug!("Shutdown failed: {e}");
        }
    }

    fn open_icmp(&mut self) -> Result<IcmpSocket, NetError> {
        let raw = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4));
        let (socket, includes_ip_header) = match raw {
            Ok(socket) => (socket, true),
            Err(e) => {
                debug!("Raw ICMP socket unavailable ({e}), trying a ping socket");
                let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))
                    .map_err(|e| {
                        warn!("ICMP sockets are not available on this host: {e}");
                        NetError::Unsupported
                    })?;
                (socket, false)
            }
        };
        Ok(IcmpSocket {
            socket,
            includes_ip_header,
        })
    }

    fn send_icmp(
        &mut self,
        socket: &mut IcmpSocket,
        dest: Ipv4Addr,
        message: &[u8],
    ) -> Result<(), NetError> {
        let addr = SockAddr::from(SocketAddrV4::new(dest, 0));
        socket
            .socket
            .send_to(message, &addr)
            .map(|_| ())
            .map_err(map_io_error)
    }

    fn recv_icmp(
        &mut self,
        socket: &mut IcmpSocket,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, NetError> {
        // A zero timeout would mean "block forever".
        socket
            .socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .map_err(map_io_error)?;
        let mut packet = [0u8; MAX_DATAGRAM];
        let n = socket.socket.read(&mut packet).map_err(map_io_error)?;
        let message = if socket.includes_ip_header {
            strip_ipv4_header(&packet[..n]).ok_or(NetError::Other)?
        } else {
            &packet[..n]
        };
        let len = message.len().min(buf.len());
        buf[..len].copy_from_slice(&message[..len]);
        Ok(len)
    }

    fn close_icmp(&mut self, socket: IcmpSocket) {
        drop(socket);
    }
}
