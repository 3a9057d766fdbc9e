//! A [NetStack] on top of the controller's hardware sockets.
//!
//! The controller has [regs::SOCKET_COUNT] sockets. Each one is opened in TCP or IP-raw mode, driven
//! through its command register, and moves data through a 2 KiB circular TX and RX window whose read
//! and write pointers are free-running 16-bit counters. Every wait in here polls the chip once per
//! millisecond against a [Clock] deadline, so no call blocks for longer than its configured timeout.

use core::net::{Ipv4Addr, SocketAddrV4};
use core::time::Duration;

use byteorder::{ByteOrder, NetworkEndian};
use embedded_hal::delay::DelayNs;
use log::{debug, trace, warn};

use super::{regs, ChipState, Error, EthController};
use crate::addr;
use crate::bus::RegisterBus;
use crate::net::{NetError, NetStack};
use crate::time::Clock;

/// Interval at which socket state is polled while waiting on the controller.
const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// How long the controller gets to accept a socket command.
const COMMAND_TIMEOUT: Duration = Duration::from_millis(100);
/// The first local port handed out for outgoing connections.
const EPHEMERAL_PORT_START: u16 = 49152;
/// How many times a 16-bit counter register is re-read while waiting for two matching values.
const STABLE_READ_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub recv: Duration,
    pub send: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: Duration::from_secs(5),
            recv: Duration::from_secs(5),
            send: Duration::from_secs(5),
        }
    }
}

/// A connected TCP socket on the controller.
#[derive(Debug)]
pub struct ChipSocket {
    index: u8,
}

/// An IP-raw socket on the controller, bound to ICMP.
#[derive(Debug)]
pub struct ChipRawSocket {
    index: u8,
}

pub struct ChipStack<B, D, C> {
    ctrl: EthController<B, D>,
    clock: C,
    timeouts: Timeouts,
    in_use: [bool; regs::SOCKET_COUNT],
    next_port: u16,
}

impl<B: RegisterBus, D: DelayNs, C: Clock> ChipStack<B, D, C> {
    /// Wraps an operational controller. Fails if the controller has not been reset yet.
    pub fn new(ctrl: EthController<B, D>, clock: C, timeouts: Timeouts) -> Result<Self, Error> {
        if ctrl.state() != ChipState::Operational {
            return Err(Error::NotOperational(ctrl.state()));
        }
        Ok(ChipStack {
            ctrl,
            clock,
            timeouts,
            in_use: [false; regs::SOCKET_COUNT],
            next_port: EPHEMERAL_PORT_START,
        })
    }

    /// The wrapped controller, e.g. to read back the interface addresses.
    pub fn controller(&mut self) -> &mut EthController<B, D> {
        &mut self.ctrl
    }

    pub fn release(self) -> (EthController<B, D>, C) {
        (self.ctrl, self.clock)
    }

    fn bus(&mut self) -> Result<&mut B, NetError> {
        self.ctrl.bus().map_err(|e| match e {
            Error::HardwareFault(e) => NetError::HardwareFault(e),
            _ => NetError::Other,
        })
    }

    fn read_u8(&mut self, index: u8, offset: u16) -> Result<u8, NetError> {
        Ok(self.bus()?.read_u8(regs::socket_reg(index, offset))?)
    }

    fn write_u8(&mut self, index: u8, offset: u16, value: u8) -> Result<(), NetError> {
        Ok(self.bus()?.write_u8(regs::socket_reg(index, offset), value)?)
    }

    fn write_u16(&mut self, index: u8, offset: u16, value: u16) -> Result<(), NetError> {
        Ok(self.bus()?.write_u16(regs::socket_reg(index, offset), value)?)
    }

    /// Reads a 16-bit counter register that the controller may update between the two byte reads.
    /// The value is only trusted once two consecutive reads agree.
    fn read_u16_stable(&mut self, index: u8, offset: u16) -> Result<u16, NetError> {
        let address = regs::socket_reg(index, offset);
        let mut previous = self.bus()?.read_u16(address)?;
        for _ in 0..STABLE_READ_ATTEMPTS {
            let current = self.bus()?.read_u16(address)?;
            if current == previous {
                return Ok(current);
            }
            previous = current;
        }
        warn!("Socket {index} register 0x{offset:02X} never settled, using 0x{previous:04X}");
        Ok(previous)
    }

    fn status(&mut self, index: u8) -> Result<u8, NetError> {
        self.read_u8(index, regs::SN_SR)
    }

    /// Issues a socket command and waits for the controller to accept it.
    fn command(&mut self, index: u8, cmd: u8) -> Result<(), NetError> {
        trace!("Socket {index} command 0x{cmd:02X}");
        self.write_u8(index, regs::SN_CR, cmd)?;
        let deadline = self.clock.now() + COMMAND_TIMEOUT;
        loop {
            if self.read_u8(index, regs::SN_CR)? == 0 {
                return Ok(());
            }
            if self.clock.now() >= deadline {
                warn!("Socket {index} did not accept command 0x{cmd:02X}");
                return Err(NetError::TimedOut);
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }

    fn allocate(&mut self) -> Result<u8, NetError> {
        let index = self
            .in_use
            .iter()
            .position(|used| !used)
            .ok_or(NetError::NoFreeSocket)?;
        self.in_use[index] = true;
        Ok(index as u8)
    }

    /// Closes the socket on the chip and returns it to the pool. Failures are only logged.
    fn free(&mut self, index: u8) {
        if let Err(e) = self
            .command(index, regs::CMD_CLOSE)
            .and_then(|()| self.write_u8(index, regs::SN_IR, 0xFF))
        {
            warn!("Failed to close socket {index}: {e}");
        }
        self.in_use[usize::from(index)] = false;
    }

    fn next_local_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = self.next_port.checked_add(1).unwrap_or(EPHEMERAL_PORT_START);
        port
    }

    fn open_tcp(&mut self, index: u8) -> Result<(), NetError> {
        let port = self.next_local_port();
        self.write_u8(index, regs::SN_MR, regs::SN_MR_TCP)?;
        self.write_u16(index, regs::SN_PORT, port)?;
        self.command(index, regs::CMD_OPEN)?;
        match self.status(index)? {
            regs::SOCK_INIT => Ok(()),
            other => {
                warn!("Socket {index} in state 0x{other:02X} after TCP open");
                Err(NetError::Other)
            }
        }
    }

    fn do_connect(&mut self, index: u8, addr: SocketAddrV4) -> Result<(), NetError> {
        self.open_tcp(index)?;
        self.bus()?
            .write(regs::socket_reg(index, regs::SN_DIPR), &addr.ip().octets())?;
        self.write_u16(index, regs::SN_DPORT, addr.port())?;
        self.command(index, regs::CMD_CONNECT)?;

        let deadline = self.clock.now() + self.timeouts.connect;
        loop {
            match self.status(index)? {
                regs::SOCK_ESTABLISHED => {
                    self.write_u8(index, regs::SN_IR, regs::SN_IR_CON)?;
                    return Ok(());
                }
                regs::SOCK_CLOSED => {
                    let ir = self.read_u8(index, regs::SN_IR)?;
                    return Err(if ir & regs::SN_IR_TIMEOUT != 0 {
                        NetError::TimedOut
                    } else {
                        NetError::Refused
                    });
                }
                _ => {}
            }
            if self.clock.now() >= deadline {
                return Err(NetError::TimedOut);
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }

    /// Copies `data` into the socket's TX window at the free-running pointer `ptr`, splitting the
    /// write in two where it wraps around the end of the window.
    fn write_tx(&mut self, index: u8, ptr: u16, data: &[u8]) -> Result<(), NetError> {
        let base = regs::tx_buf_base(index);
        let offset = ptr & regs::SOCKET_BUF_MASK;
        let first = data.len().min(usize::from(regs::SOCKET_BUF_SIZE - offset));
        let bus = self.bus()?;
        bus.write(base + offset, &data[..first])?;
        if first < data.len() {
            bus.write(base, &data[first..])?;
        }
        Ok(())
    }

    /// The RX counterpart of [Self::write_tx].
    fn read_rx(&mut self, index: u8, ptr: u16, buf: &mut [u8]) -> Result<(), NetError> {
        let base = regs::rx_buf_base(index);
        let offset = ptr & regs::SOCKET_BUF_MASK;
        let first = buf.len().min(usize::from(regs::SOCKET_BUF_SIZE - offset));
        let bus = self.bus()?;
        let (head, tail) = buf.split_at_mut(first);
        bus.read(base + offset, head)?;
        if !tail.is_empty() {
            bus.read(base, tail)?;
        }
        Ok(())
    }

    /// Queues `data` (which must fit in the TX window's free space) and waits until the controller
    /// reports it as sent.
    fn transmit(&mut self, index: u8, data: &[u8]) -> Result<(), NetError> {
        let wr = self.read_u16_stable(index, regs::SN_TX_WR)?;
        self.write_tx(index, wr, data)?;
        self.write_u16(index, regs::SN_TX_WR, wr.wrapping_add(data.len() as u16))?;
        self.command(index, regs::CMD_SEND)?;

        let deadline = self.clock.now() + self.timeouts.send;
        loop {
            let ir = self.read_u8(index, regs::SN_IR)?;
            if ir & regs::SN_IR_SEND_OK != 0 {
                self.write_u8(index, regs::SN_IR, regs::SN_IR_SEND_OK)?;
                return Ok(());
            }
            if ir & regs::SN_IR_TIMEOUT != 0 {
                self.write_u8(index, regs::SN_IR, regs::SN_IR_TIMEOUT)?;
                return Err(NetError::TimedOut);
            }
            if self.status(index)? == regs::SOCK_CLOSED {
                return Err(NetError::Reset);
            }
            if self.clock.now() >= deadline {
                return Err(NetError::TimedOut);
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }

    /// Waits until the TX window has room, returning how much.
    fn wait_tx_free(&mut self, index: u8) -> Result<u16, NetError> {
        let deadline = self.clock.now() + self.timeouts.send;
        loop {
            match self.status(index)? {
                regs::SOCK_ESTABLISHED | regs::SOCK_CLOSE_WAIT => {}
                _ => return Err(NetError::Reset),
            }
            let free = self.read_u16_stable(index, regs::SN_TX_FSR)?;
            if free > 0 {
                return Ok(free);
            }
            if self.clock.now() >= deadline {
                return Err(NetError::TimedOut);
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }

    /// Copies `buf.len()` bytes from `skip` bytes into the RX window, then hands `total` bytes of
    /// the window back to the controller.
    fn consume_rx(
        &mut self,
        index: u8,
        skip: u16,
        buf: &mut [u8],
        total: u16,
    ) -> Result<(), NetError> {
        let rd = self.read_u16_stable(index, regs::SN_RX_RD)?;
        self.read_rx(index, rd.wrapping_add(skip), buf)?;
        self.write_u16(index, regs::SN_RX_RD, rd.wrapping_add(total))?;
        self.command(index, regs::CMD_RECV)
    }
}

impl<B: RegisterBus, D: DelayNs, C: Clock> NetStack for ChipStack<B, D, C> {
    type Stream = ChipSocket;
    type Raw = ChipRawSocket;

    /// The controller has no resolver, so only dotted-quad literals resolve.
    fn resolve(&mut self, host: &str) -> Result<Ipv4Addr, NetError> {
        addr::parse_ipv4(host).map_err(|_| {
            debug!("Cannot resolve {host:?} without DNS");
            NetError::Unresolvable
        })
    }

    fn connect(&mut self, addr: SocketAddrV4) -> Result<ChipSocket, NetError> {
        let index = self.allocate()?;
        match self.do_connect(index, addr) {
            Ok(()) => {
                debug!("Socket {index} connected to {addr}");
                Ok(ChipSocket { index })
            }
            Err(e) => {
                debug!("Socket {index} failed to connect to {addr}: {e}");
                self.free(index);
                Err(e)
            }
        }
    }

    fn send(&mut self, stream: &mut ChipSocket, data: &[u8]) -> Result<usize, NetError> {
        if data.is_empty() {
            return Ok(0);
        }
        let free = self.wait_tx_free(stream.index)?;
        let n = data.len().min(usize::from(free));
        self.transmit(stream.index, &data[..n])?;
        trace!("Socket {} sent {n} of {} bytes", stream.index, data.len());
        Ok(n)
    }

    fn recv(&mut self, stream: &mut ChipSocket, buf: &mut [u8]) -> Result<usize, NetError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let index = stream.index;
        let deadline = self.clock.now() + self.timeouts.recv;
        loop {
            let available = self.read_u16_stable(index, regs::SN_RX_RSR)?;
            if available > 0 {
                let n = buf.len().min(usize::from(available));
                self.consume_rx(index, 0, &mut buf[..n], n as u16)?;
                trace!("Socket {index} received {n} bytes");
                return Ok(n);
            }
            match self.status(index)? {
                regs::SOCK_CLOSE_WAIT | regs::SOCK_CLOSED => return Ok(0),
                _ => {}
            }
            if self.clock.now() >= deadline {
                return Err(NetError::TimedOut);
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }

    fn close(&mut self, stream: ChipSocket) {
        let index = stream.index;
        if let Err(e) = self.command(index, regs::CMD_DISCON) {
            debug!("Socket {index} disconnect failed: {e}");
        }
        self.free(index);
        debug!("Socket {index} closed");
    }

    fn open_icmp(&mut self) -> Result<ChipRawSocket, NetError> {
        let index = self.allocate()?;
        let opened = self
            .write_u8(index, regs::SN_PROTO, regs::IPPROTO_ICMP)
            .and_then(|()| self.write_u8(index, regs::SN_MR, regs::SN_MR_IPRAW))
            .and_then(|()| self.command(index, regs::CMD_OPEN))
            .and_then(|()| match self.status(index)? {
                regs::SOCK_IPRAW => Ok(()),
                _ => Err(NetError::Other),
            });
        match opened {
            Ok(()) => Ok(ChipRawSocket { index }),
            Err(e) => {
                self.free(index);
                Err(e)
            }
        }
    }

    fn send_icmp(
        &mut self,
        socket: &mut ChipRawSocket,
        dest: Ipv4Addr,
        message: &[u8],
    ) -> Result<(), NetError> {
        let index = socket.index;
        if message.len() > usize::from(regs::SOCKET_BUF_SIZE) {
            return Err(NetError::Other);
        }
        self.bus()?
            .write(regs::socket_reg(index, regs::SN_DIPR), &dest.octets())?;
        self.transmit(index, message)
    }

    /// Each datagram in the RX window is preceded by a 6-byte info header: the source address and
    /// the big-endian datagram length. The header is stripped, and the whole datagram is consumed
    /// even when `buf` is too small for it.
    fn recv_icmp(
        &mut self,
        socket: &mut ChipRawSocket,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, NetError> {
        let index = socket.index;
        let deadline = self.clock.now() + timeout;
        let received = loop {
            let received = self.read_u16_stable(index, regs::SN_RX_RSR)?;
            if usize::from(received) >= regs::IPRAW_HEADER_LEN {
                break received;
            }
            if self.clock.now() >= deadline {
                return Err(NetError::TimedOut);
            }
            self.clock.sleep(POLL_INTERVAL);
        };

        let rd = self.read_u16_stable(index, regs::SN_RX_RD)?;
        let mut header = [0u8; regs::IPRAW_HEADER_LEN];
        self.read_rx(index, rd, &mut header)?;
        let source = Ipv4Addr::new(header[0], header[1], header[2], header[3]);
        let len = NetworkEndian::read_u16(&header[4..6]);
        let buffered = received - regs::IPRAW_HEADER_LEN as u16;
        if len > buffered {
            warn!("Socket {index} reports a {len} byte datagram with {buffered} bytes buffered");
            self.consume_rx(index, 0, &mut [], received)?;
            return Err(NetError::Other);
        }
        let n = buf.len().min(usize::from(len));
        let total = regs::IPRAW_HEADER_LEN as u16 + len;
        self.consume_rx(index, regs::IPRAW_HEADER_LEN as u16, &mut buf[..n], total)?;
        trace!("Socket {index} received {len} byte ICMP datagram from {source}");
        Ok(n)
    }

    fn close_icmp(&mut self, socket: ChipRawSocket) {
        self.free(socket.index);
    }
}
