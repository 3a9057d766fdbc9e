//! An in-memory model of the controller, good enough to exercise the driver and socket layer
//! without hardware. Socket commands take effect immediately.

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};

use super::regs;
use crate::bus::{BusError, RegisterBus};

/// A TCP peer (or refusing host) reachable through the simulated chip.
#[derive(Default, Debug)]
pub struct Remote {
    /// Data the peer still has to send to the device.
    pub to_device: VecDeque<u8>,
    /// Everything the device sent to the peer.
    pub received: Vec<u8>,
    /// Peer closes its side once `to_device` has been handed to the chip.
    pub close_when_drained: bool,
    /// Reported TX free space while connected, instead of the whole window.
    pub tx_free: Option<u16>,
    pub refuse: bool,
}

#[derive(Default)]
struct SocketModel {
    remote: Option<SocketAddrV4>,
    rx_wr: u16,
}

pub struct SimChip {
    memory: Vec<u8>,
    sockets: [SocketModel; regs::SOCKET_COUNT],
    /// Every register write in order: start address and data.
    pub writes: Vec<(u16, Vec<u8>)>,
    /// Fail every bus access.
    pub fail_bus: bool,
    /// MR keeps reading back with the reset bit set.
    pub stuck_in_reset: bool,
    /// How many upcoming reads of an RX received-size register return a torn value.
    pub torn_reads: u32,
    pub remotes: HashMap<SocketAddrV4, Remote>,
    /// Hosts that answer ICMP echo requests.
    pub icmp_hosts: Vec<Ipv4Addr>,
    /// Length to report in the info header of ICMP replies instead of the real one.
    pub icmp_reported_len: Option<u16>,
}

impl SimChip {
    pub fn new() -> Self {
        SimChip {
            memory: vec![0; 0x8000],
            sockets: Default::default(),
            writes: Vec::new(),
            fail_bus: false,
            stuck_in_reset: false,
            torn_reads: 0,
            remotes: HashMap::new(),
            icmp_hosts: Vec::new(),
            icmp_reported_len: None,
        }
    }

    pub fn socket_status(&self, index: u8) -> u8 {
        self.memory[usize::from(regs::socket_reg(index, regs::SN_SR))]
    }

    fn reg(&self, index: u8, offset: u16) -> u8 {
        self.memory[usize::from(regs::socket_reg(index, offset))]
    }

    fn set_reg(&mut self, index: u8, offset: u16, value: u8) {
        self.memory[usize::from(regs::socket_reg(index, offset))] = value;
    }

    fn reg16(&self, index: u8, offset: u16) -> u16 {
        u16::from_be_bytes([self.reg(index, offset), self.reg(index, offset + 1)])
    }

    fn set_reg16(&mut self, index: u8, offset: u16, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.set_reg(index, offset, hi);
        self.set_reg(index, offset + 1, lo);
    }

    fn set_status(&mut self, index: u8, status: u8) {
        self.set_reg(index, regs::SN_SR, status);
    }

    fn raise(&mut self, index: u8, bits: u8) {
        let ir = self.reg(index, regs::SN_IR);
        self.set_reg(index, regs::SN_IR, ir | bits);
    }

    fn destination(&self, index: u8) -> SocketAddrV4 {
        let base = usize::from(regs::socket_reg(index, regs::SN_DIPR));
        let ip = Ipv4Addr::new(
            self.memory[base],
            self.memory[base + 1],
            self.memory[base + 2],
            self.memory[base + 3],
        );
        SocketAddrV4::new(ip, self.reg16(index, regs::SN_DPORT))
    }

    fn rx_pending(&self, index: u8) -> u16 {
        let model = &self.sockets[usize::from(index)];
        model.rx_wr.wrapping_sub(self.reg16(index, regs::SN_RX_RD))
    }

    fn push_rx(&mut self, index: u8, data: &[u8]) {
        let base = usize::from(regs::rx_buf_base(index));
        for &byte in data {
            let wr = self.sockets[usize::from(index)].rx_wr;
            self.memory[base + usize::from(wr & regs::SOCKET_BUF_MASK)] = byte;
            self.sockets[usize::from(index)].rx_wr = wr.wrapping_add(1);
        }
        let pending = self.rx_pending(index);
        self.set_reg16(index, regs::SN_RX_RSR, pending);
        self.raise(index, regs::SN_IR_RECV);
    }

    /// Moves as much of the peer's pending data into the RX window as fits.
    fn refill(&mut self, index: u8) {
        let pending = self.rx_pending(index);
        self.set_reg16(index, regs::SN_RX_RSR, pending);
        let Some(addr) = self.sockets[usize::from(index)].remote else {
            return;
        };
        let room = usize::from(regs::SOCKET_BUF_SIZE - pending);
        let (chunk, closing) = match self.remotes.get_mut(&addr) {
            Some(remote) => {
                let n = room.min(remote.to_device.len());
                let chunk: Vec<u8> = remote.to_device.drain(..n).collect();
                (chunk, remote.close_when_drained && remote.to_device.is_empty())
            }
            None => return,
        };
        if !chunk.is_empty() {
            self.push_rx(index, &chunk);
        }
        if closing && self.socket_status(index) == regs::SOCK_ESTABLISHED {
            self.set_status(index, regs::SOCK_CLOSE_WAIT);
            self.raise(index, regs::SN_IR_DISCON);
        }
    }

    fn take_tx(&mut self, index: u8) -> Vec<u8> {
        let base = usize::from(regs::tx_buf_base(index));
        let rd = self.reg16(index, regs::SN_TX_RD);
        let wr = self.reg16(index, regs::SN_TX_WR);
        let data = (0..wr.wrapping_sub(rd))
            .map(|i| self.memory[base + usize::from(rd.wrapping_add(i) & regs::SOCKET_BUF_MASK)])
            .collect();
        self.set_reg16(index, regs::SN_TX_RD, wr);
        data
    }

    fn tx_free(&self, addr: Option<SocketAddrV4>) -> u16 {
        addr.and_then(|addr| self.remotes.get(&addr))
            .and_then(|remote| remote.tx_free)
            .unwrap_or(regs::SOCKET_BUF_SIZE)
    }

    fn execute(&mut self, index: u8, cmd: u8) {
        let i = usize::from(index);
        match cmd {
            regs::CMD_OPEN => {
                self.sockets[i] = SocketModel::default();
                for offset in [regs::SN_TX_RD, regs::SN_TX_WR, regs::SN_RX_RD, regs::SN_RX_RSR] {
                    self.set_reg16(index, offset, 0);
                }
                self.set_reg16(index, regs::SN_TX_FSR, regs::SOCKET_BUF_SIZE);
                let status = match self.reg(index, regs::SN_MR) {
                    regs::SN_MR_TCP => regs::SOCK_INIT,
                    regs::SN_MR_IPRAW => regs::SOCK_IPRAW,
                    _ => regs::SOCK_CLOSED,
                };
                self.set_status(index, status);
            }
            regs::CMD_CONNECT => {
                let addr = self.destination(index);
                match self.remotes.get(&addr).map(|remote| remote.refuse) {
                    Some(false) => {
                        self.sockets[i].remote = Some(addr);
                        self.set_status(index, regs::SOCK_ESTABLISHED);
                        self.raise(index, regs::SN_IR_CON);
                        let free = self.tx_free(Some(addr));
                        self.set_reg16(index, regs::SN_TX_FSR, free);
                        self.refill(index);
                    }
                    Some(true) => self.set_status(index, regs::SOCK_CLOSED),
                    None => {
                        self.raise(index, regs::SN_IR_TIMEOUT);
                        self.set_status(index, regs::SOCK_CLOSED);
                    }
                }
            }
            regs::CMD_SEND => {
                let data = self.take_tx(index);
                if self.socket_status(index) == regs::SOCK_IPRAW {
                    self.icmp_send(index, data);
                } else if let Some(addr) = self.sockets[i].remote {
                    if let Some(remote) = self.remotes.get_mut(&addr) {
                        remote.received.extend_from_slice(&data);
                    }
                }
                self.raise(index, regs::SN_IR_SEND_OK);
            }
            regs::CMD_RECV => self.refill(index),
            regs::CMD_DISCON | regs::CMD_CLOSE => {
                self.sockets[i].remote = None;
                self.set_status(index, regs::SOCK_CLOSED);
            }
            _ => {}
        }
    }

    /// Answers an echo request from one of `icmp_hosts` with an echo reply carrying the same
    /// identifier, sequence number and payload.
    fn icmp_send(&mut self, index: u8, mut message: Vec<u8>) {
        let dest = *self.destination(index).ip();
        if !self.icmp_hosts.contains(&dest) || message.len() < 8 || message[0] != 8 {
            return;
        }
        message[0] = 0;
        message[2] = 0;
        message[3] = 0;
        let checksum = crate::icmp::checksum(&message);
        message[2..4].copy_from_slice(&checksum.to_be_bytes());
        let mut datagram = dest.octets().to_vec();
        let len = self.icmp_reported_len.unwrap_or(message.len() as u16);
        datagram.extend_from_slice(&len.to_be_bytes());
        datagram.extend_from_slice(&message);
        self.push_rx(index, &datagram);
    }

    /// Maps an address inside a socket register block to its socket index and register offset.
    fn socket_register(address: u16) -> Option<(u8, u16)> {
        let end = regs::SOCKET_BASE + regs::SOCKET_COUNT as u16 * regs::SOCKET_STRIDE;
        if !(regs::SOCKET_BASE..end).contains(&address) {
            return None;
        }
        let relative = address - regs::SOCKET_BASE;
        Some(((relative / regs::SOCKET_STRIDE) as u8, relative % regs::SOCKET_STRIDE))
    }

    fn check_bus(&self) -> Result<(), BusError> {
        if self.fail_bus {
            Err(BusError::Spi(embedded_hal::spi::ErrorKind::Other))
        } else {
            Ok(())
        }
    }
}

impl RegisterBus for SimChip {
    fn write(&mut self, address: u16, data: &[u8]) -> Result<(), BusError> {
        self.check_bus()?;
        self.writes.push((address, data.to_vec()));
        match (Self::socket_register(address), data) {
            (Some((index, regs::SN_CR)), [cmd]) => self.execute(index, *cmd),
            (Some((index, regs::SN_IR)), [bits]) => {
                let ir = self.reg(index, regs::SN_IR);
                self.set_reg(index, regs::SN_IR, ir & !bits);
            }
            _ if address == regs::MR => {
                self.memory[usize::from(regs::MR)] = if self.stuck_in_reset {
                    regs::MODE_RESET
                } else {
                    data[0] & !regs::MODE_RESET
                };
            }
            _ => {
                let start = usize::from(address);
                self.memory[start..start + data.len()].copy_from_slice(data);
            }
        }
        Ok(())
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<(), BusError> {
        self.check_bus()?;
        if self.torn_reads > 0
            && matches!(Self::socket_register(address), Some((_, regs::SN_RX_RSR)))
        {
            self.torn_reads -= 1;
            buf.fill(0xFF);
            return Ok(());
        }
        let start = usize::from(address);
        buf.copy_from_slice(&self.memory[start..start + buf.len()]);
        Ok(())
    }
}
