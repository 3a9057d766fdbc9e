//! Register map of the controller.
//!
//! The address space is flat: a common register block at the bottom, one 256-byte register block
//! per hardware socket from [SOCKET_BASE], and per-socket 2 KiB circular TX/RX memory windows
//! above that.

// Common registers.

/// Mode Register.
pub const MR: u16 = 0x0000;
/// Gateway Address Register (4 bytes).
pub const GAR: u16 = 0x0001;
/// Subnet Mask Register (4 bytes).
pub const SUBR: u16 = 0x0005;
/// Source Hardware Address Register (6 bytes).
pub const SHAR: u16 = 0x0009;
/// Source IP Address Register (4 bytes).
pub const SIPR: u16 = 0x000F;

/// MR value that starts a software reset. The bit self-clears once the reset is done.
pub const MODE_RESET: u8 = 0x01;
/// MR value for normal operation.
pub const MODE_NORMAL: u8 = 0x00;

// Socket registers, relative to the socket's register block.

pub const SOCKET_COUNT: usize = 4;
pub const SOCKET_BASE: u16 = 0x0400;
pub const SOCKET_STRIDE: u16 = 0x0100;

/// Socket Mode Register.
pub const SN_MR: u16 = 0x00;
/// Socket Command Register. Reads back as 0 once the controller accepted the command.
pub const SN_CR: u16 = 0x01;
/// Socket Interrupt Register. Bits are cleared by writing 1 to them.
pub const SN_IR: u16 = 0x02;
/// Socket Status Register.
pub const SN_SR: u16 = 0x03;
/// Socket Source Port Register (2 bytes).
pub const SN_PORT: u16 = 0x04;
/// Socket Destination IP Address Register (4 bytes).
pub const SN_DIPR: u16 = 0x0C;
/// Socket Destination Port Register (2 bytes).
pub const SN_DPORT: u16 = 0x10;
/// Socket IP Protocol Register, used in IP-raw mode.
pub const SN_PROTO: u16 = 0x14;
/// Socket TX Free Size Register (2 bytes).
pub const SN_TX_FSR: u16 = 0x20;
/// Socket TX Read Pointer Register (2 bytes).
pub const SN_TX_RD: u16 = 0x22;
/// Socket TX Write Pointer Register (2 bytes).
pub const SN_TX_WR: u16 = 0x24;
/// Socket RX Received Size Register (2 bytes).
pub const SN_RX_RSR: u16 = 0x26;
/// Socket RX Read Pointer Register (2 bytes).
pub const SN_RX_RD: u16 = 0x28;

/// Absolute address of register `offset` in socket `index`'s register block.
pub const fn socket_reg(index: u8, offset: u16) -> u16 {
    SOCKET_BASE + index as u16 * SOCKET_STRIDE + offset
}

pub const TX_BUF_BASE: u16 = 0x4000;
pub const RX_BUF_BASE: u16 = 0x6000;
/// Size of each socket's TX and RX memory window.
pub const SOCKET_BUF_SIZE: u16 = 0x0800;
pub const SOCKET_BUF_MASK: u16 = SOCKET_BUF_SIZE - 1;

pub const fn tx_buf_base(index: u8) -> u16 {
    TX_BUF_BASE + index as u16 * SOCKET_BUF_SIZE
}

pub const fn rx_buf_base(index: u8) -> u16 {
    RX_BUF_BASE + index as u16 * SOCKET_BUF_SIZE
}

// Sn_MR protocol modes.
pub const SN_MR_TCP: u8 = 0x01;
pub const SN_MR_IPRAW: u8 = 0x03;

// Sn_CR commands.
pub const CMD_OPEN: u8 = 0x01;
pub const CMD_CONNECT: u8 = 0x04;
pub const CMD_DISCON: u8 = 0x08;
pub const CMD_CLOSE: u8 = 0x10;
pub const CMD_SEND: u8 = 0x20;
pub const CMD_RECV: u8 = 0x40;

// Sn_IR bits.
pub const SN_IR_CON: u8 = 0x01;
pub const SN_IR_DISCON: u8 = 0x02;
pub const SN_IR_RECV: u8 = 0x04;
pub const SN_IR_TIMEOUT: u8 = 0x08;
pub const SN_IR_SEND_OK: u8 = 0x10;

// Sn_SR values.
pub const SOCK_CLOSED: u8 = 0x00;
pub const SOCK_INIT: u8 = 0x13;
pub const SOCK_ESTABLISHED: u8 = 0x17;
pub const SOCK_CLOSE_WAIT: u8 = 0x1C;
pub const SOCK_IPRAW: u8 = 0x32;

/// IP protocol number of ICMP, written to Sn_PROTO for ping sockets.
pub const IPPROTO_ICMP: u8 = 1;

/// Size of the info header the controller prepends to each datagram received in IP-raw mode:
/// the source IPv4 address followed by the big-endian payload length.
pub const IPRAW_HEADER_LEN: usize = 6;
