//! The network subsystem of a small telemetry probe: a register-level driver for a hardwired
//! TCP/IP-offload Ethernet controller, a socket abstraction that runs either on that controller's
//! hardware sockets or on an OS network stack, three measurement/upload engines (ICMP ping, HTTP
//! throughput, FTP upload), and a cooperative scheduler that interleaves them on a single thread
//! while buffering their results for upload.
//!
//! The crate is `no_std` (it needs an allocator) so the same code runs on the device and on a
//! host.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod addr;
pub mod bus;
pub mod config;
pub mod debug_util;
pub mod eth_ctrl;
pub mod ftp;
pub mod icmp;
pub mod net;
pub mod scheduler;
pub mod telemetry;
pub mod throughput;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;
