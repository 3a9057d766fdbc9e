//! The ping engine: ICMP echo requests over a raw socket, reduced to an average round-trip time.

use core::time::Duration;

use byteorder::{ByteOrder, NetworkEndian};
use log::{debug, info, trace, warn};
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{Icmpv4Packet, Icmpv4Repr};

use crate::debug_util::{self, FormatIcmpEcho};
use crate::net::{NetError, NetStack};
use crate::time::Clock;

pub const ECHO_REQUEST: u8 = 8;
/// The fixed payload carried by every echo request.
pub const ECHO_PAYLOAD: &[u8; 32] = b"abcdefghijklmnopqrstuvwabcdefghi";
pub const HEADER_LEN: usize = 8;
pub const ECHO_REQUEST_LEN: usize = HEADER_LEN + ECHO_PAYLOAD.len();
/// Identifier placed in every echo request.
pub const ECHO_IDENT: u16 = 1;
pub const DEFAULT_COUNT: u16 = 4;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Pause after every attempt, whether or not it got a reply.
pub const PING_INTERVAL: Duration = Duration::from_secs(1);

/// The Internet checksum: the one's complement of the one's-complement sum of all big-endian
/// 16-bit words in `data`. An odd trailing byte is padded with a zero byte.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u64 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u64::from(NetworkEndian::read_u16(word));
    }
    if let [last] = words.remainder() {
        sum += u64::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Builds a complete echo request: the 8-byte header (type 8, code 0, checksum, identifier,
/// sequence number) followed by [ECHO_PAYLOAD], with the checksum filled in.
pub fn build_echo_request(ident: u16, seq: u16) -> [u8; ECHO_REQUEST_LEN] {
    let mut message = [0u8; ECHO_REQUEST_LEN];
    message[0] = ECHO_REQUEST;
    message[1] = 0;
    NetworkEndian::write_u16(&mut message[4..6], ident);
    NetworkEndian::write_u16(&mut message[6..8], seq);
    message[HEADER_LEN..].copy_from_slice(ECHO_PAYLOAD);
    let sum = checksum(&message);
    NetworkEndian::write_u16(&mut message[2..4], sum);
    message
}

/// The result of one echo attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingSample {
    Reply(Duration),
    NoReply,
}

/// What a whole ping run amounts to.
#[derive(Debug, Clone, PartialEq)]
pub enum PingOutcome {
    /// At least one reply came back. `avg_ms` is averaged over the replies only.
    Replies {
        avg_ms: f64,
        received: u16,
        sent: u16,
    },
    NoReplies {
        sent: u16,
    },
    /// No raw socket could be opened, so nothing was sent.
    Unsupported(NetError),
    /// The target could not be resolved, so nothing was sent.
    Failed(NetError),
}

impl PingOutcome {
    /// Reduces the per-attempt samples to a summary.
    pub fn from_samples(samples: &[PingSample]) -> Self {
        let sent = samples.len() as u16;
        let (received, total) = samples
            .iter()
            .filter_map(|sample| match sample {
                PingSample::Reply(rtt) => Some(*rtt),
                PingSample::NoReply => None,
            })
            .fold((0u16, Duration::ZERO), |(n, total), rtt| (n + 1, total + rtt));
        if received == 0 {
            return PingOutcome::NoReplies { sent };
        }
        PingOutcome::Replies {
            avg_ms: total.as_secs_f64() * 1000.0 / f64::from(received),
            received,
            sent,
        }
    }
}

impl core::fmt::Display for PingOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PingOutcome::Replies {
                avg_ms,
                received,
                sent,
            } => write!(
                f,
                "Ping: {avg_ms:.1} ms average over {received} of {sent} pings"
            ),
            PingOutcome::NoReplies { .. } => write!(f, "Ping: No replies received"),
            PingOutcome::Unsupported(e) => write!(f, "Ping not supported: {e}"),
            PingOutcome::Failed(e) => write!(f, "Ping failed: {e}"),
        }
    }
}

/// Pings `host` `count` times, waiting up to `timeout` for each reply and [PING_INTERVAL] after
/// each attempt. Any incoming ICMP message within the timeout counts as a reply.
pub fn ping<S: NetStack, C: Clock>(
    stack: &mut S,
    clock: &C,
    host: &str,
    count: u16,
    timeout: Duration,
) -> PingOutcome {
    let mut socket = match stack.open_icmp() {
        Ok(socket) => socket,
        Err(NetError::Unsupported) => {
            debug!("Raw ICMP sockets are not available");
            return PingOutcome::Unsupported(NetError::Unsupported);
        }
        Err(e) => {
            warn!("Cannot open ICMP socket: {e}");
            return PingOutcome::Failed(e);
        }
    };
    let destination = match stack.resolve(host) {
        Ok(ip) => ip,
        Err(e) => {
            stack.close_icmp(socket);
            return PingOutcome::Failed(e);
        }
    };

    let mut samples = alloc::vec::Vec::with_capacity(usize::from(count));
    let mut reply = [0u8; 1024];
    for i in 0..count {
        let seq = i.wrapping_add(1);
        let request = build_echo_request(ECHO_IDENT, seq);
        trace!("Sending {} to {destination}", FormatIcmpEcho(&request));
        debug_util::log_data_hex(log::Level::Trace, &request);

        let start = clock.now();
        let sample = match stack
            .send_icmp(&mut socket, destination, &request)
            .and_then(|()| stack.recv_icmp(&mut socket, &mut reply, timeout))
        {
            Ok(n) => {
                let rtt = clock.now() - start;
                log_reply(&reply[..n]);
                info!("Reply from {destination}: icmp_seq={seq} time={rtt:?}");
                PingSample::Reply(rtt)
            }
            Err(e) => {
                info!("From {destination} icmp_seq={seq}: {e}");
                PingSample::NoReply
            }
        };
        samples.push(sample);
        clock.sleep(PING_INTERVAL);
    }
    stack.close_icmp(socket);
    PingOutcome::from_samples(&samples)
}

fn log_reply(message: &[u8]) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let parsed = Icmpv4Packet::new_checked(message)
        .and_then(|packet| Icmpv4Repr::parse(&packet, &ChecksumCapabilities::default()));
    match parsed {
        Ok(repr) => debug!("Received {repr:?}"),
        Err(_) => debug!("Received unparsable {}", FormatIcmpEcho(message)),
    }
}
