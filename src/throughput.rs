//! The throughput engine: timed HTTP downloads and raw TCP uploads.
//!
//! Neither direction is a real HTTP client. The download sends a minimal HTTP/1.0 request and then
//! counts every byte that comes back, headers included. The upload sends no request at all and
//! measures how fast the stack accepts data.

use alloc::format;
use core::time::Duration;

use log::{debug, info};

use crate::net::{self, NetError, NetStack};
use crate::time::Clock;

pub const DEFAULT_BLOCK_SIZE: usize = 1024;
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024;

/// Bytes per second. Zero elapsed time yields 0 rather than a division by zero.
pub fn speed(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Download => "Download",
            Direction::Upload => "Upload",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThroughputOutcome {
    Completed {
        direction: Direction,
        bytes: u64,
        elapsed: Duration,
    },
    Failed {
        direction: Direction,
        error: NetError,
    },
}

impl ThroughputOutcome {
    /// Bytes per second for a completed transfer.
    pub fn speed(&self) -> Option<f64> {
        match self {
            ThroughputOutcome::Completed { bytes, elapsed, .. } => Some(speed(*bytes, *elapsed)),
            ThroughputOutcome::Failed { .. } => None,
        }
    }
}

impl core::fmt::Display for ThroughputOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ThroughputOutcome::Completed {
                direction,
                bytes,
                elapsed,
            } => write!(
                f,
                "{}: {bytes} bytes in {:.3} sec, Speed: {:.1} B/s",
                direction.label(),
                elapsed.as_secs_f64(),
                speed(*bytes, *elapsed)
            ),
            ThroughputOutcome::Failed { direction, error } => {
                write!(f, "{} test error: {error}", direction.label())
            }
        }
    }
}

/// Fetches `path` from `host:port` and times how long it takes to receive up to `max_bytes`.
///
/// The clock starts once the request is sent and stops when the peer closes the connection or
/// `max_bytes` have arrived. Reads are `block_size` bytes at most, and the last one is shortened so
/// that no more than `max_bytes` are ever read.
pub fn download<S: NetStack, C: Clock>(
    stack: &mut S,
    clock: &C,
    host: &str,
    port: u16,
    path: &str,
    block_size: usize,
    max_bytes: usize,
) -> ThroughputOutcome {
    let direction = Direction::Download;
    let mut stream = match net::connect_host(stack, host, port) {
        Ok(stream) => stream,
        Err(error) => return ThroughputOutcome::Failed { direction, error },
    };
    let result = receive_timed(stack, &mut stream, clock, host, path, block_size, max_bytes);
    stack.close(stream);
    match result {
        Ok((bytes, elapsed)) => {
            info!("Downloaded {bytes} bytes from {host}:{port} in {elapsed:?}");
            ThroughputOutcome::Completed {
                direction,
                bytes,
                elapsed,
            }
        }
        Err(error) => ThroughputOutcome::Failed { direction, error },
    }
}

fn receive_timed<S: NetStack, C: Clock>(
    stack: &mut S,
    stream: &mut S::Stream,
    clock: &C,
    host: &str,
    path: &str,
    block_size: usize,
    max_bytes: usize,
) -> Result<(u64, Duration), NetError> {
    let request = format!("GET {path} HTTP/1.0\r\nHost: {host}\r\n\r\n");
    net::send_all(stack, stream, request.as_bytes())?;

    let start = clock.now();
    let mut block = alloc::vec![0u8; block_size.max(1)];
    let mut total = 0usize;
    while total < max_bytes {
        let want = block.len().min(max_bytes - total);
        let n = stack.recv(stream, &mut block[..want])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok((total as u64, clock.now() - start))
}

/// Sends `payload` to `host:port` in `block_size` chunks, one send call per chunk, and times it.
///
/// Only the bytes each send call actually accepted are counted; a chunk the stack only partly
/// accepted is not retried.
pub fn upload<S: NetStack, C: Clock>(
    stack: &mut S,
    clock: &C,
    host: &str,
    port: u16,
    payload: &[u8],
    block_size: usize,
) -> ThroughputOutcome {
    let direction = Direction::Upload;
    let mut stream = match net::connect_host(stack, host, port) {
        Ok(stream) => stream,
        Err(error) => return ThroughputOutcome::Failed { direction, error },
    };

    let start = clock.now();
    let mut total = 0u64;
    let mut result = Ok(());
    for chunk in payload.chunks(block_size.max(1)) {
        match stack.send(&mut stream, chunk) {
            Ok(sent) => {
                if sent < chunk.len() {
                    debug!("Partial send: {sent} of {} bytes", chunk.len());
                }
                total += sent as u64;
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    let elapsed = clock.now() - start;
    stack.close(stream);

    match result {
        Ok(()) => {
            info!("Uploaded {total} bytes to {host}:{port} in {elapsed:?}");
            ThroughputOutcome::Completed {
                direction,
                bytes: total,
                elapsed,
            }
        }
        Err(error) => ThroughputOutcome::Failed { direction, error },
    }
}
