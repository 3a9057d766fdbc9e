use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use netprobe::time::Clock;

/// [Clock] on the OS monotonic clock, with wall-clock timestamps.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }

    fn timestamp(&self) -> u64 {
        unix_time()
    }
}

/// Seconds since the Unix epoch, or 0 if the system clock is set before it.
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
