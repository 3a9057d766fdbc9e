//! Time keeping for the scheduler and the measurement engines.

use core::time::Duration;

/// A monotonic clock that can also block the (only) thread of execution.
pub trait Clock {
    /// Time elapsed since an arbitrary, fixed origin. Never goes backwards.
    fn now(&self) -> Duration;

    /// Blocks for `duration`.
    fn sleep(&self, duration: Duration);

    /// Seconds since the Unix epoch if the platform knows the wall-clock time, otherwise seconds
    /// since boot. Only used to stamp telemetry records.
    fn timestamp(&self) -> u64 {
        self.now().as_secs()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }

    fn timestamp(&self) -> u64 {
        (**self).timestamp()
    }
}

/// Sleeps until `deadline` (in [Clock::now] terms), returning immediately if it already passed.
pub fn sleep_until<C: Clock + ?Sized>(clock: &C, deadline: Duration) {
    let now = clock.now();
    if deadline > now {
        clock.sleep(deadline - now);
    }
}
