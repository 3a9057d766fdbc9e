//! The cooperative main loop.
//!
//! Five periodic tasks share one thread: the download, upload and ping measurements, the flush
//! that uploads buffered results over FTP, and a maintenance task that reports on the buffer. Each
//! task runs to completion and is then due again one interval after it finished. Nothing is ever
//! preempted, so a slow network call delays every other task; the engines bound that with their
//! own timeouts.
//!
//! The [TelemetryBuffer] is the only state shared between tasks. A flush snapshots it, uploads the
//! snapshot and then clears the whole buffer, so a record appended between the snapshot and the
//! clear is dropped without being uploaded. That window is accepted rather than closed.

use alloc::string::{String, ToString};
use alloc::vec;
use core::time::Duration;

use log::{debug, info};

use crate::config::ProbeConfig;
use crate::net::NetStack;
use crate::telemetry::{RecordKind, TelemetryBuffer, TelemetryRecord, DEFAULT_CAPACITY};
use crate::time::{self, Clock};
use crate::{ftp, icmp, throughput};

/// How long [Scheduler::run_forever] idles when every task is disabled.
const IDLE_SLEEP: Duration = Duration::from_secs(60);

/// `now + delay`, saturating at [Duration::MAX], which never comes due.
fn due_after(now: Duration, delay: Duration) -> Duration {
    now.checked_add(delay).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Download,
    Upload,
    Ping,
    Flush,
    Maintenance,
}

impl TaskKind {
    /// Every task, in the order ties between equally due tasks are broken.
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Download,
        TaskKind::Upload,
        TaskKind::Ping,
        TaskKind::Flush,
        TaskKind::Maintenance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Download => "download",
            TaskKind::Upload => "upload",
            TaskKind::Ping => "ping",
            TaskKind::Flush => "flush",
            TaskKind::Maintenance => "maintenance",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Run statistics of one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub runs: u32,
    pub last_duration: Duration,
    pub max_duration: Duration,
}

impl TaskStats {
    fn update(&mut self, duration: Duration) {
        self.runs = self.runs.saturating_add(1);
        self.last_duration = duration;
        self.max_duration = self.max_duration.max(duration);
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    interval: Duration,
    next_due: Duration,
    stats: TaskStats,
}

impl Slot {
    fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }
}

/// What a flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered, so nothing was sent.
    Empty,
    /// The records were uploaded and the buffer cleared.
    Uploaded { records: usize },
    /// The upload failed; the buffer is untouched and will be retried on the next flush.
    Failed { records: usize },
}

pub struct Scheduler<S, C, const N: usize = DEFAULT_CAPACITY> {
    stack: S,
    clock: C,
    config: ProbeConfig,
    session: String,
    buffer: TelemetryBuffer<N>,
    slots: [Slot; 5],
}

impl<S: NetStack, C: Clock, const N: usize> Scheduler<S, C, N> {
    /// Sets up every task from `config`. The measurements and the flush are due immediately, the
    /// maintenance task one interval from now. A task whose interval is 0 never runs.
    pub fn new(stack: S, clock: C, config: ProbeConfig, session: impl Into<String>) -> Self {
        let now = clock.now();
        let slots = TaskKind::ALL.map(|kind| {
            let interval = match kind {
                TaskKind::Download => config.speedtest.download_interval,
                TaskKind::Upload => config.speedtest.upload_interval,
                TaskKind::Ping => config.speedtest.ping_interval,
                TaskKind::Flush => config.flush_interval,
                TaskKind::Maintenance => config.maintenance_interval,
            };
            let first_delay = match kind {
                TaskKind::Maintenance => interval,
                _ => Duration::ZERO,
            };
            Slot {
                interval,
                next_due: due_after(now, first_delay),
                stats: TaskStats::default(),
            }
        });
        for kind in TaskKind::ALL {
            let slot = &slots[kind.index()];
            if slot.enabled() {
                debug!("Task {} every {:?}", kind.name(), slot.interval);
            } else {
                info!("Task {} disabled", kind.name());
            }
        }
        Scheduler {
            stack,
            clock,
            config,
            session: session.into(),
            buffer: TelemetryBuffer::new(),
            slots,
        }
    }

    pub fn buffer(&self) -> &TelemetryBuffer<N> {
        &self.buffer
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    pub fn stats(&self, kind: TaskKind) -> TaskStats {
        self.slots[kind.index()].stats
    }

    /// When `kind` is next due, or `None` if it is disabled.
    pub fn next_due(&self, kind: TaskKind) -> Option<Duration> {
        let slot = &self.slots[kind.index()];
        slot.enabled().then_some(slot.next_due)
    }

    /// Sleeps until the earliest due task, runs it, and schedules it again one interval later.
    /// Returns the task that ran, or `None` without sleeping if every task is disabled.
    pub fn run_next(&mut self) -> Option<TaskKind> {
        let kind = TaskKind::ALL
            .into_iter()
            .filter(|kind| self.slots[kind.index()].enabled())
            .min_by_key(|kind| self.slots[kind.index()].next_due)?;
        time::sleep_until(&self.clock, self.slots[kind.index()].next_due);
        self.run_task(kind);
        let slot = &mut self.slots[kind.index()];
        slot.next_due = due_after(self.clock.now(), slot.interval);
        Some(kind)
    }

    /// Runs every enabled task once, in [TaskKind::ALL] order, without waiting for it to be due.
    pub fn run_each_once(&mut self) {
        for kind in TaskKind::ALL {
            if self.slots[kind.index()].enabled() {
                self.run_task(kind);
            }
        }
    }

    /// Runs the tasks on their schedules until the process ends.
    pub fn run_forever(&mut self) -> ! {
        info!("Scheduler running for session {}", self.session);
        loop {
            if self.run_next().is_none() {
                self.clock.sleep(IDLE_SLEEP);
            }
        }
    }

    /// Runs one task right away, regardless of its schedule, and records its run time.
    pub fn run_task(&mut self, kind: TaskKind) {
        let start = self.clock.now();
        match kind {
            TaskKind::Download | TaskKind::Upload | TaskKind::Ping => {
                let record = self.measure(kind);
                self.buffer.push(record);
            }
            TaskKind::Flush => {
                self.flush();
            }
            TaskKind::Maintenance => self.maintain(),
        }
        let elapsed = self.clock.now() - start;
        self.slots[kind.index()].stats.update(elapsed);
    }

    /// Runs one measurement and turns its outcome into a record. Never fails: a failed measurement
    /// becomes a record describing the failure.
    fn measure(&mut self, kind: TaskKind) -> TelemetryRecord {
        let cfg = &self.config.speedtest;
        let (record_kind, text) = match kind {
            TaskKind::Ping => (
                RecordKind::Ping,
                icmp::ping(
                    &mut self.stack,
                    &self.clock,
                    &cfg.ping_target,
                    cfg.ping_count,
                    cfg.ping_timeout,
                )
                .to_string(),
            ),
            TaskKind::Download => (
                RecordKind::Download,
                throughput::download(
                    &mut self.stack,
                    &self.clock,
                    &cfg.download_server,
                    cfg.download_port,
                    &cfg.download_path,
                    cfg.download_block_size,
                    cfg.download_max_bytes,
                )
                .to_string(),
            ),
            _ => {
                let payload = vec![b'a'; cfg.upload_size];
                (
                    RecordKind::Upload,
                    throughput::upload(
                        &mut self.stack,
                        &self.clock,
                        &cfg.upload_server,
                        cfg.upload_port,
                        &payload,
                        cfg.upload_block_size,
                    )
                    .to_string(),
                )
            }
        };
        info!("{text}");
        TelemetryRecord::new(record_kind, self.clock.timestamp(), text)
    }

    /// Uploads everything buffered as one newline-joined payload and, if that worked, clears the
    /// buffer.
    pub fn flush(&mut self) -> FlushOutcome {
        if self.buffer.is_empty() {
            debug!("Nothing to upload");
            return FlushOutcome::Empty;
        }
        let records = self.buffer.len();
        let payload = self.buffer.payload();
        let mut target = self.config.ftp.clone();
        target.remote_path = ftp::expand_remote_path(&target.remote_path, &self.session);

        if ftp::upload(&mut self.stack, &target, payload.as_bytes()) {
            info!("FTP upload of {records} records successful, clearing buffer.");
            self.buffer.clear();
            FlushOutcome::Uploaded { records }
        } else {
            info!("FTP upload of {records} records failed, retrying later.");
            FlushOutcome::Failed { records }
        }
    }

    fn maintain(&mut self) {
        info!(
            "Buffer holds {} of {} records, {} evicted so far",
            self.buffer.len(),
            self.buffer.capacity(),
            self.buffer.evicted()
        );
        for kind in TaskKind::ALL {
            let stats = self.slots[kind.index()].stats;
            debug!(
                "Task {}: {} runs, last {:?}, max {:?}",
                kind.name(),
                stats.runs,
                stats.last_duration,
                stats.max_duration
            );
        }
    }
}
