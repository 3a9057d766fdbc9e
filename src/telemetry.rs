//! Measurement results waiting to be uploaded.

use alloc::string::String;
use core::fmt::Write;

use log::debug;

/// The number of records held before the oldest ones are evicted.
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Ping,
    Download,
    Upload,
}

/// One formatted measurement result. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    kind: RecordKind,
    timestamp: u64,
    payload: String,
}

impl TelemetryRecord {
    pub fn new(kind: RecordKind, timestamp: u64, payload: String) -> Self {
        TelemetryRecord {
            kind,
            timestamp,
            payload,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// The upload line for the record: its timestamp, a space, then the payload.
impl core::fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.timestamp, self.payload)
    }
}

/// A bounded FIFO of records. Appending to a full buffer evicts the oldest record.
pub struct TelemetryBuffer<const N: usize = DEFAULT_CAPACITY> {
    records: heapless::Deque<TelemetryRecord, N>,
    evicted: u64,
}

impl<const N: usize> Default for TelemetryBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TelemetryBuffer<N> {
    pub const fn new() -> Self {
        TelemetryBuffer {
            records: heapless::Deque::new(),
            evicted: 0,
        }
    }

    /// Appends `record`, evicting the oldest record first if the buffer is full.
    pub fn push(&mut self, record: TelemetryRecord) {
        if self.records.is_full() {
            if let Some(oldest) = self.records.pop_front() {
                debug!("Telemetry buffer full, dropping {oldest}");
                self.evicted += 1;
            }
        }
        // Cannot fail: there is room now (unless N is 0, in which case nothing is ever kept).
        let _ = self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// How many records were evicted to make room since the buffer was created.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.records.iter()
    }

    /// All current records, oldest first, one line each, joined with `\n`.
    pub fn payload(&self) -> String {
        let mut payload = String::new();
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                payload.push('\n');
            }
            // Writing into a String cannot fail.
            let _ = write!(payload, "{record}");
        }
        payload
    }

    /// Drops every record, including ones appended after the last [Self::payload] snapshot.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
