//! Call records emitted when a bridge is torn down

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Which side started the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    /// Arrived at the gateway (cellular ring or direct SIP call)
    Inbound,
    /// The gateway dialed the cellular leg
    Outbound,
}

/// One finished call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub direction: CallDirection,
    pub remote_number: String,
    pub started_at: DateTime<Utc>,
    /// Bridged time; zero if the call never bridged
    pub duration: Duration,
    pub end_reason: String,
}

/// Consumer of call records
///
/// Called while the orchestrator holds its state lock, so implementations
/// must hand the record off quickly.
pub trait CallRecordSink: Send + Sync {
    fn record(&self, record: CallRecord);
}

/// Writes records to the log
#[derive(Debug, Default)]
pub struct LogRecordSink;

impl CallRecordSink for LogRecordSink {
    fn record(&self, record: CallRecord) {
        info!(
            direction = ?record.direction,
            remote = %record.remote_number,
            started_at = %record.started_at,
            duration_secs = record.duration.as_secs(),
            reason = %record.end_reason,
            "call record"
        );
    }
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<CallRecord>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().clone()
    }
}

impl CallRecordSink for MemoryRecordSink {
    fn record(&self, record: CallRecord) {
        self.records.lock().push(record);
    }
}
