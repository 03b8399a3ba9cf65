//! Canonical event types for RAVN.
//!
//! Every probe-specific frame is normalized into an [`Event`] before it
//! enters the queue; everything downstream (analyzer, store, status surface)
//! speaks only this schema.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Upper bound on the forensic raw snapshot carried by an event, including
/// the leading flags byte.
pub const MAX_RAW_LEN: usize = 1024;

/// Flag bit in the raw snapshot's first byte: the snapshot (or the frame it
/// was taken from) is shorter than the full record.
pub const RAW_FLAG_TRUNCATED: u8 = 0b0000_0001;

/// Flag bit in the raw snapshot's first byte: the probe timestamp was zero
/// and the reader substituted its wall clock.
pub const RAW_FLAG_SYNTHETIC_TS: u8 = 0b0000_0010;

/// Maximum number of recommendation strings attached to an analysis result.
pub const MAX_RECOMMENDATIONS: usize = 10;

/// Maximum length in bytes of a single recommendation string.
pub const MAX_RECOMMENDATION_LEN: usize = 256;

/// Event classification, one per probe family plus `Unknown` for frames the
/// normalizer could not classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExecFs,
    Network,
    System,
    Security,
    Vulnerability,
    Update,
    Unknown,
}

impl EventKind {
    /// Stable integer code used in the events table.
    pub fn code(self) -> i32 {
        match self {
            EventKind::ExecFs => 1,
            EventKind::Network => 2,
            EventKind::System => 3,
            EventKind::Security => 4,
            EventKind::Vulnerability => 5,
            EventKind::Update => 6,
            EventKind::Unknown => 0,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => EventKind::ExecFs,
            2 => EventKind::Network,
            3 => EventKind::System,
            4 => EventKind::Security,
            5 => EventKind::Vulnerability,
            6 => EventKind::Update,
            _ => EventKind::Unknown,
        }
    }
}

/// Severity level for an event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Logged but unlikely to need intervention.
    Low,
    /// Worth reviewing.
    Medium,
    /// Likely requires attention.
    High,
    /// Immediate action recommended.
    Critical,
}

impl Severity {
    pub fn code(self) -> i32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            2 => Severity::Medium,
            3 => Severity::High,
            4 => Severity::Critical,
            _ => Severity::Low,
        }
    }

    /// Map a probe-record severity (1..=4) onto the ladder, clamping
    /// out-of-range values to `Low`.
    pub fn from_record(value: u32) -> Self {
        Self::from_code(value as i32)
    }
}

/// Banded classification of a threat score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Band a threat score per the scoring contract: critical >= 90,
    /// high [80,90), medium [70,80), low [40,70), none below 40.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            ThreatLevel::Critical
        } else if score >= 80.0 {
            ThreatLevel::High
        } else if score >= 70.0 {
            ThreatLevel::Medium
        } else if score >= 40.0 {
            ThreatLevel::Low
        } else {
            ThreatLevel::None
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ThreatLevel::None => 0,
            ThreatLevel::Low => 1,
            ThreatLevel::Medium => 2,
            ThreatLevel::High => 3,
            ThreatLevel::Critical => 4,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ThreatLevel::Low,
            2 => ThreatLevel::Medium,
            3 => ThreatLevel::High,
            4 => ThreatLevel::Critical,
            _ => ThreatLevel::None,
        }
    }
}

/// The canonical record the pipeline processes end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Store row id; zero until persisted.
    pub id: i64,
    /// Emitter timestamp in nanoseconds. Non-decreasing per probe; the
    /// normalizer substitutes the wall clock for a zero probe timestamp and
    /// flags the substitution in `raw`.
    pub timestamp_ns: u64,
    pub kind: EventKind,
    pub severity: Severity,
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    /// Process name, ASCII-coerced, at most 16 bytes.
    pub comm: String,
    /// Path when applicable, ASCII-coerced, at most 256 bytes.
    pub filename: String,
    /// Forensic snapshot: one flags byte followed by up to 1023 bytes of the
    /// originating frame. See [`RAW_FLAG_TRUNCATED`] and
    /// [`RAW_FLAG_SYNTHETIC_TS`].
    pub raw: Vec<u8>,
    pub processed: bool,
    /// Set once when `processed` transitions to true.
    pub processed_time_ns: u64,
}

impl Event {
    /// The flags byte of the raw snapshot (zero for an empty snapshot).
    pub fn raw_flags(&self) -> u8 {
        self.raw.first().copied().unwrap_or(0)
    }

    pub fn raw_truncated(&self) -> bool {
        self.raw_flags() & RAW_FLAG_TRUNCATED != 0
    }

    pub fn raw_synthetic_ts(&self) -> bool {
        self.raw_flags() & RAW_FLAG_SYNTHETIC_TS != 0
    }
}

/// Per-event output of the analyzer, persisted alongside the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub event_id: i64,
    pub timestamp_ns: u64,
    /// Weighted anomaly score in [0, 10].
    pub anomaly_score: f64,
    /// Weighted threat score in [0, 100].
    pub threat_score: f64,
    pub is_anomaly: bool,
    pub is_threat: bool,
    pub threat_level: ThreatLevel,
    /// Ordered, de-duplicated, at most ten entries of at most 256 ASCII
    /// bytes each.
    pub recommendations: Vec<String>,
    /// Analysis confidence in [0, 100].
    pub confidence: f64,
}

/// Read-mostly statistics published by the event queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Events ever accepted by the queue.
    pub total: u64,
    /// Events currently waiting for the analyzer.
    pub pending: u64,
    /// Events marked processed.
    pub processed: u64,
    /// Timestamp of the most recently enqueued event.
    pub last_event_ns: u64,
}

/// Current wall clock as nanoseconds since the Unix epoch.
pub fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
