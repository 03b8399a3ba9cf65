//! Probe record normalization.
//!
//! Each probe emits a fixed `#[repr(C)]` record layout (see `ravn-common`);
//! the normalizer translates those frames into the canonical [`Event`]
//! schema. It owns the per-probe timestamp clamp, the ASCII coercion of
//! process names and paths, and the bounded forensic snapshot.

use std::ptr;

use ravn_common::{
    ExecFsRecord, NetworkRecord, SecurityRecord, SystemRecord, UpdateRecord,
    VulnerabilityRecord, SYS_SETUID,
};

use crate::event::{
    wall_clock_ns, Event, EventKind, Severity, MAX_RAW_LEN, RAW_FLAG_SYNTHETIC_TS,
    RAW_FLAG_TRUNCATED,
};
use crate::probe::ProbeKind;

/// An opaque frame consumed from one probe's ring buffer. Transient: freed
/// once normalized or dropped.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    pub probe: ProbeKind,
    pub bytes: &'a [u8],
}

/// Translates raw probe records into canonical events.
///
/// Holds the last emitted timestamp per probe so the per-probe
/// non-decreasing timestamp invariant survives clock substitution.
pub struct Normalizer {
    last_ts: [u64; ProbeKind::ALL.len()],
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            last_ts: [0; ProbeKind::ALL.len()],
        }
    }

    /// Map a raw record to an event. Total: every frame produces an event;
    /// frames shorter than the probe's declared layout come out as
    /// `unknown` with a truncation marker in the raw snapshot.
    pub fn normalize(&mut self, record: &RawRecord<'_>) -> Event {
        let mut event = if record.bytes.len() < record.probe.min_record_len() {
            self.normalize_short(record)
        } else {
            match record.probe {
                ProbeKind::ExecFs => self.normalize_execfs(record),
                ProbeKind::Network => self.normalize_network(record),
                ProbeKind::System => self.normalize_system(record),
                ProbeKind::Security => self.normalize_security(record),
                ProbeKind::Vulnerability => self.normalize_vulnerability(record),
                ProbeKind::Update => self.normalize_update(record),
            }
        };

        // Zero probe timestamp: substitute the reader's wall clock and flag
        // the substitution in the snapshot.
        if event.timestamp_ns == 0 {
            event.timestamp_ns = wall_clock_ns();
            if let Some(flags) = event.raw.first_mut() {
                *flags |= RAW_FLAG_SYNTHETIC_TS;
            }
        }

        // Per-probe timestamps never go backwards.
        let idx = record.probe.index();
        if event.timestamp_ns < self.last_ts[idx] {
            event.timestamp_ns = self.last_ts[idx];
        }
        self.last_ts[idx] = event.timestamp_ns;

        event
    }

    fn normalize_short(&self, record: &RawRecord<'_>) -> Event {
        let mut raw = snapshot(record.bytes);
        raw[0] |= RAW_FLAG_TRUNCATED;
        Event {
            id: 0,
            timestamp_ns: 0,
            kind: EventKind::Unknown,
            severity: Severity::Low,
            pid: 0,
            uid: 0,
            gid: 0,
            comm: String::new(),
            filename: String::new(),
            raw,
            processed: false,
            processed_time_ns: 0,
        }
    }

    fn normalize_execfs(&self, record: &RawRecord<'_>) -> Event {
        // Safety: length checked against the layout in normalize().
        // The exec and open sub-types map identically; the sub-type stays
        // available to consumers through the raw snapshot.
        let rec: ExecFsRecord =
            unsafe { ptr::read_unaligned(record.bytes.as_ptr() as *const ExecFsRecord) };
        Event {
            id: 0,
            timestamp_ns: rec.timestamp_ns,
            kind: EventKind::ExecFs,
            severity: Severity::Low,
            pid: rec.pid,
            uid: rec.uid,
            gid: rec.gid,
            comm: coerce_ascii(&rec.comm),
            filename: coerce_ascii(&rec.filename),
            raw: snapshot(record.bytes),
            processed: false,
            processed_time_ns: 0,
        }
    }

    fn normalize_network(&self, record: &RawRecord<'_>) -> Event {
        let rec: NetworkRecord =
            unsafe { ptr::read_unaligned(record.bytes.as_ptr() as *const NetworkRecord) };
        // Small-payload hints (sendto <= 64 bytes) ride along verbatim in
        // the snapshot; the event itself carries only process identity.
        Event {
            id: 0,
            timestamp_ns: rec.timestamp_ns,
            kind: EventKind::Network,
            severity: Severity::Low,
            pid: rec.pid,
            uid: rec.uid,
            gid: rec.gid,
            comm: coerce_ascii(&rec.comm),
            filename: String::new(),
            raw: snapshot(record.bytes),
            processed: false,
            processed_time_ns: 0,
        }
    }

    fn normalize_system(&self, record: &RawRecord<'_>) -> Event {
        let rec: SystemRecord =
            unsafe { ptr::read_unaligned(record.bytes.as_ptr() as *const SystemRecord) };
        // A setuid that crosses uid 0 in either direction is a privilege
        // transition worth reviewing.
        let crosses_root =
            rec.sub_type == SYS_SETUID && (rec.uid == 0) != (rec.new_uid == 0);
        Event {
            id: 0,
            timestamp_ns: rec.timestamp_ns,
            kind: EventKind::System,
            severity: if crosses_root {
                Severity::Medium
            } else {
                Severity::Low
            },
            pid: rec.pid,
            uid: rec.uid,
            gid: rec.gid,
            comm: coerce_ascii(&rec.comm),
            filename: String::new(),
            raw: snapshot(record.bytes),
            processed: false,
            processed_time_ns: 0,
        }
    }

    fn normalize_security(&self, record: &RawRecord<'_>) -> Event {
        let rec: SecurityRecord =
            unsafe { ptr::read_unaligned(record.bytes.as_ptr() as *const SecurityRecord) };
        Event {
            id: 0,
            timestamp_ns: rec.timestamp_ns,
            kind: EventKind::Security,
            severity: Severity::from_record(rec.severity),
            pid: rec.pid,
            uid: rec.uid,
            gid: rec.gid,
            comm: coerce_ascii(&rec.comm),
            filename: coerce_ascii(&rec.filename),
            raw: snapshot(record.bytes),
            processed: false,
            processed_time_ns: 0,
        }
    }

    fn normalize_vulnerability(&self, record: &RawRecord<'_>) -> Event {
        let rec: VulnerabilityRecord = unsafe {
            ptr::read_unaligned(record.bytes.as_ptr() as *const VulnerabilityRecord)
        };
        Event {
            id: 0,
            timestamp_ns: rec.timestamp_ns,
            kind: EventKind::Vulnerability,
            severity: Severity::from_record(rec.severity),
            pid: rec.pid,
            uid: rec.uid,
            gid: 0,
            comm: coerce_ascii(&rec.comm),
            filename: String::new(),
            raw: snapshot(record.bytes),
            processed: false,
            processed_time_ns: 0,
        }
    }

    fn normalize_update(&self, record: &RawRecord<'_>) -> Event {
        let rec: UpdateRecord =
            unsafe { ptr::read_unaligned(record.bytes.as_ptr() as *const UpdateRecord) };
        Event {
            id: 0,
            timestamp_ns: rec.timestamp_ns,
            kind: EventKind::Update,
            severity: Severity::Low,
            pid: rec.pid,
            uid: rec.uid,
            gid: rec.gid,
            comm: coerce_ascii(&rec.comm),
            filename: coerce_ascii(&rec.package_name),
            raw: snapshot(record.bytes),
            processed: false,
            processed_time_ns: 0,
        }
    }
}

/// Convert a null-padded byte array into a String, trimming at the first
/// null and replacing non-printable bytes with `?`.
fn coerce_ascii(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end]
        .iter()
        .map(|&b| if (0x20..=0x7E).contains(&b) { b as char } else { '?' })
        .collect()
}

/// Build the forensic snapshot: one flags byte followed by up to 1023 bytes
/// of the frame. Sets the truncation flag when the frame did not fit.
fn snapshot(bytes: &[u8]) -> Vec<u8> {
    let body = MAX_RAW_LEN - 1;
    let take = bytes.len().min(body);
    let mut raw = Vec::with_capacity(take + 1);
    raw.push(if bytes.len() > body { RAW_FLAG_TRUNCATED } else { 0 });
    raw.extend_from_slice(&bytes[..take]);
    raw
}
