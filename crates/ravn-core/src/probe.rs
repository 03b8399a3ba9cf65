//! The closed set of probe kinds RAVN knows how to consume.

use std::mem;

use serde::{Deserialize, Serialize};

use crate::event::EventKind;

/// A kernel probe family. Each kind corresponds to one eBPF object file with
/// one ring-buffer map and one fixed record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    ExecFs,
    Network,
    System,
    Security,
    Vulnerability,
    Update,
}

impl ProbeKind {
    /// Every probe kind, in attach order.
    pub const ALL: [ProbeKind; 6] = [
        ProbeKind::ExecFs,
        ProbeKind::Network,
        ProbeKind::System,
        ProbeKind::Security,
        ProbeKind::Vulnerability,
        ProbeKind::Update,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProbeKind::ExecFs => "execfs",
            ProbeKind::Network => "network",
            ProbeKind::System => "system",
            ProbeKind::Security => "security",
            ProbeKind::Vulnerability => "vulnerability",
            ProbeKind::Update => "update-checker",
        }
    }

    /// Canonical ring-buffer map name inside this probe's object. The execfs
    /// probe predates the `<kind>_events` convention and kept the plain name.
    pub fn ring_map_name(self) -> &'static str {
        match self {
            ProbeKind::ExecFs => "events",
            ProbeKind::Network => "network_events",
            ProbeKind::System => "system_events",
            ProbeKind::Security => "security_events",
            ProbeKind::Vulnerability => "vulnerability_events",
            ProbeKind::Update => "update_events",
        }
    }

    /// Object file name under the probe artifact directory.
    pub fn object_file(self) -> &'static str {
        match self {
            ProbeKind::ExecFs => "core_execfs.bpf.o",
            ProbeKind::Network => "core_network.bpf.o",
            ProbeKind::System => "core_system.bpf.o",
            ProbeKind::Security => "core_security.bpf.o",
            ProbeKind::Vulnerability => "core_vulnerability.bpf.o",
            ProbeKind::Update => "core_update-checker.bpf.o",
        }
    }

    /// Minimum frame length for this probe's declared record layout. Frames
    /// shorter than this normalize to `unknown` with a truncation marker.
    pub fn min_record_len(self) -> usize {
        match self {
            ProbeKind::ExecFs => mem::size_of::<ravn_common::ExecFsRecord>(),
            ProbeKind::Network => mem::size_of::<ravn_common::NetworkRecord>(),
            ProbeKind::System => mem::size_of::<ravn_common::SystemRecord>(),
            ProbeKind::Security => mem::size_of::<ravn_common::SecurityRecord>(),
            ProbeKind::Vulnerability => mem::size_of::<ravn_common::VulnerabilityRecord>(),
            ProbeKind::Update => mem::size_of::<ravn_common::UpdateRecord>(),
        }
    }

    /// The event kind a well-formed frame from this probe normalizes to.
    pub fn event_kind(self) -> EventKind {
        match self {
            ProbeKind::ExecFs => EventKind::ExecFs,
            ProbeKind::Network => EventKind::Network,
            ProbeKind::System => EventKind::System,
            ProbeKind::Security => EventKind::Security,
            ProbeKind::Vulnerability => EventKind::Vulnerability,
            ProbeKind::Update => EventKind::Update,
        }
    }

    /// Index into dense per-probe tables.
    pub fn index(self) -> usize {
        match self {
            ProbeKind::ExecFs => 0,
            ProbeKind::Network => 1,
            ProbeKind::System => 2,
            ProbeKind::Security => 3,
            ProbeKind::Vulnerability => 4,
            ProbeKind::Update => 5,
        }
    }
}
