//! Probe loading and attachment.
//!
//! Each [`ProbeKind`] maps to one compiled eBPF object carrying a handful of
//! tracepoint/kprobe programs and a single ring-buffer map. Attachment is
//! best-effort and idempotent: a probe that fails to load or attach is
//! recorded and skipped, never fatal to the rest of the set.

use std::path::{Path, PathBuf};

use aya::programs::{KProbe, TracePoint};
use aya::Ebpf;
use tracing::{info, warn};

use ravn_core::error::{Error, Result};
use ravn_core::probe::ProbeKind;

use crate::ring::{EbpfStream, RecordStream, RingConsumer};

/// Preferred ring-buffer map name; probes that do not expose it fall back to
/// their per-kind name.
pub const PREFERRED_MAP_NAME: &str = "events";

/// Where a single eBPF program hooks into the kernel.
#[derive(Debug, Clone, Copy)]
pub enum AttachPoint {
    Tracepoint {
        category: &'static str,
        name: &'static str,
    },
    Kprobe {
        function: &'static str,
    },
}

/// One program inside a probe object and its attach point.
#[derive(Debug, Clone, Copy)]
pub struct AttachSpec {
    pub program: &'static str,
    pub point: AttachPoint,
}

/// Programs expected inside each probe object.
pub fn attach_specs(kind: ProbeKind) -> &'static [AttachSpec] {
    match kind {
        ProbeKind::ExecFs => &[
            AttachSpec {
                program: "ravn_execve",
                point: AttachPoint::Tracepoint {
                    category: "syscalls",
                    name: "sys_enter_execve",
                },
            },
            AttachSpec {
                program: "ravn_openat",
                point: AttachPoint::Tracepoint {
                    category: "syscalls",
                    name: "sys_enter_openat",
                },
            },
        ],
        ProbeKind::Network => &[
            AttachSpec {
                program: "ravn_tcp_connect",
                point: AttachPoint::Kprobe {
                    function: "tcp_v4_connect",
                },
            },
            AttachSpec {
                program: "ravn_sendto",
                point: AttachPoint::Tracepoint {
                    category: "syscalls",
                    name: "sys_enter_sendto",
                },
            },
        ],
        ProbeKind::System => &[
            AttachSpec {
                program: "ravn_setuid",
                point: AttachPoint::Tracepoint {
                    category: "syscalls",
                    name: "sys_enter_setuid",
                },
            },
            AttachSpec {
                program: "ravn_ptrace",
                point: AttachPoint::Tracepoint {
                    category: "syscalls",
                    name: "sys_enter_ptrace",
                },
            },
        ],
        ProbeKind::Security => &[AttachSpec {
            program: "ravn_commit_creds",
            point: AttachPoint::Kprobe {
                function: "commit_creds",
            },
        }],
        ProbeKind::Vulnerability => &[AttachSpec {
            program: "ravn_mprotect",
            point: AttachPoint::Tracepoint {
                category: "syscalls",
                name: "sys_enter_mprotect",
            },
        }],
        ProbeKind::Update => &[AttachSpec {
            program: "ravn_pkg_exec",
            point: AttachPoint::Tracepoint {
                category: "syscalls",
                name: "sys_enter_execve",
            },
        }],
    }
}

/// Load/attach state for one probe. Owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProbeDescriptor {
    pub kind: ProbeKind,
    pub object_path: PathBuf,
    pub loaded: bool,
    pub attached: bool,
    pub ring_map_name: &'static str,
}

impl ProbeDescriptor {
    pub fn new(kind: ProbeKind, object_dir: &Path) -> Self {
        Self {
            kind,
            object_path: object_dir.join(kind.object_file()),
            loaded: false,
            attached: false,
            ring_map_name: kind.ring_map_name(),
        }
    }
}

/// A probe descriptor plus its live kernel resources once attached.
pub struct ProbeRuntime {
    pub descriptor: ProbeDescriptor,
    /// Keeps the programs and maps alive while attached.
    ebpf: Option<Ebpf>,
    pub consumer: Option<RingConsumer>,
    /// Consecutive poll failures; reset on success.
    pub consecutive_errors: u32,
    /// Excluded from polling until a manual restart.
    pub faulted: bool,
}

impl ProbeRuntime {
    pub fn new(kind: ProbeKind, object_dir: &Path) -> Self {
        Self {
            descriptor: ProbeDescriptor::new(kind, object_dir),
            ebpf: None,
            consumer: None,
            consecutive_errors: 0,
            faulted: false,
        }
    }

    /// Build a runtime around an arbitrary record stream, bypassing the
    /// kernel. Used by tests and replay tooling.
    pub fn with_stream(kind: ProbeKind, stream: Box<dyn RecordStream>) -> Self {
        let mut runtime = Self::new(kind, Path::new("."));
        runtime.descriptor.loaded = true;
        runtime.descriptor.attached = true;
        runtime.consumer = Some(RingConsumer::new(kind, stream));
        runtime
    }

    /// Load the probe object, attach its programs, and subscribe to its
    /// ring map. Idempotent: calling on an attached probe is a no-op.
    pub fn attach(&mut self) -> Result<()> {
        if self.descriptor.attached {
            return Ok(());
        }

        let kind = self.descriptor.kind;
        let path = &self.descriptor.object_path;
        let mut ebpf = Ebpf::load_file(path).map_err(|e| {
            Error::ProbeFault(format!("loading {}: {e}", path.display()))
        })?;
        self.descriptor.loaded = true;

        for spec in attach_specs(kind) {
            attach_program(&mut ebpf, spec)?;
            info!(probe = kind.name(), program = spec.program, "attached");
        }

        let consumer = subscribe(&mut ebpf, kind)?;
        self.ebpf = Some(ebpf);
        self.consumer = Some(consumer);
        self.descriptor.attached = true;
        Ok(())
    }

    /// Detach programs and release the ring subscription. Dropping the
    /// `Ebpf` handle detaches every program it loaded.
    pub fn detach(&mut self) {
        self.consumer = None;
        if self.ebpf.take().is_some() {
            info!(probe = self.descriptor.kind.name(), "detached");
        }
        self.descriptor.attached = false;
        self.descriptor.loaded = false;
    }

    /// Clear the fault latch so the probe is polled again.
    pub fn restart(&mut self) {
        self.faulted = false;
        self.consecutive_errors = 0;
    }
}

fn attach_program(ebpf: &mut Ebpf, spec: &AttachSpec) -> Result<()> {
    let program = ebpf
        .program_mut(spec.program)
        .ok_or_else(|| Error::ProbeFault(format!("program '{}' not found", spec.program)))?;

    match spec.point {
        AttachPoint::Tracepoint { category, name } => {
            let tracepoint: &mut TracePoint = program.try_into().map_err(|e| {
                Error::ProbeFault(format!("'{}' is not a tracepoint: {e}", spec.program))
            })?;
            tracepoint
                .load()
                .map_err(|e| Error::ProbeFault(format!("loading '{}': {e}", spec.program)))?;
            tracepoint.attach(category, name).map_err(|e| {
                Error::ProbeFault(format!("attaching '{}' to {category}/{name}: {e}", spec.program))
            })?;
        }
        AttachPoint::Kprobe { function } => {
            let kprobe: &mut KProbe = program.try_into().map_err(|e| {
                Error::ProbeFault(format!("'{}' is not a kprobe: {e}", spec.program))
            })?;
            kprobe
                .load()
                .map_err(|e| Error::ProbeFault(format!("loading '{}': {e}", spec.program)))?;
            kprobe.attach(function, 0).map_err(|e| {
                Error::ProbeFault(format!("attaching '{}' to {function}: {e}", spec.program))
            })?;
        }
    }
    Ok(())
}

/// Bind to the probe's ring-buffer map, preferring the canonical name and
/// falling back to the per-kind name.
fn subscribe(ebpf: &mut Ebpf, kind: ProbeKind) -> Result<RingConsumer> {
    let map = match ebpf.take_map(PREFERRED_MAP_NAME) {
        Some(map) => map,
        None => {
            let map = ebpf.take_map(kind.ring_map_name()).ok_or_else(|| {
                Error::ProbeFault(format!(
                    "no ring map '{}' or '{}' in {} object",
                    PREFERRED_MAP_NAME,
                    kind.ring_map_name(),
                    kind.name()
                ))
            })?;
            warn!(
                probe = kind.name(),
                map = kind.ring_map_name(),
                "probe uses legacy ring map name"
            );
            map
        }
    };
    let ring = aya::maps::RingBuf::try_from(map).map_err(|e| {
        Error::ProbeFault(format!("opening ring map for {}: {e}", kind.name()))
    })?;
    Ok(RingConsumer::new(kind, Box::new(EbpfStream::new(ring))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_paths() {
        let desc = ProbeDescriptor::new(ProbeKind::Network, Path::new("/etc/ravn/artifacts"));
        assert_eq!(
            desc.object_path,
            PathBuf::from("/etc/ravn/artifacts/core_network.bpf.o")
        );
        assert_eq!(desc.ring_map_name, "network_events");
        assert!(!desc.loaded);
        assert!(!desc.attached);
    }

    #[test]
    fn test_every_kind_has_attach_specs() {
        for kind in ProbeKind::ALL {
            assert!(!attach_specs(kind).is_empty(), "{kind:?} has no programs");
        }
    }

    #[test]
    fn test_attach_missing_object_is_probe_fault() {
        let mut runtime = ProbeRuntime::new(ProbeKind::ExecFs, Path::new("/nonexistent"));
        let err = runtime.attach().unwrap_err();
        assert!(matches!(err, Error::ProbeFault(_)));
        assert!(!runtime.descriptor.loaded);
        assert!(!runtime.descriptor.attached);
    }

    #[test]
    fn test_restart_clears_fault_latch() {
        let mut runtime = ProbeRuntime::new(ProbeKind::System, Path::new("."));
        runtime.faulted = true;
        runtime.consecutive_errors = 16;
        runtime.restart();
        assert!(!runtime.faulted);
        assert_eq!(runtime.consecutive_errors, 0);
    }
}
