#![no_std]

// ============================================================================
// RAVN - Shared Record Layouts
// ============================================================================
//
// This crate defines the exact telemetry payloads passed between the
// kernel-space eBPF probes and the user-space agent via eBPF ring buffers.
//
// CRITICAL CONSTRAINTS:
// - #![no_std]: No standard library usage allowed (eBPF kernel compatibility)
// - #[repr(C)]: All structs use C memory layout for deterministic alignment
//   across the eBPF VM and host architecture
// - Fixed-size only: No String, Vec, or any heap-allocated types
// - The first u32 of every record is the probe sub-type tag, so the consumer
//   can identify the variant before decoding the rest of the frame
// ============================================================================

/// Maximum length for process command name (matches Linux TASK_COMM_LEN).
pub const TASK_COMM_LEN: usize = 16;

/// Maximum length for file paths carried in records.
pub const MAX_PATH_LEN: usize = 256;

/// Maximum length for package names in update records.
pub const MAX_PACKAGE_LEN: usize = 128;

/// Hard upper bound on a single ring-buffer reservation. Frames larger than
/// this are dropped by the consumer as malformed.
pub const MAX_RECORD_LEN: usize = 4096;

// ---------------------------------------------------------------------------
// Sub-type tags (the leading u32 of each record)
// ---------------------------------------------------------------------------

/// exec/fs probe sub-types.
pub const EXECFS_EXEC: u32 = 1;
pub const EXECFS_OPEN: u32 = 2;

/// network probe sub-types.
pub const NET_CONNECT: u32 = 1;
pub const NET_ACCEPT: u32 = 2;
pub const NET_SEND: u32 = 3;
pub const NET_RECV: u32 = 4;

/// system (privilege transition) probe sub-types.
pub const SYS_SETUID: u32 = 1;
pub const SYS_SETGID: u32 = 2;
pub const SYS_PTRACE: u32 = 3;
pub const SYS_CAPSET: u32 = 4;

/// update probe sub-types (package manager / system update taxonomy).
pub const UPDATE_PACKAGE_MANAGER: u32 = 1;
pub const UPDATE_SYSTEM: u32 = 2;
pub const UPDATE_KERNEL: u32 = 4;
pub const UPDATE_SECURITY: u32 = 7;

/// Record-level severity values used by the security and vulnerability
/// probes. These match the agent's severity ladder one-for-one.
pub const RECORD_SEVERITY_LOW: u32 = 1;
pub const RECORD_SEVERITY_MEDIUM: u32 = 2;
pub const RECORD_SEVERITY_HIGH: u32 = 3;
pub const RECORD_SEVERITY_CRITICAL: u32 = 4;

// ---------------------------------------------------------------------------
// exec/fs telemetry (sys_enter_execve, sys_enter_openat)
// ---------------------------------------------------------------------------

/// Telemetry payload for process execution and file-open attempts.
///
/// Memory layout (with #[repr(C)]):
///   offset  0: sub_type     (4 bytes)
///   offset  4: pid          (4 bytes)
///   offset  8: tgid         (4 bytes)
///   offset 12: ppid         (4 bytes)
///   offset 16: uid          (4 bytes)
///   offset 20: gid          (4 bytes)
///   offset 24: timestamp_ns (8 bytes)
///   offset 32: comm         (16 bytes)
///   offset 48: filename     (256 bytes)
///   Total: 304 bytes
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ExecFsRecord {
    /// EXECFS_EXEC or EXECFS_OPEN.
    pub sub_type: u32,
    pub pid: u32,
    pub tgid: u32,
    pub ppid: u32,
    pub uid: u32,
    pub gid: u32,
    /// Monotonic clock at emission (bpf_ktime_get_ns).
    pub timestamp_ns: u64,
    /// Command name, null-padded fixed-size array.
    pub comm: [u8; TASK_COMM_LEN],
    /// Executed or opened path, null-padded fixed-size array.
    pub filename: [u8; MAX_PATH_LEN],
}

// ---------------------------------------------------------------------------
// network telemetry (tcp connect/accept, sendto/recvfrom)
// ---------------------------------------------------------------------------

/// Telemetry payload for network syscalls. Addresses are raw u32 in network
/// byte order; no std::net types are used.
///
/// Send records are only emitted for small payloads (<= 64 bytes), which are
/// the interesting ones for beacon detection; the consumer keeps the frame
/// verbatim in the event's raw snapshot.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NetworkRecord {
    /// NET_CONNECT, NET_ACCEPT, NET_SEND or NET_RECV.
    pub sub_type: u32,
    pub pid: u32,
    pub tgid: u32,
    pub uid: u32,
    pub gid: u32,
    /// Explicit padding so timestamp_ns lands on an 8-byte boundary.
    pub _pad: u32,
    pub timestamp_ns: u64,
    pub comm: [u8; TASK_COMM_LEN],
    /// Source IPv4 address (network byte order).
    pub saddr: u32,
    /// Destination IPv4 address (network byte order).
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
    /// Payload length for send/recv sub-types.
    pub bytes: u32,
    /// 1 = TCP, 2 = UDP.
    pub protocol: u8,
    /// Explicit tail padding so the struct size is a multiple of its
    /// 8-byte alignment with no compiler-inserted bytes.
    pub _pad2: [u8; 7],
}

// ---------------------------------------------------------------------------
// system telemetry (privilege transitions)
// ---------------------------------------------------------------------------

/// Telemetry payload for setuid/setgid/ptrace/capset.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SystemRecord {
    /// SYS_SETUID, SYS_SETGID, SYS_PTRACE or SYS_CAPSET.
    pub sub_type: u32,
    pub pid: u32,
    pub tgid: u32,
    pub uid: u32,
    pub gid: u32,
    /// Ptrace target, zero otherwise.
    pub target_pid: u32,
    /// Requested uid for SYS_SETUID, zero otherwise.
    pub new_uid: u32,
    /// Requested gid for SYS_SETGID, zero otherwise.
    pub new_gid: u32,
    pub timestamp_ns: u64,
    pub comm: [u8; TASK_COMM_LEN],
}

// ---------------------------------------------------------------------------
// security telemetry (kernel-side detections)
// ---------------------------------------------------------------------------

/// Telemetry payload for kernel-side security detections (port scans,
/// privilege escalation, suspicious processes, ...). The probe assigns both
/// the sub-type and the severity; the agent copies the severity through.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SecurityRecord {
    /// Detection taxonomy tag (1..=15).
    pub sub_type: u32,
    /// RECORD_SEVERITY_LOW..RECORD_SEVERITY_CRITICAL.
    pub severity: u32,
    pub pid: u32,
    pub tgid: u32,
    pub uid: u32,
    pub gid: u32,
    pub timestamp_ns: u64,
    pub comm: [u8; TASK_COMM_LEN],
    pub filename: [u8; MAX_PATH_LEN],
}

// ---------------------------------------------------------------------------
// vulnerability telemetry
// ---------------------------------------------------------------------------

/// Telemetry payload for vulnerability-exploit detections.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VulnerabilityRecord {
    pub sub_type: u32,
    /// RECORD_SEVERITY_LOW..RECORD_SEVERITY_CRITICAL.
    pub severity: u32,
    pub pid: u32,
    pub uid: u32,
    /// Numeric CVE identifier, zero if unknown.
    pub cve_id: u32,
    /// Non-zero if the exploit attempt appeared to succeed.
    pub success: u32,
    pub timestamp_ns: u64,
    pub comm: [u8; TASK_COMM_LEN],
}

// ---------------------------------------------------------------------------
// update telemetry (package manager / system update activity)
// ---------------------------------------------------------------------------

/// Telemetry payload for package and update activity.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct UpdateRecord {
    /// UPDATE_* taxonomy tag.
    pub sub_type: u32,
    /// 1 = pending, 2 = in progress, 3 = completed, 4 = failed, 5 = rollback.
    pub status: u32,
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    /// Non-zero when the update is security-relevant.
    pub security_update: u32,
    pub timestamp_ns: u64,
    pub comm: [u8; TASK_COMM_LEN],
    pub package_name: [u8; MAX_PACKAGE_LEN],
}

// ---------------------------------------------------------------------------
// Safe construction helpers
// ---------------------------------------------------------------------------

impl ExecFsRecord {
    /// Create a zeroed record (safe for eBPF stack allocation).
    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            sub_type: 0,
            pid: 0,
            tgid: 0,
            ppid: 0,
            uid: 0,
            gid: 0,
            timestamp_ns: 0,
            comm: [0u8; TASK_COMM_LEN],
            filename: [0u8; MAX_PATH_LEN],
        }
    }
}

impl NetworkRecord {
    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            sub_type: 0,
            pid: 0,
            tgid: 0,
            uid: 0,
            gid: 0,
            _pad: 0,
            timestamp_ns: 0,
            comm: [0u8; TASK_COMM_LEN],
            saddr: 0,
            daddr: 0,
            sport: 0,
            dport: 0,
            bytes: 0,
            protocol: 0,
            _pad2: [0u8; 7],
        }
    }
}

impl SystemRecord {
    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            sub_type: 0,
            pid: 0,
            tgid: 0,
            uid: 0,
            gid: 0,
            target_pid: 0,
            new_uid: 0,
            new_gid: 0,
            timestamp_ns: 0,
            comm: [0u8; TASK_COMM_LEN],
        }
    }
}

impl SecurityRecord {
    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            sub_type: 0,
            severity: RECORD_SEVERITY_LOW,
            pid: 0,
            tgid: 0,
            uid: 0,
            gid: 0,
            timestamp_ns: 0,
            comm: [0u8; TASK_COMM_LEN],
            filename: [0u8; MAX_PATH_LEN],
        }
    }
}

impl VulnerabilityRecord {
    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            sub_type: 0,
            severity: RECORD_SEVERITY_LOW,
            pid: 0,
            uid: 0,
            cve_id: 0,
            success: 0,
            timestamp_ns: 0,
            comm: [0u8; TASK_COMM_LEN],
        }
    }
}

impl UpdateRecord {
    #[inline(always)]
    pub const fn zeroed() -> Self {
        Self {
            sub_type: 0,
            status: 0,
            pid: 0,
            uid: 0,
            gid: 0,
            security_update: 0,
            timestamp_ns: 0,
            comm: [0u8; TASK_COMM_LEN],
            package_name: [0u8; MAX_PACKAGE_LEN],
        }
    }
}

// Safety: these types are plain-old-data with fixed layout, safe to share
// across threads and send between kernel and user space.
unsafe impl Sync for ExecFsRecord {}
unsafe impl Send for ExecFsRecord {}
unsafe impl Sync for NetworkRecord {}
unsafe impl Send for NetworkRecord {}
unsafe impl Sync for SystemRecord {}
unsafe impl Send for SystemRecord {}
unsafe impl Sync for SecurityRecord {}
unsafe impl Send for SecurityRecord {}
unsafe impl Sync for VulnerabilityRecord {}
unsafe impl Send for VulnerabilityRecord {}
unsafe impl Sync for UpdateRecord {}
unsafe impl Send for UpdateRecord {}
