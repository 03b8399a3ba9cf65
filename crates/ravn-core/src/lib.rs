//! RAVN event pipeline core.
//!
//! Events are the fundamental data unit flowing through RAVN. They originate
//! from kernel probes attached to tracepoints and kprobes, arrive as
//! fixed-layout frames over per-probe ring buffers, and are normalized into a
//! single canonical [`event::Event`]. From there the pipeline hands them
//! through a bounded [`queue::EventQueue`] to the [`analyzer::Analyzer`],
//! which scores each event and maintains a rolling rate baseline, and to the
//! [`store::EventStore`], which persists events and scores to SQLite.
//!
//! The orchestration loop, probe management and status surface live in the
//! `ravn-agent` crate; this crate is deliberately free of eBPF and socket
//! concerns so the whole pipeline is testable in-process.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod event;
pub mod normalize;
pub mod probe;
pub mod queue;
pub mod shutdown;
pub mod store;

pub use error::{Error, Result};
pub use event::{AnalysisResult, Event, EventKind, QueueStats, Severity, ThreatLevel};
pub use probe::ProbeKind;
