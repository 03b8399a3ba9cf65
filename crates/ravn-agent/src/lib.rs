//! RAVN agent orchestration.
//!
//! Ties the probe set, ring consumers, normalizer, queue, analyzer and store
//! from `ravn-core` into a single event loop, and exposes the status surface
//! external consumers read.

pub mod agent;
pub mod probes;
pub mod ring;
pub mod status;

pub use agent::{Agent, AgentState, StatusSnapshot};
