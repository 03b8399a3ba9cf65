//! Agent configuration and TOML parsing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::queue::OverflowPolicy;

/// Top-level RAVN configuration, loaded from a TOML file. Every field is
/// optional in the file; defaults match a single-host deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Path to the embedded event store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Directory holding the compiled probe objects (`core_*.bpf.o`).
    #[serde(default = "default_probe_object_dir")]
    pub probe_object_dir: PathBuf,

    /// Bounded queue size between the normalizer and the analyzer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// What to do when the queue is full.
    #[serde(default)]
    pub queue_overflow: OverflowPolicy,

    /// Rolling baseline window length in seconds.
    #[serde(default = "default_baseline_window_seconds")]
    pub baseline_window_seconds: usize,

    /// Non-zero samples required before the baseline is established.
    #[serde(default = "default_baseline_min_samples")]
    pub baseline_min_samples: usize,

    /// Anomaly score at or above which an event is anomalous (once the
    /// baseline is established).
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,

    /// Threat score at or above which an event is a threat.
    #[serde(default = "default_threat_threshold")]
    pub threat_threshold: f64,

    /// Ring poll cadence of the orchestrator loop.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Budget for draining the queue after shutdown is requested.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// TCP address serving the JSON status snapshot.
    #[serde(default = "default_status_bind_addr")]
    pub status_bind_addr: String,

    /// Log filter used when RAVN_LOG is not set (trace|debug|info|warn|error).
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./ravn.db")
}

fn default_probe_object_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

fn default_queue_capacity() -> usize {
    65_536
}

fn default_baseline_window_seconds() -> usize {
    60
}

fn default_baseline_min_samples() -> usize {
    5
}

fn default_anomaly_threshold() -> f64 {
    2.0
}

fn default_threat_threshold() -> f64 {
    70.0
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_status_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            probe_object_dir: default_probe_object_dir(),
            queue_capacity: default_queue_capacity(),
            queue_overflow: OverflowPolicy::default(),
            baseline_window_seconds: default_baseline_window_seconds(),
            baseline_min_samples: default_baseline_min_samples(),
            anomaly_threshold: default_anomaly_threshold(),
            threat_threshold: default_threat_threshold(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            status_bind_addr: default_status_bind_addr(),
            log_level: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidArgument(format!("reading {}: {e}", path.display())))?;
        let config: AgentConfig = toml::from_str(&content)
            .map_err(|e| Error::InvalidArgument(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidArgument("queue_capacity must be > 0".into()));
        }
        if self.baseline_window_seconds == 0 {
            return Err(Error::InvalidArgument(
                "baseline_window_seconds must be > 0".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.threat_threshold) {
            return Err(Error::InvalidArgument(
                "threat_threshold must be within [0, 100]".into(),
            ));
        }
        if !(0.0..=10.0).contains(&self.anomaly_threshold) {
            return Err(Error::InvalidArgument(
                "anomaly_threshold must be within [0, 10]".into(),
            ));
        }
        if self.status_bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::InvalidArgument(format!(
                "status_bind_addr '{}' is not a socket address",
                self.status_bind_addr
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.store_path, PathBuf::from("./ravn.db"));
        assert_eq!(config.queue_capacity, 65_536);
        assert_eq!(config.queue_overflow, OverflowPolicy::Reject);
        assert_eq!(config.baseline_window_seconds, 60);
        assert_eq!(config.baseline_min_samples, 5);
        assert!((config.anomaly_threshold - 2.0).abs() < f64::EPSILON);
        assert!((config.threat_threshold - 70.0).abs() < f64::EPSILON);
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.shutdown_grace_ms, 5_000);
        assert_eq!(config.status_bind_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
store_path = "/var/lib/ravn/ravn.db"
queue_capacity = 1024
queue_overflow = "drop_oldest"
threat_threshold = 80.0
"#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store_path, PathBuf::from("/var/lib/ravn/ravn.db"));
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.queue_overflow, OverflowPolicy::DropOldest);
        assert!((config.threat_threshold - 80.0).abs() < f64::EPSILON);
        // Untouched fields keep their defaults.
        assert_eq!(config.baseline_window_seconds, 60);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.queue_capacity, AgentConfig::default().queue_capacity);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let config = AgentConfig::load(Path::new("/nonexistent/ravn.toml")).unwrap();
        assert_eq!(config.queue_capacity, 65_536);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = AgentConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_bind_addr() {
        let config = AgentConfig {
            status_bind_addr: "not-an-addr".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
