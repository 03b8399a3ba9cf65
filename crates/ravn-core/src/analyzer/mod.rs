//! Anomaly and threat scoring engine.
//!
//! One analyzer produces both outputs for every event: a weighted anomaly
//! score over frequency/pattern/context sub-scores, and a threat score that
//! adds a per-kind severity component. A rolling per-second baseline feeds
//! the anomaly gate and the rate z-scores persisted alongside event scores.
//!
//! Scoring is deliberately free of I/O and allocation beyond the result
//! itself; the orchestrator calls [`Analyzer::analyze`] on its hot path.

mod baseline;
mod recommend;

pub use baseline::BaselineSample;

use chrono::{DateTime, Datelike, Local, Timelike, Weekday};
use serde::Serialize;

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::event::{AnalysisResult, Event, EventKind, Severity, ThreatLevel};

use baseline::Baseline;

/// Source of local time for context scoring. The analyzer is handed its
/// clock at construction so tests can pin the hour and weekday.
pub trait Clock: Send + Sync {
    fn now_local(&self) -> DateTime<Local>;
}

/// The host clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_local(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Analyzer lifecycle; `analyze` is only legal in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerState {
    Created,
    Ready,
    Deleted,
}

/// Scoring configuration, extracted from the agent configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub anomaly_threshold: f64,
    pub threat_threshold: f64,
    pub window_seconds: usize,
    pub min_samples: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: 2.0,
            threat_threshold: 70.0,
            window_seconds: 60,
            min_samples: 5,
        }
    }
}

impl From<&AgentConfig> for AnalyzerConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            anomaly_threshold: config.anomaly_threshold,
            threat_threshold: config.threat_threshold,
            window_seconds: config.baseline_window_seconds,
            min_samples: config.baseline_min_samples,
        }
    }
}

/// Counters exposed through the status surface.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AnalyzerStats {
    pub analyses: u64,
    pub threats: u64,
    pub anomalies: u64,
}

/// Scores events and maintains the rolling baseline. Owned exclusively by
/// the analysis side of the pipeline; nothing here is shared.
pub struct Analyzer {
    state: AnalyzerState,
    config: AnalyzerConfig,
    clock: Box<dyn Clock>,
    baseline: Baseline,
    stats: AnalyzerStats,
    /// Events seen since the last baseline step.
    second_count: u64,
    /// Exec events seen since the last baseline step.
    exec_count: u64,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig, clock: Box<dyn Clock>) -> Self {
        let baseline = Baseline::new(config.window_seconds, config.min_samples);
        Self {
            state: AnalyzerState::Created,
            config,
            clock,
            baseline,
            stats: AnalyzerStats::default(),
            second_count: 0,
            exec_count: 0,
        }
    }

    pub fn state(&self) -> AnalyzerState {
        self.state
    }

    /// Transition `Created -> Ready`.
    pub fn activate(&mut self) -> Result<()> {
        if self.state != AnalyzerState::Created {
            return Err(Error::InvalidState("analyzer is not in Created"));
        }
        self.state = AnalyzerState::Ready;
        Ok(())
    }

    /// Terminal transition; clears statistics and baseline state.
    pub fn delete(&mut self) {
        self.state = AnalyzerState::Deleted;
        self.stats = AnalyzerStats::default();
        self.baseline.reset();
        self.second_count = 0;
        self.exec_count = 0;
    }

    /// Score one event. Non-blocking and allocation-bounded.
    pub fn analyze(&mut self, event: &Event) -> Result<AnalysisResult> {
        if self.state != AnalyzerState::Ready {
            return Err(Error::InvalidState("analyzer is not Ready"));
        }

        self.second_count += 1;
        if event.kind == EventKind::ExecFs {
            self.exec_count += 1;
        }

        let frequency = frequency_score(event);
        let pattern = pattern_score(event);
        let context = context_score(self.clock.as_ref());

        let anomaly_score =
            (frequency * 0.4 + pattern * 0.3 + context * 0.3).clamp(0.0, 10.0);
        let is_anomaly =
            anomaly_score >= self.config.anomaly_threshold && self.baseline.established();

        let severity_component = severity_component(event.kind);
        let threat_score = (severity_component * 0.3
            + frequency * 10.0 * 0.2
            + pattern * 10.0 * 0.3
            + context * 10.0 * 0.2)
            .clamp(0.0, 100.0);
        let threat_level = ThreatLevel::from_score(threat_score);
        let is_threat = threat_score >= self.config.threat_threshold;

        let recommendations = recommend::generate(threat_level, event.kind);
        let confidence = self.confidence(event, frequency, pattern, context);

        self.stats.analyses += 1;
        if is_threat {
            self.stats.threats += 1;
        }
        if is_anomaly {
            self.stats.anomalies += 1;
        }

        Ok(AnalysisResult {
            event_id: event.id,
            timestamp_ns: event.timestamp_ns,
            anomaly_score,
            threat_score,
            is_anomaly,
            is_threat,
            threat_level,
            recommendations,
            confidence,
        })
    }

    /// Close out the per-second counters for `ts_sec`: store the rate in
    /// the rolling window and return the z-score sample to persist.
    pub fn baseline_step(&mut self, ts_sec: i64) -> Result<BaselineSample> {
        if self.state != AnalyzerState::Ready {
            return Err(Error::InvalidState("analyzer is not Ready"));
        }
        let count = std::mem::take(&mut self.second_count);
        let execs = std::mem::take(&mut self.exec_count);
        let rate = count as f64;
        let exec_ratio = if count > 0 {
            execs as f64 / count as f64
        } else {
            0.0
        };
        let z_score = self.baseline.record_second(ts_sec, rate, exec_ratio);
        Ok(BaselineSample { ts_sec, z_score })
    }

    pub fn baseline_established(&self) -> bool {
        self.baseline.established()
    }

    /// Mean event rate over the window, scaled to events per minute.
    pub fn avg_events_per_minute(&self) -> f64 {
        self.baseline.mean_rate() * 60.0
    }

    pub fn stats(&self) -> AnalyzerStats {
        self.stats
    }

    /// Confidence grows with the number of contributing signals and with an
    /// established baseline.
    fn confidence(&self, event: &Event, frequency: f64, pattern: f64, context: f64) -> f64 {
        let mut confidence: f64 = 40.0;
        for sub in [frequency, pattern, context] {
            if sub > 0.0 {
                confidence += 10.0;
            }
        }
        if self.baseline.established() {
            confidence += 20.0;
        }
        if event.severity >= Severity::High {
            confidence += 10.0;
        }
        confidence.clamp(0.0, 100.0)
    }
}

/// Paths whose execution carries an elevated frequency prior.
const SUSPICIOUS_EXEC_PREFIXES: &[&str] = &["/tmp/", "/dev/shm/", "/proc/"];

/// Process names associated with scanning and exfiltration tooling.
const SUSPICIOUS_COMMS: &[&str] = &["nc", "netcat", "nmap", "masscan"];

/// Credential files whose access is a strong pattern signal.
const SENSITIVE_FILES: &[&str] = &["/etc/passwd", "/etc/shadow", "/etc/sudoers"];

fn frequency_score(event: &Event) -> f64 {
    let score: f64 = match event.kind {
        EventKind::Security => 2.0,
        EventKind::Vulnerability => 3.0,
        EventKind::ExecFs => {
            if SUSPICIOUS_EXEC_PREFIXES
                .iter()
                .any(|p| event.filename.starts_with(p))
            {
                1.5
            } else {
                0.0
            }
        }
        EventKind::Network => 1.0,
        _ => 0.5,
    };
    score.clamp(0.0, 10.0)
}

fn pattern_score(event: &Event) -> f64 {
    let mut score: f64 = 0.0;
    if SUSPICIOUS_COMMS.iter().any(|c| event.comm == *c) {
        score += 2.5;
    }
    if event.kind == EventKind::ExecFs
        && SENSITIVE_FILES.iter().any(|f| event.filename.contains(f))
    {
        score += 2.0;
    }
    if event.uid == 0 {
        score += 1.0;
    }
    score.clamp(0.0, 10.0)
}

fn context_score(clock: &dyn Clock) -> f64 {
    let now = clock.now_local();
    let mut score: f64 = 0.0;
    let hour = now.hour();
    if !(6..=22).contains(&hour) {
        score += 1.5;
    }
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        score += 1.0;
    }
    score.clamp(0.0, 10.0)
}

fn severity_component(kind: EventKind) -> f64 {
    match kind {
        EventKind::Vulnerability => 80.0,
        EventKind::Security => 60.0,
        EventKind::System => 50.0,
        EventKind::Network => 40.0,
        EventKind::ExecFs => 30.0,
        EventKind::Update => 20.0,
        EventKind::Unknown => 10.0,
    }
}
