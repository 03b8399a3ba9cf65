//! Pipeline orchestration.
//!
//! The [`Agent`] owns the probe set, the queue, the analyzer and the store,
//! and drives the single cooperative event loop:
//! poll -> normalize -> enqueue -> analyze -> persist. Status is published
//! into a shared snapshot the TCP status server reads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use ravn_core::analyzer::{Analyzer, AnalyzerConfig, SystemClock};
use ravn_core::config::AgentConfig;
use ravn_core::error::{Error, Result};
use ravn_core::event::{wall_clock_ns, Event, QueueStats};
use ravn_core::normalize::{Normalizer, RawRecord};
use ravn_core::probe::ProbeKind;
use ravn_core::queue::EventQueue;
use ravn_core::shutdown::ShutdownToken;
use ravn_core::store::{EventStore, EventUpdate};

use crate::probes::ProbeRuntime;
use crate::ring::RecordSink;

/// Consecutive poll failures before a probe is faulted out of the set.
const PROBE_FAULT_THRESHOLD: u32 = 16;

/// Frames drained from one probe per loop iteration.
const POLL_BUDGET: usize = 256;

/// Events analyzed and persisted per loop iteration.
const DRAIN_BUDGET: usize = 1024;

/// Window over which the store write-failure rate is evaluated.
const WRITE_HEALTH_WINDOW: Duration = Duration::from_secs(30);

/// Orchestrator lifecycle. `Running -> Stopping` is the only legal exit
/// from `Running`; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Uninit,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

/// Analyzer counters exposed through the status document.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AnalyzerStatus {
    pub analyses: u64,
    pub threats: u64,
    pub baseline_established: bool,
    pub avg_events_per_minute: f64,
}

/// The read-only health document served on the status port.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub probes_loaded: usize,
    pub probes_attached: usize,
    pub queue: QueueStats,
    pub analyzer: AnalyzerStatus,
    pub uptime_seconds: u64,
    pub lost_enqueued: u64,
    pub lost_persisted: u64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            running: false,
            probes_loaded: 0,
            probes_attached: 0,
            queue: QueueStats::default(),
            analyzer: AnalyzerStatus::default(),
            uptime_seconds: 0,
            lost_enqueued: 0,
            lost_persisted: 0,
        }
    }
}

/// Rolling write-failure window. A closing window with more failures than
/// successes is a sustained failure and escalates to `Fatal`.
struct WriteHealth {
    window: Duration,
    window_start: Instant,
    attempts: u64,
    failures: u64,
}

impl WriteHealth {
    fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            attempts: 0,
            failures: 0,
        }
    }

    /// Record one write outcome. Returns true when the window that just
    /// closed showed a failure rate above 50%.
    fn record(&mut self, ok: bool) -> bool {
        let mut sustained = false;
        if self.window_start.elapsed() >= self.window {
            sustained = self.attempts > 0 && self.failures * 2 > self.attempts;
            self.window_start = Instant::now();
            self.attempts = 0;
            self.failures = 0;
        }
        self.attempts += 1;
        if !ok {
            self.failures += 1;
        }
        sustained
    }
}

/// The capability handed to ring consumers: normalize the frame and offer it
/// to the queue. No back-pointer to the agent.
struct PipelineSink<'a> {
    normalizer: &'a mut Normalizer,
    queue: &'a EventQueue,
    lost_enqueued: &'a mut u64,
}

impl RecordSink for PipelineSink<'_> {
    fn deliver(&mut self, record: &RawRecord<'_>) {
        let event = self.normalizer.normalize(record);
        if let Err(Error::Full) = self.queue.enqueue(event) {
            *self.lost_enqueued += 1;
        }
    }
}

/// Owns the pipeline and its lifecycle.
pub struct Agent {
    config: AgentConfig,
    state: AgentState,
    store: EventStore,
    analyzer: Analyzer,
    queue: Arc<EventQueue>,
    normalizer: Normalizer,
    probes: Vec<ProbeRuntime>,
    token: ShutdownToken,
    status: Arc<RwLock<StatusSnapshot>>,
    started_at: Instant,
    last_baseline_sec: i64,
    lost_enqueued: u64,
    lost_persisted: u64,
    write_health: WriteHealth,
}

impl Agent {
    /// `Uninit -> Initialized`: open the store (creating the schema),
    /// activate the analyzer, build the queue and the probe descriptors.
    pub fn init(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let store = EventStore::open(&config.store_path)?;
        let mut analyzer =
            Analyzer::new(AnalyzerConfig::from(&config), Box::new(SystemClock));
        analyzer.activate()?;
        let queue = Arc::new(EventQueue::new(config.queue_capacity, config.queue_overflow));
        let probes = ProbeKind::ALL
            .iter()
            .map(|&kind| ProbeRuntime::new(kind, &config.probe_object_dir))
            .collect();

        info!(store = %config.store_path.display(), "agent initialized");
        Ok(Self {
            config,
            state: AgentState::Initialized,
            store,
            analyzer,
            queue,
            normalizer: Normalizer::new(),
            probes,
            token: ShutdownToken::new(),
            status: Arc::new(RwLock::new(StatusSnapshot::default())),
            started_at: Instant::now(),
            last_baseline_sec: 0,
            lost_enqueued: 0,
            lost_persisted: 0,
            write_health: WriteHealth::new(WRITE_HEALTH_WINDOW),
        })
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// The shutdown token observed by the loop, the consumers and the queue.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// Shared snapshot handle for the status server.
    pub fn status_handle(&self) -> Arc<RwLock<StatusSnapshot>> {
        Arc::clone(&self.status)
    }

    /// `Initialized -> Running`: attach every probe, best-effort. A probe
    /// that fails to attach is logged and skipped; the rest continue.
    pub fn start(&mut self) -> Result<()> {
        if self.state != AgentState::Initialized {
            return Err(Error::InvalidState("agent is not Initialized"));
        }
        for probe in &mut self.probes {
            let kind = probe.descriptor.kind;
            match probe.attach() {
                Ok(()) => info!(probe = kind.name(), "probe attached"),
                Err(e) => warn!(probe = kind.name(), error = %e, "probe attach failed, continuing"),
            }
        }
        let attached = self.probes.iter().filter(|p| p.descriptor.attached).count();
        info!(attached, total = self.probes.len(), "agent running");
        self.state = AgentState::Running;
        Ok(())
    }

    /// The event loop. Returns after a graceful stop; the shutdown token is
    /// the only way out besides a fatal condition.
    pub async fn run(&mut self) -> Result<()> {
        if self.state != AgentState::Running {
            return Err(Error::InvalidState("agent is not Running"));
        }
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));

        while !self.token.is_signalled() {
            match self.tick() {
                Ok(()) => {}
                Err(Error::ShuttingDown) => break,
                Err(Error::Interrupted) => continue,
                Err(Error::Fatal(msg)) => {
                    error!(reason = %msg, "fatal pipeline condition");
                    break;
                }
                Err(e) => warn!(error = %e, "pipeline iteration failed"),
            }
            self.refresh_status().await;
            tokio::time::sleep(poll_interval).await;
        }

        self.stop().await
    }

    /// One loop iteration: poll every live probe, drain the queue, and run
    /// the baseline step when a second has elapsed.
    fn tick(&mut self) -> Result<()> {
        self.poll_probes()?;
        self.drain_queue(DRAIN_BUDGET)?;
        self.maybe_baseline_step()?;
        Ok(())
    }

    fn poll_probes(&mut self) -> Result<()> {
        let Self {
            probes,
            normalizer,
            queue,
            lost_enqueued,
            token,
            ..
        } = self;
        let queue: &EventQueue = queue;
        let mut sink = PipelineSink {
            normalizer,
            queue,
            lost_enqueued,
        };

        for probe in probes.iter_mut() {
            if probe.faulted {
                continue;
            }
            let Some(consumer) = probe.consumer.as_mut() else {
                continue;
            };
            match consumer.poll(POLL_BUDGET, token, &mut sink) {
                Ok(_) => probe.consecutive_errors = 0,
                Err(Error::ShuttingDown) => return Err(Error::ShuttingDown),
                Err(Error::Interrupted) => continue,
                Err(e) => {
                    probe.consecutive_errors += 1;
                    if probe.consecutive_errors >= PROBE_FAULT_THRESHOLD {
                        probe.faulted = true;
                        warn!(
                            probe = probe.descriptor.kind.name(),
                            error = %e,
                            failures = probe.consecutive_errors,
                            "probe faulted, excluded from polling"
                        );
                    } else {
                        debug!(probe = probe.descriptor.kind.name(), error = %e, "poll failed");
                    }
                }
            }
        }
        Ok(())
    }

    fn drain_queue(&mut self, budget: usize) -> Result<()> {
        for _ in 0..budget {
            let Some(event) = self.queue.try_dequeue() else {
                break;
            };
            self.process_event(event)?;
        }
        Ok(())
    }

    /// Persist, analyze and mark one event. Persistence failures never stop
    /// the analysis; they are counted and fed to the write-health window.
    fn process_event(&mut self, mut event: Event) -> Result<()> {
        let persisted = match self.store.create_event(&event) {
            Ok(id) => {
                event.id = id;
                self.note_write(true)?;
                true
            }
            Err(e) => {
                self.lost_persisted += 1;
                debug!(error = %e, "event persist failed");
                self.note_write(false)?;
                false
            }
        };

        match self.analyzer.analyze(&event) {
            Ok(result) => {
                if result.is_threat {
                    warn!(
                        score = result.threat_score,
                        level = ?result.threat_level,
                        pid = event.pid,
                        comm = %event.comm,
                        "threat detected"
                    );
                }
                if persisted {
                    match self.store.create_score(&result) {
                        Ok(()) => self.note_write(true)?,
                        Err(e) => {
                            debug!(error = %e, "score persist failed");
                            self.note_write(false)?;
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "analysis failed"),
        }

        self.queue.mark_processed(&mut event);
        if persisted {
            let update = EventUpdate {
                processed: Some(true),
                severity: None,
            };
            match self.store.update_event(event.id, &update) {
                Ok(()) => self.note_write(true)?,
                Err(e) => {
                    debug!(error = %e, id = event.id, "processed-flag update failed");
                    self.note_write(false)?;
                }
            }
        }
        Ok(())
    }

    fn note_write(&mut self, ok: bool) -> Result<()> {
        if self.write_health.record(ok) {
            return Err(Error::Fatal("sustained store write failures".into()));
        }
        Ok(())
    }

    fn maybe_baseline_step(&mut self) -> Result<()> {
        let now_sec = (wall_clock_ns() / 1_000_000_000) as i64;
        if self.last_baseline_sec == 0 {
            self.last_baseline_sec = now_sec;
            return Ok(());
        }
        if now_sec == self.last_baseline_sec {
            return Ok(());
        }
        let sample = self.analyzer.baseline_step(now_sec)?;
        match self.store.create_baseline_score(sample.ts_sec, sample.z_score) {
            Ok(()) => self.note_write(true)?,
            Err(e) => {
                debug!(error = %e, "baseline persist failed");
                self.note_write(false)?;
            }
        }
        self.last_baseline_sec = now_sec;
        Ok(())
    }

    /// `-> Stopping -> Stopped`: detach probes, drain the backlog within
    /// the grace budget (the remainder is counted lost), release the
    /// analyzer.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == AgentState::Stopped {
            return Ok(());
        }
        self.state = AgentState::Stopping;
        info!(pending = self.queue.len(), "stopping pipeline");

        for probe in &mut self.probes {
            probe.detach();
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_grace_ms);
        while !self.queue.is_empty() {
            if Instant::now() >= deadline {
                let mut remainder = 0u64;
                while self.queue.try_dequeue().is_some() {
                    remainder += 1;
                }
                self.lost_enqueued += remainder;
                warn!(remainder, "shutdown grace expired, dropping backlog");
                break;
            }
            if let Err(e) = self.drain_queue(DRAIN_BUDGET) {
                warn!(error = %e, "drain failed during shutdown");
                let mut remainder = 0u64;
                while self.queue.try_dequeue().is_some() {
                    remainder += 1;
                }
                self.lost_enqueued += remainder;
                break;
            }
            tokio::task::yield_now().await;
        }

        self.analyzer.delete();
        self.state = AgentState::Stopped;
        self.refresh_status().await;
        info!(
            lost_enqueued = self.lost_enqueued,
            lost_persisted = self.lost_persisted,
            "pipeline stopped"
        );
        Ok(())
    }

    async fn refresh_status(&self) {
        let snapshot = self.snapshot();
        *self.status.write().await = snapshot;
    }

    /// Point-in-time view of the pipeline's health and counters.
    pub fn snapshot(&self) -> StatusSnapshot {
        let stats = self.analyzer.stats();
        StatusSnapshot {
            running: self.state == AgentState::Running,
            probes_loaded: self.probes.iter().filter(|p| p.descriptor.loaded).count(),
            probes_attached: self
                .probes
                .iter()
                .filter(|p| p.descriptor.attached)
                .count(),
            queue: self.queue.stats(),
            analyzer: AnalyzerStatus {
                analyses: stats.analyses,
                threats: stats.threats,
                baseline_established: self.analyzer.baseline_established(),
                avg_events_per_minute: self.analyzer.avg_events_per_minute(),
            },
            uptime_seconds: self.started_at.elapsed().as_secs(),
            lost_enqueued: self.lost_enqueued,
            lost_persisted: self.lost_persisted,
        }
    }
}
