//! Periodic telemetry sampler
//!
//! Each tick reads engine statistics through the attached session, derives the
//! bandwidth, buffer and bitrate series and pushes one sample into each
//! [`TimeSeriesBuffer`]. Every external call is isolated: a failure degrades a
//! single value (or the whole tick) and never stops the schedule.

use chrono::Local;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

use super::buffer::{Sample, TimeSeriesBuffer};
use super::buffered_ahead::{self, BufferMeasurement};
use super::schedule::{RepeatingSchedule, TickGuard};
use super::snapshot::{Diagnostic, DiagnosticSnapshot, round_to};
use crate::chart::{ChartEvent, ChartSink, Metric};
use crate::config::SamplerConfig;
use crate::engine::EngineStats;
use crate::errors::{PlayerError, PlayerResult};
use crate::session::StreamSession;
use crate::tracks::TrackController;

const IDLE_NO_SESSION: &str = "No stream session attached";
const IDLE_NO_STATS: &str = "Stream session cannot provide statistics";

/// What a single poll produced
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// No session, or statistics unsupported; nothing recorded
    Idle,
    /// Statistics query failed; the message is the current diagnostic
    Failed(String),
    Sampled(DiagnosticSnapshot),
    /// The schedule was stopped while this tick was in flight
    Discarded,
}

#[derive(Clone)]
struct SampleSource {
    session: StreamSession,
    tracks: Arc<TrackController>,
}

struct Measured {
    stats: EngineStats,
    buffer: Option<BufferMeasurement>,
    bitrate_bps: Option<f64>,
}

enum Reading {
    Idle(&'static str),
    Failed(String),
    Measured(Measured),
}

struct SamplerState {
    config: SamplerConfig,
    source: Option<SampleSource>,
    bandwidth: TimeSeriesBuffer,
    buffer: TimeSeriesBuffer,
    bitrate: TimeSeriesBuffer,
    diagnostic: Diagnostic,
}

impl SamplerState {
    fn series(&self, metric: Metric) -> &TimeSeriesBuffer {
        match metric {
            Metric::Bandwidth => &self.bandwidth,
            Metric::Buffer => &self.buffer,
            Metric::Bitrate => &self.bitrate,
        }
    }

    fn all_series_mut(&mut self) -> [&mut TimeSeriesBuffer; 3] {
        [&mut self.bandwidth, &mut self.buffer, &mut self.bitrate]
    }
}

struct SamplerInner {
    state: Mutex<SamplerState>,
    schedule: RepeatingSchedule,
    chart: Arc<dyn ChartSink>,
}

impl SamplerInner {
    async fn tick(&self, guard: Option<&TickGuard>) -> PollOutcome {
        let source = self.state.lock().source.clone();
        let reading = read(source).await;
        let (outcome, events) = self.record(reading, guard);
        self.deliver(events);
        outcome
    }

    /// Hand chart events to the sink; never called with the state lock held
    fn deliver(&self, events: Vec<ChartEvent>) {
        for event in &events {
            event.deliver(self.chart.as_ref());
        }
    }

    /// Store a reading unless its schedule run was cancelled meanwhile
    ///
    /// The guard is checked under the state lock, which `stop` also takes, so no
    /// sample lands after `stop` returns. The returned chart events are for the
    /// caller to deliver once the lock is released.
    fn record(&self, reading: Reading, guard: Option<&TickGuard>) -> (PollOutcome, Vec<ChartEvent>) {
        let mut state = self.state.lock();
        if guard.is_some_and(|g| !g.is_current()) {
            trace!("Discarding telemetry from a cancelled schedule");
            return (PollOutcome::Discarded, Vec::new());
        }

        let now = Local::now();
        match reading {
            Reading::Idle(reason) => {
                trace!("Telemetry idle: {}", reason);
                state.diagnostic = Diagnostic::Idle {
                    reason: reason.to_string(),
                };
                (PollOutcome::Idle, Vec::new())
            }
            Reading::Failed(message) => {
                warn!("Error getting stats: {}", message);
                state.diagnostic = Diagnostic::Failure {
                    time: now,
                    message: message.clone(),
                };
                (PollOutcome::Failed(message), Vec::new())
            }
            Reading::Measured(measured) => {
                let estimated_bandwidth = measured.stats.estimated_bandwidth.map(|bps| round_to(bps / 1e6, 2));
                let buffer_len = measured.buffer.map(|m| round_to(m.seconds, 2));
                let current_bitrate_kbps = measured.bitrate_bps.map(|bps| round_to(bps / 1000.0, 0));

                let events = vec![
                    state.bandwidth.append(Sample::new(now, estimated_bandwidth)),
                    state.buffer.append(Sample::new(now, buffer_len)),
                    state.bitrate.append(Sample::new(now, current_bitrate_kbps)),
                ];

                let snapshot = DiagnosticSnapshot {
                    time: now,
                    estimated_bandwidth,
                    buffer_len,
                    buffer_source: measured.buffer.map(|m| m.source),
                    current_bitrate_kbps,
                    stats_keys: measured
                        .stats
                        .available_fields()
                        .into_iter()
                        .map(String::from)
                        .collect(),
                    stats: measured.stats,
                };
                debug!(
                    "Telemetry sample: bandwidth={:?} Mbps, buffer={:?} s, bitrate={:?} kbps",
                    estimated_bandwidth, buffer_len, current_bitrate_kbps
                );
                state.diagnostic = Diagnostic::Snapshot(snapshot.clone());
                (PollOutcome::Sampled(snapshot), events)
            }
        }
    }
}

async fn read(source: Option<SampleSource>) -> Reading {
    let Some(source) = source else {
        return Reading::Idle(IDLE_NO_SESSION);
    };
    let Some(handle) = source.session.telemetry_handle() else {
        return Reading::Idle(IDLE_NO_STATS);
    };

    let stats = match handle.engine.get_stats().await {
        Ok(stats) => stats,
        Err(e) => return Reading::Failed(e.to_string()),
    };

    let buffer = buffered_ahead::measure(&handle);

    let bitrate_bps = source
        .tracks
        .live_active_variant()
        .and_then(|variant| variant.video_bandwidth.or(variant.bandwidth))
        .map(|bps| bps as f64)
        .or(stats.stream_bandwidth);

    Reading::Measured(Measured {
        stats,
        buffer,
        bitrate_bps,
    })
}

/// Polls the attached session on a fixed interval into three bounded series
///
/// Cheap to clone; clones share buffers and schedule.
#[derive(Clone)]
pub struct MetricsSampler {
    inner: Arc<SamplerInner>,
}

impl MetricsSampler {
    pub fn new(config: SamplerConfig, sink: Arc<dyn ChartSink>) -> PlayerResult<Self> {
        config.validate()?;
        let series = |metric| TimeSeriesBuffer::new(metric, config.max_points, sink.clone());
        Ok(Self {
            inner: Arc::new(SamplerInner {
                state: Mutex::new(SamplerState {
                    config,
                    source: None,
                    bandwidth: series(Metric::Bandwidth),
                    buffer: series(Metric::Buffer),
                    bitrate: series(Metric::Bitrate),
                    diagnostic: Diagnostic::Empty,
                }),
                schedule: RepeatingSchedule::new(),
                chart: sink.clone(),
            }),
        })
    }

    /// Sample from `session`, reading the active variant through `tracks`
    pub fn attach(&self, session: StreamSession, tracks: Arc<TrackController>) {
        debug!("Sampler attached to session {}", session.id());
        self.inner.state.lock().source = Some(SampleSource { session, tracks });
    }

    pub fn detach(&self) {
        self.inner.state.lock().source = None;
    }

    pub fn config(&self) -> SamplerConfig {
        self.inner.state.lock().config
    }

    /// Apply a new interval and capacity
    ///
    /// Capacity changes evict immediately. An interval change restarts a running
    /// schedule; buffered samples are kept.
    pub fn configure(&self, config: SamplerConfig) -> PlayerResult<()> {
        config.validate()?;

        let (interval_changed, events) = {
            let mut state = self.inner.state.lock();
            let previous = state.config;
            state.config = config;
            let events: Vec<ChartEvent> = state
                .all_series_mut()
                .into_iter()
                .filter_map(|series| series.resize(config.max_points))
                .collect();
            (previous.poll_interval != config.poll_interval, events)
        };
        self.inner.deliver(events);

        if interval_changed && self.inner.schedule.cancel() {
            info!("Restarting telemetry schedule with interval: {:?}", config.poll_interval);
            self.spawn_schedule(config);
        }
        Ok(())
    }

    /// Begin polling; the first poll runs immediately
    ///
    /// Returns `false` when already running. Requires a tokio runtime.
    pub fn start(&self) -> bool {
        let config = self.config();
        self.spawn_schedule(config)
    }

    fn spawn_schedule(&self, config: SamplerConfig) -> bool {
        let inner: Weak<SamplerInner> = Arc::downgrade(&self.inner);
        self.inner.schedule.start(config.poll_interval, move |guard| {
            let inner = inner.clone();
            async move {
                if let Some(inner) = inner.upgrade() {
                    inner.tick(Some(&guard)).await;
                }
            }
        })
    }

    /// Cancel polling; safe when never started
    ///
    /// A tick already in flight when this returns records nothing.
    pub fn stop(&self) -> bool {
        let _state = self.inner.state.lock();
        let stopped = self.inner.schedule.cancel();
        if stopped {
            info!("Telemetry sampling stopped");
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.inner.schedule.is_running()
    }

    /// Run one tick now, regardless of the schedule
    pub async fn poll(&self) -> PollOutcome {
        self.inner.tick(None).await
    }

    /// Sample once outside the schedule without disturbing its timer
    pub async fn force_snapshot(&self) -> PlayerResult<DiagnosticSnapshot> {
        let source = self.inner.state.lock().source.clone();
        let Some(source) = source else {
            return Err(PlayerError::StatsUnavailable {
                message: IDLE_NO_SESSION.to_string(),
            });
        };
        if !source.session.can_provide_stats() {
            return Err(PlayerError::StatsUnavailable {
                message: IDLE_NO_STATS.to_string(),
            });
        }

        match self.inner.tick(None).await {
            PollOutcome::Sampled(snapshot) => Ok(snapshot),
            PollOutcome::Failed(message) => Err(PlayerError::StatsUnavailable { message }),
            PollOutcome::Idle | PollOutcome::Discarded => Err(PlayerError::StatsUnavailable {
                message: IDLE_NO_STATS.to_string(),
            }),
        }
    }

    /// Empty every series and the diagnostic; polling continues
    pub fn clear(&self) {
        let events: Vec<ChartEvent> = {
            let mut state = self.inner.state.lock();
            state.diagnostic = Diagnostic::Empty;
            state.all_series_mut().into_iter().map(|series| series.reset()).collect()
        };
        self.inner.deliver(events);
        debug!("Telemetry buffers cleared");
    }

    pub fn diagnostic(&self) -> Diagnostic {
        self.inner.state.lock().diagnostic.clone()
    }

    pub fn diagnostic_text(&self) -> String {
        self.inner.state.lock().diagnostic.text()
    }

    pub fn labels(&self, metric: Metric) -> Vec<String> {
        self.inner.state.lock().series(metric).labels()
    }

    pub fn values(&self, metric: Metric) -> Vec<Option<f64>> {
        self.inner.state.lock().series(metric).values()
    }

    pub fn len(&self, metric: Metric) -> usize {
        self.inner.state.lock().series(metric).len()
    }
}

impl std::fmt::Debug for MetricsSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MetricsSampler")
            .field("config", &state.config)
            .field("attached", &state.source.is_some())
            .field("running", &self.inner.schedule.is_running())
            .finish()
    }
}
