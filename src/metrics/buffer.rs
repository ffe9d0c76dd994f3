//! Bounded time-series window

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::chart::{ChartEvent, ChartSink, ChartUpdate, Metric};

/// Chart label format: local wall clock
pub const LABEL_FORMAT: &str = "%H:%M:%S";

/// One point of a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub captured_at: DateTime<Local>,
    /// Display label, e.g. `14:03:27`
    pub timestamp: String,
    /// `None` when the metric could not be measured this tick
    pub value: Option<f64>,
}

impl Sample {
    pub fn new(captured_at: DateTime<Local>, value: Option<f64>) -> Self {
        Self {
            captured_at,
            timestamp: captured_at.format(LABEL_FORMAT).to_string(),
            value,
        }
    }

    pub fn now(value: Option<f64>) -> Self {
        Self::new(Local::now(), value)
    }
}

/// Ordered sample window holding at most `max_points` entries
///
/// Every mutation pushes the full window to the attached [`ChartSink`].
pub struct TimeSeriesBuffer {
    metric: Metric,
    samples: VecDeque<Sample>,
    max_points: usize,
    sink: Arc<dyn ChartSink>,
}

impl TimeSeriesBuffer {
    /// `max_points` is clamped to at least one
    pub fn new(metric: Metric, max_points: usize, sink: Arc<dyn ChartSink>) -> Self {
        let max_points = max_points.max(1);
        Self {
            metric,
            samples: VecDeque::with_capacity(max_points),
            max_points,
            sink,
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn labels(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.timestamp.clone()).collect()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// Append `sample`, evicting from the front past capacity
    ///
    /// A sample older than the newest one (wall clock stepped back) is stamped
    /// with the newest timestamp so the window stays ordered.
    pub fn push(&mut self, sample: Sample) {
        let event = self.append(sample);
        event.deliver(self.sink.as_ref());
    }

    pub fn clear(&mut self) {
        let event = self.reset();
        event.deliver(self.sink.as_ref());
    }

    /// Change capacity, evicting the oldest samples immediately if needed
    pub fn set_max_points(&mut self, max_points: usize) {
        if let Some(event) = self.resize(max_points) {
            event.deliver(self.sink.as_ref());
        }
    }

    /// [`Self::push`] without notifying; the caller delivers the returned event
    pub(crate) fn append(&mut self, mut sample: Sample) -> ChartEvent {
        if let Some(last) = self.samples.back() {
            if sample.captured_at < last.captured_at {
                sample.captured_at = last.captured_at;
                sample.timestamp = last.timestamp.clone();
            }
        }
        self.samples.push_back(sample);
        self.evict();
        self.window()
    }

    pub(crate) fn reset(&mut self) -> ChartEvent {
        self.samples = VecDeque::with_capacity(self.max_points);
        ChartEvent::Cleared { metric: self.metric }
    }

    /// `None` when the capacity is unchanged
    pub(crate) fn resize(&mut self, max_points: usize) -> Option<ChartEvent> {
        let max_points = max_points.max(1);
        if max_points == self.max_points {
            return None;
        }
        self.max_points = max_points;
        self.evict();
        Some(self.window())
    }

    fn evict(&mut self) {
        while self.samples.len() > self.max_points {
            self.samples.pop_front();
        }
    }

    fn window(&self) -> ChartEvent {
        ChartEvent::Update(ChartUpdate {
            metric: self.metric,
            labels: self.labels(),
            values: self.values(),
        })
    }
}

impl std::fmt::Debug for TimeSeriesBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesBuffer")
            .field("metric", &self.metric)
            .field("len", &self.samples.len())
            .field("max_points", &self.max_points)
            .finish()
    }
}
