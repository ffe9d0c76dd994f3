//! Chart sink contract
//!
//! Rendering is external. A [`ChartSink`] receives the full `(labels, values)`
//! window of a series every time the backing buffer changes, and a clear signal
//! when the buffer is emptied.

#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// The live series maintained by the sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Metric {
    /// Estimated network bandwidth, Mbps
    Bandwidth,
    /// Seconds of media buffered ahead of the playhead
    Buffer,
    /// Bitrate of the active variant, kbps
    Bitrate,
}

impl Metric {
    pub fn unit(self) -> &'static str {
        match self {
            Self::Bandwidth => "Mbps",
            Self::Buffer => "s",
            Self::Bitrate => "kbps",
        }
    }
}

/// Receives series updates for rendering
///
/// Called synchronously after each buffer mutation. The sampler releases its
/// own state before calling, so an implementation may call back into it.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait ChartSink: Send + Sync {
    fn update(&self, metric: Metric, labels: &[String], values: &[Option<f64>]);

    fn clear(&self, metric: Metric);
}

/// Full window of one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartUpdate {
    pub metric: Metric,
    pub labels: Vec<String>,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChartEvent {
    Update(ChartUpdate),
    Cleared { metric: Metric },
}

impl ChartEvent {
    /// Hand this event to `sink`
    pub fn deliver(&self, sink: &dyn ChartSink) {
        match self {
            Self::Update(update) => sink.update(update.metric, &update.labels, &update.values),
            Self::Cleared { metric } => sink.clear(*metric),
        }
    }
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NullChartSink;

impl ChartSink for NullChartSink {
    fn update(&self, _metric: Metric, _labels: &[String], _values: &[Option<f64>]) {}

    fn clear(&self, _metric: Metric) {}
}

/// Logs the newest point of every update at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingChartSink;

impl ChartSink for TracingChartSink {
    fn update(&self, metric: Metric, labels: &[String], values: &[Option<f64>]) {
        let latest = labels.last().zip(values.last());
        match latest {
            Some((label, Some(value))) => {
                debug!("{} @ {}: {} {} ({} points)", metric, label, value, metric.unit(), values.len())
            }
            Some((label, None)) => debug!("{} @ {}: n/a ({} points)", metric, label, values.len()),
            None => debug!("{} window is empty", metric),
        }
    }

    fn clear(&self, metric: Metric) {
        debug!("{} cleared", metric);
    }
}

/// Forwards updates to any number of subscribers over a broadcast channel
///
/// Slow subscribers lag and skip updates rather than stall the sampler.
#[derive(Debug, Clone)]
pub struct ChannelChartSink {
    sender: broadcast::Sender<ChartEvent>,
}

impl ChannelChartSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChartEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ChartSink for ChannelChartSink {
    fn update(&self, metric: Metric, labels: &[String], values: &[Option<f64>]) {
        // No subscribers is not an error
        let _ = self.sender.send(ChartEvent::Update(ChartUpdate {
            metric,
            labels: labels.to_vec(),
            values: values.to_vec(),
        }));
    }

    fn clear(&self, metric: Metric) {
        let _ = self.sender.send(ChartEvent::Cleared { metric });
    }
}
