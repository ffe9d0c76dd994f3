//! Live telemetry pipeline
//!
//! [`MetricsSampler`] polls engine statistics on a [`RepeatingSchedule`] and
//! feeds three bounded [`TimeSeriesBuffer`]s (bandwidth, buffer, bitrate),
//! each of which pushes its window to a [`crate::chart::ChartSink`].

pub mod buffer;
pub mod buffered_ahead;
pub mod sampler;
pub mod schedule;
pub mod snapshot;

pub use buffer::{Sample, TimeSeriesBuffer};
pub use buffered_ahead::{BufferMeasurement, BufferSource};
pub use sampler::{MetricsSampler, PollOutcome};
pub use schedule::{RepeatingSchedule, TickGuard};
pub use snapshot::{Diagnostic, DiagnosticSnapshot};
