//! Buffered-ahead length
//!
//! Two sources can report buffered media: the engine's own range introspection
//! and the media sink. The engine is authoritative; the sink is only consulted
//! when the engine does not expose ranges, reports none, or fails to answer.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::TimeRange;
use crate::session::TelemetryHandle;

/// Where a buffered-ahead value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum BufferSource {
    Engine,
    Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferMeasurement {
    pub seconds: f64,
    pub source: BufferSource,
}

/// Seconds buffered ahead of `playhead`
///
/// The range containing the playhead (inclusive) yields `end - playhead`,
/// clamped at zero. A playhead in a gap or past every range yields zero.
pub fn seconds_ahead(ranges: &[TimeRange], playhead: f64) -> f64 {
    ranges
        .iter()
        .find(|range| range.contains(playhead))
        .map(|range| (range.end - playhead).max(0.0))
        .unwrap_or(0.0)
}

/// Measure buffered-ahead length for the current tick
///
/// `None` only when neither the engine nor the sink could be read.
pub fn measure(handle: &TelemetryHandle) -> Option<BufferMeasurement> {
    let playhead = handle.sink.current_time();

    if handle.capabilities.buffered_info.is_supported() {
        match handle.engine.get_buffered_info() {
            Ok(info) if !info.total.is_empty() => {
                return Some(BufferMeasurement {
                    seconds: seconds_ahead(&info.total, playhead),
                    source: BufferSource::Engine,
                });
            }
            Ok(_) => debug!("Engine reported no buffered ranges, reading sink"),
            Err(e) => debug!("Engine buffered info unavailable ({}), reading sink", e),
        }
    }

    match handle.sink.buffered() {
        Ok(ranges) => Some(BufferMeasurement {
            seconds: seconds_ahead(&ranges, playhead),
            source: BufferSource::Sink,
        }),
        Err(e) => {
            debug!("Sink buffered ranges unavailable: {}", e);
            None
        }
    }
}
