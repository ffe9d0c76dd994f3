//! Adaptive-streaming engine contract
//!
//! The engine is an opaque external dependency (DASH/HLS player, decoder, ABR).
//! This module describes the surface the playback monitor consumes from it and
//! from the media sink the engine renders into. Optional parts of that surface
//! are advertised through the `supports_*` queries and resolved once per session
//! into [`Capability`] values.

use async_trait::async_trait;
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::{EngineError, EngineResult};

pub mod events;
pub mod simulated;

pub use events::{EngineEvent, EngineEventKind, EventHandler, HandlerRegistry, SubscriptionToken};

/// A contiguous buffered span of media, in seconds on the media timeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Inclusive on both ends
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position <= self.end
    }
}

/// Engine-level buffered range introspection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferedInfo {
    /// Intersection of audio and video ranges, i.e. what is actually playable
    pub total: Vec<TimeRange>,
    pub audio: Vec<TimeRange>,
    pub video: Vec<TimeRange>,
}

/// Statistics snapshot reported by the engine
///
/// Every field is optional: engines differ in what they measure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Estimated network bandwidth in bits per second
    pub estimated_bandwidth: Option<f64>,
    /// Bandwidth of the currently streamed variant in bits per second
    pub stream_bandwidth: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub decoded_frames: Option<u64>,
    pub dropped_frames: Option<u64>,
    /// Seconds spent buffering since load
    pub buffering_time: Option<f64>,
    /// Seconds spent playing since load
    pub play_time: Option<f64>,
    /// Seconds from load start to first frame
    pub load_latency: Option<f64>,
}

impl EngineStats {
    /// Names of the fields the engine actually reported
    pub fn available_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.estimated_bandwidth.is_some() {
            fields.push("estimatedBandwidth");
        }
        if self.stream_bandwidth.is_some() {
            fields.push("streamBandwidth");
        }
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        if self.decoded_frames.is_some() {
            fields.push("decodedFrames");
        }
        if self.dropped_frames.is_some() {
            fields.push("droppedFrames");
        }
        if self.buffering_time.is_some() {
            fields.push("bufferingTime");
        }
        if self.play_time.is_some() {
            fields.push("playTime");
        }
        if self.load_latency.is_some() {
            fields.push("loadLatency");
        }
        fields
    }
}

/// A quality rendition as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantTrack {
    pub id: u64,
    pub active: bool,
    /// Combined audio+video bandwidth, bits per second
    pub bandwidth: Option<u64>,
    /// Encoded video bitrate, bits per second
    pub video_bandwidth: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub language: String,
    pub label: Option<String>,
}

/// A text (subtitle/caption) track as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextTrack {
    pub id: u64,
    pub active: bool,
    pub language: String,
    pub label: Option<String>,
    /// "subtitle" or "caption"
    pub kind: String,
    /// MIME type, e.g. "text/vtt"
    pub mime_type: Option<String>,
}

/// Out-of-band text track handed to the engine or the media sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextTrackSource {
    pub uri: String,
    pub language: String,
    pub kind: String,
    /// Engine format identifier, e.g. "vtt"
    pub format: String,
    pub label: String,
}

/// Rendering mode of a text track attached to the media sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TextTrackMode {
    Showing,
    Disabled,
}

/// Partial engine configuration; `None` leaves the setting untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfigPatch {
    pub abr_enabled: Option<bool>,
}

impl EngineConfigPatch {
    pub fn abr(enabled: bool) -> Self {
        Self {
            abr_enabled: Some(enabled),
        }
    }
}

/// Whether an optional engine capability is available for this session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum Capability {
    Supported,
    Unsupported,
}

impl Capability {
    pub fn from_support(supported: bool) -> Self {
        if supported {
            Self::Supported
        } else {
            Self::Unsupported
        }
    }

    pub fn is_supported(self) -> bool {
        matches!(self, Self::Supported)
    }
}

/// Optional capabilities resolved once when the session becomes ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    pub stats: Capability,
    pub buffered_info: Capability,
    pub text_track_upload: Capability,
    pub configuration: Capability,
}

impl EngineCapabilities {
    pub fn detect(engine: &dyn StreamingEngine) -> Self {
        Self {
            stats: Capability::from_support(engine.supports_stats()),
            buffered_info: Capability::from_support(engine.supports_buffered_info()),
            text_track_upload: Capability::from_support(engine.supports_text_track_upload()),
            configuration: Capability::from_support(engine.supports_configuration()),
        }
    }

    pub fn none() -> Self {
        Self {
            stats: Capability::Unsupported,
            buffered_info: Capability::Unsupported,
            text_track_upload: Capability::Unsupported,
            configuration: Capability::Unsupported,
        }
    }
}

/// Rendering target the engine decodes into (the video element)
#[cfg_attr(any(test, feature = "test-utils"), automock)]
pub trait MediaSink: Send + Sync {
    /// Current playhead position in seconds
    fn current_time(&self) -> f64;

    /// Buffered ranges ordered by start time
    fn buffered(&self) -> EngineResult<Vec<TimeRange>>;

    /// Attach an out-of-band text track directly to the sink
    ///
    /// Returns the sink's id for the track; it starts out disabled.
    fn attach_text_track(&self, source: &TextTrackSource) -> EngineResult<u64>;

    fn set_text_track_mode(&self, id: u64, mode: TextTrackMode) -> EngineResult<()>;
}

/// Instance surface of an adaptive-streaming engine
///
/// Methods take `&self`; implementations own their interior mutability so the
/// session can release its own lock before awaiting an engine call.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait]
pub trait StreamingEngine: Send + Sync {
    /// Bind the engine to `sink` and load `uri`. Called again on reload.
    async fn initialize(&self, sink: Arc<dyn MediaSink>, uri: &str, autoplay: bool) -> EngineResult<()>;

    /// Register an event handler; the token cancels it via [`StreamingEngine::off`]
    fn on(&self, event: EngineEventKind, handler: EventHandler) -> SubscriptionToken;

    fn off(&self, token: SubscriptionToken);

    fn supports_stats(&self) -> bool;

    async fn get_stats(&self) -> EngineResult<EngineStats>;

    fn supports_buffered_info(&self) -> bool;

    fn get_buffered_info(&self) -> EngineResult<BufferedInfo>;

    fn get_variant_tracks(&self) -> Vec<VariantTrack>;

    fn get_text_tracks(&self) -> Vec<TextTrack>;

    fn select_variant_track(&self, track: &VariantTrack, clear_buffer: bool) -> EngineResult<()>;

    fn select_text_track(&self, track: &TextTrack) -> EngineResult<()>;

    fn set_text_track_visibility(&self, visible: bool);

    fn configure(&self, patch: EngineConfigPatch) -> EngineResult<()>;

    fn supports_text_track_upload(&self) -> bool;

    fn add_text_track(&self, source: &TextTrackSource) -> EngineResult<TextTrack>;

    fn supports_configuration(&self) -> bool;

    /// Full engine configuration as JSON
    fn get_configuration(&self) -> EngineResult<serde_json::Value>;

    fn play(&self) -> EngineResult<()>;

    fn pause(&self) -> EngineResult<()>;

    /// Move the playhead to `seconds` on the media timeline
    fn seek(&self, seconds: f64) -> EngineResult<()>;

    /// Release every resource held by the engine. Called at most once.
    fn destroy(&self);
}

/// Creates engine instances for the current platform
pub trait EngineFactory: Send + Sync {
    /// `Err(reason)` when the platform lacks what the engine needs
    fn check_support(&self) -> Result<(), String>;

    fn create(&self) -> EngineResult<Arc<dyn StreamingEngine>>;
}

/// Factory that hands out a prebuilt engine exactly once
///
/// Useful when the embedding application constructs the engine itself.
pub struct PrebuiltEngineFactory {
    engine: parking_lot::Mutex<Option<Arc<dyn StreamingEngine>>>,
}

impl PrebuiltEngineFactory {
    pub fn new(engine: Arc<dyn StreamingEngine>) -> Self {
        Self {
            engine: parking_lot::Mutex::new(Some(engine)),
        }
    }
}

impl EngineFactory for PrebuiltEngineFactory {
    fn check_support(&self) -> Result<(), String> {
        Ok(())
    }

    fn create(&self) -> EngineResult<Arc<dyn StreamingEngine>> {
        self.engine
            .lock()
            .take()
            .ok_or_else(|| EngineError::operation("create", "prebuilt engine already handed out"))
    }
}
