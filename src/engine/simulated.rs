//! In-memory engine and media sink
//!
//! Scripted stand-ins for a real player, used by the `playback-monitor` binary
//! to exercise the pipeline without a browser and by the test suite.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use super::{
    BufferedInfo, EngineConfigPatch, EngineEvent, EngineEventKind, EngineStats, EventHandler, HandlerRegistry,
    MediaSink, StreamingEngine, SubscriptionToken, TextTrack, TextTrackMode, TextTrackSource, TimeRange,
    VariantTrack,
};
use crate::errors::{EngineError, EngineResult};

struct EngineState {
    supports_stats: bool,
    supports_buffered_info: bool,
    supports_text_track_upload: bool,
    supports_configuration: bool,
    variants: Vec<VariantTrack>,
    text_tracks: Vec<TextTrack>,
    next_text_id: u64,
    abr_enabled: bool,
    text_visible: bool,
    playing: bool,
    position: f64,
    duration: Option<f64>,
    bandwidth_script: VecDeque<f64>,
    buffered: BufferedInfo,
    stats_failures: VecDeque<String>,
    failing_uris: Vec<String>,
    loaded_uri: Option<String>,
    sink: Option<Arc<dyn MediaSink>>,
    destroyed: bool,
}

/// Scripted adaptive-streaming engine
pub struct SimulatedEngine {
    state: Mutex<EngineState>,
    handlers: HandlerRegistry,
    destroy_calls: AtomicUsize,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    /// Engine with a three-rung ladder (480p/720p/1080p) and one English subtitle track
    pub fn new() -> Self {
        let ladder = [(854, 480, 1_200_000u64), (1280, 720, 2_500_000), (1920, 1080, 5_000_000)];
        let variants = ladder
            .iter()
            .enumerate()
            .map(|(i, (width, height, video))| VariantTrack {
                id: i as u64,
                active: false,
                bandwidth: Some(video + 128_000),
                video_bandwidth: Some(*video),
                width: Some(*width),
                height: Some(*height),
                language: "en".to_string(),
                label: None,
            })
            .collect();

        let text_tracks = vec![TextTrack {
            id: 100,
            active: false,
            language: "en".to_string(),
            label: Some("English".to_string()),
            kind: "subtitle".to_string(),
            mime_type: Some("text/vtt".to_string()),
        }];

        Self {
            state: Mutex::new(EngineState {
                supports_stats: true,
                supports_buffered_info: true,
                supports_text_track_upload: true,
                supports_configuration: true,
                variants,
                text_tracks,
                next_text_id: 101,
                abr_enabled: true,
                text_visible: false,
                playing: false,
                position: 0.0,
                duration: None,
                bandwidth_script: VecDeque::new(),
                buffered: BufferedInfo::default(),
                stats_failures: VecDeque::new(),
                failing_uris: Vec::new(),
                loaded_uri: None,
                sink: None,
                destroyed: false,
            }),
            handlers: HandlerRegistry::new(),
            destroy_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_variants(self, variants: Vec<VariantTrack>) -> Self {
        self.state.lock().variants = variants;
        self
    }

    pub fn with_text_tracks(self, tracks: Vec<TextTrack>) -> Self {
        {
            let mut state = self.state.lock();
            let next_id = tracks.iter().map(|t| t.id + 1).max().unwrap_or(0);
            state.next_text_id = state.next_text_id.max(next_id);
            state.text_tracks = tracks;
        }
        self
    }

    /// Estimated bandwidth values (bits/s) returned by successive stats calls;
    /// the last value repeats once the script runs out
    pub fn with_bandwidth_script(self, script: Vec<f64>) -> Self {
        self.state.lock().bandwidth_script = script.into();
        self
    }

    pub fn with_buffered_ranges(self, ranges: Vec<TimeRange>) -> Self {
        self.state.lock().buffered = BufferedInfo {
            total: ranges.clone(),
            audio: ranges.clone(),
            video: ranges,
        };
        self
    }

    /// Media duration reported once a manifest loads; live streams have none
    pub fn with_duration(self, seconds: f64) -> Self {
        self.state.lock().duration = Some(seconds);
        self
    }

    pub fn without_stats(self) -> Self {
        self.state.lock().supports_stats = false;
        self
    }

    pub fn without_buffered_info(self) -> Self {
        self.state.lock().supports_buffered_info = false;
        self
    }

    pub fn without_text_track_upload(self) -> Self {
        self.state.lock().supports_text_track_upload = false;
        self
    }

    pub fn without_configuration(self) -> Self {
        self.state.lock().supports_configuration = false;
        self
    }

    /// Loads of any URI containing `pattern` fail
    pub fn fail_loads_matching<S: Into<String>>(self, pattern: S) -> Self {
        self.state.lock().failing_uris.push(pattern.into());
        self
    }

    /// The next stats call fails with `message`
    pub fn fail_next_stats<S: Into<String>>(&self, message: S) {
        self.state.lock().stats_failures.push_back(message.into());
    }

    /// Deliver an event to registered handlers as the engine would
    pub fn emit(&self, event: EngineEvent) {
        self.handlers.emit(event);
    }

    /// Switch the active variant the way the engine's own ABR would
    pub fn simulate_abr_switch(&self, variant_id: u64) {
        let mut state = self.state.lock();
        for variant in state.variants.iter_mut() {
            variant.active = variant.id == variant_id;
        }
    }

    pub fn destroy_count(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn abr_enabled(&self) -> bool {
        self.state.lock().abr_enabled
    }

    pub fn text_visible(&self) -> bool {
        self.state.lock().text_visible
    }

    pub fn position(&self) -> f64 {
        self.state.lock().position
    }

    pub fn loaded_uri(&self) -> Option<String> {
        self.state.lock().loaded_uri.clone()
    }

    fn ensure_alive(&self, operation: &str) -> EngineResult<()> {
        if self.state.lock().destroyed {
            debug!("Simulated engine rejected {} after destroy", operation);
            return Err(EngineError::Destroyed);
        }
        Ok(())
    }
}

#[async_trait]
impl StreamingEngine for SimulatedEngine {
    async fn initialize(&self, sink: Arc<dyn MediaSink>, uri: &str, autoplay: bool) -> EngineResult<()> {
        self.ensure_alive("initialize")?;

        let outcome = {
            let mut state = self.state.lock();
            if state.failing_uris.iter().any(|pattern| uri.contains(pattern.as_str())) {
                Err(format!("manifest request failed: {uri}"))
            } else {
                state.sink = Some(sink);
                state.loaded_uri = Some(uri.to_string());
                if !state.variants.iter().any(|v| v.active) {
                    if let Some(first) = state.variants.first_mut() {
                        first.active = true;
                    }
                }
                state.playing = autoplay;
                state.position = 0.0;
                Ok(state.duration)
            }
        };

        let duration = match outcome {
            Ok(duration) => duration,
            Err(message) => {
                self.handlers.emit(EngineEvent::Error {
                    message: message.clone(),
                });
                return Err(EngineError::operation("load", message));
            }
        };

        self.handlers.emit(EngineEvent::StreamInitialized);
        self.handlers.emit(EngineEvent::TimeUpdated {
            current_time: 0.0,
            duration,
        });
        if autoplay {
            self.handlers.emit(EngineEvent::Playing);
        }
        Ok(())
    }

    fn on(&self, event: EngineEventKind, handler: EventHandler) -> SubscriptionToken {
        self.handlers.register(event, handler)
    }

    fn off(&self, token: SubscriptionToken) {
        self.handlers.cancel(token);
    }

    fn supports_stats(&self) -> bool {
        self.state.lock().supports_stats
    }

    async fn get_stats(&self) -> EngineResult<EngineStats> {
        self.ensure_alive("getStats")?;
        let mut state = self.state.lock();
        if !state.supports_stats {
            return Err(EngineError::unsupported("getStats"));
        }
        if let Some(message) = state.stats_failures.pop_front() {
            return Err(EngineError::operation("getStats", message));
        }

        let estimated_bandwidth = if state.bandwidth_script.len() > 1 {
            state.bandwidth_script.pop_front()
        } else {
            state.bandwidth_script.front().copied()
        };
        let active = state.variants.iter().find(|v| v.active);

        Ok(EngineStats {
            estimated_bandwidth,
            stream_bandwidth: active.and_then(|v| v.bandwidth).map(|b| b as f64),
            width: active.and_then(|v| v.width),
            height: active.and_then(|v| v.height),
            decoded_frames: Some(0),
            dropped_frames: Some(0),
            ..Default::default()
        })
    }

    fn supports_buffered_info(&self) -> bool {
        self.state.lock().supports_buffered_info
    }

    fn get_buffered_info(&self) -> EngineResult<BufferedInfo> {
        let state = self.state.lock();
        if !state.supports_buffered_info {
            return Err(EngineError::unsupported("getBufferedInfo"));
        }
        Ok(state.buffered.clone())
    }

    fn get_variant_tracks(&self) -> Vec<VariantTrack> {
        self.state.lock().variants.clone()
    }

    fn get_text_tracks(&self) -> Vec<TextTrack> {
        self.state.lock().text_tracks.clone()
    }

    fn select_variant_track(&self, track: &VariantTrack, clear_buffer: bool) -> EngineResult<()> {
        self.ensure_alive("selectVariantTrack")?;
        let mut state = self.state.lock();
        if !state.variants.iter().any(|v| v.id == track.id) {
            return Err(EngineError::operation(
                "selectVariantTrack",
                format!("unknown variant {}", track.id),
            ));
        }
        for variant in state.variants.iter_mut() {
            variant.active = variant.id == track.id;
        }
        if clear_buffer {
            state.buffered = BufferedInfo::default();
        }
        Ok(())
    }

    fn select_text_track(&self, track: &TextTrack) -> EngineResult<()> {
        self.ensure_alive("selectTextTrack")?;
        let mut state = self.state.lock();
        if !state.text_tracks.iter().any(|t| t.id == track.id) {
            return Err(EngineError::operation(
                "selectTextTrack",
                format!("unknown text track {}", track.id),
            ));
        }
        for text in state.text_tracks.iter_mut() {
            text.active = text.id == track.id;
        }
        Ok(())
    }

    fn set_text_track_visibility(&self, visible: bool) {
        self.state.lock().text_visible = visible;
    }

    fn configure(&self, patch: EngineConfigPatch) -> EngineResult<()> {
        self.ensure_alive("configure")?;
        if let Some(enabled) = patch.abr_enabled {
            self.state.lock().abr_enabled = enabled;
        }
        Ok(())
    }

    fn supports_text_track_upload(&self) -> bool {
        self.state.lock().supports_text_track_upload
    }

    fn add_text_track(&self, source: &TextTrackSource) -> EngineResult<TextTrack> {
        self.ensure_alive("addTextTrack")?;
        let track = {
            let mut state = self.state.lock();
            if !state.supports_text_track_upload {
                return Err(EngineError::unsupported("addTextTrack"));
            }
            let track = TextTrack {
                id: state.next_text_id,
                active: false,
                language: source.language.clone(),
                label: Some(source.label.clone()),
                kind: source.kind.clone(),
                mime_type: Some(format!("text/{}", source.format)),
            };
            state.next_text_id += 1;
            state.text_tracks.push(track.clone());
            track
        };
        self.handlers.emit(EngineEvent::TrackAdded);
        Ok(track)
    }

    fn supports_configuration(&self) -> bool {
        self.state.lock().supports_configuration
    }

    fn get_configuration(&self) -> EngineResult<serde_json::Value> {
        let state = self.state.lock();
        if !state.supports_configuration {
            return Err(EngineError::unsupported("getConfiguration"));
        }
        Ok(json!({
            "abr": { "enabled": state.abr_enabled },
            "textDisplay": { "visible": state.text_visible },
            "manifest": { "uri": state.loaded_uri },
        }))
    }

    fn play(&self) -> EngineResult<()> {
        self.ensure_alive("play")?;
        self.state.lock().playing = true;
        self.handlers.emit(EngineEvent::Playing);
        Ok(())
    }

    fn pause(&self) -> EngineResult<()> {
        self.ensure_alive("pause")?;
        self.state.lock().playing = false;
        self.handlers.emit(EngineEvent::Paused);
        Ok(())
    }

    fn seek(&self, seconds: f64) -> EngineResult<()> {
        self.ensure_alive("seek")?;
        let (current_time, duration) = {
            let mut state = self.state.lock();
            if state.loaded_uri.is_none() {
                return Err(EngineError::operation("seek", "no stream loaded"));
            }
            state.position = state.duration.map_or(seconds, |d| seconds.min(d)).max(0.0);
            (state.position, state.duration)
        };
        self.handlers.emit(EngineEvent::TimeUpdated {
            current_time,
            duration,
        });
        Ok(())
    }

    fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.destroyed = true;
        state.sink = None;
        state.playing = false;
        drop(state);
        self.handlers.clear();
    }
}

struct SinkState {
    current_time: f64,
    buffered: Vec<TimeRange>,
    buffered_error: Option<String>,
    attached: Vec<(TextTrackSource, TextTrackMode)>,
}

/// Scripted media sink with a settable playhead and buffered ranges
pub struct SimulatedSink {
    state: Mutex<SinkState>,
}

impl Default for SimulatedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SinkState {
                current_time: 0.0,
                buffered: Vec::new(),
                buffered_error: None,
                attached: Vec::new(),
            }),
        }
    }

    pub fn set_current_time(&self, seconds: f64) {
        self.state.lock().current_time = seconds;
    }

    pub fn set_buffered(&self, ranges: Vec<TimeRange>) {
        self.state.lock().buffered = ranges;
    }

    /// Make subsequent `buffered()` reads fail
    pub fn fail_buffered<S: Into<String>>(&self, message: S) {
        self.state.lock().buffered_error = Some(message.into());
    }

    pub fn attached_text_tracks(&self) -> Vec<TextTrackSource> {
        self.state.lock().attached.iter().map(|(source, _)| source.clone()).collect()
    }

    pub fn text_track_mode(&self, id: u64) -> Option<TextTrackMode> {
        let index = usize::try_from(id).ok()?;
        self.state.lock().attached.get(index).map(|(_, mode)| *mode)
    }
}

impl MediaSink for SimulatedSink {
    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn buffered(&self) -> EngineResult<Vec<TimeRange>> {
        let state = self.state.lock();
        match &state.buffered_error {
            Some(message) => Err(EngineError::operation("buffered", message.clone())),
            None => Ok(state.buffered.clone()),
        }
    }

    fn attach_text_track(&self, source: &TextTrackSource) -> EngineResult<u64> {
        let mut state = self.state.lock();
        state.attached.push((source.clone(), TextTrackMode::Disabled));
        Ok(state.attached.len() as u64 - 1)
    }

    fn set_text_track_mode(&self, id: u64, mode: TextTrackMode) -> EngineResult<()> {
        let mut state = self.state.lock();
        let entry = usize::try_from(id)
            .ok()
            .and_then(|index| state.attached.get_mut(index))
            .ok_or_else(|| EngineError::operation("setTextTrackMode", format!("unknown sink text track {id}")))?;
        entry.1 = mode;
        Ok(())
    }
}
