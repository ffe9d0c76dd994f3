//! Quality and subtitle track selection
//!
//! [`TrackController`] keeps the selectable track lists pulled from the
//! session and translates UI selections ("auto", "", list indices) into engine
//! calls. Adaptive mode and a pinned variant are mutually exclusive, and at most
//! one subtitle track is active at a time.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::engine::{EngineConfigPatch, TextTrack, TextTrackMode, VariantTrack};
use crate::errors::{PlayerError, PlayerResult, TrackSelectionWarning};
use crate::session::StreamSession;

pub mod subtitles;

pub use subtitles::{SubtitleFormat, SubtitleUpload, ValidatedSubtitle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum TrackKind {
    Video,
    Subtitle,
}

/// Who renders a track; ids are only unique within one origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum TrackOrigin {
    Engine,
    /// Attached straight to the media sink
    Sink,
}

/// Selectable track as presented to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub kind: TrackKind,
    pub origin: TrackOrigin,
    /// Encoded bitrate in bits per second
    pub bitrate: Option<u64>,
    pub active: bool,
    pub label: String,
    pub language: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl From<&VariantTrack> for Track {
    fn from(variant: &VariantTrack) -> Self {
        let bitrate = variant.video_bandwidth.or(variant.bandwidth);
        let label = match (&variant.label, variant.height, bitrate) {
            (Some(label), _, _) => label.clone(),
            (None, Some(height), Some(bps)) => format!("{height}p ({} kbps)", bps / 1000),
            (None, Some(height), None) => format!("{height}p"),
            (None, None, Some(bps)) => format!("{} kbps", bps / 1000),
            (None, None, None) => format!("Variant {}", variant.id),
        };
        Self {
            id: variant.id,
            kind: TrackKind::Video,
            origin: TrackOrigin::Engine,
            bitrate,
            active: variant.active,
            label,
            language: variant.language.clone(),
            width: variant.width,
            height: variant.height,
        }
    }
}

impl From<&TextTrack> for Track {
    fn from(text: &TextTrack) -> Self {
        Self {
            id: text.id,
            kind: TrackKind::Subtitle,
            origin: TrackOrigin::Engine,
            bitrate: None,
            active: text.active,
            label: text.label.clone().unwrap_or_else(|| text.language.clone()),
            language: text.language.clone(),
            width: None,
            height: None,
        }
    }
}

/// Quality selection: adaptive, or a pinned index into the variant list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualitySelector {
    Auto,
    Index(usize),
}

impl FromStr for QualitySelector {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "auto" => Ok(Self::Auto),
            other => other
                .parse()
                .map(Self::Index)
                .map_err(|_| PlayerError::validation(format!("invalid quality selector '{s}'"))),
        }
    }
}

/// Subtitle selection: off, or an index into the subtitle list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtitleSelector {
    Off,
    Index(usize),
}

impl FromStr for SubtitleSelector {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Ok(Self::Off),
            other => other
                .parse()
                .map(Self::Index)
                .map_err(|_| PlayerError::validation(format!("invalid subtitle selector '{s}'"))),
        }
    }
}

/// Result of a selection that did not fail outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    Applied,
    Ignored(TrackSelectionWarning),
}

impl SelectionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Subtitle resolved from a list index
enum SubtitleTarget {
    Engine(TextTrack),
    Sink(u64),
}

#[derive(Default)]
struct TrackState {
    variants: Vec<VariantTrack>,
    text_tracks: Vec<TextTrack>,
    /// Tracks attached straight to the media sink; listed after the engine's
    sink_tracks: Vec<Track>,
    abr_enabled: bool,
    /// Engine text rendering; off while a sink track is showing
    text_visible: bool,
}

impl TrackState {
    fn subtitle_count(&self) -> usize {
        self.text_tracks.len() + self.sink_tracks.len()
    }

    fn subtitle_target(&self, index: usize) -> Option<SubtitleTarget> {
        match self.text_tracks.get(index) {
            Some(text) => Some(SubtitleTarget::Engine(text.clone())),
            None => self
                .sink_tracks
                .get(index - self.text_tracks.len())
                .map(|track| SubtitleTarget::Sink(track.id)),
        }
    }

    fn sink_track_ids(&self) -> Vec<u64> {
        self.sink_tracks.iter().map(|t| t.id).collect()
    }
}

/// Variant and subtitle selection over a [`StreamSession`]
pub struct TrackController {
    session: StreamSession,
    state: Mutex<TrackState>,
}

impl TrackController {
    pub fn new(session: StreamSession) -> Self {
        let text_visible = session.config().text_visible_on_load;
        Self {
            session,
            state: Mutex::new(TrackState {
                abr_enabled: true,
                text_visible,
                ..TrackState::default()
            }),
        }
    }

    /// Pull current variant and subtitle lists from the session
    ///
    /// Lists are empty unless a manifest is loaded.
    pub fn refresh_tracks(&self) -> PlayerResult<()> {
        if self.session.is_destroyed() {
            self.release();
            return Err(PlayerError::destroyed("refreshTracks"));
        }

        let variants = self.session.variant_tracks();
        let mut text_tracks = self.session.text_tracks();

        let mut state = self.state.lock();
        if !state.text_visible {
            for text in text_tracks.iter_mut() {
                text.active = false;
            }
        }
        debug!(
            "Refreshed tracks: {} variants, {} subtitles",
            variants.len(),
            text_tracks.len()
        );
        state.variants = variants;
        state.text_tracks = text_tracks;
        Ok(())
    }

    pub fn variant_tracks(&self) -> Vec<Track> {
        self.state.lock().variants.iter().map(Track::from).collect()
    }

    /// Engine subtitles followed by sink-attached ones; indices match `select_subtitle`
    pub fn subtitle_tracks(&self) -> Vec<Track> {
        let state = self.state.lock();
        state
            .text_tracks
            .iter()
            .map(Track::from)
            .chain(state.sink_tracks.iter().cloned())
            .collect()
    }

    /// Subtitles attached directly to the media sink
    pub fn sink_subtitle_tracks(&self) -> Vec<Track> {
        self.state.lock().sink_tracks.clone()
    }

    pub fn abr_enabled(&self) -> bool {
        self.state.lock().abr_enabled
    }

    /// The manually pinned variant, if adaptive mode is off
    pub fn pinned_variant(&self) -> Option<Track> {
        let state = self.state.lock();
        if state.abr_enabled {
            return None;
        }
        state.variants.iter().find(|v| v.active).map(Track::from)
    }

    pub fn active_subtitle(&self) -> Option<Track> {
        self.subtitle_tracks().into_iter().find(|t| t.active)
    }

    /// Active variant as the engine reports it right now
    ///
    /// The engine's own ABR may have switched since the last refresh, so this
    /// bypasses the cached list.
    pub fn live_active_variant(&self) -> Option<VariantTrack> {
        self.session.variant_tracks().into_iter().find(|v| v.active)
    }

    pub fn select_quality(&self, selector: QualitySelector) -> PlayerResult<SelectionOutcome> {
        let engine = self.session.engine_for("selectQuality")?;

        match selector {
            QualitySelector::Auto => {
                engine.configure(EngineConfigPatch::abr(true))?;
                self.state.lock().abr_enabled = true;
                info!("Adaptive quality enabled");
                Ok(SelectionOutcome::Applied)
            }
            QualitySelector::Index(index) => {
                let (track, previous_abr) = {
                    let state = self.state.lock();
                    match state.variants.get(index) {
                        Some(track) => (track.clone(), state.abr_enabled),
                        None => {
                            let warning = TrackSelectionWarning::QualityIndexOutOfRange {
                                index,
                                available: state.variants.len(),
                            };
                            warn!("{}", warning);
                            return Ok(SelectionOutcome::Ignored(warning));
                        }
                    }
                };

                engine.configure(EngineConfigPatch::abr(false))?;
                if let Err(e) = engine.select_variant_track(&track, true) {
                    if previous_abr {
                        if let Err(restore) = engine.configure(EngineConfigPatch::abr(true)) {
                            warn!("Failed to restore adaptive mode: {}", restore);
                        }
                    }
                    return Err(e.into());
                }

                let mut state = self.state.lock();
                state.abr_enabled = false;
                for variant in state.variants.iter_mut() {
                    variant.active = variant.id == track.id;
                }
                info!("Pinned variant {} ({})", index, Track::from(&track).label);
                Ok(SelectionOutcome::Applied)
            }
        }
    }

    /// Flip adaptive mode without pinning a variant
    pub fn toggle_abr(&self) -> PlayerResult<bool> {
        let engine = self.session.engine_for("toggleAbr")?;
        let enabled = !self.abr_enabled();
        engine.configure(EngineConfigPatch::abr(enabled))?;
        self.state.lock().abr_enabled = enabled;
        info!("Adaptive quality {}", if enabled { "enabled" } else { "disabled" });
        Ok(enabled)
    }

    /// Activate one subtitle, engine or sink, and deactivate every other
    pub fn select_subtitle(&self, selector: SubtitleSelector) -> PlayerResult<SelectionOutcome> {
        let engine = self.session.engine_for("selectSubtitle")?;

        let (target, sink_ids) = {
            let state = self.state.lock();
            let target = match selector {
                SubtitleSelector::Off => None,
                SubtitleSelector::Index(index) => match state.subtitle_target(index) {
                    Some(target) => Some(target),
                    None => {
                        let warning = TrackSelectionWarning::SubtitleIndexOutOfRange {
                            index,
                            available: state.subtitle_count(),
                        };
                        warn!("{}", warning);
                        return Ok(SelectionOutcome::Ignored(warning));
                    }
                },
            };
            (target, state.sink_track_ids())
        };

        if let Some(SubtitleTarget::Engine(track)) = &target {
            engine.select_text_track(track)?;
        }

        // Disable first so two tracks never show at once
        let showing_sink = match &target {
            Some(SubtitleTarget::Sink(id)) => Some(*id),
            _ => None,
        };
        if !sink_ids.is_empty() {
            let sink = self
                .session
                .sink()
                .ok_or_else(|| PlayerError::destroyed("selectSubtitle"))?;
            for id in sink_ids.iter().filter(|id| Some(**id) != showing_sink) {
                sink.set_text_track_mode(*id, TextTrackMode::Disabled)?;
            }
            if let Some(id) = showing_sink {
                sink.set_text_track_mode(id, TextTrackMode::Showing)?;
            }
        }

        let engine_track = match &target {
            Some(SubtitleTarget::Engine(track)) => {
                engine.set_text_track_visibility(true);
                Some(track.id)
            }
            _ => {
                engine.set_text_track_visibility(false);
                None
            }
        };

        let mut state = self.state.lock();
        state.text_visible = engine_track.is_some();
        for text in state.text_tracks.iter_mut() {
            text.active = Some(text.id) == engine_track;
        }
        for track in state.sink_tracks.iter_mut() {
            track.active = Some(track.id) == showing_sink;
        }
        match (engine_track, showing_sink) {
            (Some(id), _) => debug!("Selected engine subtitle {}", id),
            (None, Some(id)) => debug!("Selected sink subtitle {}", id),
            (None, None) => debug!("Subtitles disabled"),
        }
        Ok(SelectionOutcome::Applied)
    }

    /// Validate and register a user-supplied subtitle file
    pub fn add_external_subtitle(&self, upload: &SubtitleUpload) -> PlayerResult<Track> {
        let validated = subtitles::validate(upload)?;
        let engine = self.session.engine_for("addExternalSubtitle")?;
        let source = validated.to_source();

        let track = if self.session.capabilities().text_track_upload.is_supported() {
            let text = engine.add_text_track(&source)?;
            Track::from(&text)
        } else {
            let sink = self
                .session
                .sink()
                .ok_or_else(|| PlayerError::destroyed("addExternalSubtitle"))?;
            let id = sink.attach_text_track(&source)?;
            let track = Track {
                id,
                kind: TrackKind::Subtitle,
                origin: TrackOrigin::Sink,
                bitrate: None,
                active: false,
                label: validated.label.clone(),
                language: validated.language.clone(),
                width: None,
                height: None,
            };
            self.state.lock().sink_tracks.push(track.clone());
            track
        };

        info!("Subtitle added: {} ({})", track.label, track.language);
        self.refresh_tracks()?;
        Ok(track)
    }

    /// Drop every cached track reference ahead of session teardown
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.variants.clear();
        state.text_tracks.clear();
        state.sink_tracks.clear();
        state.text_visible = false;
    }
}
