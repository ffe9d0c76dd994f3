//! Stream session lifecycle
//!
//! A [`StreamSession`] exclusively owns one engine instance bound to one media
//! sink. It walks the engine through initialization, (re)loads and teardown and
//! forwards engine events onto a broadcast channel. Other components hold a
//! cloned session handle and reach the engine only through it, so nothing but
//! [`StreamSession::destroy`] can release the engine.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use strum::IntoEnumIterator;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::engine::{
    EngineCapabilities, EngineEvent, EngineEventKind, EngineFactory, EngineStats, MediaSink, StreamingEngine,
    SubscriptionToken, TextTrack, VariantTrack,
};
use crate::errors::{PlayerError, PlayerResult};

pub mod rewrite;

pub use rewrite::{ManifestRewriteRule, ManifestRewriter};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Loading,
    Loaded,
    Error,
    Destroyed,
}

impl SessionState {
    /// States from which a (re)load may begin
    pub fn can_load(self) -> bool {
        matches!(self, Self::Ready | Self::Loaded | Self::Error)
    }
}

/// Notifications published by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    Engine(EngineEvent),
}

/// Playback position and flags maintained from engine events
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub playing: bool,
    /// Playhead in seconds
    pub current_time: f64,
    /// Media duration in seconds, once the engine reports it
    pub duration: Option<f64>,
}

/// Engine, sink and capabilities captured together for one sampler tick
#[derive(Clone)]
pub struct TelemetryHandle {
    pub engine: Arc<dyn StreamingEngine>,
    pub sink: Arc<dyn MediaSink>,
    pub capabilities: EngineCapabilities,
}

struct SessionInner {
    state: SessionState,
    engine: Option<Arc<dyn StreamingEngine>>,
    sink: Option<Arc<dyn MediaSink>>,
    manifest_uri: Option<String>,
    last_error: Option<PlayerError>,
    capabilities: EngineCapabilities,
    subscriptions: Vec<SubscriptionToken>,
    playback: PlaybackStatus,
    load_generation: u64,
}

impl SessionInner {
    fn transition(&mut self, to: SessionState) -> Option<SessionEvent> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(SessionEvent::StateChanged { from, to })
    }

    fn apply_engine_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Playing => self.playback.playing = true,
            EngineEvent::Paused => self.playback.playing = false,
            EngineEvent::TimeUpdated { current_time, duration } => {
                self.playback.current_time = *current_time;
                if duration.is_some() {
                    self.playback.duration = *duration;
                }
            }
            EngineEvent::Error { message } => {
                self.last_error = Some(PlayerError::Engine(crate::errors::EngineError::operation(
                    "engine",
                    message.clone(),
                )));
            }
            EngineEvent::StreamInitialized | EngineEvent::TrackAdded => {}
        }
    }
}

/// Handle to a single engine session; cheap to clone
#[derive(Clone)]
pub struct StreamSession {
    id: Uuid,
    inner: Arc<Mutex<SessionInner>>,
    factory: Arc<dyn EngineFactory>,
    config: Arc<SessionConfig>,
    rewriter: Arc<ManifestRewriter>,
    events: broadcast::Sender<SessionEvent>,
}

impl StreamSession {
    pub fn new(factory: Arc<dyn EngineFactory>, config: SessionConfig) -> PlayerResult<Self> {
        let rewriter = ManifestRewriter::new(config.rewrite_rules.clone())?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Ok(Self {
            id: Uuid::new_v4(),
            inner: Arc::new(Mutex::new(SessionInner {
                state: SessionState::Uninitialized,
                engine: None,
                sink: None,
                manifest_uri: None,
                last_error: None,
                capabilities: EngineCapabilities::none(),
                subscriptions: Vec::new(),
                playback: PlaybackStatus::default(),
                load_generation: 0,
            })),
            factory,
            config: Arc::new(config),
            rewriter: Arc::new(rewriter),
            events,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == SessionState::Destroyed
    }

    /// Manifest URI as handed to the engine, after rewriting
    pub fn manifest_uri(&self) -> Option<String> {
        self.inner.lock().manifest_uri.clone()
    }

    pub fn last_error(&self) -> Option<PlayerError> {
        self.inner.lock().last_error.clone()
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        self.inner.lock().capabilities
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.inner.lock().playback
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn rewriter(&self) -> &ManifestRewriter {
        &self.rewriter
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: Option<SessionEvent>) {
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    /// Create the engine and bind it to `sink`
    pub fn initialize(&self, sink: Option<Arc<dyn MediaSink>>) -> PlayerResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Uninitialized => {}
            SessionState::Destroyed => return Err(PlayerError::destroyed("initialize")),
            state => return Err(PlayerError::invalid_state("initialize", state)),
        }

        let Some(sink) = sink else {
            inner.last_error = Some(PlayerError::SinkMissing);
            error!("Session {} cannot initialize without a media sink", self.id);
            return Err(PlayerError::SinkMissing);
        };

        let event = inner.transition(SessionState::Initializing);
        drop(inner);
        self.publish(event);

        let engine = match self
            .factory
            .check_support()
            .and_then(|_| self.factory.create().map_err(|e| e.to_string()))
        {
            Ok(engine) => engine,
            Err(reason) => {
                let err = PlayerError::EngineUnsupported { reason };
                error!("Session {} initialization failed: {}", self.id, err);
                let mut inner = self.inner.lock();
                inner.last_error = Some(err.clone());
                let event = if inner.state == SessionState::Initializing {
                    inner.transition(SessionState::Uninitialized)
                } else {
                    None
                };
                drop(inner);
                self.publish(event);
                return Err(err);
            }
        };

        let subscriptions: Vec<SubscriptionToken> = EngineEventKind::iter()
            .map(|kind| engine.on(kind, self.forwarding_handler()))
            .collect();
        let capabilities = EngineCapabilities::detect(engine.as_ref());

        let mut inner = self.inner.lock();
        if inner.state == SessionState::Destroyed {
            // Torn down while the engine was being created
            drop(inner);
            for token in subscriptions {
                engine.off(token);
            }
            engine.destroy();
            return Err(PlayerError::destroyed("initialize"));
        }
        inner.engine = Some(engine);
        inner.sink = Some(sink);
        inner.subscriptions = subscriptions;
        inner.capabilities = capabilities;
        inner.last_error = None;
        let event = inner.transition(SessionState::Ready);
        drop(inner);
        self.publish(event);

        info!(
            "Session {} ready (stats: {}, buffered info: {}, text upload: {})",
            self.id, capabilities.stats, capabilities.buffered_info, capabilities.text_track_upload
        );
        Ok(())
    }

    fn forwarding_handler(&self) -> crate::engine::EventHandler {
        let inner: Weak<Mutex<SessionInner>> = Arc::downgrade(&self.inner);
        let events = self.events.clone();
        let id = self.id;
        Arc::new(move |event: EngineEvent| {
            if let EngineEvent::Error { message } = &event {
                error!("Session {} engine error: {}", id, message);
            }
            if let Some(inner) = inner.upgrade() {
                inner.lock().apply_engine_event(&event);
            }
            let _ = events.send(SessionEvent::Engine(event));
        })
    }

    /// Rewrite `manifest_uri` and load it into the engine
    ///
    /// Failures move the session to [`SessionState::Error`] and are returned as
    /// [`PlayerError::LoadFailed`]; the session stays usable for another load.
    pub async fn load(&self, manifest_uri: &str) -> PlayerResult<()> {
        let rewritten = self.rewriter.apply(manifest_uri);

        let (engine, sink, generation) = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Destroyed {
                return Err(PlayerError::destroyed("load"));
            }
            if !inner.state.can_load() {
                return Err(PlayerError::invalid_state("load", inner.state));
            }
            let (Some(engine), Some(sink)) = (inner.engine.clone(), inner.sink.clone()) else {
                return Err(PlayerError::invalid_state("load", inner.state));
            };
            inner.load_generation += 1;
            inner.manifest_uri = Some(rewritten.clone());
            inner.playback.current_time = 0.0;
            inner.playback.duration = None;
            let event = inner.transition(SessionState::Loading);
            let generation = inner.load_generation;
            drop(inner);
            self.publish(event);
            (engine, sink, generation)
        };

        debug!("Session {} loading {}", self.id, rewritten);

        let result = match url::Url::parse(&rewritten) {
            Ok(_) => engine
                .initialize(sink, &rewritten, self.config.autoplay)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(format!("invalid manifest URI: {e}")),
        };

        let mut inner = self.inner.lock();
        if inner.state == SessionState::Destroyed {
            debug!("Session {} destroyed during load of {}; discarding result", self.id, rewritten);
            return Err(PlayerError::destroyed("load"));
        }
        if inner.load_generation != generation {
            return Err(PlayerError::load_failed(rewritten, "superseded by a newer load"));
        }

        match result {
            Ok(()) => {
                inner.last_error = None;
                let event = inner.transition(SessionState::Loaded);
                drop(inner);
                self.publish(event);
                if self.config.text_visible_on_load {
                    engine.set_text_track_visibility(true);
                }
                info!("Session {} loaded {}", self.id, rewritten);
                Ok(())
            }
            Err(cause) => {
                let err = PlayerError::load_failed(rewritten.clone(), cause);
                inner.last_error = Some(err.clone());
                let event = inner.transition(SessionState::Error);
                drop(inner);
                self.publish(event);
                error!("Session {} failed to load {}: {}", self.id, rewritten, err);
                Err(err)
            }
        }
    }

    /// Tear the session down; only the first call has any effect
    ///
    /// Returns whether this call performed the teardown.
    pub fn destroy(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Destroyed {
            return false;
        }
        let engine = inner.engine.take();
        let subscriptions = std::mem::take(&mut inner.subscriptions);
        inner.sink = None;
        inner.playback = PlaybackStatus::default();
        inner.capabilities = EngineCapabilities::none();
        let event = inner.transition(SessionState::Destroyed);
        drop(inner);

        if let Some(engine) = engine {
            for token in subscriptions {
                engine.off(token);
            }
            engine.destroy();
        }
        self.publish(event);
        info!("Session {} destroyed", self.id);
        true
    }

    /// Engine for a user-initiated operation
    pub(crate) fn engine_for(&self, operation: &str) -> PlayerResult<Arc<dyn StreamingEngine>> {
        let inner = self.inner.lock();
        if inner.state == SessionState::Destroyed {
            return Err(PlayerError::destroyed(operation));
        }
        inner
            .engine
            .clone()
            .ok_or_else(|| PlayerError::invalid_state(operation, inner.state))
    }

    pub(crate) fn sink(&self) -> Option<Arc<dyn MediaSink>> {
        self.inner.lock().sink.clone()
    }

    /// Engine handle, only while a manifest is loaded
    fn loaded_engine(&self) -> Option<Arc<dyn StreamingEngine>> {
        let inner = self.inner.lock();
        if inner.state == SessionState::Loaded {
            inner.engine.clone()
        } else {
            None
        }
    }

    /// Variant tracks of the loaded stream; empty unless loaded
    pub fn variant_tracks(&self) -> Vec<VariantTrack> {
        self.loaded_engine()
            .map(|engine| engine.get_variant_tracks())
            .unwrap_or_default()
    }

    /// Text tracks of the loaded stream; empty unless loaded
    pub fn text_tracks(&self) -> Vec<TextTrack> {
        self.loaded_engine()
            .map(|engine| engine.get_text_tracks())
            .unwrap_or_default()
    }

    /// Whether a statistics query can be attempted right now
    pub fn can_provide_stats(&self) -> bool {
        self.telemetry_handle().is_some()
    }

    pub(crate) fn telemetry_handle(&self) -> Option<TelemetryHandle> {
        let inner = self.inner.lock();
        if !inner.capabilities.stats.is_supported() {
            return None;
        }
        match (&inner.engine, &inner.sink) {
            (Some(engine), Some(sink)) => Some(TelemetryHandle {
                engine: engine.clone(),
                sink: sink.clone(),
                capabilities: inner.capabilities,
            }),
            _ => None,
        }
    }

    pub async fn stats(&self) -> PlayerResult<EngineStats> {
        let handle = self.telemetry_handle().ok_or_else(|| PlayerError::StatsUnavailable {
            message: "session cannot provide statistics".to_string(),
        })?;
        handle
            .engine
            .get_stats()
            .await
            .map_err(|e| PlayerError::StatsUnavailable { message: e.to_string() })
    }

    pub fn play(&self) -> PlayerResult<()> {
        self.engine_for("play")?.play()?;
        Ok(())
    }

    pub fn pause(&self) -> PlayerResult<()> {
        self.engine_for("pause")?.pause()?;
        Ok(())
    }

    /// Pause when playing, play otherwise
    pub fn toggle_play(&self) -> PlayerResult<()> {
        if self.playback_status().playing {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Move the playhead, clamped to the known duration
    ///
    /// Returns the position actually requested from the engine.
    pub fn seek(&self, seconds: f64) -> PlayerResult<f64> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(PlayerError::validation(format!("invalid seek position {seconds}")));
        }
        let engine = self.engine_for("seek")?;
        let target = {
            let inner = self.inner.lock();
            if inner.state != SessionState::Loaded {
                return Err(PlayerError::invalid_state("seek", inner.state));
            }
            inner.playback.duration.map_or(seconds, |duration| seconds.min(duration))
        };

        engine.seek(target)?;
        self.inner.lock().playback.current_time = target;
        debug!("Session {} seeked to {:.3}s", self.id, target);
        Ok(target)
    }

    /// Current engine configuration as pretty JSON, `"{}"` when not exposed
    pub fn engine_configuration(&self) -> PlayerResult<String> {
        let engine = self.engine_for("getConfiguration")?;
        if !self.capabilities().configuration.is_supported() {
            return Ok("{}".to_string());
        }
        match engine.get_configuration() {
            Ok(value) => serde_json::to_string_pretty(&value)
                .map_err(|e| PlayerError::configuration(format!("unserializable engine configuration: {e}"))),
            Err(e) => {
                warn!("Session {} could not read engine configuration: {}", self.id, e);
                Ok("{}".to_string())
            }
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("manifest_uri", &inner.manifest_uri)
            .field("capabilities", &inner.capabilities)
            .finish()
    }
}
