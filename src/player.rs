//! Player composition root
//!
//! Wires one [`StreamSession`], its [`TrackController`] and a [`MetricsSampler`]
//! together, refreshes tracks whenever the engine announces a stream or a new
//! track, and tears everything down in a fixed order: sampler first, then the
//! track references, then the session.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chart::ChartSink;
use crate::config::Config;
use crate::engine::{EngineEvent, EngineFactory, MediaSink};
use crate::errors::{PlayerError, PlayerResult};
use crate::metrics::MetricsSampler;
use crate::session::{SessionEvent, SessionState, StreamSession};
use crate::tracks::TrackController;

pub struct Player {
    session: StreamSession,
    tracks: Arc<TrackController>,
    sampler: MetricsSampler,
    pump: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl Player {
    pub fn new(factory: Arc<dyn EngineFactory>, config: &Config, chart: Arc<dyn ChartSink>) -> PlayerResult<Self> {
        let session = StreamSession::new(factory, config.session.clone())?;
        let tracks = Arc::new(TrackController::new(session.clone()));
        let sampler = MetricsSampler::new(config.sampler, chart)?;
        sampler.attach(session.clone(), tracks.clone());

        Ok(Self {
            session,
            tracks,
            sampler,
            pump: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn tracks(&self) -> &TrackController {
        &self.tracks
    }

    pub fn sampler(&self) -> &MetricsSampler {
        &self.sampler
    }

    /// Bind the engine to `sink` and start pumping engine events
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, sink: Option<Arc<dyn MediaSink>>) -> PlayerResult<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(PlayerError::destroyed("attach"));
        }
        let events = self.session.subscribe();
        self.session.initialize(sink)?;

        let task = tokio::spawn(pump_events(events, self.tracks.clone()));
        if let Some(previous) = self.pump.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Load a manifest and refresh the selectable tracks
    pub async fn load(&self, manifest_uri: &str) -> PlayerResult<()> {
        self.session.load(manifest_uri).await?;
        self.tracks.refresh_tracks()
    }

    pub fn start_sampling(&self) -> PlayerResult<bool> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(PlayerError::destroyed("startSampling"));
        }
        Ok(self.sampler.start())
    }

    pub fn stop_sampling(&self) -> bool {
        self.sampler.stop()
    }

    /// Stop sampling, drop track references and destroy the session
    ///
    /// Idempotent; returns whether this call did the teardown.
    pub fn teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.sampler.stop();
        self.sampler.detach();
        self.tracks.release();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.session.destroy();
        info!("Player for session {} torn down", self.session.id());
        true
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn pump_events(mut events: broadcast::Receiver<SessionEvent>, tracks: Arc<TrackController>) {
    loop {
        let refresh = match events.recv().await {
            Ok(SessionEvent::Engine(EngineEvent::StreamInitialized | EngineEvent::TrackAdded)) => true,
            Ok(SessionEvent::StateChanged {
                to: SessionState::Destroyed,
                ..
            }) => break,
            Ok(_) => false,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Session event pump lagged by {} events; refreshing tracks", skipped);
                true
            }
            Err(RecvError::Closed) => break,
        };

        if refresh {
            if let Err(e) = tracks.refresh_tracks() {
                debug!("Track refresh stopped: {}", e);
                break;
            }
        }
    }
    debug!("Session event pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChannelChartSink, ChartEvent, Metric, NullChartSink};
    use crate::engine::simulated::{SimulatedEngine, SimulatedSink};
    use crate::engine::{EngineStats, MockStreamingEngine, PrebuiltEngineFactory, StreamingEngine, SubscriptionToken};
    use crate::tracks::SubtitleUpload;
    use std::sync::Weak;
    use std::time::Duration;

    fn player_with(engine: Arc<SimulatedEngine>, chart: Arc<dyn ChartSink>) -> Player {
        Player::new(Arc::new(PrebuiltEngineFactory::new(engine)), &Config::default(), chart).unwrap()
    }

    fn sink() -> Option<Arc<dyn MediaSink>> {
        Some(Arc::new(SimulatedSink::new()))
    }

    #[tokio::test]
    async fn test_load_populates_tracks() {
        let engine = Arc::new(SimulatedEngine::new());
        let player = player_with(engine, Arc::new(NullChartSink));
        player.attach(sink()).unwrap();
        player.load("http://cdn.example.net/live.mpd").await.unwrap();

        assert_eq!(player.tracks().variant_tracks().len(), 3);
        assert_eq!(player.tracks().subtitle_tracks().len(), 1);
    }

    #[tokio::test]
    async fn test_track_added_event_refreshes_tracks() {
        let engine = Arc::new(SimulatedEngine::new());
        let player = player_with(engine.clone(), Arc::new(NullChartSink));
        player.attach(sink()).unwrap();
        player.load("http://cdn.example.net/live.mpd").await.unwrap();

        // Added behind the controller's back; only the event pump can notice
        let source = crate::tracks::subtitles::validate(&SubtitleUpload::new("extra.vtt", "WEBVTT\n", "fr"))
            .unwrap()
            .to_source();
        engine.add_text_track(&source).unwrap();

        for _ in 0..50 {
            if player.tracks().subtitle_tracks().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(player.tracks().subtitle_tracks().len(), 2);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let engine = Arc::new(SimulatedEngine::new());
        let player = player_with(engine.clone(), Arc::new(NullChartSink));
        player.attach(sink()).unwrap();
        player.load("http://cdn.example.net/live.mpd").await.unwrap();
        player.start_sampling().unwrap();

        assert!(player.teardown());
        assert!(!player.teardown());
        drop(player);

        assert_eq!(engine.destroy_count(), 1);
        assert_eq!(engine.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_operations_after_teardown_fail() {
        let player = player_with(Arc::new(SimulatedEngine::new()), Arc::new(NullChartSink));
        player.attach(sink()).unwrap();
        player.teardown();

        assert!(matches!(
            player.load("http://cdn.example.net/live.mpd").await,
            Err(PlayerError::SessionDestroyed { .. })
        ));
        assert!(player.start_sampling().is_err());
        assert!(matches!(
            player.tracks().select_quality(crate::tracks::QualitySelector::Auto),
            Err(PlayerError::SessionDestroyed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_reach_chart_sink() {
        let chart = Arc::new(ChannelChartSink::new(64));
        let mut updates = chart.subscribe();
        let engine = Arc::new(SimulatedEngine::new().with_bandwidth_script(vec![2e6]));
        let player = player_with(engine, chart);
        player.attach(sink()).unwrap();
        player.load("http://cdn.example.net/live.mpd").await.unwrap();

        player.start_sampling().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        player.teardown();

        let mut seen = Vec::new();
        while let Ok(event) = updates.try_recv() {
            seen.push(event);
        }
        assert!(seen.iter().any(|event| matches!(
            event,
            ChartEvent::Update(update) if update.values == vec![Some(2.0)]
        )));
    }

    /// Tears its player down from inside the first chart update
    struct TeardownOnUpdate {
        player: Mutex<Weak<Player>>,
    }

    impl ChartSink for TeardownOnUpdate {
        fn update(&self, _metric: Metric, _labels: &[String], _values: &[Option<f64>]) {
            if let Some(player) = self.player.lock().upgrade() {
                player.teardown();
            }
        }

        fn clear(&self, _metric: Metric) {}
    }

    #[tokio::test]
    async fn test_chart_sink_may_tear_player_down() {
        let chart = Arc::new(TeardownOnUpdate {
            player: Mutex::new(Weak::new()),
        });
        let engine = Arc::new(SimulatedEngine::new().with_bandwidth_script(vec![1e6]));
        let player = Arc::new(player_with(engine.clone(), chart.clone()));
        *chart.player.lock() = Arc::downgrade(&player);
        player.attach(sink()).unwrap();
        player.load("http://cdn.example.net/live.mpd").await.unwrap();
        player.start_sampling().unwrap();

        player.sampler().poll().await;
        assert!(player.is_torn_down());
        assert!(!player.sampler().is_running());
        assert_eq!(engine.destroy_count(), 1);
    }

    #[tokio::test]
    async fn test_teardown_order() {
        let player_slot: Arc<Mutex<Weak<Player>>> = Arc::new(Mutex::new(Weak::new()));
        let order_ok = Arc::new(AtomicBool::new(false));

        let mut engine = MockStreamingEngine::new();
        engine.expect_on().returning(|_, _| SubscriptionToken(1));
        engine.expect_off().return_const(());
        engine.expect_supports_stats().return_const(true);
        engine.expect_supports_buffered_info().return_const(false);
        engine.expect_supports_text_track_upload().return_const(false);
        engine.expect_supports_configuration().return_const(false);
        engine.expect_get_stats().returning(|| Ok(EngineStats::default()));
        let slot = player_slot.clone();
        let ok = order_ok.clone();
        engine.expect_destroy().times(1).returning(move || {
            if let Some(player) = slot.lock().upgrade() {
                let sampler_stopped = !player.sampler().is_running();
                let tracks_released = player.tracks().variant_tracks().is_empty();
                ok.store(sampler_stopped && tracks_released, Ordering::SeqCst);
            }
        });

        let player = Arc::new(
            Player::new(
                Arc::new(PrebuiltEngineFactory::new(Arc::new(engine))),
                &Config::default(),
                Arc::new(NullChartSink),
            )
            .unwrap(),
        );
        *player_slot.lock() = Arc::downgrade(&player);

        player.attach(sink()).unwrap();
        player.start_sampling().unwrap();
        assert!(player.sampler().is_running());

        assert!(player.teardown());
        assert!(order_ok.load(Ordering::SeqCst));
    }
}
