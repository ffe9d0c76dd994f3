//! End-to-end pipeline tests driven through the public API

use std::sync::Arc;
use std::time::Duration;

use playback_monitor::{
    Player,
    chart::{ChannelChartSink, Metric, NullChartSink},
    config::{Config, SamplerConfig, SessionConfig},
    engine::{
        MediaSink, PrebuiltEngineFactory, TimeRange,
        simulated::{SimulatedEngine, SimulatedSink},
    },
    errors::PlayerError,
    metrics::{BufferSource, PollOutcome},
    session::{ManifestRewriteRule, SessionState},
    tracks::{QualitySelector, SelectionOutcome, SubtitleSelector, SubtitleUpload},
};

const CUES: &str = "WEBVTT\n\n00:00.000 --> 00:04.000\nBonjour\n";

fn config(interval_ms: u64, max_points: usize) -> Config {
    Config {
        sampler: SamplerConfig::new(Duration::from_millis(interval_ms), max_points).unwrap(),
        session: SessionConfig {
            rewrite_rules: vec![
                ManifestRewriteRule::new("https://rr.example.net", "http://origin.example.net"),
                ManifestRewriteRule::new("/Manifest", "/manifest.mpd"),
            ],
            ..SessionConfig::default()
        },
    }
}

async fn loaded_player(engine: Arc<SimulatedEngine>, config: Config) -> (Player, Arc<SimulatedSink>) {
    let sink = Arc::new(SimulatedSink::new());
    let player = Player::new(
        Arc::new(PrebuiltEngineFactory::new(engine)),
        &config,
        Arc::new(NullChartSink),
    )
    .unwrap();
    let media: Arc<dyn MediaSink> = sink.clone();
    player.attach(Some(media)).unwrap();
    player.load("https://rr.example.net/live/ch7/Manifest").await.unwrap();
    (player, sink)
}

#[tokio::test(start_paused = true)]
async fn bandwidth_window_keeps_latest_three_samples() {
    let engine = Arc::new(SimulatedEngine::new().with_bandwidth_script(vec![1e6, 2e6, 3e6, 4e6, 5e6]));
    let (player, _sink) = loaded_player(engine, config(1000, 3)).await;

    player.start_sampling().unwrap();
    tokio::time::sleep(Duration::from_millis(4500)).await;
    player.stop_sampling();

    let values: Vec<f64> = player
        .sampler()
        .values(Metric::Bandwidth)
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(values, vec![3.0, 4.0, 5.0]);
    assert_eq!(player.sampler().labels(Metric::Bandwidth).len(), 3);
}

#[tokio::test]
async fn manifest_is_rewritten_before_load() {
    let engine = Arc::new(SimulatedEngine::new());
    let (player, _sink) = loaded_player(engine.clone(), config(1000, 10)).await;

    let expected = "http://origin.example.net/live/ch7/manifest.mpd";
    assert_eq!(player.session().state(), SessionState::Loaded);
    assert_eq!(player.session().manifest_uri().as_deref(), Some(expected));
    assert_eq!(engine.loaded_uri().as_deref(), Some(expected));
}

#[tokio::test]
async fn failed_load_can_be_retried() {
    let engine = Arc::new(SimulatedEngine::new().fail_loads_matching("offline"));
    let player = Player::new(
        Arc::new(PrebuiltEngineFactory::new(engine)),
        &Config::default(),
        Arc::new(NullChartSink),
    )
    .unwrap();
    let media: Arc<dyn MediaSink> = Arc::new(SimulatedSink::new());
    player.attach(Some(media)).unwrap();

    let err = player.load("http://cdn.example.net/offline.mpd").await.unwrap_err();
    assert!(matches!(err, PlayerError::LoadFailed { .. }));
    assert!(err.is_recoverable());
    assert!(player.tracks().variant_tracks().is_empty());

    player.load("http://cdn.example.net/online.mpd").await.unwrap();
    assert_eq!(player.tracks().variant_tracks().len(), 3);
}

#[tokio::test]
async fn quality_and_subtitle_selection() {
    let engine = Arc::new(SimulatedEngine::new());
    let (player, _sink) = loaded_player(engine.clone(), config(1000, 10)).await;
    let tracks = player.tracks();

    tracks.select_quality("auto".parse().unwrap()).unwrap();
    assert!(engine.abr_enabled());
    tracks.select_quality("1".parse().unwrap()).unwrap();
    assert!(!engine.abr_enabled());
    assert_eq!(tracks.pinned_variant().map(|t| t.id), Some(1));

    let outcome = tracks.select_quality(QualitySelector::Index(9)).unwrap();
    assert!(matches!(outcome, SelectionOutcome::Ignored(_)));
    assert_eq!(tracks.pinned_variant().map(|t| t.id), Some(1));

    tracks
        .add_external_subtitle(&SubtitleUpload::new("French.vtt", CUES, "fr"))
        .unwrap();
    let subtitles = tracks.subtitle_tracks();
    assert_eq!(subtitles.len(), 2);

    for index in 0..subtitles.len() {
        tracks.select_subtitle(SubtitleSelector::Index(index)).unwrap();
        assert_eq!(tracks.subtitle_tracks().iter().filter(|t| t.active).count(), 1);
    }
    tracks.select_subtitle("".parse().unwrap()).unwrap();
    assert!(tracks.subtitle_tracks().iter().all(|t| !t.active));
    assert!(!engine.text_visible());
}

#[tokio::test]
async fn stats_failure_does_not_break_sampling() {
    let engine = Arc::new(SimulatedEngine::new().with_bandwidth_script(vec![4e6]));
    let (player, _sink) = loaded_player(engine.clone(), config(1000, 10)).await;

    engine.fail_next_stats("engine busy");
    assert!(matches!(player.sampler().poll().await, PollOutcome::Failed(_)));
    assert_eq!(player.sampler().len(Metric::Bandwidth), 0);
    assert!(player.sampler().diagnostic_text().contains("engine busy"));

    let snapshot = player.sampler().force_snapshot().await.unwrap();
    assert_eq!(snapshot.estimated_bandwidth, Some(4.0));
    assert_eq!(player.sampler().len(Metric::Bandwidth), 1);
}

#[tokio::test]
async fn buffer_length_prefers_engine_ranges() {
    let engine = Arc::new(SimulatedEngine::new().with_buffered_ranges(vec![TimeRange::new(0.0, 12.0)]));
    let (player, sink) = loaded_player(engine.clone(), config(1000, 10)).await;
    sink.set_buffered(vec![TimeRange::new(0.0, 5.0)]);
    sink.set_current_time(4.0);

    let snapshot = player.sampler().force_snapshot().await.unwrap();
    assert_eq!(snapshot.buffer_len, Some(8.0));
    assert_eq!(snapshot.buffer_source, Some(BufferSource::Engine));

    // Pinning a variant clears the engine buffer; the sink becomes the source
    player.tracks().select_quality(QualitySelector::Index(0)).unwrap();
    let snapshot = player.sampler().force_snapshot().await.unwrap();
    assert_eq!(snapshot.buffer_len, Some(1.0));
    assert_eq!(snapshot.buffer_source, Some(BufferSource::Sink));
}

#[tokio::test(start_paused = true)]
async fn teardown_stops_everything_once() {
    let chart = Arc::new(ChannelChartSink::new(256));
    let mut updates = chart.subscribe();
    let engine = Arc::new(SimulatedEngine::new().with_bandwidth_script(vec![1e6]));
    let player = Player::new(
        Arc::new(PrebuiltEngineFactory::new(engine.clone())),
        &config(500, 10),
        chart,
    )
    .unwrap();
    let media: Arc<dyn MediaSink> = Arc::new(SimulatedSink::new());
    player.attach(Some(media)).unwrap();
    player.load("http://cdn.example.net/live.mpd").await.unwrap();
    player.start_sampling().unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert!(player.teardown());
    assert!(!player.teardown());
    assert_eq!(engine.destroy_count(), 1);
    assert!(!player.sampler().is_running());

    while updates.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(matches!(
        updates.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}
