use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playback_monitor::{
    Player,
    chart::TracingChartSink,
    config::{Config, defaults::DEFAULT_CONFIG_FILE},
    engine::{
        EngineEvent, MediaSink, PrebuiltEngineFactory, TimeRange,
        simulated::{SimulatedEngine, SimulatedSink},
    },
    tracks::{QualitySelector, SubtitleSelector},
};

#[derive(Parser)]
#[command(name = "playback-monitor")]
#[command(version)]
#[command(about = "Drive a simulated adaptive-streaming session and log its live telemetry")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Manifest URI to load (rewrite rules from the config apply)
    #[arg(short, long, default_value = "https://cdn.example.net/live/channel-1/manifest.mpd")]
    manifest: String,

    /// Number of sampler ticks to run before tearing down
    #[arg(short, long, default_value_t = 10)]
    ticks: u32,

    /// Poll interval override, e.g. "500ms" or "2s"
    #[arg(short, long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Quality selection: "auto" or a variant index
    #[arg(short, long)]
    quality: Option<QualitySelector>,

    /// Subtitle selection: "" for off or a track index
    #[arg(short, long)]
    subtitle: Option<SubtitleSelector>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("playback_monitor={}", cli.log_level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting playback monitor v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);
    if let Some(interval) = cli.interval {
        config.sampler.poll_interval = interval;
    }
    config.sampler.validate()?;

    let ticks = cli.ticks.max(1);
    let ramp: Vec<f64> = (0..ticks).map(|i| 1_500_000.0 + f64::from(i) * 450_000.0).collect();
    let buffered = vec![TimeRange::new(0.0, 30.0), TimeRange::new(32.0, 90.0)];
    let engine = Arc::new(
        SimulatedEngine::new()
            .with_bandwidth_script(ramp)
            .with_buffered_ranges(buffered.clone()),
    );
    let sink = Arc::new(SimulatedSink::new());
    sink.set_buffered(buffered);

    let player = Player::new(
        Arc::new(PrebuiltEngineFactory::new(engine.clone())),
        &config,
        Arc::new(TracingChartSink),
    )?;
    let media: Arc<dyn MediaSink> = sink.clone();
    player.attach(Some(media))?;
    player.load(&cli.manifest).await?;

    for track in player.tracks().variant_tracks() {
        info!("Variant {}: {}", track.id, track.label);
    }
    if let Some(selector) = cli.quality {
        player.tracks().select_quality(selector)?;
    }
    if let Some(selector) = cli.subtitle {
        player.tracks().select_subtitle(selector)?;
    }

    player.start_sampling()?;
    let period = config.sampler.poll_interval;
    let mut playhead = 0.0;

    for tick in 1..=ticks {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted after {} ticks", tick - 1);
                break;
            }
        }
        playhead += period.as_secs_f64();
        sink.set_current_time(playhead);
        engine.emit(EngineEvent::TimeUpdated {
            current_time: playhead,
            duration: None,
        });
        info!("{}", serde_json::to_string(&player.sampler().diagnostic())?);
    }

    let status = player.session().playback_status();
    info!("Stopped at {:.1}s", status.current_time);
    player.teardown();
    info!("Engine destroyed {} time(s)", engine.destroy_count());
    Ok(())
}
