/// Configuration default values
///
/// Every default lives here so it can be changed in one place.
// Sampler defaults
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_POINTS: usize = 120;

// Session defaults
pub const DEFAULT_AUTOPLAY: bool = false;
pub const DEFAULT_TEXT_VISIBLE_ON_LOAD: bool = true;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

// Config file location
pub const DEFAULT_CONFIG_FILE: &str = "playback-monitor.toml";
pub const ENV_PREFIX: &str = "PLAYBACK_MONITOR_";
