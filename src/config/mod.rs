use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::errors::{PlayerError, PlayerResult};
use crate::session::ManifestRewriteRule;

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Telemetry polling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    #[serde(default = "default_poll_interval", with = "duration_serde::millis")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_points")]
    pub max_points: usize,
}

impl SamplerConfig {
    pub fn new(poll_interval: Duration, max_points: usize) -> PlayerResult<Self> {
        let config = Self {
            poll_interval,
            max_points,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PlayerResult<()> {
        if self.poll_interval.is_zero() {
            return Err(PlayerError::configuration("sampler poll_interval must be greater than zero"));
        }
        if self.max_points == 0 {
            return Err(PlayerError::configuration("sampler max_points must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_points: default_max_points(),
        }
    }
}

/// Engine session behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
    /// Turn subtitle rendering on once a manifest is loaded
    #[serde(default = "default_text_visible_on_load")]
    pub text_visible_on_load: bool,
    /// Capacity of the session event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Applied in order to every manifest URI before load
    #[serde(default)]
    pub rewrite_rules: Vec<ManifestRewriteRule>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autoplay: default_autoplay(),
            text_visible_on_load: default_text_visible_on_load(),
            event_capacity: default_event_capacity(),
            rewrite_rules: Vec::new(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
}

fn default_max_points() -> usize {
    DEFAULT_MAX_POINTS
}

fn default_autoplay() -> bool {
    DEFAULT_AUTOPLAY
}

fn default_text_visible_on_load() -> bool {
    DEFAULT_TEXT_VISIBLE_ON_LOAD
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Config {
    /// Load `config_file` with `PLAYBACK_MONITOR_*` environment overrides
    ///
    /// Nested keys use a double underscore, e.g.
    /// `PLAYBACK_MONITOR_SAMPLER__MAX_POINTS=60`.
    pub fn load(config_file: &str) -> Result<Self> {
        if !Path::new(config_file).exists() {
            Self::write_default(config_file)?;
        }

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load `config_file` as plain TOML, writing the defaults there if it is missing
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        let config = if Path::new(config_file).exists() {
            let contents = std::fs::read_to_string(config_file)?;
            toml::from_str::<Self>(&contents)?
        } else {
            Self::write_default(config_file)?
        };
        config.validate()?;
        Ok(config)
    }

    fn write_default(config_file: &str) -> Result<Self> {
        let default_config = Self::default();
        let contents = toml::to_string_pretty(&default_config)?;
        std::fs::write(config_file, contents)?;
        info!("Created default config file: {}", config_file);
        Ok(default_config)
    }

    pub fn validate(&self) -> PlayerResult<()> {
        self.sampler.validate()?;
        crate::session::ManifestRewriter::new(self.session.rewrite_rules.clone())?;
        if self.session.event_capacity == 0 {
            return Err(PlayerError::configuration("session event_capacity must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[sampler]
poll_interval = "250ms"
max_points = 30

[session]
autoplay = true

[[session.rewrite_rules]]
match = "__op/hls-fp"
replacement = "__op/dash-default"

[[session.rewrite_rules]]
match = "/Manifest"
replacement = "/manifest.mpd"
"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sampler.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.sampler.max_points, 120);
        assert!(!config.session.autoplay);
        assert!(config.session.text_visible_on_load);
        assert!(config.session.rewrite_rules.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample_file() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.sampler.poll_interval, Duration::from_millis(250));
        assert_eq!(config.sampler.max_points, 30);
        assert!(config.session.autoplay);
        assert!(config.session.text_visible_on_load);
        assert_eq!(
            config.session.rewrite_rules,
            vec![
                ManifestRewriteRule::new("__op/hls-fp", "__op/dash-default"),
                ManifestRewriteRule::new("/Manifest", "/manifest.mpd"),
            ]
        );
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(SamplerConfig::new(Duration::ZERO, 10).is_err());
        assert!(SamplerConfig::new(Duration::from_millis(100), 0).is_err());
        assert!(SamplerConfig::new(Duration::from_millis(100), 1).is_ok());
    }

    #[test]
    fn test_load_from_file_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.toml");
        let path = path.to_str().unwrap();

        let config = Config::load_from_file(path).unwrap();
        assert_eq!(config, Config::default());

        let written = std::fs::read_to_string(path).unwrap();
        let reparsed: Config = toml::from_str(&written).unwrap();
        assert_eq!(reparsed, Config::default());
    }

    #[test]
    fn test_load_from_file_rejects_empty_rewrite_match() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[[session.rewrite_rules]]\nmatch = \"\"\nreplacement = \"x\"\n").unwrap();
        assert!(Config::load_from_file(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("monitor.toml", SAMPLE)?;
            jail.set_env("PLAYBACK_MONITOR_SAMPLER__MAX_POINTS", "5");
            jail.set_env("PLAYBACK_MONITOR_SESSION__AUTOPLAY", "false");

            let config = Config::load("monitor.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.sampler.max_points, 5);
            assert_eq!(config.sampler.poll_interval, Duration::from_millis(250));
            assert!(!config.session.autoplay);
            assert_eq!(config.session.rewrite_rules.len(), 2);
            Ok(())
        });
    }
}
