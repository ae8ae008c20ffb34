//! TOML configuration, loaded from `EVBD_CONFIG` or `/etc/evbd/evbd.toml`,
//! falling back to defaults when the file is missing. Grounded on
//! `cognitod::config::Config`'s `#[serde(default)]` field-group pattern.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use evb_core::{BuildWindowMode, EngineConfig};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "/etc/evbd/evbd.toml";
const CONFIG_ENV_VAR: &str = "EVBD_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: SocketAddr,
    pub control_listen: SocketAddr,
    pub sink: SinkConfig,
    pub engine: EngineSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: "0.0.0.0:9700".parse().unwrap(),
            control_listen: "127.0.0.1:9701".parse().unwrap(),
            sink: SinkConfig::default(),
            engine: EngineSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SinkConfig {
    /// `None` writes merged events to stdout; `Some(path)` writes to the
    /// named file, created if it does not exist.
    pub path: Option<PathBuf>,
    pub max_write_bytes: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            path: None,
            max_write_bytes: evb_core::output::DEFAULT_MAX_WRITE,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineSettings {
    pub build_window_mode: BuildWindowModeSetting,
    pub build_window_ms: u64,
    pub startup_timeout_ms: u64,
    pub xoff_frags: usize,
    pub xon_frags: usize,
    pub per_queue_xoff_frags: usize,
    pub per_queue_xon_frags: usize,
    pub idle_poll_period_ms: u64,
    pub malformed_barrier_window_multiplier: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        EngineSettings {
            build_window_mode: BuildWindowModeSetting::StampMark,
            build_window_ms: defaults.build_window.as_millis() as u64,
            startup_timeout_ms: defaults.startup_timeout.as_millis() as u64,
            xoff_frags: defaults.xoff_frags,
            xon_frags: defaults.xon_frags,
            per_queue_xoff_frags: defaults.per_queue_xoff_frags,
            per_queue_xon_frags: defaults.per_queue_xon_frags,
            idle_poll_period_ms: defaults.idle_poll_period.as_millis() as u64,
            malformed_barrier_window_multiplier: defaults.malformed_barrier_window_multiplier,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildWindowModeSetting {
    StampMark,
    WallClock,
}

impl EngineSettings {
    pub fn to_engine_config(self) -> EngineConfig {
        EngineConfig {
            build_window_mode: match self.build_window_mode {
                BuildWindowModeSetting::StampMark => BuildWindowMode::StampMark,
                BuildWindowModeSetting::WallClock => BuildWindowMode::WallClock,
            },
            build_window: Duration::from_millis(self.build_window_ms),
            startup_timeout: Duration::from_millis(self.startup_timeout_ms),
            xoff_frags: self.xoff_frags,
            xon_frags: self.xon_frags,
            per_queue_xoff_frags: self.per_queue_xoff_frags,
            per_queue_xon_frags: self.per_queue_xon_frags,
            idle_poll_period: Duration::from_millis(self.idle_poll_period_ms),
            malformed_barrier_window_multiplier: self.malformed_barrier_window_multiplier,
        }
    }
}

impl Config {
    /// Load from `EVBD_CONFIG` if set, else `/etc/evbd/evbd.toml` if it
    /// exists, else compiled-in defaults. A present-but-malformed file is
    /// an error; a missing default path is not.
    pub fn load() -> anyhow::Result<Config> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from(Path::new(&path));
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from(default_path);
        }
        Ok(Config::default())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_as_a_valid_config() {
        let config = Config::default();
        assert_eq!(config.sink.max_write_bytes, evb_core::output::DEFAULT_MAX_WRITE);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let toml_text = r#"
            [engine]
            xoff_frags = 50
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.engine.xoff_frags, 50);
        assert_eq!(config.engine.xon_frags, EngineSettings::default().xon_frags);
        assert_eq!(config.listen, Config::default().listen);
    }
}
