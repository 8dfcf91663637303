use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub volume: VolumeConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub actuator: RampConfig,
    #[serde(default)]
    pub sites: SitesConfig,
    #[serde(default)]
    pub mode: ModeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl BridgeConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Quiet period after the last trigger before an evaluation runs.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Delay before re-evaluating after a treatment failed to apply.
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
}

impl TimingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(default = "default_reduced_volume")]
    pub reduced: f64,
    #[serde(default = "default_full_volume")]
    pub full: f64,
}

/// How the coordinator decides whether a video is "playing" for the purpose
/// of a treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationPolicy {
    /// Only the focused tab counts.
    ActiveTab,
    /// Any tracked tab counts, focused or not.
    AnyTab,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_duck_policy")]
    pub duck: ArbitrationPolicy,
    #[serde(default = "default_pause_policy")]
    pub pause: ArbitrationPolicy,
}

/// Volume ramp and playback retry tuning for the in-tab actuator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RampConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_max_tick_delta_ms")]
    pub max_tick_delta_ms: u64,
    /// Volume units per second.
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_playback_retry_ms")]
    pub playback_retry_ms: u64,
}

impl RampConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn max_tick_delta(&self) -> Duration {
        Duration::from_millis(self.max_tick_delta_ms)
    }

    pub fn playback_retry(&self) -> Duration {
        Duration::from_millis(self.playback_retry_ms)
    }
}

/// Match patterns per site. See `sites::UrlPattern` for the syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitesConfig {
    #[serde(default = "default_youtube_patterns")]
    pub youtube: Vec<String>,
    #[serde(default = "default_instagram_patterns")]
    pub instagram: Vec<String>,
    #[serde(default = "default_player_patterns")]
    pub player: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    #[serde(default = "default_mode_store_file")]
    pub store_file: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            retry_ms: default_retry_ms(),
        }
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            reduced: default_reduced_volume(),
            full: default_full_volume(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            duck: default_duck_policy(),
            pause: default_pause_policy(),
        }
    }
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            max_tick_delta_ms: default_max_tick_delta_ms(),
            rate_per_sec: default_rate_per_sec(),
            epsilon: default_epsilon(),
            playback_retry_ms: default_playback_retry_ms(),
        }
    }
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            youtube: default_youtube_patterns(),
            instagram: default_instagram_patterns(),
            player: default_player_patterns(),
        }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            store_file: default_mode_store_file(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::BRIDGE_TCP_PORT
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_retry_ms() -> u64 {
    1000
}

fn default_reduced_volume() -> f64 {
    0.3
}

fn default_full_volume() -> f64 {
    1.0
}

fn default_duck_policy() -> ArbitrationPolicy {
    ArbitrationPolicy::ActiveTab
}

fn default_pause_policy() -> ArbitrationPolicy {
    ArbitrationPolicy::AnyTab
}

fn default_tick_ms() -> u64 {
    32
}

fn default_max_tick_delta_ms() -> u64 {
    120
}

fn default_rate_per_sec() -> f64 {
    3.0
}

fn default_epsilon() -> f64 {
    0.02
}

fn default_playback_retry_ms() -> u64 {
    200
}

fn default_youtube_patterns() -> Vec<String> {
    vec![
        "*://www.youtube.com/*".to_string(),
        "*://youtube.com/*".to_string(),
        "*://m.youtube.com/*".to_string(),
    ]
}

fn default_instagram_patterns() -> Vec<String> {
    vec![
        "*://www.instagram.com/*".to_string(),
        "*://instagram.com/*".to_string(),
        "*://m.instagram.com/*".to_string(),
    ]
}

fn default_player_patterns() -> Vec<String> {
    vec!["*://open.spotify.com/*".to_string()]
}

fn default_mode_store_file() -> PathBuf {
    platform::data_dir().join("mode.json")
}

impl Config {
    /// Loads and validates the config, writing defaults on first run.
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the coordinator or actuator cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("volume.reduced", self.volume.reduced),
            ("volume.full", self.volume.full),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be between 0 and 1, got {}", name, value);
            }
        }
        if self.timing.retry_ms == 0 {
            bail!("timing.retry_ms must be greater than 0");
        }

        let ramp = &self.actuator;
        if ramp.tick_ms == 0 {
            bail!("actuator.tick_ms must be greater than 0");
        }
        if ramp.max_tick_delta_ms == 0 {
            bail!("actuator.max_tick_delta_ms must be greater than 0");
        }
        if ramp.playback_retry_ms == 0 {
            bail!("actuator.playback_retry_ms must be greater than 0");
        }
        if ramp.epsilon.is_nan() || ramp.epsilon < 0.0 {
            bail!("actuator.epsilon must not be negative, got {}", ramp.epsilon);
        }
        if ramp.rate_per_sec.is_nan() || ramp.rate_per_sec < 0.0 {
            bail!("actuator.rate_per_sec must not be negative, got {}", ramp.rate_per_sec);
        }
        Ok(())
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bridge.address(), "127.0.0.1:9877");
        assert_eq!(config.timing.debounce(), Duration::from_millis(300));
        assert_eq!(config.timing.retry(), Duration::from_millis(1000));
        assert_eq!(config.volume.reduced, 0.3);
        assert_eq!(config.policy.duck, ArbitrationPolicy::ActiveTab);
        assert_eq!(config.policy.pause, ArbitrationPolicy::AnyTab);
        assert_eq!(config.actuator.tick_ms, 32);
        assert_eq!(config.sites.player, vec!["*://open.spotify.com/*"]);
        assert!(config.mode.store_file.ends_with("duck/mode.json"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [timing]
            debounce_ms = 50

            [policy]
            duck = "any_tab"
            "#,
        )
        .unwrap();
        assert_eq!(config.timing.debounce_ms, 50);
        assert_eq!(config.timing.retry_ms, 1000);
        assert_eq!(config.policy.duck, ArbitrationPolicy::AnyTab);
        assert_eq!(config.sites.youtube.len(), 3);
    }

    #[test]
    fn test_load_from_creates_then_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let first = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(first.bridge.port, 9877);

        let mut edited = first.clone();
        edited.volume.reduced = 0.5;
        edited.save_to(&path).unwrap();
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.volume.reduced, 0.5);
    }

    #[test]
    fn test_load_from_rejects_unusable_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        for (toml, field) in [
            ("[volume]\nreduced = 30\n", "volume.reduced"),
            ("[volume]\nfull = -0.5\n", "volume.full"),
            ("[actuator]\ntick_ms = 0\n", "actuator.tick_ms"),
            ("[actuator]\nepsilon = -0.1\n", "actuator.epsilon"),
            ("[actuator]\nrate_per_sec = nan\n", "actuator.rate_per_sec"),
            ("[timing]\nretry_ms = 0\n", "timing.retry_ms"),
        ] {
            std::fs::write(&path, toml).unwrap();
            let err = Config::load_from(&path).unwrap_err();
            assert!(err.to_string().contains(field), "{}: {}", field, err);
        }

        std::fs::write(&path, "[volume]\nreduced = 0\nfull = 1\n").unwrap();
        assert!(Config::load_from(&path).is_ok());
    }
}
