//! Engine configuration.
//!
//! Every knob has a default. [`EngineConfig::from_env`] overrides them from
//! `CODRAW_*` environment variables; the `codraw` binary layers CLI flags on
//! top.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Remote classify/generate endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL; `co-draw` and `analyze-workspace` are resolved against it.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321/functions/v1/".to_string(),
            api_key: None,
        }
    }
}

/// Generation pipeline tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Whether settled canvas activity triggers a generation.
    pub auto_enabled: bool,
    /// Largest snapshot side in pixels.
    pub snapshot_max_dimension: u32,
    /// Snapshot JPEG quality (1-100).
    pub snapshot_quality: u8,
    /// Channel value at or above which generated pixels become transparent.
    pub background_threshold: u8,
    /// How long a success status is shown before returning to idle.
    pub success_reset_ms: u64,
    /// How long an error status is shown before returning to idle.
    pub error_reset_ms: u64,
    /// Hard limit for one remote call. `None` waits indefinitely.
    pub generation_timeout_ms: Option<u64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            auto_enabled: true,
            snapshot_max_dimension: 1024,
            snapshot_quality: 80,
            background_threshold: codraw_renderer::DEFAULT_BACKGROUND_THRESHOLD,
            success_reset_ms: 2000,
            error_reset_ms: 3000,
            generation_timeout_ms: Some(90_000),
        }
    }
}

impl SolverConfig {
    /// Success display time.
    #[must_use]
    pub fn success_reset(&self) -> Duration {
        Duration::from_millis(self.success_reset_ms)
    }

    /// Error display time.
    #[must_use]
    pub fn error_reset(&self) -> Duration {
        Duration::from_millis(self.error_reset_ms)
    }

    /// Remote call limit.
    #[must_use]
    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout_ms.map(Duration::from_millis)
    }
}

/// Realtime voice endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// WebSocket URL of the realtime endpoint.
    pub realtime_url: String,
    /// Bearer token for the realtime endpoint.
    pub api_key: Option<String>,
    /// Model name sent as a query parameter.
    pub model: String,
    /// Output voice.
    pub voice: String,
    /// System instructions for the voice assistant.
    pub instructions: String,
    /// Largest side of the raster sent to workspace analysis.
    pub analysis_max_dimension: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            realtime_url: "wss://api.openai.com/v1/realtime".to_string(),
            api_key: None,
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
            instructions: "You are a friendly drawing partner working on a shared canvas. \
                Use analyze_workspace to look at the canvas before commenting on it, and \
                draw_on_canvas when the user asks you to draw or change something. \
                Keep spoken answers short."
                .to_string(),
            analysis_max_dimension: 1536,
        }
    }
}

/// Remote document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Base URL of the store. Persistence is off when unset.
    pub base_url: Option<String>,
    /// API key for the store.
    pub api_key: Option<String>,
    /// Id of the whiteboard row being edited.
    pub board_id: Option<String>,
    /// Quiet period before a save.
    pub quiet_period_ms: u64,
    /// Largest preview (encoded data URI bytes) attached to a save.
    pub preview_cap_bytes: usize,
    /// Largest side of the preview thumbnail.
    pub thumbnail_max_dimension: u32,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            board_id: None,
            quiet_period_ms: 2000,
            preview_cap_bytes: 512 * 1024,
            thumbnail_max_dimension: 512,
        }
    }
}

impl PersistConfig {
    /// Save debounce.
    #[must_use]
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Remote provider.
    pub provider: ProviderConfig,
    /// Generation pipeline.
    pub solver: SolverConfig,
    /// Voice session.
    pub voice: VoiceConfig,
    /// Persistence sync.
    pub persist: PersistConfig,
    /// Quiet period before auto mode fires.
    #[serde(default = "default_auto_quiet_ms")]
    pub auto_quiet_period_ms: u64,
    /// Delay between the end of an engine write and latch release.
    #[serde(default = "default_settle_ms")]
    pub settle_delay_ms: u64,
}

fn default_auto_quiet_ms() -> u64 {
    2000
}

fn default_settle_ms() -> u64 {
    150
}

impl EngineConfig {
    /// Defaults overridden by `CODRAW_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a value cannot be parsed or is out
    /// of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            auto_quiet_period_ms: default_auto_quiet_ms(),
            settle_delay_ms: default_settle_ms(),
            ..Self::default()
        };

        if let Some(v) = lookup("CODRAW_PROVIDER_URL") {
            config.provider.base_url = v;
        }
        config.provider.api_key = lookup("CODRAW_PROVIDER_API_KEY").or(config.provider.api_key);

        let solver = &mut config.solver;
        if let Some(v) = parse_bool(&lookup, "CODRAW_AUTO_MODE")? {
            solver.auto_enabled = v;
        }
        set(&lookup, "CODRAW_SNAPSHOT_MAX_DIM", &mut solver.snapshot_max_dimension)?;
        set(&lookup, "CODRAW_SNAPSHOT_QUALITY", &mut solver.snapshot_quality)?;
        set(&lookup, "CODRAW_BACKGROUND_THRESHOLD", &mut solver.background_threshold)?;
        set(&lookup, "CODRAW_SUCCESS_RESET_MS", &mut solver.success_reset_ms)?;
        set(&lookup, "CODRAW_ERROR_RESET_MS", &mut solver.error_reset_ms)?;
        if let Some(secs) = parse::<u64, _>(&lookup, "CODRAW_GENERATION_TIMEOUT_SECS")? {
            solver.generation_timeout_ms = (secs > 0).then(|| secs.saturating_mul(1000));
        }

        let voice = &mut config.voice;
        if let Some(v) = lookup("CODRAW_REALTIME_URL") {
            voice.realtime_url = v;
        }
        voice.api_key = lookup("CODRAW_REALTIME_API_KEY").or(voice.api_key.take());
        if let Some(v) = lookup("CODRAW_REALTIME_MODEL") {
            voice.model = v;
        }
        if let Some(v) = lookup("CODRAW_REALTIME_VOICE") {
            voice.voice = v;
        }

        let persist = &mut config.persist;
        persist.base_url = lookup("CODRAW_STORE_URL").or(persist.base_url.take());
        persist.api_key = lookup("CODRAW_STORE_API_KEY").or(persist.api_key.take());
        persist.board_id = lookup("CODRAW_BOARD_ID").or(persist.board_id.take());
        set(&lookup, "CODRAW_PERSIST_QUIET_MS", &mut persist.quiet_period_ms)?;
        set(&lookup, "CODRAW_PREVIEW_CAP_BYTES", &mut persist.preview_cap_bytes)?;

        set(&lookup, "CODRAW_AUTO_QUIET_MS", &mut config.auto_quiet_period_ms)?;
        set(&lookup, "CODRAW_SETTLE_MS", &mut config.settle_delay_ms)?;

        config.validate()?;
        Ok(config)
    }

    /// Check ranges that the types alone do not enforce.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.solver.snapshot_quality) {
            return Err(invalid(
                "CODRAW_SNAPSHOT_QUALITY",
                &self.solver.snapshot_quality.to_string(),
                "must be between 1 and 100",
            ));
        }
        if self.solver.snapshot_max_dimension == 0 {
            return Err(invalid(
                "CODRAW_SNAPSHOT_MAX_DIM",
                "0",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Auto-mode debounce.
    #[must_use]
    pub fn auto_quiet_period(&self) -> Duration {
        Duration::from_millis(self.auto_quiet_period_ms)
    }

    /// Write latch settle delay.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
    }
}

fn set<T, F>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = parse(lookup, key)? {
        *slot = value;
    }
    Ok(())
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(invalid(key, &raw, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).expect("config");
        assert!(config.solver.auto_enabled);
        assert_eq!(config.solver.background_threshold, 240);
        assert_eq!(config.solver.generation_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.persist.preview_cap_bytes, 512 * 1024);
        assert_eq!(config.auto_quiet_period(), Duration::from_millis(2000));
        assert_eq!(config.settle_delay(), Duration::from_millis(150));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("CODRAW_AUTO_MODE", "off"),
            ("CODRAW_SNAPSHOT_QUALITY", "55"),
            ("CODRAW_GENERATION_TIMEOUT_SECS", "0"),
            ("CODRAW_STORE_URL", "https://db.example.com"),
            ("CODRAW_AUTO_QUIET_MS", "500"),
        ]))
        .expect("config");
        assert!(!config.solver.auto_enabled);
        assert_eq!(config.solver.snapshot_quality, 55);
        assert_eq!(config.solver.generation_timeout(), None);
        assert_eq!(config.persist.base_url.as_deref(), Some("https://db.example.com"));
        assert_eq!(config.auto_quiet_period_ms, 500);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = EngineConfig::from_lookup(lookup(&[("CODRAW_SNAPSHOT_QUALITY", "abc")]))
            .expect_err("bad number");
        assert!(err.to_string().contains("CODRAW_SNAPSHOT_QUALITY"));

        assert!(EngineConfig::from_lookup(lookup(&[("CODRAW_SNAPSHOT_QUALITY", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("CODRAW_AUTO_MODE", "maybe")])).is_err());
    }

    #[test]
    fn test_serde_fills_missing_sections() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"solver": {"snapshot_quality": 60}}"#).expect("parse");
        assert_eq!(config.solver.snapshot_quality, 60);
        assert_eq!(config.solver.snapshot_max_dimension, 1024);
        assert_eq!(config.settle_delay_ms, 150);
    }
}
