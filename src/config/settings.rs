//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// AudioMode
// ---------------------------------------------------------------------------

/// How assistant text is narrated when voice is enabled.
///
/// | Variant | Synthesis                         | Reveal gating            |
/// |---------|-----------------------------------|--------------------------|
/// | Single  | one job per assistant message     | waits for speech to end  |
/// | Bulk    | one track per batch of messages   | reading-pace timer       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioMode {
    #[default]
    Single,
    Bulk,
}

// ---------------------------------------------------------------------------
// PacingConfig
// ---------------------------------------------------------------------------

/// Reveal pacing between consecutive assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Reading speed used to derive the delay from the previous message's
    /// length.  `0.05` ≈ 50 characters per second.
    pub chars_per_ms: f64,
    /// Lower bound of the delay in milliseconds.
    pub min_delay_ms: u64,
    /// Upper bound of the delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            chars_per_ms: 0.05,
            min_delay_ms: 1_000,
            max_delay_ms: 2_500,
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceConfig
// ---------------------------------------------------------------------------

/// Narration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Narrate assistant messages at all.
    pub enabled: bool,
    pub mode: AudioMode,
    /// Synthesize single-mode audio ahead of reveal.
    pub pre_generate: bool,
    /// Fade applied when narration is interrupted.
    pub fade_out_ms: u64,
    /// Upper bound on a bulk generation before revealing silently.
    pub bulk_timeout_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AudioMode::default(),
            pre_generate: true,
            fade_out_ms: 300,
            bulk_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// TtsConfig
// ---------------------------------------------------------------------------

/// OpenAI-compatible speech endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Base URL; `/v1/audio/speech` is appended.
    pub base_url: String,
    /// API key; `None` for local servers.
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub timeout_secs: u64,
    /// Sample rate of the raw 16-bit mono PCM the endpoint returns.
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8880".into(),
            api_key: None,
            model: "tts-1".into(),
            voice: "alloy".into(),
            timeout_secs: 20,
            sample_rate: 24_000,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Output device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output device name; `None` means the system default.
    pub output_device: Option<String>,
    /// Playback gain applied to every source (0.0 – 1.0).
    pub gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            gain: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use chat_playback::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// A default `AppConfig` survives a TOML round trip.
    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let mut original = AppConfig::default();
        original.voice.enabled = true;
        original.voice.mode = AudioMode::Bulk;
        original.tts.api_key = Some("sk-test".into());
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.pacing.chars_per_ms, loaded.pacing.chars_per_ms);
        assert_eq!(original.pacing.min_delay_ms, loaded.pacing.min_delay_ms);
        assert_eq!(original.pacing.max_delay_ms, loaded.pacing.max_delay_ms);

        assert!(loaded.voice.enabled);
        assert_eq!(loaded.voice.mode, AudioMode::Bulk);
        assert_eq!(original.voice.fade_out_ms, loaded.voice.fade_out_ms);

        assert_eq!(loaded.tts.api_key.as_deref(), Some("sk-test"));
        assert_eq!(original.tts.sample_rate, loaded.tts.sample_rate);
        assert_eq!(original.audio.gain, loaded.audio.gain);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn missing_file_yields_default() {
        let dir = tempdir().expect("temp dir");
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).expect("load");
        assert!(!config.voice.enabled);
        assert_eq!(config.voice.mode, AudioMode::Single);
    }

    /// Sections omitted from the file fall back to their defaults.
    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[pacing]\nchars_per_ms = 0.1\nmin_delay_ms = 500\nmax_delay_ms = 900\n")
            .expect("write");

        let config = AppConfig::load_from(&path).expect("load");
        assert_eq!(config.pacing.min_delay_ms, 500);
        assert_eq!(config.voice.fade_out_ms, 300);
        assert_eq!(config.tts.model, "tts-1");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "pacing = [").expect("write");
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn default_pacing_matches_reading_speed() {
        let pacing = PacingConfig::default();
        assert!((pacing.chars_per_ms - 0.05).abs() < f64::EPSILON);
        assert_eq!(pacing.min_delay_ms, 1_000);
        assert_eq!(pacing.max_delay_ms, 2_500);
    }
}
