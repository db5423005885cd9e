//! Where settings and synthesized speech live on disk.
//!
//! Settings go under the platform config dir (`~/.config/chat-playback/`
//! on Linux, `%APPDATA%\chat-playback\` on Windows). Narration tracks are
//! disposable, so they go under the platform cache dir instead
//! (`~/.cache/chat-playback/audio/`, `%LOCALAPPDATA%\chat-playback\audio\`).

use std::io;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "chat-playback";
const SETTINGS_FILE: &str = "settings.toml";
const AUDIO_DIR: &str = "audio";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// `settings.toml` inside `config_dir`.
    pub settings_file: PathBuf,
    /// PCM files written by the speech backend, deleted once played.
    pub audio_cache_dir: PathBuf,
}

impl AppPaths {
    /// Platform locations, or the working directory where the platform has
    /// none.
    pub fn new() -> Self {
        let here = || PathBuf::from(".");
        Self::rooted_at(
            &dirs::config_dir().unwrap_or_else(here),
            &dirs::cache_dir().unwrap_or_else(here),
        )
    }

    /// Layout below explicit config and cache roots.
    pub fn rooted_at(config_root: &Path, cache_root: &Path) -> Self {
        let config_dir = config_root.join(APP_DIR);
        Self {
            settings_file: config_dir.join(SETTINGS_FILE),
            config_dir,
            audio_cache_dir: cache_root.join(APP_DIR).join(AUDIO_DIR),
        }
    }

    /// Create the audio cache dir if needed and return it.
    pub fn ensure_audio_cache_dir(&self) -> io::Result<&Path> {
        std::fs::create_dir_all(&self.audio_cache_dir)?;
        Ok(&self.audio_cache_dir)
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
