//! Speech service traits and shared types.
//!
//! # Overview
//!
//! * [`SpeechSynthesizer`]: text → [`AudioUrl`] (single-mode pre-generation).
//! * [`BulkAudioBackend`]: many messages → one [`AudioUrl`] (bulk mode).
//! * [`SpeechOutput`]: narrates text or a pre-generated URL and resolves
//!   when narration ends.  Completion is the returned future; cancellation
//!   is dropping it and calling [`SpeechOutput::stop`].
//!
//! All traits are object-safe and `Send + Sync` so the scheduler can hold
//! them as `Arc<dyn …>`.
//!
//! Mock implementations (available under `#[cfg(test)]`) record every call
//! and let tests choose latency and failures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

// ---------------------------------------------------------------------------
// TtsError
// ---------------------------------------------------------------------------

/// Errors from speech synthesis or narration.
///
/// `Clone` so one bulk result can be handed to every coalesced caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TtsError {
    /// HTTP transport or connection error.
    #[error("speech request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("speech endpoint returned HTTP {0}")]
    Status(u16),

    /// The request did not complete within the configured timeout.
    #[error("speech request timed out")]
    Timeout,

    /// The endpoint returned no audio.
    #[error("speech endpoint returned no audio")]
    EmptyAudio,

    /// Writing or reading synthesized audio failed.
    #[error("audio file error: {0}")]
    Io(String),

    /// Audio was synthesized but could not be played.
    #[error("playback failed: {0}")]
    Playback(String),
}

impl From<reqwest::Error> for TtsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TtsError::Timeout
        } else {
            TtsError::Request(e.to_string())
        }
    }
}

impl From<std::io::Error> for TtsError {
    fn from(e: std::io::Error) -> Self {
        TtsError::Io(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// AudioUrl / BatchId
// ---------------------------------------------------------------------------

/// Location of a synthesized audio resource.
///
/// Local files use the `file://` scheme; releasing the resource (revoking
/// the URL) deletes the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudioUrl(String);

impl AudioUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// ```
    /// use chat_playback::tts::AudioUrl;
    ///
    /// let url = AudioUrl::from_path("/tmp/a.pcm");
    /// assert_eq!(url.as_str(), "file:///tmp/a.pcm");
    /// assert_eq!(url.to_path().unwrap(), std::path::PathBuf::from("/tmp/a.pcm"));
    /// ```
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self(format!("file://{}", path.as_ref().display()))
    }

    /// Local path for `file://` URLs; `None` for any other scheme.
    pub fn to_path(&self) -> Option<PathBuf> {
        self.0.strip_prefix("file://").map(PathBuf::from)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AudioUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one bulk synthesis request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Synthesizes speech for one piece of text.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioUrl, TtsError>;
}

/// Synthesizes one audio track spanning several messages.
#[async_trait]
pub trait BulkAudioBackend: Send + Sync {
    async fn generate_bulk_audio(
        &self,
        messages: &[Message],
        batch_id: &BatchId,
    ) -> Result<AudioUrl, TtsError>;
}

/// Narrates speech and resolves when it has finished.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Synthesize and play `text`; resolves on completion.
    async fn speak(&self, text: &str) -> Result<(), TtsError>;

    /// Play audio that was synthesized ahead of time.
    async fn play_pre_generated(&self, url: &AudioUrl) -> Result<(), TtsError>;

    /// Stop whatever is playing, fading over `fade` when given.
    ///
    /// Must be safe to call at any time, including when nothing plays.
    fn stop(&self, fade: Option<Duration>);
}

// Compile-time assertion: the traits must be usable as trait objects.
const _: fn() = || {
    fn _assert_object_safe(
        _: Box<dyn SpeechSynthesizer>,
        _: Box<dyn BulkAudioBackend>,
        _: Box<dyn SpeechOutput>,
    ) {
    }
};

// ---------------------------------------------------------------------------
// Test doubles  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mocks::{MockBulkBackend, MockSpeech, MockSynthesizer};


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
