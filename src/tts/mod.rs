//! Speech synthesis and narration.
//!
//! # Architecture
//!
//! ```text
//! SpeechSynthesizer ──┐                    ┌──▶ DeviceSpeech (PlaybackEngine)
//!  (HttpSpeechBackend)├─▶ AudioUrl ─▶ SpeechOutput
//! BulkAudioBackend  ──┘                    └──▶ SilentSpeech
//! ```

pub mod device;
pub mod http;
pub mod service;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use device::{DeviceSpeech, SilentSpeech};
pub use http::{bulk_input, HttpSpeechBackend};
pub use service::{
    AudioUrl, BatchId, BulkAudioBackend, SpeechOutput, SpeechSynthesizer, TtsError,
};

// test-only re-export so scheduler and audio tests can use the doubles
// without reaching into `tts::service`.
#[cfg(test)]
pub use service::{MockBulkBackend, MockSpeech, MockSynthesizer};
