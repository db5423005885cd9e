//! Audio side of narration: device output, playback, pre-generated speech
//! and bulk tracks.
//!
//! # Layers
//!
//! ```text
//! AudioUrl ─▶ AudioBackend (fetch → decode → source) ─▶ PlaybackEngine
//!                  └─ CpalOutput: file:// PCM → resample → cpal stream
//!
//! SpeechSynthesizer ─▶ AudioCache        (single mode, per message)
//! BulkAudioBackend  ─▶ BulkAudioGenerator (bulk mode, per batch)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chat_playback::audio::{CpalOutput, PlaybackEngine};
//! use chat_playback::tts::AudioUrl;
//!
//! # async fn example() {
//! let output = CpalOutput::new(None, 24_000).unwrap();
//! let engine = PlaybackEngine::new(Arc::new(output), 1.0);
//! let outcome = engine.play(AudioUrl::from_path("/tmp/hello.pcm")).await;
//! println!("{outcome:?}");
//! # }
//! ```

pub mod backend;
pub mod bulk;
pub mod cache;
pub mod output;
pub mod pcm;
pub mod playback;

pub use backend::{AudioBackend, AudioSource, DecodedAudio, PlaybackError};
pub use bulk::BulkAudioGenerator;
pub use cache::{AudioCache, CacheState};
pub use output::{CpalOutput, OutputError};
pub use pcm::{decode_pcm16le, resample};
pub use playback::{PlaybackEngine, PlaybackOutcome, PlaybackState};

#[cfg(test)]
pub use backend::{MockAudioBackend, MockSourceLog};
