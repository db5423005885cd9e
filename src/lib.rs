//! Paced playback of an AI tutoring chat transcript.
//!
//! Incoming message events are classified, de-duplicated and revealed one
//! at a time on a visible timeline, optionally narrated through a speech
//! endpoint and the local audio device.
//!
//! * [`message`]: event model and classification.
//! * [`timeline`]: the visible, de-duplicated timeline.
//! * [`scheduler`]: the pacing and interruption engine.
//! * [`tts`]: speech synthesis and narration.
//! * [`audio`]: playback, pre-generated speech and bulk tracks.
//! * [`config`]: settings and paths.

pub mod audio;
pub mod config;
pub mod message;
pub mod scheduler;
pub mod timeline;
pub mod tts;
