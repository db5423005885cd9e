//! Speech outputs that actually produce (or deliberately skip) sound.
//!
//! * [`DeviceSpeech`]: synthesizes through a [`SpeechSynthesizer`] and
//!   plays on its own [`PlaybackEngine`].
//! * [`SilentSpeech`]: fallback used when voice is disabled or no output
//!   device is available; every call completes immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::audio::{PlaybackEngine, PlaybackOutcome};

use super::service::{AudioUrl, SpeechOutput, SpeechSynthesizer, TtsError};

// ---------------------------------------------------------------------------
// DeviceSpeech
// ---------------------------------------------------------------------------

pub struct DeviceSpeech {
    synth: Arc<dyn SpeechSynthesizer>,
    engine: PlaybackEngine,
}

impl DeviceSpeech {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, engine: PlaybackEngine) -> Self {
        Self { synth, engine }
    }
}

#[async_trait]
impl SpeechOutput for DeviceSpeech {
    async fn speak(&self, text: &str) -> Result<(), TtsError> {
        let url = self.synth.synthesize(text).await?;
        self.play_pre_generated(&url).await
    }

    async fn play_pre_generated(&self, url: &AudioUrl) -> Result<(), TtsError> {
        match self.engine.play(url.clone()).await {
            PlaybackOutcome::Ended | PlaybackOutcome::Stopped => Ok(()),
            PlaybackOutcome::Failed(e) => Err(TtsError::Playback(e.to_string())),
        }
    }

    fn stop(&self, fade: Option<Duration>) {
        match fade {
            Some(duration) => self.engine.fade_out_and_stop(duration),
            None => self.engine.hard_stop(),
        }
    }
}

// ---------------------------------------------------------------------------
// SilentSpeech
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeech;

#[async_trait]
impl SpeechOutput for SilentSpeech {
    async fn speak(&self, _text: &str) -> Result<(), TtsError> {
        Ok(())
    }

    async fn play_pre_generated(&self, _url: &AudioUrl) -> Result<(), TtsError> {
        Ok(())
    }

    fn stop(&self, _fade: Option<Duration>) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
