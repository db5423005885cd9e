//! Audio decode/playback primitive used by the [`PlaybackEngine`].
//!
//! [`AudioBackend`] fetches and decodes an [`AudioUrl`] and creates an
//! [`AudioSource`]: a single playable buffer with a gain control.  The
//! production implementation is [`CpalOutput`]; tests use
//! [`MockAudioBackend`] (available under `#[cfg(test)]`).
//!
//! [`PlaybackEngine`]: crate::audio::PlaybackEngine
//! [`CpalOutput`]: crate::audio::CpalOutput

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::tts::AudioUrl;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    /// The audio resource could not be read.
    #[error("failed to fetch audio: {0}")]
    Fetch(String),

    /// The bytes are not valid audio for this backend.
    #[error("failed to decode audio: {0}")]
    Decode(String),

    /// The output device could not be opened or started.
    #[error("audio device error: {0}")]
    Device(String),
}

// ---------------------------------------------------------------------------
// DecodedAudio
// ---------------------------------------------------------------------------

/// Mono `f32` samples in `[-1.0, 1.0]` at `sample_rate` Hz.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One playable buffer.
pub trait AudioSource: Send {
    /// Begin playback.  The receiver resolves (or errors, if the sender is
    /// dropped) once the source has ended, naturally or through
    /// [`stop`](Self::stop).
    fn start(&mut self) -> oneshot::Receiver<()>;

    fn set_gain(&self, gain: f32);

    /// Stop immediately.  Safe to call more than once.
    fn stop(&mut self);
}

#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn fetch(&self, url: &AudioUrl) -> Result<Vec<u8>, PlaybackError>;

    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, PlaybackError>;

    fn create_source(&self, audio: DecodedAudio) -> Result<Box<dyn AudioSource>, PlaybackError>;

    /// Release the resource behind `url`.
    fn revoke(&self, url: &AudioUrl);
}

// ---------------------------------------------------------------------------
// MockAudioBackend  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::{MockAudioBackend, MockSourceLog};

#[cfg(test)]
mod mock {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    /// What happened to the sources a [`MockAudioBackend`] created.
    #[derive(Debug, Default)]
    pub struct MockSourceLog {
        pub started: usize,
        pub stopped: usize,
        pub gains: Vec<f32>,
    }

    /// Backend whose sources "play" for `duration` of tokio time.
    pub struct MockAudioBackend {
        pub duration: Duration,
        pub fetch_latency: Duration,
        pub fail_fetch: bool,
        pub fail_decode: bool,
        pub revoked: Mutex<Vec<AudioUrl>>,
        pub log: Arc<Mutex<MockSourceLog>>,
    }

    impl MockAudioBackend {
        pub fn new(duration: Duration) -> Self {
            Self {
                duration,
                fetch_latency: Duration::ZERO,
                fail_fetch: false,
                fail_decode: false,
                revoked: Mutex::new(Vec::new()),
                log: Arc::new(Mutex::new(MockSourceLog::default())),
            }
        }
    }

    #[async_trait]
    impl AudioBackend for MockAudioBackend {
        async fn fetch(&self, url: &AudioUrl) -> Result<Vec<u8>, PlaybackError> {
            tokio::time::sleep(self.fetch_latency).await;
            if self.fail_fetch {
                return Err(PlaybackError::Fetch(url.to_string()));
            }
            Ok(vec![0; 4])
        }

        fn decode(&self, _bytes: &[u8]) -> Result<DecodedAudio, PlaybackError> {
            if self.fail_decode {
                return Err(PlaybackError::Decode("not pcm".into()));
            }
            Ok(DecodedAudio {
                samples: vec![0.0; 2],
                sample_rate: 16_000,
            })
        }

        fn create_source(
            &self,
            _audio: DecodedAudio,
        ) -> Result<Box<dyn AudioSource>, PlaybackError> {
            Ok(Box::new(MockSource {
                duration: self.duration,
                log: Arc::clone(&self.log),
                ended: Arc::new(Mutex::new(None)),
                timer: None,
            }))
        }

        fn revoke(&self, url: &AudioUrl) {
            self.revoked.lock().push(url.clone());
        }
    }

    struct MockSource {
        duration: Duration,
        log: Arc<Mutex<MockSourceLog>>,
        ended: Arc<Mutex<Option<oneshot::Sender<()>>>>,
        timer: Option<tokio::task::JoinHandle<()>>,
    }

    impl AudioSource for MockSource {
        fn start(&mut self) -> oneshot::Receiver<()> {
            let (tx, rx) = oneshot::channel();
            *self.ended.lock() = Some(tx);
            self.log.lock().started += 1;

            let ended = Arc::clone(&self.ended);
            let duration = self.duration;
            self.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if let Some(tx) = ended.lock().take() {
                    let _ = tx.send(());
                }
            }));
            rx
        }

        fn set_gain(&self, gain: f32) {
            self.log.lock().gains.push(gain);
        }

        fn stop(&mut self) {
            if let Some(timer) = self.timer.take() {
                timer.abort();
            }
            if let Some(tx) = self.ended.lock().take() {
                self.log.lock().stopped += 1;
                let _ = tx.send(());
            }
        }
    }
}
