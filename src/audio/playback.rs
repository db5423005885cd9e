//! `PlaybackEngine`: plays one audio URL at a time with fade-out support.
//!
//! # State machine
//!
//! ```text
//! Idle ──play──▶ Decoding ──source started──▶ Playing ──end──▶ Ended
//!                   │                            │
//!                   └──────── stop / fade ───────┴──────────▶ Stopped
//! ```
//!
//! Every `play` call gets a generation number.  Stopping, or starting a
//! newer `play`, bumps the generation; a `play` future that wakes up with a
//! stale generation resolves [`PlaybackOutcome::Stopped`] without touching
//! the engine's state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::tts::AudioUrl;

use super::backend::{AudioBackend, AudioSource, PlaybackError};

/// Interval between gain updates while fading out.
const FADE_STEP: Duration = Duration::from_millis(20);

/// Gain the fade ramps down to before the source is stopped.
const FADE_FLOOR: f32 = 0.0001;

// ---------------------------------------------------------------------------
// PlaybackState / PlaybackOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Decoding,
    Playing,
    Ended,
    Stopped,
}

impl PlaybackState {
    /// `true` while a source is being prepared or is audible.
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Decoding | PlaybackState::Playing)
    }
}

/// How a [`PlaybackEngine::play`] call finished.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackOutcome {
    /// The audio played to its natural end.
    Ended,
    /// Playback was stopped, faded out or superseded by a newer `play`.
    Stopped,
    /// The audio could not be fetched, decoded or started.
    Failed(PlaybackError),
}

// ---------------------------------------------------------------------------
// PlaybackEngine
// ---------------------------------------------------------------------------

struct EngineInner {
    state: PlaybackState,
    generation: u64,
    source: Option<Box<dyn AudioSource>>,
    url: Option<AudioUrl>,
    ramp: Option<JoinHandle<()>>,
    fading: bool,
}

/// Cheaply cloneable handle; clones drive the same engine.
#[derive(Clone)]
pub struct PlaybackEngine {
    backend: Arc<dyn AudioBackend>,
    inner: Arc<Mutex<EngineInner>>,
    gain: f32,
}

impl PlaybackEngine {
    /// Create an idle engine playing at `gain` through `backend`.
    pub fn new(backend: Arc<dyn AudioBackend>, gain: f32) -> Self {
        Self {
            backend,
            inner: Arc::new(Mutex::new(EngineInner {
                state: PlaybackState::Idle,
                generation: 0,
                source: None,
                url: None,
                ramp: None,
                fading: false,
            })),
            gain,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    /// Play `url` and resolve when playback ends, is stopped, or fails.
    ///
    /// Any playback already in progress is stopped first.
    pub async fn play(&self, url: AudioUrl) -> PlaybackOutcome {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.state.is_active() {
                log::debug!("playback: superseding active playback");
                self.stop_locked(&mut inner);
            }
            inner.generation += 1;
            inner.state = PlaybackState::Decoding;
            inner.url = Some(url.clone());
            inner.fading = false;
            inner.generation
        };

        let fetched = self.backend.fetch(&url).await;

        let ended = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return PlaybackOutcome::Stopped;
            }

            let source = fetched
                .and_then(|bytes| self.backend.decode(&bytes))
                .and_then(|audio| self.backend.create_source(audio));

            let mut source = match source {
                Ok(source) => source,
                Err(e) => {
                    log::warn!("playback: {url}: {e}");
                    self.stop_locked(&mut inner);
                    return PlaybackOutcome::Failed(e);
                }
            };

            source.set_gain(self.gain);
            let ended = source.start();
            inner.source = Some(source);
            inner.state = PlaybackState::Playing;
            ended
        };

        // Err means the source dropped its sender; treat it like an end.
        let _ = ended.await;

        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state != PlaybackState::Playing {
            return PlaybackOutcome::Stopped;
        }

        if let Some(ramp) = inner.ramp.take() {
            ramp.abort();
        }
        inner.fading = false;
        inner.source = None;
        if let Some(url) = inner.url.take() {
            self.backend.revoke(&url);
        }
        inner.state = PlaybackState::Ended;
        PlaybackOutcome::Ended
    }

    /// Ramp the gain down to silence over `duration`, then stop.
    ///
    /// No-op when nothing is playing or a fade is already running.  While
    /// the audio is still being prepared this is an immediate stop.
    pub fn fade_out_and_stop(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        match inner.state {
            PlaybackState::Decoding => self.stop_locked(&mut inner),
            PlaybackState::Playing if !inner.fading => {
                if let Some(ramp) = inner.ramp.take() {
                    ramp.abort();
                }
                inner.fading = true;
                inner.ramp = Some(self.spawn_ramp(inner.generation, duration));
            }
            _ => {}
        }
    }

    /// Stop immediately and release the current URL.  Idempotent.
    pub fn hard_stop(&self) {
        let mut inner = self.inner.lock();
        if inner.state.is_active() {
            self.stop_locked(&mut inner);
        }
    }

    /// Release a track queued for this engine that will never be played.
    pub fn discard(&self, url: &AudioUrl) {
        self.backend.revoke(url);
    }

    fn spawn_ramp(&self, generation: u64, duration: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        let steps = (duration.as_millis() / FADE_STEP.as_millis()).max(1) as u32;
        let start = self.gain;

        tokio::spawn(async move {
            for step in 1..=steps {
                tokio::time::sleep(FADE_STEP).await;
                let inner = engine.inner.lock();
                if inner.generation != generation {
                    return;
                }
                let gain = (start * (1.0 - step as f32 / steps as f32)).max(FADE_FLOOR);
                if let Some(source) = inner.source.as_ref() {
                    source.set_gain(gain);
                }
            }

            let mut inner = engine.inner.lock();
            if inner.generation == generation {
                // Detach our own handle so stopping does not abort this task.
                inner.ramp = None;
                engine.stop_locked(&mut inner);
            }
        })
    }

    fn stop_locked(&self, inner: &mut EngineInner) {
        inner.generation += 1;
        if let Some(ramp) = inner.ramp.take() {
            ramp.abort();
        }
        inner.fading = false;
        if let Some(mut source) = inner.source.take() {
            source.stop();
        }
        if let Some(url) = inner.url.take() {
            self.backend.revoke(&url);
        }
        inner.state = PlaybackState::Stopped;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::MockAudioBackend;

    fn engine_with(backend: MockAudioBackend) -> (PlaybackEngine, Arc<MockAudioBackend>) {
        let backend = Arc::new(backend);
        let engine = PlaybackEngine::new(Arc::clone(&backend) as Arc<dyn AudioBackend>, 1.0);
        (engine, backend)
    }

    fn url(name: &str) -> AudioUrl {
        AudioUrl::new(format!("mock://{name}"))
    }

    #[tokio::test(start_paused = true)]
    async fn play_runs_to_natural_end() {
        let (engine, backend) = engine_with(MockAudioBackend::new(Duration::from_secs(1)));

        assert_eq!(engine.play(url("a")).await, PlaybackOutcome::Ended);
        assert_eq!(engine.state(), PlaybackState::Ended);
        assert_eq!(backend.revoked.lock().as_slice(), [url("a")]);
        assert_eq!(backend.log.lock().started, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hard_stop_is_idempotent() {
        let (engine, backend) = engine_with(MockAudioBackend::new(Duration::from_secs(5)));

        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.play(url("a")).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.state(), PlaybackState::Playing);

        engine.hard_stop();
        engine.hard_stop();

        assert_eq!(task.await.unwrap(), PlaybackOutcome::Stopped);
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(backend.log.lock().stopped, 1);
        assert_eq!(backend.revoked.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fade_ramps_gain_down_then_stops() {
        let (engine, backend) = engine_with(MockAudioBackend::new(Duration::from_secs(5)));

        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.play(url("a")).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        engine.fade_out_and_stop(Duration::from_millis(100));
        // A second request while fading changes nothing.
        engine.fade_out_and_stop(Duration::from_secs(10));

        assert_eq!(task.await.unwrap(), PlaybackOutcome::Stopped);
        assert_eq!(engine.state(), PlaybackState::Stopped);

        let log = backend.log.lock();
        assert_eq!(log.stopped, 1);
        // Initial gain plus five 20 ms steps.
        assert_eq!(log.gains.len(), 6);
        assert!(log.gains.windows(2).all(|w| w[1] <= w[0]));
        assert!(*log.gains.last().unwrap() <= 0.001);
    }

    #[tokio::test(start_paused = true)]
    async fn fade_when_idle_is_noop() {
        let (engine, backend) = engine_with(MockAudioBackend::new(Duration::from_secs(1)));
        engine.fade_out_and_stop(Duration::from_millis(100));
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert!(backend.revoked.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_decoding_resolves_stopped() {
        let mut backend = MockAudioBackend::new(Duration::from_secs(1));
        backend.fetch_latency = Duration::from_millis(200);
        let (engine, backend) = engine_with(backend);

        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.play(url("a")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.state(), PlaybackState::Decoding);

        engine.fade_out_and_stop(Duration::from_millis(100));

        assert_eq!(task.await.unwrap(), PlaybackOutcome::Stopped);
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(backend.log.lock().started, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn decode_failure_leaves_no_source() {
        let mut backend = MockAudioBackend::new(Duration::from_secs(1));
        backend.fail_decode = true;
        let (engine, backend) = engine_with(backend);

        let outcome = engine.play(url("bad")).await;
        assert!(matches!(outcome, PlaybackOutcome::Failed(PlaybackError::Decode(_))));
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(backend.log.lock().started, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_play_supersedes_older() {
        let (engine, backend) = engine_with(MockAudioBackend::new(Duration::from_secs(1)));

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.play(url("first")).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = engine.play(url("second")).await;

        assert_eq!(first.await.unwrap(), PlaybackOutcome::Stopped);
        assert_eq!(second, PlaybackOutcome::Ended);
        assert_eq!(
            backend.revoked.lock().as_slice(),
            [url("first"), url("second")]
        );
    }
}
