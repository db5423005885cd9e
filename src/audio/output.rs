//! Speaker output via `cpal`.
//!
//! [`CpalOutput`] implements [`AudioBackend`] for local `file://` audio
//! holding raw 16-bit mono PCM.  Each [`AudioSource`] it creates plays on a
//! dedicated OS thread that owns the `cpal::Stream` (streams are not `Send`
//! on every platform); the scheduler side only touches atomics shared with
//! the audio callback.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::tts::AudioUrl;

use super::backend::{AudioBackend, AudioSource, DecodedAudio, PlaybackError};
use super::pcm::{decode_pcm16le, resample};

/// How often the playback thread checks for the end of the buffer.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// OutputError
// ---------------------------------------------------------------------------

/// Errors while opening the output device.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device found{}", .0.as_deref().map(|n| format!(" named {n:?}")).unwrap_or_default())]
    NoDevice(Option<String>),

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// Output device wrapper built on top of `cpal`.
///
/// Only the device *name* is kept; every source re-resolves the device on
/// its playback thread.
#[derive(Debug, Clone)]
pub struct CpalOutput {
    device_name: Option<String>,
    config: cpal::StreamConfig,
    /// Sample rate of the PCM this backend decodes (the speech endpoint's).
    input_rate: u32,
}

impl CpalOutput {
    /// Open `device_name` (or the default output device) and query its
    /// preferred stream configuration.
    ///
    /// # Errors
    ///
    /// [`OutputError::NoDevice`] when the device is missing, or
    /// [`OutputError::DefaultConfig`] when it cannot report a configuration.
    pub fn new(device_name: Option<String>, input_rate: u32) -> Result<Self, OutputError> {
        let device = find_output_device(device_name.as_deref())
            .ok_or_else(|| OutputError::NoDevice(device_name.clone()))?;
        let config: cpal::StreamConfig = device.default_output_config()?.into();

        Ok(Self {
            device_name,
            config,
            input_rate,
        })
    }

    /// Native sample rate of the output stream in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Number of interleaved output channels.
    pub fn channels(&self) -> u16 {
        self.config.channels
    }
}

fn find_output_device(name: Option<&str>) -> Option<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host.default_output_device(),
        Some(wanted) => host
            .output_devices()
            .ok()?
            .find(|d| d.name().is_ok_and(|n| n == wanted)),
    }
}

#[async_trait]
impl AudioBackend for CpalOutput {
    async fn fetch(&self, url: &AudioUrl) -> Result<Vec<u8>, PlaybackError> {
        let path = url
            .to_path()
            .ok_or_else(|| PlaybackError::Fetch(format!("unsupported url {url}")))?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| PlaybackError::Fetch(format!("{}: {e}", path.display())))
    }

    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, PlaybackError> {
        Ok(DecodedAudio {
            samples: decode_pcm16le(bytes)?,
            sample_rate: self.input_rate,
        })
    }

    fn create_source(&self, audio: DecodedAudio) -> Result<Box<dyn AudioSource>, PlaybackError> {
        let samples = resample(&audio.samples, audio.sample_rate, self.sample_rate());
        Ok(Box::new(CpalSource {
            shared: Arc::new(SourceShared {
                samples,
                pos: AtomicUsize::new(0),
                gain: AtomicU32::new(1.0_f32.to_bits()),
                stopped: AtomicBool::new(false),
            }),
            device_name: self.device_name.clone(),
            config: self.config.clone(),
        }))
    }

    fn revoke(&self, url: &AudioUrl) {
        let Some(path) = url.to_path() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => log::debug!("playback: released {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("playback: failed to release {}: {e}", path.display()),
        }
    }
}

// ---------------------------------------------------------------------------
// CpalSource
// ---------------------------------------------------------------------------

/// State shared between the source handle, its thread and the audio callback.
struct SourceShared {
    samples: Vec<f32>,
    /// Next frame to play.
    pos: AtomicUsize,
    /// `f32` gain stored as bits.
    gain: AtomicU32,
    stopped: AtomicBool,
}

impl SourceShared {
    fn finished(&self) -> bool {
        self.stopped.load(Ordering::Relaxed) || self.pos.load(Ordering::Relaxed) >= self.samples.len()
    }
}

struct CpalSource {
    shared: Arc<SourceShared>,
    device_name: Option<String>,
    config: cpal::StreamConfig,
}

impl AudioSource for CpalSource {
    fn start(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let device_name = self.device_name.clone();
        let config = self.config.clone();

        let spawned = std::thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || {
                if let Err(e) = play_blocking(&shared, device_name.as_deref(), &config) {
                    log::warn!("playback: {e}");
                }
                let _ = tx.send(());
            });

        // On spawn failure the closure (and `tx`) is dropped, which resolves
        // the receiver with an error, which the caller treats as ended.
        if let Err(e) = spawned {
            log::error!("playback: failed to spawn playback thread: {e}");
        }
        rx
    }

    fn set_gain(&self, gain: f32) {
        self.shared.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    fn stop(&mut self) {
        self.shared.stopped.store(true, Ordering::Relaxed);
    }
}

/// Play `shared.samples` until the end or until stopped.  Runs on the
/// dedicated playback thread.
fn play_blocking(
    shared: &Arc<SourceShared>,
    device_name: Option<&str>,
    config: &cpal::StreamConfig,
) -> Result<(), PlaybackError> {
    let device = find_output_device(device_name)
        .ok_or_else(|| PlaybackError::Device("output device disappeared".into()))?;

    let channels = usize::from(config.channels.max(1));
    let cb_shared = Arc::clone(shared);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let gain = f32::from_bits(cb_shared.gain.load(Ordering::Relaxed));
                let stopped = cb_shared.stopped.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = if stopped {
                        0.0
                    } else {
                        let pos = cb_shared.pos.fetch_add(1, Ordering::Relaxed);
                        cb_shared.samples.get(pos).copied().unwrap_or(0.0) * gain
                    };
                    frame.iter_mut().for_each(|out| *out = sample);
                }
            },
            |err: cpal::StreamError| {
                log::error!("playback: cpal stream error: {err}");
            },
            None, // no timeout
        )
        .map_err(|e| PlaybackError::Device(e.to_string()))?;

    stream
        .play()
        .map_err(|e| PlaybackError::Device(e.to_string()))?;

    while !shared.finished() {
        std::thread::sleep(POLL_INTERVAL);
    }

    // Dropping the stream stops the hardware.
    drop(stream);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
