//! Application entry point: transcript replayer.
//!
//! # Startup sequence
//!
//! 1. Parse the command line.
//! 2. Initialise logging.
//! 3. Load [`AppConfig`] (explicit path, or the platform default) and apply
//!    command-line overrides.
//! 4. Create the [`tokio`] runtime.
//! 5. Build the narration services (HTTP speech endpoint + `cpal` output),
//!    falling back to silent playback when no output device is available.
//! 6. Spawn the [`PlaybackScheduler`] and a snapshot printer.
//! 7. Feed the transcript steps, then wait for the timeline to settle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use chat_playback::audio::{AudioBackend, AudioCache, BulkAudioGenerator, CpalOutput, PlaybackEngine};
use chat_playback::config::{AppConfig, AppPaths, AudioMode};
use chat_playback::message::{Message, MessageEvent, MessageKind};
use chat_playback::scheduler::{AudioServices, BulkServices, PlaybackScheduler, SchedulerCommand};
use chat_playback::timeline::TimelineSnapshot;
use chat_playback::tts::{DeviceSpeech, HttpSpeechBackend};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Replay a chat transcript with paced reveals and optional narration.
#[derive(Debug, Parser)]
#[command(name = "chat-playback", version)]
struct Cli {
    /// JSON transcript: `[{"after_ms": 0, "messages": [...]}, ...]`.
    transcript: PathBuf,

    /// Narrate assistant messages.
    #[arg(long)]
    voice: bool,

    /// Narrate in bulk mode (one track per batch of messages).
    #[arg(long)]
    bulk: bool,

    /// Settings file to use instead of the platform default.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Reading speed used to pace reveals.
    #[arg(long, value_name = "X")]
    chars_per_ms: Option<f64>,

    /// Seconds without a timeline change after the last step before exiting.
    #[arg(long, default_value_t = 10)]
    linger_secs: u64,
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// One delivery from the backend: a burst of events after a pause.
#[derive(Debug, Deserialize)]
struct TranscriptStep {
    #[serde(default)]
    after_ms: u64,
    messages: Vec<MessageEvent>,
}

fn load_transcript(path: &Path) -> Result<Vec<TranscriptStep>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("invalid transcript {}", path.display()))
}

// ---------------------------------------------------------------------------
// Narration services
// ---------------------------------------------------------------------------

/// Build narration for `config`.  Turns voice off in `config` when no
/// output device can be opened.
fn audio_services(config: &mut AppConfig) -> AudioServices {
    if !config.voice.enabled {
        return AudioServices::silent();
    }

    let output = match CpalOutput::new(config.audio.output_device.clone(), config.tts.sample_rate) {
        Ok(output) => {
            log::info!(
                "Audio output ready ({} Hz, {} ch)",
                output.sample_rate(),
                output.channels()
            );
            output
        }
        Err(e) => {
            log::warn!("Audio output unavailable: {e}. Replaying without narration.");
            config.voice.enabled = false;
            return AudioServices::silent();
        }
    };

    let paths = AppPaths::new();
    if let Err(e) = paths.ensure_audio_cache_dir() {
        log::warn!("Could not create {} ({e})", paths.audio_cache_dir.display());
    }
    let cache_dir = paths.audio_cache_dir;

    let speech_backend = Arc::new(HttpSpeechBackend::from_config(&config.tts, cache_dir));
    let output: Arc<dyn AudioBackend> = Arc::new(output);
    let gain = config.audio.gain;

    AudioServices {
        speech: Arc::new(DeviceSpeech::new(
            speech_backend.clone(),
            PlaybackEngine::new(Arc::clone(&output), gain),
        )),
        cache: config
            .voice
            .pre_generate
            .then(|| AudioCache::new(speech_backend.clone(), Arc::clone(&output))),
        bulk: Some(BulkServices {
            generator: Arc::new(BulkAudioGenerator::new(
                speech_backend,
                Duration::from_secs(config.voice.bulk_timeout_secs),
            )),
            engine: PlaybackEngine::new(output, gain),
        }),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(msg: &Message) -> String {
    match &msg.kind {
        MessageKind::ToolCall => format!(
            "  [tool {}] {:?}{}",
            msg.tool_call_id.as_deref().unwrap_or("?"),
            msg.tool_status,
            msg.tool_display_detail
                .as_deref()
                .map(|d| format!(" {d}"))
                .unwrap_or_default()
        ),
        MessageKind::Status => format!("  ({})", msg.text),
        kind => format!("{:>9}: {}", kind.label(), msg.text),
    }
}

/// Print every newly revealed message until the scheduler shuts down.
async fn print_timeline(mut snapshots: watch::Receiver<TimelineSnapshot>) {
    let mut printed = 0;
    loop {
        {
            let snapshot = snapshots.borrow_and_update();
            if snapshot.messages.len() < printed {
                println!("--- reset ---");
                printed = 0;
            }
            for msg in &snapshot.messages[printed..] {
                println!("{}", render(msg));
            }
            printed = snapshot.messages.len();
            if snapshot.should_show_loading {
                log::debug!("waiting for a response");
            }
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

async fn replay(cli: Cli, mut config: AppConfig) -> Result<()> {
    let steps = load_transcript(&cli.transcript)?;
    let audio = audio_services(&mut config);

    let scheduler = PlaybackScheduler::new(&config, audio);
    let mut idle = scheduler.subscribe();
    let printer = tokio::spawn(print_timeline(scheduler.subscribe()));

    let (command_tx, command_rx) = mpsc::channel::<SchedulerCommand>(16);
    let scheduler_task = tokio::spawn(scheduler.run(command_rx));

    log::info!("Replaying {} step(s) from {}", steps.len(), cli.transcript.display());
    for step in steps {
        tokio::time::sleep(Duration::from_millis(step.after_ms)).await;
        command_tx
            .send(SchedulerCommand::Messages(step.messages))
            .await
            .context("scheduler stopped unexpectedly")?;
    }

    // Let paced reveals and narration finish.
    let linger = Duration::from_secs(cli.linger_secs);
    while let Ok(Ok(())) = tokio::time::timeout(linger, idle.changed()).await {}

    drop(command_tx);
    scheduler_task.await.context("scheduler task failed")?;
    printer.await.context("printer task failed")?;
    Ok(())
}

fn main() -> Result<()> {
    // 1. Command line
    let cli = Cli::parse();

    // 2. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 3. Configuration
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };
    if cli.voice {
        config.voice.enabled = true;
    }
    if cli.bulk {
        config.voice.mode = AudioMode::Bulk;
    }
    if let Some(chars_per_ms) = cli.chars_per_ms {
        config.pacing.chars_per_ms = chars_per_ms;
    }

    // 4. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(replay(cli, config))
}
