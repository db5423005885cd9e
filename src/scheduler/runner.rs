//! Playback scheduler: turns bursts of backend events into a paced,
//! de-duplicated, interruptible visible timeline and drives narration.
//!
//! [`PlaybackScheduler`] is a single-owner task: it owns the pending queue,
//! the visible timeline, the timer registry and every in-flight audio
//! future, and reacts to [`SchedulerCommand`]s received over a
//! `tokio::sync::mpsc` channel.
//!
//! # Loop
//!
//! ```text
//! ┌─▶ step: watchdog → admit head while allowed → publish snapshot
//! │
//! └── select! (biased)
//!       command            → ingest / reset / voice + mode toggles
//!       reveal timer fired → reveal head
//!       speech finished    → release the processor
//!       bulk track ready   → queue it for playback, request backlog
//!       bulk track played  → play the next one
//! ```
//!
//! Every branch runs to completion before the next `select!`, so the
//! rendering layer only ever sees consistent snapshots.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::audio::{AudioCache, BulkAudioGenerator, PlaybackEngine, PlaybackOutcome};
use crate::config::{AppConfig, AudioMode};
use crate::message::{classify, DedupKey, Message, MessageEvent, MessageId, MessagePatch};
use crate::timeline::{TimelineSnapshot, VisibleTimeline};
use crate::tts::{AudioUrl, BatchId, SilentSpeech, SpeechOutput, TtsError};

use super::interrupt::{interrupt_cutoff, plan_interrupt};
use super::pacing::{Narration, RevealPacing, RevealPlan};
use super::state::SchedulerState;
use super::timers::TimerRegistry;

type BulkJob = JoinHandle<(BatchId, Result<AudioUrl, TtsError>)>;

// ---------------------------------------------------------------------------
// SchedulerCommand
// ---------------------------------------------------------------------------

/// Input to the scheduler task.  Closing the channel tears the task down.
#[derive(Debug, Clone)]
pub enum SchedulerCommand {
    /// A burst of backend events, in arrival order.
    Messages(Vec<MessageEvent>),
    /// The conversation was cleared.
    Reset,
    SetVoiceEnabled(bool),
    SetAudioMode(AudioMode),
}

// ---------------------------------------------------------------------------
// AudioServices
// ---------------------------------------------------------------------------

/// Bulk-mode collaborators: one generator, one engine for its tracks.
#[derive(Clone)]
pub struct BulkServices {
    pub generator: Arc<BulkAudioGenerator>,
    pub engine: PlaybackEngine,
}

/// Everything the scheduler narrates with.
pub struct AudioServices {
    /// Single-mode narration.
    pub speech: Arc<dyn SpeechOutput>,
    /// Single-mode pre-generation; `None` disables it.
    pub cache: Option<AudioCache>,
    /// Bulk mode; without it bulk narration reveals silently.
    pub bulk: Option<BulkServices>,
}

impl AudioServices {
    /// No audio at all; text is still paced normally.
    pub fn silent() -> Self {
        Self {
            speech: Arc::new(SilentSpeech),
            cache: None,
            bulk: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Drives the visible timeline.
///
/// Create with [`PlaybackScheduler::new`], take a snapshot receiver with
/// [`subscribe`](Self::subscribe), then call [`run`](Self::run) inside a
/// tokio task.
///
/// ```rust,no_run
/// use chat_playback::config::AppConfig;
/// use chat_playback::message::MessageEvent;
/// use chat_playback::scheduler::{AudioServices, PlaybackScheduler, SchedulerCommand};
///
/// # async fn example() {
/// let scheduler = PlaybackScheduler::new(&AppConfig::default(), AudioServices::silent());
/// let mut snapshots = scheduler.subscribe();
///
/// let (tx, rx) = tokio::sync::mpsc::channel(16);
/// tokio::spawn(scheduler.run(rx));
///
/// tx.send(SchedulerCommand::Messages(vec![MessageEvent::assistant("Hi there.")]))
///     .await
///     .unwrap();
/// snapshots.changed().await.unwrap();
/// println!("{:?}", snapshots.borrow().texts());
/// # }
/// ```
pub struct PlaybackScheduler {
    state: SchedulerState,
    timeline: VisibleTimeline,
    /// Reveal timers, keyed by the id of the message they reveal.
    timers: TimerRegistry<MessageId>,
    pacing: RevealPacing,

    voice_enabled: bool,
    mode: AudioMode,
    pre_generate: bool,
    fade: Duration,

    audio: AudioServices,
    /// Narration of the message currently `Speaking` (single mode).
    speech: Option<BoxFuture<'static, Result<(), TtsError>>>,

    bulk_job: Option<BulkJob>,
    /// Messages that arrived while a bulk generation was in flight.
    bulk_backlog: Vec<Message>,
    bulk_playlist: VecDeque<AudioUrl>,
    bulk_playback: Option<JoinHandle<PlaybackOutcome>>,
    last_bulk_url: Option<AudioUrl>,

    snapshots: watch::Sender<TimelineSnapshot>,
}

impl PlaybackScheduler {
    pub fn new(config: &AppConfig, audio: AudioServices) -> Self {
        let (snapshots, _) = watch::channel(TimelineSnapshot::default());
        Self {
            state: SchedulerState::new(),
            timeline: VisibleTimeline::new(),
            timers: TimerRegistry::new(),
            pacing: RevealPacing::from_config(&config.pacing),
            voice_enabled: config.voice.enabled,
            mode: config.voice.mode,
            pre_generate: config.voice.pre_generate,
            fade: Duration::from_millis(config.voice.fade_out_ms),
            audio,
            speech: None,
            bulk_job: None,
            bulk_backlog: Vec::new(),
            bulk_playlist: VecDeque::new(),
            bulk_playback: None,
            last_bulk_url: None,
            snapshots,
        }
    }

    /// Receiver for timeline snapshots, updated after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<TimelineSnapshot> {
        self.snapshots.subscribe()
    }

    fn narration(&self) -> Narration {
        Narration::from_voice(self.voice_enabled, self.mode)
    }

    /// Run until the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SchedulerCommand>) {
        log::info!("scheduler: started ({:?})", self.narration());

        loop {
            self.step();

            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },

                Some(id) = self.timers.next_expired(), if !self.timers.is_empty() => {
                    self.on_timer(id);
                }

                result = until_done(&mut self.speech), if self.speech.is_some() => {
                    self.speech = None;
                    self.on_speech_done(result);
                }

                joined = until_done(&mut self.bulk_job), if self.bulk_job.is_some() => {
                    self.bulk_job = None;
                    self.on_bulk_generated(joined);
                }

                joined = until_done(&mut self.bulk_playback), if self.bulk_playback.is_some() => {
                    self.bulk_playback = None;
                    self.on_bulk_played(joined);
                }
            }
        }

        self.teardown();
        log::info!("scheduler: stopped");
    }

    // ── Processing ─────────────────────────────────────────────────────────

    /// Admit queued messages while allowed, then publish.
    fn step(&mut self) {
        loop {
            if self
                .state
                .watchdog(!self.timers.is_empty(), self.speech.is_some())
            {
                log::warn!(
                    "scheduler: watchdog cleared stuck processing ({} queued)",
                    self.state.queue_len()
                );
            }
            if !self.state.can_start(self.narration().gates_on_speech()) {
                break;
            }
            self.process_head();
        }
        self.publish();
    }

    fn process_head(&mut self) {
        let narration = self.narration();
        let Some(head) = self.state.queued().next() else {
            return;
        };

        match self.pacing.plan(narration, head, self.timeline.last()) {
            // A zero delay reveals within this step, before any newer
            // command is looked at.
            RevealPlan::AfterDelay(delay) if delay.is_zero() => {
                if let Some(msg) = self.state.take_head() {
                    self.reveal(msg);
                    self.state.release();
                }
            }
            RevealPlan::AfterDelay(delay) => {
                if let Some(head) = self.state.begin_delay() {
                    log::debug!("scheduler: {} reveals in {delay:?}", head.id);
                    let id = head.id.clone();
                    self.timers.schedule(id, delay);
                }
            }
            RevealPlan::SpeakNow => {
                let Some(msg) = self.state.take_head() else {
                    return;
                };
                let speakable = msg.is_speakable();
                let id = msg.id.clone();
                let text = msg.text.clone();

                match self.reveal(msg) {
                    Some(position) if speakable && self.state.is_beyond_last_spoken(position) => {
                        self.state.speech_started(&id, position);
                        self.start_speech(&id, text);
                    }
                    _ => self.state.release(),
                }
            }
        }
    }

    fn start_speech(&mut self, id: &MessageId, text: String) {
        let speech = Arc::clone(&self.audio.speech);
        let cached = self.audio.cache.as_ref().and_then(|c| c.get_cached(id));
        log::debug!(
            "scheduler: speaking {id} ({})",
            if cached.is_some() { "pre-generated" } else { "on demand" }
        );

        self.speech = Some(Box::pin(async move {
            match cached {
                Some(url) => speech.play_pre_generated(&url).await,
                None => speech.speak(&text).await,
            }
        }));
    }

    fn on_speech_done(&mut self, result: Result<(), TtsError>) {
        if let Err(e) = result {
            log::warn!("scheduler: narration failed, continuing without audio: {e}");
        }
        self.state.speech_finished();
    }

    fn on_timer(&mut self, id: MessageId) {
        match self.state.finish_delay(&id) {
            Some(msg) => {
                self.reveal(msg);
            }
            None => log::debug!("scheduler: ignoring stale timer for {id}"),
        }
    }

    /// Append a sequenced message.  Returns its position, or `None` when the
    /// key was already visible (the entry is patched instead).
    fn reveal(&mut self, msg: Message) -> Option<usize> {
        let key = msg.dedup_key();
        if self.timeline.contains_key(&key) {
            self.timeline
                .patch_by_key(&key, &MessagePatch::from_message(&msg));
            return None;
        }
        self.state.note_revealed(&msg.kind);
        self.timeline.append_sequenced(msg)
    }

    fn reveal_immediate(&mut self, msgs: Vec<Message>) {
        for msg in &msgs {
            self.state.note_revealed(&msg.kind);
        }
        self.timeline.append_immediate(msgs);
    }

    /// Publish a snapshot when the timeline or the loading flag moved.
    fn publish(&self) {
        let pending = self.state.pending_work();
        let loading = pending && !self.timeline.has_visible_placeholder();
        let revision = self.timeline.revision();

        self.snapshots.send_if_modified(|current| {
            if current.revision == revision && current.should_show_loading == loading {
                return false;
            }
            *current = self.timeline.snapshot(pending);
            true
        });
    }

    // ── Commands ───────────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Messages(events) => self.ingest(events),
            SchedulerCommand::Reset => self.reset(),
            SchedulerCommand::SetVoiceEnabled(enabled) => {
                if enabled == self.voice_enabled {
                    return;
                }
                if !enabled {
                    self.stop_audio(Some(self.fade));
                }
                self.voice_enabled = enabled;
                log::info!("scheduler: narration {:?}", self.narration());
            }
            SchedulerCommand::SetAudioMode(mode) => {
                if mode == self.mode {
                    return;
                }
                self.stop_audio(Some(self.fade));
                self.mode = mode;
                log::info!("scheduler: narration {:?}", self.narration());
            }
        }
    }

    fn ingest(&mut self, events: Vec<MessageEvent>) {
        let mut burst = coalesce(number_burst(&mut self.state, events));
        burst.retain(|msg| !self.absorb_redelivery(msg));
        if burst.is_empty() {
            return;
        }

        if interrupt_cutoff(&burst).is_some() {
            self.interrupt(burst);
        } else {
            self.admit(burst);
        }
    }

    /// Patch a message that is already visible or queued.  Returns `true`
    /// when `msg` was absorbed this way.
    fn absorb_redelivery(&mut self, msg: &Message) -> bool {
        let key = msg.dedup_key();
        let patch = MessagePatch::from_message(msg);

        if self.timeline.contains_key(&key) {
            if self.timeline.patch_by_key(&key, &patch) {
                log::debug!("scheduler: patched visible {key}");
            }
            return true;
        }
        self.state.update_queued(&key, &patch)
    }

    /// Route a burst without interrupts: immediate messages appear now,
    /// sequenced ones join the queue.
    fn admit(&mut self, burst: Vec<Message>) {
        let (immediate, sequenced): (Vec<_>, Vec<_>) = burst.into_iter().partition(|msg| {
            classify(msg).is_immediate() || self.state.is_stale(msg.sequence_index)
        });

        if !immediate.is_empty() {
            self.reveal_immediate(immediate);
        }
        if sequenced.is_empty() {
            return;
        }

        match self.narration() {
            Narration::Single if self.pre_generate => {
                if let Some(cache) = &self.audio.cache {
                    cache.pre_generate(&sequenced);
                }
            }
            Narration::Bulk => self.request_bulk(sequenced.clone()),
            _ => {}
        }

        for msg in sequenced {
            self.state.enqueue(msg);
        }
    }

    fn interrupt(&mut self, burst: Vec<Message>) {
        self.timers.cancel_all();
        if self.narration().is_voiced() {
            self.stop_audio(Some(self.fade));
        }

        let flushed = self.state.flush();
        let Some(plan) = plan_interrupt(burst, flushed) else {
            return;
        };

        log::info!(
            "scheduler: interrupt at #{}: {} revealed, {} fast-forwarded, {} remaining",
            plan.cutoff,
            plan.reveal_now.len(),
            plan.fast_forward.len(),
            plan.remainder.len()
        );

        self.reveal_immediate(plan.reveal_now);
        // Older content appears at once and is never narrated.
        self.timeline.append_immediate(plan.fast_forward);
        self.state.advance_past(plan.cutoff);
        self.admit(plan.remainder);
    }

    fn reset(&mut self) {
        log::info!("scheduler: reset");
        self.timers.cancel_all();
        self.stop_audio(None);
        self.state.reset();
        self.timeline.reset();
        if let Some(cache) = &self.audio.cache {
            cache.reset();
        }
        self.last_bulk_url = None;
    }

    fn teardown(&mut self) {
        self.timers.cancel_all();
        self.stop_audio(None);
        if let Some(cache) = &self.audio.cache {
            cache.reset();
        }
        self.state.flush();
        self.publish();
    }

    /// Stop all narration, fading over `fade` when given.
    fn stop_audio(&mut self, fade: Option<Duration>) {
        if self.speech.take().is_some() {
            self.audio.speech.stop(fade);
            self.state.speech_finished();
        }

        if let Some(job) = self.bulk_job.take() {
            job.abort();
            // A track generated before the abort is still handed back.
            if let Some(Ok((_, Ok(url)))) = job.now_or_never() {
                self.bulk_playlist.push_back(url);
            }
        }
        self.bulk_backlog.clear();
        if let Some(playback) = self.bulk_playback.take() {
            playback.abort();
        }

        if let Some(bulk) = &self.audio.bulk {
            for url in self.bulk_playlist.drain(..) {
                log::debug!("scheduler: discarding unplayed track {url}");
                bulk.engine.discard(&url);
            }
            bulk.generator.cancel_in_flight();
            match fade {
                Some(duration) => bulk.engine.fade_out_and_stop(duration),
                None => bulk.engine.hard_stop(),
            }
        }
    }

    // ── Bulk narration ─────────────────────────────────────────────────────

    fn request_bulk(&mut self, messages: Vec<Message>) {
        let Some(bulk) = &self.audio.bulk else {
            return;
        };
        let messages: Vec<Message> = messages.into_iter().filter(Message::is_speakable).collect();
        if messages.is_empty() {
            return;
        }
        if self.bulk_job.is_some() {
            self.bulk_backlog.extend(messages);
            return;
        }

        let generator = Arc::clone(&bulk.generator);
        let batch_id = generator.next_batch_id();
        self.bulk_job = Some(tokio::spawn(async move {
            let result = generator.generate(messages, batch_id.clone()).await;
            (batch_id, result)
        }));
    }

    fn on_bulk_generated(
        &mut self,
        joined: Result<(BatchId, Result<AudioUrl, TtsError>), JoinError>,
    ) {
        match joined {
            Ok((batch_id, Ok(url))) => {
                // A joined generation hands back the track already queued;
                // the engine releases it once played.
                if self.last_bulk_url.as_ref() == Some(&url) {
                    log::debug!("scheduler: {batch_id} returned an already queued track");
                } else {
                    self.last_bulk_url = Some(url.clone());
                    self.bulk_playlist.push_back(url);
                    self.play_next_bulk_track();
                }
            }
            Ok((batch_id, Err(e))) => {
                log::warn!("scheduler: bulk audio for {batch_id} failed, revealing silently: {e}");
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => log::error!("scheduler: bulk generation task failed: {e}"),
        }

        if !self.bulk_backlog.is_empty() {
            let backlog = std::mem::take(&mut self.bulk_backlog);
            self.request_bulk(backlog);
        }
    }

    fn play_next_bulk_track(&mut self) {
        if self.bulk_playback.is_some() {
            return;
        }
        let Some(bulk) = &self.audio.bulk else {
            return;
        };
        let Some(url) = self.bulk_playlist.pop_front() else {
            return;
        };

        let engine = bulk.engine.clone();
        self.bulk_playback = Some(tokio::spawn(async move { engine.play(url).await }));
    }

    fn on_bulk_played(&mut self, joined: Result<PlaybackOutcome, JoinError>) {
        match joined {
            Ok(PlaybackOutcome::Failed(e)) => {
                log::warn!("scheduler: bulk track failed to play: {e}");
            }
            Ok(outcome) => log::debug!("scheduler: bulk track {outcome:?}"),
            Err(e) if e.is_cancelled() => {}
            Err(e) => log::error!("scheduler: bulk playback task failed: {e}"),
        }
        self.play_next_bulk_track();
    }
}

/// Await the future in `slot`; pending forever when the slot is empty.
async fn until_done<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

/// Normalize a burst.  Events without a sequence index are numbered after
/// every explicit index seen so far, this burst included.
fn number_burst(state: &mut SchedulerState, events: Vec<MessageEvent>) -> Vec<Message> {
    for seq in events.iter().filter_map(|e| e.sequence_index) {
        state.observe_sequence(seq);
    }
    events
        .into_iter()
        .map(|event| {
            let msg = Message::from_event(event, state.next_sequence());
            state.observe_sequence(msg.sequence_index);
            msg
        })
        .collect()
}

/// Merge repeated keys inside one burst onto their first occurrence, so the
/// latest content wins without creating a second entry.
fn coalesce(burst: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(burst.len());
    let mut index: HashMap<DedupKey, usize> = HashMap::new();

    for msg in burst {
        let key = msg.dedup_key();
        match index.get(&key) {
            Some(&pos) => {
                MessagePatch::from_message(&msg).apply(&mut merged[pos]);
            }
            None => {
                index.insert(key, merged.len());
                merged.push(msg);
            }
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
