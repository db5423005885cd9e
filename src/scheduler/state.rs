//! Scheduler state and its transitions.
//!
//! [`SchedulerState`] is the only mutable state of the queue processor.
//! Fields are private; the runner changes them exclusively through the
//! transition methods below, each of which leaves the state consistent.
//!
//! Per queued message:
//!
//! ```text
//! Queued ──begin_delay──▶ Delaying ──finish_delay──▶ Revealed
//! Queued ──take_head────▶ Revealed ──speech_started──▶ Speaking ──speech_finished──▶ done
//! any ──flush / watchdog / reset──▶ (dropped from the processor)
//! ```

use std::collections::VecDeque;

use crate::message::{DedupKey, Message, MessageId, MessageKind, MessagePatch};

// ---------------------------------------------------------------------------
// MessagePhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePhase {
    /// Waiting in the pending queue.
    Queued,
    /// Head of the queue, waiting for its reveal timer.
    Delaying,
    /// Revealed and currently being narrated.
    Speaking,
}

// ---------------------------------------------------------------------------
// SchedulerState
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SchedulerState {
    queue: VecDeque<Message>,
    is_processing: bool,
    is_speech_pending: bool,
    /// Message currently between `Queued` and done, with its phase.
    current: Option<(MessageId, MessagePhase)>,
    last_revealed_sequence_index: Option<u64>,
    /// Timeline position of the last message handed to speech.
    last_spoken_position: Option<usize>,
    /// A user turn is visible and nothing has answered it yet.
    awaiting_response: bool,
    /// Sequence number given to the next event that carries none.
    next_sequence: u64,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Sequencing ─────────────────────────────────────────────────────────

    /// Fallback sequence index for an event without one.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Record that `sequence_index` has been seen so fallback numbering
    /// continues after it.
    pub fn observe_sequence(&mut self, sequence_index: u64) {
        self.next_sequence = self.next_sequence.max(sequence_index.saturating_add(1));
    }

    /// `true` when `sequence_index` precedes an already revealed interrupt.
    pub fn is_stale(&self, sequence_index: u64) -> bool {
        self.last_revealed_sequence_index
            .is_some_and(|last| sequence_index < last)
    }

    /// Move `last_revealed_sequence_index` forward to `sequence_index`.
    pub fn advance_past(&mut self, sequence_index: u64) {
        self.last_revealed_sequence_index = Some(
            self.last_revealed_sequence_index
                .map_or(sequence_index, |last| last.max(sequence_index)),
        );
    }

    // ── Queue ──────────────────────────────────────────────────────────────

    pub fn enqueue(&mut self, msg: Message) {
        self.queue.push_back(msg);
    }

    /// Patch the queued message with `key`.  Returns `false` when no queued
    /// message has that key.
    pub fn update_queued(&mut self, key: &DedupKey, patch: &MessagePatch) -> bool {
        match self.queue.iter_mut().find(|m| &m.dedup_key() == key) {
            Some(msg) => {
                patch.apply(msg);
                true
            }
            None => false,
        }
    }

    pub fn queued(&self) -> impl Iterator<Item = &Message> {
        self.queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The processor may admit the head message.
    ///
    /// `speech_gates` is `true` when reveals wait for narration (voice on,
    /// single mode).
    pub fn can_start(&self, speech_gates: bool) -> bool {
        !self.queue.is_empty()
            && !self.is_processing
            && !(speech_gates && self.is_speech_pending)
    }

    // ── Transitions ────────────────────────────────────────────────────────

    /// Start delaying the head message.  The head stays queued until
    /// [`finish_delay`](Self::finish_delay).
    pub fn begin_delay(&mut self) -> Option<&Message> {
        let head = self.queue.front()?;
        self.is_processing = true;
        self.current = Some((head.id.clone(), MessagePhase::Delaying));
        Some(head)
    }

    /// The reveal timer for `id` fired.  Returns the message to reveal, or
    /// `None` when the timer is stale (the message was flushed meanwhile).
    pub fn finish_delay(&mut self, id: &MessageId) -> Option<Message> {
        match &self.current {
            Some((current, MessagePhase::Delaying)) if current == id => {}
            _ => return None,
        }
        if self.queue.front().map(|m| &m.id) != Some(id) {
            return None;
        }
        self.current = None;
        self.is_processing = false;
        self.queue.pop_front()
    }

    /// Pop the head for an immediate reveal.  Processing stays set until
    /// [`speech_started`](Self::speech_started) or [`release`](Self::release).
    pub fn take_head(&mut self) -> Option<Message> {
        let head = self.queue.pop_front()?;
        self.is_processing = true;
        self.current = None;
        Some(head)
    }

    /// Narration of the message revealed at `position` began.
    pub fn speech_started(&mut self, id: &MessageId, position: usize) {
        self.is_speech_pending = true;
        self.current = Some((id.clone(), MessagePhase::Speaking));
        self.last_spoken_position = Some(position);
    }

    /// Narration ended (successfully or not).  Admits the next message.
    pub fn speech_finished(&mut self) {
        self.is_speech_pending = false;
        self.is_processing = false;
        self.current = None;
    }

    /// The current message needs no further work.
    pub fn release(&mut self) {
        self.is_processing = false;
        self.current = None;
    }

    /// `true` when the timeline entry at `position` has not been narrated.
    pub fn is_beyond_last_spoken(&self, position: usize) -> bool {
        self.last_spoken_position.map_or(true, |last| position > last)
    }

    /// Empty the queue and drop every in-progress flag.
    pub fn flush(&mut self) -> Vec<Message> {
        self.is_processing = false;
        self.is_speech_pending = false;
        self.current = None;
        self.queue.drain(..).collect()
    }

    /// Bookkeeping after a message of `kind` became visible.  Only an
    /// assistant or card reply answers a user turn; tool calls and status
    /// markers leave it waiting.
    pub fn note_revealed(&mut self, kind: &MessageKind) {
        match kind {
            MessageKind::User => self.awaiting_response = true,
            MessageKind::Assistant | MessageKind::Card { .. } => self.awaiting_response = false,
            MessageKind::System | MessageKind::ToolCall | MessageKind::Status => {}
        }
    }

    /// Clear a processing flag left behind by a lost timer or callback.
    ///
    /// Returns `true` when the watchdog tripped.
    pub fn watchdog(&mut self, timer_active: bool, speech_active: bool) -> bool {
        if self.queue.is_empty() || !self.is_processing || timer_active || speech_active {
            return false;
        }
        self.is_processing = false;
        self.is_speech_pending = false;
        self.current = None;
        true
    }

    /// Forget everything, as for a new conversation.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // ── Queries ────────────────────────────────────────────────────────────

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn is_speech_pending(&self) -> bool {
        self.is_speech_pending
    }

    #[cfg(test)]
    pub fn phase_of(&self, id: &MessageId) -> Option<MessagePhase> {
        if let Some((current, phase)) = &self.current {
            if current == id {
                return Some(*phase);
            }
        }
        self.queue
            .iter()
            .any(|m| &m.id == id)
            .then_some(MessagePhase::Queued)
    }

    /// Work is outstanding: queued messages, a message in flight, or a user
    /// turn still waiting for its answer.
    pub fn pending_work(&self) -> bool {
        self.awaiting_response || !self.queue.is_empty() || self.is_processing
    }

    #[cfg(test)]
    pub fn force_processing(&mut self) {
        self.is_processing = true;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageEvent;

    fn assistant(text: &str, seq: u64) -> Message {
        Message::from_event(MessageEvent::assistant(text), seq)
    }

    #[test]
    fn delay_keeps_head_queued_until_finished() {
        let mut state = SchedulerState::new();
        let a = assistant("Hi", 0);
        state.enqueue(a.clone());

        assert!(state.can_start(false));
        assert_eq!(state.begin_delay().map(|m| m.id.clone()), Some(a.id.clone()));
        assert_eq!(state.phase_of(&a.id), Some(MessagePhase::Delaying));
        assert_eq!(state.queue_len(), 1);
        assert!(!state.can_start(false));

        assert_eq!(state.finish_delay(&a.id), Some(a));
        assert!(!state.is_processing());
        assert_eq!(state.queue_len(), 0);
    }

    #[test]
    fn stale_timer_is_ignored() {
        let mut state = SchedulerState::new();
        let a = assistant("Hi", 0);
        state.enqueue(a.clone());
        state.begin_delay();
        state.flush();

        assert_eq!(state.finish_delay(&a.id), None);
    }

    #[test]
    fn speech_gates_only_when_requested() {
        let mut state = SchedulerState::new();
        state.enqueue(assistant("One", 0));
        state.enqueue(assistant("Two", 1));

        let head = state.take_head().unwrap();
        state.speech_started(&head.id, 0);
        assert_eq!(state.phase_of(&head.id), Some(MessagePhase::Speaking));

        // Still processing: nobody may start.
        assert!(!state.can_start(false));

        state.speech_finished();
        assert!(state.can_start(true));
    }

    #[test]
    fn last_spoken_position_only_moves_forward() {
        let mut state = SchedulerState::new();
        assert!(state.is_beyond_last_spoken(0));
        state.speech_started(&MessageId::new("a"), 3);
        assert!(!state.is_beyond_last_spoken(3));
        assert!(state.is_beyond_last_spoken(4));
    }

    #[test]
    fn watchdog_clears_orphaned_processing() {
        let mut state = SchedulerState::new();
        state.enqueue(assistant("Hi", 0));
        state.force_processing();

        assert!(!state.watchdog(true, false));
        assert!(!state.watchdog(false, true));
        assert!(state.watchdog(false, false));
        assert!(!state.is_processing());
        assert!(state.can_start(true));
    }

    #[test]
    fn watchdog_ignores_empty_queue() {
        let mut state = SchedulerState::new();
        state.force_processing();
        assert!(!state.watchdog(false, false));
    }

    #[test]
    fn update_queued_patches_by_key() {
        let mut state = SchedulerState::new();
        let a = assistant("Hel", 0);
        state.enqueue(a.clone());

        let patch = MessagePatch {
            text: Some("Hello".into()),
            ..MessagePatch::default()
        };
        assert!(state.update_queued(&a.dedup_key(), &patch));
        assert_eq!(state.queued().next().unwrap().text, "Hello");
        assert!(!state.update_queued(&DedupKey::Status("x".into()), &patch));
    }

    #[test]
    fn sequence_tracking() {
        let mut state = SchedulerState::new();
        state.observe_sequence(4);
        assert_eq!(state.next_sequence(), 5);
        state.observe_sequence(2);
        assert_eq!(state.next_sequence(), 5);

        assert!(!state.is_stale(0));
        state.advance_past(3);
        assert!(state.is_stale(2));
        assert!(!state.is_stale(3));
        state.advance_past(1);
        assert!(state.is_stale(2));
    }

    #[test]
    fn pending_work_tracks_awaiting_response() {
        let mut state = SchedulerState::new();
        assert!(!state.pending_work());

        state.note_revealed(&MessageKind::User);
        assert!(state.pending_work());

        state.note_revealed(&MessageKind::ToolCall);
        state.note_revealed(&MessageKind::Status);
        assert!(state.pending_work());

        state.note_revealed(&MessageKind::Assistant);
        assert!(!state.pending_work());
    }
}
