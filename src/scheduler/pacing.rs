//! Reveal pacing: how long the next sequenced message waits, and whether
//! its reveal is gated by a timer or by narration.

use std::time::Duration;

use crate::config::{AudioMode, PacingConfig};
use crate::message::Message;

// ---------------------------------------------------------------------------
// Narration
// ---------------------------------------------------------------------------

/// Effective narration mode, derived from the voice toggle and audio mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Narration {
    Off,
    Single,
    Bulk,
}

impl Narration {
    pub fn from_voice(enabled: bool, mode: AudioMode) -> Self {
        match (enabled, mode) {
            (false, _) => Narration::Off,
            (true, AudioMode::Single) => Narration::Single,
            (true, AudioMode::Bulk) => Narration::Bulk,
        }
    }

    /// Reveals wait for the previous message's speech to finish.
    pub fn gates_on_speech(self) -> bool {
        self == Narration::Single
    }

    pub fn is_voiced(self) -> bool {
        self != Narration::Off
    }
}

// ---------------------------------------------------------------------------
// RevealPlan
// ---------------------------------------------------------------------------

/// What the queue processor does with the head message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealPlan {
    /// Reveal when a timer of this length expires.
    AfterDelay(Duration),
    /// Reveal now; narration governs when the next message may follow.
    SpeakNow,
}

// ---------------------------------------------------------------------------
// RevealPacing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RevealPacing {
    chars_per_ms: f64,
    min_delay: Duration,
    max_delay: Duration,
}

impl RevealPacing {
    pub fn from_config(config: &PacingConfig) -> Self {
        let min_delay = Duration::from_millis(config.min_delay_ms);
        Self {
            chars_per_ms: config.chars_per_ms,
            min_delay,
            max_delay: Duration::from_millis(config.max_delay_ms).max(min_delay),
        }
    }

    /// Delay before revealing `next` when `previous` is the last visible
    /// message.
    ///
    /// Zero unless both are assistant messages; otherwise the time needed
    /// to read `previous` at `chars_per_ms`, clamped to the configured
    /// bounds.
    ///
    /// ```
    /// use std::time::Duration;
    /// use chat_playback::config::PacingConfig;
    /// use chat_playback::message::{Message, MessageEvent};
    /// use chat_playback::scheduler::RevealPacing;
    ///
    /// let pacing = RevealPacing::from_config(&PacingConfig::default());
    /// let prev = Message::from_event(MessageEvent::assistant("x".repeat(60)), 0);
    /// let next = Message::from_event(MessageEvent::assistant("next"), 1);
    /// assert_eq!(pacing.delay_for(&next, Some(&prev)), Duration::from_millis(1200));
    /// ```
    pub fn delay_for(&self, next: &Message, previous: Option<&Message>) -> Duration {
        let Some(previous) = previous else {
            return Duration::ZERO;
        };
        if !next.is_assistant() || !previous.is_assistant() {
            return Duration::ZERO;
        }
        if self.chars_per_ms <= 0.0 || !self.chars_per_ms.is_finite() {
            return self.max_delay;
        }

        let chars = previous.text.chars().count() as f64;
        let millis = (chars / self.chars_per_ms).round();
        Duration::from_millis(millis as u64).clamp(self.min_delay, self.max_delay)
    }

    pub fn plan(&self, narration: Narration, next: &Message, previous: Option<&Message>) -> RevealPlan {
        if narration.gates_on_speech() {
            RevealPlan::SpeakNow
        } else {
            RevealPlan::AfterDelay(self.delay_for(next, previous))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
