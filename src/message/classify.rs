//! Message classifier: decides whether a message bypasses pacing.
//!
//! Tool calls, status markers, cards, system markers and anything still
//! streaming are *immediate* and must never wait behind narration.
//! Static user/assistant turns are *sequenced* and go through the
//! scheduler's paced queue.

use super::model::{Message, MessageKind};

/// Which path a message takes into the visible timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Rendered as soon as it is classified.
    Immediate,
    /// Revealed by the scheduler after pacing (and, in voice mode, speech).
    Sequenced,
}

impl Classification {
    pub fn is_immediate(self) -> bool {
        self == Classification::Immediate
    }
}

/// Classify `msg`.  Pure function of its kind and flags.
///
/// ```
/// use chat_playback::message::{classify, Classification, Message, MessageEvent};
///
/// let turn = Message::from_event(MessageEvent::assistant("Hello"), 0);
/// assert_eq!(classify(&turn), Classification::Sequenced);
///
/// let delta = Message::from_event(MessageEvent::assistant("Hel").streaming(true), 1);
/// assert_eq!(classify(&delta), Classification::Immediate);
/// ```
pub fn classify(msg: &Message) -> Classification {
    if msg.is_streaming || msg.is_awaiting_response || msg.tool_call_id.is_some() {
        return Classification::Immediate;
    }

    match msg.kind {
        MessageKind::User | MessageKind::Assistant => Classification::Sequenced,
        MessageKind::System
        | MessageKind::ToolCall
        | MessageKind::Status
        | MessageKind::Card { .. } => Classification::Immediate,
    }
}

/// `true` for events that preempt pending narration (user turns and
/// system markers).
pub fn is_interrupt(msg: &Message) -> bool {
    matches!(msg.kind, MessageKind::User | MessageKind::System)
}
