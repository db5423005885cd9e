//! Message model: raw backend events and the normalized [`Message`].
//!
//! [`MessageEvent`] is what the backend emits (serde-deserializable, every
//! field optional except the kind).  [`Message::from_event`] normalizes it,
//! synthesizing a deterministic id when the backend did not supply one so
//! that re-delivery of the same logical message stays idempotent.

use serde::{Deserialize, Serialize};

/// Number of leading characters of the text folded into a synthesized id.
const ID_PREFIX_CHARS: usize = 32;

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Opaque message identifier, unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from `(sequence_index, content prefix)`.
    ///
    /// ```
    /// use chat_playback::message::MessageId;
    ///
    /// let a = MessageId::synthesize(3, "Hello there");
    /// let b = MessageId::synthesize(3, "Hello there");
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str(), "auto-3-Hello there");
    /// ```
    pub fn synthesize(sequence_index: u64, text: &str) -> Self {
        let prefix: String = text.chars().take(ID_PREFIX_CHARS).collect();
        Self(format!("auto-{sequence_index}-{prefix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// MessageKind / ToolStatus
// ---------------------------------------------------------------------------

/// The rendering contract a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    System,
    ToolCall,
    Status,
    /// Structured payload (quiz, flashcard, summary …) named by `variant`.
    Card { variant: String },
}

impl MessageKind {
    pub fn label(&self) -> &str {
        match self {
            MessageKind::User => "user",
            MessageKind::Assistant => "assistant",
            MessageKind::System => "system",
            MessageKind::ToolCall => "tool-call",
            MessageKind::Status => "status",
            MessageKind::Card { variant } => variant,
        }
    }
}

/// Lifecycle of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Done,
    Error,
}

// ---------------------------------------------------------------------------
// MessageEvent
// ---------------------------------------------------------------------------

/// A message event as delivered by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub kind: MessageKind,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub is_awaiting_response: bool,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub tool_status: Option<ToolStatus>,
    #[serde(default)]
    pub tool_display_detail: Option<String>,
    #[serde(default)]
    pub sequence_index: Option<u64>,
}

impl MessageEvent {
    fn new(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            text: text.into(),
            is_streaming: false,
            is_awaiting_response: false,
            tool_call_id: None,
            tool_status: None,
            tool_display_detail: None,
            sequence_index: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageKind::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageKind::System, text)
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Status, text)
    }

    pub fn card(variant: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            MessageKind::Card {
                variant: variant.into(),
            },
            text,
        )
    }

    pub fn tool_call(tool_call_id: impl Into<String>, status: ToolStatus) -> Self {
        let mut ev = Self::new(MessageKind::ToolCall, "");
        ev.tool_call_id = Some(tool_call_id.into());
        ev.tool_status = Some(status);
        ev
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_sequence(mut self, sequence_index: u64) -> Self {
        self.sequence_index = Some(sequence_index);
        self
    }

    pub fn streaming(mut self, is_streaming: bool) -> Self {
        self.is_streaming = is_streaming;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.tool_display_detail = Some(detail.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A normalized message: always carries an id and a sequence position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// `true` when [`id`](Self::id) was derived locally rather than sent by
    /// the backend.
    pub synthesized_id: bool,
    pub kind: MessageKind,
    pub text: String,
    pub is_streaming: bool,
    pub is_awaiting_response: bool,
    pub tool_call_id: Option<String>,
    pub tool_status: Option<ToolStatus>,
    pub tool_display_detail: Option<String>,
    pub sequence_index: u64,
}

impl Message {
    /// Normalize a backend event.
    ///
    /// `fallback_sequence` is used when the event carries no
    /// `sequence_index` of its own.
    pub fn from_event(event: MessageEvent, fallback_sequence: u64) -> Self {
        let sequence_index = event.sequence_index.unwrap_or(fallback_sequence);
        let (id, synthesized_id) = match event.id {
            Some(id) if !id.is_empty() => (MessageId::new(id), false),
            _ => (MessageId::synthesize(sequence_index, &event.text), true),
        };

        Self {
            id,
            synthesized_id,
            kind: event.kind,
            text: event.text,
            is_streaming: event.is_streaming,
            is_awaiting_response: event.is_awaiting_response,
            tool_call_id: event.tool_call_id,
            tool_status: event.tool_status,
            tool_display_detail: event.tool_display_detail,
            sequence_index,
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.kind == MessageKind::Assistant
    }

    /// An assistant message with non-blank text: something worth narrating.
    pub fn is_speakable(&self) -> bool {
        self.is_assistant() && !self.text.trim().is_empty()
    }

    /// Dedup key under which this message is tracked on the timeline.
    pub fn dedup_key(&self) -> DedupKey {
        if self.kind == MessageKind::ToolCall {
            if let Some(call_id) = &self.tool_call_id {
                return DedupKey::ToolCall(call_id.clone());
            }
        }
        if self.kind == MessageKind::Status {
            return DedupKey::Status(self.text.clone());
        }
        if self.synthesized_id {
            DedupKey::Position(self.sequence_index)
        } else {
            DedupKey::Id(self.id.clone())
        }
    }

    /// A visible entry that already signals "work in progress" to the user.
    pub fn is_placeholder(&self) -> bool {
        self.is_streaming
            || self.is_awaiting_response
            || self.tool_status == Some(ToolStatus::Running)
    }
}

// ---------------------------------------------------------------------------
// DedupKey
// ---------------------------------------------------------------------------

/// Identity of a timeline entry for de-duplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    ToolCall(String),
    Status(String),
    Id(MessageId),
    /// Only used for messages whose id was synthesized, so distinct id-less
    /// messages never collapse into one entry.
    Position(u64),
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupKey::ToolCall(id) => write!(f, "tool-call:{id}"),
            DedupKey::Status(text) => write!(f, "status:{text}"),
            DedupKey::Id(id) => write!(f, "id:{id}"),
            DedupKey::Position(seq) => write!(f, "pos:{seq}"),
        }
    }
}

// ---------------------------------------------------------------------------
// MessagePatch
// ---------------------------------------------------------------------------

/// In-place update for an already visible message.
///
/// Only these fields may change after reveal; identity, kind and position
/// are fixed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub text: Option<String>,
    pub is_streaming: Option<bool>,
    pub tool_status: Option<ToolStatus>,
    pub tool_display_detail: Option<String>,
}

impl MessagePatch {
    /// Patch carrying every mutable field of `msg`.
    pub fn from_message(msg: &Message) -> Self {
        Self {
            text: Some(msg.text.clone()),
            is_streaming: Some(msg.is_streaming),
            tool_status: msg.tool_status,
            tool_display_detail: msg.tool_display_detail.clone(),
        }
    }

    /// Apply to `msg`; returns `true` when anything changed.
    pub fn apply(&self, msg: &mut Message) -> bool {
        let mut changed = false;

        if let Some(text) = &self.text {
            if *text != msg.text {
                msg.text = text.clone();
                changed = true;
            }
        }
        if let Some(streaming) = self.is_streaming {
            if streaming != msg.is_streaming {
                msg.is_streaming = streaming;
                changed = true;
            }
        }
        if let Some(status) = self.tool_status {
            if msg.tool_status != Some(status) {
                msg.tool_status = Some(status);
                changed = true;
            }
        }
        if let Some(detail) = &self.tool_display_detail {
            if msg.tool_display_detail.as_ref() != Some(detail) {
                msg.tool_display_detail = Some(detail.clone());
                changed = true;
            }
        }

        changed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_id_is_kept() {
        let msg = Message::from_event(MessageEvent::assistant("hi").with_id("m-1"), 0);
        assert_eq!(msg.id.as_str(), "m-1");
        assert!(!msg.synthesized_id);
        assert_eq!(msg.dedup_key(), DedupKey::Id(MessageId::new("m-1")));
    }

    #[test]
    fn missing_id_is_synthesized_deterministically() {
        let a = Message::from_event(MessageEvent::assistant("same text"), 4);
        let b = Message::from_event(MessageEvent::assistant("same text"), 4);
        assert!(a.synthesized_id);
        assert_eq!(a.id, b.id);
        assert_eq!(a.dedup_key(), DedupKey::Position(4));
    }

    #[test]
    fn empty_backend_id_counts_as_missing() {
        let msg = Message::from_event(MessageEvent::user("x").with_id(""), 2);
        assert!(msg.synthesized_id);
    }

    #[test]
    fn event_sequence_wins_over_fallback() {
        let msg = Message::from_event(MessageEvent::user("x").with_sequence(10), 2);
        assert_eq!(msg.sequence_index, 10);
    }

    #[test]
    fn synthesized_id_uses_bounded_prefix() {
        let long = "a".repeat(100);
        let id = MessageId::synthesize(1, &long);
        assert_eq!(id.as_str().len(), "auto-1-".len() + ID_PREFIX_CHARS);
    }

    #[test]
    fn tool_calls_dedup_by_call_id() {
        let msg = Message::from_event(
            MessageEvent::tool_call("call-7", ToolStatus::Running).with_id("m-9"),
            0,
        );
        assert_eq!(msg.dedup_key(), DedupKey::ToolCall("call-7".into()));
        assert_eq!(msg.dedup_key().to_string(), "tool-call:call-7");
    }

    #[test]
    fn status_dedups_by_text() {
        let msg = Message::from_event(MessageEvent::status("Thinking…").with_id("s"), 0);
        assert_eq!(msg.dedup_key().to_string(), "status:Thinking…");
    }

    #[test]
    fn placeholder_detection() {
        let running = Message::from_event(MessageEvent::tool_call("c", ToolStatus::Running), 0);
        let done = Message::from_event(MessageEvent::tool_call("c", ToolStatus::Done), 0);
        let streaming = Message::from_event(MessageEvent::assistant("par").streaming(true), 0);
        assert!(running.is_placeholder());
        assert!(!done.is_placeholder());
        assert!(streaming.is_placeholder());
    }

    #[test]
    fn speakable_requires_assistant_text() {
        let blank = Message::from_event(MessageEvent::assistant("   "), 0);
        let user = Message::from_event(MessageEvent::user("hello"), 0);
        let ok = Message::from_event(MessageEvent::assistant("hello"), 0);
        assert!(!blank.is_speakable());
        assert!(!user.is_speakable());
        assert!(ok.is_speakable());
    }

    #[test]
    fn patch_reports_changes() {
        let mut msg = Message::from_event(MessageEvent::assistant("par").streaming(true), 0);
        let patch = MessagePatch {
            text: Some("partial answer".into()),
            is_streaming: Some(false),
            ..MessagePatch::default()
        };
        assert!(patch.apply(&mut msg));
        assert_eq!(msg.text, "partial answer");
        assert!(!msg.is_streaming);
        // Re-applying the same patch is a no-op.
        assert!(!patch.apply(&mut msg));
    }

    #[test]
    fn event_deserializes_with_defaults() {
        let json = r#"{"kind":{"type":"card","variant":"quiz"},"text":"Q1"}"#;
        let ev: MessageEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            ev.kind,
            MessageKind::Card {
                variant: "quiz".into()
            }
        );
        assert!(ev.id.is_none());
        assert!(!ev.is_streaming);
    }
}
