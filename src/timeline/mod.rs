//! Visible timeline: the de-duplicated, insertion-ordered list of messages
//! the rendering layer reads.
//!
//! The timeline keeps a persistent [`DedupKey`] set alongside its entries,
//! updated incrementally on every append, so the "no two entries share a
//! key" invariant never has to be recomputed.  Entries are never removed
//! during a session; only [`VisibleTimeline::reset`] clears them.
//!
//! Every mutation bumps [`revision`](VisibleTimeline::revision); the
//! scheduler publishes a [`TimelineSnapshot`] whenever the revision moves.

use std::collections::{HashMap, HashSet};

use crate::message::{DedupKey, Message, MessageId, MessagePatch};

// ---------------------------------------------------------------------------
// TimelineSnapshot
// ---------------------------------------------------------------------------

/// What the rendering layer sees after a timeline mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineSnapshot {
    pub messages: Vec<Message>,
    /// `true` when work is pending and no visible placeholder (running tool
    /// call, streaming text, awaiting marker) already covers it.
    pub should_show_loading: bool,
    pub revision: u64,
}

impl TimelineSnapshot {
    /// Texts of the visible messages, in order.  Handy for assertions and
    /// plain-text renderers.
    pub fn texts(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.text.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// VisibleTimeline
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct VisibleTimeline {
    entries: Vec<Message>,
    keys: HashSet<DedupKey>,
    /// Position of each entry by dedup key.
    positions: HashMap<DedupKey, usize>,
    revision: u64,
}

impl VisibleTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every message whose key is not yet visible, in arrival order.
    ///
    /// Returns the number of entries actually appended.  Duplicates inside
    /// `msgs` itself collapse onto their first occurrence.
    pub fn append_immediate(&mut self, msgs: impl IntoIterator<Item = Message>) -> usize {
        msgs.into_iter()
            .filter_map(|m| self.push(m))
            .count()
    }

    /// Append a single sequenced message; returns its position, or `None`
    /// when the key was already visible.
    pub fn append_sequenced(&mut self, msg: Message) -> Option<usize> {
        self.push(msg)
    }

    fn push(&mut self, msg: Message) -> Option<usize> {
        let key = msg.dedup_key();
        if !self.keys.insert(key.clone()) {
            log::trace!("timeline: dropping duplicate {key}");
            return None;
        }
        let pos = self.entries.len();
        self.positions.insert(key, pos);
        self.entries.push(msg);
        self.revision += 1;
        Some(pos)
    }

    /// Update the mutable fields of the entry with `id`.
    ///
    /// No-op (returns `false`) when `id` is not visible or nothing changed.
    pub fn patch_in_place(&mut self, id: &MessageId, patch: &MessagePatch) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|m| &m.id == id) else {
            return false;
        };
        let changed = patch.apply(entry);
        if changed {
            self.revision += 1;
        }
        changed
    }

    /// Update the mutable fields of the entry tracked under `key`.
    pub fn patch_by_key(&mut self, key: &DedupKey, patch: &MessagePatch) -> bool {
        let Some(&pos) = self.positions.get(key) else {
            return false;
        };
        let changed = patch.apply(&mut self.entries[pos]);
        if changed {
            self.revision += 1;
        }
        changed
    }

    pub fn contains_key(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    /// Clear everything.  Only used on a full session reset.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.keys.clear();
        self.positions.clear();
        self.revision += 1;
    }

    pub fn last(&self) -> Option<&Message> {
        self.entries.last()
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// `true` when the newest entry already signals progress to the user.
    pub fn has_visible_placeholder(&self) -> bool {
        self.entries.last().is_some_and(Message::is_placeholder)
    }

    pub fn snapshot(&self, pending_work: bool) -> TimelineSnapshot {
        TimelineSnapshot {
            messages: self.entries.clone(),
            should_show_loading: pending_work && !self.has_visible_placeholder(),
            revision: self.revision,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageEvent, ToolStatus};

    fn msg(ev: MessageEvent, seq: u64) -> Message {
        Message::from_event(ev, seq)
    }

    #[test]
    fn append_immediate_filters_existing_keys() {
        let mut tl = VisibleTimeline::new();
        let a = msg(MessageEvent::assistant("a").with_id("1"), 0);
        let b = msg(MessageEvent::assistant("b").with_id("2"), 1);

        assert_eq!(tl.append_immediate(vec![a.clone(), b]), 2);
        assert_eq!(tl.append_immediate(vec![a]), 0);
        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn duplicates_within_one_burst_collapse() {
        let mut tl = VisibleTimeline::new();
        let t1 = msg(MessageEvent::tool_call("c", ToolStatus::Running), 0);
        let t2 = msg(MessageEvent::tool_call("c", ToolStatus::Running), 1);
        assert_eq!(tl.append_immediate(vec![t1, t2]), 1);
    }

    #[test]
    fn id_less_messages_do_not_collapse() {
        let mut tl = VisibleTimeline::new();
        let a = msg(MessageEvent::assistant("same"), 0);
        let b = msg(MessageEvent::assistant("same"), 1);
        assert_eq!(tl.append_immediate(vec![a, b]), 2);
    }

    #[test]
    fn append_sequenced_returns_position() {
        let mut tl = VisibleTimeline::new();
        assert_eq!(
            tl.append_sequenced(msg(MessageEvent::user("hi").with_id("u"), 0)),
            Some(0)
        );
        assert_eq!(
            tl.append_sequenced(msg(MessageEvent::assistant("yo").with_id("a"), 1)),
            Some(1)
        );
        assert_eq!(
            tl.append_sequenced(msg(MessageEvent::assistant("yo").with_id("a"), 1)),
            None
        );
    }

    #[test]
    fn patch_in_place_keeps_position() {
        let mut tl = VisibleTimeline::new();
        tl.append_immediate(vec![
            msg(MessageEvent::assistant("He").with_id("a").streaming(true), 0),
            msg(MessageEvent::status("Thinking"), 1),
        ]);
        let rev = tl.revision();
        let patch = MessagePatch {
            text: Some("Hello".into()),
            is_streaming: Some(false),
            ..MessagePatch::default()
        };
        assert!(tl.patch_in_place(&MessageId::new("a"), &patch));
        assert_eq!(tl.messages()[0].text, "Hello");
        assert!(!tl.messages()[0].is_streaming);
        assert!(tl.revision() > rev);
    }

    #[test]
    fn patch_unknown_id_is_noop() {
        let mut tl = VisibleTimeline::new();
        let rev = tl.revision();
        assert!(!tl.patch_in_place(&MessageId::new("nope"), &MessagePatch::default()));
        assert_eq!(tl.revision(), rev);
    }

    #[test]
    fn patch_by_key_updates_tool_status() {
        let mut tl = VisibleTimeline::new();
        let running = msg(MessageEvent::tool_call("c9", ToolStatus::Running), 0);
        let done = msg(
            MessageEvent::tool_call("c9", ToolStatus::Done).with_detail("3 results"),
            1,
        );
        tl.append_immediate(vec![running]);
        assert!(tl.patch_by_key(&done.dedup_key(), &MessagePatch::from_message(&done)));
        assert_eq!(tl.len(), 1);
        assert_eq!(tl.messages()[0].tool_status, Some(ToolStatus::Done));
        assert_eq!(
            tl.messages()[0].tool_display_detail.as_deref(),
            Some("3 results")
        );
    }

    #[test]
    fn reset_clears_keys() {
        let mut tl = VisibleTimeline::new();
        let a = msg(MessageEvent::assistant("a").with_id("1"), 0);
        tl.append_immediate(vec![a.clone()]);
        tl.reset();
        assert!(tl.is_empty());
        assert_eq!(tl.append_immediate(vec![a]), 1);
    }

    #[test]
    fn loading_is_hidden_by_placeholder() {
        let mut tl = VisibleTimeline::new();
        assert!(tl.snapshot(true).should_show_loading);
        assert!(!tl.snapshot(false).should_show_loading);

        tl.append_immediate(vec![msg(MessageEvent::tool_call("c", ToolStatus::Running), 0)]);
        assert!(!tl.snapshot(true).should_show_loading);

        tl.patch_by_key(
            &DedupKey::ToolCall("c".into()),
            &MessagePatch {
                tool_status: Some(ToolStatus::Done),
                ..MessagePatch::default()
            },
        );
        assert!(tl.snapshot(true).should_show_loading);
    }
}
