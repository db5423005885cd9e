//! Interrupt planning.
//!
//! A burst containing a user or system message interrupts whatever the
//! scheduler is doing.  [`plan_interrupt`] decides, purely from sequence
//! indices, which messages become visible at once and which go back into
//! the queue.  The runner then applies the plan in one step.

use crate::message::{is_interrupt, Message};

/// How an interrupting burst is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptPlan {
    /// Sequence index of the last interrupting message in the burst.
    pub cutoff: u64,
    /// Burst messages up to and including the cutoff, in sequence order.
    pub reveal_now: Vec<Message>,
    /// Previously queued messages preceding the cutoff.  Revealed silently
    /// right after `reveal_now`.
    pub fast_forward: Vec<Message>,
    /// Queued and burst messages after the cutoff, in sequence order.
    pub remainder: Vec<Message>,
}

#[cfg(test)]
impl InterruptPlan {
    /// The interrupting messages themselves.
    pub fn interrupts(&self) -> impl Iterator<Item = &Message> {
        self.reveal_now.iter().filter(|m| is_interrupt(m))
    }
}

/// Build the plan for `burst`, given the messages just `flushed` from the
/// pending queue.  Returns `None` (handing `flushed` back untouched is the
/// caller's job) when the burst holds no interrupt.
pub fn plan_interrupt(burst: Vec<Message>, flushed: Vec<Message>) -> Option<InterruptPlan> {
    let cutoff = interrupt_cutoff(&burst)?;

    let (mut reveal_now, mut remainder): (Vec<_>, Vec<_>) =
        burst.into_iter().partition(|m| m.sequence_index <= cutoff);
    let (mut fast_forward, flushed_after): (Vec<_>, Vec<_>) =
        flushed.into_iter().partition(|m| m.sequence_index <= cutoff);
    remainder.extend(flushed_after);

    // Stable sorts: equal indices keep arrival order.
    reveal_now.sort_by_key(|m| m.sequence_index);
    fast_forward.sort_by_key(|m| m.sequence_index);
    remainder.sort_by_key(|m| m.sequence_index);

    Some(InterruptPlan {
        cutoff,
        reveal_now,
        fast_forward,
        remainder,
    })
}

/// Sequence index of the last interrupting message in `burst`.
pub fn interrupt_cutoff(burst: &[Message]) -> Option<u64> {
    burst
        .iter()
        .filter(|m| is_interrupt(m))
        .map(|m| m.sequence_index)
        .max()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageEvent, ToolStatus};

    fn msg(event: MessageEvent, seq: u64) -> Message {
        Message::from_event(event.with_sequence(seq), seq)
    }

    fn texts(msgs: &[Message]) -> Vec<&str> {
        msgs.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn burst_without_interrupt_has_no_plan() {
        let burst = vec![msg(MessageEvent::assistant("a"), 0)];
        assert!(plan_interrupt(burst, Vec::new()).is_none());
    }

    #[test]
    fn queued_messages_before_cutoff_are_fast_forwarded() {
        let flushed = vec![
            msg(MessageEvent::assistant("q1"), 1),
            msg(MessageEvent::assistant("q2"), 2),
        ];
        let burst = vec![msg(MessageEvent::user("stop"), 3)];

        let plan = plan_interrupt(burst, flushed).unwrap();

        assert_eq!(plan.cutoff, 3);
        assert_eq!(texts(&plan.reveal_now), ["stop"]);
        assert_eq!(texts(&plan.fast_forward), ["q1", "q2"]);
        assert!(plan.remainder.is_empty());
    }

    #[test]
    fn messages_after_cutoff_are_kept_for_the_queue() {
        let flushed = vec![msg(MessageEvent::assistant("late queued"), 9)];
        let burst = vec![
            msg(MessageEvent::assistant("before"), 4),
            msg(MessageEvent::user("question"), 5),
            msg(MessageEvent::assistant("answer"), 6),
            msg(MessageEvent::tool_call("t1", ToolStatus::Running), 7),
        ];

        let plan = plan_interrupt(burst, flushed).unwrap();

        assert_eq!(texts(&plan.reveal_now), ["before", "question"]);
        assert_eq!(plan.remainder.len(), 3);
        assert_eq!(plan.remainder[0].text, "answer");
        assert_eq!(plan.remainder[2].text, "late queued");
        assert_eq!(plan.interrupts().count(), 1);
    }

    #[test]
    fn cutoff_is_last_interrupt() {
        let burst = vec![
            msg(MessageEvent::user("one"), 0),
            msg(MessageEvent::assistant("reply"), 1),
            msg(MessageEvent::system("session ended"), 2),
        ];
        assert_eq!(interrupt_cutoff(&burst), Some(2));

        let plan = plan_interrupt(burst, Vec::new()).unwrap();
        assert_eq!(texts(&plan.reveal_now), ["one", "reply", "session ended"]);
        assert_eq!(plan.interrupts().count(), 2);
    }
}
