//! Message model and classifier.
//!
//! * [`MessageEvent`]: raw backend event (serde).
//! * [`Message`]: normalized message with a deterministic id.
//! * [`DedupKey`]: identity used by the visible timeline.
//! * [`MessagePatch`]: in-place update of a visible message.
//! * [`classify`] / [`is_interrupt`]: routing decisions.

pub mod classify;
pub mod model;

pub use classify::{classify, is_interrupt, Classification};
pub use model::{
    DedupKey, Message, MessageEvent, MessageId, MessageKind, MessagePatch, ToolStatus,
};
