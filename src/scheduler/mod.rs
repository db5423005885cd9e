//! Message playback scheduler.
//!
//! Turns bursts of backend message events into the visible timeline:
//! immediate messages appear at once, sequenced ones are revealed one at a
//! time at reading pace (or, with single-mode narration, as speech ends),
//! and user or system messages interrupt whatever is pending.
//!
//! # Architecture
//!
//! ```text
//! SchedulerCommand (mpsc)
//!        │
//!        ▼
//! PlaybackScheduler::run()  ← async tokio task, sole owner of:
//!        │
//!        ├─ SchedulerState    pending queue, processing flags, sequencing
//!        ├─ VisibleTimeline   de-duplicated, append-only entries
//!        ├─ TimerRegistry     reveal timers (DelayQueue)
//!        └─ AudioServices     SpeechOutput / AudioCache / BulkAudioGenerator
//!
//! watch::Receiver<TimelineSnapshot> ←─── read by the renderer
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use chat_playback::config::AppConfig;
//! use chat_playback::message::MessageEvent;
//! use chat_playback::scheduler::{AudioServices, PlaybackScheduler, SchedulerCommand};
//!
//! #[tokio::main]
//! async fn main() {
//!     let scheduler = PlaybackScheduler::new(&AppConfig::default(), AudioServices::silent());
//!     let mut snapshots = scheduler.subscribe();
//!     let (tx, rx) = tokio::sync::mpsc::channel(16);
//!     tokio::spawn(scheduler.run(rx));
//!
//!     tx.send(SchedulerCommand::Messages(vec![
//!         MessageEvent::assistant("Hi there."),
//!         MessageEvent::assistant("Let's begin."),
//!     ]))
//!     .await
//!     .unwrap();
//!
//!     while snapshots.changed().await.is_ok() {
//!         println!("{:?}", snapshots.borrow().texts());
//!     }
//! }
//! ```

pub mod interrupt;
pub mod pacing;
pub mod runner;
pub mod state;
pub mod timers;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use interrupt::{interrupt_cutoff, plan_interrupt, InterruptPlan};
pub use pacing::{Narration, RevealPacing, RevealPlan};
pub use runner::{AudioServices, BulkServices, PlaybackScheduler, SchedulerCommand};
pub use state::{MessagePhase, SchedulerState};
pub use timers::TimerRegistry;
