//! `BulkAudioGenerator`: one synthesized track for a batch of messages.
//!
//! At most one generation runs at a time.  A caller arriving while a
//! generation is in flight awaits the same shared future instead of
//! starting a second job; its own messages are not synthesized.  The
//! scheduler keeps a backlog for those and requests them once the current
//! generation has finished.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::message::Message;
use crate::tts::{AudioUrl, BatchId, BulkAudioBackend, TtsError};

type BulkFuture = Shared<BoxFuture<'static, Result<AudioUrl, TtsError>>>;

pub struct BulkAudioGenerator {
    backend: Arc<dyn BulkAudioBackend>,
    timeout: Duration,
    in_flight: Mutex<Option<(BatchId, BulkFuture)>>,
    batches: AtomicU64,
}

impl BulkAudioGenerator {
    /// Wrap `backend`; every generation is bounded by `timeout`.
    pub fn new(backend: Arc<dyn BulkAudioBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            in_flight: Mutex::new(None),
            batches: AtomicU64::new(0),
        }
    }

    /// A fresh, process-unique batch id.
    pub fn next_batch_id(&self) -> BatchId {
        let n = self.batches.fetch_add(1, Ordering::Relaxed);
        BatchId::new(format!("batch-{n}"))
    }

    #[cfg(test)]
    pub fn is_generating(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Synthesize `messages` as one track, or join the generation already
    /// in flight.
    ///
    /// # Errors
    ///
    /// The backend's [`TtsError`], or [`TtsError::Timeout`] when the
    /// generation outlives the configured timeout.
    pub async fn generate(
        &self,
        messages: Vec<Message>,
        batch_id: BatchId,
    ) -> Result<AudioUrl, TtsError> {
        let shared = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some((active, fut)) => {
                    log::debug!("bulk: {batch_id} joins in-flight {active}");
                    fut.clone()
                }
                None => {
                    log::info!("bulk: generating {batch_id} ({} message(s))", messages.len());
                    let fut = self.start_generation(messages, batch_id.clone());
                    *slot = Some((batch_id, fut.clone()));
                    fut
                }
            }
        };

        let result = shared.clone().await;

        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|(_, fut)| fut.ptr_eq(&shared)) {
            *slot = None;
        }
        result
    }

    /// Forget the in-flight generation.  It is cancelled once every caller
    /// awaiting it has been dropped.
    pub fn cancel_in_flight(&self) {
        if let Some((batch_id, _)) = self.in_flight.lock().take() {
            log::debug!("bulk: cancelled {batch_id}");
        }
    }

    fn start_generation(&self, messages: Vec<Message>, batch_id: BatchId) -> BulkFuture {
        let backend = Arc::clone(&self.backend);
        let timeout = self.timeout;

        async move {
            match tokio::time::timeout(timeout, backend.generate_bulk_audio(&messages, &batch_id))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    log::warn!("bulk: {batch_id} timed out after {timeout:?}");
                    Err(TtsError::Timeout)
                }
            }
        }
        .boxed()
        .shared()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
