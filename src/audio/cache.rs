//! Per-message pre-generated speech, keyed by [`MessageId`].
//!
//! [`AudioCache::pre_generate`] spawns one synthesis job per assistant
//! message; jobs complete in any order and write their entry exactly once.
//! The scheduler reads entries with the non-blocking
//! [`AudioCache::get_cached`].  Entries that are dropped unplayed, on
//! [`reset`](AudioCache::reset) or with the cache itself, are released
//! through [`AudioBackend::revoke`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::backend::AudioBackend;
use crate::message::{Message, MessageId};
use crate::tts::{AudioUrl, SpeechSynthesizer};

/// Lifecycle of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Pending,
    Ready(AudioUrl),
    Failed,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<MessageId, CacheState>,
    /// Bumped by `reset`; jobs from an older epoch never write.
    epoch: u64,
    jobs: Vec<JoinHandle<()>>,
}

impl CacheInner {
    /// Abort outstanding jobs and take every ready URL out of the cache.
    fn clear(&mut self) -> Vec<AudioUrl> {
        for job in self.jobs.drain(..) {
            job.abort();
        }
        self.epoch += 1;
        self.entries
            .drain()
            .filter_map(|(_, state)| match state {
                CacheState::Ready(url) => Some(url),
                _ => None,
            })
            .collect()
    }
}

pub struct AudioCache {
    synth: Arc<dyn SpeechSynthesizer>,
    /// Releases tracks the cache gives up on.
    releaser: Arc<dyn AudioBackend>,
    inner: Arc<Mutex<CacheInner>>,
}

impl AudioCache {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, releaser: Arc<dyn AudioBackend>) -> Self {
        Self {
            synth,
            releaser,
            inner: Arc::new(Mutex::new(CacheInner::default())),
        }
    }

    /// Start synthesis for every speakable message that has no entry yet.
    ///
    /// Returns the number of jobs started.  Must be called from within a
    /// tokio runtime.
    pub fn pre_generate(&self, messages: &[Message]) -> usize {
        let mut inner = self.inner.lock();
        inner.jobs.retain(|job| !job.is_finished());

        let epoch = inner.epoch;
        let mut started = 0;

        for msg in messages.iter().filter(|m| m.is_speakable()) {
            if inner.entries.contains_key(&msg.id) {
                continue;
            }
            inner.entries.insert(msg.id.clone(), CacheState::Pending);

            let synth = Arc::clone(&self.synth);
            let releaser = Arc::clone(&self.releaser);
            let shared = Arc::clone(&self.inner);
            let id = msg.id.clone();
            let text = msg.text.clone();

            inner.jobs.push(tokio::spawn(async move {
                let result = synth.synthesize(&text).await;

                let mut inner = shared.lock();
                let wanted = inner.epoch == epoch
                    && inner.entries.get(&id) == Some(&CacheState::Pending);
                if !wanted {
                    drop(inner);
                    if let Ok(url) = result {
                        log::debug!("cache: {id} finished after reset, releasing");
                        releaser.revoke(&url);
                    }
                    return;
                }

                let state = match result {
                    Ok(url) => {
                        log::debug!("cache: {id} ready");
                        CacheState::Ready(url)
                    }
                    Err(e) => {
                        log::warn!("cache: synthesis for {id} failed: {e}");
                        CacheState::Failed
                    }
                };
                inner.entries.insert(id, state);
            }));
            started += 1;
        }

        if started > 0 {
            log::debug!("cache: started {started} synthesis job(s)");
        }
        started
    }

    /// The ready URL for `id`, if synthesis has finished successfully.
    pub fn get_cached(&self, id: &MessageId) -> Option<AudioUrl> {
        match self.inner.lock().entries.get(id) {
            Some(CacheState::Ready(url)) => Some(url.clone()),
            _ => None,
        }
    }

    pub fn state(&self, id: &MessageId) -> Option<CacheState> {
        self.inner.lock().entries.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort outstanding jobs, release ready tracks and forget every entry.
    pub fn reset(&self) {
        let released = self.inner.lock().clear();
        self.release(released);
    }

    fn release(&self, urls: Vec<AudioUrl>) {
        if !urls.is_empty() {
            log::debug!("cache: releasing {} unplayed track(s)", urls.len());
        }
        for url in &urls {
            self.releaser.revoke(url);
        }
    }
}

impl Drop for AudioCache {
    fn drop(&mut self) {
        let released = self.inner.lock().clear();
        self.release(released);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::audio::MockAudioBackend;
    use crate::message::MessageEvent;
    use crate::tts::MockSynthesizer;

    fn msg(event: MessageEvent, seq: u64) -> Message {
        Message::from_event(event, seq)
    }

    fn releaser() -> Arc<MockAudioBackend> {
        Arc::new(MockAudioBackend::new(Duration::from_secs(1)))
    }

    fn cache_with(synth: MockSynthesizer) -> (AudioCache, Arc<MockAudioBackend>) {
        let released = releaser();
        let cache = AudioCache::new(Arc::new(synth), Arc::clone(&released) as Arc<dyn AudioBackend>);
        (cache, released)
    }

    #[tokio::test(start_paused = true)]
    async fn pre_generates_only_speakable_messages() {
        let synth = Arc::new(MockSynthesizer::ok(Duration::from_millis(100)));
        let cache = AudioCache::new(Arc::clone(&synth) as Arc<dyn SpeechSynthesizer>, releaser());

        let a = msg(MessageEvent::assistant("Hi there."), 0);
        let u = msg(MessageEvent::user("ok"), 1);
        let blank = msg(MessageEvent::assistant("   "), 2);

        assert_eq!(cache.pre_generate(&[a.clone(), u.clone(), blank]), 1);
        assert_eq!(cache.state(&a.id), Some(CacheState::Pending));
        assert_eq!(cache.get_cached(&a.id), None);
        assert_eq!(cache.state(&u.id), None);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get_cached(&a.id), Some(AudioUrl::new("mock://Hi there.")));
    }

    #[tokio::test(start_paused = true)]
    async fn each_message_is_synthesized_once() {
        let synth = Arc::new(MockSynthesizer::ok(Duration::from_millis(10)));
        let cache = AudioCache::new(Arc::clone(&synth) as Arc<dyn SpeechSynthesizer>, releaser());
        let a = msg(MessageEvent::assistant("Hello"), 0);

        assert_eq!(cache.pre_generate(std::slice::from_ref(&a)), 1);
        assert_eq!(cache.pre_generate(std::slice::from_ref(&a)), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.pre_generate(std::slice::from_ref(&a)), 0);

        assert_eq!(synth.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_synthesis_marks_entry_failed() {
        let (cache, _) = cache_with(MockSynthesizer::failing());
        let a = msg(MessageEvent::assistant("Hello"), 0);

        cache.pre_generate(std::slice::from_ref(&a));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(cache.state(&a.id), Some(CacheState::Failed));
        assert_eq!(cache.get_cached(&a.id), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_in_flight_jobs() {
        let (cache, released) = cache_with(MockSynthesizer::ok(Duration::from_secs(1)));
        let a = msg(MessageEvent::assistant("Hello"), 0);

        cache.pre_generate(std::slice::from_ref(&a));
        cache.reset();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(cache.is_empty());
        assert_eq!(cache.get_cached(&a.id), None);
        assert!(released.revoked.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_releases_unplayed_tracks() {
        let (cache, released) = cache_with(MockSynthesizer::ok(Duration::from_millis(10)));
        let a = msg(MessageEvent::assistant("Hello"), 0);
        let b = msg(MessageEvent::assistant("Bye"), 1);

        cache.pre_generate(&[a, b]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.reset();

        let mut revoked = released.revoked.lock().clone();
        revoked.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        assert_eq!(revoked, [AudioUrl::new("mock://Bye"), AudioUrl::new("mock://Hello")]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_cache_releases_ready_tracks() {
        let (cache, released) = cache_with(MockSynthesizer::ok(Duration::from_millis(10)));
        cache.pre_generate(&[msg(MessageEvent::assistant("Hello"), 0)]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        drop(cache);
        assert_eq!(released.revoked.lock().as_slice(), [AudioUrl::new("mock://Hello")]);
    }
}
