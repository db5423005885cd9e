//! `HttpSpeechBackend`: OpenAI-compatible `/v1/audio/speech` client.
//!
//! Implements both [`SpeechSynthesizer`] (one message) and
//! [`BulkAudioBackend`] (many messages joined into one input).  The raw PCM
//! response is written into the audio cache directory and handed back as a
//! `file://` [`AudioUrl`].  All connection details come from [`TtsConfig`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::config::TtsConfig;
use crate::message::Message;

use super::service::{AudioUrl, BatchId, BulkAudioBackend, SpeechSynthesizer, TtsError};

/// Calls an OpenAI-compatible speech endpoint.
///
/// Works with OpenAI, Kokoro-FastAPI, openedai-speech and any server that
/// accepts `{model, voice, input, response_format: "pcm"}`.
pub struct HttpSpeechBackend {
    client: reqwest::Client,
    config: TtsConfig,
    output_dir: PathBuf,
    counter: AtomicU64,
}

impl HttpSpeechBackend {
    /// Build a backend writing synthesized audio into `output_dir`.
    ///
    /// The HTTP client carries the per-request timeout from
    /// `config.timeout_secs`; a default client is used if the builder fails.
    pub fn from_config(config: &TtsConfig, output_dir: impl Into<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
            output_dir: output_dir.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Request body for `input`.
    fn request_body(&self, input: &str) -> serde_json::Value {
        serde_json::json!({
            "model":           self.config.model,
            "voice":           self.config.voice,
            "input":           input,
            "response_format": "pcm"
        })
    }

    async fn request(&self, input: &str, file_stem: &str) -> Result<AudioUrl, TtsError> {
        let url = format!(
            "{}/v1/audio/speech",
            self.config.base_url.trim_end_matches('/')
        );

        let mut req = self.client.post(&url).json(&self.request_body(input));

        // Attach Authorization header only when api_key is a non-empty string.
        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TtsError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(TtsError::EmptyAudio);
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self.output_dir.join(format!("{file_stem}-{n}.pcm"));
        tokio::fs::write(&path, &bytes).await?;

        log::debug!("tts: wrote {} bytes to {}", bytes.len(), path.display());
        Ok(AudioUrl::from_path(path))
    }
}

/// Text sent for a bulk batch: non-empty message texts separated by blank
/// lines so the synthesizer pauses between them.
pub fn bulk_input(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| m.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechBackend {
    async fn synthesize(&self, text: &str) -> Result<AudioUrl, TtsError> {
        self.request(text, "single").await
    }
}

#[async_trait]
impl BulkAudioBackend for HttpSpeechBackend {
    async fn generate_bulk_audio(
        &self,
        messages: &[Message],
        batch_id: &BatchId,
    ) -> Result<AudioUrl, TtsError> {
        let input = bulk_input(messages);
        if input.is_empty() {
            return Err(TtsError::EmptyAudio);
        }
        self.request(&input, &format!("bulk-{batch_id}")).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageEvent;

    fn backend() -> HttpSpeechBackend {
        HttpSpeechBackend::from_config(&TtsConfig::default(), std::env::temp_dir())
    }

    #[test]
    fn from_config_builds_without_panic() {
        let _ = backend();
    }

    #[test]
    fn request_body_asks_for_raw_pcm() {
        let body = backend().request_body("hello");
        assert_eq!(body["response_format"], "pcm");
        assert_eq!(body["input"], "hello");
        assert_eq!(body["voice"], "alloy");
    }

    #[test]
    fn bulk_input_skips_blank_messages() {
        let msgs: Vec<Message> = ["First.", "  ", "Second."]
            .iter()
            .enumerate()
            .map(|(i, t)| Message::from_event(MessageEvent::assistant(*t), i as u64))
            .collect();
        assert_eq!(bulk_input(&msgs), "First.\n\nSecond.");
    }

    #[tokio::test]
    async fn empty_bulk_batch_is_rejected_locally() {
        let err = backend()
            .generate_bulk_audio(&[], &BatchId::new("b0"))
            .await
            .unwrap_err();
        assert_eq!(err, TtsError::EmptyAudio);
    }

    /// `HttpSpeechBackend` is usable as both trait objects.
    #[test]
    fn backend_is_object_safe() {
        let _: Box<dyn SpeechSynthesizer> = Box::new(backend());
        let _: Box<dyn BulkAudioBackend> = Box::new(backend());
    }
}
