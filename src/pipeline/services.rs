//! Capabilities the orchestrator consumes from the host environment.
//!
//! Speech engines and the chat pipeline are opaque here: each is injected as
//! a trait object with its own lifecycle, never held in global state.

use crate::config::AudioConfig;
use crate::error::Result;
use crate::pipeline::messages::SynthesizedAudio;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Source of live microphone streams.
pub trait Microphone: Send + Sync {
    /// Acquire the microphone and start streaming.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Device`](crate::error::HarkError::Device) when
    /// permission is denied or no device is available.
    fn open(&self, config: &AudioConfig) -> Result<Arc<dyn MicStream>>;
}

/// A live microphone stream owned by exactly one capture session.
pub trait MicStream: Send + Sync {
    /// Sample rate of the delivered audio in Hz.
    fn sample_rate(&self) -> u32;

    /// Copy the most recent `frame.len()` samples into `frame`.
    ///
    /// Positions not yet filled are zero. Returns `false` once the stream is
    /// no longer active.
    fn read_frame(&self, frame: &mut [f32]) -> bool;

    /// Take everything recorded since the stream opened (or the previous take).
    fn take_recording(&self) -> Vec<f32>;

    /// Release the device. Idempotent.
    fn close(&self);
}

/// Speech-to-text service.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe mono samples at `sample_rate`.
    async fn transcribe(&self, samples: Vec<f32>, sample_rate: u32) -> Result<String>;
}

/// Text-to-speech service.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render `text` to audio.
    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;
}

/// Audio output device.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `audio` to completion, or return early once `cancel` fires.
    async fn play(&self, audio: SynthesizedAudio, cancel: CancellationToken) -> Result<()>;
}

/// Delivers a user transcript to the assistant.
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Send `text`. An error leaves the transcript queued for retry.
    ///
    /// Hosts that start composing a reply should raise the generating flag
    /// before this resolves, otherwise auto-loop may restart capture first.
    async fn send(&self, text: &str) -> Result<()>;
}

/// The full set of services a conversation needs.
#[derive(Clone)]
pub struct Services {
    /// Microphone provider.
    pub microphone: Arc<dyn Microphone>,
    /// Speech-to-text.
    pub transcriber: Arc<dyn Transcriber>,
    /// Text-to-speech.
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Speaker output.
    pub sink: Arc<dyn AudioSink>,
    /// Transcript delivery.
    pub sender: Arc<dyn ReplySender>,
}
