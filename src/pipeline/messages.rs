//! Message types passed between the sampler, the orchestrator and its services.

use crate::vad::TurnState;
use std::fmt;

/// Identifies one capture session. Monotonically increasing per orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Latest frame energy, published for level meters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelReading {
    /// RMS energy of the most recent frame.
    pub rms: f64,
    /// Dynamic speech threshold (None until calibration completes).
    pub threshold: Option<f64>,
    /// Turn state after classifying the frame.
    pub state: TurnState,
}

/// Event emitted by a session's sampler task.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    /// Session that produced the event.
    pub session: SessionId,
    /// What happened.
    pub kind: SessionEventKind,
}

/// Kinds of session events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEventKind {
    /// The turn state machine transitioned.
    StateChanged(TurnState),
    /// Silence after speech ended the turn. Sent at most once per session.
    TurnEnded,
    /// The microphone stream stopped delivering frames.
    StreamEnded,
    /// Microphone delivers real audio (`true`) or only digital silence (`false`).
    MicStatus {
        /// Whether non-silent audio was observed.
        active: bool,
    },
}

/// Stable identifier of an assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyId(pub String);

impl From<&str> for ReplyId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for ReplyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An assistant reply as observed by the orchestrator.
///
/// The same `id` may be observed repeatedly while the reply streams in; the
/// text of the latest observation wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    /// Stable identifier.
    pub id: ReplyId,
    /// Reply text so far.
    pub text: String,
}

impl AssistantReply {
    /// Convenience constructor.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: ReplyId(id.into()),
            text: text.into(),
        }
    }
}

/// Audio captured during one turn, ready for transcription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedUtterance {
    /// Mono f32 samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl CapturedUtterance {
    /// Duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Synthesized audio from TTS, ready for playback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesizedAudio {
    /// Mono f32 samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}
