//! Runtime events emitted by the orchestrator for UI and observability.
//!
//! Payloads stay small so events can be broadcast without slowing the
//! analysis loop. Per-frame levels are not events; read them from the
//! level `watch` channel instead.

use crate::pipeline::messages::{ReplyId, SessionId};
use crate::vad::TurnState;

/// Events that describe what the engine is doing "right now".
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// A capture session started.
    CaptureStarted { session: SessionId },
    /// A capture session ended (turn end, explicit stop, or stream loss).
    CaptureStopped { session: SessionId },
    /// The turn state of the active session changed.
    TurnState(TurnState),
    /// Silence after speech ended the user's turn.
    TurnEnded { session: SessionId },
    /// Microphone liveness (digital-silence watchdog).
    MicStatus { active: bool },
    /// A transcript was produced.
    Transcription { text: String },
    /// A transcript entered the delivery queue.
    TranscriptQueued { queue_len: usize },
    /// The oldest transcript was evicted to make room.
    TranscriptDropped { text: String },
    /// The front transcript was delivered and removed.
    TranscriptDelivered { text: String },
    /// Reply playback started.
    PlaybackStarted { reply: Option<ReplyId> },
    /// Reply playback ended.
    PlaybackEnded { interrupted: bool },
    /// A recoverable failure, already reflected in the snapshot's `last_error`.
    Error { message: String },
}
