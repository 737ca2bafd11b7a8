//! Hark: voice turn-taking for spoken conversations with an assistant.
//!
//! The engine listens to the microphone, decides when the user has finished
//! speaking, and hands the captured turn to a transcriber. Transcripts are
//! queued for delivery to the chat pipeline; replies can be read aloud and
//! listening restarts automatically in hands-free mode.
//!
//! # Architecture
//!
//! - **Audio**: `cpal` capture and playback, fixed-cadence RMS sampling
//! - **VAD**: noise-floor calibration and the per-frame turn state machine
//! - **Pipeline**: capture sessions, the transcript queue, and the
//!   [`ConversationOrchestrator`] actor driven through a [`ConversationHandle`]
//!
//! Speech engines and the chat pipeline are injected through the traits in
//! [`pipeline::services`].

pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod vad;

pub use config::HarkConfig;
pub use error::{HarkError, Result};
pub use pipeline::coordinator::{ConversationHandle, ConversationOrchestrator, ConversationSnapshot};
pub use pipeline::services::Services;
pub use runtime::RuntimeEvent;
pub use vad::TurnState;
