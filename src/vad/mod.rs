//! Voice activity detection and endpointing using energy-based analysis.
//!
//! Each capture session first calibrates an ambient noise floor, then
//! classifies frame RMS against `max(base, floor * multiplier)`. A turn ends
//! once speech has been heard and the following silence has lasted long
//! enough; see [`TurnStateMachine`].

pub mod calibration;
pub mod turn;

pub use calibration::NoiseFloorCalibrator;
pub use turn::{SpeechTimers, TurnState, TurnStateMachine, TurnStep};
