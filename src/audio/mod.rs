//! Microphone capture, level analysis and playback via cpal.

pub mod capture;
pub mod level;
pub mod playback;
pub mod sampler;
