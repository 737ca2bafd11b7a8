//! Configuration types for the turn-taking engine.

use crate::error::{HarkError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarkConfig {
    /// Endpointing thresholds and calibration length.
    pub turn: TurnDetectionConfig,
    /// Microphone and level-sampling settings.
    pub audio: AudioConfig,
    /// Pending transcript buffer settings.
    pub queue: QueueConfig,
    /// Auto-loop / auto-read-aloud behaviour.
    pub conversation: ConversationConfig,
    /// Silent-microphone detection.
    pub mic_watchdog: MicWatchdogConfig,
}

/// Turn detection (endpointing) configuration.
///
/// Immutable for the duration of a capture session. Every field must be
/// strictly positive; see [`TurnDetectionConfig::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetectionConfig {
    /// Lower clamp for the dynamic speech threshold (RMS, samples in \[-1, 1\]).
    ///
    /// Keeps near-silent rooms from producing a near-zero threshold that
    /// fires on HVAC or background hiss.
    pub base_threshold: f64,
    /// Multiplier applied to the calibrated noise floor.
    pub threshold_multiplier: f64,
    /// Continuous silence required to end a turn, in ms.
    pub silence_ms: u32,
    /// Time since the last voiced frame required before a turn may end, in ms.
    pub min_speech_ms: u32,
    /// Number of frames used to estimate the noise floor (90 ≈ 1.5 s at 60 Hz).
    pub calibration_frames: u32,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.01,
            threshold_multiplier: 3.5,
            silence_ms: 1200,
            min_speech_ms: 900,
            calibration_frames: 90,
        }
    }
}

impl TurnDetectionConfig {
    /// Check that every field is strictly positive and finite.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(self.base_threshold.is_finite() && self.base_threshold > 0.0) {
            return Err(HarkError::Config(format!(
                "turn.base_threshold must be > 0 (got {})",
                self.base_threshold
            )));
        }
        if !(self.threshold_multiplier.is_finite() && self.threshold_multiplier > 0.0) {
            return Err(HarkError::Config(format!(
                "turn.threshold_multiplier must be > 0 (got {})",
                self.threshold_multiplier
            )));
        }
        if self.silence_ms == 0 {
            return Err(HarkError::Config("turn.silence_ms must be > 0".into()));
        }
        if self.min_speech_ms == 0 {
            return Err(HarkError::Config("turn.min_speech_ms must be > 0".into()));
        }
        if self.calibration_frames == 0 {
            return Err(HarkError::Config(
                "turn.calibration_frames must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Microphone capture and level sampling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name for reply playback (None = system default).
    pub output_device: Option<String>,
    /// Samples per analysed frame.
    pub frame_size: usize,
    /// Sampling cadence in ms (16 ≈ display refresh rate).
    pub tick_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            frame_size: 2048,
            tick_ms: 16,
        }
    }
}

/// Pending transcript queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of undelivered transcripts kept (oldest dropped first).
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 6 }
    }
}

/// Hands-free conversation behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Restart listening automatically once the assistant is idle.
    pub auto_loop: bool,
    /// Speak each completed assistant reply once.
    pub auto_read_aloud: bool,
    /// Quiet period that coalesces streaming reply updates before speaking, in ms.
    pub read_aloud_debounce_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            auto_loop: false,
            auto_read_aloud: false,
            read_aloud_debounce_ms: 150,
        }
    }
}

/// Detection of microphones that deliver only digital silence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicWatchdogConfig {
    /// RMS above which the microphone counts as delivering real audio.
    ///
    /// Keep this low so room noise counts as active, while permission-denied
    /// all-zero streams stay below it.
    pub active_rms: f64,
    /// Seconds of digital silence before the microphone is reported inactive.
    pub timeout_secs: u64,
}

impl Default for MicWatchdogConfig {
    fn default() -> Self {
        Self {
            active_rms: 0.000_01,
            timeout_secs: 5,
        }
    }
}

impl HarkConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| HarkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Serialize to pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HarkError::Config(e.to_string()))
    }

    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.turn.validate()?;
        if self.audio.frame_size == 0 {
            return Err(HarkError::Config("audio.frame_size must be > 0".into()));
        }
        if self.audio.tick_ms == 0 {
            return Err(HarkError::Config("audio.tick_ms must be > 0".into()));
        }
        if self.queue.capacity == 0 {
            return Err(HarkError::Config("queue.capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/hark/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::env::temp_dir().join("hark-config"))
            .join("hark")
            .join("config.toml")
    }
}
