//! Turn state machine: calibration, speech onset and silence endpointing.

use super::calibration::NoiseFloorCalibrator;
use crate::config::TurnDetectionConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Conversational state of the active capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No capture session.
    #[default]
    Idle,
    /// Measuring the ambient noise floor.
    Calibrating,
    /// Waiting for the user to start speaking.
    Monitoring,
    /// User is speaking (including short pauses not yet long enough to end the turn).
    Listening,
    /// Turn has ended; the session is being torn down.
    SilenceHold,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Calibrating => "calibrating",
            Self::Monitoring => "monitoring",
            Self::Listening => "listening",
            Self::SilenceHold => "silence_hold",
        };
        f.write_str(s)
    }
}

/// Hysteresis timers driven by the classification step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeechTimers {
    /// Time of the most recent voiced frame.
    pub last_voice_at: Option<Instant>,
    /// Start of the current run of unvoiced frames, if any.
    pub silence_started_at: Option<Instant>,
    /// Whether any voiced frame has been seen this session.
    pub has_detected_speech: bool,
}

/// Result of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnStep {
    /// State after the frame.
    pub state: TurnState,
    /// Whether the frame caused a state transition.
    pub changed: bool,
    /// Set exactly once per session, on the frame that ends the turn.
    pub turn_ended: bool,
}

/// Classifies frame energy into [`TurnState`]s and decides when a turn ends.
///
/// One instance belongs to one capture session at a time. [`start`](Self::start)
/// and [`stop`](Self::stop) wipe all calibration and timer state so nothing
/// leaks from one session into the next.
#[derive(Debug, Clone)]
pub struct TurnStateMachine {
    config: TurnDetectionConfig,
    state: TurnState,
    calibrator: NoiseFloorCalibrator,
    timers: SpeechTimers,
    threshold: Option<f64>,
}

impl TurnStateMachine {
    /// Create an idle machine.
    #[must_use]
    pub fn new(config: TurnDetectionConfig) -> Self {
        Self {
            config,
            state: TurnState::Idle,
            calibrator: NoiseFloorCalibrator::new(),
            timers: SpeechTimers::default(),
            threshold: None,
        }
    }

    /// Begin a session: full reset, then `Idle → Calibrating`.
    pub fn start(&mut self) {
        self.reset();
        self.state = TurnState::Calibrating;
    }

    /// End the session: full reset to `Idle`.
    pub fn stop(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.state = TurnState::Idle;
        self.calibrator.reset();
        self.timers = SpeechTimers::default();
        self.threshold = None;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Hysteresis timers for the current session.
    #[must_use]
    pub fn timers(&self) -> SpeechTimers {
        self.timers
    }

    /// Noise floor estimate (running mean while calibrating, final afterwards).
    #[must_use]
    pub fn noise_floor(&self) -> f64 {
        self.calibrator.noise_floor()
    }

    /// Dynamic speech threshold, available once calibration has completed.
    #[must_use]
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &TurnDetectionConfig {
        &self.config
    }

    /// Classify one frame of energy `rms` observed at `now`.
    ///
    /// Frames delivered while `Idle` or after the turn has ended are ignored.
    pub fn process(&mut self, rms: f64, now: Instant) -> TurnStep {
        let before = self.state;
        let mut turn_ended = false;

        match self.state {
            TurnState::Idle | TurnState::SilenceHold => {}
            TurnState::Calibrating => {
                self.calibrator.observe(rms);
                if self.calibrator.is_complete(self.config.calibration_frames) {
                    self.threshold = Some(self.calibrator.threshold(
                        self.config.base_threshold,
                        self.config.threshold_multiplier,
                    ));
                    self.state = TurnState::Monitoring;
                }
            }
            TurnState::Monitoring => {
                if self.is_voice(rms) {
                    self.timers.has_detected_speech = true;
                    self.timers.last_voice_at = Some(now);
                    self.timers.silence_started_at = None;
                    self.state = TurnState::Listening;
                }
            }
            TurnState::Listening => {
                if self.is_voice(rms) {
                    self.timers.last_voice_at = Some(now);
                    self.timers.silence_started_at = None;
                } else {
                    let silence_started = *self.timers.silence_started_at.get_or_insert(now);
                    if self.should_end_turn(silence_started, now) {
                        self.state = TurnState::SilenceHold;
                        turn_ended = true;
                    }
                }
            }
        }

        TurnStep {
            state: self.state,
            changed: self.state != before,
            turn_ended,
        }
    }

    fn is_voice(&self, rms: f64) -> bool {
        self.threshold.is_some_and(|t| rms >= t)
    }

    fn should_end_turn(&self, silence_started: Instant, now: Instant) -> bool {
        if !self.timers.has_detected_speech {
            return false;
        }
        let Some(last_voice) = self.timers.last_voice_at else {
            return false;
        };
        let since_voice = now.saturating_duration_since(last_voice);
        let silence = now.saturating_duration_since(silence_started);
        since_voice > ms(self.config.min_speech_ms) && silence > ms(self.config.silence_ms)
    }
}

fn ms(value: u32) -> Duration {
    Duration::from_millis(u64::from(value))
}
