//! Ambient noise floor estimation.

/// Running mean of frame energy over the calibration window.
///
/// Reset at the start of every capture session; the estimate never carries
/// over between sessions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoiseFloorCalibrator {
    noise_floor: f64,
    frames_seen: u32,
}

impl NoiseFloorCalibrator {
    /// Create an empty calibrator (`floor = 0`, `n = 0`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one frame's RMS into the running mean.
    ///
    /// `floor_{n+1} = (floor_n * n + rms) / (n + 1)`
    pub fn observe(&mut self, rms: f64) {
        let n = f64::from(self.frames_seen);
        self.noise_floor = (self.noise_floor * n + rms) / (n + 1.0);
        self.frames_seen = self.frames_seen.saturating_add(1);
    }

    /// Current noise floor estimate.
    #[must_use]
    pub fn noise_floor(&self) -> f64 {
        self.noise_floor
    }

    /// Number of frames folded in so far.
    #[must_use]
    pub fn frames_seen(&self) -> u32 {
        self.frames_seen
    }

    /// Whether `target` frames have been observed.
    #[must_use]
    pub fn is_complete(&self, target: u32) -> bool {
        self.frames_seen >= target
    }

    /// Speech threshold derived from this floor: `max(base, floor * multiplier)`.
    #[must_use]
    pub fn threshold(&self, base_threshold: f64, multiplier: f64) -> f64 {
        base_threshold.max(self.noise_floor * multiplier)
    }

    /// Discard the estimate.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
