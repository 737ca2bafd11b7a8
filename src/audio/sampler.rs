//! Fixed-cadence frame sampling of a live microphone stream.

use crate::audio::level::rms;
use crate::pipeline::services::MicStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Pulls the most recent `frame_size` samples from a stream once per tick and
/// reduces each frame to its RMS energy.
///
/// The sequence is lazy (nothing is read until [`next_level`](Self::next_level)
/// is awaited) and ends without error when the stream goes inactive or the
/// token is cancelled. A new sampler restarts the sequence.
pub struct AudioLevelSampler {
    stream: Arc<dyn MicStream>,
    frame: Vec<f32>,
    interval: Interval,
    cancel: CancellationToken,
    finished: bool,
}

impl AudioLevelSampler {
    /// Create a sampler reading `frame_size` samples every `tick`.
    pub fn new(
        stream: Arc<dyn MicStream>,
        frame_size: usize,
        tick: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let mut interval = tokio::time::interval(tick.max(Duration::from_millis(1)));
        // A late analysis tick should not be followed by a burst of catch-up frames.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            stream,
            frame: vec![0.0; frame_size.max(1)],
            interval,
            cancel,
            finished: false,
        }
    }

    /// Wait for the next tick and return the frame's RMS.
    ///
    /// Returns `None` once the stream is inactive or sampling was cancelled;
    /// every later call also returns `None`.
    pub async fn next_level(&mut self) -> Option<f64> {
        if self.finished {
            return None;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.finished = true;
                return None;
            }
            _ = self.interval.tick() => {}
        }
        if !self.stream.read_frame(&mut self.frame) {
            self.finished = true;
            return None;
        }
        Some(rms(&self.frame))
    }

    /// Whether the sequence has terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
