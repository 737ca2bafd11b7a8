//! One capture session: microphone stream, sampler task and turn state machine.

use crate::audio::sampler::AudioLevelSampler;
use crate::config::{HarkConfig, MicWatchdogConfig};
use crate::pipeline::messages::{
    CapturedUtterance, LevelReading, SessionEvent, SessionEventKind, SessionId,
};
use crate::pipeline::services::MicStream;
use crate::vad::{TurnState, TurnStateMachine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An active capture session.
///
/// Owns the microphone stream exclusively; dropping or stopping the session
/// cancels the analysis task and releases the device.
pub struct CaptureSession {
    id: SessionId,
    stream: Arc<dyn MicStream>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Start analysing `stream`, reporting to `events` and `levels`.
    pub fn spawn(
        id: SessionId,
        stream: Arc<dyn MicStream>,
        config: &HarkConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
        levels: watch::Sender<LevelReading>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let sampler = AudioLevelSampler::new(
            Arc::clone(&stream),
            config.audio.frame_size,
            Duration::from_millis(config.audio.tick_ms),
            cancel.clone(),
        );
        let machine = TurnStateMachine::new(config.turn.clone());
        let task = tokio::spawn(run_analysis(
            id,
            sampler,
            machine,
            config.mic_watchdog.clone(),
            events,
            levels,
        ));
        info!(session = %id, "capture session started");
        Self {
            id,
            stream,
            cancel,
            task: Some(task),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Tear the session down and hand back what was recorded.
    pub fn finish(mut self) -> CapturedUtterance {
        self.shutdown();
        CapturedUtterance {
            samples: self.stream.take_recording(),
            sample_rate: self.stream.sample_rate(),
        }
    }

    /// Tear the session down, discarding the recording.
    pub fn discard(mut self) {
        self.shutdown();
        let _ = self.stream.take_recording();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.stream.close();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            debug!(session = %self.id, "capture session dropped while active");
            self.shutdown();
        }
    }
}

/// Sampler loop: classify each frame and forward transitions.
async fn run_analysis(
    id: SessionId,
    mut sampler: AudioLevelSampler,
    mut machine: TurnStateMachine,
    watchdog: MicWatchdogConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    levels: watch::Sender<LevelReading>,
) {
    let send = |kind: SessionEventKind| events.send(SessionEvent { session: id, kind }).is_ok();

    machine.start();
    if !send(SessionEventKind::StateChanged(TurnState::Calibrating)) {
        return;
    }

    let started = tokio::time::Instant::now();
    let watchdog_after = Duration::from_secs(watchdog.timeout_secs);
    let mut mic_active_reported = false;
    let mut mic_watchdog_reported = false;

    while let Some(energy) = sampler.next_level().await {
        if energy > watchdog.active_rms {
            if !mic_active_reported {
                info!(session = %id, "mic audio confirmed (rms={energy:.5})");
                mic_active_reported = true;
                if !send(SessionEventKind::MicStatus { active: true }) {
                    return;
                }
            }
        } else if !mic_active_reported && !mic_watchdog_reported && started.elapsed() > watchdog_after
        {
            warn!(session = %id, "mic watchdog: no audio detected after {}s", watchdog.timeout_secs);
            mic_watchdog_reported = true;
            if !send(SessionEventKind::MicStatus { active: false }) {
                return;
            }
        }

        let step = machine.process(energy, tokio::time::Instant::now().into_std());
        levels.send_replace(LevelReading {
            rms: energy,
            threshold: machine.threshold(),
            state: step.state,
        });

        if step.changed {
            debug!(session = %id, state = %step.state, rms = energy, "turn state changed");
            if !send(SessionEventKind::StateChanged(step.state)) {
                return;
            }
        }
        if step.turn_ended {
            info!(session = %id, "turn ended");
            let _ = send(SessionEventKind::TurnEnded);
            return;
        }
    }

    debug!(session = %id, "sampling stopped");
    let _ = send(SessionEventKind::StreamEnded);
}
