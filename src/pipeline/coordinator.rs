//! Conversation orchestrator: arbitrates capture and playback, queues
//! transcripts for delivery, and drives hands-free auto-loop / read-aloud.
//!
//! The orchestrator is a single tokio task that owns all conversation state.
//! Controls arrive as [`Command`]s from cloned [`ConversationHandle`]s; session
//! analysis, transcription, playback and delivery report back as messages.
//! Every asynchronous operation carries an id so completions that arrive after
//! a stop or restart are recognised as stale and dropped.

use crate::config::HarkConfig;
use crate::error::{HarkError, Result};
use crate::pipeline::messages::{
    AssistantReply, LevelReading, ReplyId, SessionEvent, SessionEventKind, SessionId,
};
use crate::pipeline::queue::{PushOutcome, TranscriptQueue};
use crate::pipeline::services::Services;
use crate::pipeline::session::CaptureSession;
use crate::runtime::RuntimeEvent;
use crate::vad::TurnState;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Controls accepted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Begin a capture session if preconditions allow.
    StartCapture,
    /// Tear down the capture session, discarding its audio.
    StopCapture,
    /// End the current turn now and transcribe what was captured.
    FinishTurn,
    /// Speak arbitrary text.
    Speak(String),
    /// Cancel playback.
    StopSpeaking,
    /// Toggle automatic capture restart.
    SetAutoLoop(bool),
    /// Toggle automatic reply playback.
    SetAutoReadAloud(bool),
    /// Drop all undelivered transcripts.
    ClearQueue,
    /// Deliver now: retry the queue front, or re-queue the last transcript.
    SendLatest,
    /// An assistant reply was created or updated.
    ObserveReply(AssistantReply),
    /// Stop everything and exit the run loop.
    Shutdown,
}

/// Point-in-time view of the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationSnapshot {
    /// Turn state of the active session (`Idle` without one).
    pub turn_state: TurnState,
    /// A capture session is active.
    pub is_recording: bool,
    /// A transcription is in flight.
    pub is_transcribing: bool,
    /// Playback (synthesis or output) is in flight.
    pub is_speaking: bool,
    /// The assistant is composing a reply (mirrors the external flag).
    pub is_generating: bool,
    /// A transcript delivery is in flight.
    pub is_delivering: bool,
    /// Most recent non-empty transcript.
    pub last_transcript: Option<String>,
    /// Most recent failure message.
    pub last_error: Option<String>,
    /// Undelivered transcripts.
    pub queue_len: usize,
    /// Auto-loop toggle.
    pub auto_loop: bool,
    /// Auto-read-aloud toggle.
    pub auto_read_aloud: bool,
    /// Identifier of the last reply spoken automatically.
    pub last_spoken_reply: Option<ReplyId>,
    /// Microphone liveness from the current session's watchdog.
    pub mic_active: Option<bool>,
}

/// Cloneable control surface for a running orchestrator.
#[derive(Clone)]
pub struct ConversationHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<ConversationSnapshot>,
    levels_rx: watch::Receiver<LevelReading>,
}

impl ConversationHandle {
    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| HarkError::Channel("conversation orchestrator has stopped".into()))
    }

    /// Start listening. No-op while recording, transcribing or generating.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn start_capture(&self) -> Result<()> {
        self.send(Command::StartCapture)
    }

    /// Stop listening and discard the current turn. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn stop_capture(&self) -> Result<()> {
        self.send(Command::StopCapture)
    }

    /// End the current turn immediately and transcribe it.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn finish_turn(&self) -> Result<()> {
        self.send(Command::FinishTurn)
    }

    /// Speak `text`. Blank text, or any text while capture is active, is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn speak(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::Speak(text.into()))
    }

    /// Cancel playback. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn stop_speaking(&self) -> Result<()> {
        self.send(Command::StopSpeaking)
    }

    /// Enable or disable automatic capture restart.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn set_auto_loop(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetAutoLoop(enabled))
    }

    /// Enable or disable automatic reply playback.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn set_auto_read_aloud(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetAutoReadAloud(enabled))
    }

    /// Drop all undelivered transcripts.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn clear_queue(&self) -> Result<()> {
        self.send(Command::ClearQueue)
    }

    /// Attempt delivery now.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn send_latest(&self) -> Result<()> {
        self.send(Command::SendLatest)
    }

    /// Report a new or updated assistant reply.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn observe_reply(&self, reply: AssistantReply) -> Result<()> {
        self.send(Command::ObserveReply(reply))
    }

    /// Stop any capture/playback and end the run loop.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Channel`] if the orchestrator is no longer running.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver notified on every snapshot change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Receiver of per-frame level readings for meters.
    #[must_use]
    pub fn levels(&self) -> watch::Receiver<LevelReading> {
        self.levels_rx.clone()
    }
}

/// Completion of a spawned asynchronous operation.
enum Completion {
    Transcribed { op: u64, result: Result<String> },
    SpeechFinished { op: u64, result: Result<()> },
    Delivered { seq: u64, text: String, result: Result<()> },
}

/// Owns conversation state and runs the control loop.
pub struct ConversationOrchestrator {
    config: HarkConfig,
    services: Services,
    generating_rx: watch::Receiver<bool>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<ConversationSnapshot>,
    levels_tx: watch::Sender<LevelReading>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    cancel: CancellationToken,
}

impl ConversationOrchestrator {
    /// Create an orchestrator.
    ///
    /// `generating` mirrors the externally owned "assistant is composing a
    /// reply" flag. If its sender is dropped the last value is kept.
    pub fn new(config: HarkConfig, services: Services, generating: watch::Receiver<bool>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let initial = ConversationSnapshot {
            auto_loop: config.conversation.auto_loop,
            auto_read_aloud: config.conversation.auto_read_aloud,
            is_generating: *generating.borrow(),
            ..ConversationSnapshot::default()
        };
        let (snapshot_tx, _) = watch::channel(initial);
        let (levels_tx, _) = watch::channel(LevelReading::default());
        Self {
            config,
            services,
            generating_rx: generating,
            cmd_tx,
            cmd_rx,
            snapshot_tx,
            levels_tx,
            runtime_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a runtime event broadcaster for UI/observability.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// Control surface for this orchestrator.
    #[must_use]
    pub fn handle(&self) -> ConversationHandle {
        ConversationHandle {
            cmd_tx: self.cmd_tx.clone(),
            snapshot_rx: self.snapshot_tx.subscribe(),
            levels_rx: self.levels_tx.subscribe(),
        }
    }

    /// Token that stops the run loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until shut down or cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Config`] if the configuration is invalid.
    pub async fn run(self) -> Result<()> {
        self.config.validate()?;

        let Self {
            config,
            services,
            mut generating_rx,
            cmd_tx,
            mut cmd_rx,
            snapshot_tx,
            levels_tx,
            runtime_tx,
            cancel,
        } = self;
        // Keep the command channel open while handles come and go.
        let _cmd_tx = cmd_tx;

        let (session_tx, mut session_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<Completion>();
        let generating = *generating_rx.borrow_and_update();
        let mut generating_open = true;

        let mut engine = Engine {
            queue: TranscriptQueue::new(config.queue.capacity),
            auto_loop: config.conversation.auto_loop,
            auto_read_aloud: config.conversation.auto_read_aloud,
            read_aloud_debounce: Duration::from_millis(config.conversation.read_aloud_debounce_ms),
            config,
            services,
            generating,
            generating_live: generating_rx.clone(),
            session: None,
            next_session: 0,
            turn_state: TurnState::Idle,
            transcribing: None,
            playback: None,
            next_op: 0,
            delivering: None,
            auto_loop_paused: false,
            device_failed: false,
            last_spoken_reply: None,
            pending_reply: None,
            read_aloud_at: None,
            last_transcript: None,
            last_error: None,
            mic_active: None,
            session_tx,
            completion_tx,
            levels_tx,
            snapshot_tx,
            runtime_tx,
            ops_cancel: cancel.child_token(),
        };

        info!("conversation orchestrator running");
        engine.reconcile();

        loop {
            let read_aloud_at = engine.read_aloud_at;
            tokio::select! {
                () = cancel.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => engine.handle_command(cmd),
                },
                Some(event) = session_rx.recv() => engine.on_session_event(event),
                Some(done) = completion_rx.recv() => engine.on_completion(done),
                changed = generating_rx.changed(), if generating_open => {
                    if changed.is_ok() {
                        let value = *generating_rx.borrow_and_update();
                        engine.set_generating(value);
                    } else {
                        debug!("generating flag sender dropped; keeping last value");
                        generating_open = false;
                    }
                }
                () = sleep_until_opt(read_aloud_at), if read_aloud_at.is_some() => {
                    engine.on_read_aloud_due();
                }
            }
            // A reply sender typically raises the flag before its send resolves;
            // fold that in before the auto policies run.
            if generating_open && matches!(generating_rx.has_changed(), Ok(true)) {
                let value = *generating_rx.borrow_and_update();
                engine.set_generating(value);
            }
            engine.reconcile();
        }

        engine.teardown();
        info!("conversation orchestrator stopped");
        Ok(())
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

struct Playback {
    op: u64,
    cancel: CancellationToken,
}

struct Engine {
    config: HarkConfig,
    services: Services,
    generating: bool,
    /// Live view of the host's flag; a sender may raise it before the run
    /// loop has folded the change in.
    generating_live: watch::Receiver<bool>,

    session: Option<CaptureSession>,
    next_session: u64,
    turn_state: TurnState,
    transcribing: Option<u64>,
    playback: Option<Playback>,
    next_op: u64,

    queue: TranscriptQueue,
    /// Single-flight guard: sequence number of the transcript being delivered.
    delivering: Option<u64>,

    auto_loop: bool,
    /// Set by an explicit stop or a lost stream; cleared by an explicit start.
    auto_loop_paused: bool,
    /// Set when the microphone could not be opened; suppresses auto-restart.
    device_failed: bool,
    auto_read_aloud: bool,
    read_aloud_debounce: Duration,
    last_spoken_reply: Option<ReplyId>,
    pending_reply: Option<AssistantReply>,
    read_aloud_at: Option<Instant>,

    last_transcript: Option<String>,
    last_error: Option<String>,
    mic_active: Option<bool>,

    session_tx: mpsc::UnboundedSender<SessionEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    levels_tx: watch::Sender<LevelReading>,
    snapshot_tx: watch::Sender<ConversationSnapshot>,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    ops_cancel: CancellationToken,
}

impl Engine {
    fn handle_command(&mut self, cmd: Command) {
        debug!(?cmd, "command");
        match cmd {
            Command::StartCapture => {
                self.auto_loop_paused = false;
                self.device_failed = false;
                // The user has moved on; an unspoken reply would now be stale.
                self.pending_reply = None;
                self.read_aloud_at = None;
                self.start_capture();
            }
            Command::StopCapture => {
                self.auto_loop_paused = true;
                self.stop_capture();
            }
            Command::FinishTurn => self.end_turn(),
            Command::Speak(text) => self.speak(text, None),
            Command::StopSpeaking => self.stop_speaking(),
            Command::SetAutoLoop(enabled) => {
                self.auto_loop = enabled;
                if enabled {
                    self.auto_loop_paused = false;
                    self.device_failed = false;
                }
            }
            Command::SetAutoReadAloud(enabled) => {
                self.auto_read_aloud = enabled;
                if !enabled {
                    self.read_aloud_at = None;
                }
            }
            Command::ClearQueue => {
                let cleared = self.queue.clear();
                info!(cleared, "transcript queue cleared");
            }
            Command::SendLatest => {
                if self.queue.is_empty()
                    && let Some(text) = self.last_transcript.clone()
                {
                    self.enqueue(text);
                }
                self.try_drain();
            }
            Command::ObserveReply(reply) => self.observe_reply(reply),
            Command::Shutdown => {}
        }
    }

    // ── Capture ─────────────────────────────────────────────────────────────

    fn start_capture(&mut self) {
        if self.session.is_some() {
            debug!("start_capture ignored: already recording");
            return;
        }
        if self.transcribing.is_some() {
            debug!("start_capture ignored: transcription in flight");
            return;
        }
        if self.generating {
            debug!("start_capture ignored: assistant is generating");
            return;
        }

        // The user always takes priority over the assistant.
        self.stop_speaking();

        let stream = match self.services.microphone.open(&self.config.audio) {
            Ok(stream) => stream,
            Err(e) => {
                self.device_failed = true;
                self.report_error(e);
                return;
            }
        };

        self.next_session += 1;
        let id = SessionId(self.next_session);
        self.session = Some(CaptureSession::spawn(
            id,
            stream,
            &self.config,
            self.session_tx.clone(),
            self.levels_tx.clone(),
        ));
        self.turn_state = TurnState::Calibrating;
        self.mic_active = None;
        self.last_error = None;
        self.emit(RuntimeEvent::CaptureStarted { session: id });
    }

    fn stop_capture(&mut self) {
        if let Some(session) = self.session.take() {
            let id = session.id();
            session.discard();
            info!(session = %id, "capture stopped");
            self.emit(RuntimeEvent::CaptureStopped { session: id });
        }
        if self.transcribing.take().is_some() {
            info!("abandoning in-flight transcription");
        }
        self.reset_levels();
    }

    fn end_turn(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("finish_turn ignored: not recording");
            return;
        };
        let id = session.id();
        self.emit(RuntimeEvent::TurnEnded { session: id });
        let utterance = session.finish();
        self.reset_levels();
        self.emit(RuntimeEvent::CaptureStopped { session: id });

        if utterance.samples.is_empty() {
            debug!(session = %id, "turn ended with no audio; nothing to transcribe");
            return;
        }

        info!(
            session = %id,
            "transcribing {:.1}s utterance",
            utterance.duration_secs()
        );
        self.next_op += 1;
        let op = self.next_op;
        self.transcribing = Some(op);
        let transcriber = self.services.transcriber.clone();
        self.spawn_op(async move {
            let result = transcriber
                .transcribe(utterance.samples, utterance.sample_rate)
                .await;
            Completion::Transcribed { op, result }
        });
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        let current = self.session.as_ref().map(CaptureSession::id);
        if current != Some(event.session) {
            debug!(session = %event.session, "ignoring event from stale session");
            return;
        }
        match event.kind {
            SessionEventKind::StateChanged(state) => {
                self.turn_state = state;
                self.emit(RuntimeEvent::TurnState(state));
            }
            SessionEventKind::TurnEnded => self.end_turn(),
            SessionEventKind::StreamEnded => {
                warn!(session = %event.session, "microphone stream ended");
                self.auto_loop_paused = true;
                self.stop_capture();
            }
            SessionEventKind::MicStatus { active } => {
                self.mic_active = Some(active);
                self.emit(RuntimeEvent::MicStatus { active });
            }
        }
    }

    fn reset_levels(&mut self) {
        self.turn_state = TurnState::Idle;
        self.levels_tx.send_replace(LevelReading::default());
    }

    // ── Playback ────────────────────────────────────────────────────────────

    fn speak(&mut self, text: String, reply: Option<ReplyId>) {
        if text.trim().is_empty() {
            debug!("speak ignored: blank text");
            return;
        }
        if self.session.is_some() {
            debug!("speak ignored: capture is active");
            return;
        }
        // At most one playback at a time.
        self.stop_speaking();

        self.next_op += 1;
        let op = self.next_op;
        let cancel = self.ops_cancel.child_token();
        self.playback = Some(Playback {
            op,
            cancel: cancel.clone(),
        });
        self.emit(RuntimeEvent::PlaybackStarted { reply });

        let synthesizer = self.services.synthesizer.clone();
        let sink = self.services.sink.clone();
        self.spawn_op(async move {
            let result: Result<()> = async {
                let audio = tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    audio = synthesizer.synthesize(&text) => audio?,
                };
                sink.play(audio, cancel).await
            }
            .await;
            Completion::SpeechFinished { op, result }
        });
    }

    fn stop_speaking(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.cancel.cancel();
            info!("playback stopped");
            self.emit(RuntimeEvent::PlaybackEnded { interrupted: true });
        }
    }

    fn observe_reply(&mut self, reply: AssistantReply) {
        if self.last_spoken_reply.as_ref() == Some(&reply.id) {
            debug!(reply = %reply.id, "reply already spoken");
            return;
        }
        self.pending_reply = Some(reply);
        if self.read_aloud_at.is_some() {
            // Coalesce streaming updates: restart the quiet period.
            self.read_aloud_at = Some(Instant::now() + self.read_aloud_debounce);
        }
    }

    fn on_read_aloud_due(&mut self) {
        self.read_aloud_at = None;
        if !self.read_aloud_ready() {
            return;
        }
        let Some(reply) = self.pending_reply.take() else {
            return;
        };
        if reply.text.trim().is_empty() {
            debug!(reply = %reply.id, "skipping blank reply");
            return;
        }
        info!(reply = %reply.id, "reading reply aloud");
        self.last_spoken_reply = Some(reply.id.clone());
        self.speak(reply.text, Some(reply.id));
    }

    fn read_aloud_ready(&self) -> bool {
        self.auto_read_aloud && !self.generating && self.session.is_none()
    }

    fn has_unspoken_reply(&self) -> bool {
        self.pending_reply
            .as_ref()
            .is_some_and(|r| self.last_spoken_reply.as_ref() != Some(&r.id))
    }

    // ── Delivery ────────────────────────────────────────────────────────────

    fn enqueue(&mut self, text: String) {
        match self.queue.push(text) {
            PushOutcome::Enqueued => {}
            PushOutcome::DroppedOldest(evicted) => {
                warn!("transcript queue full; dropped oldest entry");
                self.emit(RuntimeEvent::TranscriptDropped { text: evicted.text });
            }
            PushOutcome::Ignored => return,
        }
        self.emit(RuntimeEvent::TranscriptQueued {
            queue_len: self.queue.len(),
        });
    }

    /// Deliver the queue front (peek-then-confirm), one attempt at a time.
    fn try_drain(&mut self) {
        if self.delivering.is_some() {
            debug!("drain skipped: delivery already in flight");
            return;
        }
        if self.generating || *self.generating_live.borrow() {
            debug!("drain deferred: assistant is generating");
            return;
        }
        let Some(front) = self.queue.peek_front().cloned() else {
            return;
        };
        self.delivering = Some(front.seq);
        let sender = self.services.sender.clone();
        self.spawn_op(async move {
            let result = sender.send(&front.text).await;
            Completion::Delivered {
                seq: front.seq,
                text: front.text,
                result,
            }
        });
    }

    fn set_generating(&mut self, value: bool) {
        let was = self.generating;
        self.generating = value;
        if was && !value {
            debug!("generation finished");
            self.try_drain();
        }
    }

    // ── Completions ─────────────────────────────────────────────────────────

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Transcribed { op, result } => {
                if self.transcribing != Some(op) {
                    debug!(op, "dropping stale transcription");
                    return;
                }
                self.transcribing = None;
                match result {
                    Ok(text) => {
                        let text = text.trim().to_owned();
                        if text.is_empty() {
                            debug!("empty transcription");
                            return;
                        }
                        info!("transcribed: {text}");
                        self.last_transcript = Some(text.clone());
                        self.emit(RuntimeEvent::Transcription { text: text.clone() });
                        self.enqueue(text);
                        self.try_drain();
                    }
                    Err(e) => self.report_error(e),
                }
            }
            Completion::SpeechFinished { op, result } => {
                if self.playback.as_ref().map(|p| p.op) != Some(op) {
                    debug!(op, "dropping stale playback completion");
                    return;
                }
                self.playback = None;
                self.emit(RuntimeEvent::PlaybackEnded { interrupted: false });
                if let Err(e) = result {
                    self.report_error(e);
                }
            }
            Completion::Delivered { seq, text, result } => {
                self.delivering = None;
                match result {
                    Ok(()) => {
                        if self.queue.confirm_front(seq).is_some() {
                            info!("transcript delivered");
                        } else {
                            debug!("delivered transcript was already cleared");
                        }
                        // The next item waits for its own trigger.
                        self.emit(RuntimeEvent::TranscriptDelivered { text });
                    }
                    Err(e) => {
                        warn!("delivery failed; transcript kept at queue front");
                        self.report_error(e);
                    }
                }
            }
        }
    }

    // ── Level-triggered policies ────────────────────────────────────────────

    /// Re-evaluate read-aloud and auto-loop after any state change, then
    /// publish the snapshot.
    fn reconcile(&mut self) {
        if self.read_aloud_ready() && self.has_unspoken_reply() {
            if self.read_aloud_at.is_none() {
                self.read_aloud_at = Some(Instant::now() + self.read_aloud_debounce);
            }
        } else {
            self.read_aloud_at = None;
        }

        if self.should_auto_restart() {
            info!("auto-loop: restarting capture");
            self.start_capture();
        }

        self.publish();
    }

    fn should_auto_restart(&self) -> bool {
        self.auto_loop
            && !self.auto_loop_paused
            && !self.device_failed
            && self.session.is_none()
            && self.transcribing.is_none()
            && self.playback.is_none()
            && !self.generating
            && self.delivering.is_none()
            && self.read_aloud_at.is_none()
    }

    fn publish(&self) {
        let next = ConversationSnapshot {
            turn_state: self.turn_state,
            is_recording: self.session.is_some(),
            is_transcribing: self.transcribing.is_some(),
            is_speaking: self.playback.is_some(),
            is_generating: self.generating,
            is_delivering: self.delivering.is_some(),
            last_transcript: self.last_transcript.clone(),
            last_error: self.last_error.clone(),
            queue_len: self.queue.len(),
            auto_loop: self.auto_loop,
            auto_read_aloud: self.auto_read_aloud,
            last_spoken_reply: self.last_spoken_reply.clone(),
            mic_active: self.mic_active,
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    // ── Plumbing ────────────────────────────────────────────────────────────

    fn spawn_op<F>(&self, fut: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completion_tx.clone();
        let cancel = self.ops_cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                done = fut => {
                    let _ = tx.send(done);
                }
            }
        });
    }

    fn report_error(&mut self, err: HarkError) {
        let message = err.to_string();
        warn!("{message}");
        self.last_error = Some(message.clone());
        self.emit(RuntimeEvent::Error { message });
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(rt) = &self.runtime_tx {
            let _ = rt.send(event);
        }
    }

    fn teardown(&mut self) {
        self.stop_capture();
        self.stop_speaking();
        self.read_aloud_at = None;
        self.ops_cancel.cancel();
        self.delivering = None;
        self.publish();
    }
}
