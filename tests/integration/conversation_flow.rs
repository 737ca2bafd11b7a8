//! End-to-end turn flow: capture, endpointing, transcription, delivery and
//! hands-free restart.

use crate::helpers::{FakeMic, FakeTranscriber, HarnessBuilder, drain_events, wait_until};
use hark::error::HarkError;
use hark::{RuntimeEvent, TurnState};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn spoken_turn_is_transcribed_and_delivered() {
    let mut h = HarnessBuilder::new().spawn();

    h.handle.start_capture().unwrap();
    let snap = wait_until(&h.handle, "transcript delivered", |s| {
        s.last_transcript.is_some() && s.queue_len == 0 && !s.is_delivering
    })
    .await;

    assert_eq!(snap.last_transcript.as_deref(), Some("hello there"));
    assert!(!snap.is_recording);
    assert_eq!(snap.turn_state, TurnState::Idle);
    assert_eq!(h.sender.delivered(), vec!["hello there"]);
    assert_eq!(h.transcriber.calls(), 1);
    assert_eq!(h.mic.opens(), 1, "auto-loop is off, no restart");
    assert!(h.mic.all_closed());

    let events = drain_events(&mut h.events);
    let states: Vec<TurnState> = events
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::TurnState(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            TurnState::Calibrating,
            TurnState::Monitoring,
            TurnState::Listening,
            TurnState::SilenceHold,
        ]
    );
    assert!(events.contains(&RuntimeEvent::MicStatus { active: true }));
    assert!(events.contains(&RuntimeEvent::TranscriptDelivered {
        text: "hello there".into()
    }));
}

#[tokio::test(start_paused = true)]
async fn turn_ends_after_configured_silence() {
    let h = HarnessBuilder::new().spawn();
    let started = tokio::time::Instant::now();

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "listening", |s| s.turn_state == TurnState::Listening).await;
    let speech_at = tokio::time::Instant::now();
    wait_until(&h.handle, "capture stopped", |s| !s.is_recording).await;
    let ended_at = tokio::time::Instant::now();

    // 90 calibration frames at 16 ms precede the first voiced frame.
    assert!(speech_at - started >= Duration::from_millis(1_400));
    // 160 ms of speech, then strictly more than 1200 ms of silence.
    let turn = ended_at - speech_at;
    assert!(turn > Duration::from_millis(1_350), "turn ended after {turn:?}");
    assert!(turn < Duration::from_millis(1_500), "turn ended after {turn:?}");
}

#[tokio::test(start_paused = true)]
async fn quiet_room_never_ends_the_turn() {
    let h = HarnessBuilder::new().mic(FakeMic::quiet_room()).spawn();

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "monitoring", |s| s.turn_state == TurnState::Monitoring).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let snap = h.handle.snapshot();
    assert!(snap.is_recording);
    assert_eq!(snap.turn_state, TurnState::Monitoring);
    assert_eq!(h.transcriber.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn finish_turn_transcribes_immediately() {
    let h = HarnessBuilder::new().mic(FakeMic::quiet_room()).spawn();

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "monitoring", |s| s.turn_state == TurnState::Monitoring).await;
    h.handle.finish_turn().unwrap();

    let snap = wait_until(&h.handle, "transcript", |s| s.last_transcript.is_some()).await;
    assert!(!snap.is_recording);
    assert_eq!(h.transcriber.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn start_capture_is_idempotent_while_recording() {
    let h = HarnessBuilder::new().mic(FakeMic::quiet_room()).spawn();

    h.handle.start_capture().unwrap();
    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "recording", |s| s.is_recording).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.mic.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_capture_discards_in_flight_transcription() {
    let transcriber = FakeTranscriber::scripted(Vec::new(), "too late", Duration::from_secs(2));
    let h = HarnessBuilder::new().transcriber(transcriber).spawn();

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "transcribing", |s| s.is_transcribing).await;
    h.handle.stop_capture().unwrap();
    wait_until(&h.handle, "idle", |s| !s.is_transcribing).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    let snap = h.handle.snapshot();
    assert_eq!(snap.last_transcript, None);
    assert_eq!(snap.queue_len, 0);
    assert!(h.sender.attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn blank_transcript_is_not_queued() {
    let transcriber = FakeTranscriber::new("   ");
    let h = HarnessBuilder::new().transcriber(transcriber).spawn();

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "transcribing", |s| s.is_transcribing).await;
    wait_until(&h.handle, "transcription done", |s| !s.is_transcribing).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.transcriber.calls(), 1);
    assert_eq!(h.handle.snapshot().last_transcript, None);
    assert!(h.sender.attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transcription_failure_is_reported_and_queue_untouched() {
    let transcriber = FakeTranscriber::scripted(
        vec![Err(HarkError::Transcription("model not loaded".into()))],
        "unused",
        Duration::from_millis(10),
    );
    let h = HarnessBuilder::new().transcriber(transcriber).spawn();

    h.handle.start_capture().unwrap();
    let snap = wait_until(&h.handle, "error", |s| s.last_error.is_some()).await;

    assert_eq!(
        snap.last_error.as_deref(),
        Some("transcription failed: model not loaded")
    );
    assert_eq!(snap.queue_len, 0);
    assert!(!snap.is_transcribing);
}

#[tokio::test(start_paused = true)]
async fn auto_loop_restarts_capture_after_delivery() {
    let h = HarnessBuilder::new()
        .config(|c| c.conversation.auto_loop = true)
        .spawn();

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "second session", |s| {
        s.last_transcript.is_some() && s.queue_len == 0 && s.is_recording
    })
    .await;

    assert_eq!(h.mic.opens(), 2);
    assert_eq!(h.sender.delivered(), vec!["hello there"]);
}

#[tokio::test(start_paused = true)]
async fn auto_loop_waits_for_generation_to_finish() {
    let h = HarnessBuilder::new().spawn();
    h.generating.send_replace(true);
    wait_until(&h.handle, "generating", |s| s.is_generating).await;

    h.handle.set_auto_loop(true).unwrap();
    h.handle.start_capture().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.mic.opens(), 0, "start_capture is a no-op while generating");

    h.generating.send_replace(false);
    wait_until(&h.handle, "auto restart", |s| s.is_recording).await;
    assert_eq!(h.mic.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_pauses_auto_loop() {
    let h = HarnessBuilder::new()
        .mic(FakeMic::quiet_room())
        .config(|c| c.conversation.auto_loop = true)
        .spawn();

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "recording", |s| s.is_recording).await;
    h.handle.stop_capture().unwrap();
    wait_until(&h.handle, "stopped", |s| !s.is_recording).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h.handle.snapshot().is_recording);
    assert_eq!(h.mic.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn lost_stream_returns_to_idle_and_pauses_auto_loop() {
    let h = HarnessBuilder::new()
        .mic(FakeMic::quiet_room())
        .config(|c| c.conversation.auto_loop = true)
        .spawn();

    wait_until(&h.handle, "monitoring", |s| s.turn_state == TurnState::Monitoring).await;
    h.mic.unplug();

    let snap = wait_until(&h.handle, "idle", |s| !s.is_recording).await;
    assert_eq!(snap.turn_state, TurnState::Idle);
    assert_eq!(snap.last_error, None);
    assert_eq!(h.transcriber.calls(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!h.handle.snapshot().is_recording);
    assert_eq!(h.mic.opens(), 1, "no restart after the stream was lost");

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "recording again", |s| s.is_recording).await;
    assert_eq!(h.mic.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn device_error_is_surfaced_without_retry_storm() {
    let mic = FakeMic::speaker();
    mic.set_failing(true);
    let h = HarnessBuilder::new()
        .mic(mic)
        .config(|c| c.conversation.auto_loop = true)
        .spawn();

    // Auto-loop tries to listen as soon as the orchestrator starts.
    let snap = wait_until(&h.handle, "device error", |s| s.last_error.is_some()).await;
    assert_eq!(
        snap.last_error.as_deref(),
        Some("microphone unavailable: permission denied")
    );
    assert!(!snap.is_recording);
    assert_eq!(snap.turn_state, TurnState::Idle);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.mic.opens(), 1);

    // An explicit start retries and clears the error once it works.
    h.mic.set_failing(false);
    h.handle.start_capture().unwrap();
    let snap = wait_until(&h.handle, "recording", |s| s.is_recording).await;
    assert_eq!(snap.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_the_microphone() {
    let h = HarnessBuilder::new().mic(FakeMic::quiet_room()).spawn();

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "recording", |s| s.is_recording).await;
    h.handle.shutdown().unwrap();
    h.task.await.unwrap().unwrap();

    assert!(h.mic.all_closed());
    assert!(matches!(
        h.handle.start_capture(),
        Err(HarkError::Channel(_))
    ));
}
