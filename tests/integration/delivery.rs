//! Transcript queue delivery: overflow, retries and generation gating.

use crate::helpers::{FakeTranscriber, HarnessBuilder, drain_events, wait_until};
use hark::RuntimeEvent;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn overflow_keeps_latest_six_and_delivers_in_order() {
    let replies = (1..=8).map(|i| Ok(format!("s{i}"))).collect();
    let transcriber = FakeTranscriber::scripted(replies, "extra", Duration::from_millis(10));
    let mut h = HarnessBuilder::new()
        .transcriber(transcriber)
        .config(|c| c.conversation.auto_loop = true)
        .spawn();
    h.sender.set_always_fail(true);

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "eighth transcript", |s| {
        s.last_transcript.as_deref() == Some("s8") && !s.is_delivering
    })
    .await;
    h.handle.set_auto_loop(false).unwrap();
    h.handle.stop_capture().unwrap();

    let snap = wait_until(&h.handle, "capture stopped", |s| !s.is_recording).await;
    assert_eq!(snap.queue_len, 6);
    assert!(h.sender.delivered().is_empty());

    let dropped: Vec<String> = drain_events(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            RuntimeEvent::TranscriptDropped { text } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(dropped, vec!["s1", "s2"]);

    h.sender.set_always_fail(false);
    for remaining in (0..6).rev() {
        h.handle.send_latest().unwrap();
        wait_until(&h.handle, "one more delivered", |s| {
            s.queue_len == remaining && !s.is_delivering
        })
        .await;
    }

    assert_eq!(h.sender.delivered(), vec!["s3", "s4", "s5", "s6", "s7", "s8"]);
}

#[tokio::test(start_paused = true)]
async fn one_generation_edge_delivers_one_transcript() {
    let replies = vec![Ok("t1".to_owned()), Ok("t2".to_owned())];
    let transcriber = FakeTranscriber::scripted(replies, "t3", Duration::from_millis(10));
    let h = HarnessBuilder::new()
        .transcriber(transcriber)
        .config(|c| c.conversation.auto_loop = true)
        .spawn();
    h.sender.set_always_fail(true);

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "second transcript", |s| {
        s.last_transcript.as_deref() == Some("t2") && !s.is_delivering
    })
    .await;
    h.handle.set_auto_loop(false).unwrap();
    h.handle.stop_capture().unwrap();
    let snap = wait_until(&h.handle, "capture stopped", |s| !s.is_recording).await;
    assert_eq!(snap.queue_len, 2);

    // The chat pipeline starts composing as soon as it accepts a message.
    h.sender.set_always_fail(false);
    h.sender.raise_generating_on_send(h.generating.clone());
    let attempts_before = h.sender.attempts().len();

    h.generating.send_replace(true);
    wait_until(&h.handle, "generating", |s| s.is_generating).await;
    h.generating.send_replace(false);

    wait_until(&h.handle, "first delivered", |s| {
        s.queue_len == 1 && !s.is_delivering && s.is_generating
    })
    .await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.sender.attempts().len(), attempts_before + 1);
    assert_eq!(h.sender.delivered(), vec!["t1"]);
    assert_eq!(h.handle.snapshot().queue_len, 1);

    // The next falling edge releases the next transcript.
    h.generating.send_replace(false);
    wait_until(&h.handle, "second delivered", |s| {
        s.queue_len == 0 && !s.is_delivering
    })
    .await;
    assert_eq!(h.sender.delivered(), vec!["t1", "t2"]);
    assert_eq!(h.sender.attempts().len(), attempts_before + 2);
}

#[tokio::test(start_paused = true)]
async fn failed_delivery_retries_after_generation_and_delivers_once() {
    let h = HarnessBuilder::new().spawn();
    h.sender.fail_next(1);

    h.handle.start_capture().unwrap();
    let snap = wait_until(&h.handle, "delivery failure", |s| s.last_error.is_some()).await;
    assert_eq!(
        snap.last_error.as_deref(),
        Some("delivery failed: chat pipeline rejected the message")
    );
    assert_eq!(snap.queue_len, 1, "failed item stays at the front");

    h.generating.send_replace(true);
    wait_until(&h.handle, "generating", |s| s.is_generating).await;
    h.generating.send_replace(false);

    wait_until(&h.handle, "queue drained", |s| s.queue_len == 0 && !s.is_delivering).await;
    assert_eq!(h.sender.attempts(), vec!["hello there", "hello there"]);
    assert_eq!(h.sender.delivered(), vec!["hello there"]);
}

#[tokio::test(start_paused = true)]
async fn delivery_is_deferred_while_generating() {
    let h = HarnessBuilder::new().spawn();

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "listening", |s| s.turn_state == hark::TurnState::Listening).await;
    // The assistant starts composing mid-turn; the transcript must wait.
    h.generating.send_replace(true);

    let snap = wait_until(&h.handle, "queued", |s| s.queue_len == 1).await;
    assert!(snap.is_generating);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.sender.attempts().is_empty());

    h.generating.send_replace(false);
    wait_until(&h.handle, "delivered", |s| s.queue_len == 0 && !s.is_delivering).await;
    assert_eq!(h.sender.delivered(), vec!["hello there"]);
}

#[tokio::test(start_paused = true)]
async fn send_latest_requeues_last_transcript() {
    let h = HarnessBuilder::new().spawn();

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "delivered", |s| {
        s.last_transcript.is_some() && s.queue_len == 0 && !s.is_delivering
    })
    .await;

    h.handle.send_latest().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    wait_until(&h.handle, "redelivered", |s| s.queue_len == 0 && !s.is_delivering).await;

    assert_eq!(h.sender.delivered(), vec!["hello there", "hello there"]);
}

#[tokio::test(start_paused = true)]
async fn clear_queue_drops_undelivered_transcripts() {
    let h = HarnessBuilder::new().spawn();
    h.sender.set_always_fail(true);

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "failed delivery", |s| {
        s.queue_len == 1 && s.last_error.is_some() && !s.is_delivering
    })
    .await;

    h.handle.clear_queue().unwrap();
    let snap = wait_until(&h.handle, "cleared", |s| s.queue_len == 0).await;
    assert_eq!(snap.last_transcript.as_deref(), Some("hello there"));
    assert!(h.sender.delivered().is_empty());
}
