//! Config files drive the running engine.

use crate::helpers::{FakeTranscriber, HarnessBuilder, wait_until};
use hark::HarkConfig;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(body: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("config.toml");
    fs::write(&path, body).expect("write config");
    (dir, path)
}

#[test]
fn partial_file_keeps_defaults_elsewhere() {
    let (_dir, path) = write_config(
        r#"
[turn]
silence_ms = 600

[queue]
capacity = 2
"#,
    );
    let config = HarkConfig::from_file(&path).unwrap();

    assert_eq!(config.turn.silence_ms, 600);
    assert_eq!(config.queue.capacity, 2);
    assert_eq!(config.turn.calibration_frames, 90);
    assert_eq!(config.audio.frame_size, 2048);
    assert!(!config.conversation.auto_loop);
}

#[test]
fn invalid_threshold_is_rejected_on_load() {
    let (_dir, path) = write_config("[turn]\nthreshold_multiplier = 0.0\n");
    let err = HarkConfig::from_file(&path).unwrap_err();
    assert!(err.to_string().starts_with("config error"), "{err}");
}

#[tokio::test(start_paused = true)]
async fn loaded_queue_capacity_bounds_the_backlog() {
    let (_dir, path) = write_config(
        r#"
[queue]
capacity = 2

[conversation]
auto_loop = true
"#,
    );
    let config = HarkConfig::from_file(&path).unwrap();

    let replies = ["a", "b", "c"].iter().map(|t| Ok((*t).to_owned())).collect();
    let transcriber = FakeTranscriber::scripted(replies, "d", Duration::from_millis(10));
    let h = HarnessBuilder::new()
        .config(|c| *c = config)
        .transcriber(transcriber)
        .spawn();
    h.sender.set_always_fail(true);

    h.handle.start_capture().unwrap();
    wait_until(&h.handle, "third transcript", |s| {
        s.last_transcript.as_deref() == Some("c") && !s.is_delivering
    })
    .await;
    h.handle.set_auto_loop(false).unwrap();
    h.handle.stop_capture().unwrap();
    let snap = wait_until(&h.handle, "stopped", |s| !s.is_recording).await;
    assert_eq!(snap.queue_len, 2);

    h.sender.set_always_fail(false);
    for remaining in [1, 0] {
        h.handle.send_latest().unwrap();
        wait_until(&h.handle, "one more delivered", |s| {
            s.queue_len == remaining && !s.is_delivering
        })
        .await;
    }
    assert_eq!(h.sender.delivered(), vec!["b", "c"]);
}
