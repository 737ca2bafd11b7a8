//! Reply playback to system speakers via cpal.

use crate::config::AudioConfig;
use crate::error::{HarkError, Result};
use crate::pipeline::messages::SynthesizedAudio;
use crate::pipeline::services::AudioSink;
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Speaker output implementing [`AudioSink`].
///
/// Each `play` call opens a mono output stream at the clip's sample rate on a
/// blocking thread and holds it until the clip drains or the token fires.
pub struct CpalPlayback {
    device: cpal::Device,
}

impl CpalPlayback {
    /// Select the configured (or default) output device.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| HarkError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| HarkError::Audio(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| HarkError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        Ok(Self { device })
    }

    /// List available output device names.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| HarkError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl AudioSink for CpalPlayback {
    async fn play(&self, audio: SynthesizedAudio, cancel: CancellationToken) -> Result<()> {
        if !is_playable(&audio)? {
            return Ok(());
        }
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || play_blocking(&device, audio, &cancel))
            .await
            .map_err(|e| HarkError::Audio(format!("playback task failed: {e}")))?
    }
}

/// `Ok(false)` for an empty clip; a clip without a sample rate is a
/// synthesizer fault.
fn is_playable(audio: &SynthesizedAudio) -> Result<bool> {
    if audio.samples.is_empty() {
        return Ok(false);
    }
    if audio.sample_rate == 0 {
        return Err(HarkError::Synthesis(format!(
            "clip of {} samples has no sample rate",
            audio.samples.len()
        )));
    }
    Ok(true)
}

fn play_blocking(
    device: &cpal::Device,
    audio: SynthesizedAudio,
    cancel: &CancellationToken,
) -> Result<()> {
    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: audio.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    let buffer = Arc::new(Mutex::new(PlaybackBuffer::new(audio.samples)));
    let buffer_clone = Arc::clone(&buffer);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                if let Ok(mut buf) = buffer_clone.lock() {
                    buf.fill(data);
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| HarkError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| HarkError::Audio(format!("failed to start output stream: {e}")))?;

    loop {
        std::thread::sleep(Duration::from_millis(10));
        if cancel.is_cancelled() {
            debug!("playback cancelled");
            break;
        }
        let buf = buffer
            .lock()
            .map_err(|e| HarkError::Audio(format!("playback buffer lock poisoned: {e}")))?;
        if buf.finished {
            break;
        }
    }

    drop(stream);
    Ok(())
}

/// Tracks playback progress through a clip.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

impl PlaybackBuffer {
    fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            position: 0,
            finished: false,
        }
    }

    /// Copy the next chunk into `out`, zero-filling past the end.
    fn fill(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            if let Some(&s) = self.samples.get(self.position) {
                *sample = s;
                self.position += 1;
            } else {
                *sample = 0.0;
                self.finished = true;
            }
        }
    }
}
