//! Microphone capture using cpal.
//!
//! The cpal stream is not `Send`, so each opened stream lives on its own
//! thread. The audio callback downmixes to mono and feeds two buffers: a
//! short window of the most recent samples for level analysis, and the
//! full-turn recording handed to transcription.

use crate::config::AudioConfig;
use crate::error::{HarkError, Result};
use crate::pipeline::services::{MicStream, Microphone};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Opens the configured (or default) input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    /// List available input device names.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| HarkError::Device(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self, config: &AudioConfig) -> Result<Arc<dyn MicStream>> {
        let stream = CpalStream::open(config)?;
        Ok(Arc::new(stream))
    }
}

struct Shared {
    window: Mutex<VecDeque<f32>>,
    window_len: usize,
    recording: Mutex<Vec<f32>>,
    active: AtomicBool,
}

impl Shared {
    fn push(&self, mono: &[f32]) {
        if let Ok(mut window) = self.window.lock() {
            window.extend(mono.iter().copied());
            let excess = window.len().saturating_sub(self.window_len);
            window.drain(..excess);
        }
        if let Ok(mut recording) = self.recording.lock() {
            recording.extend_from_slice(mono);
        }
    }
}

/// A live input stream running on a dedicated thread.
pub struct CpalStream {
    shared: Arc<Shared>,
    sample_rate: u32,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalStream {
    /// Open the input device and start streaming.
    ///
    /// # Errors
    ///
    /// Returns [`HarkError::Device`] if the device is missing, denied, or the
    /// stream cannot be started.
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            window: Mutex::new(VecDeque::with_capacity(config.frame_size)),
            window_len: config.frame_size.max(1),
            recording: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
        });

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let input_device = config.input_device.clone();
        let thread_shared = Arc::clone(&shared);

        let thread = std::thread::Builder::new()
            .name("hark-capture".into())
            .spawn(move || capture_thread(input_device, thread_shared, ready_tx, stop_rx))?;

        let sample_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(HarkError::Device("capture thread exited during startup".into()));
            }
        };

        Ok(Self {
            shared,
            sample_rate,
            stop_tx: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl MicStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&self, frame: &mut [f32]) -> bool {
        if !self.shared.active.load(Ordering::Acquire) {
            return false;
        }
        let Ok(window) = self.shared.window.lock() else {
            return false;
        };
        // Right-align the newest samples; pad the front with silence.
        let available = window.len().min(frame.len());
        let pad = frame.len() - available;
        frame[..pad].fill(0.0);
        for (dst, src) in frame[pad..]
            .iter_mut()
            .zip(window.iter().skip(window.len() - available))
        {
            *dst = *src;
        }
        true
    }

    fn take_recording(&self) -> Vec<f32> {
        self.shared
            .recording
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default()
    }

    fn close(&self) {
        self.shared.active.store(false, Ordering::Release);
        if let Ok(mut stop) = self.stop_tx.lock() {
            stop.take();
        }
        let handle = self.thread.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("capture thread panicked");
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn capture_thread(
    input_device: Option<String>,
    shared: Arc<Shared>,
    ready_tx: mpsc::SyncSender<Result<u32>>,
    stop_rx: mpsc::Receiver<()>,
) {
    let stream = match build_stream(input_device.as_deref(), &shared) {
        Ok((stream, rate)) => {
            let _ = ready_tx.send(Ok(rate));
            stream
        }
        Err(e) => {
            shared.active.store(false, Ordering::Release);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Hold the stream alive until the owner closes it (sender dropped).
    let _ = stop_rx.recv();
    drop(stream);
    info!("audio capture stopped");
}

fn build_stream(input_device: Option<&str>, shared: &Arc<Shared>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = if let Some(name) = input_device {
        host.input_devices()
            .map_err(|e| HarkError::Device(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| HarkError::Device(format!("input device '{name}' not found")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| HarkError::Device("no default input device".into()))?
    };

    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {device_name}");

    let default_config = device
        .default_input_config()
        .map_err(|e| HarkError::Device(format!("no default input config: {e}")))?;

    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();
    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    debug!("native input config: {native_rate}Hz, {native_channels} channels");

    let data_shared = Arc::clone(shared);
    let err_shared = Arc::clone(shared);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                if native_channels > 1 {
                    data_shared.push(&to_mono(data, native_channels));
                } else {
                    data_shared.push(data);
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
                err_shared.active.store(false, Ordering::Release);
            },
            None,
        )
        .map_err(|e| HarkError::Device(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| HarkError::Device(format!("failed to start input stream: {e}")))?;

    info!("audio capture started at {native_rate}Hz");
    Ok((stream, native_rate))
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}
