//! Microphone capture via cpal
//!
//! Captures mono PCM from the default input device into a ring buffer,
//! keeps an input level for the UI meter and hands out Opus frames. The platform has no camera
//! backend here, so video requests report the camera as unavailable.

use super::devices::{CaptureDevice, MediaDevices, MediaError, MediaFrame, TrackKind};
use audiopus::coder::Encoder;
use audiopus::{Application, Channels, SampleRate};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Capture rate expected by the Opus track
pub const SAMPLE_RATE: u32 = 48000;

/// Mono voice
pub const CHANNELS: u16 = 1;

/// 20 ms @ 48 kHz
pub const FRAME_SIZE: usize = 960;

const FRAME_DURATION: Duration = Duration::from_millis(20);

const RING_BUFFER_SIZE: usize = FRAME_SIZE * 10;

/// Upper bound for one encoded Opus packet
const MAX_PACKET_SIZE: usize = 1275;

// ============================================================================
// DEVICES
// ============================================================================

/// `MediaDevices` backed by the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl MediaDevices for CpalDevices {
    fn open(&self, kind: TrackKind) -> Result<Box<dyn CaptureDevice>, MediaError> {
        match kind {
            TrackKind::Audio => Ok(Box::new(MicrophoneCapture::start_default()?)),
            TrackKind::Video => Err(MediaError::DeviceUnavailable {
                kind,
                reason: "no camera backend on this platform".to_string(),
            }),
        }
    }
}

// ============================================================================
// CAPTURE BUFFER
// ============================================================================

/// State shared between the cpal callback and the reader
struct CaptureBuffer {
    samples: Mutex<HeapRb<f32>>,
    is_muted: Mutex<bool>,
    input_level: Mutex<f32>,
}

impl CaptureBuffer {
    fn new() -> Self {
        Self {
            samples: Mutex::new(HeapRb::new(RING_BUFFER_SIZE)),
            is_muted: Mutex::new(false),
            input_level: Mutex::new(0.0),
        }
    }

    /// Meters and stores one callback's worth of interleaved input
    fn ingest(&self, data: &[f32], channels: usize, source_rate: u32) {
        if data.is_empty() {
            return;
        }
        let rms = (data.iter().map(|s| s * s).sum::<f32>() / data.len() as f32).sqrt();
        *self.input_level.lock() = rms.min(1.0);

        if *self.is_muted.lock() {
            return;
        }

        let mono = downmix(data, channels);
        let resampled = resample(&mono, source_rate, SAMPLE_RATE);
        let mut samples = self.samples.lock();
        for sample in resampled {
            let _ = samples.try_push(sample);
        }
    }

    fn read_pcm_frame(&self) -> Option<Vec<f32>> {
        let mut samples = self.samples.lock();
        if samples.occupied_len() < FRAME_SIZE {
            return None;
        }
        Some((0..FRAME_SIZE).filter_map(|_| samples.try_pop()).collect())
    }

    fn set_muted(&self, muted: bool) {
        *self.is_muted.lock() = muted;
        if muted {
            self.samples.lock().clear();
        }
    }

    fn is_muted(&self) -> bool {
        *self.is_muted.lock()
    }

    fn level(&self) -> f32 {
        *self.input_level.lock()
    }
}

// ============================================================================
// MICROPHONE CAPTURE
// ============================================================================

/// Running capture from one input device, encoded to Opus
pub struct MicrophoneCapture {
    name: String,
    stream: Option<Stream>,
    buffer: Arc<CaptureBuffer>,
    encoder: Encoder,
}

// cpal::Stream is !Send on some hosts. It is only ever dropped, never
// touched from another thread.
unsafe impl Send for MicrophoneCapture {}

impl MicrophoneCapture {
    /// Opens the default input device and starts capturing
    pub fn start_default() -> Result<Self, MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| MediaError::DeviceUnavailable {
                kind: TrackKind::Audio,
                reason: "no input device found".to_string(),
            })?;
        Self::start(device)
    }

    pub fn start(device: Device) -> Result<Self, MediaError> {
        let name = device.name().unwrap_or_else(|_| "Microphone".to_string());
        let config = find_best_input_config(&device)?;

        let encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(|e| MediaError::DeviceUnavailable {
                kind: TrackKind::Audio,
                reason: format!("opus encoder: {e}"),
            })?;

        tracing::info!(
            "Starting audio capture on {}: {} Hz, {} channels",
            name,
            config.sample_rate.0,
            config.channels
        );

        let buffer = Arc::new(CaptureBuffer::new());
        let callback_buffer = Arc::clone(&buffer);
        let source_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    callback_buffer.ingest(data, channels, source_rate);
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(map_build_error)?;

        stream.play().map_err(|e| MediaError::DeviceUnavailable {
            kind: TrackKind::Audio,
            reason: e.to_string(),
        })?;

        Ok(Self {
            name,
            stream: Some(stream),
            buffer,
            encoder,
        })
    }

    pub fn is_muted(&self) -> bool {
        self.buffer.is_muted()
    }
}

impl CaptureDevice for MicrophoneCapture {
    fn label(&self) -> String {
        self.name.clone()
    }

    /// Encodes the next 20 ms of captured audio
    fn read_frame(&mut self) -> Option<MediaFrame> {
        let pcm = self.buffer.read_pcm_frame()?;
        let mut packet = [0u8; MAX_PACKET_SIZE];
        match self.encoder.encode_float(&pcm, &mut packet) {
            Ok(len) => Some(MediaFrame::new(packet[..len].to_vec(), FRAME_DURATION)),
            Err(e) => {
                tracing::warn!("Opus encoding failed: {}", e);
                None
            }
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.buffer.set_muted(muted);
        tracing::debug!("Microphone muted: {}", muted);
    }

    fn level(&self) -> Option<f32> {
        Some(self.buffer.level())
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("Audio capture stopped on {}", self.name);
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn map_build_error(err: BuildStreamError) -> MediaError {
    match err {
        BuildStreamError::BackendSpecific { err } if err.description.contains("ermission") => {
            MediaError::PermissionDenied(TrackKind::Audio)
        }
        other => MediaError::DeviceUnavailable {
            kind: TrackKind::Audio,
            reason: other.to_string(),
        },
    }
}

fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear resampling to the track rate
fn resample(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return data.to_vec();
    }
    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

fn find_best_input_config(device: &Device) -> Result<StreamConfig, MediaError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| MediaError::DeviceUnavailable {
            kind: TrackKind::Audio,
            reason: e.to_string(),
        })?;
    select_best_config(configs.collect())
}

/// Prefers F32 at 48 kHz, then any F32 rate.
fn select_best_config(configs: Vec<SupportedStreamConfigRange>) -> Result<StreamConfig, MediaError> {
    let target_rate = cpal::SampleRate(SAMPLE_RATE);

    let f32_configs = configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32);

    for config in f32_configs.clone() {
        if config.min_sample_rate() <= target_rate && config.max_sample_rate() >= target_rate {
            return Ok(config.clone().with_sample_rate(target_rate).into());
        }
    }

    if let Some(config) = f32_configs.last() {
        return Ok(config.clone().with_max_sample_rate().into());
    }

    Err(MediaError::DeviceUnavailable {
        kind: TrackKind::Audio,
        reason: "no f32 capture configuration".to_string(),
    })
}
