//! Microphone capture pipeline.
//!
//! An [`AudioInput`] hands back raw sample blocks of whatever size the
//! device produces. [`CapturePipeline`] runs a task that re-slices them
//! into fixed-length frames, measures each frame's RMS level and encodes
//! it for the wire. Frames are forwarded through a bounded channel; when
//! the consumer falls behind, new frames are dropped rather than queued.

use crate::audio::{self, AudioFormat, PcmPayload};
use crate::error::{LiveError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A microphone that can be opened for exclusive capture.
#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Acquire the device and start delivering sample blocks.
    ///
    /// Fails with [`LiveError::PermissionDenied`] when access is refused
    /// and [`LiveError::DeviceError`] for any other acquisition failure.
    async fn open(&self, format: AudioFormat) -> Result<InputStream>;
}

/// Releases a device acquired by [`AudioInput::open`].
pub trait InputHandle: Send {
    /// Release the device. Called at most once.
    fn release(&mut self) -> Result<()>;
}

impl<F> InputHandle for F
where
    F: FnMut() -> Result<()> + Send,
{
    fn release(&mut self) -> Result<()> {
        self()
    }
}

/// A live microphone stream: sample blocks plus the handle that stops them.
pub struct InputStream {
    samples: mpsc::Receiver<Vec<f32>>,
    handle: Box<dyn InputHandle>,
}

impl InputStream {
    /// Create a stream from a sample receiver and its release handle.
    pub fn new(samples: mpsc::Receiver<Vec<f32>>, handle: impl InputHandle + 'static) -> Self {
        Self { samples, handle: Box::new(handle) }
    }
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream").finish_non_exhaustive()
    }
}

/// One captured, encoded frame.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Position of this frame in capture order, starting at 0.
    pub sequence: u64,
    /// RMS level of the raw samples.
    pub volume: f32,
    /// The frame encoded for transmission.
    pub payload: PcmPayload,
}

/// Re-slices arbitrarily sized sample blocks into fixed-length frames.
#[derive(Debug, Clone)]
pub struct FrameSlicer {
    buffer: Vec<f32>,
    frame_len: usize,
}

impl FrameSlicer {
    /// Create a slicer emitting frames of `frame_len` samples.
    pub fn new(frame_len: usize) -> Self {
        Self { buffer: Vec::with_capacity(frame_len * 2), frame_len: frame_len.max(1) }
    }

    /// Push new samples into the slicer.
    pub fn push(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
    }

    /// Take the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<f32>> {
        if self.buffer.len() < self.frame_len {
            return None;
        }
        let rest = self.buffer.split_off(self.frame_len);
        Some(std::mem::replace(&mut self.buffer, rest))
    }

    /// Number of samples waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Exponential smoothing of frame levels for a visualizer.
///
/// Each observation contributes 20%, the previous level 80%.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeMeter {
    level: f32,
}

impl VolumeMeter {
    const PRIOR_WEIGHT: f32 = 0.8;
    const SAMPLE_WEIGHT: f32 = 0.2;

    /// Create a meter at silence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one RMS observation and return the smoothed level in `[0, 1]`.
    pub fn observe(&mut self, rms: f32) -> f32 {
        let sample = if rms.is_finite() { rms.clamp(0.0, 1.0) } else { 0.0 };
        self.level = (self.level * Self::PRIOR_WEIGHT + sample * Self::SAMPLE_WEIGHT).clamp(0.0, 1.0);
        self.level
    }

    /// Current smoothed level.
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Return to silence.
    pub fn reset(&mut self) {
        self.level = 0.0;
    }
}

/// A running capture: owns the device handle and the framing task.
pub struct CapturePipeline {
    handle: Option<Box<dyn InputHandle>>,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Acquire `input` at 16 kHz mono and start producing frames.
    ///
    /// Returns the pipeline and the receiving end of its frame channel.
    pub async fn start(
        input: &dyn AudioInput,
        frame_samples: usize,
        capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<CapturedFrame>)> {
        let InputStream { samples, handle } = input.open(AudioFormat::pcm16_16khz()).await?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_framing(samples, tx, FrameSlicer::new(frame_samples)));
        tracing::info!(frame_samples, "Microphone capture started");
        Ok((Self { handle: Some(handle), task: Some(task) }, rx))
    }

    /// Whether the device is still held.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Release the device and stop framing.
    ///
    /// Safe to call any number of times; only the first call does work.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        match self.handle.take() {
            Some(mut handle) => {
                tracing::info!("Releasing microphone");
                handle.release()
            }
            None => Ok(()),
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Failed to release microphone on drop");
        }
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline").field("running", &self.is_running()).finish()
    }
}

async fn run_framing(
    mut samples: mpsc::Receiver<Vec<f32>>,
    frames: mpsc::Sender<CapturedFrame>,
    mut slicer: FrameSlicer,
) {
    let mut sequence = 0u64;
    while let Some(block) = samples.recv().await {
        slicer.push(&block);
        while let Some(frame) = slicer.next_frame() {
            let captured = CapturedFrame {
                sequence,
                volume: audio::rms(&frame),
                payload: audio::encode_frame(&frame),
            };
            sequence += 1;
            match frames.try_send(captured) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    tracing::debug!(sequence = dropped.sequence, "Frame channel full, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }
    tracing::debug!("Microphone stream ended");
}

/// Map an acquisition failure reported as free text to the right variant.
pub fn classify_acquisition_error(message: &str) -> LiveError {
    let lower = message.to_ascii_lowercase();
    let denied = ["permission", "denied", "not allowed", "notallowederror", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle));
    if denied { LiveError::permission(message) } else { LiveError::device(message) }
}
