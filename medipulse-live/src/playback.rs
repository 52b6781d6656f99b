//! Gap-free playback of response audio with barge-in support.
//!
//! Chunks arrive from the network at irregular intervals. Each one is
//! pinned to the end of the previous one on the output clock, so the
//! listener hears a continuous stream regardless of arrival jitter.

use crate::audio::{AudioFormat, SampleBuffer};
use crate::error::{LiveError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Identifies one scheduled buffer on an [`OutputStream`].
pub type VoiceId = u64;

/// A speaker that can be opened for scheduled playback.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Open an output context running at `format`.
    async fn open(&self, format: AudioFormat) -> Result<Box<dyn OutputStream>>;
}

/// An open output context with its own monotonic clock.
pub trait OutputStream: Send {
    /// Current clock time in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start at `start_at` seconds on the clock.
    fn schedule(&mut self, id: VoiceId, buffer: &SampleBuffer, start_at: f64) -> Result<()>;

    /// Stop a scheduled or playing buffer immediately.
    fn stop(&mut self, id: VoiceId) -> Result<()>;

    /// Release the output device.
    fn close(&mut self) -> Result<()>;
}

/// Where a buffer landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    /// Handle of the scheduled buffer.
    pub id: VoiceId,
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: f64,
    end: f64,
}

/// Schedules decoded response audio back to back on one output context.
pub struct PlaybackScheduler {
    output: Option<Box<dyn OutputStream>>,
    next_start_time: f64,
    active: BTreeMap<VoiceId, Span>,
    next_id: VoiceId,
}

impl PlaybackScheduler {
    /// Take ownership of an open output and start scheduling at its current time.
    pub fn new(output: Box<dyn OutputStream>) -> Self {
        let now = output.current_time();
        Self { output: Some(output), next_start_time: now, active: BTreeMap::new(), next_id: 0 }
    }

    /// Open `output` at 24 kHz mono and wrap it.
    pub async fn open(output: &dyn AudioOutput) -> Result<Self> {
        let stream = output.open(AudioFormat::pcm16_24khz()).await?;
        Ok(Self::new(stream))
    }

    /// Projected start of the next enqueued buffer.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Whether the output is still held.
    pub fn is_open(&self) -> bool {
        self.output.is_some()
    }

    /// Schedule `buffer` right after everything already queued.
    ///
    /// Starts at `max(next_start_time, now)` and advances `next_start_time`
    /// by the buffer's duration.
    pub fn enqueue(&mut self, buffer: &SampleBuffer) -> Result<ScheduledBuffer> {
        self.reap_finished();
        let output = self.output.as_mut().ok_or(LiveError::SessionClosed)?;

        let start = self.next_start_time.max(output.current_time());
        let end = start + buffer.duration();
        let id = self.next_id;
        output.schedule(id, buffer, start)?;

        self.next_id += 1;
        self.next_start_time = end;
        self.active.insert(id, Span { start, end });
        tracing::trace!(id, start, end, "Scheduled response audio");
        Ok(ScheduledBuffer { id, start, end })
    }

    /// Drop every buffer and snap the schedule back to now.
    ///
    /// Stops all active buffers even when some fail to stop.
    pub fn interrupt(&mut self) {
        let Some(output) = self.output.as_mut() else {
            self.active.clear();
            return;
        };
        let flushed = self.active.len();
        for (&id, _) in &self.active {
            if let Err(e) = output.stop(id) {
                tracing::warn!(id, error = %e, "Failed to stop buffer during interrupt");
            }
        }
        self.active.clear();
        self.next_start_time = output.current_time();
        tracing::debug!(flushed, "Playback interrupted");
    }

    /// Forget buffers whose end time has passed.
    pub fn reap_finished(&mut self) {
        let Some(output) = self.output.as_ref() else { return };
        let now = output.current_time();
        self.active.retain(|_, span| span.end > now);
    }

    /// Number of buffers still scheduled or playing.
    pub fn active_count(&mut self) -> usize {
        self.reap_finished();
        self.active.len()
    }

    /// Start times of the buffers still active, in schedule order.
    pub fn active_starts(&self) -> Vec<f64> {
        self.active.values().map(|span| span.start).collect()
    }

    /// Stop all buffers and release the output.
    ///
    /// Idempotent. Every buffer is stopped and the output closed even if an
    /// earlier step fails; the first failure is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(mut output) = self.output.take() else {
            self.active.clear();
            return Ok(());
        };
        let mut first_error = None;
        for (&id, _) in &self.active {
            if let Err(e) = output.stop(id) {
                tracing::warn!(id, error = %e, "Failed to stop buffer during shutdown");
                first_error.get_or_insert(e);
            }
        }
        self.active.clear();
        if let Err(e) = output.close() {
            tracing::warn!(error = %e, "Failed to close audio output");
            first_error.get_or_insert(e);
        }
        tracing::info!("Audio output released");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("open", &self.is_open())
            .field("next_start_time", &self.next_start_time)
            .field("active", &self.active.len())
            .finish()
    }
}
