//! Desktop audio backend built on `cpal`.
//!
//! `cpal` streams are not `Send`, so each opened stream lives on a dedicated
//! thread that owns it until shutdown is signalled. Devices run at their
//! default configuration; samples are converted to and from the session's
//! fixed mono rates with `rubato`, and from whatever sample format the
//! device defaults to.

mod input;
mod output;

pub use input::CpalInput;
pub use output::CpalOutput;

use crate::capture::classify_acquisition_error;
use crate::error::LiveError;
use cpal::traits::{DeviceTrait, HostTrait};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Input frames handed to the resampler per step.
const RESAMPLE_CHUNK: usize = 256;

/// Streaming mono resampler over `rubato`.
///
/// Input is buffered into fixed chunks, so the output only depends on the
/// total input, never on how it was split into blocks.
pub(crate) struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub(crate) fn new(from_rate: u32, to_rate: u32) -> Result<Self, LiveError> {
        if from_rate == to_rate {
            return Ok(Self { inner: None, pending: Vec::new() });
        }
        let ratio = to_rate.max(1) as f64 / from_rate.max(1) as f64;
        let inner = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
            .map_err(|e| LiveError::device(format!("cannot resample {from_rate} Hz to {to_rate} Hz: {e}")))?;
        Ok(Self { inner: Some(inner), pending: Vec::with_capacity(RESAMPLE_CHUNK * 2) })
    }

    /// Frames of latency the resampler adds at the start of its output.
    pub(crate) fn delay(&self) -> usize {
        self.inner.as_ref().map(|r| r.output_delay()).unwrap_or(0)
    }

    /// Resample one block, appending to `out`. State carries across blocks.
    pub(crate) fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), LiveError> {
        let Some(inner) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };
        self.pending.extend_from_slice(input);
        let mut consumed = 0;
        loop {
            let need = inner.input_frames_next();
            if self.pending.len() - consumed < need {
                break;
            }
            let chunk = &self.pending[consumed..consumed + need];
            let wave = inner.process(&[chunk], None).map_err(resample_error)?;
            out.extend_from_slice(&wave[0]);
            consumed += need;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    /// Push out whatever is buffered, padding the last chunk with silence.
    pub(crate) fn flush(&mut self, out: &mut Vec<f32>) -> Result<(), LiveError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };
        if !self.pending.is_empty() {
            let tail: &[&[f32]] = &[self.pending.as_slice()];
            let wave = inner.process_partial(Some(tail), None).map_err(resample_error)?;
            out.extend_from_slice(&wave[0]);
            self.pending.clear();
        }
        let wave = inner.process_partial::<&[f32]>(None, None).map_err(resample_error)?;
        out.extend_from_slice(&wave[0]);
        Ok(())
    }
}

fn resample_error(e: rubato::ResampleError) -> LiveError {
    LiveError::device(format!("resampling failed: {e}"))
}

/// Resample a whole buffer in one go.
///
/// The result spans exactly the input's duration at `to_rate`, so buffers
/// scheduled back to back stay gapless.
pub(crate) fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, LiveError> {
    if from_rate == to_rate || input.is_empty() {
        return Ok(input.to_vec());
    }
    let expected = (input.len() as f64 * to_rate as f64 / from_rate.max(1) as f64).round() as usize;
    let mut resampler = StreamResampler::new(from_rate, to_rate)?;
    let delay = resampler.delay();
    let mut out = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK * 2);
    resampler.process(input, &mut out)?;
    resampler.flush(&mut out)?;
    out.drain(..delay.min(out.len()));
    out.resize(expected, 0.0);
    Ok(out)
}

fn device_label(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "<unnamed>".to_string())
}

fn find_input_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, LiveError> {
    match name {
        None => host.default_input_device().ok_or_else(|| LiveError::device("no input device available")),
        Some(name) => host
            .input_devices()
            .map_err(|e| LiveError::device(format!("failed to enumerate input devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| LiveError::device(format!("input device not found: {}", name))),
    }
}

fn find_output_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, LiveError> {
    match name {
        None => host.default_output_device().ok_or_else(|| LiveError::device("no output device available")),
        Some(name) => host
            .output_devices()
            .map_err(|e| LiveError::device(format!("failed to enumerate output devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| LiveError::device(format!("output device not found: {}", name))),
    }
}

fn map_config_error(e: cpal::DefaultStreamConfigError) -> LiveError {
    match e {
        cpal::DefaultStreamConfigError::BackendSpecific { err } => classify_acquisition_error(&err.description),
        other => LiveError::device(format!("no usable stream config: {}", other)),
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> LiveError {
    match e {
        cpal::BuildStreamError::BackendSpecific { err } => classify_acquisition_error(&err.description),
        other => LiveError::device(format!("failed to build stream: {}", other)),
    }
}

fn map_play_error(e: cpal::PlayStreamError) -> LiveError {
    match e {
        cpal::PlayStreamError::BackendSpecific { err } => classify_acquisition_error(&err.description),
        other => LiveError::device(format!("failed to start stream: {}", other)),
    }
}
