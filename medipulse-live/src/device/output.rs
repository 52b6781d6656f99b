use super::{device_label, find_output_device, map_build_error, map_config_error, map_play_error, resample};
use crate::audio::{AudioFormat, SampleBuffer};
use crate::error::{LiveError, Result};
use crate::playback::{AudioOutput, OutputStream, VoiceId};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Speaker playback through the system's default (or a named) output device.
#[derive(Debug, Clone, Default)]
pub struct CpalOutput {
    device_name: Option<String>,
}

impl CpalOutput {
    /// Use the default output device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the output device with this exact name.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self { device_name: Some(name.into()) }
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    async fn open(&self, format: AudioFormat) -> Result<Box<dyn OutputStream>> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let device_name = self.device_name.clone();
        let shared = mixer.clone();

        std::thread::Builder::new()
            .name("medipulse-playback".into())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::info!("Speaker stream stopped");
            })
            .map_err(|e| LiveError::device(format!("failed to spawn playback thread: {}", e)))?;

        ready_rx
            .await
            .map_err(|_| LiveError::device("playback thread exited before starting"))??;

        Ok(Box::new(CpalOutputStream { mixer, source_rate: format.sample_rate, shutdown: Some(shutdown_tx) }))
    }
}

fn build_stream(device_name: Option<&str>, mixer: Arc<Mutex<Mixer>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = find_output_device(&host, device_name)?;
    let supported = device.default_output_config().map_err(map_config_error)?;
    let sample_format = supported.sample_format();
    let config = supported.config();
    let channels = config.channels.max(1) as usize;
    mixer.lock().device_rate = config.sample_rate.0;

    tracing::info!(
        device = %device_label(&device),
        device_rate = config.sample_rate.0,
        channels,
        ?sample_format,
        "Opening speaker"
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, mixer),
        SampleFormat::I16 => build_output::<i16>(&device, &config, mixer),
        SampleFormat::U16 => build_output::<u16>(&device, &config, mixer),
        SampleFormat::I32 => build_output::<i32>(&device, &config, mixer),
        other => Err(LiveError::device(format!("unsupported speaker sample format: {:?}", other))),
    }?;

    stream.play().map_err(map_play_error)?;
    Ok(stream)
}

fn build_output<T>(device: &cpal::Device, config: &cpal::StreamConfig, mixer: Arc<Mutex<Mixer>>) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + 'static,
{
    let channels = config.channels.max(1) as usize;
    let mut rendered: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                rendered.resize(data.len(), 0.0);
                mixer.lock().render(&mut rendered, channels);
                convert_into(data, &rendered);
            },
            |err| tracing::error!(error = %err, "Speaker stream error"),
            None,
        )
        .map_err(map_build_error)
}

/// Convert mixed `f32` samples into the device's sample type.
fn convert_into<T>(data: &mut [T], rendered: &[f32])
where
    T: SizedSample + FromSample<f32>,
{
    for (out, sample) in data.iter_mut().zip(rendered) {
        *out = T::from_sample(*sample);
    }
}

struct CpalOutputStream {
    mixer: Arc<Mutex<Mixer>>,
    source_rate: u32,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
}

impl OutputStream for CpalOutputStream {
    fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    fn schedule(&mut self, id: VoiceId, buffer: &SampleBuffer, start_at: f64) -> Result<()> {
        if self.shutdown.is_none() {
            return Err(LiveError::SessionClosed);
        }
        let samples = buffer.channel(0).unwrap_or_default();
        let rate = if buffer.sample_rate() == 0 { self.source_rate } else { buffer.sample_rate() };
        let device_rate = self.mixer.lock().device_rate;
        let samples = resample(samples, rate, device_rate)?;
        self.mixer.lock().schedule(id, samples, start_at);
        Ok(())
    }

    fn stop(&mut self, id: VoiceId) -> Result<()> {
        self.mixer.lock().stop(id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            self.mixer.lock().clear();
            let _ = tx.send(());
        }
        Ok(())
    }
}

impl Drop for CpalOutputStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[derive(Debug)]
struct Voice {
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums scheduled voices into device callback blocks.
///
/// Time advances only as the device pulls frames.
#[derive(Debug, Default)]
struct Mixer {
    device_rate: u32,
    rendered: u64,
    voices: BTreeMap<VoiceId, Voice>,
    scratch: Vec<f32>,
}

impl Mixer {
    fn current_time(&self) -> f64 {
        if self.device_rate == 0 {
            return 0.0;
        }
        self.rendered as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, id: VoiceId, samples: Vec<f32>, start_at: f64) {
        let start_frame = (start_at.max(0.0) * self.device_rate as f64).round() as u64;
        self.voices.insert(id, Voice { start_frame, samples });
    }

    fn stop(&mut self, id: VoiceId) {
        self.voices.remove(&id);
    }

    fn clear(&mut self) {
        self.voices.clear();
    }

    /// Fill one interleaved block and advance the clock.
    fn render(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        let block_start = self.rendered;
        let block_end = block_start + frames as u64;

        self.scratch.clear();
        self.scratch.resize(frames, 0.0);
        for voice in self.voices.values() {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for frame in from..to {
                self.scratch[(frame - block_start) as usize] += voice.samples[(frame - voice.start_frame) as usize];
            }
        }

        for (out, &sample) in data.chunks_mut(channels).zip(&self.scratch) {
            out.fill(sample.clamp(-1.0, 1.0));
        }
        self.rendered = block_end;
        self.voices.retain(|_, voice| voice.end_frame() > block_end);
    }
}
