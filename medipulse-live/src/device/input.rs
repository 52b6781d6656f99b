use super::{StreamResampler, device_label, find_input_device, map_build_error, map_config_error, map_play_error};
use crate::audio::AudioFormat;
use crate::capture::{AudioInput, InputStream};
use crate::error::{LiveError, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use tokio::sync::{mpsc, oneshot};

/// Sample blocks buffered between the device callback and the framing task.
const BLOCK_CAPACITY: usize = 64;

/// Microphone capture through the system's default (or a named) input device.
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    device_name: Option<String>,
}

impl CpalInput {
    /// Use the default input device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the input device with this exact name.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self { device_name: Some(name.into()) }
    }
}

#[async_trait]
impl AudioInput for CpalInput {
    async fn open(&self, format: AudioFormat) -> Result<InputStream> {
        let (block_tx, block_rx) = mpsc::channel(BLOCK_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let device_name = self.device_name.clone();
        let lost_tx = shutdown_tx.clone();

        std::thread::Builder::new()
            .name("medipulse-capture".into())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), format, block_tx, lost_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                // Blocks until released, the device fails, or every sender is gone.
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::info!("Microphone stream stopped");
            })
            .map_err(|e| LiveError::device(format!("failed to spawn capture thread: {}", e)))?;

        ready_rx
            .await
            .map_err(|_| LiveError::device("capture thread exited before starting"))??;

        let mut shutdown = Some(shutdown_tx);
        Ok(InputStream::new(block_rx, move || {
            if let Some(tx) = shutdown.take() {
                let _ = tx.send(());
            }
            Ok(())
        }))
    }
}

fn build_stream(
    device_name: Option<&str>,
    format: AudioFormat,
    blocks: mpsc::Sender<Vec<f32>>,
    lost: std::sync::mpsc::Sender<()>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = find_input_device(&host, device_name)?;
    let supported = device.default_input_config().map_err(map_config_error)?;
    let sample_format = supported.sample_format();
    let config = supported.config();
    let channels = config.channels.max(1) as usize;
    let device_rate = config.sample_rate.0;

    tracing::info!(
        device = %device_label(&device),
        device_rate,
        channels,
        ?sample_format,
        target_rate = format.sample_rate,
        "Opening microphone"
    );

    let resampler = StreamResampler::new(device_rate, format.sample_rate)?;
    let stream = match sample_format {
        SampleFormat::F32 => build_input::<f32>(&device, &config, resampler, blocks, lost),
        SampleFormat::I16 => build_input::<i16>(&device, &config, resampler, blocks, lost),
        SampleFormat::U16 => build_input::<u16>(&device, &config, resampler, blocks, lost),
        SampleFormat::I32 => build_input::<i32>(&device, &config, resampler, blocks, lost),
        other => Err(LiveError::device(format!("unsupported microphone sample format: {:?}", other))),
    }?;

    stream.play().map_err(map_play_error)?;
    Ok(stream)
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut resampler: StreamResampler,
    blocks: mpsc::Sender<Vec<f32>>,
    lost: std::sync::mpsc::Sender<()>,
) -> Result<cpal::Stream>
where
    T: SizedSample + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let mut mono = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                downmix(data, channels, &mut mono);
                let mut block = Vec::with_capacity(mono.len());
                if let Err(e) = resampler.process(&mono, &mut block) {
                    tracing::warn!(error = %e, "Dropping microphone block");
                    return;
                }
                if !block.is_empty() && blocks.try_send(block).is_err() {
                    tracing::trace!("Capture channel full, dropping block");
                }
            },
            move |err| {
                tracing::error!(error = %err, "Microphone stream error");
                let _ = lost.send(());
            },
            None,
        )
        .map_err(map_build_error)
}

/// Average interleaved device frames of any sample type into mono `f32`.
fn downmix<T>(data: &[T], channels: usize, mono: &mut Vec<f32>)
where
    T: SizedSample,
    f32: FromSample<T>,
{
    mono.clear();
    mono.extend(
        data.chunks(channels.max(1))
            .map(|frame| frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32),
    );
}
