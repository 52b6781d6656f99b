//! Audio formats and the PCM wire codec.
//!
//! Microphone audio travels upstream as 16 kHz mono signed 16-bit
//! little-endian PCM, base64-armored and tagged `audio/pcm;rate=16000`.
//! Synthesized speech comes back as 24 kHz mono PCM in the same encoding.
//! Internally all audio is `f32` in `[-1, 1]`.

use crate::error::{LiveError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Sample rate of captured microphone audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized response audio.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// MIME-style tag attached to every outbound audio frame.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

const PCM_SCALE: f32 = 32768.0;

/// Complete audio format specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono).
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// Create a new audio format specification.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }

    /// Mono 16 kHz, the microphone capture format.
    pub fn pcm16_16khz() -> Self {
        Self { sample_rate: INPUT_SAMPLE_RATE, channels: 1 }
    }

    /// Mono 24 kHz, the response playback format.
    pub fn pcm16_24khz() -> Self {
        Self { sample_rate: OUTPUT_SAMPLE_RATE, channels: 1 }
    }

    /// Calculate bytes per second of 16-bit PCM in this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * 2
    }
}

/// An encoded audio frame ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmPayload {
    /// MIME-style format tag.
    pub mime_type: String,
    /// Base64 of the little-endian PCM16 bytes.
    pub data: String,
}

/// Decoded audio, one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// Build a mono buffer.
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self { sample_rate, channels: vec![samples] }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Number of sample frames.
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Whether the buffer holds no audio.
    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

/// Quantize one `[-1, 1]` sample to signed 16-bit.
///
/// Out-of-range input saturates; NaN maps to silence.
pub fn quantize(sample: f32) -> i16 {
    (sample * PCM_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Map a signed 16-bit sample back into `[-1, 1]`.
pub fn dequantize(sample: i16) -> f32 {
    sample as f32 / PCM_SCALE
}

/// Encode captured samples as a base64 PCM16 payload tagged for 16 kHz mono.
pub fn encode_frame(samples: &[f32]) -> PcmPayload {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    PcmPayload {
        mime_type: INPUT_MIME_TYPE.to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    }
}

/// Decode a base64 PCM16 payload into per-channel float samples.
///
/// Interleaved input is split by `channel_count`; a trailing partial frame
/// is discarded.
pub fn decode_payload(data: &str, sample_rate: u32, channel_count: u16) -> Result<SampleBuffer> {
    if channel_count == 0 {
        return Err(LiveError::decode("channel count must be at least 1"));
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
    if bytes.len() % 2 != 0 {
        return Err(LiveError::decode(format!(
            "invalid data length for PCM16: {} (must be even)",
            bytes.len()
        )));
    }

    let channels = channel_count as usize;
    let frames = bytes.len() / 2 / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];
    for (i, pair) in bytes.chunks_exact(2).take(frames * channels).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % channels].push(dequantize(sample));
    }
    Ok(SampleBuffer { sample_rate, channels: out })
}

/// Root-mean-square level of a block of samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_bytes_per_second() {
        assert_eq!(AudioFormat::pcm16_24khz().bytes_per_second(), 48000);
        assert_eq!(AudioFormat::pcm16_16khz().bytes_per_second(), 32000);
    }

    #[test]
    fn test_quantize_saturates() {
        assert_eq!(quantize(1.0), i16::MAX);
        assert_eq!(quantize(-1.0), i16::MIN);
        assert_eq!(quantize(2.5), i16::MAX);
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn test_encode_frame_layout() {
        let payload = encode_frame(&[0.0, -1.0, 0.5]);
        assert_eq!(payload.mime_type, "audio/pcm;rate=16000");
        let bytes = base64::engine::general_purpose::STANDARD.decode(&payload.data).unwrap();
        // 0, -32768, 16384 little-endian
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x80, 0x00, 0x40]);
    }

    #[test]
    fn test_decode_stereo_deinterleaves() {
        let raw: Vec<u8> = [16384i16, -16384, 8192, -8192]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let data = base64::engine::general_purpose::STANDARD.encode(raw);
        let buffer = decode_payload(&data, OUTPUT_SAMPLE_RATE, 2).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.channel(0).unwrap(), &[0.5, 0.25]);
        assert_eq!(buffer.channel(1).unwrap(), &[-0.5, -0.25]);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode_payload("@@not base64@@", OUTPUT_SAMPLE_RATE, 1).unwrap_err();
        assert!(matches!(err, LiveError::DecodeError(_)));
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let data = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        assert!(decode_payload(&data, OUTPUT_SAMPLE_RATE, 1).is_err());
    }

    #[test]
    fn test_decode_duration() {
        let payload = encode_frame(&vec![0.1; 2400]);
        let buffer = decode_payload(&payload.data, OUTPUT_SAMPLE_RATE, 1).unwrap();
        assert!((buffer.duration() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }
}
