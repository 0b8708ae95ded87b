//! WAV decoding and encoding.
//!
//! Reads and writes WAV data using the hound crate.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};

/// A decoded audio buffer split into channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedAudio {
    pub sample_rate: u32,
    /// Number of frames (samples per channel).
    pub length: usize,
    /// Duration in seconds.
    pub duration: f32,
    pub number_of_channels: u16,
    pub channel_data: Vec<Vec<f32>>,
}

impl DecodedAudio {
    /// Downmixes all channels into one by averaging.
    pub fn mono(&self) -> Vec<f32> {
        if self.channel_data.len() == 1 {
            return self.channel_data[0].clone();
        }
        let channels = self.channel_data.len().max(1) as f32;
        (0..self.length)
            .map(|i| {
                self.channel_data
                    .iter()
                    .map(|c| c.get(i).copied().unwrap_or(0.0))
                    .sum::<f32>()
                    / channels
            })
            .collect()
    }
}

/// Decodes an in-memory WAV file.
///
/// Integer formats are scaled to [-1.0, 1.0].
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| DaemonError::invalid_audio(format!("Failed to read WAV header: {}", e)))?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(DaemonError::invalid_audio("WAV declares zero channels"));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| DaemonError::invalid_audio(format!("Failed to read sample: {}", e)))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| {
                    DaemonError::invalid_audio(format!("Failed to read sample: {}", e))
                })?
        }
    };

    let channels = spec.channels as usize;
    let length = interleaved.len() / channels;
    let mut channel_data = vec![Vec::with_capacity(length); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (channel, sample) in channel_data.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }

    Ok(DecodedAudio {
        sample_rate: spec.sample_rate,
        length,
        duration: samples_to_duration(length, spec.sample_rate),
        number_of_channels: spec.channels,
        channel_data,
    })
}

fn float_spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    }
}

fn write_frames<W>(writer: &mut WavWriter<W>, channels: &[Vec<f32>]) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
    for i in 0..frames {
        for channel in channels {
            let sample = channel.get(i).copied().unwrap_or(0.0);
            writer.write_sample(sample).map_err(|e| {
                DaemonError::invalid_audio(format!("Failed to write sample: {}", e))
            })?;
        }
    }
    Ok(())
}

/// Writes channel buffers to a 32-bit float WAV file.
pub fn write_wav(channels: &[Vec<f32>], path: &Path, sample_rate: u32) -> Result<()> {
    let mut writer = WavWriter::create(path, float_spec(channels.len() as u16, sample_rate))
        .map_err(|e| DaemonError::invalid_audio(format!("Failed to create WAV file: {}", e)))?;

    write_frames(&mut writer, channels)?;

    writer.finalize().map_err(|e| {
        DaemonError::invalid_audio(format!("Failed to finalize WAV file: {}", e))
    })?;

    Ok(())
}

/// Writes channel buffers to an in-memory 32-bit float WAV file.
pub fn write_wav_to_buffer(channels: &[Vec<f32>], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());

    {
        let mut writer =
            WavWriter::new(&mut cursor, float_spec(channels.len() as u16, sample_rate)).map_err(
                |e| DaemonError::invalid_audio(format!("Failed to create WAV writer: {}", e)),
            )?;
        write_frames(&mut writer, channels)?;
        writer.finalize().map_err(|e| {
            DaemonError::invalid_audio(format!("Failed to finalize WAV buffer: {}", e))
        })?;
    }

    Ok(cursor.into_inner())
}

/// Calculates the duration of audio in seconds from sample count.
pub fn samples_to_duration(sample_count: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f32 / sample_rate as f32
}
