//! Default task processor backed by the audio operations in [`dsp`](super::dsp).

use crate::pool::TaskProcessor;
use crate::types::{TaskOutput, TaskPayload};

use super::dsp;
use super::wav::decode_wav;

/// Runs every [`TaskPayload`] variant with the built-in audio operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioProcessor;

impl TaskProcessor for AudioProcessor {
    fn process(&self, payload: TaskPayload) -> Result<TaskOutput, String> {
        let output = match payload {
            TaskPayload::DecodeAudio { array_buffer } => {
                TaskOutput::DecodeAudio(decode_wav(&array_buffer).map_err(|e| e.message)?)
            }
            TaskPayload::GenerateWaveform {
                channel_data,
                options,
            } => TaskOutput::GenerateWaveform(
                dsp::generate_waveform(&channel_data, &options).map_err(|e| e.message)?,
            ),
            TaskPayload::CalculatePeaks {
                channel_data,
                options,
            } => TaskOutput::CalculatePeaks(
                dsp::calculate_peaks(&channel_data, &options).map_err(|e| e.message)?,
            ),
            TaskPayload::NormalizeAudio {
                channel_data,
                target_level,
            } => TaskOutput::NormalizeAudio(dsp::normalize(&channel_data, target_level)),
            TaskPayload::ApplyFade {
                channel_data,
                options,
            } => TaskOutput::ApplyFade(
                dsp::apply_fade(&channel_data, &options).map_err(|e| e.message)?,
            ),
            TaskPayload::MixTracks { tracks, options } => {
                TaskOutput::MixTracks(dsp::mix_tracks(&tracks, &options).map_err(|e| e.message)?)
            }
            TaskPayload::ProcessBatch { tasks } => {
                TaskOutput::ProcessBatch(dsp::process_batch(&tasks).map_err(|e| e.message)?)
            }
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav_to_buffer;
    use crate::types::TaskKind;

    #[test]
    fn decodes_wav_payload() {
        let wav = write_wav_to_buffer(&[vec![0.5, -0.5]], 22050).unwrap();
        let output = AudioProcessor
            .process(TaskPayload::DecodeAudio { array_buffer: wav })
            .unwrap();

        match output {
            TaskOutput::DecodeAudio(decoded) => {
                assert_eq!(decoded.sample_rate, 22050);
                assert_eq!(decoded.channel_data[0], vec![0.5, -0.5]);
            }
            other => panic!("unexpected output: {:?}", other.kind()),
        }
    }

    #[test]
    fn output_kind_matches_payload_kind() {
        let payload = TaskPayload::NormalizeAudio {
            channel_data: vec![0.1, 0.2],
            target_level: -3.0,
        };
        let kind = payload.kind();
        let output = AudioProcessor.process(payload).unwrap();
        assert_eq!(output.kind(), kind);
        assert_eq!(kind, TaskKind::NormalizeAudio);
    }

    #[test]
    fn invalid_input_reports_message() {
        let err = AudioProcessor
            .process(TaskPayload::DecodeAudio {
                array_buffer: vec![1, 2, 3],
            })
            .unwrap_err();
        assert!(err.contains("Invalid audio"));
    }

    #[test]
    fn oversized_mix_is_a_task_error() {
        let payload: TaskPayload = serde_json::from_value(serde_json::json!({
            "type": "mix-tracks",
            "data": {"tracks": [{"data": [0.5], "startTime": 1.0e7}]}
        }))
        .unwrap();

        let err = AudioProcessor.process(payload).unwrap_err();
        assert!(err.contains("exceeds"));
    }
}
