//! Worker task types.
//!
//! A task is one unit of background audio work. Its payload is tagged with
//! the operation type, so the same value travels unchanged from the RPC
//! surface, through the pool queue, to a worker thread.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audio::dsp::{
    BatchResult, BatchStep, FadeOptions, MixOptions, MixTrack, NormalizedAudio, Peak,
    PeakOptions, Waveform, WaveformOptions,
};
use crate::audio::DecodedAudio;

/// Process-unique task identifier.
///
/// Identifiers are allocated from a monotonically increasing counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Operation tag of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    DecodeAudio,
    GenerateWaveform,
    CalculatePeaks,
    NormalizeAudio,
    ApplyFade,
    MixTracks,
    ProcessBatch,
}

impl TaskKind {
    /// Returns the wire name of the task kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::DecodeAudio => "decode-audio",
            TaskKind::GenerateWaveform => "generate-waveform",
            TaskKind::CalculatePeaks => "calculate-peaks",
            TaskKind::NormalizeAudio => "normalize-audio",
            TaskKind::ApplyFade => "apply-fade",
            TaskKind::MixTracks => "mix-tracks",
            TaskKind::ProcessBatch => "process-batch",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Waiting for a free worker.
    Queued,
    /// Running on a worker.
    Dispatched,
    /// Failed once, waiting out the backoff before requeueing.
    Retrying,
    /// Result delivered.
    Completed,
    /// Failed with no retries left.
    Failed,
    /// Abandoned after the timeout fired.
    TimedOut,
    /// Cancelled by the caller.
    Cancelled,
}

impl TaskState {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::TimedOut | TaskState::Cancelled
        )
    }
}

/// Wraps raw bytes so they travel as base64 in JSON.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

fn default_target_level() -> f32 {
    -3.0
}

/// Input of a task, tagged with its operation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum TaskPayload {
    DecodeAudio {
        #[serde(with = "base64_bytes")]
        array_buffer: Vec<u8>,
    },
    GenerateWaveform {
        channel_data: Vec<f32>,
        #[serde(default)]
        options: WaveformOptions,
    },
    CalculatePeaks {
        channel_data: Vec<f32>,
        #[serde(default)]
        options: PeakOptions,
    },
    NormalizeAudio {
        channel_data: Vec<f32>,
        #[serde(default = "default_target_level")]
        target_level: f32,
    },
    ApplyFade {
        channel_data: Vec<f32>,
        #[serde(default)]
        options: FadeOptions,
    },
    MixTracks {
        tracks: Vec<MixTrack>,
        #[serde(default)]
        options: MixOptions,
    },
    ProcessBatch { tasks: Vec<BatchStep> },
}

impl TaskPayload {
    /// Returns the operation tag of this payload.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::DecodeAudio { .. } => TaskKind::DecodeAudio,
            TaskPayload::GenerateWaveform { .. } => TaskKind::GenerateWaveform,
            TaskPayload::CalculatePeaks { .. } => TaskKind::CalculatePeaks,
            TaskPayload::NormalizeAudio { .. } => TaskKind::NormalizeAudio,
            TaskPayload::ApplyFade { .. } => TaskKind::ApplyFade,
            TaskPayload::MixTracks { .. } => TaskKind::MixTracks,
            TaskPayload::ProcessBatch { .. } => TaskKind::ProcessBatch,
        }
    }
}

/// Result of a task, tagged with its operation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum TaskOutput {
    DecodeAudio(DecodedAudio),
    GenerateWaveform(Waveform),
    CalculatePeaks(Vec<Peak>),
    NormalizeAudio(NormalizedAudio),
    ApplyFade(Vec<f32>),
    MixTracks(Vec<f32>),
    ProcessBatch(Vec<BatchResult>),
}

impl TaskOutput {
    /// Returns the operation tag of this output.
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskOutput::DecodeAudio(_) => TaskKind::DecodeAudio,
            TaskOutput::GenerateWaveform(_) => TaskKind::GenerateWaveform,
            TaskOutput::CalculatePeaks(_) => TaskKind::CalculatePeaks,
            TaskOutput::NormalizeAudio(_) => TaskKind::NormalizeAudio,
            TaskOutput::ApplyFade(_) => TaskKind::ApplyFade,
            TaskOutput::MixTracks(_) => TaskKind::MixTracks,
            TaskOutput::ProcessBatch(_) => TaskKind::ProcessBatch,
        }
    }
}

/// What a submitter receives when a task completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub output: TaskOutput,
    /// Number of retries consumed before success.
    pub retry_count: u32,
    /// Wall time of the successful attempt.
    pub processing_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_terminal() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::TimedOut.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Dispatched.is_terminal());
        assert!(!TaskState::Retrying.is_terminal());
    }

    #[test]
    fn task_id_display() {
        assert_eq!(TaskId(12).to_string(), "task-12");
    }

    #[test]
    fn payload_wire_format() {
        let payload: TaskPayload = serde_json::from_value(serde_json::json!({
            "type": "normalize-audio",
            "data": { "channelData": [0.5, -0.25] }
        }))
        .unwrap();

        assert_eq!(payload.kind(), TaskKind::NormalizeAudio);
        assert_eq!(
            payload,
            TaskPayload::NormalizeAudio {
                channel_data: vec![0.5, -0.25],
                target_level: -3.0,
            }
        );
    }

    #[test]
    fn decode_payload_uses_base64() {
        let payload = TaskPayload::DecodeAudio {
            array_buffer: b"RIFF".to_vec(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "decode-audio");
        assert_eq!(json["data"]["arrayBuffer"], "UklGRg==");

        let back: TaskPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&TaskKind::MixTracks).unwrap(),
            "\"mix-tracks\""
        );
        assert_eq!(TaskKind::ProcessBatch.as_str(), "process-batch");
    }
}
