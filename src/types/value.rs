//! Cache categories and payload values.
//!
//! A cached value is identified by a [`CacheCategory`] plus a caller-supplied
//! key, and carries one of three payload shapes: raw bytes, f32 samples, or
//! a JSON document.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Namespace of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheCategory {
    /// Rendered waveform peaks.
    Waveforms,
    /// Decoded audio buffers.
    AudioData,
    /// Effect and mix presets.
    Presets,
    /// Arbitrary editor metadata.
    Metadata,
}

impl CacheCategory {
    /// All categories, in storage order.
    pub const ALL: [CacheCategory; 4] = [
        CacheCategory::Waveforms,
        CacheCategory::AudioData,
        CacheCategory::Presets,
        CacheCategory::Metadata,
    ];

    /// Returns the wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Waveforms => "waveforms",
            CacheCategory::AudioData => "audioData",
            CacheCategory::Presets => "presets",
            CacheCategory::Metadata => "metadata",
        }
    }

    /// Parses a category from its wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waveforms" => Some(CacheCategory::Waveforms),
            "audioData" | "audio_data" => Some(CacheCategory::AudioData),
            "presets" => Some(CacheCategory::Presets),
            "metadata" => Some(CacheCategory::Metadata),
            _ => None,
        }
    }

    /// Builds the composite memory-tier key `"{category}:{key}"`.
    pub fn composite_key(&self, key: &str) -> String {
        format!("{}:{}", self.as_str(), key)
    }
}

impl std::fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload shape tag, stored alongside persistent records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bytes,
    Samples,
    Json,
}

/// An opaque cached payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum CacheValue {
    /// Raw binary buffer.
    Bytes(Vec<u8>),
    /// Typed numeric array of audio samples.
    Samples(Vec<f32>),
    /// JSON-serializable object.
    Json(serde_json::Value),
}

impl CacheValue {
    /// Returns the payload shape.
    pub fn kind(&self) -> ValueKind {
        match self {
            CacheValue::Bytes(_) => ValueKind::Bytes,
            CacheValue::Samples(_) => ValueKind::Samples,
            CacheValue::Json(_) => ValueKind::Json,
        }
    }

    /// Size used for memory accounting: byte length for buffers, four bytes
    /// per sample, serialized length for JSON.
    pub fn size_bytes(&self) -> u64 {
        match self {
            CacheValue::Bytes(b) => b.len() as u64,
            CacheValue::Samples(s) => (s.len() * std::mem::size_of::<f32>()) as u64,
            CacheValue::Json(v) => serde_json::to_vec(v).map(|b| b.len() as u64).unwrap_or(0),
        }
    }

    /// Serializes the payload to bytes for persistent storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            CacheValue::Bytes(b) => b.clone(),
            CacheValue::Samples(s) => s.iter().flat_map(|x| x.to_le_bytes()).collect(),
            CacheValue::Json(v) => serde_json::to_vec(v).unwrap_or_default(),
        }
    }

    /// Rebuilds a payload from stored bytes.
    ///
    /// Returns an error message if the bytes do not match the kind.
    pub fn from_bytes(kind: ValueKind, bytes: Vec<u8>) -> Result<Self, String> {
        match kind {
            ValueKind::Bytes => Ok(CacheValue::Bytes(bytes)),
            ValueKind::Samples => {
                if bytes.len() % 4 != 0 {
                    return Err(format!(
                        "sample buffer length {} is not a multiple of 4",
                        bytes.len()
                    ));
                }
                Ok(CacheValue::Samples(
                    bytes
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                ))
            }
            ValueKind::Json => serde_json::from_slice(&bytes)
                .map(CacheValue::Json)
                .map_err(|e| format!("invalid JSON payload: {}", e)),
        }
    }

    /// Returns the JSON document if this is a JSON value.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            CacheValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Computes a content fingerprint for deduplicating audio inputs.
///
/// The fingerprint is the full SHA256 of the input, hex encoded, so equal
/// buffers always map to the same cache key.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
