//! Audio processing module.
//!
//! Provides WAV decoding/encoding, the sample-level operations executed by
//! the worker pool, and the processor that maps task payloads onto them.

pub mod dsp;
pub mod processor;
pub mod wav;

// Re-export commonly used items
pub use processor::AudioProcessor;
pub use wav::{decode_wav, samples_to_duration, write_wav, write_wav_to_buffer, DecodedAudio};
