//! Sample-level audio operations run by the worker pool.
//!
//! Every function here is pure: it takes channel data plus options and
//! returns new data, so it can run on any worker thread.

use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};

/// Sample rate assumed when a request does not carry one.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Longest mix output accepted, in seconds of audio.
pub const MAX_MIX_SECONDS: usize = 3600;

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_width() -> usize {
    1000
}

fn default_height() -> f32 {
    100.0
}

fn default_true() -> bool {
    true
}

fn default_threshold_db() -> f32 {
    -20.0
}

fn default_window_size() -> usize {
    1024
}

fn default_target_level() -> f32 {
    -3.0
}

fn default_volume() -> f32 {
    1.0
}

/// Options for waveform rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveformOptions {
    /// Number of buckets (pixels) to produce.
    #[serde(default = "default_width")]
    pub width: usize,
    /// Scale applied to min/max when `normalize` is set.
    #[serde(default = "default_height")]
    pub height: f32,
    /// Scale peaks by `height`.
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for WaveformOptions {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            normalize: true,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Min/max pair for one waveform bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformPeak {
    pub min: f32,
    pub max: f32,
}

/// Rendered waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    pub peaks: Vec<WaveformPeak>,
    pub width: usize,
    pub height: f32,
    /// Duration of the source in seconds.
    pub duration: f32,
}

/// Options for RMS peak detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakOptions {
    /// Minimum RMS level in dBFS for a window to be reported.
    #[serde(default = "default_threshold_db")]
    pub threshold: f32,
    /// Window length in samples.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for PeakOptions {
    fn default() -> Self {
        Self {
            threshold: default_threshold_db(),
            window_size: default_window_size(),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// A window whose RMS exceeded the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Window start in seconds.
    pub time: f32,
    /// Linear RMS amplitude.
    pub amplitude: f32,
    pub db: f32,
}

/// Result of peak normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedAudio {
    pub normalized_data: Vec<f32>,
    pub applied_gain: f32,
    pub gain_db: f32,
}

/// Fade curve shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FadeCurve {
    #[default]
    Linear,
    /// Quadratic (x²).
    Exponential,
    /// Square root (√x).
    Logarithmic,
}

impl FadeCurve {
    fn shape(&self, x: f32) -> f32 {
        match self {
            FadeCurve::Linear => x,
            FadeCurve::Exponential => x * x,
            FadeCurve::Logarithmic => x.sqrt(),
        }
    }
}

/// Options for fade-in/fade-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FadeOptions {
    /// Fade-in length in seconds.
    #[serde(default)]
    pub fade_in_duration: f32,
    /// Fade-out length in seconds.
    #[serde(default)]
    pub fade_out_duration: f32,
    #[serde(default)]
    pub fade_type: FadeCurve,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for FadeOptions {
    fn default() -> Self {
        Self {
            fade_in_duration: 0.0,
            fade_out_duration: 0.0,
            fade_type: FadeCurve::Linear,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// One input track of a mix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixTrack {
    pub data: Vec<f32>,
    #[serde(default = "default_volume")]
    pub volume: f32,
    /// Offset of the track in the output, in seconds.
    #[serde(default)]
    pub start_time: f32,
    /// Stereo position in [-1, 1]; off-center tracks are attenuated.
    #[serde(default)]
    pub pan: f32,
}

/// Options for mixing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixOptions {
    /// Output length in samples; defaults to the end of the last track.
    #[serde(default)]
    pub output_length: Option<usize>,
    #[serde(default = "default_volume")]
    pub master_volume: f32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for MixOptions {
    fn default() -> Self {
        Self {
            output_length: None,
            master_volume: 1.0,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// One step of a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum BatchStep {
    /// Multiply every sample by `gain`.
    Volume { data: Vec<f32>, gain: f32 },
    /// Peak-normalize to `target_level` dBFS.
    Normalize {
        data: Vec<f32>,
        #[serde(default = "default_target_level")]
        target_level: f32,
    },
    /// Apply a fade.
    Fade {
        data: Vec<f32>,
        #[serde(default)]
        options: FadeOptions,
    },
}

impl BatchStep {
    fn name(&self) -> &'static str {
        match self {
            BatchStep::Volume { .. } => "volume",
            BatchStep::Normalize { .. } => "normalize",
            BatchStep::Fade { .. } => "fade",
        }
    }
}

/// Output of one batch step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub task_type: String,
    pub data: Vec<f32>,
}

/// Converts dBFS to a linear factor.
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Converts a linear factor to dBFS.
pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.log10()
}

/// Renders min/max peaks for `options.width` equal buckets.
///
/// Buckets hold `len / width` samples each, so the trailing `len % width`
/// samples are not rendered and a width larger than the input yields
/// all-zero buckets.
pub fn generate_waveform(data: &[f32], options: &WaveformOptions) -> Result<Waveform> {
    if options.width == 0 {
        return Err(DaemonError::invalid_payload("waveform width must be > 0"));
    }
    if options.sample_rate == 0 {
        return Err(DaemonError::invalid_payload("sample rate must be > 0"));
    }

    let samples = data.len();
    let block_size = samples / options.width;
    let scale = if options.normalize { options.height } else { 1.0 };

    let peaks = (0..options.width)
        .map(|i| {
            let start = i * block_size;
            let end = (start + block_size).min(samples);
            let (min, max) = data[start.min(samples)..end]
                .iter()
                .fold((0f32, 0f32), |(lo, hi), &s| (lo.min(s), hi.max(s)));
            WaveformPeak {
                min: min * scale,
                max: max * scale,
            }
        })
        .collect();

    Ok(Waveform {
        peaks,
        width: options.width,
        height: options.height,
        duration: samples as f32 / options.sample_rate as f32,
    })
}

/// Reports every window whose RMS level is above the threshold.
pub fn calculate_peaks(data: &[f32], options: &PeakOptions) -> Result<Vec<Peak>> {
    if options.window_size == 0 {
        return Err(DaemonError::invalid_payload("window size must be > 0"));
    }
    if options.sample_rate == 0 {
        return Err(DaemonError::invalid_payload("sample rate must be > 0"));
    }

    let threshold = db_to_linear(options.threshold);

    Ok(data
        .chunks(options.window_size)
        .enumerate()
        .filter_map(|(i, window)| {
            let sum: f32 = window.iter().map(|s| s * s).sum();
            let rms = (sum / window.len() as f32).sqrt();
            (rms > threshold).then(|| Peak {
                time: (i * options.window_size) as f32 / options.sample_rate as f32,
                amplitude: rms,
                db: linear_to_db(rms),
            })
        })
        .collect())
}

/// Scales the buffer so its absolute peak lands on `target_level` dBFS.
///
/// Silent input is returned unchanged with unity gain.
pub fn normalize(data: &[f32], target_level: f32) -> NormalizedAudio {
    let max_amplitude = data.iter().fold(0f32, |acc, s| acc.max(s.abs()));
    let gain = if max_amplitude > 0.0 {
        db_to_linear(target_level) / max_amplitude
    } else {
        1.0
    };

    NormalizedAudio {
        normalized_data: data.iter().map(|s| s * gain).collect(),
        applied_gain: gain,
        gain_db: linear_to_db(gain),
    }
}

/// Applies fade-in and fade-out envelopes.
pub fn apply_fade(data: &[f32], options: &FadeOptions) -> Result<Vec<f32>> {
    if options.fade_in_duration < 0.0 || options.fade_out_duration < 0.0 {
        return Err(DaemonError::invalid_payload("fade durations must be >= 0"));
    }

    let total = data.len();
    let fade_in = (options.fade_in_duration * options.sample_rate as f32) as usize;
    let fade_out = (options.fade_out_duration * options.sample_rate as f32) as usize;
    let mut out = data.to_vec();

    for (i, sample) in out.iter_mut().enumerate().take(fade_in.min(total)) {
        *sample *= options.fade_type.shape(i as f32 / fade_in as f32);
    }

    if fade_out > 0 {
        let start = total.saturating_sub(fade_out);
        for (i, sample) in out.iter_mut().enumerate().skip(start) {
            *sample *= options.fade_type.shape((total - i) as f32 / fade_out as f32);
        }
    }

    Ok(out)
}

/// Sums tracks into a single buffer.
///
/// The output may hold at most [`MAX_MIX_SECONDS`] of audio; longer
/// requests, or start times that are not finite, are rejected.
pub fn mix_tracks(tracks: &[MixTrack], options: &MixOptions) -> Result<Vec<f32>> {
    if tracks.is_empty() {
        return Err(DaemonError::invalid_payload("mix requires at least one track"));
    }
    if options.sample_rate == 0 {
        return Err(DaemonError::invalid_payload("sample rate must be > 0"));
    }

    let limit = (options.sample_rate as usize).saturating_mul(MAX_MIX_SECONDS);
    let too_long = || {
        DaemonError::invalid_payload(format!(
            "mix output exceeds {} seconds",
            MAX_MIX_SECONDS
        ))
    };

    let mut offsets = Vec::with_capacity(tracks.len());
    let mut longest = 0usize;
    for track in tracks {
        if !track.start_time.is_finite() || track.start_time < 0.0 {
            return Err(DaemonError::invalid_payload(
                "track start time must be a finite value >= 0",
            ));
        }
        let offset = (track.start_time as f64 * options.sample_rate as f64).floor();
        if offset > limit as f64 {
            return Err(too_long());
        }
        let offset = offset as usize;
        let end = offset.checked_add(track.data.len()).ok_or_else(too_long)?;
        longest = longest.max(end);
        offsets.push(offset);
    }

    let output_length = options.output_length.unwrap_or(longest);
    if output_length > limit {
        return Err(too_long());
    }

    let mut mixed = Vec::new();
    mixed
        .try_reserve_exact(output_length)
        .map_err(|e| DaemonError::invalid_payload(format!("cannot allocate mix buffer: {}", e)))?;
    mixed.resize(output_length, 0f32);

    for (track, &start) in tracks.iter().zip(&offsets) {
        let attenuation = 1.0 - track.pan.abs().min(1.0);
        let gain = track.volume * attenuation;
        for (out, sample) in mixed.iter_mut().skip(start).zip(&track.data) {
            *out += sample * gain;
        }
    }

    for sample in mixed.iter_mut() {
        *sample *= options.master_volume;
    }

    Ok(mixed)
}

/// Runs each batch step in order, collecting one result per step.
pub fn process_batch(steps: &[BatchStep]) -> Result<Vec<BatchResult>> {
    steps
        .iter()
        .map(|step| {
            let data = match step {
                BatchStep::Volume { data, gain } => data.iter().map(|s| s * gain).collect(),
                BatchStep::Normalize { data, target_level } => {
                    normalize(data, *target_level).normalized_data
                }
                BatchStep::Fade { data, options } => apply_fade(data, options)?,
            };
            Ok(BatchResult {
                task_type: step.name().to_string(),
                data,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn waveform_buckets_min_max() {
        let data = vec![0.1, -0.5, 0.9, -0.2];
        let options = WaveformOptions {
            width: 2,
            height: 10.0,
            normalize: true,
            sample_rate: 4,
        };
        let waveform = generate_waveform(&data, &options).unwrap();
        assert_eq!(waveform.peaks.len(), 2);
        assert!(approx(waveform.peaks[0].min, -5.0));
        assert!(approx(waveform.peaks[0].max, 1.0));
        assert!(approx(waveform.peaks[1].min, -2.0));
        assert!(approx(waveform.peaks[1].max, 9.0));
        assert!(approx(waveform.duration, 1.0));
    }

    #[test]
    fn waveform_shorter_than_width_is_flat() {
        let options = WaveformOptions::default();
        let waveform = generate_waveform(&[0.5; 10], &options).unwrap();
        assert_eq!(waveform.peaks.len(), 1000);
        assert!(waveform.peaks.iter().all(|p| p.min == 0.0 && p.max == 0.0));
    }

    #[test]
    fn waveform_zero_width_rejected() {
        let options = WaveformOptions {
            width: 0,
            ..Default::default()
        };
        assert!(generate_waveform(&[0.0], &options).is_err());
    }

    #[test]
    fn peaks_above_threshold_only() {
        let mut data = vec![0.0f32; 4];
        data.extend(vec![0.5f32; 4]);
        let options = PeakOptions {
            threshold: -20.0,
            window_size: 4,
            sample_rate: 4,
        };
        let peaks = calculate_peaks(&data, &options).unwrap();
        assert_eq!(peaks.len(), 1);
        assert!(approx(peaks[0].time, 1.0));
        assert!(approx(peaks[0].amplitude, 0.5));
        assert!(approx(peaks[0].db, linear_to_db(0.5)));
    }

    #[test]
    fn normalize_hits_target() {
        let result = normalize(&[0.25, -0.5, 0.1], 0.0);
        assert!(approx(result.applied_gain, 2.0));
        assert!(approx(result.normalized_data[1], -1.0));
        assert!(approx(result.gain_db, linear_to_db(2.0)));
    }

    #[test]
    fn normalize_silence_keeps_unity_gain() {
        let result = normalize(&[0.0, 0.0], -3.0);
        assert_eq!(result.applied_gain, 1.0);
        assert_eq!(result.normalized_data, vec![0.0, 0.0]);
    }

    #[test]
    fn linear_fade_in_and_out() {
        let options = FadeOptions {
            fade_in_duration: 1.0,
            fade_out_duration: 1.0,
            fade_type: FadeCurve::Linear,
            sample_rate: 4,
        };
        let out = apply_fade(&[1.0; 8], &options).unwrap();
        assert_eq!(out[..4], [0.0, 0.25, 0.5, 0.75]);
        assert_eq!(out[4..], [1.0, 0.75, 0.5, 0.25]);
    }

    #[test]
    fn exponential_fade_curve() {
        let options = FadeOptions {
            fade_in_duration: 1.0,
            fade_type: FadeCurve::Exponential,
            sample_rate: 2,
            ..Default::default()
        };
        let out = apply_fade(&[1.0; 4], &options).unwrap();
        assert_eq!(out, vec![0.0, 0.25, 1.0, 1.0]);
    }

    #[test]
    fn negative_fade_rejected() {
        let options = FadeOptions {
            fade_in_duration: -1.0,
            ..Default::default()
        };
        assert!(apply_fade(&[1.0], &options).is_err());
    }

    #[test]
    fn mix_offsets_and_volumes() {
        let tracks = vec![
            MixTrack {
                data: vec![1.0, 1.0, 1.0, 1.0],
                volume: 0.5,
                start_time: 0.0,
                pan: 0.0,
            },
            MixTrack {
                data: vec![1.0, 1.0],
                volume: 1.0,
                start_time: 1.0,
                pan: 0.5,
            },
        ];
        let options = MixOptions {
            sample_rate: 2,
            master_volume: 2.0,
            ..Default::default()
        };
        let mixed = mix_tracks(&tracks, &options).unwrap();
        assert_eq!(mixed, vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn mix_truncates_to_output_length() {
        let tracks = vec![MixTrack {
            data: vec![1.0; 10],
            volume: 1.0,
            start_time: 0.0,
            pan: 0.0,
        }];
        let options = MixOptions {
            output_length: Some(3),
            ..Default::default()
        };
        assert_eq!(mix_tracks(&tracks, &options).unwrap().len(), 3);
    }

    #[test]
    fn mix_without_tracks_rejected() {
        assert!(mix_tracks(&[], &MixOptions::default()).is_err());
    }

    fn short_track(start_time: f32) -> MixTrack {
        MixTrack {
            data: vec![0.5],
            volume: 1.0,
            start_time,
            pan: 0.0,
        }
    }

    #[test]
    fn mix_far_start_time_rejected_without_allocating() {
        let err = mix_tracks(&[short_track(1.0e7)], &MixOptions::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPayload);
        assert!(err.message.contains("exceeds"));
    }

    #[test]
    fn mix_huge_output_length_rejected() {
        let options = MixOptions {
            output_length: Some(usize::MAX),
            ..Default::default()
        };
        let err = mix_tracks(&[short_track(0.0)], &options).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPayload);
    }

    #[test]
    fn mix_non_finite_start_rejected() {
        assert!(mix_tracks(&[short_track(f32::NAN)], &MixOptions::default()).is_err());
        assert!(mix_tracks(&[short_track(f32::INFINITY)], &MixOptions::default()).is_err());
        assert!(mix_tracks(&[short_track(-1.0)], &MixOptions::default()).is_err());
    }

    #[test]
    fn mix_at_length_limit_accepted() {
        let options = MixOptions {
            sample_rate: 10,
            ..Default::default()
        };
        let last_second = (MAX_MIX_SECONDS - 1) as f32;
        let mixed = mix_tracks(&[short_track(last_second)], &options).unwrap();
        assert_eq!(mixed.len(), (MAX_MIX_SECONDS - 1) * 10 + 1);
    }

    #[test]
    fn waveform_wider_than_input_is_silent() {
        let options = WaveformOptions {
            width: 8,
            ..Default::default()
        };
        let waveform = generate_waveform(&[0.5, -0.5], &options).unwrap();
        assert_eq!(waveform.peaks.len(), 8);
        assert!(waveform.peaks.iter().all(|p| p.min == 0.0 && p.max == 0.0));
    }

    #[test]
    fn batch_runs_each_step() {
        let steps = vec![
            BatchStep::Volume {
                data: vec![0.5, -0.5],
                gain: 2.0,
            },
            BatchStep::Normalize {
                data: vec![0.5],
                target_level: 0.0,
            },
        ];
        let results = process_batch(&steps).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].task_type, "volume");
        assert_eq!(results[0].data, vec![1.0, -1.0]);
        assert_eq!(results[1].task_type, "normalize");
        assert!(approx(results[1].data[0], 1.0));
    }

    #[test]
    fn batch_step_wire_format() {
        let step: BatchStep = serde_json::from_value(serde_json::json!({
            "type": "normalize",
            "data": [0.1],
            "targetLevel": -6.0
        }))
        .unwrap();
        assert_eq!(
            step,
            BatchStep::Normalize {
                data: vec![0.1],
                target_level: -6.0
            }
        );

        let unknown = serde_json::from_value::<BatchStep>(serde_json::json!({
            "type": "reverse",
            "data": []
        }));
        assert!(unknown.is_err());
    }
}
