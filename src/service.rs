//! Cached audio operations.
//!
//! [`AudioService`] consults the cache before dispatching work to the pool
//! and writes fresh results back. Workers never see the cache.

use std::sync::Arc;

use crate::audio::dsp::{FadeOptions, NormalizedAudio, Peak, PeakOptions, Waveform, WaveformOptions};
use crate::audio::DecodedAudio;
use crate::cache::CacheManager;
use crate::error::{DaemonError, Result};
use crate::pool::WorkerPool;
use crate::types::{fingerprint, TaskOutput, TaskPayload, TaskReport};

/// Front door for audio work: cache first, pool on a miss.
#[derive(Debug, Clone)]
pub struct AudioService {
    cache: Arc<CacheManager>,
    pool: Arc<WorkerPool>,
}

impl AudioService {
    pub fn new(cache: Arc<CacheManager>, pool: Arc<WorkerPool>) -> Self {
        Self { cache, pool }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Decodes an audio file, keyed by the SHA256 of its bytes.
    pub async fn decode(&self, bytes: Vec<u8>) -> Result<DecodedAudio> {
        let key = fingerprint(&bytes);
        if let Some(audio) = self.cache.get_audio_data(&key).await {
            tracing::debug!(key = %&key[..16], "Decoded audio served from cache");
            return Ok(audio);
        }

        let report = self
            .pool
            .run(TaskPayload::DecodeAudio {
                array_buffer: bytes,
            })
            .await?;
        match report.output {
            TaskOutput::DecodeAudio(audio) => {
                self.cache.set_audio_data(&key, &audio).await;
                Ok(audio)
            }
            other => Err(unexpected_output(report.task_id, &other)),
        }
    }

    /// Renders the waveform of `samples`, cached under `id` and the render
    /// options.
    pub async fn waveform(
        &self,
        id: &str,
        samples: Vec<f32>,
        options: WaveformOptions,
    ) -> Result<Waveform> {
        let key = waveform_key(id, &options);
        if let Some(waveform) = self.cache.get_waveform(&key).await {
            tracing::debug!(key = %key, "Waveform served from cache");
            return Ok(waveform);
        }

        let report = self
            .pool
            .run(TaskPayload::GenerateWaveform {
                channel_data: samples,
                options,
            })
            .await?;
        match report.output {
            TaskOutput::GenerateWaveform(waveform) => {
                self.cache.set_waveform(&key, &waveform).await;
                Ok(waveform)
            }
            other => Err(unexpected_output(report.task_id, &other)),
        }
    }

    /// Runs an uncached task.
    pub async fn process(&self, payload: TaskPayload) -> Result<TaskReport> {
        self.pool.run(payload).await
    }

    /// Peak-normalizes all channels with one shared gain so the stereo
    /// image is preserved.
    pub async fn normalize(
        &self,
        channels: &[Vec<f32>],
        target_level: f32,
    ) -> Result<(Vec<Vec<f32>>, NormalizedAudio)> {
        let report = self
            .pool
            .run(TaskPayload::NormalizeAudio {
                channel_data: channels.concat(),
                target_level,
            })
            .await?;
        let mut normalized = match report.output {
            TaskOutput::NormalizeAudio(normalized) => normalized,
            other => return Err(unexpected_output(report.task_id, &other)),
        };

        let mut split = Vec::with_capacity(channels.len());
        let mut rest = std::mem::take(&mut normalized.normalized_data);
        for channel in channels {
            let tail = rest.split_off(channel.len());
            split.push(rest);
            rest = tail;
        }
        Ok((split, normalized))
    }

    /// Fades every channel, one task per channel.
    pub async fn fade(&self, channels: &[Vec<f32>], options: FadeOptions) -> Result<Vec<Vec<f32>>> {
        let payloads = channels
            .iter()
            .map(|channel| TaskPayload::ApplyFade {
                channel_data: channel.clone(),
                options: options.clone(),
            })
            .collect();
        let reports = self.pool.submit_batch(payloads).await?;

        reports
            .into_iter()
            .map(|report| match report.output {
                TaskOutput::ApplyFade(data) => Ok(data),
                other => Err(unexpected_output(report.task_id, &other)),
            })
            .collect()
    }

    /// Finds windows louder than the threshold.
    pub async fn peaks(&self, samples: Vec<f32>, options: PeakOptions) -> Result<Vec<Peak>> {
        let report = self
            .pool
            .run(TaskPayload::CalculatePeaks {
                channel_data: samples,
                options,
            })
            .await?;
        match report.output {
            TaskOutput::CalculatePeaks(peaks) => Ok(peaks),
            other => Err(unexpected_output(report.task_id, &other)),
        }
    }
}

/// Every option that shapes the rendered waveform is part of the key.
fn waveform_key(id: &str, options: &WaveformOptions) -> String {
    format!(
        "{}:{}x{}:{}:{}",
        id,
        options.width,
        options.height,
        if options.normalize { "scaled" } else { "raw" },
        options.sample_rate
    )
}

fn unexpected_output(task_id: crate::types::TaskId, output: &TaskOutput) -> DaemonError {
    DaemonError::task_failed(
        task_id,
        format!("worker returned a '{}' result", output.kind()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{write_wav_to_buffer, AudioProcessor};
    use crate::cache::PersistentStore;
    use crate::config::PoolConfig;
    use crate::error::ErrorCode;
    use crate::pool::TaskProcessor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn service(dir: &TempDir, dispatches: Arc<AtomicUsize>) -> AudioService {
        let cache = CacheManager::new(
            PersistentStore::new(dir.path(), Duration::from_secs(3600), true),
            16 * 1024 * 1024,
        );
        let processor = move |payload: TaskPayload| {
            dispatches.fetch_add(1, Ordering::SeqCst);
            AudioProcessor.process(payload)
        };
        let pool = WorkerPool::new(
            PoolConfig {
                max_workers: 2,
                task_timeout: Duration::from_secs(5),
                max_retries: 0,
                retry_backoff: Duration::from_millis(10),
            },
            processor,
        );
        AudioService::new(Arc::new(cache), Arc::new(pool))
    }

    fn tone() -> Vec<u8> {
        let samples: Vec<f32> = (0..4410).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        write_wav_to_buffer(&[samples], 44100).unwrap()
    }

    #[tokio::test]
    async fn decode_hits_cache_on_second_call() {
        let dir = TempDir::new().unwrap();
        let dispatches = Arc::new(AtomicUsize::new(0));
        let service = service(&dir, Arc::clone(&dispatches));

        let first = service.decode(tone()).await.unwrap();
        let second = service.decode(tone()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.sample_rate, 44100);
        assert_eq!(first.length, 4410);
        assert_eq!(dispatches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn decoded_audio_is_reused_across_restarts() {
        let dir = TempDir::new().unwrap();
        let first_run = Arc::new(AtomicUsize::new(0));
        service(&dir, Arc::clone(&first_run))
            .decode(tone())
            .await
            .unwrap();

        let second_run = Arc::new(AtomicUsize::new(0));
        let restarted = service(&dir, Arc::clone(&second_run));
        restarted.decode(tone()).await.unwrap();

        assert_eq!(first_run.load(Ordering::SeqCst), 1);
        assert_eq!(second_run.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn waveform_is_cached_per_dimensions() {
        let dir = TempDir::new().unwrap();
        let dispatches = Arc::new(AtomicUsize::new(0));
        let service = service(&dir, Arc::clone(&dispatches));
        let samples = vec![0.5f32; 2000];
        let narrow = WaveformOptions {
            width: 10,
            ..WaveformOptions::default()
        };

        let a = service
            .waveform("track-1", samples.clone(), narrow.clone())
            .await
            .unwrap();
        let b = service
            .waveform("track-1", samples.clone(), narrow)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.peaks.len(), 10);
        assert_eq!(dispatches.load(Ordering::SeqCst), 1);

        let wide = WaveformOptions {
            width: 20,
            ..WaveformOptions::default()
        };
        let c = service.waveform("track-1", samples, wide).await.unwrap();
        assert_eq!(c.peaks.len(), 20);
        assert_eq!(dispatches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn waveform_cache_distinguishes_scaling_and_rate() {
        let dir = TempDir::new().unwrap();
        let dispatches = Arc::new(AtomicUsize::new(0));
        let service = service(&dir, Arc::clone(&dispatches));
        let samples = vec![0.5f32; 100];
        let scaled = WaveformOptions {
            width: 10,
            ..WaveformOptions::default()
        };

        let first = service
            .waveform("t", samples.clone(), scaled.clone())
            .await
            .unwrap();
        assert_eq!(first.peaks[0].max, 50.0);

        let raw = WaveformOptions {
            normalize: false,
            ..scaled.clone()
        };
        let unscaled = service.waveform("t", samples.clone(), raw).await.unwrap();
        assert_eq!(unscaled.peaks[0].max, 0.5);
        assert_eq!(dispatches.load(Ordering::SeqCst), 2);

        let slower = WaveformOptions {
            sample_rate: 100,
            ..scaled
        };
        let resampled = service.waveform("t", samples, slower).await.unwrap();
        assert_eq!(resampled.duration, 1.0);
        assert_eq!(dispatches.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn waveform_key_covers_all_options() {
        let options = WaveformOptions {
            width: 640,
            height: 80.0,
            normalize: false,
            sample_rate: 48000,
        };
        assert_eq!(waveform_key("take", &options), "take:640x80:raw:48000");
    }

    #[tokio::test]
    async fn normalize_shares_gain_across_channels() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(AtomicUsize::new(0)));
        let channels = vec![vec![0.5, -0.25], vec![0.1, 0.2]];

        let (split, normalized) = service.normalize(&channels, 0.0).await.unwrap();

        assert_eq!(split.len(), 2);
        assert!((normalized.applied_gain - 2.0).abs() < 1e-4);
        assert!((split[0][0] - 1.0).abs() < 1e-4);
        assert!((split[1][1] - 0.4).abs() < 1e-4);
    }

    #[tokio::test]
    async fn fade_runs_per_channel() {
        let dir = TempDir::new().unwrap();
        let dispatches = Arc::new(AtomicUsize::new(0));
        let service = service(&dir, Arc::clone(&dispatches));
        let channels = vec![vec![1.0f32; 100], vec![0.5f32; 100]];
        let options = FadeOptions {
            fade_in_duration: 0.5,
            sample_rate: 100,
            ..FadeOptions::default()
        };

        let faded = service.fade(&channels, options).await.unwrap();

        assert_eq!(faded.len(), 2);
        assert_eq!(faded[0][0], 0.0);
        assert_eq!(faded[1][99], 0.5);
        assert_eq!(dispatches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn peaks_above_threshold() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(AtomicUsize::new(0)));
        let mut samples = vec![0.0f32; 4096];
        samples[2048..3072].fill(0.9);

        let peaks = service
            .peaks(samples, PeakOptions::default())
            .await
            .unwrap();

        assert_eq!(peaks.len(), 1);
        assert!((peaks[0].amplitude - 0.9).abs() < 1e-4);
        assert!((peaks[0].time - 2048.0 / 44100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn invalid_audio_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let dispatches = Arc::new(AtomicUsize::new(0));
        let service = service(&dir, Arc::clone(&dispatches));

        let err = service.decode(b"not a wav".to_vec()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskExecutionFailed);
        assert!(err.message.contains("Invalid audio"));

        assert!(service.decode(b"not a wav".to_vec()).await.is_err());
        assert_eq!(dispatches.load(Ordering::SeqCst), 2);
        assert_eq!(service.cache().stats().await.memory.count, 0);
    }
}
