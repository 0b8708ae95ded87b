//! Durable cache tier on local disk.
//!
//! Each category is a sub-directory of the store root; each entry is one JSON
//! record named after the SHA256 of its key, so arbitrary caller keys map to
//! safe file names. Payloads are gzip-compressed when possible and expire a
//! fixed TTL after they were written.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{DaemonError, Result};
use crate::types::{fingerprint, now_millis, CacheCategory, CacheValue, ValueKind};

const RECORD_EXTENSION: &str = "json";

/// One persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    /// Caller-supplied key.
    pub key: String,
    /// Base64 of the (possibly compressed) payload bytes.
    pub data: String,
    /// Uncompressed payload size in bytes.
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub accessed_at: u64,
    pub expires_at: u64,
    /// Whether `data` is gzip-compressed.
    pub compressed: bool,
    pub kind: ValueKind,
}

impl StoredEntry {
    /// Returns true once `now` has reached the expiry time.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Decodes the payload, honoring the `compressed` flag.
    fn decode(&self) -> Result<CacheValue> {
        let raw = STANDARD
            .decode(&self.data)
            .map_err(|e| DaemonError::corrupt_record(format!("bad base64: {}", e)))?;
        let bytes = if self.compressed {
            decompress(&raw)
                .map_err(|e| DaemonError::corrupt_record(format!("bad gzip stream: {}", e)))?
        } else {
            raw
        };
        CacheValue::from_bytes(self.kind, bytes).map_err(DaemonError::corrupt_record)
    }
}

fn compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Durable key/value store with per-category namespaces and TTL expiry.
#[derive(Debug, Clone)]
pub struct PersistentStore {
    root: PathBuf,
    ttl: Duration,
    compression: bool,
}

impl PersistentStore {
    /// Creates a store rooted at `root`. Nothing touches the disk until the
    /// first operation or [`open`](Self::open).
    pub fn new(root: impl Into<PathBuf>, ttl: Duration, compression: bool) -> Self {
        Self {
            root: root.into(),
            ttl,
            compression,
        }
    }

    /// Creates the category directories.
    pub async fn open(&self) -> Result<()> {
        for category in CacheCategory::ALL {
            let dir = self.category_dir(category);
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| DaemonError::storage(format!("Failed to create {:?}", dir), e))?;
        }
        Ok(())
    }

    fn category_dir(&self, category: CacheCategory) -> PathBuf {
        self.root.join(category.as_str())
    }

    fn record_path(&self, category: CacheCategory, key: &str) -> PathBuf {
        self.category_dir(category)
            .join(format!("{}.{}", fingerprint(key.as_bytes()), RECORD_EXTENSION))
    }

    /// Writes a value, replacing any previous record for the key.
    pub async fn store(
        &self,
        category: CacheCategory,
        key: &str,
        value: &CacheValue,
    ) -> Result<StoredEntry> {
        let raw = value.to_bytes();
        let size = raw.len() as u64;

        let (payload, compressed) = if self.compression {
            match compress(&raw) {
                Ok(packed) => (packed, true),
                Err(e) => {
                    tracing::warn!(%category, key, error = %e, "Compression failed, storing raw payload");
                    (raw, false)
                }
            }
        } else {
            (raw, false)
        };

        let now = now_millis();
        let entry = StoredEntry {
            key: key.to_string(),
            data: STANDARD.encode(payload),
            size,
            created_at: now,
            accessed_at: now,
            expires_at: now.saturating_add(self.ttl.as_millis() as u64),
            compressed,
            kind: value.kind(),
        };

        let dir = self.category_dir(category);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DaemonError::storage(format!("Failed to create {:?}", dir), e))?;
        self.write_record(&self.record_path(category, key), &entry)
            .await?;

        tracing::debug!(%category, key, size, compressed, "Stored cache record");
        Ok(entry)
    }

    /// Writes a record through a temporary file so readers never see a
    /// partially written record.
    async fn write_record(&self, path: &Path, entry: &StoredEntry) -> Result<()> {
        let json = serde_json::to_vec(entry)
            .map_err(|e| DaemonError::corrupt_record(format!("serialization failed: {}", e)))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| DaemonError::storage(format!("Failed to write {:?}", tmp), e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| DaemonError::storage(format!("Failed to commit {:?}", path), e))?;
        Ok(())
    }

    async fn read_record(&self, path: &Path) -> Result<Option<StoredEntry>> {
        let bytes = match fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DaemonError::storage(format!("Failed to read {:?}", path), e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| DaemonError::corrupt_record(format!("{:?}: {}", path, e)))
    }

    /// Returns the raw record for a key without refreshing or expiring it.
    pub async fn entry(&self, category: CacheCategory, key: &str) -> Result<Option<StoredEntry>> {
        self.read_record(&self.record_path(category, key)).await
    }

    /// Reads a value.
    ///
    /// Expired records are deleted and reported as missing. Live records get
    /// their access time refreshed.
    pub async fn retrieve(&self, category: CacheCategory, key: &str) -> Result<Option<CacheValue>> {
        let path = self.record_path(category, key);
        let Some(mut entry) = self.read_record(&path).await? else {
            return Ok(None);
        };

        let now = now_millis();
        if entry.is_expired(now) {
            tracing::debug!(%category, key, "Dropping expired cache record");
            self.remove(category, key).await?;
            return Ok(None);
        }

        let value = entry.decode()?;

        entry.accessed_at = now;
        if let Err(e) = self.write_record(&path, &entry).await {
            tracing::warn!(%category, key, error = %e, "Failed to refresh access time");
        }

        Ok(Some(value))
    }

    /// Deletes a record. Missing records are not an error.
    pub async fn remove(&self, category: CacheCategory, key: &str) -> Result<()> {
        let path = self.record_path(category, key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DaemonError::storage(format!("Failed to delete {:?}", path), e)),
        }
    }

    /// Lists record files of a category. A missing directory is empty.
    async fn record_files(&self, category: CacheCategory) -> Result<Vec<PathBuf>> {
        let dir = self.category_dir(category);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DaemonError::storage(format!("Failed to list {:?}", dir), e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DaemonError::storage(format!("Failed to list {:?}", dir), e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Deletes every expired record in every category.
    ///
    /// Unreadable records are skipped. Returns the number of records removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = now_millis();
        let mut removed = 0;

        for category in CacheCategory::ALL {
            for path in self.record_files(category).await? {
                match self.read_record(&path).await {
                    Ok(Some(entry)) if entry.is_expired(now) => {
                        match fs::remove_file(&path).await {
                            Ok(()) => removed += 1,
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => {
                                return Err(DaemonError::storage(
                                    format!("Failed to delete {:?}", path),
                                    e,
                                ))
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(path = ?path, error = %e, "Skipping unreadable record"),
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Swept expired cache records");
        }
        Ok(removed)
    }

    /// Deletes every record in every category.
    pub async fn clear(&self) -> Result<()> {
        for category in CacheCategory::ALL {
            for path in self.record_files(category).await? {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(DaemonError::storage(format!("Failed to delete {:?}", path), e))
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns the on-disk size of all records in bytes.
    pub async fn disk_usage(&self) -> Result<u64> {
        let mut total = 0;
        for category in CacheCategory::ALL {
            for path in self.record_files(category).await? {
                if let Ok(metadata) = fs::metadata(&path).await {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }
}
