//! On-disk day buckets and watermark.
//!
//! Layout under the crawl target's directory:
//! - `<YYYY-MM-DD>.json`: pretty-printed day bucket
//! - `lastPubDate.txt`: the watermark

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::debug;

use crate::constants::DAY_FORMAT;
use crate::crawl::bucket::DayBucket;
use crate::crawl::watermark::Watermark;

const WATERMARK_FILE: &str = "lastPubDate.txt";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid watermark in {path}: {value:?}")]
    Watermark { path: PathBuf, value: String },
}

/// Day bucket and watermark files for one crawl target.
#[derive(Debug, Clone)]
pub struct DayStore {
    dir: PathBuf,
}

impl DayStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| io_error(&self.dir, source))
    }

    #[must_use]
    pub fn bucket_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", day.format(DAY_FORMAT)))
    }

    /// Load the bucket for `day`. A missing or blank file is an empty bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold a bucket.
    pub async fn load_bucket(&self, day: NaiveDate) -> Result<DayBucket, StoreError> {
        let path = self.bucket_path(day);
        let Some(raw) = read_optional(&path).await? else {
            return Ok(DayBucket::new());
        };

        serde_json::from_str(&raw).map_err(|source| StoreError::Json { path, source })
    }

    /// Write the bucket for `day`, replacing the previous file.
    ///
    /// Empty buckets are not written.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be serialized or written.
    pub async fn save_bucket(&self, day: NaiveDate, bucket: &DayBucket) -> Result<(), StoreError> {
        if bucket.is_empty() {
            return Ok(());
        }

        let path = self.bucket_path(day);
        let json = serde_json::to_string_pretty(bucket).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        write_replace(&path, json.as_bytes()).await?;
        debug!(path = %path.display(), topics = bucket.len(), "Saved day bucket");
        Ok(())
    }

    /// Move the bucket file for `day` aside so a fresh one can be written.
    ///
    /// The file is renamed to `<YYYY-MM-DD>.json.corrupt`, replacing any
    /// earlier one. Returns the new path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be renamed.
    pub async fn quarantine_bucket(&self, day: NaiveDate) -> Result<PathBuf, StoreError> {
        let path = self.bucket_path(day);
        let moved = path.with_extension("json.corrupt");
        tokio::fs::rename(&path, &moved)
            .await
            .map_err(|source| io_error(&path, source))?;
        Ok(moved)
    }

    /// Load the persisted watermark, or `fallback` if none was written yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_watermark(&self, fallback: Watermark) -> Result<Watermark, StoreError> {
        let path = self.dir.join(WATERMARK_FILE);
        let Some(raw) = read_optional(&path).await? else {
            return Ok(fallback);
        };

        Watermark::parse(&raw).ok_or_else(|| StoreError::Watermark {
            path,
            value: raw.trim().to_string(),
        })
    }

    /// Overwrite the persisted watermark.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn commit_watermark(&self, watermark: Watermark) -> Result<(), StoreError> {
        let path = self.dir.join(WATERMARK_FILE);
        write_replace(&path, watermark.to_file_string().as_bytes()).await?;
        debug!(watermark = %watermark, "Committed watermark");
        Ok(())
    }
}

/// Read a file, treating a missing or blank file as absent.
async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io_error(path, source)),
    }
}

/// Write through a temporary sibling and rename over the target.
async fn write_replace(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|source| io_error(&tmp, source))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::bucket::{Reply, TopicRef};
    use crate::crawl::traversal::ExtractedReply;
    use crate::crawl::watermark::parse_reply_time;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn sample_bucket() -> DayBucket {
        let time = "2024-03-01 10:00:00";
        let mut bucket = DayBucket::new();
        bucket.merge(&ExtractedReply {
            topic: TopicRef {
                id: "100".to_string(),
                title: "A topic".to_string(),
                url: "https://forum.example.com/group/topic/100/".to_string(),
                author: "starter".to_string(),
            },
            reply: Reply {
                id: "r1".to_string(),
                quote: "quoted".to_string(),
                content: "hello".to_string(),
                time: time.to_string(),
            },
            published: parse_reply_time(time).unwrap(),
        });
        bucket
    }

    #[tokio::test]
    async fn test_missing_bucket_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = DayStore::new(dir.path());
        assert!(store.load_bucket(day()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_bucket_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = DayStore::new(dir.path());
        tokio::fs::write(store.bucket_path(day()), "").await.unwrap();
        assert!(store.load_bucket(day()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_bucket() {
        let dir = TempDir::new().unwrap();
        let store = DayStore::new(dir.path());
        let bucket = sample_bucket();

        store.save_bucket(day(), &bucket).await.unwrap();
        assert!(dir.path().join("2024-03-01.json").exists());
        assert_eq!(store.load_bucket(day()).await.unwrap(), bucket);
    }

    #[tokio::test]
    async fn test_empty_bucket_not_written() {
        let dir = TempDir::new().unwrap();
        let store = DayStore::new(dir.path());
        store.save_bucket(day(), &DayBucket::new()).await.unwrap();
        assert!(!store.bucket_path(day()).exists());
    }

    #[tokio::test]
    async fn test_corrupt_bucket_is_error() {
        let dir = TempDir::new().unwrap();
        let store = DayStore::new(dir.path());
        tokio::fs::write(store.bucket_path(day()), "{ not json").await.unwrap();
        assert!(matches!(
            store.load_bucket(day()).await,
            Err(StoreError::Json { .. })
        ));
    }

    #[tokio::test]
    async fn test_quarantine_bucket() {
        let dir = TempDir::new().unwrap();
        let store = DayStore::new(dir.path());
        tokio::fs::write(store.bucket_path(day()), "{ not json").await.unwrap();

        let moved = store.quarantine_bucket(day()).await.unwrap();
        assert_eq!(moved, dir.path().join("2024-03-01.json.corrupt"));
        assert!(moved.exists());
        assert!(store.load_bucket(day()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watermark_fallback_and_commit() {
        let dir = TempDir::new().unwrap();
        let store = DayStore::new(dir.path());
        let fallback = Watermark::epoch();

        assert_eq!(store.load_watermark(fallback).await.unwrap(), fallback);

        let mark = Watermark::new(parse_reply_time("2024-03-01 10:00:00").unwrap());
        store.commit_watermark(mark).await.unwrap();
        assert_eq!(store.load_watermark(fallback).await.unwrap(), mark);
    }

    #[tokio::test]
    async fn test_watermark_legacy_layout() {
        let dir = TempDir::new().unwrap();
        let store = DayStore::new(dir.path());
        tokio::fs::write(
            dir.path().join(WATERMARK_FILE),
            "2024-03-01 10:00:00 +0800 CST",
        )
        .await
        .unwrap();

        let loaded = store.load_watermark(Watermark::epoch()).await.unwrap();
        assert!(loaded > Watermark::epoch());
    }

    #[tokio::test]
    async fn test_garbage_watermark_is_error() {
        let dir = TempDir::new().unwrap();
        let store = DayStore::new(dir.path());
        tokio::fs::write(dir.path().join(WATERMARK_FILE), "whenever")
            .await
            .unwrap();
        assert!(matches!(
            store.load_watermark(Watermark::epoch()).await,
            Err(StoreError::Watermark { .. })
        ));
    }
}
