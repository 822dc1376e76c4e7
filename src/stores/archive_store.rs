//! src/stores/archive_store.rs
//!
//! DiskArchiveStore: archive writes backed by SQLite for metadata and local
//! disk for payloads, sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.

use super::{ArchiveStore, ByteStream, ObjectWriter, StoreError, StoreResult};
use crate::models::archived_object::ArchivedObject;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Archive store keeping durable copies on local disk.
#[derive(Clone)]
pub struct DiskArchiveStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where archived payloads are stored.
    pub base_path: PathBuf,
}

impl DiskArchiveStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Rejects keys that are empty, too long, absolute, contain `..`, or
    /// carry control characters and backslashes.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(StoreError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// S3-like bucket naming: 3–63 chars of lowercase letters, digits, dots
    /// and hyphens, starting and ending with a letter or digit.
    pub fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
        let reject = |reason: &str| -> StoreResult<()> {
            Err(StoreError::InvalidBucketName {
                name: name.to_string(),
                reason: reason.into(),
            })
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return reject("must be between 3 and 63 characters");
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return reject("allowed characters are lowercase letters, digits, dots, and hyphens");
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return reject("must start and end with a lowercase letter or digit");
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return reject("cannot contain consecutive dots or dot-hyphen combinations");
        }
        Ok(())
    }

    /// Two-level shard directories from MD5(bucket/key).
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.base_path.clone();
        path.push(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> StoreResult<ArchivedObject> {
        sqlx::query_as::<_, ArchivedObject>(
            "SELECT id, bucket, key, content_type, size_bytes, etag, archived_at
             FROM archived_objects
             WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }
}

#[async_trait]
impl ArchiveStore for DiskArchiveStore {
    async fn open_write(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> StoreResult<Box<dyn ObjectWriter>> {
        Self::ensure_bucket_name_safe(bucket)?;
        Self::ensure_key_safe(key)?;

        let final_path = self.object_path(bucket, key);
        let parent = final_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let file = File::create(&tmp_path).await?;

        Ok(Box::new(DiskObjectWriter {
            db: Arc::clone(&self.db),
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            file,
            tmp_path,
            final_path,
            size_bytes: 0,
            digest: Context::new(),
        }))
    }

    async fn open_read(&self, bucket: &str, key: &str) -> StoreResult<(ArchivedObject, ByteStream)> {
        Self::ensure_key_safe(key)?;
        let object = self.fetch_object(bucket, key).await?;

        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Io(err)
                }
            })?;

        Ok((object, ReaderStream::new(file).boxed()))
    }
}

/// Streams into a temp file beside the final path; `finalize` renames it
/// into place and upserts the metadata row.
struct DiskObjectWriter {
    db: Arc<SqlitePool>,
    bucket: String,
    key: String,
    content_type: String,
    file: File,
    tmp_path: PathBuf,
    final_path: PathBuf,
    size_bytes: i64,
    digest: Context,
}

impl DiskObjectWriter {
    /// The metadata upsert and the payload swap succeed or fail together. The
    /// previous payload is parked beside the final path until the transaction
    /// commits, and put back if anything fails.
    async fn commit(&mut self) -> StoreResult<ArchivedObject> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        let digest = std::mem::replace(&mut self.digest, Context::new());
        let etag = format!("{:x}", digest.compute());

        let mut tx = self.db.begin().await?;
        let object = sqlx::query_as::<_, ArchivedObject>(
            r#"
            INSERT INTO archived_objects (
                id, bucket, key, content_type, size_bytes, etag, archived_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                archived_at = excluded.archived_at
            RETURNING id, bucket, key, content_type, size_bytes, etag, archived_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&self.bucket)
        .bind(&self.key)
        .bind(&self.content_type)
        .bind(self.size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        let backup = self.park_previous().await?;
        if let Err(err) = fs::rename(&self.tmp_path, &self.final_path).await {
            self.restore_previous(backup.as_deref()).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = tx.commit().await {
            self.restore_previous(backup.as_deref()).await;
            return Err(StoreError::Sqlx(err));
        }

        if let Some(backup) = backup {
            if let Err(err) = fs::remove_file(&backup).await {
                debug!("failed to remove {}: {}", backup.display(), err);
            }
        }
        Ok(object)
    }

    /// Move an existing payload out of the way. `None` when there is none.
    async fn park_previous(&self) -> StoreResult<Option<PathBuf>> {
        let backup = self.tmp_path.with_extension("prev");
        match fs::rename(&self.final_path, &backup).await {
            Ok(()) => Ok(Some(backup)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn restore_previous(&self, backup: Option<&Path>) {
        let restored = match backup {
            Some(backup) => fs::rename(backup, &self.final_path).await,
            None => match fs::remove_file(&self.final_path).await {
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(err) = restored {
            warn!(
                "failed to restore {} after a failed write: {}",
                self.final_path.display(),
                err
            );
        }
    }
}

#[async_trait]
impl ObjectWriter for DiskObjectWriter {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.size_bytes += chunk.len() as i64;
        self.digest.consume(&chunk);
        self.file.write_all(&chunk).await?;
        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> StoreResult<ArchivedObject> {
        let result = self.commit().await;
        if result.is_err() {
            // no-op once the rename has happened
            let _ = fs::remove_file(&self.tmp_path).await;
        }
        result
    }

    async fn abort(self: Box<Self>) {
        let DiskObjectWriter { file, tmp_path, .. } = *self;
        drop(file);
        match fs::remove_file(&tmp_path).await {
            Ok(_) => debug!("discarded partial upload {}", tmp_path.display()),
            Err(err) => debug!(
                "failed to remove partial upload {}: {}",
                tmp_path.display(),
                err
            ),
        }
    }
}
