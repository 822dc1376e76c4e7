//! Object store seams.
//!
//! - [`SourceStore`]: read side, where labeled images live (the filestore).
//! - [`ArchiveStore`] / [`ObjectWriter`]: durable write side.
//!
//! Implementations must be safe for concurrent use; the pipeline shares one
//! handle of each across all in-flight messages.

pub mod archive_store;
pub mod filestore;

use crate::models::archived_object::ArchivedObject;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

/// Streamed object body.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("connection to object store failed: {0}")]
    Connection(String),
    #[error("object store returned HTTP {status} for `{bucket}/{key}`")]
    Http {
        status: u16,
        bucket: String,
        key: String,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read access to the working object store.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Open a read stream over `bucket/key`.
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<ByteStream>;
}

/// Write access to the archive store.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Open a writer for `bucket/key`. Nothing becomes visible until
    /// [`ObjectWriter::finalize`] succeeds.
    async fn open_write(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> StoreResult<Box<dyn ObjectWriter>>;

    /// Read back an archived object and its metadata.
    async fn open_read(&self, bucket: &str, key: &str) -> StoreResult<(ArchivedObject, ByteStream)>;
}

/// An in-progress archive write.
#[async_trait]
pub trait ObjectWriter: Send {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()>;

    /// Commit the object. A failure here means the object was not archived.
    async fn finalize(self: Box<Self>) -> StoreResult<ArchivedObject>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>);
}
