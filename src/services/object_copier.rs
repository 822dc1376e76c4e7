//! Streams one object from the source store into the archive store.

use crate::{
    errors::CopyError,
    models::archived_object::ArchivedObject,
    stores::{ArchiveStore, SourceStore, StoreError},
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;

/// Content type recorded for every archived object.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone)]
pub struct ObjectCopier {
    source: Arc<dyn SourceStore>,
    archive: Arc<dyn ArchiveStore>,
}

impl ObjectCopier {
    pub fn new(source: Arc<dyn SourceStore>, archive: Arc<dyn ArchiveStore>) -> Self {
        Self { source, archive }
    }

    /// Copy `src_bucket/src_key` to `dst_bucket/dst_key`.
    ///
    /// The copy only counts once the destination writer is finalized. On any
    /// failure the destination writer is aborted. No retries.
    pub async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<ArchivedObject, CopyError> {
        let source_err = |source: StoreError| CopyError::SourceRead {
            bucket: src_bucket.to_string(),
            key: src_key.to_string(),
            source,
        };
        let dest_err = |source: StoreError| CopyError::DestinationWrite {
            bucket: dst_bucket.to_string(),
            key: dst_key.to_string(),
            source,
        };

        let mut stream = self.source.get(src_bucket, src_key).await.map_err(source_err)?;
        let mut writer = self
            .archive
            .open_write(dst_bucket, dst_key, ARCHIVE_CONTENT_TYPE)
            .await
            .map_err(dest_err)?;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    writer.abort().await;
                    return Err(source_err(StoreError::Io(err)));
                }
            };
            if let Err(err) = writer.write(chunk).await {
                writer.abort().await;
                return Err(dest_err(err));
            }
        }

        let archived = writer.finalize().await.map_err(dest_err)?;
        debug!(
            "copied {}/{} -> {}/{} ({} bytes)",
            src_bucket, src_key, dst_bucket, dst_key, archived.size_bytes
        );
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        stores::archive_store::DiskArchiveStore,
        testing::{MemoryObjectStore, read_all, sqlite_pool},
    };

    #[tokio::test]
    async fn copy_round_trips_content_and_type() {
        let source = Arc::new(MemoryObjectStore::default());
        source.insert("images", "cat1.jpg", b"\xff\xd8\xff\xe0 cat pixels");
        let archive = Arc::new(MemoryObjectStore::default());
        let copier = ObjectCopier::new(source, archive.clone());

        let archived = copier
            .copy("images", "cat1.jpg", "cat-archive", "cat1.jpg")
            .await
            .unwrap();
        assert_eq!(archived.size_bytes, 15);

        let (meta, stream) = archive.open_read("cat-archive", "cat1.jpg").await.unwrap();
        assert_eq!(meta.content_type, ARCHIVE_CONTENT_TYPE);
        assert_eq!(read_all(stream).await, b"\xff\xd8\xff\xe0 cat pixels");
    }

    #[tokio::test]
    async fn copy_into_disk_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(DiskArchiveStore::new(
            sqlite_pool(&dir).await,
            dir.path().join("archive"),
        ));
        let source = Arc::new(MemoryObjectStore::default());
        source.insert("images", "cat1.jpg", b"large enough to split into chunks");
        let copier = ObjectCopier::new(source, archive.clone());

        copier
            .copy("images", "cat1.jpg", "cat-archive", "cat1.jpg")
            .await
            .unwrap();

        let (meta, stream) = archive.open_read("cat-archive", "cat1.jpg").await.unwrap();
        assert_eq!(meta.content_type, ARCHIVE_CONTENT_TYPE);
        assert_eq!(read_all(stream).await, b"large enough to split into chunks");
    }

    #[tokio::test]
    async fn missing_source_is_source_read_error() {
        let source = Arc::new(MemoryObjectStore::default());
        let archive = Arc::new(MemoryObjectStore::default());
        let copier = ObjectCopier::new(source, archive.clone());

        let err = copier
            .copy("images", "ghost.jpg", "cat-archive", "ghost.jpg")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CopyError::SourceRead {
                source: StoreError::NotFound { .. },
                ..
            }
        ));
        assert_eq!(archive.object_count(), 0);
    }

    #[tokio::test]
    async fn broken_source_stream_aborts_destination() {
        let source = Arc::new(MemoryObjectStore::default());
        source.insert("images", "cat1.jpg", b"truncated body");
        source.fail_reads_mid_stream();
        let archive = Arc::new(MemoryObjectStore::default());
        let copier = ObjectCopier::new(source, archive.clone());

        let err = copier
            .copy("images", "cat1.jpg", "cat-archive", "cat1.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::SourceRead { .. }));
        assert_eq!(archive.object_count(), 0);
        assert_eq!(archive.aborted_writes(), 1);
    }

    #[tokio::test]
    async fn finalize_failure_is_destination_write_error() {
        let source = Arc::new(MemoryObjectStore::default());
        source.insert("images", "cat1.jpg", b"pixels");
        let archive = Arc::new(MemoryObjectStore::default());
        archive.fail_finalize();
        let copier = ObjectCopier::new(source, archive.clone());

        let err = copier
            .copy("images", "cat1.jpg", "cat-archive", "cat1.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::DestinationWrite { .. }));
        assert_eq!(archive.object_count(), 0);
    }
}
