//! Represents an object copied into the archive store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for one archived object. The payload bytes live elsewhere
/// (on disk for [`DiskArchiveStore`](crate::stores::archive_store::DiskArchiveStore)).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ArchivedObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Archive bucket the object was written to.
    pub bucket: String,

    /// Object key; equal to the source object's key.
    pub key: String,

    /// Content type recorded at write time.
    pub content_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// When the archive write was finalized.
    pub archived_at: DateTime<Utc>,
}
