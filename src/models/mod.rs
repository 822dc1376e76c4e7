//! Data models for the archival pipeline.
//!
//! `ArchiveRequest` is the decoded notification, `ArchivedObject` maps to the
//! `archived_objects` table via `sqlx::FromRow`, and `subscription` holds the
//! messaging-side identities.

pub mod archive_request;
pub mod archived_object;
pub mod subscription;
