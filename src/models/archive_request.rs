//! Decoding of inbound "labeled image" notifications.
//!
//! The wire payload is a JSON object:
//!
//! ```json
//! {"location": "images/cat1.jpg", "labels": ["animal", "cat"]}
//! ```

use crate::errors::DecodeError;
use serde::Deserialize;

/// Wire schema. Both fields are optional here so that absence can be
/// reported as its own error rather than as a generic parse failure.
#[derive(Debug, Deserialize)]
struct Notification {
    location: Option<String>,
    labels: Option<Vec<String>>,
}

/// A validated notification: where the object lives and how it was labeled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveRequest {
    pub source_bucket: String,
    pub source_object: String,
    pub labels: Vec<String>,
}

impl ArchiveRequest {
    /// Decode and validate one notification payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let notification: Notification = serde_json::from_slice(payload)
            .map_err(|err| DecodeError::MalformedPayload(err.to_string()))?;

        let location = match notification.location {
            Some(location) if !location.is_empty() => location,
            _ => {
                return Err(DecodeError::MalformedLocation(
                    "empty location field".into(),
                ));
            }
        };

        let labels = match notification.labels {
            Some(labels) if !labels.is_empty() => labels,
            _ => return Err(DecodeError::EmptyLabels),
        };

        let (source_bucket, source_object) = split_location(&location)?;

        Ok(Self {
            source_bucket,
            source_object,
            labels,
        })
    }
}

/// Split `<bucket>/<object>`; exactly one separator, both sides non-empty.
fn split_location(location: &str) -> Result<(String, String), DecodeError> {
    let parts: Vec<&str> = location.split('/').collect();
    match parts.as_slice() {
        [bucket, object] if !bucket.is_empty() && !object.is_empty() => {
            Ok((bucket.to_string(), object.to_string()))
        }
        _ => Err(DecodeError::MalformedLocation(format!(
            "location must have format <bucket>/<object> [{}]",
            location
        ))),
    }
}
