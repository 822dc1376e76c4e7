//! HTTP client for the S3-compatible filestore holding labeled images.
//!
//! Objects are read with `GET {endpoint}/{bucket}/{key}` and streamed
//! without buffering the whole body.

use super::{ByteStream, SourceStore, StoreError, StoreResult};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{StatusCode, Url};
use std::{io, time::Duration};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for one whole GET, body included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct FilestoreClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl FilestoreClient {
    /// `endpoint` may be a full URL or a bare `host:port`, which is read as
    /// plain HTTP.
    pub fn new(endpoint: &str) -> StoreResult<Self> {
        Self::with_timeouts(endpoint, CONNECT_TIMEOUT, REQUEST_TIMEOUT)
    }

    /// A stalled filestore fails the copy once `request` elapses instead of
    /// holding up draining.
    pub fn with_timeouts(endpoint: &str, connect: Duration, request: Duration) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect)
            .timeout(request)
            .build()
            .map_err(|err| StoreError::Connection(err.to_string()))?;
        Self::with_client(client, endpoint)
    }

    pub fn with_client(client: reqwest::Client, endpoint: &str) -> StoreResult<Self> {
        let endpoint = endpoint.trim_end_matches('/');
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        };
        let endpoint = Url::parse(&endpoint).map_err(|err| {
            StoreError::Connection(format!("invalid filestore endpoint `{}`: {}", endpoint, err))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(StoreError::Connection(format!(
                "invalid filestore endpoint `{}`",
                endpoint
            )));
        }
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Bucket and key path segments are percent-encoded, so `#`, `?` and
    /// spaces stay part of the key. Slashes inside the key separate segments.
    fn object_url(&self, bucket: &str, key: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(bucket).extend(key.split('/'));
        }
        url
    }
}

#[async_trait]
impl SourceStore for FilestoreClient {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<ByteStream> {
        let url = self.object_url(bucket, key);
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| StoreError::Connection(err.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response
                .bytes_stream()
                .map_err(io::Error::other)
                .boxed()),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            status => Err(StoreError::Http {
                status: status.as_u16(),
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
        }
    }
}
