//! In-memory doubles and fixtures shared by unit tests.

use crate::{
    db,
    messaging::{MessagingBackend, MessagingError, MessagingResult},
    models::{
        archived_object::ArchivedObject,
        subscription::{ReceivedMessage, SubscriptionHandle},
    },
    stores::{ArchiveStore, ByteStream, ObjectWriter, SourceStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use sqlx::SqlitePool;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use uuid::Uuid;

/// Fresh migrated SQLite database inside `dir`.
pub async fn sqlite_pool(dir: &tempfile::TempDir) -> Arc<SqlitePool> {
    let url = format!("sqlite://{}", dir.path().join("archiver.db").display());
    let pool = db::connect(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

pub async fn read_all(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[derive(Default)]
struct ObjectsInner {
    objects: Mutex<HashMap<(String, String), (ArchivedObject, Bytes)>>,
    fail_finalize: AtomicBool,
    fail_mid_stream: AtomicBool,
    aborted: AtomicUsize,
}

/// Object store usable as either side of a copy.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<ObjectsInner>,
}

impl MemoryObjectStore {
    pub fn insert(&self, bucket: &str, key: &str, data: &[u8]) {
        let data = Bytes::copy_from_slice(data);
        let object = archived(bucket, key, "application/octet-stream", &data);
        self.inner
            .objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), (object, data));
    }

    pub fn get_bytes(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.inner
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(_, data)| data.clone())
    }

    pub fn object_count(&self) -> usize {
        self.inner.objects.lock().unwrap().len()
    }

    pub fn aborted_writes(&self) -> usize {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn fail_finalize(&self) {
        self.inner.fail_finalize.store(true, Ordering::SeqCst);
    }

    /// Reads yield the first half of the object, then an I/O error.
    pub fn fail_reads_mid_stream(&self) {
        self.inner.fail_mid_stream.store(true, Ordering::SeqCst);
    }
}

fn archived(bucket: &str, key: &str, content_type: &str, data: &[u8]) -> ArchivedObject {
    ArchivedObject {
        id: Uuid::new_v4(),
        bucket: bucket.to_string(),
        key: key.to_string(),
        content_type: content_type.to_string(),
        size_bytes: data.len() as i64,
        etag: format!("{:x}", md5::compute(data)),
        archived_at: Utc::now(),
    }
}

fn chunked(data: Bytes, fail_mid_stream: bool) -> ByteStream {
    let mid = data.len() / 2;
    let first: io::Result<Bytes> = Ok(data.slice(..mid));
    let second = if fail_mid_stream {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset"))
    } else {
        Ok(data.slice(mid..))
    };
    stream::iter(vec![first, second]).boxed()
}

#[async_trait]
impl SourceStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<ByteStream> {
        let data = self.get_bytes(bucket, key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        Ok(chunked(
            data,
            self.inner.fail_mid_stream.load(Ordering::SeqCst),
        ))
    }
}

#[async_trait]
impl ArchiveStore for MemoryObjectStore {
    async fn open_write(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> StoreResult<Box<dyn ObjectWriter>> {
        Ok(Box::new(MemoryWriter {
            inner: Arc::clone(&self.inner),
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            buf: Vec::new(),
        }))
    }

    async fn open_read(&self, bucket: &str, key: &str) -> StoreResult<(ArchivedObject, ByteStream)> {
        let found = self
            .inner
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned();
        let (object, data) = found.ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        Ok((object, chunked(data, false)))
    }
}

struct MemoryWriter {
    inner: Arc<ObjectsInner>,
    bucket: String,
    key: String,
    content_type: String,
    buf: Vec<u8>,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> StoreResult<ArchivedObject> {
        if self.inner.fail_finalize.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::other("commit rejected")));
        }
        let object = archived(&self.bucket, &self.key, &self.content_type, &self.buf);
        self.inner.objects.lock().unwrap().insert(
            (self.bucket.clone(), self.key.clone()),
            (object.clone(), Bytes::from(self.buf)),
        );
        Ok(object)
    }

    async fn abort(self: Box<Self>) {
        self.inner.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct BrokerState {
    subscriptions: HashSet<String>,
    queues: HashMap<String, VecDeque<ReceivedMessage>>,
    acked: Vec<String>,
    next_id: usize,
}

/// Messaging backend double with failure switches and call counters.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    pub fail_lookup: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_pull: AtomicBool,
    creates: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryBroker {
    pub fn with_subscription(name: &str) -> Self {
        let broker = Self::default();
        broker
            .state
            .lock()
            .unwrap()
            .subscriptions
            .insert(name.to_string());
        broker
    }

    /// Queue a delivery on `subscription`; returns its ack id.
    pub fn push(&self, subscription: &str, data: &[u8]) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let message = ReceivedMessage {
            message_id: format!("msg-{}", state.next_id),
            ack_id: format!("ack-{}", state.next_id),
            data: Bytes::copy_from_slice(data),
            delivery_attempt: 1,
        };
        let ack_id = message.ack_id.clone();
        state
            .queues
            .entry(subscription.to_string())
            .or_default()
            .push_back(message);
        ack_id
    }

    pub fn acked(&self) -> Vec<String> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn has_subscription(&self, name: &str) -> bool {
        self.state.lock().unwrap().subscriptions.contains(name)
    }
}

fn unavailable() -> MessagingError {
    MessagingError::Unavailable("connection refused".into())
}

#[async_trait]
impl MessagingBackend for MemoryBroker {
    async fn subscription_exists(&self, name: &str) -> MessagingResult<bool> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.has_subscription(name))
    }

    async fn create_subscription(
        &self,
        name: &str,
        _topic: &str,
        _ack_deadline: Duration,
    ) -> MessagingResult<SubscriptionHandle> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(name.to_string());
        Ok(SubscriptionHandle::new(name))
    }

    async fn delete_subscription(&self, handle: &SubscriptionHandle) -> MessagingResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let mut state = self.state.lock().unwrap();
        state.queues.remove(handle.name());
        if state.subscriptions.remove(handle.name()) {
            Ok(())
        } else {
            Err(MessagingError::SubscriptionNotFound(handle.name().to_string()))
        }
    }

    async fn pull(
        &self,
        handle: &SubscriptionHandle,
        max_messages: usize,
    ) -> MessagingResult<Vec<ReceivedMessage>> {
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let mut state = self.state.lock().unwrap();
        if !state.subscriptions.contains(handle.name()) {
            return Err(MessagingError::SubscriptionNotFound(
                handle.name().to_string(),
            ));
        }
        let queue = state.queues.entry(handle.name().to_string()).or_default();
        let take = max_messages.min(queue.len());
        Ok(queue.drain(..take).collect())
    }

    async fn ack(&self, _handle: &SubscriptionHandle, ack_id: &str) -> MessagingResult<()> {
        self.state.lock().unwrap().acked.push(ack_id.to_string());
        Ok(())
    }
}
