//! The archival pipeline: receive → decode → match → copy → ack.
//!
//! ## Lifecycle
//! `Starting → Running → Draining → Stopped`
//!
//! - **Starting** ensures the subscription exists; failure aborts the run.
//! - **Running** pulls batches and spawns one task per message. Per-message
//!   failures are logged and leave the message unacked so the backend
//!   redelivers it after the ack deadline.
//! - **Draining** begins on cancellation (or a failed pull): no new pulls,
//!   in-flight tasks run to completion.
//! - **Stopped** deletes the subscription after a cancelled run. After a
//!   failed pull the subscription is kept.

use crate::{
    config::PipelineConfig,
    errors::PipelineError,
    messaging::{MessagingBackend, MessagingError},
    models::{
        archive_request::ArchiveRequest,
        subscription::{ReceivedMessage, SubscriptionHandle},
    },
    services::{
        label_matcher::LabelMatcher, object_copier::ObjectCopier,
        subscription_manager::SubscriptionManager,
    },
    stores::{ArchiveStore, SourceStore},
};
use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::{sync::watch, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// What happened to one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Copied and acked.
    Archived { matched_label: String },
    /// No label matched; left unacked.
    Skipped,
    /// Payload could not be decoded; left unacked.
    Rejected,
    /// Copy failed; left unacked for redelivery.
    CopyFailed,
}

/// Counters over one pipeline run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub received: u64,
    pub archived: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub copy_failed: u64,
    pub ack_failed: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    archived: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
    copy_failed: AtomicU64,
    ack_failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PipelineReport {
        PipelineReport {
            received: self.received.load(Ordering::Relaxed),
            archived: self.archived.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            copy_failed: self.copy_failed.load(Ordering::Relaxed),
            ack_failed: self.ack_failed.load(Ordering::Relaxed),
        }
    }
}

/// State shared by every per-message task.
struct Worker {
    config: PipelineConfig,
    matcher: LabelMatcher,
    copier: ObjectCopier,
    messaging: Arc<dyn MessagingBackend>,
    counters: Counters,
}

impl Worker {
    async fn process(&self, handle: &SubscriptionHandle, message: ReceivedMessage) -> MessageOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let request = match ArchiveRequest::decode(&message.data) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    message_id = %message.message_id,
                    delivery_attempt = message.delivery_attempt,
                    error = %err,
                    "bad message"
                );
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return MessageOutcome::Rejected;
            }
        };

        let Some(matched_label) = self.matcher.find_match(&request.labels) else {
            trace!(
                message_id = %message.message_id,
                location = %format!("{}/{}", request.source_bucket, request.source_object),
                target_label = self.matcher.target(),
                "no matching label"
            );
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return MessageOutcome::Skipped;
        };
        let matched_label = matched_label.to_string();

        if let Err(err) = self
            .copier
            .copy(
                &request.source_bucket,
                &request.source_object,
                &self.config.archive_bucket,
                &request.source_object,
            )
            .await
        {
            error!(
                message_id = %message.message_id,
                delivery_attempt = message.delivery_attempt,
                error = %err,
                "archive write failed"
            );
            self.counters.copy_failed.fetch_add(1, Ordering::Relaxed);
            return MessageOutcome::CopyFailed;
        }

        info!(
            message_id = %message.message_id,
            label = %matched_label,
            "archived {}/{} to {}/{}",
            request.source_bucket,
            request.source_object,
            self.config.archive_bucket,
            request.source_object
        );
        self.counters.archived.fetch_add(1, Ordering::Relaxed);

        if let Err(err) = self.messaging.ack(handle, &message.ack_id).await {
            warn!(
                message_id = %message.message_id,
                error = %err,
                "ack failed; message will be redelivered"
            );
            self.counters.ack_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(message_id = %message.message_id, "acked");
        }

        MessageOutcome::Archived { matched_label }
    }
}

/// Orchestrates one pipeline instance.
pub struct ArchivePipeline {
    worker: Arc<Worker>,
    subscriptions: SubscriptionManager,
    state: watch::Sender<PipelineState>,
}

impl ArchivePipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn SourceStore>,
        archive: Arc<dyn ArchiveStore>,
        messaging: Arc<dyn MessagingBackend>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Starting);
        Self {
            worker: Arc::new(Worker {
                matcher: LabelMatcher::new(config.target_label.clone()),
                copier: ObjectCopier::new(source, archive),
                messaging: Arc::clone(&messaging),
                counters: Counters::default(),
                config,
            }),
            subscriptions: SubscriptionManager::new(messaging),
            state,
        }
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn report(&self) -> PipelineReport {
        self.worker.counters.snapshot()
    }

    fn set_state(&self, next: PipelineState) {
        debug!("pipeline state -> {:?}", next);
        self.state.send_replace(next);
    }

    /// Run until `cancel` fires or the backend fails.
    pub async fn run(&self, cancel: CancellationToken) -> Result<PipelineReport, PipelineError> {
        self.set_state(PipelineState::Starting);
        let config = &self.worker.config;

        let handle = match self
            .subscriptions
            .ensure(&config.subscription_name, &config.topic)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                self.set_state(PipelineState::Stopped);
                return Err(err.into());
            }
        };

        info!(
            subscription = %handle,
            target_label = %config.target_label,
            archive_bucket = %config.archive_bucket,
            "receiving notifications"
        );
        self.set_state(PipelineState::Running);

        let received = self.receive_loop(&handle, &cancel).await;
        self.set_state(PipelineState::Stopped);
        let report = self.report();

        match received {
            Ok(()) => {
                if let Err(err) = self.subscriptions.teardown(&handle).await {
                    warn!(error = %err, "subscription teardown failed");
                } else {
                    info!(subscription = %handle, "deleted subscription");
                }
                info!(?report, "pipeline stopped");
                Ok(report)
            }
            Err(err) => {
                error!(subscription = %handle, error = %err, "unable to receive");
                Err(PipelineError::Receive(err))
            }
        }
    }

    async fn receive_loop(
        &self,
        handle: &SubscriptionHandle,
        cancel: &CancellationToken,
    ) -> Result<(), MessagingError> {
        let config = &self.worker.config;
        let mut tasks = JoinSet::new();

        let result = loop {
            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }

            let pulled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                pulled = self.worker.messaging.pull(handle, config.pull_batch_size) => pulled,
            };

            match pulled {
                Ok(messages) if messages.is_empty() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(config.poll_interval) => {}
                    }
                }
                Ok(messages) => {
                    for message in messages {
                        let worker = Arc::clone(&self.worker);
                        let handle = handle.clone();
                        tasks.spawn(async move {
                            worker.process(&handle, message).await;
                        });
                    }
                }
                Err(err) => break Err(err),
            }
        };

        self.set_state(PipelineState::Draining);
        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "draining in-flight messages");
        }
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }

        result
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "message task panicked");
    }
}
