//! Messaging backend seam.
//!
//! Delivery is at-least-once: a pulled message stays leased until its ack
//! deadline passes, after which it is handed out again unless acked.

pub mod sqlite_broker;

use crate::models::subscription::{ReceivedMessage, SubscriptionHandle};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("subscription `{0}` not found")]
    SubscriptionNotFound(String),
    #[error("messaging backend unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MessagingResult<T> = Result<T, MessagingError>;

#[async_trait]
pub trait MessagingBackend: Send + Sync {
    async fn subscription_exists(&self, name: &str) -> MessagingResult<bool>;

    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        ack_deadline: Duration,
    ) -> MessagingResult<SubscriptionHandle>;

    async fn delete_subscription(&self, handle: &SubscriptionHandle) -> MessagingResult<()>;

    /// Lease up to `max_messages` deliverable messages. An empty vec means
    /// nothing is available right now.
    async fn pull(
        &self,
        handle: &SubscriptionHandle,
        max_messages: usize,
    ) -> MessagingResult<Vec<ReceivedMessage>>;

    async fn ack(&self, handle: &SubscriptionHandle, ack_id: &str) -> MessagingResult<()>;
}
