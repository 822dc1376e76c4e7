//! Idempotent subscription setup and teardown.

use crate::{
    errors::SubscriptionError,
    messaging::MessagingBackend,
    models::subscription::SubscriptionHandle,
};
use std::{sync::Arc, time::Duration};
use tracing::info;

/// Ack deadline for subscriptions created by the pipeline. An unacked
/// message becomes eligible for redelivery after this long.
pub const ACK_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct SubscriptionManager {
    backend: Arc<dyn MessagingBackend>,
}

impl SubscriptionManager {
    pub fn new(backend: Arc<dyn MessagingBackend>) -> Self {
        Self { backend }
    }

    /// Return a handle to subscription `name`, creating it on `topic` first
    /// if it does not exist yet.
    pub async fn ensure(
        &self,
        name: &str,
        topic: &str,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        let exists = self
            .backend
            .subscription_exists(name)
            .await
            .map_err(|source| SubscriptionError::Lookup {
                name: name.to_string(),
                source,
            })?;

        if exists {
            info!(subscription = name, "reusing existing subscription");
            return Ok(SubscriptionHandle::new(name));
        }

        let handle = self
            .backend
            .create_subscription(name, topic, ACK_DEADLINE)
            .await
            .map_err(|source| SubscriptionError::Create {
                name: name.to_string(),
                topic: topic.to_string(),
                source,
            })?;
        info!(
            subscription = name,
            topic,
            ack_deadline_secs = ACK_DEADLINE.as_secs(),
            "created subscription"
        );
        Ok(handle)
    }

    /// Delete the subscription. Callers log the error; it never blocks exit.
    pub async fn teardown(&self, handle: &SubscriptionHandle) -> Result<(), SubscriptionError> {
        self.backend
            .delete_subscription(handle)
            .await
            .map_err(|source| SubscriptionError::Teardown {
                name: handle.name().to_string(),
                source,
            })
    }
}
