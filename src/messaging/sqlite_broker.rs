//! SQLite-backed topic/subscription broker.
//!
//! Publishing copies a message once per subscription bound to the topic
//! (`pending_messages`). Pulling leases rows by pushing `visible_at` out by
//! the subscription's ack deadline; acking deletes the row. A lease that
//! expires makes the row visible again with a new `ack_id`.

use super::{MessagingBackend, MessagingError, MessagingResult};
use crate::models::subscription::{ReceivedMessage, SubscriptionHandle};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::{sync::Arc, time::Duration};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct SqliteBroker {
    pub db: Arc<SqlitePool>,
}

impl SqliteBroker {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Publish `data` to every subscription currently bound to `topic`.
    /// Returns the message id and the number of subscriptions it reached.
    pub async fn publish(&self, topic: &str, data: &[u8]) -> MessagingResult<(String, u64)> {
        let message_id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            "INSERT INTO pending_messages
                 (id, message_id, subscription, data, published_at, visible_at, delivery_attempt)
             SELECT ? || '/' || name, ?, name, ?, ?, ?, 0
             FROM subscriptions WHERE topic = ?",
        )
        .bind(&message_id)
        .bind(&message_id)
        .bind(data)
        .bind(now)
        .bind(now)
        .bind(topic)
        .execute(&*self.db)
        .await?;

        debug!(
            topic,
            message_id = %message_id,
            fanout = result.rows_affected(),
            "published message"
        );
        Ok((message_id, result.rows_affected()))
    }

    async fn ack_deadline_millis(&self, handle: &SubscriptionHandle) -> MessagingResult<i64> {
        let secs: Option<i64> =
            sqlx::query_scalar("SELECT ack_deadline_secs FROM subscriptions WHERE name = ?")
                .bind(handle.name())
                .fetch_optional(&*self.db)
                .await?;
        secs.map(|s| s * 1000)
            .ok_or_else(|| MessagingError::SubscriptionNotFound(handle.name().to_string()))
    }
}

#[async_trait]
impl MessagingBackend for SqliteBroker {
    async fn subscription_exists(&self, name: &str) -> MessagingResult<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT name FROM subscriptions WHERE name = ?")
                .bind(name)
                .fetch_optional(&*self.db)
                .await?;
        Ok(found.is_some())
    }

    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        ack_deadline: Duration,
    ) -> MessagingResult<SubscriptionHandle> {
        sqlx::query(
            "INSERT INTO subscriptions (name, topic, ack_deadline_secs, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(topic)
        .bind(ack_deadline.as_secs() as i64)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        Ok(SubscriptionHandle::new(name))
    }

    async fn delete_subscription(&self, handle: &SubscriptionHandle) -> MessagingResult<()> {
        let mut tx = self.db.begin().await?;

        let deleted = sqlx::query("DELETE FROM subscriptions WHERE name = ?")
            .bind(handle.name())
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(MessagingError::SubscriptionNotFound(
                handle.name().to_string(),
            ));
        }

        let dropped = sqlx::query("DELETE FROM pending_messages WHERE subscription = ?")
            .bind(handle.name())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(
            subscription = %handle,
            dropped = dropped.rows_affected(),
            "deleted subscription"
        );
        Ok(())
    }

    async fn pull(
        &self,
        handle: &SubscriptionHandle,
        max_messages: usize,
    ) -> MessagingResult<Vec<ReceivedMessage>> {
        let deadline = self.ack_deadline_millis(handle).await?;
        let now = Utc::now().timestamp_millis();

        let rows = sqlx::query(
            "UPDATE pending_messages
             SET visible_at = ?,
                 delivery_attempt = delivery_attempt + 1,
                 ack_id = id || '#' || (delivery_attempt + 1)
             WHERE id IN (
                 SELECT id FROM pending_messages
                 WHERE subscription = ? AND visible_at <= ?
                 ORDER BY published_at, id
                 LIMIT ?
             )
             RETURNING message_id, ack_id, data, delivery_attempt",
        )
        .bind(now + deadline)
        .bind(handle.name())
        .bind(now)
        .bind(max_messages as i64)
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ReceivedMessage, sqlx::Error> {
                let data: Vec<u8> = row.try_get("data")?;
                let attempt: i64 = row.try_get("delivery_attempt")?;
                Ok(ReceivedMessage {
                    message_id: row.try_get("message_id")?,
                    ack_id: row.try_get("ack_id")?,
                    data: Bytes::from(data),
                    delivery_attempt: attempt as u32,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(MessagingError::from)
    }

    async fn ack(&self, handle: &SubscriptionHandle, ack_id: &str) -> MessagingResult<()> {
        let result =
            sqlx::query("DELETE FROM pending_messages WHERE subscription = ? AND ack_id = ?")
                .bind(handle.name())
                .bind(ack_id)
                .execute(&*self.db)
                .await?;
        if result.rows_affected() == 0 {
            debug!(subscription = %handle, ack_id, "ignoring stale ack");
        }
        Ok(())
    }
}
