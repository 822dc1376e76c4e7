//! Subscription identity and delivered messages.

use bytes::Bytes;
use std::fmt;

/// Handle to a named subscription on the messaging backend.
///
/// Identity is the subscription name: two handles for the same name refer
/// to the same subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    name: String,
}

impl SubscriptionHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Build the subscription name for a pipeline instance.
///
/// Derived from a stable identifier plus the target label so a redeployed
/// pipeline picks its old subscription back up.
pub fn subscription_name(stable_id: &str, target_label: &str) -> String {
    format!("{}+{}", stable_id, target_label)
}

/// One delivery of a message to a subscription.
#[derive(Clone, Debug)]
pub struct ReceivedMessage {
    /// Backend-assigned id, stable across redeliveries.
    pub message_id: String,

    /// Token for acknowledging this particular delivery.
    pub ack_id: String,

    /// Raw notification payload.
    pub data: Bytes,

    /// 1 for the first delivery, incremented on each redelivery.
    pub delivery_attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_name_combines_id_and_label() {
        assert_eq!(subscription_name("archiver-7f9c", "cat"), "archiver-7f9c+cat");
    }

    #[test]
    fn handles_compare_by_name() {
        assert_eq!(SubscriptionHandle::new("a+cat"), SubscriptionHandle::new("a+cat"));
        assert_ne!(SubscriptionHandle::new("a+cat"), SubscriptionHandle::new("a+dog"));
    }
}
