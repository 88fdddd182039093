use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EventKind;

/// Unique identity of a message, assigned once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

/// Links a response back to the request that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

/// Immutable transport unit carried by the broker.
///
/// Fields are private; a message cannot change after it is built, so it is
/// shared between listeners as `Arc<Message<P>>` without locking.
#[derive(Debug)]
pub struct Message<P> {
    id: MessageId,
    kind: EventKind,
    payload: P,
    timestamp: DateTime<Utc>,
    correlation_id: Option<CorrelationId>,
}

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

/// A root message's own id becomes the correlation of its replies.
impl From<MessageId> for CorrelationId {
    fn from(id: MessageId) -> Self {
        Self(id.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<P> Message<P> {
    /// Builds a root message with a fresh id and the current time.
    pub fn new(
        kind: EventKind,
        payload: P,
    ) -> Self {
        Self {
            id: MessageId::new(),
            kind,
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// Builds a message causally linked to an earlier one.
    pub fn with_correlation(
        kind: EventKind,
        payload: P,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..Self::new(kind, payload)
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// Correlation a response to this message should carry.
    ///
    /// Falls back to the message's own id when it starts a new chain.
    pub fn reply_correlation(&self) -> CorrelationId {
        self.correlation_id
            .unwrap_or_else(|| CorrelationId::from(self.id))
    }
}

impl<P> fmt::Display for Message<P> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "Message{{id={}, kind={}, timestamp={}}}",
            self.id,
            self.kind,
            self.timestamp.to_rfc3339()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    /// A root message has no correlation and replies echo its id.
    #[test]
    fn test_root_message() {
        let msg = Message::new(EventKind::OrderConfirmed, "order1");
        assert_eq!(msg.kind(), EventKind::OrderConfirmed);
        assert_eq!(*msg.payload(), "order1");
        assert!(msg.correlation_id().is_none());
        assert_eq!(msg.reply_correlation().as_uuid(), msg.id().as_uuid());
    }

    /// A correlated message keeps the given id and hands it on to replies.
    #[test]
    fn test_correlated_message() {
        let cid = CorrelationId::new();
        let msg = Message::with_correlation(EventKind::ItemBrowseRequested, (), cid);
        assert_eq!(msg.correlation_id(), Some(cid));
        assert_eq!(msg.reply_correlation(), cid);
        assert_ne!(msg.id().as_uuid(), cid.as_uuid());
    }

    #[test]
    fn test_timestamp_is_construction_time() {
        let before = Utc::now();
        let msg = Message::new(EventKind::NotificationSent, 0u8);
        let after = Utc::now();
        assert!(msg.timestamp() >= before && msg.timestamp() <= after);
    }

    #[test]
    fn test_display_omits_payload() {
        let msg = Message::new(EventKind::PaymentDenied, "card 4111");
        let s = msg.to_string();
        assert!(s.contains("PaymentDenied"));
        assert!(!s.contains("4111"));
    }

    proptest! {
        /// Identities never repeat, however many messages are built.
        #[test]
        fn prop_message_ids_unique(n in 1usize..500) {
            let ids: HashSet<MessageId> = (0..n)
                .map(|i| Message::new(EventKind::ItemListReturned, i).id())
                .collect();
            prop_assert_eq!(ids.len(), n);
        }
    }
}
