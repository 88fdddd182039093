use std::time::Duration;

use mallbus_error::{DeliveryError, ListenerError};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{EventKind, ListenerId, MessageId};

/// One listener invocation that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub message_id: MessageId,
    pub kind: EventKind,
    pub listener_id: ListenerId,
    pub error: ListenerError,
}

/// Outcome of a tracked publish once every listener has been accounted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub message_id: MessageId,
    /// Size of the listener snapshot taken at dispatch.
    pub listeners: usize,
    pub succeeded: usize,
    pub failed: Vec<ListenerFailure>,
    /// Jobs the worker pool refused because its queue was full.
    pub dropped: usize,
}

/// Counts-only form of a report, for structured logs.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeliverySummary {
    pub listeners: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dropped: usize,
}

impl DeliveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.dropped == 0
    }

    pub fn summary(&self) -> DeliverySummary {
        DeliverySummary {
            listeners: self.listeners,
            succeeded: self.succeeded,
            failed: self.failed.len(),
            dropped: self.dropped,
        }
    }
}

/// Awaitable handle of a tracked publish.
#[derive(Debug)]
pub struct Delivery {
    message_id: MessageId,
    rx: oneshot::Receiver<DeliveryReport>,
}

impl Delivery {
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Waits until every listener of the dispatch snapshot has finished.
    ///
    /// Returns [`DeliveryError::Abandoned`] when the broker stopped first.
    pub async fn wait(
        self,
        timeout: Duration,
    ) -> Result<DeliveryReport, DeliveryError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(_)) => Err(DeliveryError::Abandoned),
            Err(_) => Err(DeliveryError::Timeout {
                waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

pub(crate) enum Outcome {
    Succeeded,
    Failed(ListenerFailure),
    Dropped,
}

struct Progress {
    listeners: usize,
    remaining: usize,
    succeeded: usize,
    failed: Vec<ListenerFailure>,
    dropped: usize,
    done: Option<oneshot::Sender<DeliveryReport>>,
}

/// Collects per-listener outcomes for one tracked message.
///
/// Dropping the tracker before completion drops the sender, which the
/// waiting [`Delivery`] observes as abandonment.
pub(crate) struct DeliveryTracker {
    message_id: MessageId,
    progress: Mutex<Progress>,
}

impl DeliveryTracker {
    pub(crate) fn new(message_id: MessageId) -> (Self, Delivery) {
        let (tx, rx) = oneshot::channel();
        let tracker = Self {
            message_id,
            progress: Mutex::new(Progress {
                listeners: 0,
                remaining: 0,
                succeeded: 0,
                failed: Vec::new(),
                dropped: 0,
                done: Some(tx),
            }),
        };
        (tracker, Delivery { message_id, rx })
    }

    /// Fixes the number of outcomes to expect. Called once at dispatch.
    pub(crate) fn begin(
        &self,
        listeners: usize,
    ) {
        let mut p = self.progress.lock();
        p.listeners = listeners;
        p.remaining = listeners;
        if listeners == 0 {
            self.finish(&mut p);
        }
    }

    pub(crate) fn record(
        &self,
        outcome: Outcome,
    ) {
        let mut p = self.progress.lock();
        match outcome {
            Outcome::Succeeded => p.succeeded += 1,
            Outcome::Failed(failure) => p.failed.push(failure),
            Outcome::Dropped => p.dropped += 1,
        }
        p.remaining = p.remaining.saturating_sub(1);
        if p.remaining == 0 {
            self.finish(&mut p);
        }
    }

    fn finish(
        &self,
        p: &mut Progress,
    ) {
        if let Some(tx) = p.done.take() {
            let report = DeliveryReport {
                message_id: self.message_id,
                listeners: p.listeners,
                succeeded: p.succeeded,
                failed: std::mem::take(&mut p.failed),
                dropped: p.dropped,
            };
            // The publisher may have stopped waiting.
            let _ = tx.send(report);
        }
    }
}
