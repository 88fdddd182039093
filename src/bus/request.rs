//! "Ask once, get one answer" on top of fire-and-forget publishing.
//!
//! Two flavours exist. [`Broker::request_once`] takes the next message of
//! the response kind, whoever it was meant for. It is only sound while at
//! most one request awaiting a given response kind is in flight in the
//! whole process; overlapping requests can receive each other's replies
//! (the known `KindOnlyCorrelation` defect). [`Broker::request`] tags the
//! request with a fresh [`CorrelationId`] and accepts only a response that
//! echoes it, so concurrent requests never cross.

use std::{
    future::Future,
    sync::{mpsc, Arc},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{Broker, CorrelationId, EventKind, ListenerId, Message};

/// Unregisters a temporary listener however the request ends.
struct ListenerGuard<'a, P: Send + Sync + 'static> {
    broker: &'a Broker<P>,
    kind: EventKind,
    id: ListenerId,
}

impl<P: Send + Sync + 'static> Drop for ListenerGuard<'_, P> {
    fn drop(&mut self) {
        self.broker.unregister(self.kind, self.id);
    }
}

type Slot<P> = Arc<Mutex<Option<oneshot::Sender<Arc<Message<P>>>>>>;

/// Extra time a blocking caller waits past the request timeout for the
/// runtime to hand the answer back.
const BLOCKING_GRACE: Duration = Duration::from_millis(250);

impl<P: Send + Sync + 'static> Broker<P> {
    /// Publishes a request and waits for the next message of
    /// `response_kind`.
    ///
    /// Returns `None` on timeout or when the request is rejected. Matching
    /// is by kind only; see the module docs.
    pub async fn request_once(
        &self,
        request_kind: EventKind,
        payload: P,
        response_kind: EventKind,
        timeout: Duration,
    ) -> Option<Arc<Message<P>>> {
        self.await_response(
            Message::new(request_kind, payload),
            response_kind,
            None,
            timeout,
        )
        .await
    }

    /// Publishes a request tagged with a fresh correlation id and waits for
    /// the response that echoes it.
    ///
    /// Responders must answer with [`Broker::reply`].
    pub async fn request(
        &self,
        request_kind: EventKind,
        payload: P,
        response_kind: EventKind,
        timeout: Duration,
    ) -> Option<Arc<Message<P>>> {
        let correlation = CorrelationId::new();
        self.await_response(
            Message::with_correlation(request_kind, payload, correlation),
            response_kind,
            Some(correlation),
            timeout,
        )
        .await
    }

    /// Blocking form of [`Broker::request_once`] for synchronous callers.
    ///
    /// The request runs as a task on the runtime captured by `start` while
    /// the calling thread waits at most `timeout` plus a short grace period.
    /// Returns `None` if the broker was never started, the runtime is gone,
    /// or the wait runs out. Calling it from inside a runtime never panics,
    /// but on a current-thread runtime the request cannot progress while
    /// the thread is blocked, so the call always waits out its timeout.
    pub fn request_once_blocking(
        &self,
        request_kind: EventKind,
        payload: P,
        response_kind: EventKind,
        timeout: Duration,
    ) -> Option<Arc<Message<P>>> {
        let broker = self.clone();
        self.wait_blocking(timeout, async move {
            broker
                .request_once(request_kind, payload, response_kind, timeout)
                .await
        })
    }

    /// Blocking form of [`Broker::request`]. Same behaviour as
    /// [`Broker::request_once_blocking`].
    pub fn request_blocking(
        &self,
        request_kind: EventKind,
        payload: P,
        response_kind: EventKind,
        timeout: Duration,
    ) -> Option<Arc<Message<P>>> {
        let broker = self.clone();
        self.wait_blocking(timeout, async move {
            broker
                .request(request_kind, payload, response_kind, timeout)
                .await
        })
    }

    fn wait_blocking<F>(
        &self,
        timeout: Duration,
        request: F,
    ) -> Option<Arc<Message<P>>>
    where
        F: Future<Output = Option<Arc<Message<P>>>> + Send + 'static,
    {
        let Some(handle) = self.runtime_handle() else {
            warn!("blocking request on a broker that was never started");
            return None;
        };
        let (tx, rx) = mpsc::sync_channel(1);
        // A runtime that already shut down drops the task, and with it `tx`.
        handle.spawn(async move {
            let _ = tx.send(request.await);
        });
        match rx.recv_timeout(timeout.saturating_add(BLOCKING_GRACE)) {
            Ok(reply) => reply,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(?timeout, "blocking request gave up waiting for the runtime");
                None
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                debug!("runtime dropped the blocking request");
                None
            }
        }
    }

    async fn await_response(
        &self,
        request: Message<P>,
        response_kind: EventKind,
        correlation: Option<CorrelationId>,
        timeout: Duration,
    ) -> Option<Arc<Message<P>>> {
        let request_kind = request.kind();
        let (tx, rx) = oneshot::channel();
        let slot: Slot<P> = Arc::new(Mutex::new(Some(tx)));

        // Registered before publishing so a fast responder cannot be missed.
        let id = self.register_fn(response_kind, move |msg: Arc<Message<P>>| {
            let slot = Arc::clone(&slot);
            async move {
                if correlation.is_none() || msg.correlation_id() == correlation {
                    if let Some(tx) = slot.lock().take() {
                        let _ = tx.send(msg);
                    }
                }
                Ok(())
            }
        });
        let _guard = ListenerGuard {
            broker: self,
            kind: response_kind,
            id,
        };

        if let Err(e) = self.publish_message(request) {
            debug!(%request_kind, error = %e, "request not published");
            return None;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => None,
            Err(_) => {
                debug!(
                    %request_kind,
                    %response_kind,
                    ?timeout,
                    "request timed out"
                );
                None
            }
        }
    }
}
