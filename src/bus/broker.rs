use std::{any::Any, fmt, sync::Arc};

use mallbus_error::{BrokerError, ErrorExt, ListenerError, LogLevel, PublishError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc, watch},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info, trace, warn};

/// Logs an [`ErrorExt`] error at the level its status code maps to.
macro_rules! log_by_code {
    ($err:expr, $($rest:tt)+) => {{
        let err = &$err;
        let code = ErrorExt::status_code(err);
        match ErrorExt::log_level(err) {
            LogLevel::Trace => trace!(%code, error = %err, $($rest)+),
            LogLevel::Debug => debug!(%code, error = %err, $($rest)+),
            LogLevel::Info => info!(%code, error = %err, $($rest)+),
            LogLevel::Warn => warn!(%code, error = %err, $($rest)+),
            LogLevel::Error => error!(%code, error = %err, $($rest)+),
        }
    }};
}

use super::{
    delivery::{DeliveryTracker, Outcome},
    BrokerStats, Delivery, EventKind, Listener, ListenerEntry, ListenerFailure, ListenerId,
    ListenerRegistry, Message, MessageId, StatsSnapshot,
};

const FAILURE_CHANNEL_CAPACITY: usize = 256;

/// Sizing of the broker, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Slots of the shared message queue.
    pub queue_capacity: usize,
    /// Number of worker tasks running listeners.
    pub worker_threads: usize,
    /// Slots of the worker pool's job queue.
    pub task_queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            worker_threads: 8,
            task_queue_capacity: 1024,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), BrokerError> {
        let fields = [
            ("queue_capacity", self.queue_capacity),
            ("worker_threads", self.worker_threads),
            ("task_queue_capacity", self.task_queue_capacity),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(BrokerError::InvalidConfig {
                    field,
                    reason: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Broker lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum BrokerState {
    Created,
    Running,
    Stopped,
}

/// Asynchronous in-process publish/subscribe broker.
///
/// Producers call [`Broker::publish`], which never waits: the message goes
/// into one bounded FIFO shared by all kinds or is rejected. A single
/// dispatcher task drains the queue in order and hands one job per
/// listener to a fixed pool of worker tasks, without waiting for them.
/// Listeners of one message run concurrently and may finish after
/// listeners of later messages.
///
/// `Broker` is a cheap handle; clones share one engine, so a listener can
/// keep a clone and publish from inside its callback.
pub struct Broker<P> {
    inner: Arc<Inner<P>>,
}

struct Inner<P> {
    config: BrokerConfig,
    registry: ListenerRegistry<P>,
    queue_tx: mpsc::Sender<Envelope<P>>,
    /// Taken by the dispatcher at start.
    queue_rx: Mutex<Option<mpsc::Receiver<Envelope<P>>>>,
    state: Mutex<BrokerState>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<JoinSet<()>>,
    runtime: Mutex<Option<Handle>>,
    stats: BrokerStats,
    failures: broadcast::Sender<ListenerFailure>,
}

struct Envelope<P> {
    message: Arc<Message<P>>,
    tracker: Option<Arc<DeliveryTracker>>,
}

struct Job<P> {
    entry: ListenerEntry<P>,
    message: Arc<Message<P>>,
    tracker: Option<Arc<DeliveryTracker>>,
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<P> Clone for Broker<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Send + Sync + 'static> fmt::Debug for Broker<P> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Broker")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .field("queue_len", &self.queue_len())
            .field("listeners", &self.inner.registry.total())
            .finish()
    }
}

impl<P: Send + Sync + 'static> Broker<P> {
    /// Creates a stopped broker. Nothing runs until [`Broker::start`].
    pub fn new(config: BrokerConfig) -> Result<Self, BrokerError> {
        config.validate()?;
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown, _) = watch::channel(false);
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry: ListenerRegistry::new(),
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                state: Mutex::new(BrokerState::Created),
                shutdown,
                tasks: Mutex::new(JoinSet::new()),
                runtime: Mutex::new(None),
                stats: BrokerStats::default(),
                failures,
            }),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Starts the dispatcher and workers on the current tokio runtime.
    ///
    /// A second call while running is a no-op. A stopped broker cannot be
    /// restarted.
    pub fn start(&self) -> Result<(), BrokerError> {
        match Handle::try_current() {
            Ok(handle) => self.start_on(handle),
            Err(_) => match self.state() {
                BrokerState::Running => Ok(()),
                BrokerState::Stopped => Err(BrokerError::Stopped),
                BrokerState::Created => Err(BrokerError::NoRuntime),
            },
        }
    }

    /// Starts the broker on an explicit runtime.
    pub fn start_on(
        &self,
        handle: Handle,
    ) -> Result<(), BrokerError> {
        let mut state = self.inner.state.lock();
        match *state {
            BrokerState::Running => {
                debug!("broker already running, start ignored");
                return Ok(());
            }
            BrokerState::Stopped => return Err(BrokerError::Stopped),
            BrokerState::Created => {}
        }
        let queue_rx = self
            .inner
            .queue_rx
            .lock()
            .take()
            .ok_or(BrokerError::Stopped)?;

        let config = self.inner.config;
        let (job_tx, job_rx) = mpsc::channel::<Job<P>>(config.task_queue_capacity);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        let mut tasks = self.inner.tasks.lock();
        tasks.spawn_on(
            dispatch_loop(
                Arc::clone(&self.inner),
                queue_rx,
                job_tx,
                self.inner.shutdown.subscribe(),
            ),
            &handle,
        );
        for worker in 0..config.worker_threads {
            tasks.spawn_on(
                worker_loop(
                    worker,
                    Arc::clone(&self.inner),
                    Arc::clone(&job_rx),
                    self.inner.shutdown.subscribe(),
                ),
                &handle,
            );
        }
        *self.inner.runtime.lock() = Some(handle);
        *state = BrokerState::Running;

        info!(
            queue_capacity = config.queue_capacity,
            workers = config.worker_threads,
            task_queue_capacity = config.task_queue_capacity,
            "broker started"
        );
        Ok(())
    }

    /// Stops the broker without draining.
    ///
    /// Messages still queued are discarded and in-flight listener calls are
    /// aborted. Safe to call more than once.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == BrokerState::Stopped {
                return;
            }
            *state = BrokerState::Stopped;
        }
        self.inner.shutdown.send_replace(true);
        self.inner.tasks.lock().abort_all();
        // Never started: drop the queue so nothing can be enqueued.
        self.inner.queue_rx.lock().take();

        info!(
            queue_len = self.queue_len(),
            "broker stopped, queued messages abandoned"
        );
    }

    /// Stops the broker and waits for its tasks to exit.
    pub async fn stop_and_join(&self) {
        self.stop();
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock());
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    error!(error = %e, "broker task panicked");
                }
            }
        }
        debug!("broker tasks joined");
    }

    pub fn state(&self) -> BrokerState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == BrokerState::Running
    }

    /// Subscribes `listener` to `kind`. Takes effect for every message
    /// dispatched afterwards, including ones already queued.
    pub fn register_listener(
        &self,
        kind: EventKind,
        listener: Arc<dyn Listener<P>>,
    ) -> ListenerId {
        let id = self.inner.registry.register(kind, listener);
        trace!(%kind, listener = %id, "listener registered");
        id
    }

    /// Subscribes an async closure.
    pub fn register_fn<F, Fut>(
        &self,
        kind: EventKind,
        f: F,
    ) -> ListenerId
    where
        F: Fn(Arc<Message<P>>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        self.register_listener(kind, Arc::new(f))
    }

    /// Removes every registration of this listener instance for `kind`.
    pub fn unregister_listener(
        &self,
        kind: EventKind,
        listener: &Arc<dyn Listener<P>>,
    ) -> bool {
        let removed = self.inner.registry.remove_listener(kind, listener);
        trace!(%kind, removed, "listener unregistered");
        removed
    }

    /// Removes the registration behind `id`.
    pub fn unregister(
        &self,
        kind: EventKind,
        id: ListenerId,
    ) -> bool {
        let removed = self.inner.registry.remove(kind, id);
        trace!(%kind, listener = %id, removed, "listener unregistered");
        removed
    }

    pub fn listener_count(
        &self,
        kind: EventKind,
    ) -> usize {
        self.inner.registry.count(kind)
    }

    /// Publishes a root message. Never waits.
    ///
    /// A rejection is logged and counted before it is returned.
    pub fn publish(
        &self,
        kind: EventKind,
        payload: P,
    ) -> Result<MessageId, PublishError> {
        self.publish_message(Message::new(kind, payload))
    }

    /// Publishes a pre-built message, for example one carrying a
    /// correlation id.
    pub fn publish_message(
        &self,
        message: Message<P>,
    ) -> Result<MessageId, PublishError> {
        self.enqueue(message, None)
    }

    /// Publishes a response that echoes the correlation of `request`.
    pub fn reply(
        &self,
        request: &Message<P>,
        kind: EventKind,
        payload: P,
    ) -> Result<MessageId, PublishError> {
        self.publish_message(Message::with_correlation(
            kind,
            payload,
            request.reply_correlation(),
        ))
    }

    /// Publishes a message whose delivery can be awaited.
    pub fn publish_tracked(
        &self,
        kind: EventKind,
        payload: P,
    ) -> Result<Delivery, PublishError> {
        let message = Message::new(kind, payload);
        let (tracker, delivery) = DeliveryTracker::new(message.id());
        self.enqueue(message, Some(Arc::new(tracker)))?;
        Ok(delivery)
    }

    fn enqueue(
        &self,
        message: Message<P>,
        tracker: Option<Arc<DeliveryTracker>>,
    ) -> Result<MessageId, PublishError> {
        let kind = message.kind();
        let id = message.id();
        let stats = &self.inner.stats;

        if !self.is_running() {
            BrokerStats::incr(&stats.rejected_not_running);
            let err = PublishError::NotRunning {
                kind: kind.to_string(),
            };
            log_by_code!(err, %kind, message_id = %id, "broker is not running, message dropped");
            return Err(err);
        }

        let envelope = Envelope {
            message: Arc::new(message),
            tracker,
        };
        match self.inner.queue_tx.try_send(envelope) {
            Ok(()) => {
                BrokerStats::incr(&stats.published);
                trace!(%kind, message_id = %id, "message queued");
                Ok(id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                BrokerStats::incr(&stats.rejected_queue_full);
                let capacity = self.inner.config.queue_capacity;
                let err = PublishError::QueueFull {
                    kind: kind.to_string(),
                    capacity,
                };
                log_by_code!(err, %kind, message_id = %id, capacity, "queue full, message rejected");
                Err(err)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                BrokerStats::incr(&stats.rejected_not_running);
                let err = PublishError::NotRunning {
                    kind: kind.to_string(),
                };
                log_by_code!(err, %kind, message_id = %id, "dispatcher gone, message dropped");
                Err(err)
            }
        }
    }

    /// Messages waiting for the dispatcher.
    pub fn queue_len(&self) -> usize {
        let tx = &self.inner.queue_tx;
        tx.max_capacity() - tx.capacity()
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.config.queue_capacity
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(self.queue_len())
    }

    /// Stream of listener failures.
    ///
    /// The channel is lossy: a slow receiver skips the oldest failures.
    pub fn failures(&self) -> broadcast::Receiver<ListenerFailure> {
        self.inner.failures.subscribe()
    }

    /// Runtime captured by `start`, used by the blocking helpers.
    pub(crate) fn runtime_handle(&self) -> Option<Handle> {
        self.inner.runtime.lock().clone()
    }
}

/// Resolves once shutdown has been requested.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // An error means the broker itself is gone.
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn dispatch_loop<P: Send + Sync + 'static>(
    inner: Arc<Inner<P>>,
    mut queue: mpsc::Receiver<Envelope<P>>,
    jobs: mpsc::Sender<Job<P>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("dispatcher loop started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            next = queue.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        dispatch(&inner, &jobs, envelope);
    }
    debug!("dispatcher loop stopped");
}

fn dispatch<P: Send + Sync + 'static>(
    inner: &Inner<P>,
    jobs: &mpsc::Sender<Job<P>>,
    envelope: Envelope<P>,
) {
    let Envelope { message, tracker } = envelope;
    let kind = message.kind();
    let snapshot = inner.registry.snapshot(kind);
    BrokerStats::incr(&inner.stats.dispatched);
    debug!(%kind, message_id = %message.id(), listeners = snapshot.len(), "dispatching");

    if let Some(t) = &tracker {
        t.begin(snapshot.len());
    }

    for entry in snapshot {
        let listener_id = entry.id;
        let job = Job {
            entry,
            message: Arc::clone(&message),
            tracker: tracker.clone(),
        };
        match jobs.try_send(job) {
            Ok(()) => BrokerStats::incr(&inner.stats.jobs_submitted),
            Err(e) => {
                BrokerStats::incr(&inner.stats.jobs_dropped);
                warn!(
                    %kind,
                    message_id = %message.id(),
                    listener = %listener_id,
                    capacity = inner.config.task_queue_capacity,
                    "worker queue full, listener job dropped"
                );
                if let Some(t) = &e.into_inner().tracker {
                    t.record(Outcome::Dropped);
                }
            }
        }
    }
}

async fn worker_loop<P: Send + Sync + 'static>(
    worker: usize,
    inner: Arc<Inner<P>>,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<Job<P>>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    trace!(worker, "worker started");
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            job = async { jobs.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };
        run_job(&inner, job).await;
    }
    trace!(worker, "worker stopped");
}

/// Runs one listener call in its own task so a panic stays contained.
async fn run_job<P: Send + Sync + 'static>(
    inner: &Inner<P>,
    job: Job<P>,
) {
    let Job {
        entry,
        message,
        tracker,
    } = job;
    let kind = message.kind();
    let message_id = message.id();

    let listener = Arc::clone(&entry.listener);
    let mut call = AbortOnDrop(tokio::spawn(async move {
        listener.on_message(message).await
    }));

    let error = match (&mut call.0).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(e) if e.is_panic() => {
            BrokerStats::incr(&inner.stats.listener_panics);
            Some(ListenerError::Panicked {
                reason: panic_reason(e.into_panic()),
            })
        }
        // Cancelled together with the broker.
        Err(_) => return,
    };

    let outcome = match error {
        None => {
            BrokerStats::incr(&inner.stats.listener_successes);
            Outcome::Succeeded
        }
        Some(error) => {
            BrokerStats::incr(&inner.stats.listener_failures);
            log_by_code!(error, %kind, %message_id, listener = %entry.id, "listener failed");
            let failure = ListenerFailure {
                message_id,
                kind,
                listener_id: entry.id,
                error,
            };
            // No receivers is fine.
            let _ = inner.failures.send(failure.clone());
            Outcome::Failed(failure)
        }
    };
    if let Some(t) = tracker {
        t.record(outcome);
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use mallbus_error::DeliveryError;
    use rstest::rstest;
    use tokio::{sync::mpsc::unbounded_channel, time::timeout};

    use super::*;
    use crate::bus::listener_fn;

    fn small(
        queue_capacity: usize,
        worker_threads: usize,
        task_queue_capacity: usize,
    ) -> BrokerConfig {
        BrokerConfig {
            queue_capacity,
            worker_threads,
            task_queue_capacity,
        }
    }

    #[rstest]
    #[case(small(0, 1, 1), "queue_capacity")]
    #[case(small(1, 0, 1), "worker_threads")]
    #[case(small(1, 1, 0), "task_queue_capacity")]
    fn test_zero_sizes_rejected(
        #[case] config: BrokerConfig,
        #[case] field: &str,
    ) {
        let err = Broker::<()>::new(config).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidConfig { field: f, .. } if f == field));
    }

    #[test]
    fn test_default_sizing() {
        let config = BrokerConfig::default();
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.task_queue_capacity, 1024);
    }

    #[test]
    fn test_start_without_runtime() {
        let broker = Broker::<()>::new(BrokerConfig::default()).unwrap();
        assert_eq!(broker.start(), Err(BrokerError::NoRuntime));
        assert_eq!(broker.state(), BrokerState::Created);
    }

    #[test]
    fn test_debug_output() {
        let broker = Broker::<String>::new(small(4, 1, 4)).unwrap();
        let out = format!("{broker:?}");
        assert!(out.starts_with("Broker"), "got: {out}");
        assert!(out.contains("Created"), "got: {out}");
        assert!(out.contains("queue_len: 0"), "got: {out}");
        assert!(out.contains("listeners: 0"), "got: {out}");
    }

    /// Publishing before start is rejected, counted and never panics.
    #[test]
    fn test_publish_before_start() {
        let broker = Broker::new(BrokerConfig::default()).unwrap();
        let err = broker.publish(EventKind::OrderConfirmed, "order1").unwrap_err();
        assert!(matches!(err, PublishError::NotRunning { .. }));
        assert_eq!(err.log_level(), LogLevel::Warn);
        assert_eq!(broker.stats().rejected_not_running, 1);
        assert_eq!(broker.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_no_restart() {
        let broker = Broker::<()>::new(BrokerConfig::default()).unwrap();
        broker.start().unwrap();
        broker.start().unwrap();
        assert!(broker.is_running());

        broker.stop_and_join().await;
        broker.stop();
        assert_eq!(broker.state(), BrokerState::Stopped);
        assert_eq!(broker.start(), Err(BrokerError::Stopped));
        assert!(matches!(
            broker.publish(EventKind::OrderConfirmed, ()),
            Err(PublishError::NotRunning { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fan_out_to_all_listeners() {
        let broker = Broker::new(BrokerConfig::default()).unwrap();
        let (tx, mut rx) = unbounded_channel();
        for n in 0..3 {
            let tx = tx.clone();
            broker.register_fn(EventKind::OrderConfirmed, move |m: Arc<Message<&'static str>>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send((n, *m.payload()));
                    Ok(())
                }
            });
        }
        broker.start().unwrap();
        broker.publish(EventKind::OrderConfirmed, "order1").unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec![(0, "order1"), (1, "order1"), (2, "order1")]);
        broker.stop_and_join().await;
    }

    /// The listener set is read at dispatch, not at publish.
    #[tokio::test]
    async fn test_snapshot_taken_at_dispatch() {
        let broker = Broker::new(BrokerConfig::default()).unwrap();
        broker.start().unwrap();

        let removed = listener_fn(|_m: Arc<Message<u8>>| async {
            Err(ListenerError::failed("must not run"))
        });
        broker.register_listener(EventKind::ItemListReturned, Arc::clone(&removed));
        let delivery = broker
            .publish_tracked(EventKind::ItemListReturned, 7)
            .unwrap();

        // Still queued: the current-thread runtime has not run the dispatcher.
        assert!(broker.unregister_listener(EventKind::ItemListReturned, &removed));
        let (tx, mut rx) = unbounded_channel();
        broker.register_fn(EventKind::ItemListReturned, move |m: Arc<Message<u8>>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(*m.payload());
                Ok(())
            }
        });

        assert_eq!(rx.recv().await, Some(7));
        let report = delivery.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.listeners, 1);
        assert_eq!(report.succeeded, 1);
        broker.stop_and_join().await;
    }

    /// With the dispatcher unable to run, the queue fills to capacity and
    /// the next publish is rejected immediately.
    #[tokio::test]
    async fn test_queue_full_drops() {
        let broker = Broker::new(small(4, 1, 4)).unwrap();
        broker.start().unwrap();
        for i in 0..4 {
            broker.publish(EventKind::NotificationSent, i).unwrap();
        }
        let err = broker.publish(EventKind::NotificationSent, 99).unwrap_err();
        assert_eq!(
            err,
            PublishError::QueueFull {
                kind: "NotificationSent".to_string(),
                capacity: 4,
            }
        );
        assert_eq!(broker.queue_len(), 4);
        let stats = broker.stats();
        assert_eq!(stats.published, 4);
        assert_eq!(stats.rejected_queue_full, 1);
        broker.stop_and_join().await;
    }

    #[tokio::test]
    async fn test_stop_abandons_queued_messages() {
        let broker = Broker::new(BrokerConfig::default()).unwrap();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        broker.register_fn(EventKind::OrderConfirmed, move |_m: Arc<Message<u32>>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        broker.start().unwrap();
        let tracked = broker.publish_tracked(EventKind::OrderConfirmed, 0).unwrap();
        for i in 1..5 {
            broker.publish(EventKind::OrderConfirmed, i).unwrap();
        }

        timeout(Duration::from_secs(1), broker.stop_and_join())
            .await
            .expect("dispatcher did not exit");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(
            tracked.wait(Duration::from_secs(1)).await,
            Err(DeliveryError::Abandoned)
        );
    }

    /// A failing or panicking listener does not affect its siblings.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_isolated_and_reported() {
        let broker = Broker::new(BrokerConfig::default()).unwrap();
        let mut failures = broker.failures();
        let failing = broker.register_fn(EventKind::PaymentAuthorizationRequested, |_m: Arc<Message<()>>| async {
            Err(ListenerError::failed("card declined by gateway"))
        });
        broker.register_fn(EventKind::PaymentAuthorizationRequested, |_m: Arc<Message<()>>| async {
            if true {
                panic!("listener bug");
            }
            Ok(())
        });
        broker.register_fn(EventKind::PaymentAuthorizationRequested, |_m: Arc<Message<()>>| async { Ok(()) });
        broker.start().unwrap();

        let report = broker
            .publish_tracked(EventKind::PaymentAuthorizationRequested, ())
            .unwrap()
            .wait(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(report.listeners, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed.len(), 2);
        assert!(report
            .failed
            .iter()
            .any(|f| f.listener_id == failing && f.error == ListenerError::failed("card declined by gateway")));
        assert!(report.failed.iter().any(|f| f.error
            == ListenerError::Panicked {
                reason: "listener bug".to_string()
            }));

        let first = timeout(Duration::from_secs(1), failures.recv()).await.unwrap().unwrap();
        assert_eq!(first.kind, EventKind::PaymentAuthorizationRequested);

        let stats = broker.stats();
        assert_eq!(stats.listener_failures, 2);
        assert_eq!(stats.listener_panics, 1);
        assert_eq!(stats.listener_successes, 1);

        // The engine keeps working after the panic.
        let again = broker
            .publish_tracked(EventKind::PaymentAuthorizationRequested, ())
            .unwrap()
            .wait(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(again.succeeded, 1);
        broker.stop_and_join().await;
    }

    /// Jobs beyond the worker queue capacity are dropped, not queued.
    #[tokio::test]
    async fn test_worker_queue_full_drops_jobs() {
        let broker = Broker::new(small(8, 1, 1)).unwrap();
        for _ in 0..3 {
            broker.register_fn(EventKind::ShippingRequested, |_m: Arc<Message<()>>| async { Ok(()) });
        }
        broker.start().unwrap();
        let report = broker
            .publish_tracked(EventKind::ShippingRequested, ())
            .unwrap()
            .wait(Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(report.listeners, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.dropped, 2);
        assert_eq!(broker.stats().jobs_dropped, 2);
        broker.stop_and_join().await;
    }

    /// A listener may publish through its own clone of the broker.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reentrant_publish() {
        let broker = Broker::new(BrokerConfig::default()).unwrap();
        let inner = broker.clone();
        broker.register_fn(EventKind::OrderCreatedRequested, move |m: Arc<Message<String>>| {
            let broker = inner.clone();
            async move {
                broker
                    .reply(&m, EventKind::OrderConfirmed, format!("{} ok", m.payload()))
                    .map(|_| ())
                    .map_err(|e| ListenerError::failed(e.to_string()))
            }
        });
        let (tx, mut rx) = unbounded_channel();
        broker.register_fn(EventKind::OrderConfirmed, move |m: Arc<Message<String>>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(m);
                Ok(())
            }
        });
        broker.start().unwrap();

        let id = broker
            .publish(EventKind::OrderCreatedRequested, "order7".to_string())
            .unwrap();
        let confirmed = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(confirmed.payload(), "order7 ok");
        assert_eq!(
            confirmed.correlation_id().map(|c| *c.as_uuid()),
            Some(*id.as_uuid())
        );
        broker.stop_and_join().await;
    }
}
