use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use mallbus_error::ListenerError;

use super::Message;

/// Callback invoked once per delivered message of a subscribed kind.
///
/// Listeners run concurrently on the broker's worker pool. The returned
/// future is awaited by the worker, so a listener that models asynchronous
/// work is not fire-and-forget: its outcome reaches the failure stream and
/// any tracked delivery.
#[async_trait]
pub trait Listener<P>: Send + Sync + 'static {
    async fn on_message(
        &self,
        message: Arc<Message<P>>,
    ) -> Result<(), ListenerError>;
}

/// Any async closure taking the shared message is a listener.
#[async_trait]
impl<P, F, Fut> Listener<P> for F
where
    P: Send + Sync + 'static,
    F: Fn(Arc<Message<P>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    async fn on_message(
        &self,
        message: Arc<Message<P>>,
    ) -> Result<(), ListenerError> {
        (self)(message).await
    }
}

/// Wraps a closure into a shareable listener handle.
///
/// Keep the returned `Arc` to unregister the listener by identity later.
pub fn listener_fn<P, F, Fut>(f: F) -> Arc<dyn Listener<P>>
where
    P: Send + Sync + 'static,
    F: Fn(Arc<Message<P>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    Arc::new(f)
}

/// Handle returned by registration, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Identity comparison of two listener handles.
///
/// Only the data pointer is compared; vtable pointers of the same type may
/// differ between codegen units.
pub fn same_listener<P>(
    a: &Arc<dyn Listener<P>>,
    b: &Arc<dyn Listener<P>>,
) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::bus::EventKind;

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl Listener<u32> for Counting {
        async fn on_message(
            &self,
            message: Arc<Message<u32>>,
        ) -> Result<(), ListenerError> {
            self.seen.fetch_add(*message.payload() as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_struct_listener() {
        let l = Counting {
            seen: AtomicUsize::new(0),
        };
        l.on_message(Arc::new(Message::new(EventKind::ItemRefillRequested, 5)))
            .await
            .unwrap();
        assert_eq!(l.seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_closure_listener() {
        let l = listener_fn(|msg: Arc<Message<&'static str>>| async move {
            if *msg.payload() == "bad" {
                return Err(ListenerError::failed("rejected"));
            }
            Ok(())
        });
        let ok = Arc::new(Message::new(EventKind::WishlistAddRequested, "good"));
        let bad = Arc::new(Message::new(EventKind::WishlistAddRequested, "bad"));
        assert!(l.on_message(ok).await.is_ok());
        assert_eq!(
            l.on_message(bad).await,
            Err(ListenerError::failed("rejected"))
        );
    }

    #[test]
    fn test_identity() {
        let a = listener_fn(|_m: Arc<Message<()>>| async { Ok(()) });
        let b = listener_fn(|_m: Arc<Message<()>>| async { Ok(()) });
        let a2 = Arc::clone(&a);
        assert!(same_listener(&a, &a2));
        assert!(!same_listener(&a, &b));
    }

    #[test]
    fn test_ids_increase() {
        let first = ListenerId::next();
        let second = ListenerId::next();
        assert!(second > first);
        assert!(first.to_string().starts_with("listener-"));
    }
}
