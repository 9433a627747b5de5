//! Cancellable subscription handles.
//!
//! Both backends hand out a [`Subscription`] per live query. It is a plain
//! stream of values; `unsubscribe()` or dropping the handle runs the
//! backend's cancel hook exactly once.

use futures_util::Stream;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type CancelFn = Box<dyn FnOnce() + Send>;

pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    cancel: Option<CancelFn>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Create a connected sender/subscription pair.
    pub fn channel(cancel: impl FnOnce() + Send + 'static) -> (mpsc::UnboundedSender<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, cancel))
    }

    /// Wait for the next value. `None` once the backend side is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next value if one is already buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Stop the subscription. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_recv_and_stream() {
        let (tx, mut sub) = Subscription::channel(|| {});
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.next().await, Some(2));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_unsubscribe_runs_cancel_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let (tx, sub) = Subscription::<u32>::channel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(tx.send(5).is_err());
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        {
            let (_tx, _sub) = Subscription::<u32>::channel(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
