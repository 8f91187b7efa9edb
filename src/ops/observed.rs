//! Observable bridge source.
//!
//! Adapts a push-style [`Observable`] into the pull surface. The observer
//! writes into a kanal queue (bounded with drop-newest when a buffer
//! limit is set, unbounded otherwise) and the pull side serves from it.
//! Completion drops the queue's only sender so buffered items still drain;
//! a producer failure is parked in a terminal slot and surfaced after the
//! buffered items, rather than being swallowed with the queue.

use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::observable::{Observable, Observer, Subscription};
use crate::params::ExecParams;
use crate::query::AsyncQuery;
use crate::stream::{DriverGuard, ItemStream};

/// A source leaf over a push-style producer.
///
/// # Example
///
/// ```rust,ignore
/// use conflux::{from_observable, QueryExt};
///
/// // Keep at most 64 items buffered; newer items are dropped when full.
/// let query = from_observable(sensor_feed, Some(64)).map(|r| r.celsius);
/// ```
pub struct Observed<T> {
    params: ExecParams,
    source: Arc<dyn Observable<T>>,
    max_buffer: Option<usize>,
}

impl<T> Clone for Observed<T> {
    fn clone(&self) -> Self {
        Self {
            params: self.params,
            source: Arc::clone(&self.source),
            max_buffer: self.max_buffer,
        }
    }
}

/// A source over a push-style producer.
///
/// `max_buffer` bounds the bridge queue; `None` means unbounded. A full
/// bounded queue drops the newest item.
pub fn from_observable<T, S>(source: S, max_buffer: Option<usize>) -> Observed<T>
where
    S: Observable<T> + 'static,
{
    Observed {
        params: ExecParams::default(),
        source: Arc::new(source),
        max_buffer,
    }
}

/// Holds a producer failure until the buffered items ahead of it drain.
#[derive(Default)]
struct TerminalSlot {
    error: Mutex<Option<Error>>,
}

impl TerminalSlot {
    fn put_if_empty(&self, error: Error) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    fn take(&self) -> Option<Error> {
        self.error.lock().unwrap().take()
    }
}

struct QueueObserver<T> {
    tx: Option<kanal::Sender<T>>,
    bounded: bool,
    slot: Arc<TerminalSlot>,
}

impl<T: Send> Observer<T> for QueueObserver<T> {
    fn on_next(&mut self, item: T) {
        let Some(tx) = &self.tx else {
            return;
        };
        if self.bounded {
            match tx.try_send(item) {
                Ok(true) => {}
                Ok(false) => trace!("bridge queue full, dropping newest item"),
                Err(_) => {}
            }
        } else {
            let _ = tx.send(item);
        }
    }

    fn on_completed(&mut self) {
        // Dropping the only sender closes the queue once buffered items
        // have drained.
        self.tx = None;
    }

    fn on_error(&mut self, error: Error) {
        self.slot.put_if_empty(error);
        self.tx = None;
    }
}

impl<T> AsyncQuery for Observed<T>
where
    T: Send + 'static,
{
    type Item = T;

    fn params(&self) -> ExecParams {
        self.params
    }

    fn with_params(self, params: ExecParams) -> Self {
        Observed {
            params,
            source: self.source,
            max_buffer: self.max_buffer,
        }
    }

    fn open(&self, external: CancelToken) -> ItemStream<T> {
        let cancel = external.child();
        let (tx, rx) = match self.max_buffer {
            Some(limit) => kanal::bounded::<T>(limit),
            None => kanal::unbounded::<T>(),
        };
        let slot = Arc::new(TerminalSlot::default());
        let observer = QueueObserver {
            tx: Some(tx),
            bounded: self.max_buffer.is_some(),
            slot: Arc::clone(&slot),
        };
        let subscription = self.source.subscribe(Box::new(observer));

        let rx = rx.to_async();
        let state = (rx, slot, cancel.clone());
        let stream = futures::stream::try_unfold(state, |(rx, slot, cancel)| async move {
            tokio::select! {
                item = rx.recv() => match item {
                    Ok(value) => Ok(Some((value, (rx, slot, cancel)))),
                    Err(_) => match slot.take() {
                        Some(error) => Err(error),
                        None => Ok(None),
                    },
                },
                _ = cancel.cancelled() => Err(Error::Canceled),
            }
        });

        ItemStream::from_try_stream_guarded(
            stream,
            DriverGuard::new(cancel, Vec::new()).with_subscription(subscription),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::query::QueryExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A feed that pushes its items synchronously on subscribe.
    struct TestFeed {
        items: Vec<u32>,
        error: Option<String>,
        released: Arc<AtomicBool>,
    }

    impl TestFeed {
        fn new(items: Vec<u32>) -> Self {
            Self {
                items,
                error: None,
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        fn failing(items: Vec<u32>, message: &str) -> Self {
            Self {
                items,
                error: Some(message.to_string()),
                released: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Observable<u32> for TestFeed {
        fn subscribe(&self, mut observer: Box<dyn Observer<u32>>) -> Subscription {
            for item in &self.items {
                observer.on_next(*item);
            }
            match &self.error {
                Some(message) => observer.on_error(Error::source(message)),
                None => observer.on_completed(),
            }
            let released = Arc::clone(&self.released);
            Subscription::new(move || released.store(true, Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn test_bridge_delivers_items_then_ends() {
        let query = from_observable(TestFeed::new(vec![1, 2, 3]), None);
        assert_eq!(query.to_vec().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_bridge_surfaces_error_after_items() {
        let query = from_observable(TestFeed::failing(vec![1, 2], "feed died"), None);
        let mut stream = query.open(CancelToken::new());

        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        let error = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(error, Error::Source(_)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bounded_bridge_drops_newest() {
        let query = from_observable(TestFeed::new(vec![1, 2, 3, 4, 5]), Some(2));
        assert_eq!(query.to_vec().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_subscription_released_on_drop() {
        let feed = TestFeed::new(vec![1, 2, 3]);
        let released = Arc::clone(&feed.released);
        let query = from_observable(feed, None);

        let mut stream = query.open(CancelToken::new());
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        drop(stream);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_bridge_observes_cancellation() {
        /// Holds its observer without pushing anything, so the queue stays
        /// open and the consumer blocks until canceled.
        struct SilentFeed {
            parked: Mutex<Option<Box<dyn Observer<u32>>>>,
        }
        impl Observable<u32> for SilentFeed {
            fn subscribe(&self, observer: Box<dyn Observer<u32>>) -> Subscription {
                *self.parked.lock().unwrap() = Some(observer);
                Subscription::noop()
            }
        }

        let feed = SilentFeed {
            parked: Mutex::new(None),
        };
        let cancel = CancelToken::new();
        let mut stream = from_observable(feed, None).open(cancel.clone());
        cancel.cancel();
        assert!(stream.next().await.unwrap().unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn test_bridge_is_re_enumerable_and_composes() {
        let query = from_observable(TestFeed::new(vec![1, 2, 3, 4]), None)
            .filter(|x| x % 2 == 0)
            .map(|x| x * 10);
        let first: Result<Vec<u32>> = query.to_vec().await;
        assert_eq!(first.unwrap(), vec![20, 40]);
        assert_eq!(query.to_vec().await.unwrap(), vec![20, 40]);
    }
}
