//! The pull surface over operator output.
//!
//! Every operator enumeration hands back an [`ItemStream`]: a single-pass,
//! suspending iterator that yields items, ends, or delivers exactly one
//! terminal error. Sequential operators back it with an in-place boxed
//! stream; overlapped operators back it with a kanal queue fed by drainer
//! tasks, plus a guard that trips cancellation and aborts those tasks when
//! the handle is dropped.

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::observable::Subscription;

/// A pull-based asynchronous stream of query output.
///
/// Single-pass: once it yields `None` or an error, it stays exhausted.
/// Re-enumeration is done by asking the operator for a new stream.
///
/// # Example
///
/// ```rust,ignore
/// let mut stream = query.open(CancelToken::new());
/// while let Some(item) = stream.next().await {
///     println!("{:?}", item?);
/// }
/// ```
pub struct ItemStream<T> {
    inner: Inner<T>,
    guard: Option<DriverGuard>,
    done: bool,
}

enum Inner<T> {
    /// In-place stream driven directly by the consumer.
    Boxed(BoxStream<'static, Result<T>>),
    /// Queue fed by background drainer tasks.
    Channel(kanal::AsyncReceiver<Result<T>>),
}

impl<T: Send + 'static> ItemStream<T> {
    /// Advance the stream.
    ///
    /// Returns `Some(Ok(item))` for the next item, `Some(Err(e))` exactly
    /// once for a failed enumeration, and `None` once exhausted.
    pub async fn next(&mut self) -> Option<Result<T>> {
        if self.done {
            return None;
        }
        let item = match &mut self.inner {
            Inner::Boxed(stream) => stream.next().await,
            Inner::Channel(rx) => rx.recv().await.ok(),
        };
        match &item {
            None | Some(Err(_)) => self.done = true,
            Some(Ok(_)) => {}
        }
        item
    }

    /// A stream with no items.
    pub(crate) fn empty() -> Self {
        Self::from_try_stream(futures::stream::empty())
    }

    /// Wrap an in-place stream of results.
    pub(crate) fn from_try_stream(
        stream: impl Stream<Item = Result<T>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Inner::Boxed(stream.boxed()),
            guard: None,
            done: false,
        }
    }

    /// Wrap an in-place stream that also owns background drivers.
    pub(crate) fn from_try_stream_guarded(
        stream: impl Stream<Item = Result<T>> + Send + 'static,
        guard: DriverGuard,
    ) -> Self {
        Self {
            inner: Inner::Boxed(stream.boxed()),
            guard: Some(guard),
            done: false,
        }
    }

    /// Wrap a drainer-fed queue.
    pub(crate) fn from_channel(
        rx: kanal::AsyncReceiver<Result<T>>,
        guard: DriverGuard,
    ) -> Self {
        Self {
            inner: Inner::Channel(rx),
            guard: Some(guard),
            done: false,
        }
    }
}

impl<T> std::fmt::Debug for ItemStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backing = match self.inner {
            Inner::Boxed(_) => "boxed",
            Inner::Channel(_) => "channel",
        };
        f.debug_struct("ItemStream")
            .field("backing", &backing)
            .field("done", &self.done)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// Owns the internals of one enumeration: the cancellation token shared by
/// its drainer tasks, the task handles, and (for the observable bridge) the
/// upstream subscription.
///
/// Dropping the guard trips the token and aborts the tasks, so discarding
/// a stream mid-enumeration releases everything upstream.
pub(crate) struct DriverGuard {
    cancel: CancelToken,
    tasks: Vec<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

impl DriverGuard {
    pub(crate) fn new(cancel: CancelToken, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            cancel,
            tasks,
            subscription: None,
        }
    }

    pub(crate) fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscription = Some(subscription);
        self
    }
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
        // Subscription field drops afterwards and releases the upstream
        // registration.
        self.subscription.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_stream_yields_then_ends() {
        let mut stream =
            ItemStream::from_try_stream(futures::stream::iter(vec![Ok(1), Ok(2)]));
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert_eq!(stream.next().await.unwrap().unwrap(), 2);
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_exhausted_after_error() {
        let mut stream = ItemStream::from_try_stream(futures::stream::iter(vec![
            Ok(1),
            Err(Error::Canceled),
            Ok(2),
        ]));
        assert_eq!(stream.next().await.unwrap().unwrap(), 1);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_stream_ends_on_close() {
        let (tx, rx) = kanal::unbounded_async::<crate::error::Result<u32>>();
        tx.send(Ok(7)).await.unwrap();
        drop(tx);

        let guard = DriverGuard::new(CancelToken::new(), Vec::new());
        let mut stream = ItemStream::from_channel(rx, guard);
        assert_eq!(stream.next().await.unwrap().unwrap(), 7);
        assert!(stream.next().await.is_none());
    }
}
