//! Shared execution runners.
//!
//! The overlapped operators (select-where, flatten, concat, join) all run
//! the same way: a drainer pulls the parent stream and dispatches per-item
//! work, survivors flow through an unbounded kanal queue, and failures are
//! collected into an [`ErrorBag`] that trips the shared cancellation token
//! and is delivered as the queue's terminal error. This module holds the
//! pieces those operators share; mode-specific wiring lives with each
//! operator.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::{FuturesOrdered, FuturesUnordered};
use futures::StreamExt;
use kanal::{AsyncReceiver, AsyncSender};
use tracing::trace;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::params::{ExecParams, ExecutionMode};
use crate::stream::{DriverGuard, ItemStream};

// ============================================================================
// Error Bag
// ============================================================================

/// Collects concurrent failures during one enumeration.
///
/// The first recorded failure trips the shared cancellation token so
/// sibling drainers stop pulling new work; the drain itself continues so
/// in-flight work can finish. Bare cancellations are not recorded: they
/// only matter when nothing substantive failed.
#[derive(Clone)]
pub(crate) struct ErrorBag {
    inner: Arc<BagInner>,
}

struct BagInner {
    cancel: CancelToken,
    errors: Mutex<Vec<Error>>,
}

impl ErrorBag {
    pub(crate) fn new(cancel: CancelToken) -> Self {
        Self {
            inner: Arc::new(BagInner {
                cancel,
                errors: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Record a failure and trip the shared cancellation.
    pub(crate) fn record(&self, error: Error) {
        if error.is_canceled() {
            self.inner.cancel.cancel();
            return;
        }
        trace!(error = %error, "failure recorded during enumeration");
        self.inner.errors.lock().unwrap().push(error);
        self.inner.cancel.cancel();
    }

    /// The terminal outcome of the enumeration, if any.
    ///
    /// Substantive failures win over cancellation; a lone failure is
    /// returned as-is, several as an aggregate.
    pub(crate) fn terminal(&self) -> Option<Error> {
        let mut errors = self.inner.errors.lock().unwrap();
        if errors.is_empty() {
            if self.inner.cancel.is_cancelled() {
                Some(Error::Canceled)
            } else {
                None
            }
        } else {
            Some(Error::aggregate(std::mem::take(&mut *errors)))
        }
    }
}

/// Map a Tokio join failure onto the crate error.
pub(crate) fn join_failure(error: tokio::task::JoinError) -> Error {
    if error.is_cancelled() {
        Error::Canceled
    } else {
        Error::Task(error.to_string())
    }
}

/// Run a unit of work under the given mode: in place for Sequential and
/// Concurrent, as a spawned task for Parallel.
pub(crate) fn offload<R: Send + 'static>(
    mode: ExecutionMode,
    work: BoxFuture<'static, Result<R>>,
) -> BoxFuture<'static, Result<R>> {
    match mode {
        ExecutionMode::Parallel => {
            let handle = tokio::spawn(work);
            Box::pin(async move { handle.await.map_err(join_failure)? })
        }
        _ => work,
    }
}

// ============================================================================
// Fan-out loops
// ============================================================================

/// Unordered fan-out: pull the parent, dispatch per-item work, let
/// completions land in whatever order they finish.
///
/// The dispatched futures deliver survivors into the output queue
/// themselves and resolve with their own outcome. On a parent failure or a
/// cancellation trip the loop stops pulling but drains what is already in
/// flight, then delivers the bag's terminal error.
pub(crate) async fn fanout_unordered<S, T>(
    mut input: ItemStream<S>,
    mut dispatch: impl FnMut(S) -> BoxFuture<'static, Result<()>>,
    tx: AsyncSender<Result<T>>,
    bag: ErrorBag,
    cancel: CancelToken,
) where
    S: Send + 'static,
    T: Send + 'static,
{
    let mut inflight: FuturesUnordered<BoxFuture<'static, Result<()>>> =
        FuturesUnordered::new();
    let mut input_done = false;
    loop {
        if input_done && inflight.is_empty() {
            break;
        }
        tokio::select! {
            item = input.next(), if !input_done => match item {
                Some(Ok(item)) => inflight.push(dispatch(item)),
                Some(Err(error)) => {
                    bag.record(error);
                    input_done = true;
                }
                None => input_done = true,
            },
            finished = inflight.next(), if !inflight.is_empty() => {
                if let Some(Err(error)) = finished {
                    bag.record(error);
                }
            },
            _ = cancel.cancelled(), if !input_done => input_done = true,
        }
    }
    trace!("unordered drain finished");
    if let Some(error) = bag.terminal() {
        let _ = tx.send(Err(error)).await;
    }
}

/// Ordered fan-out: pull the parent, dispatch per-item work, consume
/// completions strictly in enqueue order.
///
/// A failing position is recorded without disturbing delivery of the
/// other positions; the terminal error is raised once the drain finishes.
pub(crate) async fn fanout_ordered<S, T>(
    mut input: ItemStream<S>,
    mut dispatch: impl FnMut(S) -> BoxFuture<'static, Result<Option<T>>>,
    tx: AsyncSender<Result<T>>,
    bag: ErrorBag,
    cancel: CancelToken,
) where
    S: Send + 'static,
    T: Send + 'static,
{
    let mut pending: FuturesOrdered<BoxFuture<'static, Result<Option<T>>>> =
        FuturesOrdered::new();
    let mut input_done = false;
    loop {
        if input_done && pending.is_empty() {
            break;
        }
        tokio::select! {
            item = input.next(), if !input_done => match item {
                Some(Ok(item)) => pending.push_back(dispatch(item)),
                Some(Err(error)) => {
                    bag.record(error);
                    input_done = true;
                }
                None => input_done = true,
            },
            finished = pending.next(), if !pending.is_empty() => match finished {
                Some(Ok(Some(value))) => {
                    if tx.send(Ok(value)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(None)) | None => {}
                Some(Err(error)) => bag.record(error),
            },
            _ = cancel.cancelled(), if !input_done => input_done = true,
        }
    }
    trace!("ordered drain finished");
    if let Some(error) = bag.terminal() {
        let _ = tx.send(Err(error)).await;
    }
}

// ============================================================================
// Drain helpers
// ============================================================================

/// Drain a stream into a queue, forwarding a terminal failure inline at
/// its position.
pub(crate) async fn drain_inline<T: Send + 'static>(
    mut stream: ItemStream<T>,
    tx: AsyncSender<Result<T>>,
) {
    while let Some(item) = stream.next().await {
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            return;
        }
    }
}

/// Drain a stream into a queue, collecting a terminal failure into the
/// bag instead of forwarding it.
pub(crate) async fn drain_collect<T: Send + 'static>(
    mut stream: ItemStream<T>,
    tx: AsyncSender<Result<T>>,
    bag: ErrorBag,
) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(value) => {
                if tx.send(Ok(value)).await.is_err() {
                    return;
                }
            }
            Err(error) => {
                bag.record(error);
                return;
            }
        }
    }
}

/// Copy everything from one queue into another, stopping after a
/// forwarded failure.
pub(crate) async fn relay<T: Send + 'static>(
    rx: AsyncReceiver<Result<T>>,
    tx: AsyncSender<Result<T>>,
) {
    while let Ok(item) = rx.recv().await {
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            return;
        }
    }
}

// ============================================================================
// Concat runner
// ============================================================================

struct SeqConcat<T, F> {
    current: ItemStream<T>,
    second: Option<F>,
    cancel: CancelToken,
}

/// Run two streams end-to-end under the given parameters.
///
/// Sequential keeps the second input unopened until the first ends.
/// Overlapped ordered opens both at once, buffering the second into a side
/// queue that is replayed after the first. Unordered interleaves both into
/// one queue and delivers collected failures at the end. Prepend, append,
/// and concat all funnel through here.
pub(crate) fn concat_run<T, F1, F2>(
    open_first: F1,
    open_second: F2,
    params: ExecParams,
    external: CancelToken,
) -> ItemStream<T>
where
    T: Send + 'static,
    F1: FnOnce(CancelToken) -> ItemStream<T> + Send + 'static,
    F2: FnOnce(CancelToken) -> ItemStream<T> + Send + 'static,
{
    if params.mode == ExecutionMode::Sequential {
        let cancel = external.child();
        let state = SeqConcat {
            current: open_first(cancel.child()),
            second: Some(open_second),
            cancel,
        };
        let stream = futures::stream::try_unfold(state, |mut state| async move {
            loop {
                if state.cancel.is_cancelled() {
                    return Err(Error::Canceled);
                }
                match state.current.next().await {
                    Some(Ok(value)) => return Ok(Some((value, state))),
                    Some(Err(error)) => return Err(error),
                    None => match state.second.take() {
                        Some(open) => state.current = open(state.cancel.child()),
                        None => return Ok(None),
                    },
                }
            }
        });
        return ItemStream::from_try_stream(stream);
    }

    let cancel = external.child();
    let (tx, rx) = kanal::unbounded_async::<Result<T>>();
    let first = open_first(cancel.child());
    let second = open_second(cancel.child());
    let bag = ErrorBag::new(cancel.clone());
    let mode = params.mode;
    let ordered = params.ordered;

    let task = tokio::spawn(async move {
        if ordered {
            let (side_tx, side_rx) = kanal::unbounded_async::<Result<T>>();
            match mode {
                ExecutionMode::Parallel => {
                    let handle = tokio::spawn(drain_inline(second, side_tx));
                    drain_inline(first, tx.clone()).await;
                    relay(side_rx, tx.clone()).await;
                    if let Err(error) = handle.await {
                        let _ = tx.send(Err(join_failure(error))).await;
                    }
                }
                _ => {
                    let front = async {
                        drain_inline(first, tx.clone()).await;
                        relay(side_rx, tx.clone()).await;
                    };
                    futures::join!(front, drain_inline(second, side_tx));
                }
            }
        } else {
            match mode {
                ExecutionMode::Parallel => {
                    let left =
                        tokio::spawn(drain_collect(first, tx.clone(), bag.clone()));
                    let right =
                        tokio::spawn(drain_collect(second, tx.clone(), bag.clone()));
                    for handle in [left, right] {
                        if let Err(error) = handle.await {
                            bag.record(join_failure(error));
                        }
                    }
                }
                _ => {
                    futures::join!(
                        drain_collect(first, tx.clone(), bag.clone()),
                        drain_collect(second, tx.clone(), bag.clone())
                    );
                }
            }
            if let Some(error) = bag.terminal() {
                let _ = tx.send(Err(error)).await;
            }
        }
    });

    ItemStream::from_channel(rx, DriverGuard::new(cancel, vec![task]))
}
