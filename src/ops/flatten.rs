//! Flatten operator: merge a stream of streams.
//!
//! Sequential nests the iteration. Unordered drains every inner stream
//! into one shared queue as soon as the outer stream surfaces it.
//! Ordered gives each inner stream its own sub-queue and hands the
//! sub-queues to the consumer in open order, so production overlaps while
//! delivery stays outer-major. Statically empty inner streams are elided
//! before any work is scheduled.

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use kanal::{AsyncReceiver, AsyncSender};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::ops::source::Source;
use crate::params::{ExecParams, ExecutionMode};
use crate::query::AsyncQuery;
use crate::runner::{drain_collect, fanout_unordered, ErrorBag};
use crate::stream::{DriverGuard, ItemStream};

/// Merge of a stream of streams under the active execution discipline.
#[derive(Clone)]
pub struct Flatten<P> {
    params: ExecParams,
    parent: P,
}

impl<P> Flatten<P>
where
    P: AsyncQuery,
    P::Item: AsyncQuery,
{
    pub(crate) fn new(parent: P) -> Self {
        Self {
            params: parent.params(),
            parent,
        }
    }
}

impl<Q> Flatten<Source<Q>>
where
    Q: AsyncQuery,
{
    /// Absorb a trailing stream into the literal outer list.
    ///
    /// A flatten over a literal list of streams stays a single node as
    /// streams are concatenated onto it.
    pub fn concat(self, other: Q) -> Flatten<Source<Q>> {
        Flatten {
            params: self.params,
            parent: self.parent.append(other),
        }
    }
}

/// Drain one inner stream into its sub-queue, delivering a failure at its
/// position and tripping the shared cancellation.
async fn drain_positional<T: Send + 'static>(
    mut stream: ItemStream<T>,
    tx: AsyncSender<Result<T>>,
    cancel: CancelToken,
) {
    while let Some(item) = stream.next().await {
        let failed = item.is_err();
        if failed {
            cancel.cancel();
        }
        if tx.send(item).await.is_err() || failed {
            return;
        }
    }
}

impl<P> AsyncQuery for Flatten<P>
where
    P: AsyncQuery,
    P::Item: AsyncQuery,
{
    type Item = <P::Item as AsyncQuery>::Item;

    fn params(&self) -> ExecParams {
        self.params
    }

    fn with_params(self, params: ExecParams) -> Self {
        Flatten {
            params,
            parent: self.parent.with_params(params),
        }
    }

    fn open(&self, external: CancelToken) -> ItemStream<Self::Item> {
        let cancel = external.child();
        match self.params.mode {
            ExecutionMode::Sequential => {
                let outer = self.parent.open(cancel.child());
                let state = (outer, None::<ItemStream<Self::Item>>, cancel);
                let stream = futures::stream::try_unfold(
                    state,
                    |(mut outer, mut inner, cancel)| async move {
                        loop {
                            if cancel.is_cancelled() {
                                return Err(Error::Canceled);
                            }
                            match inner.take() {
                                Some(mut stream) => match stream.next().await {
                                    Some(Ok(value)) => {
                                        inner = Some(stream);
                                        return Ok(Some((value, (outer, inner, cancel))));
                                    }
                                    Some(Err(error)) => return Err(error),
                                    None => {}
                                },
                                None => match outer.next().await {
                                    None => return Ok(None),
                                    Some(Err(error)) => return Err(error),
                                    Some(Ok(query)) => {
                                        if !query.is_empty_hint() {
                                            inner = Some(query.open(cancel.child()));
                                        }
                                    }
                                },
                            }
                        }
                    },
                );
                ItemStream::from_try_stream(stream)
            }
            mode if !self.params.ordered => {
                let (tx, rx) = kanal::unbounded_async::<Result<Self::Item>>();
                let bag = ErrorBag::new(cancel.clone());
                let outer = self.parent.open(cancel.clone());
                let inner_cancel = cancel.clone();
                let inner_bag = bag.clone();
                let out = tx.clone();
                let dispatch = move |query: P::Item| -> BoxFuture<'static, Result<()>> {
                    if query.is_empty_hint() {
                        return Box::pin(futures::future::ready(Ok(())));
                    }
                    let stream = query.open(inner_cancel.child());
                    let drain = drain_collect(stream, out.clone(), inner_bag.clone());
                    match mode {
                        ExecutionMode::Parallel => {
                            let handle = tokio::spawn(drain);
                            Box::pin(async move {
                                let _ = handle.await;
                                Ok(())
                            })
                        }
                        _ => Box::pin(async move {
                            drain.await;
                            Ok(())
                        }),
                    }
                };
                let task =
                    tokio::spawn(fanout_unordered(outer, dispatch, tx, bag, cancel.clone()));
                ItemStream::from_channel(rx, DriverGuard::new(cancel, vec![task]))
            }
            mode => {
                let (slot_tx, slot_rx) =
                    kanal::unbounded_async::<AsyncReceiver<Result<Self::Item>>>();
                let bag = ErrorBag::new(cancel.clone());
                let mut outer = self.parent.open(cancel.clone());
                let drain_cancel = cancel.clone();

                let task = tokio::spawn(async move {
                    let mut inner_drains: FuturesUnordered<BoxFuture<'static, ()>> =
                        FuturesUnordered::new();
                    let mut outer_done = false;
                    loop {
                        if outer_done && inner_drains.is_empty() {
                            break;
                        }
                        tokio::select! {
                            item = outer.next(), if !outer_done => match item {
                                Some(Ok(query)) => {
                                    if query.is_empty_hint() {
                                        continue;
                                    }
                                    let (sub_tx, sub_rx) =
                                        kanal::unbounded_async::<Result<Self::Item>>();
                                    if slot_tx.send(sub_rx).await.is_err() {
                                        outer_done = true;
                                        continue;
                                    }
                                    let stream = query.open(drain_cancel.child());
                                    let drain = drain_positional(
                                        stream,
                                        sub_tx,
                                        drain_cancel.clone(),
                                    );
                                    match mode {
                                        ExecutionMode::Parallel => {
                                            let handle = tokio::spawn(drain);
                                            inner_drains.push(Box::pin(async move {
                                                let _ = handle.await;
                                            }));
                                        }
                                        _ => inner_drains.push(Box::pin(drain)),
                                    }
                                }
                                Some(Err(error)) => {
                                    bag.record(error);
                                    outer_done = true;
                                }
                                None => outer_done = true,
                            },
                            _ = futures::StreamExt::next(&mut inner_drains),
                                if !inner_drains.is_empty() => {},
                            _ = drain_cancel.cancelled(), if !outer_done => outer_done = true,
                        }
                    }
                    // Deliver an outer failure (or bare cancellation) as a
                    // trailing slot after every opened inner.
                    if let Some(error) = bag.terminal() {
                        let (err_tx, err_rx) = kanal::unbounded_async::<Result<Self::Item>>();
                        let _ = err_tx.send(Err(error)).await;
                        drop(err_tx);
                        let _ = slot_tx.send(err_rx).await;
                    }
                });

                let state = (slot_rx, None::<AsyncReceiver<Result<Self::Item>>>);
                let stream = futures::stream::try_unfold(state, |(slots, mut current)| async move {
                    loop {
                        let rx = match current.take() {
                            Some(rx) => rx,
                            None => match slots.recv().await {
                                Ok(rx) => rx,
                                Err(_) => return Ok(None),
                            },
                        };
                        match rx.recv().await {
                            Ok(Ok(value)) => {
                                current = Some(rx);
                                return Ok(Some((value, (slots, current))));
                            }
                            Ok(Err(error)) => return Err(error),
                            Err(_) => {
                                // Sub-queue exhausted; move to the next slot.
                            }
                        }
                    }
                });
                ItemStream::from_try_stream_guarded(
                    stream,
                    DriverGuard::new(cancel, vec![task]),
                )
            }
        }
    }

    fn is_empty_hint(&self) -> bool {
        self.parent.is_empty_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::source::{empty, from_iter};
    use crate::query::QueryExt;

    #[tokio::test]
    async fn test_flatten_sequential() {
        let query = from_iter(vec![
            from_iter(vec![1, 2]),
            from_iter(vec![3]),
            empty(),
            from_iter(vec![4, 5]),
        ])
        .flatten();
        assert_eq!(query.to_vec().await.unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_flatten_ordered_concurrent_keeps_outer_order() {
        let query = from_iter(vec![
            from_iter(vec![1, 2]),
            from_iter(vec![3]),
            empty(),
            from_iter(vec![4, 5]),
        ])
        .flatten()
        .as_concurrent();
        assert_eq!(query.to_vec().await.unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_flatten_unordered_keeps_all_items() {
        let query = from_iter(vec![
            from_iter(vec![1, 2]),
            from_iter(vec![3]),
            from_iter(vec![4, 5]),
        ])
        .flatten()
        .as_parallel()
        .as_unordered();
        let mut items = query.to_vec().await.unwrap();
        items.sort_unstable();
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_flatten_concat_absorbs_into_literal() {
        let query = from_iter(vec![from_iter(vec![1]), from_iter(vec![2])])
            .flatten()
            .concat(from_iter(vec![3]));
        assert_eq!(query.to_vec().await.unwrap(), vec![1, 2, 3]);
    }
}
