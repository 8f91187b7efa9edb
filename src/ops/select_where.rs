//! The unified transform operator.
//!
//! Map and filter share one primitive: a stage function from an item to
//! `Result<Option<U>>`. `None` drops the item, `Some` carries the value
//! on, `Err` fails that position. Composing transforms composes the stage
//! closures, so a chain of maps and filters stays a single node and runs
//! one stage invocation per input item. A synchronous chain stays
//! synchronous; any asynchronous participant promotes the whole chain.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::params::{ExecParams, ExecutionMode};
use crate::query::AsyncQuery;
use crate::runner::{fanout_ordered, fanout_unordered, join_failure, offload, ErrorBag};
use crate::stream::{DriverGuard, ItemStream};

type SyncStage<S, T> = Arc<dyn Fn(S) -> Result<Option<T>> + Send + Sync>;
type AsyncStage<S, T> =
    Arc<dyn Fn(S, CancelToken) -> BoxFuture<'static, Result<Option<T>>> + Send + Sync>;

/// A keep/value stage, synchronous or asynchronous.
pub(crate) enum Stage<S, T> {
    Sync(SyncStage<S, T>),
    Async(AsyncStage<S, T>),
}

impl<S, T> Clone for Stage<S, T> {
    fn clone(&self) -> Self {
        match self {
            Stage::Sync(f) => Stage::Sync(Arc::clone(f)),
            Stage::Async(f) => Stage::Async(Arc::clone(f)),
        }
    }
}

impl<S, T> Stage<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    pub(crate) fn from_map<F>(f: F) -> Self
    where
        F: Fn(S) -> T + Send + Sync + 'static,
    {
        Stage::Sync(Arc::new(move |item| Ok(Some(f(item)))))
    }

    pub(crate) fn from_filter_map<F>(f: F) -> Self
    where
        F: Fn(S) -> Option<T> + Send + Sync + 'static,
    {
        Stage::Sync(Arc::new(move |item| Ok(f(item))))
    }

    pub(crate) fn from_map_async<F, Fut>(f: F) -> Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Stage::Async(Arc::new(move |item, _cancel| {
            let fut = f(item);
            Box::pin(async move { fut.await.map(Some) })
        }))
    }

    /// Chain another stage after this one.
    pub(crate) fn compose<V>(self, next: Stage<T, V>) -> Stage<S, V>
    where
        V: Send + 'static,
    {
        match (self, next) {
            (Stage::Sync(f), Stage::Sync(g)) => Stage::Sync(Arc::new(move |item| {
                match f(item)? {
                    Some(mid) => g(mid),
                    None => Ok(None),
                }
            })),
            (Stage::Sync(f), Stage::Async(g)) => {
                Stage::Async(Arc::new(move |item, cancel| match f(item) {
                    Ok(Some(mid)) => g(mid, cancel),
                    Ok(None) => Box::pin(futures::future::ready(Ok(None))),
                    Err(error) => Box::pin(futures::future::ready(Err(error))),
                }))
            }
            (Stage::Async(f), Stage::Sync(g)) => {
                Stage::Async(Arc::new(move |item, cancel| {
                    let fut = f(item, cancel);
                    let g = Arc::clone(&g);
                    Box::pin(async move {
                        match fut.await? {
                            Some(mid) => g(mid),
                            None => Ok(None),
                        }
                    })
                }))
            }
            (Stage::Async(f), Stage::Async(g)) => {
                Stage::Async(Arc::new(move |item, cancel| {
                    let fut = f(item, cancel.clone());
                    let g = Arc::clone(&g);
                    Box::pin(async move {
                        match fut.await? {
                            Some(mid) => g(mid, cancel).await,
                            None => Ok(None),
                        }
                    })
                }))
            }
        }
    }

    /// Evaluate in place (the sequential path).
    pub(crate) async fn eval(&self, item: S, cancel: &CancelToken) -> Result<Option<T>> {
        match self {
            Stage::Sync(f) => f(item),
            Stage::Async(f) => f(item, cancel.clone()).await,
        }
    }

    /// Produce the per-item unit of work for the overlapped runners.
    ///
    /// Parallel mode moves synchronous stages onto the blocking pool and
    /// asynchronous stages onto spawned tasks; Concurrent drives the
    /// future in the runner's own task.
    pub(crate) fn dispatch(
        &self,
        item: S,
        cancel: CancelToken,
        mode: ExecutionMode,
    ) -> BoxFuture<'static, Result<Option<T>>> {
        match (self, mode) {
            (Stage::Sync(f), ExecutionMode::Parallel) => {
                let f = Arc::clone(f);
                Box::pin(async move {
                    tokio::task::spawn_blocking(move || f(item))
                        .await
                        .map_err(join_failure)?
                })
            }
            (Stage::Sync(f), _) => {
                let result = f(item);
                Box::pin(futures::future::ready(result))
            }
            (Stage::Async(f), ExecutionMode::Parallel) => offload(mode, f(item, cancel)),
            (Stage::Async(f), _) => f(item, cancel),
        }
    }
}

impl<S> Stage<S, S>
where
    S: Send + 'static,
{
    pub(crate) fn from_filter<F>(predicate: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        Stage::Sync(Arc::new(move |item| {
            if predicate(&item) {
                Ok(Some(item))
            } else {
                Ok(None)
            }
        }))
    }

    pub(crate) fn from_filter_async<F, Fut>(predicate: F) -> Self
    where
        S: Clone,
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        Stage::Async(Arc::new(move |item, _cancel| {
            let fut = predicate(item.clone());
            Box::pin(async move {
                if fut.await? {
                    Ok(Some(item))
                } else {
                    Ok(None)
                }
            })
        }))
    }
}

/// The transform operator: a parent plus a composed keep/value stage.
pub struct SelectWhere<P: AsyncQuery, T> {
    params: ExecParams,
    parent: P,
    stage: Stage<P::Item, T>,
}

impl<P: AsyncQuery, T> Clone for SelectWhere<P, T> {
    fn clone(&self) -> Self {
        Self {
            params: self.params,
            parent: self.parent.clone(),
            stage: self.stage.clone(),
        }
    }
}

impl<P, T> SelectWhere<P, T>
where
    P: AsyncQuery,
    T: Send + 'static,
{
    pub(crate) fn new(parent: P, stage: Stage<P::Item, T>) -> Self {
        Self {
            params: parent.params(),
            parent,
            stage,
        }
    }

    fn composed<V: Send + 'static>(self, next: Stage<T, V>) -> SelectWhere<P, V> {
        SelectWhere {
            params: self.params,
            parent: self.parent,
            stage: self.stage.compose(next),
        }
    }

    /// Fuse a further map into this node's stage.
    pub fn map<U, F>(self, f: F) -> SelectWhere<P, U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.composed(Stage::from_map(f))
    }

    /// Fuse a further filter into this node's stage.
    pub fn filter<F>(self, predicate: F) -> SelectWhere<P, T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.composed(Stage::from_filter(predicate))
    }

    /// Fuse a further filter-map into this node's stage.
    pub fn filter_map<U, F>(self, f: F) -> SelectWhere<P, U>
    where
        U: Send + 'static,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        self.composed(Stage::from_filter_map(f))
    }

    /// Fuse an asynchronous map, promoting the chain to asynchronous.
    pub fn map_async<U, F, Fut>(self, f: F) -> SelectWhere<P, U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        self.composed(Stage::from_map_async(f))
    }

    /// Fuse an asynchronous filter, promoting the chain to asynchronous.
    pub fn filter_async<F, Fut>(self, predicate: F) -> SelectWhere<P, T>
    where
        T: Clone,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        self.composed(Stage::from_filter_async(predicate))
    }
}

impl<P, T> AsyncQuery for SelectWhere<P, T>
where
    P: AsyncQuery,
    T: Send + 'static,
{
    type Item = T;

    fn params(&self) -> ExecParams {
        self.params
    }

    fn with_params(self, params: ExecParams) -> Self {
        SelectWhere {
            params,
            parent: self.parent.with_params(params),
            stage: self.stage,
        }
    }

    fn open(&self, external: CancelToken) -> ItemStream<T> {
        let cancel = external.child();
        if self.params.mode == ExecutionMode::Sequential {
            let input = self.parent.open(cancel.child());
            let stage = self.stage.clone();
            let stream = futures::stream::try_unfold(
                (input, stage, cancel),
                |(mut input, stage, cancel)| async move {
                    loop {
                        if cancel.is_cancelled() {
                            return Err(Error::Canceled);
                        }
                        match input.next().await {
                            None => return Ok(None),
                            Some(Err(error)) => return Err(error),
                            Some(Ok(item)) => {
                                if let Some(value) = stage.eval(item, &cancel).await? {
                                    return Ok(Some((value, (input, stage, cancel))));
                                }
                            }
                        }
                    }
                },
            );
            return ItemStream::from_try_stream(stream);
        }

        let (tx, rx) = kanal::unbounded_async::<Result<T>>();
        let bag = ErrorBag::new(cancel.clone());
        let input = self.parent.open(cancel.clone());
        let stage = self.stage.clone();
        let mode = self.params.mode;
        let work_cancel = cancel.clone();

        let task = if self.params.ordered {
            let dispatch =
                move |item| stage.dispatch(item, work_cancel.clone(), mode);
            tokio::spawn(fanout_ordered(input, dispatch, tx, bag, cancel.clone()))
        } else {
            let out = tx.clone();
            let dispatch = move |item| {
                let work = stage.dispatch(item, work_cancel.clone(), mode);
                let out = out.clone();
                let boxed: BoxFuture<'static, Result<()>> = Box::pin(async move {
                    if let Some(value) = work.await? {
                        let _ = out.send(Ok(value)).await;
                    }
                    Ok(())
                });
                boxed
            };
            tokio::spawn(fanout_unordered(input, dispatch, tx, bag, cancel.clone()))
        };

        ItemStream::from_channel(rx, DriverGuard::new(cancel, vec![task]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::source::from_iter;
    use crate::query::QueryExt;

    #[test]
    fn test_sync_chain_stays_sync() {
        let stage: Stage<u32, u32> = Stage::from_map(|x: u32| x + 1);
        let chained = stage.compose(Stage::from_filter(|x: &u32| x % 2 == 0));
        assert!(matches!(chained, Stage::Sync(_)));
    }

    #[test]
    fn test_async_participant_promotes_chain() {
        let stage: Stage<u32, u32> = Stage::from_map(|x: u32| x + 1);
        let chained = stage.compose(Stage::from_map_async(|x: u32| async move { Ok(x * 2) }));
        assert!(matches!(chained, Stage::Async(_)));
    }

    #[tokio::test]
    async fn test_fused_map_map_matches_composition() {
        let fused = from_iter(vec![1, 2, 3]).map(|x| x + 1).map(|x| x * 10);
        let direct = from_iter(vec![1, 2, 3]).map(|x| (x + 1) * 10);
        assert_eq!(fused.to_vec().await.unwrap(), direct.to_vec().await.unwrap());
    }

    #[tokio::test]
    async fn test_filter_drops_items() {
        let odds = from_iter(0..6).filter(|x| x % 2 == 1);
        assert_eq!(odds.to_vec().await.unwrap(), vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_stage_failure_fails_enumeration() {
        let query = from_iter(vec![1, 2, 3])
            .map_async(|x| async move {
                if x == 2 {
                    Err(Error::callback("two is unacceptable"))
                } else {
                    Ok(x)
                }
            });
        assert!(query.to_vec().await.is_err());
    }
}
