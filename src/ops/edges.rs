//! Prepend and append operators.
//!
//! Both keep a small edge list of ready values and async thunks around the
//! parent, so repeated prepends or appends grow the list instead of
//! nesting nodes. Enumeration funnels through the concat runner: edge
//! items and the parent run end-to-end sequentially, or overlap under the
//! concurrent modes (with thunks additionally moved to the worker pool
//! under Parallel).

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesOrdered;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::params::{ExecParams, ExecutionMode};
use crate::query::AsyncQuery;
use crate::runner::{concat_run, offload};
use crate::stream::ItemStream;

/// One edge element: a ready value or an async thunk.
pub(crate) enum EdgeItem<T> {
    Value(T),
    Thunk(Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>),
}

impl<T: Clone> Clone for EdgeItem<T> {
    fn clone(&self) -> Self {
        match self {
            EdgeItem::Value(value) => EdgeItem::Value(value.clone()),
            EdgeItem::Thunk(thunk) => EdgeItem::Thunk(Arc::clone(thunk)),
        }
    }
}

impl<T: Clone + Send + 'static> EdgeItem<T> {
    fn resolve(&self) -> BoxFuture<'static, Result<T>> {
        match self {
            EdgeItem::Value(value) => {
                let value = value.clone();
                Box::pin(futures::future::ready(Ok(value)))
            }
            EdgeItem::Thunk(thunk) => thunk(),
        }
    }
}

fn thunk_item<T, F, Fut>(thunk: F) -> EdgeItem<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    EdgeItem::Thunk(Arc::new(move || Box::pin(thunk())))
}

/// Open the edge list as its own stream.
///
/// Sequential resolves each item lazily at its position; the overlapped
/// modes start every item at once and deliver in list order.
fn open_edge_stream<T>(
    items: Vec<EdgeItem<T>>,
    params: ExecParams,
    cancel: CancelToken,
) -> ItemStream<T>
where
    T: Clone + Send + 'static,
{
    if params.mode == ExecutionMode::Sequential {
        let queue: VecDeque<EdgeItem<T>> = items.into();
        let stream = futures::stream::try_unfold(
            (queue, cancel),
            |(mut queue, cancel)| async move {
                if cancel.is_cancelled() {
                    return Err(Error::Canceled);
                }
                match queue.pop_front() {
                    None => Ok(None),
                    Some(item) => {
                        let value = item.resolve().await?;
                        Ok(Some((value, (queue, cancel))))
                    }
                }
            },
        );
        return ItemStream::from_try_stream(stream);
    }

    let mut pending = FuturesOrdered::new();
    for item in &items {
        pending.push_back(offload(params.mode, item.resolve()));
    }
    ItemStream::from_try_stream(pending)
}

/// Edge items emitted before the parent's output.
pub struct Prepend<P: AsyncQuery> {
    params: ExecParams,
    parent: P,
    items: Vec<EdgeItem<P::Item>>,
}

impl<P: AsyncQuery> Prepend<P> {
    pub(crate) fn single(parent: P, item: P::Item) -> Self {
        Self {
            params: parent.params(),
            parent,
            items: vec![EdgeItem::Value(item)],
        }
    }

    pub(crate) fn thunk<F, Fut>(parent: P, thunk: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P::Item>> + Send + 'static,
    {
        Self {
            params: parent.params(),
            parent,
            items: vec![thunk_item(thunk)],
        }
    }

    /// Absorb a further prepended value into this node's edge list.
    pub fn prepend(mut self, item: P::Item) -> Prepend<P> {
        self.items.insert(0, EdgeItem::Value(item));
        self
    }

    /// Absorb a further prepended thunk into this node's edge list.
    pub fn prepend_async<F, Fut>(mut self, thunk: F) -> Prepend<P>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P::Item>> + Send + 'static,
    {
        self.items.insert(0, thunk_item(thunk));
        self
    }
}

impl<P> Clone for Prepend<P>
where
    P: AsyncQuery,
    P::Item: Clone,
{
    fn clone(&self) -> Self {
        Self {
            params: self.params,
            parent: self.parent.clone(),
            items: self.items.clone(),
        }
    }
}

impl<P> AsyncQuery for Prepend<P>
where
    P: AsyncQuery,
    P::Item: Clone + Sync,
{
    type Item = P::Item;

    fn params(&self) -> ExecParams {
        self.params
    }

    fn with_params(self, params: ExecParams) -> Self {
        Prepend {
            params,
            parent: self.parent.with_params(params),
            items: self.items,
        }
    }

    fn open(&self, cancel: CancelToken) -> ItemStream<Self::Item> {
        let items = self.items.clone();
        let parent = self.parent.clone();
        let params = self.params;
        concat_run(
            move |token| open_edge_stream(items, params, token),
            move |token| parent.open(token),
            params,
            cancel,
        )
    }

    fn len_hint(&self) -> Option<usize> {
        self.parent.len_hint().map(|len| len + self.items.len())
    }
}

/// Edge items emitted after the parent's output.
pub struct Append<P: AsyncQuery> {
    params: ExecParams,
    parent: P,
    items: Vec<EdgeItem<P::Item>>,
}

impl<P: AsyncQuery> Append<P> {
    pub(crate) fn single(parent: P, item: P::Item) -> Self {
        Self {
            params: parent.params(),
            parent,
            items: vec![EdgeItem::Value(item)],
        }
    }

    pub(crate) fn thunk<F, Fut>(parent: P, thunk: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P::Item>> + Send + 'static,
    {
        Self {
            params: parent.params(),
            parent,
            items: vec![thunk_item(thunk)],
        }
    }

    /// Absorb a further appended value into this node's edge list.
    pub fn append(mut self, item: P::Item) -> Append<P> {
        self.items.push(EdgeItem::Value(item));
        self
    }

    /// Absorb a further appended thunk into this node's edge list.
    pub fn append_async<F, Fut>(mut self, thunk: F) -> Append<P>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P::Item>> + Send + 'static,
    {
        self.items.push(thunk_item(thunk));
        self
    }
}

impl<P> Clone for Append<P>
where
    P: AsyncQuery,
    P::Item: Clone,
{
    fn clone(&self) -> Self {
        Self {
            params: self.params,
            parent: self.parent.clone(),
            items: self.items.clone(),
        }
    }
}

impl<P> AsyncQuery for Append<P>
where
    P: AsyncQuery,
    P::Item: Clone + Sync,
{
    type Item = P::Item;

    fn params(&self) -> ExecParams {
        self.params
    }

    fn with_params(self, params: ExecParams) -> Self {
        Append {
            params,
            parent: self.parent.with_params(params),
            items: self.items,
        }
    }

    fn open(&self, cancel: CancelToken) -> ItemStream<Self::Item> {
        let items = self.items.clone();
        let parent = self.parent.clone();
        let params = self.params;
        concat_run(
            move |token| parent.open(token),
            move |token| open_edge_stream(items, params, token),
            params,
            cancel,
        )
    }

    fn len_hint(&self) -> Option<usize> {
        self.parent.len_hint().map(|len| len + self.items.len())
    }
}
