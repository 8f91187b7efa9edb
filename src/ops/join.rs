//! Symmetric hash join.
//!
//! Pairs items from two inputs whose keys match. The sequential path
//! materializes both inputs and emits in input-major order; the
//! overlapped paths drain both inputs at once against a shared pair of
//! hash tables and emit pairs as matches are discovered. Discovery order
//! is the documented output order for the overlapped modes regardless of
//! the ordering flag.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use smallvec::SmallVec;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::params::{ExecParams, ExecutionMode};
use crate::query::AsyncQuery;
use crate::runner::{join_failure, ErrorBag};
use crate::stream::{DriverGuard, ItemStream};

/// The join operator over two inputs.
pub struct Join<A: AsyncQuery, B: AsyncQuery, K, O> {
    params: ExecParams,
    left: A,
    right: B,
    left_key: Arc<dyn Fn(&A::Item) -> K + Send + Sync>,
    right_key: Arc<dyn Fn(&B::Item) -> K + Send + Sync>,
    merge: Arc<dyn Fn(A::Item, B::Item) -> O + Send + Sync>,
}

impl<A: AsyncQuery, B: AsyncQuery, K, O> Clone for Join<A, B, K, O> {
    fn clone(&self) -> Self {
        Self {
            params: self.params,
            left: self.left.clone(),
            right: self.right.clone(),
            left_key: Arc::clone(&self.left_key),
            right_key: Arc::clone(&self.right_key),
            merge: Arc::clone(&self.merge),
        }
    }
}

impl<A, B, K, O> Join<A, B, K, O>
where
    A: AsyncQuery,
    B: AsyncQuery,
{
    pub(crate) fn new<LK, RK, M>(
        left: A,
        right: B,
        left_key: LK,
        right_key: RK,
        merge: M,
    ) -> Self
    where
        LK: Fn(&A::Item) -> K + Send + Sync + 'static,
        RK: Fn(&B::Item) -> K + Send + Sync + 'static,
        M: Fn(A::Item, B::Item) -> O + Send + Sync + 'static,
    {
        Self {
            params: left.params(),
            left,
            right,
            left_key: Arc::new(left_key),
            right_key: Arc::new(right_key),
            merge: Arc::new(merge),
        }
    }
}

struct Tables<L, R, K> {
    left: HashMap<K, SmallVec<[L; 4]>>,
    right: HashMap<K, SmallVec<[R; 4]>>,
}

impl<A, B, K, O> AsyncQuery for Join<A, B, K, O>
where
    A: AsyncQuery,
    B: AsyncQuery,
    A::Item: Clone,
    B::Item: Clone,
    K: Eq + Hash + Send + 'static,
    O: Send + 'static,
{
    type Item = O;

    fn params(&self) -> ExecParams {
        self.params
    }

    fn with_params(self, params: ExecParams) -> Self {
        Join {
            params,
            left: self.left.with_params(params),
            right: self.right.with_params(params),
            left_key: self.left_key,
            right_key: self.right_key,
            merge: self.merge,
        }
    }

    fn open(&self, external: CancelToken) -> ItemStream<O> {
        let cancel = external.child();

        if self.params.mode == ExecutionMode::Sequential {
            let left = self.left.clone();
            let right = self.right.clone();
            let left_key = Arc::clone(&self.left_key);
            let right_key = Arc::clone(&self.right_key);
            let merge = Arc::clone(&self.merge);
            let materialize = async move {
                let mut left_rows: Vec<A::Item> = Vec::new();
                let mut stream = left.open(cancel.child());
                while let Some(item) = stream.next().await {
                    left_rows.push(item?);
                }
                let mut right_rows: Vec<B::Item> = Vec::new();
                let mut stream = right.open(cancel.child());
                while let Some(item) = stream.next().await {
                    right_rows.push(item?);
                }

                let mut index: HashMap<K, SmallVec<[usize; 4]>> = HashMap::new();
                for (position, row) in right_rows.iter().enumerate() {
                    index.entry(right_key(row)).or_default().push(position);
                }
                let mut pairs = Vec::new();
                for row in &left_rows {
                    if let Some(bucket) = index.get(&left_key(row)) {
                        for &position in bucket {
                            pairs.push(merge(row.clone(), right_rows[position].clone()));
                        }
                    }
                }
                Ok(pairs)
            };
            let stream = futures::stream::once(materialize).flat_map(|result| match result {
                Ok(pairs) => futures::stream::iter(pairs.into_iter().map(Ok)).left_stream(),
                Err(error) => {
                    futures::stream::once(futures::future::ready(Err(error))).right_stream()
                }
            });
            return ItemStream::from_try_stream(stream);
        }

        let (tx, rx) = kanal::unbounded_async::<Result<O>>();
        let bag = ErrorBag::new(cancel.clone());
        let mut left_stream = self.left.open(cancel.child());
        let mut right_stream = self.right.open(cancel.child());
        let tables = Arc::new(Mutex::new(Tables::<A::Item, B::Item, K> {
            left: HashMap::new(),
            right: HashMap::new(),
        }));
        let mode = self.params.mode;

        let left_tables = Arc::clone(&tables);
        let left_key = Arc::clone(&self.left_key);
        let left_merge = Arc::clone(&self.merge);
        let left_tx = tx.clone();
        let left_bag = bag.clone();
        let left_drain = async move {
            while let Some(item) = left_stream.next().await {
                match item {
                    Ok(row) => {
                        let key = left_key(&row);
                        let matches: SmallVec<[B::Item; 4]> = {
                            let mut tables = left_tables.lock().unwrap();
                            let matches =
                                tables.right.get(&key).cloned().unwrap_or_default();
                            tables.left.entry(key).or_default().push(row.clone());
                            matches
                        };
                        for other in matches {
                            let pair = left_merge(row.clone(), other);
                            if left_tx.send(Ok(pair)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(error) => {
                        left_bag.record(error);
                        return;
                    }
                }
            }
        };

        let right_tables = Arc::clone(&tables);
        let right_key = Arc::clone(&self.right_key);
        let right_merge = Arc::clone(&self.merge);
        let right_tx = tx.clone();
        let right_bag = bag.clone();
        let right_drain = async move {
            while let Some(item) = right_stream.next().await {
                match item {
                    Ok(row) => {
                        let key = right_key(&row);
                        let matches: SmallVec<[A::Item; 4]> = {
                            let mut tables = right_tables.lock().unwrap();
                            let matches =
                                tables.left.get(&key).cloned().unwrap_or_default();
                            tables.right.entry(key).or_default().push(row.clone());
                            matches
                        };
                        for other in matches {
                            let pair = right_merge(other, row.clone());
                            if right_tx.send(Ok(pair)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(error) => {
                        right_bag.record(error);
                        return;
                    }
                }
            }
        };

        let task = tokio::spawn(async move {
            match mode {
                ExecutionMode::Parallel => {
                    let left_handle = tokio::spawn(left_drain);
                    let right_handle = tokio::spawn(right_drain);
                    for handle in [left_handle, right_handle] {
                        if let Err(error) = handle.await {
                            bag.record(join_failure(error));
                        }
                    }
                }
                _ => {
                    futures::join!(left_drain, right_drain);
                }
            }
            // The last drain to finish gets the queue closed behind it.
            if let Some(error) = bag.terminal() {
                let _ = tx.send(Err(error)).await;
            }
        });

        ItemStream::from_channel(rx, DriverGuard::new(cancel, vec![task]))
    }
}
