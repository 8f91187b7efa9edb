//! The operator protocol and the fluent combinator surface.
//!
//! [`AsyncQuery`] is the capability surface every pipeline node exposes:
//! its execution parameters, a way to rebuild itself with replaced
//! parameters (how mode switches reach operators already in the chain),
//! and the enumeration request itself. [`QueryExt`] layers the fluent
//! combinators and terminals on top; concrete operators shadow individual
//! combinators with fused versions where their shape allows it.

use std::future::Future;
use std::hash::Hash;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::ops::edges::{Append, Prepend};
use crate::ops::flatten::Flatten;
use crate::ops::join::Join;
use crate::ops::select_where::{SelectWhere, Stage};
use crate::ops::structural::{Concat, Skip, Take};
use crate::params::ExecParams;
use crate::stream::ItemStream;

/// A pipeline node: carries execution parameters and produces the output
/// stream on request.
///
/// Nodes are cheap to clone (parents and callbacks are shared), immutable
/// once built, and re-enumerable: every [`open`](AsyncQuery::open) call is
/// an independent single-pass enumeration.
pub trait AsyncQuery: Clone + Send + Sync + Sized + 'static {
    /// Element type of the output stream.
    type Item: Send + 'static;

    /// The execution parameters this node currently carries.
    fn params(&self) -> ExecParams;

    /// A structurally identical node with replaced parameters.
    ///
    /// Implementations rebind their parents recursively, so a mode switch
    /// applies to the whole upstream chain.
    fn with_params(self, params: ExecParams) -> Self;

    /// Start one enumeration.
    ///
    /// The token is the external cancellation surface: tripping it makes
    /// the stream fail with [`Error::Canceled`](crate::Error::Canceled) at
    /// the next advance, and every internal task observes the trip.
    fn open(&self, cancel: CancelToken) -> ItemStream<Self::Item>;

    /// Whether this node is statically known to produce nothing.
    ///
    /// Used by flatten to elide inner streams before any task is spawned.
    fn is_empty_hint(&self) -> bool {
        false
    }

    /// Exact output length, when statically known.
    ///
    /// Lets fused sources answer `count` without enumerating.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Fluent combinators and terminals over any [`AsyncQuery`].
///
/// Blanket-implemented; concrete operators provide fused inherent
/// versions of some of these (which Rust's method resolution prefers), so
/// chains like `map` over `map` or `prepend` over a literal source
/// collapse at construction time.
pub trait QueryExt: AsyncQuery {
    // ------------------------------------------------------------------
    // Mode switches
    // ------------------------------------------------------------------

    /// Run one item at a time with no overlap (the default).
    fn as_sequential(self) -> Self {
        self.with_params(ExecParams::sequential())
    }

    /// Overlap per-item work cooperatively, preserving input order.
    fn as_concurrent(self) -> Self {
        self.with_params(ExecParams::concurrent())
    }

    /// Overlap per-item work on the worker pool, preserving input order.
    fn as_parallel(self) -> Self {
        self.with_params(ExecParams::parallel())
    }

    /// Force output order to equal input order.
    fn as_ordered(self) -> Self {
        let params = self.params().with_ordered(true);
        self.with_params(params)
    }

    /// Allow output in completion order.
    fn as_unordered(self) -> Self {
        let params = self.params().with_ordered(false);
        self.with_params(params)
    }

    // ------------------------------------------------------------------
    // Transforms
    // ------------------------------------------------------------------

    /// Transform every item.
    fn map<U, F>(self, f: F) -> SelectWhere<Self, U>
    where
        U: Send + 'static,
        F: Fn(Self::Item) -> U + Send + Sync + 'static,
    {
        SelectWhere::new(self, Stage::from_map(f))
    }

    /// Keep only items matching the predicate.
    fn filter<F>(self, predicate: F) -> SelectWhere<Self, Self::Item>
    where
        F: Fn(&Self::Item) -> bool + Send + Sync + 'static,
    {
        SelectWhere::new(self, Stage::from_filter(predicate))
    }

    /// Transform and filter in one stage.
    fn filter_map<U, F>(self, f: F) -> SelectWhere<Self, U>
    where
        U: Send + 'static,
        F: Fn(Self::Item) -> Option<U> + Send + Sync + 'static,
    {
        SelectWhere::new(self, Stage::from_filter_map(f))
    }

    /// Transform every item with an asynchronous, fallible selector.
    fn map_async<U, F, Fut>(self, f: F) -> SelectWhere<Self, U>
    where
        U: Send + 'static,
        F: Fn(Self::Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        SelectWhere::new(self, Stage::from_map_async(f))
    }

    /// Keep only items matching an asynchronous, fallible predicate.
    ///
    /// The predicate consumes a clone; the original item is retained for
    /// delivery.
    fn filter_async<F, Fut>(self, predicate: F) -> SelectWhere<Self, Self::Item>
    where
        Self::Item: Clone,
        F: Fn(Self::Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        SelectWhere::new(self, Stage::from_filter_async(predicate))
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Emit `item` before this query's output.
    fn prepend(self, item: Self::Item) -> Prepend<Self> {
        Prepend::single(self, item)
    }

    /// Emit `item` after this query's output.
    fn append(self, item: Self::Item) -> Append<Self> {
        Append::single(self, item)
    }

    /// Emit the thunk's result before this query's output.
    ///
    /// In overlapped modes the thunk starts when enumeration starts, so
    /// its latency overlaps parent consumption; Parallel additionally runs
    /// it on the worker pool.
    fn prepend_async<F, Fut>(self, thunk: F) -> Prepend<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Self::Item>> + Send + 'static,
    {
        Prepend::thunk(self, thunk)
    }

    /// Emit the thunk's result after this query's output.
    fn append_async<F, Fut>(self, thunk: F) -> Append<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Self::Item>> + Send + 'static,
    {
        Append::thunk(self, thunk)
    }

    /// Emit `other`'s output after this query's output.
    fn concat<B>(self, other: B) -> Concat<Self, B>
    where
        B: AsyncQuery<Item = Self::Item>,
    {
        Concat::new(self, other)
    }

    /// Yield the first `count` items, then stop and dispose the parent.
    fn take(self, count: usize) -> Take<Self> {
        Take::new(self, count)
    }

    /// Discard the first `count` items, then yield the rest.
    fn skip(self, count: usize) -> Skip<Self> {
        Skip::new(self, count)
    }

    // ------------------------------------------------------------------
    // Combining
    // ------------------------------------------------------------------

    /// Merge a stream of streams under the active execution discipline.
    fn flatten(self) -> Flatten<Self>
    where
        Self::Item: AsyncQuery,
    {
        Flatten::new(self)
    }

    /// Symmetric hash join against `other`, pairing items whose keys match.
    ///
    /// Pairs are emitted in match-discovery order under the overlapped
    /// modes, regardless of the ordering flag.
    fn join<B, K, O, LK, RK, M>(
        self,
        other: B,
        left_key: LK,
        right_key: RK,
        merge: M,
    ) -> Join<Self, B, K, O>
    where
        B: AsyncQuery,
        K: Eq + Hash + Send + 'static,
        O: Send + 'static,
        LK: Fn(&Self::Item) -> K + Send + Sync + 'static,
        RK: Fn(&B::Item) -> K + Send + Sync + 'static,
        M: Fn(Self::Item, B::Item) -> O + Send + Sync + 'static,
    {
        Join::new(self, other, left_key, right_key, merge)
    }

    // ------------------------------------------------------------------
    // Terminals
    // ------------------------------------------------------------------

    /// Collect every item into a vector.
    fn to_vec(&self) -> impl Future<Output = Result<Vec<Self::Item>>> + Send {
        async {
            let mut stream = self.open(CancelToken::new());
            let mut items = Vec::new();
            while let Some(item) = stream.next().await {
                items.push(item?);
            }
            Ok(items)
        }
    }

    /// Count the items without retaining them.
    ///
    /// Known-length sources answer directly without enumerating.
    fn count(&self) -> impl Future<Output = Result<usize>> + Send {
        async {
            if let Some(len) = self.len_hint() {
                return Ok(len);
            }
            let mut stream = self.open(CancelToken::new());
            let mut count = 0usize;
            while let Some(item) = stream.next().await {
                item?;
                count += 1;
            }
            Ok(count)
        }
    }

    /// Whether the query yields at least one item.
    ///
    /// Pulls at most one item; dropping the stream disposes the parent.
    fn any(&self) -> impl Future<Output = Result<bool>> + Send {
        async {
            if self.is_empty_hint() {
                return Ok(false);
            }
            let mut stream = self.open(CancelToken::new());
            match stream.next().await {
                Some(Ok(_)) => Ok(true),
                Some(Err(error)) => Err(error),
                None => Ok(false),
            }
        }
    }

    /// Run `f` for every item.
    fn for_each<F>(&self, mut f: F) -> impl Future<Output = Result<()>> + Send
    where
        F: FnMut(Self::Item) + Send,
    {
        async move {
            let mut stream = self.open(CancelToken::new());
            while let Some(item) = stream.next().await {
                f(item?);
            }
            Ok(())
        }
    }
}

impl<Q: AsyncQuery> QueryExt for Q {}
