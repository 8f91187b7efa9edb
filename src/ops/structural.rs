//! Structural operators: concat, take, skip.

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::params::ExecParams;
use crate::query::AsyncQuery;
use crate::runner::concat_run;
use crate::stream::ItemStream;

/// Two streams end-to-end.
///
/// Sequential leaves the second input untouched until the first ends;
/// the overlapped modes drive both at once (ordered buffers the second
/// into a side queue, unordered interleaves), which makes this the
/// two-input case of flatten.
#[derive(Clone)]
pub struct Concat<A, B> {
    params: ExecParams,
    first: A,
    second: B,
}

impl<A, B> Concat<A, B>
where
    A: AsyncQuery,
    B: AsyncQuery<Item = A::Item>,
{
    pub(crate) fn new(first: A, second: B) -> Self {
        Self {
            params: first.params(),
            first,
            second,
        }
    }
}

impl<A, B> AsyncQuery for Concat<A, B>
where
    A: AsyncQuery,
    B: AsyncQuery<Item = A::Item>,
{
    type Item = A::Item;

    fn params(&self) -> ExecParams {
        self.params
    }

    fn with_params(self, params: ExecParams) -> Self {
        Concat {
            params,
            first: self.first.with_params(params),
            second: self.second.with_params(params),
        }
    }

    fn open(&self, cancel: CancelToken) -> ItemStream<Self::Item> {
        let first = self.first.clone();
        let second = self.second.clone();
        concat_run(
            move |token| first.open(token),
            move |token| second.open(token),
            self.params,
            cancel,
        )
    }

    fn is_empty_hint(&self) -> bool {
        self.first.is_empty_hint() && self.second.is_empty_hint()
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.first.len_hint()? + self.second.len_hint()?)
    }
}

/// The first `count` items of the parent.
///
/// Ending early drops the parent stream, which trips its cancellation and
/// releases whatever it held.
#[derive(Clone)]
pub struct Take<P> {
    params: ExecParams,
    parent: P,
    count: usize,
}

impl<P: AsyncQuery> Take<P> {
    pub(crate) fn new(parent: P, count: usize) -> Self {
        Self {
            params: parent.params(),
            parent,
            count,
        }
    }
}

impl<P: AsyncQuery> AsyncQuery for Take<P> {
    type Item = P::Item;

    fn params(&self) -> ExecParams {
        self.params
    }

    fn with_params(self, params: ExecParams) -> Self {
        Take {
            params,
            parent: self.parent.with_params(params),
            count: self.count,
        }
    }

    fn open(&self, external: CancelToken) -> ItemStream<Self::Item> {
        if self.count == 0 {
            return ItemStream::empty();
        }
        let cancel = external.child();
        let input = self.parent.open(cancel.child());
        let stream = futures::stream::try_unfold(
            (input, self.count, cancel),
            |(mut input, remaining, cancel)| async move {
                if remaining == 0 {
                    return Ok(None);
                }
                if cancel.is_cancelled() {
                    return Err(Error::Canceled);
                }
                match input.next().await {
                    None => Ok(None),
                    Some(Err(error)) => Err(error),
                    Some(Ok(item)) => Ok(Some((item, (input, remaining - 1, cancel)))),
                }
            },
        );
        ItemStream::from_try_stream(stream)
    }

    fn is_empty_hint(&self) -> bool {
        self.count == 0 || self.parent.is_empty_hint()
    }

    fn len_hint(&self) -> Option<usize> {
        self.parent.len_hint().map(|len| len.min(self.count))
    }
}

/// Everything after the first `count` items of the parent.
#[derive(Clone)]
pub struct Skip<P> {
    params: ExecParams,
    parent: P,
    count: usize,
}

impl<P: AsyncQuery> Skip<P> {
    pub(crate) fn new(parent: P, count: usize) -> Self {
        Self {
            params: parent.params(),
            parent,
            count,
        }
    }
}

impl<P: AsyncQuery> AsyncQuery for Skip<P> {
    type Item = P::Item;

    fn params(&self) -> ExecParams {
        self.params
    }

    fn with_params(self, params: ExecParams) -> Self {
        Skip {
            params,
            parent: self.parent.with_params(params),
            count: self.count,
        }
    }

    fn open(&self, external: CancelToken) -> ItemStream<Self::Item> {
        let cancel = external.child();
        let input = self.parent.open(cancel.child());
        let stream = futures::stream::try_unfold(
            (input, self.count, cancel),
            |(mut input, mut to_skip, cancel)| async move {
                loop {
                    if cancel.is_cancelled() {
                        return Err(Error::Canceled);
                    }
                    match input.next().await {
                        None => return Ok(None),
                        Some(Err(error)) => return Err(error),
                        Some(Ok(item)) => {
                            if to_skip > 0 {
                                to_skip -= 1;
                                continue;
                            }
                            return Ok(Some((item, (input, 0, cancel))));
                        }
                    }
                }
            },
        );
        ItemStream::from_try_stream(stream)
    }

    fn len_hint(&self) -> Option<usize> {
        self.parent.len_hint().map(|len| len.saturating_sub(self.count))
    }
}
