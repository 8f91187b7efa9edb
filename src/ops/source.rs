//! Source leaves: empty, singleton, and literal sequences.
//!
//! One tagged node kind covers the whole leaf family, which is what lets
//! the structural combinators fuse instead of wrapping: prepend, append,
//! take, and skip over a literal source rebuild the literal in place, and
//! flatten elides empty leaves with a tag check rather than an identity
//! comparison.

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::params::ExecParams;
use crate::query::AsyncQuery;
use crate::stream::ItemStream;

/// A source leaf over zero, one, or a literal list of items.
///
/// Enumeration walks the shared literal and checks cancellation between
/// items; the execution mode does not change what a leaf produces, only
/// how downstream operators consume it.
///
/// # Example
///
/// ```rust,ignore
/// use conflux::{from_iter, QueryExt};
///
/// let evens = from_iter(vec![1, 2, 3, 4]).filter(|x| x % 2 == 0);
/// assert_eq!(evens.to_vec().await?, vec![2, 4]);
/// ```
#[derive(Clone)]
pub struct Source<T> {
    params: ExecParams,
    kind: SourceKind<T>,
}

#[derive(Clone)]
enum SourceKind<T> {
    Empty,
    Singleton(T),
    Sequence(Arc<Vec<T>>),
}

/// A source that produces no items.
pub fn empty<T>() -> Source<T> {
    Source {
        params: ExecParams::default(),
        kind: SourceKind::Empty,
    }
}

/// A source that produces exactly one item.
pub fn singleton<T>(item: T) -> Source<T> {
    Source {
        params: ExecParams::default(),
        kind: SourceKind::Singleton(item),
    }
}

/// A source over an eagerly materialized sequence.
pub fn from_iter<T, I>(items: I) -> Source<T>
where
    I: IntoIterator<Item = T>,
{
    let items: Vec<T> = items.into_iter().collect();
    Source {
        params: ExecParams::default(),
        kind: if items.is_empty() {
            SourceKind::Empty
        } else {
            SourceKind::Sequence(Arc::new(items))
        },
    }
}

impl<T: Clone> Source<T> {
    /// Rebuild the literal with `item` in front.
    pub fn prepend(self, item: T) -> Source<T> {
        let kind = match self.kind {
            SourceKind::Empty => SourceKind::Singleton(item),
            SourceKind::Singleton(existing) => {
                SourceKind::Sequence(Arc::new(vec![item, existing]))
            }
            SourceKind::Sequence(items) => {
                let mut rebuilt = Vec::with_capacity(items.len() + 1);
                rebuilt.push(item);
                rebuilt.extend(items.iter().cloned());
                SourceKind::Sequence(Arc::new(rebuilt))
            }
        };
        Source {
            params: self.params,
            kind,
        }
    }

    /// Rebuild the literal with `item` at the end.
    pub fn append(self, item: T) -> Source<T> {
        let kind = match self.kind {
            SourceKind::Empty => SourceKind::Singleton(item),
            SourceKind::Singleton(existing) => {
                SourceKind::Sequence(Arc::new(vec![existing, item]))
            }
            SourceKind::Sequence(items) => {
                let mut rebuilt = Vec::with_capacity(items.len() + 1);
                rebuilt.extend(items.iter().cloned());
                rebuilt.push(item);
                SourceKind::Sequence(Arc::new(rebuilt))
            }
        };
        Source {
            params: self.params,
            kind,
        }
    }

    /// Slice the literal down to its first `count` items.
    pub fn take(self, count: usize) -> Source<T> {
        let kind = match self.kind {
            SourceKind::Empty => SourceKind::Empty,
            SourceKind::Singleton(item) => {
                if count == 0 {
                    SourceKind::Empty
                } else {
                    SourceKind::Singleton(item)
                }
            }
            SourceKind::Sequence(items) => {
                let end = count.min(items.len());
                if end == 0 {
                    SourceKind::Empty
                } else {
                    SourceKind::Sequence(Arc::new(items[..end].to_vec()))
                }
            }
        };
        Source {
            params: self.params,
            kind,
        }
    }

    /// Slice the first `count` items off the literal.
    pub fn skip(self, count: usize) -> Source<T> {
        let kind = match self.kind {
            SourceKind::Empty => SourceKind::Empty,
            SourceKind::Singleton(item) => {
                if count == 0 {
                    SourceKind::Singleton(item)
                } else {
                    SourceKind::Empty
                }
            }
            SourceKind::Sequence(items) => {
                if count >= items.len() {
                    SourceKind::Empty
                } else {
                    SourceKind::Sequence(Arc::new(items[count..].to_vec()))
                }
            }
        };
        Source {
            params: self.params,
            kind,
        }
    }
}

impl<T> AsyncQuery for Source<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Item = T;

    fn params(&self) -> ExecParams {
        self.params
    }

    fn with_params(self, params: ExecParams) -> Self {
        Source {
            params,
            kind: self.kind,
        }
    }

    fn open(&self, cancel: CancelToken) -> ItemStream<T> {
        let items: Arc<Vec<T>> = match &self.kind {
            SourceKind::Empty => return ItemStream::empty(),
            SourceKind::Singleton(item) => Arc::new(vec![item.clone()]),
            SourceKind::Sequence(items) => Arc::clone(items),
        };
        let stream = futures::stream::try_unfold(
            (items, 0usize, cancel),
            |(items, index, cancel)| async move {
                if cancel.is_cancelled() {
                    return Err(Error::Canceled);
                }
                match items.get(index) {
                    Some(item) => {
                        let item = item.clone();
                        Ok(Some((item, (items, index + 1, cancel))))
                    }
                    None => Ok(None),
                }
            },
        );
        ItemStream::from_try_stream(stream)
    }

    fn is_empty_hint(&self) -> bool {
        matches!(self.kind, SourceKind::Empty)
    }

    fn len_hint(&self) -> Option<usize> {
        Some(match &self.kind {
            SourceKind::Empty => 0,
            SourceKind::Singleton(_) => 1,
            SourceKind::Sequence(items) => items.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryExt;

    #[tokio::test]
    async fn test_empty_yields_nothing() {
        let source = empty::<u32>();
        assert!(source.is_empty_hint());
        assert_eq!(source.len_hint(), Some(0));
        assert!(source.to_vec().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_singleton_yields_one() {
        assert_eq!(singleton(5).to_vec().await.unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_prepend_fuses_into_literal() {
        let source = from_iter(vec![2, 3]).prepend(1);
        assert_eq!(source.len_hint(), Some(3));
        assert_eq!(source.to_vec().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_append_on_singleton_becomes_sequence() {
        let source = singleton(1).append(2);
        assert_eq!(source.len_hint(), Some(2));
        assert_eq!(source.to_vec().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_take_slices() {
        let source = from_iter(0..10).take(3);
        assert_eq!(source.len_hint(), Some(3));
        assert_eq!(source.to_vec().await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_take_zero_collapses_to_empty() {
        assert!(from_iter(0..10).take(0).is_empty_hint());
        assert!(singleton(1).take(0).is_empty_hint());
    }

    #[tokio::test]
    async fn test_skip_past_end_is_empty() {
        assert!(from_iter(vec![1, 2]).skip(5).is_empty_hint());
        assert_eq!(from_iter(vec![1, 2, 3]).skip(1).to_vec().await.unwrap(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_enumeration_checks_cancellation() {
        let source = from_iter(0..100);
        let cancel = CancelToken::new();
        let mut stream = source.open(cancel.clone());

        assert_eq!(stream.next().await.unwrap().unwrap(), 0);
        cancel.cancel();
        assert!(stream.next().await.unwrap().unwrap_err().is_canceled());
        assert!(stream.next().await.is_none());
    }
}
