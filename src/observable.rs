//! Push-style producer traits bridged into the pull surface.
//!
//! An [`Observable`] is any producer that pushes items at an [`Observer`].
//! The bridge operator (`from_observable`) adapts one into a query source;
//! see `ops::observed` for the queueing and overflow policy.

use crate::error::Error;

/// Receiver half of a push-style producer.
///
/// Exactly one of [`on_completed`](Observer::on_completed) or
/// [`on_error`](Observer::on_error) ends the feed; items pushed after
/// either are ignored by the bridge.
pub trait Observer<T>: Send {
    /// Deliver the next item.
    fn on_next(&mut self, item: T);

    /// Signal that the feed ended normally.
    fn on_completed(&mut self);

    /// Signal that the feed failed.
    fn on_error(&mut self, error: Error);
}

/// A push-style producer that can be subscribed to.
pub trait Observable<T>: Send + Sync {
    /// Register an observer and start pushing.
    ///
    /// The returned [`Subscription`] releases the registration when
    /// dropped; producers should stop pushing to a released observer.
    fn subscribe(&self, observer: Box<dyn Observer<T>>) -> Subscription;
}

/// Registration handle returned by [`Observable::subscribe`].
///
/// Releases the underlying registration when dropped.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Build a subscription that runs `release` when dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_subscription_releases_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let sub = Subscription::new(move || flag.store(true, Ordering::SeqCst));

        assert!(!released.load(Ordering::SeqCst));
        drop(sub);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_noop_subscription() {
        drop(Subscription::noop());
    }
}
