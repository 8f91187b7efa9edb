//! Linked cancellation tokens.
//!
//! Every enumeration creates a child token for its internal tasks, so a
//! trip anywhere in the tree (external cancel, first error, handle drop)
//! reaches every drainer without the drainers polling a shared flag chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

/// A cancellation token that can be linked into a tree.
///
/// Canceling a token cancels all of its descendants; canceling a child
/// leaves the parent untouched. Cloning shares the same token.
///
/// # Example
///
/// ```rust,ignore
/// let root = CancelToken::new();
/// let child = root.child();
///
/// root.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl CancelToken {
    /// Create a new, untripped token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a child token that trips when this token trips.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }
        self.inner
            .children
            .lock()
            .unwrap()
            .push(Arc::downgrade(&child.inner));
        // Close the window where cancel() ran between the check and the push.
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Trip this token and all descendants.
    pub fn cancel(&self) {
        cancel_inner(&self.inner);
    }

    /// Whether this token has been tripped.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until this token trips. Returns immediately if already tripped.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn cancel_inner(inner: &Arc<TokenInner>) {
    if inner.cancelled.swap(true, Ordering::SeqCst) {
        return;
    }
    inner.notify.notify_waiters();
    let children = std::mem::take(&mut *inner.children.lock().unwrap());
    for child in children {
        if let Some(child) = child.upgrade() {
            cancel_inner(&child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_untripped() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_reaches_children() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();

        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_cancel_keeps_parent() {
        let root = CancelToken::new();
        let child = root.child();

        child.cancel();
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_child_of_tripped_token_starts_tripped() {
        let root = CancelToken::new();
        root.cancel();
        assert!(root.child().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        token.cancel();
        handle.await.unwrap();
    }
}
