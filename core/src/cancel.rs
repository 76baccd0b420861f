use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cooperative cancellation token, checked at process-spawn and
/// worker-pool boundaries. Child tokens observe their parent, so a
/// pool can stop its own in-flight items without cancelling the whole
/// workflow.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
    parent: Option<CancelToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                notify: Notify::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(|parent| parent.is_cancelled())
    }

    /// Errors with [`Error::Aborted`] once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }

    /// Resolves when this token or any ancestor is cancelled.
    pub fn cancelled(&self) -> BoxFuture<'_, ()> {
        async move {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register with the Notify before reading the flag; a
            // cancel landing between the two would otherwise notify
            // nobody and the waiter would hang.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            // Only cancel() notifies, and it sets the flag first, so a
            // wakeup here always means cancellation.
            match &self.inner.parent {
                None => notified.await,
                Some(parent) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = parent.cancelled() => {}
                    }
                }
            }
        }
        .boxed()
    }
}
