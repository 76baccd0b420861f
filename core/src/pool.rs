use crate::cancel::CancelToken;
use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use std::future::Future;
use tracing::debug;

/// Runs one async operation per item with bounded concurrency.
///
/// Under fail-fast policy the first real failure cancels a pool-local
/// child token: items not yet started are skipped, in-flight items are
/// asked to stop through the token they received. Abort noise from
/// that local cancellation is swallowed; a cancellation of the caller's
/// token still surfaces as [`Error::Aborted`]. The first real error is
/// returned after every started item settled.
pub async fn for_each_limited<T, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    fail_fast: bool,
    token: &CancelToken,
    f: F,
) -> Result<()>
where
    F: Fn(T, CancelToken) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let local = token.child();
    let f = &f;
    let local_ref = &local;
    let mut results = stream::iter(items.into_iter().map(|item| async move {
        if local_ref.is_cancelled() {
            return Err(Error::Aborted);
        }
        f(item, local_ref.clone()).await
    }))
    .buffer_unordered(concurrency.max(1));

    let mut first_err = None;
    let mut skipped = 0usize;
    while let Some(result) = results.next().await {
        match result {
            Ok(()) => {}
            Err(Error::Aborted) => {
                if token.is_cancelled() {
                    if first_err.is_none() {
                        first_err = Some(Error::Aborted);
                    }
                } else {
                    skipped += 1;
                }
            }
            Err(err) => {
                if first_err.is_none() {
                    first_err = Some(err);
                    if fail_fast {
                        local.cancel();
                    }
                }
            }
        }
    }
    if skipped > 0 {
        debug!(skipped, "Skipped queued items after failure");
    }
    match first_err {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
