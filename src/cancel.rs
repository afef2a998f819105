use crate::error::{SpliceError, SpliceResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Cooperative cancellation shared between the CLI and a running task.
///
/// Clones observe the same flag. Long-running stages race their work against
/// [`CancelToken::cancelled`]; the applier checks [`CancelToken::is_cancelled`]
/// between files so a cancelled task never leaves a file half-written.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> SpliceResult<()> {
        if self.is_cancelled() {
            Err(SpliceError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before reading the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Run `fut` unless cancellation wins the race first.
    pub async fn run<F, T>(&self, fut: F) -> SpliceResult<T>
    where
        F: Future<Output = SpliceResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(SpliceError::Cancelled),
            out = fut => out,
        }
    }
}
