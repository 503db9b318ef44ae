//! Per-attempt abort signal shared between the caller and the transfer task.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use super::error::TransportError;

/// Cooperative abort flag for one attempt.
///
/// Every suspension point of the transfer loop is raced against this signal, so
/// tripping it makes the current read, write or connect fail with
/// [`TransportError::Aborted`].
#[derive(Debug, Clone, Default)]
pub(crate) struct AbortSignal {
    inner: Arc<AbortInner>,
}

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once [`abort`](Self::abort) has been called.
    pub(crate) async fn aborted(&self) {
        loop {
            // Registered before the flag check so a concurrent abort is not missed.
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }

    /// Runs `operation` unless the signal trips first.
    pub(crate) async fn guard<T, F>(&self, url: &str, operation: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        tokio::select! {
            biased;
            () = self.aborted() => Err(TransportError::aborted(url)),
            result = operation => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_guard_passes_through_when_not_aborted() {
        let signal = AbortSignal::new();
        let result = signal
            .guard("https://a.test", async { Ok::<_, TransportError>(5) })
            .await;
        assert_eq!(result.unwrap_or_default(), 5);
    }

    #[tokio::test]
    async fn test_guard_fails_immediately_when_already_aborted() {
        let signal = AbortSignal::new();
        signal.abort();
        let result = signal
            .guard("https://a.test", async { Ok::<_, TransportError>(5) })
            .await;
        assert!(matches!(result, Err(TransportError::Aborted { .. })));
    }

    #[tokio::test]
    async fn test_guard_interrupts_pending_operation() {
        let signal = AbortSignal::new();
        let remote = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.abort();
        });

        let result = signal
            .guard("https://a.test", std::future::pending::<Result<(), TransportError>>())
            .await;
        assert!(matches!(result, Err(TransportError::Aborted { .. })));
        assert!(signal.is_aborted());
    }
}
