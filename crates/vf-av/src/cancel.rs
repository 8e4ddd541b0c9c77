//! Structured cancellation for decode sessions.
//!
//! A [`CancelScope`] groups every decode session that should stop together
//! when the operator interrupts the program. Each running session arms one
//! watcher task in the scope; the watcher terminates that session's decoder
//! when the scope is cancelled, and exits quietly when the session disarms it
//! on close. [`CancelScope::shutdown`] cancels and then waits for every
//! watcher, so teardown is finished before the caller moves on.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::decoder::Terminate;

/// Shared cancellation signal plus the watchers that react to it.
#[derive(Debug, Clone)]
pub struct CancelScope {
    token: CancellationToken,
    tracker: TaskTracker,
    handle: Handle,
}

impl CancelScope {
    /// Create a scope whose watchers run on `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            handle,
        }
    }

    /// Create a scope on the current tokio runtime, if there is one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// The underlying token, for tying other work to the same shutdown.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal every armed watcher without waiting for them.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Number of watchers that have not finished yet.
    pub fn active_watchers(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel the scope and wait until every watcher has finished.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!("Cancel scope drained");
    }

    /// Arm a watcher that terminates a decoder when the scope is cancelled.
    pub(crate) fn arm(&self, target: Arc<dyn Terminate>, label: String) -> WatchGuard {
        let disarm = CancellationToken::new();
        let scope = self.token.clone();
        let done = disarm.clone();

        self.tracker.spawn_on(
            async move {
                tokio::select! {
                    _ = scope.cancelled() => {
                        tracing::warn!("Interrupt received; terminating decoder for {label}");
                        target.terminate();
                    }
                    _ = done.cancelled() => {}
                }
            },
            &self.handle,
        );

        WatchGuard { disarm }
    }
}

/// Disarms a session's watcher when dropped.
#[derive(Debug)]
pub struct WatchGuard {
    disarm: CancellationToken,
}

impl WatchGuard {
    pub fn disarm(&self) {
        self.disarm.cancel();
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.disarm.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTarget {
        hits: AtomicUsize,
    }

    impl Terminate for CountingTarget {
        fn terminate(&self) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn cancel_terminates_armed_target() {
        let scope = CancelScope::current().unwrap();
        let target = Arc::new(CountingTarget::default());
        let _guard = scope.arm(target.clone(), "a.mp4".into());

        scope.shutdown().await;
        assert_eq!(target.hits.load(Ordering::SeqCst), 1);
        assert_eq!(scope.active_watchers(), 0);
    }

    #[tokio::test]
    async fn disarmed_watcher_does_not_terminate() {
        let scope = CancelScope::current().unwrap();
        let target = Arc::new(CountingTarget::default());
        let guard = scope.arm(target.clone(), "b.mp4".into());
        guard.disarm();

        // Let the watcher observe the disarm before the scope is cancelled.
        while scope.active_watchers() > 0 {
            tokio::task::yield_now().await;
        }
        scope.shutdown().await;
        assert_eq!(target.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_every_watcher() {
        let scope = CancelScope::current().unwrap();
        let targets: Vec<_> = (0..4).map(|_| Arc::new(CountingTarget::default())).collect();
        let _guards: Vec<_> = targets
            .iter()
            .enumerate()
            .map(|(i, t)| scope.arm(t.clone(), format!("video{i}.mp4")))
            .collect();
        assert_eq!(scope.active_watchers(), 4);

        scope.shutdown().await;
        assert!(targets.iter().all(|t| t.hits.load(Ordering::SeqCst) == 1));
        assert!(scope.is_cancelled());
    }

    #[test]
    fn current_without_runtime_is_none() {
        assert!(CancelScope::current().is_none());
    }
}
